//! Wire types for the HTTPS API.
//!
//! Every body is JSON with PascalCase field names. Every response carries
//! `Success` and `Message`; typed responses add their payload fields.
//! Byte fields (`Content`, `CA`, `Cert`, `Key`) travel as standard base64.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File mode bits in the 32-bit wire layout.
///
/// The low nine bits are the permission bits. Type and special bits sit in
/// the high bits so a listing can distinguish directories from files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const DIR: u32 = 1 << 31;
    pub const SYMLINK: u32 = 1 << 27;
    pub const SETUID: u32 = 1 << 23;
    pub const SETGID: u32 = 1 << 22;
    pub const STICKY: u32 = 1 << 20;
    pub const PERM: u32 = 0o777;

    const TYPE_MASK: u32 = Self::DIR | Self::SYMLINK;

    /// Build a wire mode from a Unix `st_mode` style permission word.
    pub fn from_unix(mode: u32, is_dir: bool, is_symlink: bool) -> Self {
        let mut bits = mode & Self::PERM;
        if mode & 0o4000 != 0 {
            bits |= Self::SETUID;
        }
        if mode & 0o2000 != 0 {
            bits |= Self::SETGID;
        }
        if mode & 0o1000 != 0 {
            bits |= Self::STICKY;
        }
        if is_dir {
            bits |= Self::DIR;
        }
        if is_symlink {
            bits |= Self::SYMLINK;
        }
        Self(bits)
    }

    /// Permission word suitable for `chmod`, including setuid/setgid/sticky.
    pub fn unix_permissions(&self) -> u32 {
        let mut mode = self.0 & Self::PERM;
        if self.0 & Self::SETUID != 0 {
            mode |= 0o4000;
        }
        if self.0 & Self::SETGID != 0 {
            mode |= 0o2000;
        }
        if self.0 & Self::STICKY != 0 {
            mode |= 0o1000;
        }
        mode
    }

    pub fn perm(&self) -> u32 {
        self.0 & Self::PERM
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR != 0
    }

    pub fn is_symlink(&self) -> bool {
        self.0 & Self::SYMLINK != 0
    }

    pub fn is_regular(&self) -> bool {
        self.0 & Self::TYPE_MASK == 0
    }
}

/// Standard base64 encoding for byte fields; `null` decodes as empty.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Treat the zero timestamp (`0001-01-01T00:00:00Z`) as "not supplied".
pub fn effective_timestamp(ts: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    ts.filter(|t| t.year() > 1)
}

/// The bare envelope: failures, `/ping/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub success: bool,
    pub message: String,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetOsResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "OS")]
    pub os: String,
}

/// Body of `/exec/` and `/spawn/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecRequest {
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    /// `KEY=VALUE` entries appended to the daemon's environment
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
}

pub type SpawnRequest = ExecRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecResponse {
    pub success: bool,
    pub message: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpawnResponse {
    pub success: bool,
    pub message: String,
    pub command: String,
    pub exit_code: i32,
}

/// Body of `/get/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileGetRequest {
    pub pathname: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "CA", default, with = "base64_bytes")]
    pub ca: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub cert: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub key: Vec<u8>,
    /// Seconds until the fetched file is deleted; 0 keeps it
    #[serde(default)]
    pub auto_delete_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileGetResponse {
    pub success: bool,
    pub message: String,
    pub pathname: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileDownloadRequest {
    pub pathname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileDownloadResponse {
    pub success: bool,
    pub message: String,
    pub pathname: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub mode: FileMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileUploadRequest {
    pub pathname: String,
    #[serde(default, with = "base64_bytes")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mode: FileMode,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileDeleteRequest {
    pub pathname: String,
}

/// Response for `/upload/` and `/delete/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileResponse {
    pub success: bool,
    pub message: String,
    pub pathname: String,
}

/// Body of `/dir/` and `/rmdir/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryRequest {
    pub pathname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryCreateRequest {
    pub pathname: String,
    #[serde(default)]
    pub mode: FileMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub mode: FileMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryResponse {
    pub success: bool,
    pub message: String,
    pub pathname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: BTreeMap<String, DirectoryEntry>,
}

/// Body of `/isfile/` and `/isdir/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IsRequest {
    pub pathname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IsResponse {
    pub success: bool,
    pub message: String,
    pub pathname: String,
    pub result: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
