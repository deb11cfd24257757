//! Path string translation between Windows and POSIX spellings.
//!
//! Clients address files with whatever form is natural on their side:
//! `C:\tmp\foo`, `/c/tmp/foo`, or a UNC path such as `\\host\c$\tmp\foo`.
//! [`local_path`] turns any of these into the form the host understands.

/// True when `s` starts with an ASCII drive letter followed by a colon.
fn has_drive_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// True when `s` starts with a drive letter spelled as a directory, `/c/`.
fn has_drive_dir(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 3 && b[0] == b'/' && b[1].is_ascii_alphabetic() && b[2] == b'/'
}

/// Split `//host/share/rest` where `share` is a drive letter optionally
/// followed by `$` or `:`. Returns the drive letter and `/rest`.
fn split_unc(s: &str) -> Option<(char, &str)> {
    let tail = s.strip_prefix("//")?;
    let (host, tail) = tail.split_once('/')?;
    if host.is_empty() {
        return None;
    }
    let slash = tail.find('/')?;
    let (share, rest) = tail.split_at(slash);
    let mut chars = share.chars();
    let letter = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    match chars.as_str() {
        "" | "$" | ":" => Some((letter, rest)),
        _ => None,
    }
}

/// Convert any supported spelling to a Windows path.
pub fn windows_path(path: &str) -> String {
    let path = path.replace('\\', "/");

    let (drive, rest) = if has_drive_dir(&path) {
        (Some(path.as_bytes()[1] as char), &path[2..])
    } else if has_drive_prefix(&path) {
        (Some(path.as_bytes()[0] as char), &path[2..])
    } else if let Some((letter, rest)) = split_unc(&path) {
        (Some(letter), rest)
    } else {
        (None, path.as_str())
    };

    let mut out = String::with_capacity(path.len() + 1);
    if let Some(letter) = drive {
        out.push(letter.to_ascii_uppercase());
        out.push(':');
    }
    out.push_str(&rest.replace('/', "\\"));
    out
}

/// Convert any supported spelling to a POSIX path, with drive letters
/// mapped to a leading lowercase directory (`C:\x` becomes `/c/x`).
pub fn unix_path(path: &str) -> String {
    let mut out = if path.starts_with("\\\\") || path.starts_with("//") {
        windows_path(path)
    } else {
        path.to_string()
    };
    out = out.replace('\\', "/");

    if has_drive_prefix(&out) {
        let letter = out.as_bytes()[0].to_ascii_lowercase() as char;
        let rest = out.get(2..).unwrap_or("").trim_start_matches('/');
        out = format!("/{}/{}", letter, rest);
    }
    out
}

/// Convert a client-supplied path to the host's native spelling.
pub fn local_path(path: &str) -> String {
    if cfg!(windows) {
        windows_path(path)
    } else {
        unix_path(path)
    }
}
