//! Shared fixtures for integration tests: a throwaway PKI and an mTLS client.

#![allow(dead_code)]

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rexecd::config::{DaemonConfig, TlsPaths};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;

/// CA, server and client certificates written to a temporary directory
pub struct TestPki {
    pub dir: TempDir,
    pub paths: TlsPaths,
    pub ca_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

fn leaf(
    name: &str,
    usage: ExtendedKeyUsagePurpose,
    ca: &Certificate,
    ca_key: &KeyPair,
) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![usage];
    let cert = params.signed_by(&key, ca, ca_key).unwrap();
    (cert.pem(), key.serialize_pem())
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "rexecd test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let (server_cert, server_key) =
            leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth, &ca, &ca_key);
        let (client_cert_pem, client_key_pem) =
            leaf("client", ExtendedKeyUsagePurpose::ClientAuth, &ca, &ca_key);

        let dir = TempDir::new().unwrap();
        let paths = TlsPaths {
            ca: dir.path().join("ca.pem"),
            cert: dir.path().join("cert.pem"),
            key: dir.path().join("key.pem"),
        };
        let ca_pem = ca.pem();
        std::fs::write(&paths.ca, &ca_pem).unwrap();
        std::fs::write(&paths.cert, server_cert).unwrap();
        std::fs::write(&paths.key, server_key).unwrap();

        Self {
            dir,
            paths,
            ca_pem,
            client_cert_pem,
            client_key_pem,
        }
    }

    /// Daemon settings on an ephemeral localhost port
    pub fn daemon_config(&self) -> DaemonConfig {
        let mut config = DaemonConfig::new(self.paths.clone());
        config.port = 0;
        config.shutdown_timeout = Duration::from_secs(5);
        config
    }

    fn builder(&self, addr: SocketAddr) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(reqwest::Certificate::from_pem(self.ca_pem.as_bytes()).unwrap())
            .resolve("localhost", addr)
            .timeout(Duration::from_secs(10))
    }

    /// Client presenting the test client certificate
    pub fn client(&self, addr: SocketAddr) -> reqwest::Client {
        let identity = format!("{}\n{}", self.client_cert_pem, self.client_key_pem);
        self.builder(addr)
            .identity(reqwest::Identity::from_pem(identity.as_bytes()).unwrap())
            .build()
            .unwrap()
    }

    /// Client that trusts the server but has no certificate of its own
    pub fn anonymous_client(&self, addr: SocketAddr) -> reqwest::Client {
        self.builder(addr).build().unwrap()
    }
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("https://localhost:{}{}", addr.port(), path)
}
