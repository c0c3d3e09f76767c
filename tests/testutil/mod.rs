// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

#![allow(dead_code)]

use std::sync::Arc;

use pkcs8::{PrivateKeyInfo, der::pem::LineEnding, pkcs5::pbes2};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use rustls::{ClientConfig, ServerConfig, pki_types::ServerName};
use rustls_sds::config::{TlsCertificate, ValidationContext};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A CA and its key, able to sign leaf certificates.
pub struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Authority {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn validation_context(&self) -> ValidationContext {
        ValidationContext::with_trusted_ca(self.pem())
    }

    /// A leaf certificate for `names`, signed by this authority.
    pub fn issue(&self, names: &[&str]) -> TlsCertificate {
        let (cert, key) = self.leaf(names);
        TlsCertificate::new(cert.pem(), key.serialize_pem())
    }

    /// Like [`Self::issue`], with the private key in an encrypted PKCS#8
    /// block protected by `password`.
    pub fn issue_encrypted(&self, names: &[&str], password: &str) -> TlsCertificate {
        let (cert, key) = self.leaf(names);
        let der = key.serialize_der();
        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, &[3; 16], &[5; 16]).unwrap();
        let encrypted = PrivateKeyInfo::try_from(der.as_slice())
            .unwrap()
            .encrypt_with_params(params, password)
            .unwrap()
            .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
            .unwrap();
        TlsCertificate {
            password: Some(password.to_owned()),
            ..TlsCertificate::new(cert.pem(), encrypted.to_string())
        }
    }

    fn leaf(&self, names: &[&str]) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let params =
            CertificateParams::new(names.iter().map(|n| (*n).to_owned()).collect::<Vec<_>>())
                .unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert, key)
    }
}

/// Run one request/response exchange over an in-memory duplex. Returns the
/// client's outcome.
pub async fn handshake(
    client: Arc<ClientConfig>,
    server: Arc<ServerConfig>,
    server_name: &str,
) -> Result<String, std::io::Error> {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server_name = ServerName::try_from(server_name.to_owned()).unwrap();

    let server_side = async move {
        let mut stream = tokio_rustls::TlsAcceptor::from(server)
            .accept(server_io)
            .await?;
        let mut buf = [0_u8; 4];
        stream.read_exact(&mut buf).await?;
        stream.write_all(b"PONG").await?;
        stream.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };
    let client_side = async move {
        let mut stream = tokio_rustls::TlsConnector::from(client)
            .connect(server_name, client_io)
            .await?;
        stream.write_all(b"PING").await?;
        stream.flush().await?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    };

    let (_, response) = tokio::join!(server_side, client_side);
    response
}
