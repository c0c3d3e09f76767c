// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Peer verifiers that add subject-alt-name matching on top of the WebPKI
//! verifiers from `rustls`.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, Error, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
    server::danger::{ClientCertVerified, ClientCertVerifier},
};
use x509_parser::prelude::GeneralName;

use crate::config::StringMatcher;

/// Subject alternative names of `leaf` rendered as strings.
fn subject_alt_names(leaf: &CertificateDer<'_>) -> Result<Vec<String>, Error> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf)
        .map_err(|_| Error::InvalidCertificate(CertificateError::BadEncoding))?;
    let Some(san) = cert
        .subject_alternative_name()
        .map_err(|_| Error::InvalidCertificate(CertificateError::BadEncoding))?
    else {
        return Ok(Vec::new());
    };
    Ok(san
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_owned()),
            GeneralName::URI(uri) => Some((*uri).to_owned()),
            GeneralName::RFC822Name(email) => Some((*email).to_owned()),
            GeneralName::IPAddress(octets) => ip_address(octets).map(|ip| ip.to_string()),
            _ => None,
        })
        .collect())
}

fn ip_address(octets: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(octets) {
        return Some(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    <[u8; 16]>::try_from(octets)
        .ok()
        .map(|v6| IpAddr::V6(Ipv6Addr::from(v6)))
}

/// Accept `leaf` only if one of its subject alternative names matches one of
/// `matchers`. An empty matcher list accepts everything.
pub(crate) fn verify_subject_alt_names(
    leaf: &CertificateDer<'_>,
    matchers: &[StringMatcher],
) -> Result<(), Error> {
    if matchers.is_empty() {
        return Ok(());
    }
    let names = subject_alt_names(leaf)?;
    if names
        .iter()
        .any(|name| matchers.iter().any(|matcher| matcher.matches(name)))
    {
        Ok(())
    } else {
        Err(Error::InvalidCertificate(CertificateError::NotValidForName))
    }
}

/// Runs the wrapped verifier, then checks the server's subject alternative
/// names.
#[derive(Debug)]
pub(crate) struct SanMatchingServerVerifier {
    inner: Arc<dyn ServerCertVerifier>,
    matchers: Vec<StringMatcher>,
}

impl SanMatchingServerVerifier {
    pub(crate) fn new(inner: Arc<dyn ServerCertVerifier>, matchers: Vec<StringMatcher>) -> Self {
        Self { inner, matchers }
    }
}

impl ServerCertVerifier for SanMatchingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;
        verify_subject_alt_names(end_entity, &self.matchers)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Runs the wrapped verifier, then checks the client's subject alternative
/// names.
#[derive(Debug)]
pub(crate) struct SanMatchingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    matchers: Vec<StringMatcher>,
}

impl SanMatchingClientVerifier {
    pub(crate) fn new(inner: Arc<dyn ClientCertVerifier>, matchers: Vec<StringMatcher>) -> Self {
        Self { inner, matchers }
    }
}

impl ClientCertVerifier for SanMatchingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, Error> {
        let verified = self
            .inner
            .verify_client_cert(end_entity, intermediates, now)?;
        verify_subject_alt_names(end_entity, &self.matchers)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
