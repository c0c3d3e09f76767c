// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::sync::Arc;

use rustls::{
    ClientConfig, ServerConfig,
    client::{WebPkiServerVerifier, danger::ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    server::{WebPkiClientVerifier, danger::ClientCertVerifier},
};
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::{
    CredentialError,
    descriptor::Role,
    resolver::{CertificateMaterial, ResolvedMaterial, ValidationMaterial},
    trust_store::{build_root_store, load_certificate_chain, load_private_key},
    verifier::{SanMatchingClientVerifier, SanMatchingServerVerifier},
};

/// The `rustls` configuration held by a [`TlsContext`].
#[derive(Clone, Debug)]
pub enum RoleConfig {
    /// For outgoing connections.
    Client(Arc<ClientConfig>),
    /// For incoming connections.
    Server(Arc<ServerConfig>),
}

/// A built, immutable TLS context and the material it was built from.
///
/// Connections keep using the context they started with; a newer context
/// published by [`crate::ContextProvider`] only affects new connections.
#[derive(Debug)]
pub struct TlsContext {
    config: RoleConfig,
    material: ResolvedMaterial,
}

impl TlsContext {
    /// Client or server role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.material.role
    }

    /// The underlying `rustls` configuration.
    #[must_use]
    pub const fn config(&self) -> &RoleConfig {
        &self.config
    }

    /// The [`ClientConfig`], for client-role contexts.
    #[must_use]
    pub fn client_config(&self) -> Option<Arc<ClientConfig>> {
        match &self.config {
            RoleConfig::Client(config) => Some(Arc::clone(config)),
            RoleConfig::Server(_) => None,
        }
    }

    /// The [`ServerConfig`], for server-role contexts.
    #[must_use]
    pub fn server_config(&self) -> Option<Arc<ServerConfig>> {
        match &self.config {
            RoleConfig::Server(config) => Some(Arc::clone(config)),
            RoleConfig::Client(_) => None,
        }
    }

    /// The configured SNI as a [`ServerName`], if it is a valid one.
    #[must_use]
    pub fn server_name(&self) -> Option<ServerName<'static>> {
        let sni = self.material.session.sni.as_deref()?;
        ServerName::try_from(sni.to_owned()).ok()
    }

    /// The material this context was built from.
    #[must_use]
    pub const fn material(&self) -> &ResolvedMaterial {
        &self.material
    }

    /// Revision of the secret `name` this context was built from.
    #[must_use]
    pub fn revision(&self, name: &str) -> Option<u64> {
        self.material
            .sources
            .iter()
            .find(|source| source.name == name)
            .map(|source| source.revision)
    }
}

/// Turns [`ResolvedMaterial`] into a [`TlsContext`].
///
/// The client variant always verifies the server and presents a certificate
/// only if one was resolved. The server variant always presents a
/// certificate and verifies clients only if validation material was
/// resolved.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    provider: Arc<CryptoProvider>,
}

impl Default for ContextBuilder {
    /// Uses the process-default [`CryptoProvider`], or aws-lc-rs if none is
    /// installed.
    fn default() -> Self {
        Self::with_crypto_provider(
            CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider())),
        )
    }
}

impl ContextBuilder {
    /// A builder that uses `provider` for all cryptography.
    #[must_use]
    pub const fn with_crypto_provider(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Build a context for `material.role`.
    ///
    /// # Errors
    ///
    /// * [`CredentialError::InvalidCertificateMaterial`] for a malformed
    ///   chain or key, or one `rustls` rejects.
    /// * [`CredentialError::UnsupportedKeyFormat`] for an encrypted key that
    ///   cannot be decrypted with the configured password, or a key type the
    ///   crypto provider cannot load.
    /// * [`CredentialError::TrustAnchorError`] for missing or unusable trust
    ///   anchors.
    /// * [`CredentialError::MissingServerCertificate`] for a server role
    ///   without a certificate.
    pub fn build(&self, material: ResolvedMaterial) -> Result<TlsContext, CredentialError> {
        let config = match material.role {
            Role::Client => RoleConfig::Client(Arc::new(self.build_client_config(&material)?)),
            Role::Server => RoleConfig::Server(Arc::new(self.build_server_config(&material)?)),
        };

        #[cfg(feature = "tracing")]
        debug!(role = ?material.role, sources = ?material.sources, "built TLS context");

        Ok(TlsContext { config, material })
    }

    fn build_client_config(
        &self,
        material: &ResolvedMaterial,
    ) -> Result<ClientConfig, CredentialError> {
        let validation = material.validation.as_ref().ok_or_else(|| {
            CredentialError::TrustAnchorError("client role requires validation material".into())
        })?;
        let roots = build_root_store(validation.trusted_ca.as_deref())?;
        let webpki = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&self.provider))
            .build()
            .map_err(|e| CredentialError::TrustAnchorError(e.to_string()))?;
        let verifier: Arc<dyn ServerCertVerifier> =
            if validation.match_subject_alt_names.is_empty() {
                webpki
            } else {
                Arc::new(SanMatchingServerVerifier::new(
                    webpki,
                    validation.match_subject_alt_names.clone(),
                ))
            };

        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| CredentialError::InvalidCertificateMaterial(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut config = match &material.certificate {
            Some(certificate) => {
                let (chain, key) = self.load_certified_key(certificate)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| CredentialError::InvalidCertificateMaterial(e.to_string()))?
            }
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = alpn(material);
        Ok(config)
    }

    fn build_server_config(
        &self,
        material: &ResolvedMaterial,
    ) -> Result<ServerConfig, CredentialError> {
        let certificate = material
            .certificate
            .as_ref()
            .ok_or(CredentialError::MissingServerCertificate)?;
        let (chain, key) = self.load_certified_key(certificate)?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| CredentialError::InvalidCertificateMaterial(e.to_string()))?;
        let builder = match &material.validation {
            Some(validation) => builder.with_client_cert_verifier(self.client_verifier(
                validation,
                material.session.require_client_certificate,
            )?),
            None => builder.with_no_client_auth(),
        };

        let mut config = builder
            .with_single_cert(chain, key)
            .map_err(|e| CredentialError::InvalidCertificateMaterial(e.to_string()))?;
        config.alpn_protocols = alpn(material);
        Ok(config)
    }

    fn client_verifier(
        &self,
        validation: &ValidationMaterial,
        mandatory: bool,
    ) -> Result<Arc<dyn ClientCertVerifier>, CredentialError> {
        let roots = build_root_store(validation.trusted_ca.as_deref())?;
        let mut builder =
            WebPkiClientVerifier::builder_with_provider(roots, Arc::clone(&self.provider));
        if !mandatory {
            builder = builder.allow_unauthenticated();
        }
        let webpki = builder
            .build()
            .map_err(|e| CredentialError::TrustAnchorError(e.to_string()))?;
        if validation.match_subject_alt_names.is_empty() {
            return Ok(webpki);
        }
        Ok(Arc::new(SanMatchingClientVerifier::new(
            webpki,
            validation.match_subject_alt_names.clone(),
        )))
    }

    fn load_certified_key(
        &self,
        certificate: &CertificateMaterial,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), CredentialError> {
        let chain = load_certificate_chain(&certificate.certificate_chain)?;
        let key = load_private_key(&certificate.private_key, certificate.password.as_deref())?;
        self.provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|e| CredentialError::UnsupportedKeyFormat(e.to_string()))?;
        Ok((chain, key))
    }
}

fn alpn(material: &ResolvedMaterial) -> Vec<Vec<u8>> {
    material
        .session
        .alpn_protocols
        .iter()
        .map(|protocol| protocol.as_bytes().to_vec())
        .collect()
}
