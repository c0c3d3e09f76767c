// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use thiserror::Error;

/// Errors raised while parsing TLS configuration, resolving credential
/// material, or building and publishing TLS contexts.
///
/// Only [`CredentialError::MalformedConfig`] is raised synchronously to the
/// code that constructs a provider. Everything else is produced by a single
/// resolution pass and is contained by [`crate::ContextProvider`], which keeps
/// the last good context published.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// The configuration is missing fields its role requires, or names a
    /// secret in an unusable way.
    #[error("malformed TLS configuration: {0}")]
    MalformedConfig(String),

    /// A dynamic secret required by the descriptor has not been delivered yet.
    #[error("secret `{0}` has not been delivered yet")]
    IncompleteMaterial(String),

    /// The descriptor (or a secret delivered for one of its references)
    /// contradicts the rules the descriptor was built under.
    #[error("conflicting TLS configuration: {0}")]
    ConflictingConfig(String),

    /// The certificate chain or private key could not be parsed, or `rustls`
    /// rejected them.
    #[error("invalid certificate material: {0}")]
    InvalidCertificateMaterial(String),

    /// The private key cannot be decrypted, or is of a type the crypto
    /// provider cannot load.
    #[error("unsupported private key: {0}")]
    UnsupportedKeyFormat(String),

    /// The trust anchors are missing, malformed, or unusable for verification.
    #[error("trust anchor error: {0}")]
    TrustAnchorError(String),

    /// A server context was requested without a certificate to present.
    #[error("server role requires a certificate but none was resolved")]
    MissingServerCertificate,

    /// No context has been published yet, or the provider was stopped.
    #[error("TLS context provider is not ready")]
    ProviderNotReady,
}

impl CredentialError {
    /// Whether the error clears up by itself once more secrets arrive.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::IncompleteMaterial(_))
    }
}
