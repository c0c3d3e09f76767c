// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;

use crate::{
    CredentialError,
    config::{StringMatcher, TlsCertificate, ValidationContext},
    descriptor::{CertificateSource, CredentialDescriptor, Role, SessionParameters, ValidationShape},
    secret::{Secret, SecretSnapshot, SecretValue},
};

/// Certificate chain and key to present to the peer.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    /// PEM encoded chain, leaf first.
    pub certificate_chain: Vec<u8>,
    /// PEM encoded private key.
    pub private_key: Vec<u8>,
    /// Passphrase for `private_key`.
    pub password: Option<String>,
}

impl From<&TlsCertificate> for CertificateMaterial {
    fn from(certificate: &TlsCertificate) -> Self {
        Self {
            certificate_chain: certificate.certificate_chain.as_bytes().to_vec(),
            private_key: certificate.private_key.as_bytes().to_vec(),
            password: certificate.password.clone(),
        }
    }
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("certificate_chain_len", &self.certificate_chain.len())
            .field("private_key", &"<redacted>")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Trust anchors and subject-alt-name rules used to verify the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationMaterial {
    /// PEM encoded trust anchors.
    pub trusted_ca: Option<Vec<u8>>,
    /// Matchers applied to the peer's subject alternative names.
    pub match_subject_alt_names: Vec<StringMatcher>,
}

impl From<&ValidationContext> for ValidationMaterial {
    fn from(context: &ValidationContext) -> Self {
        Self {
            trusted_ca: context.trusted_ca.as_ref().map(|ca| ca.as_bytes().to_vec()),
            match_subject_alt_names: context.match_subject_alt_names.clone(),
        }
    }
}

impl ValidationMaterial {
    /// Overlay `dynamic` on top of `self`: its trust anchors replace ours when
    /// set, and its matchers are appended to ours.
    fn merged_with(mut self, dynamic: &ValidationContext) -> Self {
        if let Some(ca) = &dynamic.trusted_ca {
            self.trusted_ca = Some(ca.as_bytes().to_vec());
        }
        self.match_subject_alt_names
            .extend(dynamic.match_subject_alt_names.iter().cloned());
        self
    }
}

/// The secret revision a piece of material was taken from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRevision {
    /// Secret name.
    pub name: String,
    /// Revision of that secret.
    pub revision: u64,
}

/// Everything needed to build one [`crate::TlsContext`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMaterial {
    /// The role to build for.
    pub role: Role,
    /// Certificate to present, if any.
    pub certificate: Option<CertificateMaterial>,
    /// Peer verification material, if the peer is verified.
    pub validation: Option<ValidationMaterial>,
    /// SNI, ALPN and client-certificate settings.
    pub session: SessionParameters,
    /// Secrets this material was built from, certificate first.
    pub sources: Vec<SecretRevision>,
}

/// Combine `descriptor` with the latest secret values into one
/// [`ResolvedMaterial`].
///
/// A combined validation context is never resolved from its static default
/// alone; the referenced secret must have arrived.
///
/// # Errors
///
/// * [`CredentialError::IncompleteMaterial`] if a referenced secret is not in
///   `secrets` yet.
/// * [`CredentialError::ConflictingConfig`] if a secret of the wrong kind
///   was delivered, or the descriptor lacks what its role requires.
pub fn resolve(
    descriptor: &CredentialDescriptor,
    secrets: &SecretSnapshot,
) -> Result<ResolvedMaterial, CredentialError> {
    let mut sources = Vec::with_capacity(2);

    let certificate = match descriptor.certificate() {
        CertificateSource::None => None,
        CertificateSource::Static(certificate) => Some(CertificateMaterial::from(certificate)),
        CertificateSource::Dynamic(name) => {
            let value = lookup(secrets, name)?;
            let Secret::TlsCertificate(certificate) = &value.secret else {
                return Err(wrong_kind(name, &value.secret, "TLS certificate"));
            };
            sources.push(SecretRevision {
                name: name.clone(),
                revision: value.revision,
            });
            Some(CertificateMaterial::from(certificate))
        }
    };

    let validation = match descriptor.validation() {
        ValidationShape::CombinedDynamicAndStatic { secret, default } => {
            let dynamic = lookup_validation(secrets, secret, &mut sources)?;
            Some(ValidationMaterial::from(default).merged_with(dynamic))
        }
        ValidationShape::DynamicOnly { secret } => {
            let dynamic = lookup_validation(secrets, secret, &mut sources)?;
            Some(ValidationMaterial::from(dynamic))
        }
        ValidationShape::StaticOnly(context) => Some(ValidationMaterial::from(context)),
        ValidationShape::None => None,
    };

    let role = descriptor.role();
    if role.certificate_required() && certificate.is_none() {
        return Err(CredentialError::ConflictingConfig(
            "server descriptor has no certificate source".into(),
        ));
    }
    if role.validation_required() && validation.is_none() {
        return Err(CredentialError::ConflictingConfig(
            "client descriptor has no validation context".into(),
        ));
    }

    Ok(ResolvedMaterial {
        role,
        certificate,
        validation,
        session: descriptor.session().clone(),
        sources,
    })
}

fn lookup<'a>(secrets: &'a SecretSnapshot, name: &str) -> Result<&'a SecretValue, CredentialError> {
    secrets
        .get(name)
        .ok_or_else(|| CredentialError::IncompleteMaterial(name.to_owned()))
}

fn lookup_validation<'a>(
    secrets: &'a SecretSnapshot,
    name: &str,
    sources: &mut Vec<SecretRevision>,
) -> Result<&'a ValidationContext, CredentialError> {
    let value = lookup(secrets, name)?;
    let Secret::ValidationContext(context) = &value.secret else {
        return Err(wrong_kind(name, &value.secret, "validation context"));
    };
    sources.push(SecretRevision {
        name: name.to_owned(),
        revision: value.revision,
    });
    Ok(context)
}

fn wrong_kind(name: &str, found: &Secret, expected: &str) -> CredentialError {
    CredentialError::ConflictingConfig(format!(
        "secret `{name}` holds a {}, expected a {expected}",
        found.kind()
    ))
}
