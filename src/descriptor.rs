// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use crate::{
    CredentialError,
    config::{CommonTlsConfig, SecretRef, TlsCertificate, TlsContextConfig, ValidationContext},
};

/// Which side of the handshake a descriptor configures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Verifies the server; presenting a certificate is optional.
    Client,
    /// Presents a certificate; verifying clients is optional.
    Server,
}

impl Role {
    /// Whether a certificate must be configured for this role.
    #[must_use]
    pub const fn certificate_required(self) -> bool {
        matches!(self, Self::Server)
    }

    /// Whether a validation context must be configured for this role.
    #[must_use]
    pub const fn validation_required(self) -> bool {
        matches!(self, Self::Client)
    }
}

/// Where the certificate presented to the peer comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateSource {
    /// No certificate is presented.
    None,
    /// The certificate is inline in configuration.
    Static(TlsCertificate),
    /// The certificate is supplied by the named secret.
    Dynamic(String),
}

/// Where the validation context used to verify the peer comes from.
///
/// Exactly one shape is chosen when the descriptor is parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationShape {
    /// A secret merged over a static default.
    CombinedDynamicAndStatic {
        /// Name of the secret supplying the dynamic part.
        secret: String,
        /// The static default.
        default: ValidationContext,
    },
    /// Entirely supplied by the named secret.
    DynamicOnly {
        /// Name of the secret.
        secret: String,
    },
    /// Entirely inline in configuration.
    StaticOnly(ValidationContext),
    /// The peer is not verified.
    None,
}

/// Parameters that are carried through to the built context untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionParameters {
    /// SNI sent by clients.
    pub sni: Option<String>,
    /// ALPN protocols, in preference order.
    pub alpn_protocols: Vec<String>,
    /// Servers reject clients without a certificate.
    pub require_client_certificate: bool,
}

/// Immutable view of a [`TlsContextConfig`]: which pieces are static and
/// which are referenced from the secret store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialDescriptor {
    role: Role,
    certificate: CertificateSource,
    validation: ValidationShape,
    session: SessionParameters,
}

impl CredentialDescriptor {
    /// Decide the certificate source and validation shape for `config`.
    ///
    /// Validation precedence is combined context, then secret reference,
    /// then inline context; the first one present wins and the others are
    /// ignored. Only the first inline certificate, or failing that the first
    /// certificate secret reference, is honored.
    ///
    /// # Errors
    ///
    /// [`CredentialError::MalformedConfig`] if the role's required pieces are
    /// absent, a secret name is empty, or the certificate and validation
    /// context name the same secret.
    pub fn parse(config: &TlsContextConfig) -> Result<Self, CredentialError> {
        let (role, common, session) = match config {
            TlsContextConfig::Client(upstream) => (
                Role::Client,
                &upstream.common_tls_context,
                SessionParameters {
                    sni: upstream.sni.clone(),
                    alpn_protocols: upstream.common_tls_context.alpn_protocols.clone(),
                    require_client_certificate: false,
                },
            ),
            TlsContextConfig::Server(downstream) => (
                Role::Server,
                &downstream.common_tls_context,
                SessionParameters {
                    sni: None,
                    alpn_protocols: downstream.common_tls_context.alpn_protocols.clone(),
                    require_client_certificate: downstream.require_client_certificate,
                },
            ),
        };

        let certificate = certificate_source(common)?;
        let validation = validation_shape(common)?;

        if role.certificate_required() && certificate == CertificateSource::None {
            return Err(CredentialError::MalformedConfig(
                "server role requires a TLS certificate or certificate secret reference".into(),
            ));
        }
        if role.validation_required() && validation == ValidationShape::None {
            return Err(CredentialError::MalformedConfig(
                "client role requires a validation context".into(),
            ));
        }
        if let (CertificateSource::Dynamic(cert), Some(validation)) =
            (&certificate, validation.secret_name())
        {
            if cert == validation {
                return Err(CredentialError::MalformedConfig(format!(
                    "secret `{cert}` is referenced as both certificate and validation context"
                )));
            }
        }

        Ok(Self {
            role,
            certificate,
            validation,
            session,
        })
    }

    /// The role this descriptor configures.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The chosen certificate source.
    #[must_use]
    pub const fn certificate(&self) -> &CertificateSource {
        &self.certificate
    }

    /// The chosen validation shape.
    #[must_use]
    pub const fn validation(&self) -> &ValidationShape {
        &self.validation
    }

    /// Parameters passed through to the built context.
    #[must_use]
    pub const fn session(&self) -> &SessionParameters {
        &self.session
    }

    /// Names of the secrets this descriptor depends on: certificate first,
    /// then validation context.
    #[must_use]
    pub fn secret_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(2);
        if let CertificateSource::Dynamic(name) = &self.certificate {
            names.push(name.as_str());
        }
        if let Some(name) = self.validation.secret_name() {
            names.push(name);
        }
        names
    }

    /// Whether `name` is one of [`Self::secret_names`].
    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        self.secret_names().contains(&name)
    }
}

impl ValidationShape {
    /// Name of the secret this shape depends on, if any.
    #[must_use]
    pub fn secret_name(&self) -> Option<&str> {
        match self {
            Self::CombinedDynamicAndStatic { secret, .. } | Self::DynamicOnly { secret } => {
                Some(secret)
            }
            Self::StaticOnly(_) | Self::None => None,
        }
    }
}

fn secret_name(secret_ref: &SecretRef) -> Result<String, CredentialError> {
    if secret_ref.name.is_empty() {
        return Err(CredentialError::MalformedConfig(
            "secret reference with an empty name".into(),
        ));
    }
    Ok(secret_ref.name.clone())
}

fn certificate_source(common: &CommonTlsConfig) -> Result<CertificateSource, CredentialError> {
    if let Some(certificate) = common.tls_certificates.first() {
        return Ok(CertificateSource::Static(certificate.clone()));
    }
    match common.tls_certificate_secret_refs.first() {
        Some(secret_ref) => Ok(CertificateSource::Dynamic(secret_name(secret_ref)?)),
        None => Ok(CertificateSource::None),
    }
}

fn validation_shape(common: &CommonTlsConfig) -> Result<ValidationShape, CredentialError> {
    if let Some(combined) = &common.combined_validation_context {
        return match (
            &combined.validation_context_secret_ref,
            &combined.default_validation_context,
        ) {
            (Some(secret_ref), Some(default)) => Ok(ValidationShape::CombinedDynamicAndStatic {
                secret: secret_name(secret_ref)?,
                default: default.clone(),
            }),
            (Some(secret_ref), None) => Ok(ValidationShape::DynamicOnly {
                secret: secret_name(secret_ref)?,
            }),
            (None, Some(default)) => Ok(ValidationShape::StaticOnly(default.clone())),
            // Still shadows the other validation fields.
            (None, None) => Ok(ValidationShape::None),
        };
    }
    if let Some(secret_ref) = &common.validation_context_secret_ref {
        return Ok(ValidationShape::DynamicOnly {
            secret: secret_name(secret_ref)?,
        });
    }
    Ok(common
        .validation_context
        .as_ref()
        .map_or(ValidationShape::None, |static_context| {
            ValidationShape::StaticOnly(static_context.clone())
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CombinedValidationContext, DownstreamTlsConfig, StringMatcher, UpstreamTlsConfig,
    };

    fn client(common: CommonTlsConfig) -> TlsContextConfig {
        TlsContextConfig::Client(UpstreamTlsConfig {
            common_tls_context: common,
            sni: Some("backend.internal".into()),
        })
    }

    fn server(common: CommonTlsConfig) -> TlsContextConfig {
        TlsContextConfig::Server(DownstreamTlsConfig {
            common_tls_context: common,
            require_client_certificate: true,
        })
    }

    fn static_context(tag: &str) -> ValidationContext {
        ValidationContext {
            trusted_ca: Some(tag.into()),
            match_subject_alt_names: vec![StringMatcher::exact(tag)],
        }
    }

    #[test]
    fn combined_context_wins_over_everything_else() {
        let descriptor = CredentialDescriptor::parse(&client(CommonTlsConfig {
            combined_validation_context: Some(CombinedValidationContext {
                default_validation_context: Some(static_context("default")),
                validation_context_secret_ref: Some(SecretRef::new("roots")),
            }),
            validation_context_secret_ref: Some(SecretRef::new("ignored")),
            validation_context: Some(static_context("ignored")),
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(
            descriptor.validation(),
            &ValidationShape::CombinedDynamicAndStatic {
                secret: "roots".into(),
                default: static_context("default"),
            }
        );
        assert_eq!(descriptor.secret_names(), vec!["roots"]);
        assert_eq!(descriptor.session().sni.as_deref(), Some("backend.internal"));
    }

    #[test]
    fn secret_reference_wins_over_static_context() {
        let descriptor = CredentialDescriptor::parse(&client(CommonTlsConfig {
            validation_context_secret_ref: Some(SecretRef::new("roots")),
            validation_context: Some(static_context("ignored")),
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(
            descriptor.validation(),
            &ValidationShape::DynamicOnly {
                secret: "roots".into()
            }
        );
    }

    #[test]
    fn partial_combined_context_is_still_chosen_first() {
        let only_default = CredentialDescriptor::parse(&client(CommonTlsConfig {
            combined_validation_context: Some(CombinedValidationContext {
                default_validation_context: Some(static_context("default")),
                validation_context_secret_ref: None,
            }),
            validation_context_secret_ref: Some(SecretRef::new("ignored")),
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(
            only_default.validation(),
            &ValidationShape::StaticOnly(static_context("default"))
        );
        assert!(only_default.secret_names().is_empty());

        let empty = CredentialDescriptor::parse(&client(CommonTlsConfig {
            combined_validation_context: Some(CombinedValidationContext::default()),
            validation_context: Some(static_context("ignored")),
            ..CommonTlsConfig::default()
        }));
        assert!(matches!(empty, Err(CredentialError::MalformedConfig(_))));
    }

    #[test]
    fn empty_combined_context_disables_client_verification() {
        let descriptor = CredentialDescriptor::parse(&server(CommonTlsConfig {
            tls_certificate_secret_refs: vec![SecretRef::new("cert")],
            combined_validation_context: Some(CombinedValidationContext::default()),
            validation_context_secret_ref: Some(SecretRef::new("ignored")),
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(descriptor.validation(), &ValidationShape::None);
        assert_eq!(descriptor.secret_names(), vec!["cert"]);
    }

    #[test]
    fn first_static_certificate_wins() {
        let first = TlsCertificate::new("chain-1", "key-1");
        let descriptor = CredentialDescriptor::parse(&server(CommonTlsConfig {
            tls_certificates: vec![first.clone(), TlsCertificate::new("chain-2", "key-2")],
            tls_certificate_secret_refs: vec![SecretRef::new("cert")],
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(descriptor.certificate(), &CertificateSource::Static(first));
        assert!(descriptor.secret_names().is_empty());
        assert!(descriptor.session().require_client_certificate);
    }

    #[test]
    fn first_certificate_secret_reference_wins() {
        let descriptor = CredentialDescriptor::parse(&server(CommonTlsConfig {
            tls_certificate_secret_refs: vec![SecretRef::new("cert-a"), SecretRef::new("cert-b")],
            validation_context_secret_ref: Some(SecretRef::new("roots")),
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(
            descriptor.certificate(),
            &CertificateSource::Dynamic("cert-a".into())
        );
        assert_eq!(descriptor.secret_names(), vec!["cert-a", "roots"]);
        assert!(descriptor.references("roots"));
        assert!(!descriptor.references("cert-b"));
    }

    #[test]
    fn role_required_fields() {
        let server_without_cert = CredentialDescriptor::parse(&server(CommonTlsConfig {
            validation_context: Some(static_context("ca")),
            ..CommonTlsConfig::default()
        }));
        assert!(matches!(
            server_without_cert,
            Err(CredentialError::MalformedConfig(_))
        ));

        let client_without_validation = CredentialDescriptor::parse(&client(CommonTlsConfig {
            tls_certificate_secret_refs: vec![SecretRef::new("cert")],
            ..CommonTlsConfig::default()
        }));
        assert!(matches!(
            client_without_validation,
            Err(CredentialError::MalformedConfig(_))
        ));

        let server_without_validation = CredentialDescriptor::parse(&server(CommonTlsConfig {
            tls_certificate_secret_refs: vec![SecretRef::new("cert")],
            ..CommonTlsConfig::default()
        }))
        .unwrap();
        assert_eq!(server_without_validation.validation(), &ValidationShape::None);
    }

    #[test]
    fn rejects_bad_secret_names() {
        let empty = CredentialDescriptor::parse(&client(CommonTlsConfig {
            validation_context_secret_ref: Some(SecretRef::new("")),
            ..CommonTlsConfig::default()
        }));
        assert!(matches!(empty, Err(CredentialError::MalformedConfig(_))));

        let shared = CredentialDescriptor::parse(&client(CommonTlsConfig {
            tls_certificate_secret_refs: vec![SecretRef::new("same")],
            validation_context_secret_ref: Some(SecretRef::new("same")),
            ..CommonTlsConfig::default()
        }));
        assert!(matches!(shared, Err(CredentialError::MalformedConfig(_))));
    }
}
