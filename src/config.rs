// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Structured TLS configuration as produced by a bootstrap or control-plane
//! loader.
//!
//! Every type here derives [`serde::Deserialize`] so the same shapes can be
//! read from JSON, TOML or YAML. None of them is interpreted here; see
//! [`crate::CredentialDescriptor::parse`] for the precedence rules.

use serde::Deserialize;

/// Top-level TLS configuration for one listener or one upstream cluster.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TlsContextConfig {
    /// Configuration used when connecting to a server.
    Client(UpstreamTlsConfig),
    /// Configuration used when accepting connections.
    Server(DownstreamTlsConfig),
}

/// Client-side TLS configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamTlsConfig {
    /// Material and validation settings shared with the server role.
    #[serde(default)]
    pub common_tls_context: CommonTlsConfig,
    /// Server name to send in the TLS `server_name` extension.
    #[serde(default)]
    pub sni: Option<String>,
}

/// Server-side TLS configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownstreamTlsConfig {
    /// Material and validation settings shared with the client role.
    #[serde(default)]
    pub common_tls_context: CommonTlsConfig,
    /// Reject clients that do not present a certificate. Only meaningful
    /// when a validation context is configured.
    #[serde(default)]
    pub require_client_certificate: bool,
}

/// Settings common to both roles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonTlsConfig {
    /// Certificates supplied inline. Only the first one is used.
    #[serde(default)]
    pub tls_certificates: Vec<TlsCertificate>,
    /// Certificates supplied by the secret store. Only the first one is
    /// used, and only if there is no inline certificate.
    #[serde(default)]
    pub tls_certificate_secret_refs: Vec<SecretRef>,
    /// A secret-supplied validation context merged over a static default.
    #[serde(default)]
    pub combined_validation_context: Option<CombinedValidationContext>,
    /// A validation context supplied entirely by the secret store.
    #[serde(default)]
    pub validation_context_secret_ref: Option<SecretRef>,
    /// A validation context supplied inline.
    #[serde(default)]
    pub validation_context: Option<ValidationContext>,
    /// ALPN protocol names, in preference order.
    #[serde(default)]
    pub alpn_protocols: Vec<String>,
}

/// Names a secret held by a [`crate::SecretStore`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    /// Name the secret is published under.
    pub name: String,
}

impl SecretRef {
    /// Reference the secret called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A validation context built from a secret-store reference and a static
/// default. Fields from the secret take precedence when both set them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CombinedValidationContext {
    /// Static part of the combined context.
    #[serde(default)]
    pub default_validation_context: Option<ValidationContext>,
    /// Dynamic part of the combined context.
    #[serde(default)]
    pub validation_context_secret_ref: Option<SecretRef>,
}

/// Inline bytes, or an inline string, holding PEM data.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Raw bytes.
    InlineBytes(Vec<u8>),
    /// UTF-8 text.
    InlineString(String),
}

impl DataSource {
    /// The data as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::InlineBytes(bytes) => bytes,
            Self::InlineString(text) => text.as_bytes(),
        }
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("len", &self.as_bytes().len())
            .finish_non_exhaustive()
    }
}

impl From<&str> for DataSource {
    fn from(text: &str) -> Self {
        Self::InlineString(text.to_owned())
    }
}

impl From<String> for DataSource {
    fn from(text: String) -> Self {
        Self::InlineString(text)
    }
}

impl From<Vec<u8>> for DataSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::InlineBytes(bytes)
    }
}

/// A certificate chain and its private key, both PEM encoded.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsCertificate {
    /// Leaf certificate first, followed by any intermediates.
    pub certificate_chain: DataSource,
    /// Private key for the leaf certificate.
    pub private_key: DataSource,
    /// Passphrase protecting `private_key`.
    #[serde(default)]
    pub password: Option<String>,
}

impl TlsCertificate {
    /// A certificate with an unencrypted private key.
    #[must_use]
    pub fn new(
        certificate_chain: impl Into<DataSource>,
        private_key: impl Into<DataSource>,
    ) -> Self {
        Self {
            certificate_chain: certificate_chain.into(),
            private_key: private_key.into(),
            password: None,
        }
    }
}

impl std::fmt::Debug for TlsCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCertificate")
            .field("certificate_chain", &self.certificate_chain)
            .field("private_key", &"<redacted>")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Trust anchors and peer-identity rules used to verify the other side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationContext {
    /// PEM encoded trust anchor certificates.
    #[serde(default)]
    pub trusted_ca: Option<DataSource>,
    /// If non-empty, the peer's leaf certificate must carry at least one
    /// subject alternative name matched by one of these.
    #[serde(default)]
    pub match_subject_alt_names: Vec<StringMatcher>,
}

impl ValidationContext {
    /// A validation context trusting the anchors in `trusted_ca`.
    #[must_use]
    pub fn with_trusted_ca(trusted_ca: impl Into<DataSource>) -> Self {
        Self {
            trusted_ca: Some(trusted_ca.into()),
            match_subject_alt_names: Vec::new(),
        }
    }
}

/// Matches a subject alternative name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StringMatcher {
    /// How to compare.
    #[serde(flatten)]
    pub pattern: MatchPattern,
    /// Compare ASCII case-insensitively.
    #[serde(default)]
    pub ignore_case: bool,
}

/// The comparison a [`StringMatcher`] performs.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPattern {
    /// Whole-string equality.
    Exact(String),
    /// The name starts with this.
    Prefix(String),
    /// The name ends with this.
    Suffix(String),
    /// The name contains this.
    Contains(String),
}

impl StringMatcher {
    /// A case-sensitive exact matcher.
    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            pattern: MatchPattern::Exact(value.into()),
            ignore_case: false,
        }
    }

    /// Test `candidate` against this matcher.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        if self.ignore_case {
            let candidate = candidate.to_ascii_lowercase();
            let pattern = self.pattern.value().to_ascii_lowercase();
            self.pattern.compare(&candidate, &pattern)
        } else {
            self.pattern.compare(candidate, self.pattern.value())
        }
    }
}

impl MatchPattern {
    fn value(&self) -> &str {
        match self {
            Self::Exact(v) | Self::Prefix(v) | Self::Suffix(v) | Self::Contains(v) => v,
        }
    }

    fn compare(&self, candidate: &str, pattern: &str) -> bool {
        match self {
            Self::Exact(_) => candidate == pattern,
            Self::Prefix(_) => candidate.starts_with(pattern),
            Self::Suffix(_) => candidate.ends_with(pattern),
            Self::Contains(_) => candidate.contains(pattern),
        }
    }
}
