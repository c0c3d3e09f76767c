// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Rotating [`rustls`] client and server configs whose certificates and trust
//! anchors come from inline configuration or from a secret discovery service.
//!
//! A [`TlsContextConfig`] is parsed once into a [`CredentialDescriptor`]. A
//! [`ContextProvider`] subscribes to the secrets the descriptor references
//! through a [`SecretStore`], resolves them against the static parts of the
//! configuration, and publishes a fresh [`TlsContext`] every time one of them
//! changes. Connections already using an older context are unaffected.

#![deny(rust_2018_idioms)]
#![forbid(missing_docs, unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::nursery,
    clippy::dbg_macro,
    clippy::todo
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod builder;
pub mod config;
mod descriptor;
mod error;
mod memory_store;
mod provider;
mod resolver;
mod secret;
mod trust_store;
mod verifier;

pub use builder::{ContextBuilder, RoleConfig, TlsContext};
pub use config::TlsContextConfig;
pub use descriptor::{
    CertificateSource, CredentialDescriptor, Role, SessionParameters, ValidationShape,
};
pub use error::CredentialError;
pub use memory_store::InMemorySecretStore;
pub use provider::{ContextProvider, ProviderState};
pub use resolver::{
    CertificateMaterial, ResolvedMaterial, SecretRevision, ValidationMaterial, resolve,
};
pub use secret::{Secret, SecretSnapshot, SecretStore, SecretValue, SecretWatcher, WatchId};
