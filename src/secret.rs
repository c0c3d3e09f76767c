// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The interface to whatever delivers secrets: a discovery-service client, a
//! file watcher, or the in-process [`crate::InMemorySecretStore`].

use std::{collections::BTreeMap, sync::Arc};

use crate::config::{TlsCertificate, ValidationContext};

/// The payload of a secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// A certificate chain and private key to present to peers.
    TlsCertificate(TlsCertificate),
    /// Trust anchors and matchers used to verify peers.
    ValidationContext(ValidationContext),
}

impl Secret {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::TlsCertificate(_) => "TLS certificate",
            Self::ValidationContext(_) => "validation context",
        }
    }
}

/// One version of a named secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretValue {
    /// Increases every time the store publishes a new value under the same name.
    ///
    /// Consumers keep only values newer than the one they hold, so a store
    /// must never reuse or lower a revision for a name. A transport whose own
    /// version counter can restart should not pass it through; it should
    /// publish with [`crate::InMemorySecretStore::update`], which assigns the
    /// next revision itself.
    pub revision: u64,
    /// The secret itself.
    pub secret: Secret,
}

/// Latest known value per secret name.
pub type SecretSnapshot = BTreeMap<String, SecretValue>;

/// Identifies one subscription made with [`SecretStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

/// Receives secret updates from a [`SecretStore`].
pub trait SecretWatcher: Send + Sync {
    /// Called with every new value published under `name`.
    fn on_secret_update(&self, name: &str, value: &SecretValue);
}

/// A source of named secrets that can be watched for changes.
pub trait SecretStore: Send + Sync {
    /// Register `watcher` for updates to `name`.
    ///
    /// If a value for `name` already exists it is delivered to `watcher`
    /// before this returns. Implementations must not hold internal locks
    /// while calling the watcher.
    fn subscribe(&self, name: &str, watcher: Arc<dyn SecretWatcher>) -> WatchId;

    /// Stop delivering updates for the subscription `id`. Safe to call from
    /// inside [`SecretWatcher::on_secret_update`]; unknown ids are ignored.
    fn unsubscribe(&self, name: &str, id: WatchId);
}
