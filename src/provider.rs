// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
#[cfg(feature = "stream")]
use tokio::sync::watch;
#[cfg(feature = "stream")]
use tokio_stream::wrappers::WatchStream;
#[cfg(feature = "tracing")]
use tracing::{debug, trace, warn};

use crate::{
    CredentialError,
    builder::{ContextBuilder, TlsContext},
    config::TlsContextConfig,
    descriptor::CredentialDescriptor,
    resolver::resolve,
    secret::{SecretSnapshot, SecretStore, SecretValue, SecretWatcher, WatchId},
};

/// Lifecycle of a [`ContextProvider`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderState {
    /// Not started yet, or stopped.
    Uninitialized,
    /// Started, waiting for the secrets needed for the first context.
    Subscribing,
    /// A context has been published.
    Ready,
    /// The first build attempt failed; no context has been published.
    Failed,
}

#[derive(Debug)]
struct Lifecycle {
    state: ProviderState,
    started: bool,
    stopped: bool,
    watches: Vec<(String, WatchId)>,
}

struct Inner {
    descriptor: CredentialDescriptor,
    builder: ContextBuilder,
    store: Arc<dyn SecretStore>,
    published: ArcSwapOption<TlsContext>,
    // Held for the whole resolve/build/publish pass; serializes rebuilds.
    secrets: Mutex<SecretSnapshot>,
    // Never held while calling into the store.
    lifecycle: Mutex<Lifecycle>,
    #[cfg(feature = "stream")]
    updates: watch::Sender<Option<Arc<TlsContext>>>,
}

/// Keeps an up-to-date [`TlsContext`] for one [`CredentialDescriptor`].
///
/// [`ContextProvider::start`] subscribes to every secret the descriptor
/// references. Each delivery re-runs resolution and the [`ContextBuilder`]
/// on the delivering thread, one pass at a time, and a successful pass
/// replaces the published context atomically. Readers of
/// [`ContextProvider::current_context`] never wait for a pass in progress.
///
/// A failed pass leaves the previously published context in place. Only if
/// nothing has been published yet does the provider report
/// [`ProviderState::Failed`], until a later delivery succeeds.
///
/// Clones share the same state. Dropping the last clone releases any
/// subscriptions [`ContextProvider::stop`] did not.
#[derive(Clone)]
pub struct ContextProvider {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ContextProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProvider")
            .field("descriptor", &self.inner.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContextProvider {
    /// A provider for `descriptor` watching `store`, using the default
    /// [`ContextBuilder`].
    #[must_use]
    pub fn new(descriptor: CredentialDescriptor, store: Arc<dyn SecretStore>) -> Self {
        Self::with_builder(descriptor, store, ContextBuilder::default())
    }

    /// A provider for `descriptor` watching `store`, building contexts with
    /// `builder`.
    #[must_use]
    pub fn with_builder(
        descriptor: CredentialDescriptor,
        store: Arc<dyn SecretStore>,
        builder: ContextBuilder,
    ) -> Self {
        #[cfg(feature = "stream")]
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                descriptor,
                builder,
                store,
                published: ArcSwapOption::empty(),
                secrets: Mutex::new(SecretSnapshot::new()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ProviderState::Uninitialized,
                    started: false,
                    stopped: false,
                    watches: Vec::new(),
                }),
                #[cfg(feature = "stream")]
                updates,
            }),
        }
    }

    /// Parse `config` and create a provider for it.
    ///
    /// # Errors
    ///
    /// [`CredentialError::MalformedConfig`] from [`CredentialDescriptor::parse`].
    pub fn from_config(
        config: &TlsContextConfig,
        store: Arc<dyn SecretStore>,
    ) -> Result<Self, CredentialError> {
        Ok(Self::new(CredentialDescriptor::parse(config)?, store))
    }

    /// The descriptor this provider serves.
    #[must_use]
    pub fn descriptor(&self) -> &CredentialDescriptor {
        &self.inner.descriptor
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProviderState {
        self.inner.lifecycle.lock().state
    }

    /// Subscribe to the descriptor's secrets, or build straight away if it
    /// references none. Calling it again, or after [`Self::stop`], does
    /// nothing.
    pub fn start(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.started || lifecycle.stopped {
                return;
            }
            lifecycle.started = true;
            lifecycle.state = ProviderState::Subscribing;
        }

        let names: Vec<String> = self
            .inner
            .descriptor
            .secret_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        if names.is_empty() {
            let secrets = self.inner.secrets.lock();
            self.inner.rebuild(&secrets);
            return;
        }

        let watcher: Arc<dyn SecretWatcher> =
            Arc::new(ProviderWatcher(Arc::downgrade(&self.inner)));
        for name in names {
            #[cfg(feature = "tracing")]
            debug!(secret = %name, "subscribing");

            let id = self.inner.store.subscribe(&name, Arc::clone(&watcher));
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.stopped {
                drop(lifecycle);
                self.inner.store.unsubscribe(&name, id);
            } else {
                lifecycle.watches.push((name, id));
            }
        }
    }

    /// Unsubscribe from every secret and release the published context.
    ///
    /// A pass already running is allowed to finish but its result is
    /// discarded. The provider cannot be started again.
    pub fn stop(&self) {
        let watches = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.stopped {
                return;
            }
            lifecycle.stopped = true;
            lifecycle.state = ProviderState::Uninitialized;
            self.inner.published.store(None);
            #[cfg(feature = "stream")]
            self.inner.updates.send_replace(None);
            std::mem::take(&mut lifecycle.watches)
        };

        for (name, id) in watches {
            self.inner.store.unsubscribe(&name, id);
        }
        self.inner.secrets.lock().clear();

        #[cfg(feature = "tracing")]
        debug!("TLS context provider stopped");
    }

    /// The most recently published context.
    ///
    /// # Errors
    ///
    /// [`CredentialError::ProviderNotReady`] if nothing has been published
    /// yet or the provider has been stopped.
    pub fn current_context(&self) -> Result<Arc<TlsContext>, CredentialError> {
        self.inner
            .published
            .load_full()
            .ok_or(CredentialError::ProviderNotReady)
    }

    /// A stream of every published context, starting with the current one.
    /// `None` is emitted while nothing is published, including after stop.
    #[cfg(feature = "stream")]
    #[must_use]
    pub fn updates(&self) -> WatchStream<Option<Arc<TlsContext>>> {
        WatchStream::new(self.inner.updates.subscribe())
    }

    /// Wait until a context is published and return it.
    ///
    /// This never times out; wrap it in `tokio::time::timeout` to bound the
    /// wait for the first secrets.
    #[cfg(feature = "stream")]
    pub async fn ready(&self) -> Arc<TlsContext> {
        let mut updates = self.inner.updates.subscribe();
        loop {
            if let Some(context) = updates.borrow_and_update().clone() {
                return context;
            }
            // The sender lives in `self.inner`, so this cannot fail while we wait.
            if updates.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Inner {
    fn on_secret_update(&self, name: &str, value: &SecretValue) {
        let mut secrets = self.secrets.lock();
        if self.lifecycle.lock().stopped {
            return;
        }
        if !self.descriptor.references(name) {
            #[cfg(feature = "tracing")]
            debug!(secret = %name, "ignoring secret this provider does not reference");
            return;
        }
        let current = secrets.get(name).map(|known| known.revision);
        if current.is_some_and(|current| value.revision <= current) {
            #[cfg(feature = "tracing")]
            debug!(
                secret = %name,
                revision = value.revision,
                ?current,
                "ignoring stale secret"
            );
            return;
        }
        secrets.insert(name.to_owned(), value.clone());
        self.rebuild(&secrets);
    }

    /// One resolve/build/publish pass. The caller holds the `secrets` lock.
    fn rebuild(&self, secrets: &SecretSnapshot) {
        let outcome =
            resolve(&self.descriptor, secrets).and_then(|material| self.builder.build(material));

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.stopped {
            return;
        }
        match outcome {
            Ok(context) => {
                let context = Arc::new(context);
                self.published.store(Some(Arc::clone(&context)));
                lifecycle.state = ProviderState::Ready;

                #[cfg(feature = "tracing")]
                debug!(
                    role = ?context.role(),
                    sources = ?context.material().sources,
                    "published TLS context"
                );

                #[cfg(feature = "stream")]
                self.updates.send_replace(Some(context));
            }
            Err(err) if err.is_transient() => {
                #[cfg(feature = "tracing")]
                trace!(%err, "TLS context not resolvable yet");
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                warn!(%err, state = ?lifecycle.state, "failed to rebuild TLS context");

                if lifecycle.state != ProviderState::Ready {
                    lifecycle.state = ProviderState::Failed;
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (name, id) in std::mem::take(&mut self.lifecycle.get_mut().watches) {
            self.store.unsubscribe(&name, id);
        }
    }
}

struct ProviderWatcher(Weak<Inner>);

impl SecretWatcher for ProviderWatcher {
    fn on_secret_update(&self, name: &str, value: &SecretValue) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_secret_update(name, value);
        }
    }
}
