// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::secret::{Secret, SecretStore, SecretValue, SecretWatcher, WatchId};

#[derive(Default)]
struct Inner {
    secrets: HashMap<String, SecretValue>,
    watchers: HashMap<String, Vec<(WatchId, Arc<dyn SecretWatcher>)>>,
    next_watch: u64,
}

impl Inner {
    fn store(&mut self, name: &str, value: SecretValue) -> Vec<Arc<dyn SecretWatcher>> {
        self.secrets.insert(name.to_owned(), value);
        self.watchers
            .get(name)
            .map(|watchers| watchers.iter().map(|(_, w)| Arc::clone(w)).collect())
            .unwrap_or_default()
    }
}

fn notify(name: &str, value: &SecretValue, watchers: Vec<Arc<dyn SecretWatcher>>) {
    #[cfg(feature = "tracing")]
    debug!(secret = %name, revision = value.revision, watchers = watchers.len());

    for watcher in watchers {
        watcher.on_secret_update(name, value);
    }
}

/// A [`SecretStore`] that holds secrets in memory and pushes every update to
/// its watchers.
///
/// Discovery transports feed it with [`InMemorySecretStore::update`]; it is
/// also handy for wiring fixed secrets in tests. Watchers are called on the
/// thread that publishes the update, after the internal lock is released.
#[derive(Default)]
pub struct InMemorySecretStore {
    inner: Mutex<Inner>,
}

impl InMemorySecretStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `secret` under `name` with the next revision for that name and
    /// notify its watchers. Returns the revision assigned.
    ///
    /// Returns `None`, leaving the current value in place, if the name's
    /// revision is already `u64::MAX`.
    #[allow(clippy::must_use_candidate)]
    pub fn update(&self, name: impl Into<String>, secret: Secret) -> Option<u64> {
        let name = name.into();
        let (value, watchers) = {
            let mut inner = self.inner.lock();
            let revision = match inner.secrets.get(&name) {
                Some(current) => current.revision.checked_add(1),
                None => Some(1),
            };
            let Some(revision) = revision else {
                #[cfg(feature = "tracing")]
                warn!(secret = %name, "revision exhausted, update refused");
                return None;
            };
            let value = SecretValue { revision, secret };
            let watchers = inner.store(&name, value.clone());
            (value, watchers)
        };
        notify(&name, &value, watchers);
        Some(value.revision)
    }

    /// Publish `value` under `name` exactly as given and notify its watchers.
    pub fn update_with_revision(&self, name: impl Into<String>, value: SecretValue) {
        let name = name.into();
        let watchers = self.inner.lock().store(&name, value.clone());
        notify(&name, &value, watchers);
    }

    /// The latest value published under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SecretValue> {
        self.inner.lock().secrets.get(name).cloned()
    }

    /// Number of live subscriptions to `name`.
    #[must_use]
    pub fn watcher_count(&self, name: &str) -> usize {
        self.inner.lock().watchers.get(name).map_or(0, Vec::len)
    }

    /// Number of live subscriptions across all names.
    #[must_use]
    pub fn total_watchers(&self) -> usize {
        self.inner.lock().watchers.values().map(Vec::len).sum()
    }
}

impl SecretStore for InMemorySecretStore {
    fn subscribe(&self, name: &str, watcher: Arc<dyn SecretWatcher>) -> WatchId {
        let (id, current) = {
            let mut inner = self.inner.lock();
            inner.next_watch += 1;
            let id = WatchId(inner.next_watch);
            inner
                .watchers
                .entry(name.to_owned())
                .or_default()
                .push((id, Arc::clone(&watcher)));
            (id, inner.secrets.get(name).cloned())
        };
        if let Some(value) = current {
            watcher.on_secret_update(name, &value);
        }
        id
    }

    fn unsubscribe(&self, name: &str, id: WatchId) {
        let mut inner = self.inner.lock();
        if let Some(watchers) = inner.watchers.get_mut(name) {
            watchers.retain(|(watch, _)| *watch != id);
            if watchers.is_empty() {
                inner.watchers.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::config::ValidationContext;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, u64)>>);

    impl SecretWatcher for Recorder {
        fn on_secret_update(&self, name: &str, value: &SecretValue) {
            self.0.lock().push((name.to_owned(), value.revision));
        }
    }

    fn roots(tag: &str) -> Secret {
        Secret::ValidationContext(ValidationContext::with_trusted_ca(tag))
    }

    #[test]
    fn subscribe_delivers_current_value_immediately() {
        let store = InMemorySecretStore::new();
        assert_eq!(store.update("roots", roots("a")), Some(1));
        assert_eq!(store.update("roots", roots("b")), Some(2));

        let recorder = Arc::new(Recorder::default());
        store.subscribe("roots", recorder.clone());
        assert_eq!(*recorder.0.lock(), vec![("roots".to_owned(), 2)]);

        store.update("other", roots("c"));
        store.update("roots", roots("d"));
        assert_eq!(
            *recorder.0.lock(),
            vec![("roots".to_owned(), 2), ("roots".to_owned(), 3)]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = InMemorySecretStore::new();
        let recorder = Arc::new(Recorder::default());
        let id = store.subscribe("roots", recorder.clone());
        assert_eq!(store.watcher_count("roots"), 1);
        store.unsubscribe("roots", id);
        assert_eq!(store.total_watchers(), 0);
        store.update("roots", roots("a"));
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn update_refuses_exhausted_revision() {
        let store = InMemorySecretStore::new();
        let last = SecretValue {
            revision: u64::MAX,
            secret: roots("a"),
        };
        store.update_with_revision("roots", last.clone());

        let recorder = Arc::new(Recorder::default());
        store.subscribe("roots", recorder.clone());
        assert_eq!(store.update("roots", roots("b")), None);
        assert_eq!(store.get("roots"), Some(last));
        assert_eq!(*recorder.0.lock(), vec![("roots".to_owned(), u64::MAX)]);
    }

    struct Unsubscriber {
        store: Weak<InMemorySecretStore>,
        id: Mutex<Option<WatchId>>,
        calls: Mutex<usize>,
    }

    impl SecretWatcher for Unsubscriber {
        fn on_secret_update(&self, name: &str, _: &SecretValue) {
            *self.calls.lock() += 1;
            if let (Some(store), Some(id)) = (self.store.upgrade(), *self.id.lock()) {
                store.unsubscribe(name, id);
            }
        }
    }

    #[test]
    fn unsubscribe_from_inside_callback() {
        let store = Arc::new(InMemorySecretStore::new());
        let watcher = Arc::new(Unsubscriber {
            store: Arc::downgrade(&store),
            id: Mutex::new(None),
            calls: Mutex::new(0),
        });
        let id = store.subscribe("roots", watcher.clone());
        *watcher.id.lock() = Some(id);

        store.update("roots", roots("a"));
        store.update("roots", roots("b"));
        assert_eq!(*watcher.calls.lock(), 1);
        assert_eq!(store.watcher_count("roots"), 0);
    }
}
