//! Observer registry.
//!
//! Observers register interest in an exact key or a folder prefix. The hub
//! only keeps the registrations and resolves which of them a notification
//! concerns; scanning and delivery are driven by the engine.

use parking_lot::Mutex;
use recordsync_protocol::{RecordKey, RemoteNotification, StorageRoot};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Handle returned by observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// A remote record that differs from what this process last saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedItem {
    /// Record key.
    pub key: RecordKey,
    /// Logical path.
    pub path: String,
    /// Storage root.
    pub root: StorageRoot,
}

impl ChangedItem {
    pub(crate) fn new(key: RecordKey) -> Self {
        Self {
            path: key.path().to_string(),
            root: key.root(),
            key,
        }
    }
}

/// A changed record after it has been loaded and reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeItem<T> {
    /// Record key.
    pub key: RecordKey,
    /// Logical path.
    pub path: String,
    /// Storage root.
    pub root: StorageRoot,
    /// The reconciled value, `None` if the record was deleted.
    pub value: Option<T>,
}

/// How long a registration stays active.
#[derive(Clone)]
pub enum Liveness {
    /// Until removed explicitly.
    Always,
    /// While the referenced owner is alive.
    Owner(Weak<dyn Any + Send + Sync>),
}

impl Liveness {
    /// Ties a registration to the lifetime of `owner`.
    pub fn owned_by<O: Any + Send + Sync>(owner: &Arc<O>) -> Self {
        let weak: Weak<O> = Arc::downgrade(owner);
        Liveness::Owner(weak)
    }

    /// Returns true while the registration should receive changes.
    pub fn is_alive(&self) -> bool {
        match self {
            Liveness::Always => true,
            Liveness::Owner(owner) => owner.strong_count() > 0,
        }
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Always => f.write_str("Always"),
            Liveness::Owner(_) => write!(f, "Owner(alive: {})", self.is_alive()),
        }
    }
}

pub(crate) type ChangeHandler = Arc<dyn Fn(Vec<ChangedItem>) + Send + Sync>;

pub(crate) struct Registration {
    pub(crate) id: ObserverId,
    pub(crate) pattern: RecordKey,
    pub(crate) type_tag: Option<&'static str>,
    pub(crate) liveness: Liveness,
    pub(crate) handler: ChangeHandler,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("type_tag", &self.type_tag)
            .field("liveness", &self.liveness)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ObserverHub {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Arc<Registration>>>,
}

impl ObserverHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        pattern: RecordKey,
        type_tag: Option<&'static str>,
        liveness: Liveness,
        handler: ChangeHandler,
    ) -> Arc<Registration> {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(Registration {
            id,
            pattern,
            type_tag,
            liveness,
            handler,
        });
        self.registrations.lock().push(Arc::clone(&registration));
        registration
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Drops registrations whose owner has gone away.
    pub(crate) fn prune(&self) -> usize {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.liveness.is_alive());
        let pruned = before - registrations.len();
        if pruned > 0 {
            debug!(pruned, "pruned dead observers");
        }
        pruned
    }

    /// All live registrations, pruning dead ones first.
    pub(crate) fn all(&self) -> Vec<Arc<Registration>> {
        self.prune();
        self.registrations.lock().clone()
    }

    /// Resolves the registrations a notification concerns.
    ///
    /// Exact matches win; failing those, prefix patterns containing the
    /// changed record; failing those, every registration.
    pub(crate) fn matching(&self, notification: &RemoteNotification) -> Vec<Arc<Registration>> {
        let live = self.all();
        let id = notification.key.as_deref();
        let path = notification.path.as_deref();

        let exact: Vec<_> = live
            .iter()
            .filter(|r| !r.pattern.is_prefix())
            .filter(|r| {
                id.map_or(false, |id| r.pattern.id() == id)
                    || path.map_or(false, |p| r.pattern.matches_path(p))
            })
            .cloned()
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        let containing: Vec<_> = live
            .iter()
            .filter(|r| r.pattern.is_prefix())
            .filter(|r| {
                id.map_or(false, |id| r.pattern.matches_id(id))
                    || path.map_or(false, |p| r.pattern.matches_path(p))
            })
            .cloned()
            .collect();
        if !containing.is_empty() {
            return containing;
        }

        debug!(observers = live.len(), "notification matched nothing, notifying all");
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RecordKey {
        RecordKey::new(path, StorageRoot::ApplicationSupport)
    }

    fn noop() -> ChangeHandler {
        Arc::new(|_| {})
    }

    fn ids(regs: &[Arc<Registration>]) -> Vec<ObserverId> {
        regs.iter().map(|r| r.id).collect()
    }

    #[test]
    fn exact_then_prefix_then_all() {
        let hub = ObserverHub::new();
        let exact = hub.register(key("saves/1"), None, Liveness::Always, noop());
        let folder = hub.register(key("saves/"), None, Liveness::Always, noop());
        let other = hub.register(key("config"), None, Liveness::Always, noop());

        let hit = hub.matching(&RemoteNotification::for_key(&key("saves/1")));
        assert_eq!(ids(&hit), vec![exact.id]);

        let hit = hub.matching(&RemoteNotification::for_key(&key("saves/2")));
        assert_eq!(ids(&hit), vec![folder.id]);

        let hit = hub.matching(&RemoteNotification::empty());
        assert_eq!(ids(&hit), vec![exact.id, folder.id, other.id]);
    }

    #[test]
    fn path_only_notifications() {
        let hub = ObserverHub::new();
        let folder = hub.register(key("saves/"), None, Liveness::Always, noop());
        hub.register(key("config"), None, Liveness::Always, noop());

        let note = RemoteNotification {
            path: Some("/saves/7".into()),
            ..RemoteNotification::empty()
        };
        assert_eq!(ids(&hub.matching(&note)), vec![folder.id]);
    }

    #[test]
    fn dead_owners_pruned_lazily() {
        let hub = ObserverHub::new();
        let owner = Arc::new(());
        hub.register(key("a"), None, Liveness::owned_by(&owner), noop());
        hub.register(key("b"), None, Liveness::Always, noop());

        drop(owner);
        assert_eq!(hub.len(), 2);
        assert_eq!(hub.all().len(), 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn remove_by_id() {
        let hub = ObserverHub::new();
        let reg = hub.register(key("a"), None, Liveness::Always, noop());
        assert!(hub.remove(reg.id));
        assert!(!hub.remove(reg.id));
        assert_eq!(hub.len(), 0);
    }
}
