//! Connectivity-gated retries.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// No route to the remote store.
    Unreachable,
    /// Reachable over Wi-Fi or a wired link.
    Wifi,
    /// Reachable over a cellular link.
    Cellular,
}

impl Reachability {
    /// Returns true for any reachable state.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Reachability::Unreachable)
    }
}

type OneShot = Box<dyn FnOnce() + Send>;
type Permanent = Arc<dyn Fn() + Send + Sync>;

/// Holds retry callbacks and runs them when connectivity returns.
///
/// Permanent callbacks run on every transition from unreachable to reachable;
/// one-shot callbacks run once and are then discarded. Both lists run in
/// registration order, permanent ones first. Callbacks run outside the
/// scheduler's locks, so they may register further callbacks.
pub struct RetryScheduler {
    state: Mutex<Reachability>,
    permanent: Mutex<Vec<Permanent>>,
    one_shot: Mutex<Vec<OneShot>>,
}

impl RetryScheduler {
    /// Creates a scheduler in the given state.
    pub fn new(initial: Reachability) -> Self {
        Self {
            state: Mutex::new(initial),
            permanent: Mutex::new(Vec::new()),
            one_shot: Mutex::new(Vec::new()),
        }
    }

    /// Current reachability.
    pub fn reachability(&self) -> Reachability {
        *self.state.lock()
    }

    /// Returns true if the network is currently considered reachable.
    pub fn is_reachable(&self) -> bool {
        self.reachability().is_reachable()
    }

    /// Registers a callback consumed by the next reconnect.
    pub fn add_one_shot(&self, retry: impl FnOnce() + Send + 'static) {
        self.one_shot.lock().push(Box::new(retry));
    }

    /// Registers a callback run on every reconnect.
    pub fn add_permanent(&self, retry: impl Fn() + Send + Sync + 'static) {
        self.permanent.lock().push(Arc::new(retry));
    }

    /// Number of one-shot callbacks waiting for a reconnect.
    pub fn pending_one_shots(&self) -> usize {
        self.one_shot.lock().len()
    }

    /// Records a reachability change.
    ///
    /// Returns the number of callbacks run, which is zero unless this is a
    /// transition from unreachable to reachable.
    pub fn set_reachability(&self, next: Reachability) -> usize {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous.is_reachable() || !next.is_reachable() {
            debug!(?previous, ?next, "reachability unchanged for retry purposes");
            return 0;
        }

        let permanent: Vec<Permanent> = self.permanent.lock().clone();
        let one_shot: Vec<OneShot> = std::mem::take(&mut *self.one_shot.lock());
        let count = permanent.len() + one_shot.len();
        info!(
            permanent = permanent.len(),
            one_shot = one_shot.len(),
            "network reachable, running retries"
        );

        for retry in permanent {
            retry();
        }
        for retry in one_shot {
            retry();
        }
        count
    }

    /// Marks the network unreachable after a failed round trip.
    pub fn mark_unreachable(&self) {
        let mut state = self.state.lock();
        if state.is_reachable() {
            info!("remote store unreachable, deferring work until reconnect");
            *state = Reachability::Unreachable;
        }
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(Reachability::Wifi)
    }
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("state", &self.reachability())
            .field("permanent", &self.permanent.lock().len())
            .field("one_shot", &self.pending_one_shots())
            .finish()
    }
}
