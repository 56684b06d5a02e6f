//! Conflict-resolution policies.
//!
//! A [`SyncPolicy`] is injected per call. The engine consults it in a fixed
//! order when local and remote copies differ:
//!
//! 1. `merge(remote, local)`; a value different from `remote` wins.
//! 2. Otherwise `should_overwrite(local, remote)`; `true` means local wins.
//! 3. Otherwise the remote copy is kept.
//!
//! The engine always goes through the `interactive_*` methods. Their defaults
//! answer immediately from the synchronous methods; override them when the
//! decision needs to wait, for example on a prompt to the user.

use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;

/// A decision that may take a while to arrive.
pub type Decision<'a, R> = Pin<Box<dyn Future<Output = R> + Send + 'a>>;

/// Merge, overwrite and delete decisions for values of type `T`.
///
/// Every method has a default, so an empty `impl` yields a policy that never
/// merges, never overwrites and always follows remote deletions.
pub trait SyncPolicy<T>: Send + Sync {
    /// Combines two versions, or declines with `None`.
    fn merge(&self, remote: &T, local: &T) -> Option<T> {
        let _ = (remote, local);
        None
    }

    /// Returns true if `candidate` should replace `existing`.
    fn should_overwrite(&self, candidate: &T, existing: &T) -> bool {
        let _ = (candidate, existing);
        false
    }

    /// Returns true if `local` should be deleted because the remote copy is a
    /// tombstone. `remote_deleted` is the value the tombstone carries, if it
    /// could be decoded.
    fn should_delete(&self, local: &T, remote_deleted: Option<&T>) -> bool {
        let _ = (local, remote_deleted);
        true
    }

    /// Asynchronous form of [`SyncPolicy::merge`].
    fn interactive_merge<'a>(&'a self, remote: &'a T, local: &'a T) -> Decision<'a, Option<T>>
    where
        T: Send,
    {
        Box::pin(future::ready(self.merge(remote, local)))
    }

    /// Asynchronous form of [`SyncPolicy::should_overwrite`].
    fn interactive_should_overwrite<'a>(&'a self, candidate: &'a T, existing: &'a T) -> Decision<'a, bool> {
        Box::pin(future::ready(self.should_overwrite(candidate, existing)))
    }

    /// Asynchronous form of [`SyncPolicy::should_delete`].
    fn interactive_should_delete<'a>(
        &'a self,
        local: &'a T,
        remote_deleted: Option<&'a T>,
    ) -> Decision<'a, bool> {
        Box::pin(future::ready(self.should_delete(local, remote_deleted)))
    }
}

/// Never merges and never overwrites: the existing side always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverwrite;

impl<T> SyncPolicy<T> for NeverOverwrite {}

/// Natural ordering: the greater value wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ordered;

impl<T: PartialOrd> SyncPolicy<T> for Ordered {
    fn should_overwrite(&self, candidate: &T, existing: &T) -> bool {
        candidate > existing
    }
}

type MergeFn<T> = Arc<dyn Fn(&T, &T) -> Option<T> + Send + Sync>;
type OverwriteFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;
type DeleteFn<T> = Arc<dyn Fn(&T, Option<&T>) -> bool + Send + Sync>;

/// A policy assembled from closures. Unset closures fall back to the defaults.
///
/// ```
/// use recordsync_protocol::{FnPolicy, SyncPolicy};
///
/// let policy = FnPolicy::<u32>::new().with_overwrite(|a, b| a > b);
/// assert!(policy.should_overwrite(&5, &2));
/// assert!(policy.merge(&5, &2).is_none());
/// ```
pub struct FnPolicy<T> {
    merge: Option<MergeFn<T>>,
    overwrite: Option<OverwriteFn<T>>,
    delete: Option<DeleteFn<T>>,
}

impl<T> FnPolicy<T> {
    /// Creates a policy with every decision defaulted.
    pub fn new() -> Self {
        Self {
            merge: None,
            overwrite: None,
            delete: None,
        }
    }

    /// Sets the merge closure, called as `merge(remote, local)`.
    pub fn with_merge(mut self, f: impl Fn(&T, &T) -> Option<T> + Send + Sync + 'static) -> Self {
        self.merge = Some(Arc::new(f));
        self
    }

    /// Sets the overwrite closure, called as `overwrite(candidate, existing)`.
    pub fn with_overwrite(mut self, f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.overwrite = Some(Arc::new(f));
        self
    }

    /// Sets the delete closure, called as `delete(local, remote_deleted)`.
    pub fn with_delete(mut self, f: impl Fn(&T, Option<&T>) -> bool + Send + Sync + 'static) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }
}

impl<T> Default for FnPolicy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FnPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            merge: self.merge.clone(),
            overwrite: self.overwrite.clone(),
            delete: self.delete.clone(),
        }
    }
}

impl<T> fmt::Debug for FnPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPolicy")
            .field("merge", &self.merge.is_some())
            .field("overwrite", &self.overwrite.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

impl<T> SyncPolicy<T> for FnPolicy<T> {
    fn merge(&self, remote: &T, local: &T) -> Option<T> {
        self.merge.as_ref().and_then(|f| f(remote, local))
    }

    fn should_overwrite(&self, candidate: &T, existing: &T) -> bool {
        self.overwrite
            .as_ref()
            .map_or(false, |f| f(candidate, existing))
    }

    fn should_delete(&self, local: &T, remote_deleted: Option<&T>) -> bool {
        self.delete.as_ref().map_or(true, |f| f(local, remote_deleted))
    }
}
