//! Reconciliation planners.
//!
//! Each planner maps the decoded local and remote copies of one key to the
//! next action. They perform no I/O; the only thing they wait on is the
//! policy's interactive decisions, so every branch can be tested without a
//! store.

use recordsync_protocol::SyncPolicy;

/// The remote side of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteState<'a, T> {
    /// No record, or a record whose payload could not be decoded.
    Absent,
    /// A deletion tombstone, with the value it carries if that decoded.
    Tombstone(Option<&'a T>),
    /// A live record.
    Live(&'a T),
}

/// Outcome of comparing two differing live copies.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// The policy merged them into a new value.
    Merged(T),
    /// The merge produced the remote value itself.
    MergedIntoRemote,
    /// The local copy should replace the remote one.
    Local,
    /// The remote copy is kept.
    Remote,
}

/// Resolves two differing copies: merge first, then the overwrite comparator,
/// else the remote copy stays.
pub async fn resolve<T>(remote: &T, local: &T, policy: &dyn SyncPolicy<T>) -> Resolution<T>
where
    T: PartialEq + Send + Sync,
{
    match policy.interactive_merge(remote, local).await {
        Some(merged) if merged == *remote => Resolution::MergedIntoRemote,
        Some(merged) => Resolution::Merged(merged),
        None => {
            if policy.interactive_should_overwrite(local, remote).await {
                Resolution::Local
            } else {
                Resolution::Remote
            }
        }
    }
}

/// What a load does once the remote copy is known.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadAction<T> {
    /// Nothing to do, no callback.
    Nothing,
    /// Local and remote are equal.
    InSync,
    /// No local copy: write the remote value locally and deliver it.
    StoreRemote(T),
    /// No remote copy: push the local value as a new record.
    PushLocal,
    /// Remote tombstone accepted: delete the local copy and deliver `None`.
    DeleteLocal,
    /// Remote tombstone refused: push the local value over it and deliver the push result.
    Undelete,
    /// Merged value: write it locally, push it and deliver it.
    Merged(T),
    /// Remote wins: write it locally and deliver it.
    KeepRemote(T),
    /// Local wins: push it and deliver the push result.
    OverwriteRemote,
}

/// Plans the remote phase of a load.
pub async fn plan_load<T>(
    local: Option<&T>,
    remote: RemoteState<'_, T>,
    policy: &dyn SyncPolicy<T>,
) -> LoadAction<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    match (local, remote) {
        (None, RemoteState::Absent) | (None, RemoteState::Tombstone(_)) => LoadAction::Nothing,
        (None, RemoteState::Live(r)) => LoadAction::StoreRemote(r.clone()),
        (Some(_), RemoteState::Absent) => LoadAction::PushLocal,
        (Some(l), RemoteState::Tombstone(deleted)) => {
            if policy.interactive_should_delete(l, deleted).await {
                LoadAction::DeleteLocal
            } else {
                LoadAction::Undelete
            }
        }
        (Some(l), RemoteState::Live(r)) if l == r => LoadAction::InSync,
        (Some(l), RemoteState::Live(r)) => match resolve(r, l, policy).await {
            Resolution::Merged(m) => LoadAction::Merged(m),
            Resolution::MergedIntoRemote => LoadAction::Nothing,
            Resolution::Local => LoadAction::OverwriteRemote,
            Resolution::Remote => LoadAction::KeepRemote(r.clone()),
        },
    }
}

/// What a save push submits once the remote copy is known.
#[derive(Debug, Clone, PartialEq)]
pub enum PushPlan<T> {
    /// Write this value with the fetched version as precondition.
    Submit(T),
    /// The remote value wins; nothing is written.
    KeepRemote(T),
    /// The remote record already holds the value.
    AlreadyCurrent,
}

/// Plans a save push for `incoming`.
///
/// Tombstones are overwritten without consulting the policy.
pub async fn plan_push<T>(
    incoming: &T,
    remote: RemoteState<'_, T>,
    policy: &dyn SyncPolicy<T>,
) -> PushPlan<T>
where
    T: Clone + PartialEq + Send + Sync,
{
    match remote {
        RemoteState::Absent | RemoteState::Tombstone(_) => PushPlan::Submit(incoming.clone()),
        RemoteState::Live(r) if r == incoming => PushPlan::AlreadyCurrent,
        RemoteState::Live(r) => match resolve(r, incoming, policy).await {
            Resolution::Merged(m) => PushPlan::Submit(m),
            Resolution::Local => PushPlan::Submit(incoming.clone()),
            Resolution::MergedIntoRemote | Resolution::Remote => PushPlan::KeepRemote(r.clone()),
        },
    }
}
