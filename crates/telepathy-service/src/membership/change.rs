use serde::Serialize;

use super::ChangeReason;
use crate::handles::{Handle, HandleRef, HandleSet};

/// A batch of membership updates applied by
/// [`Membership::change_members`](super::Membership::change_members).
///
/// The four handle sets must not overlap; that is the caller's contract.
#[derive(Debug, Clone, Default)]
pub struct MembershipChange {
    pub(super) add: HandleSet,
    pub(super) remove: HandleSet,
    pub(super) local_pending: HandleSet,
    pub(super) remote_pending: HandleSet,
    pub(super) actor: Option<HandleRef>,
    pub(super) reason: ChangeReason,
    pub(super) message: String,
}

impl MembershipChange {
    /// Empty change with reason [`ChangeReason::None`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles to make full members.
    #[must_use]
    pub fn add(mut self, handles: impl IntoIterator<Item = HandleRef>) -> Self {
        self.add.extend(handles);
        self
    }

    /// Handles to drop from whichever set holds them.
    #[must_use]
    pub fn remove(mut self, handles: impl IntoIterator<Item = HandleRef>) -> Self {
        self.remove.extend(handles);
        self
    }

    /// Handles awaiting local approval.
    #[must_use]
    pub fn local_pending(mut self, handles: impl IntoIterator<Item = HandleRef>) -> Self {
        self.local_pending.extend(handles);
        self
    }

    /// Handles awaiting remote approval.
    #[must_use]
    pub fn remote_pending(mut self, handles: impl IntoIterator<Item = HandleRef>) -> Self {
        self.remote_pending.extend(handles);
        self
    }

    /// Contact responsible for the change.
    #[must_use]
    pub fn actor(mut self, actor: HandleRef) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Reason reported with the change.
    #[must_use]
    pub const fn reason(mut self, reason: ChangeReason) -> Self {
        self.reason = reason;
        self
    }

    /// Message reported with the change.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Whether no handle set carries anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.remove.is_empty()
            && self.local_pending.is_empty()
            && self.remote_pending.is_empty()
    }

    pub(super) fn inputs_are_disjoint(&self) -> bool {
        let sets = [
            &self.add,
            &self.remove,
            &self.local_pending,
            &self.remote_pending,
        ];
        sets.iter().enumerate().all(|(index, set)| {
            sets.iter()
                .skip(index + 1)
                .all(|other| !set.intersects(other))
        })
    }
}

/// Payload of the `MembersChanged` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembersChanged {
    /// Message supplied with the change, empty when none was given.
    pub message: String,
    /// Handles that became members.
    pub added: Vec<Handle>,
    /// Handles that left any of the three sets.
    pub removed: Vec<Handle>,
    /// Handles that became local-pending.
    pub local_pending: Vec<Handle>,
    /// Handles that became remote-pending.
    pub remote_pending: Vec<Handle>,
    /// Contact responsible, if known.
    pub actor: Option<Handle>,
    /// Why membership changed.
    pub reason: ChangeReason,
}

/// Provenance of a local-pending member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalPendingInfo {
    /// The pending handle.
    pub handle: Handle,
    /// Contact who put it there, if known.
    pub actor: Option<Handle>,
    /// Reason given at the time.
    pub reason: ChangeReason,
    /// Message given at the time.
    pub message: String,
}
