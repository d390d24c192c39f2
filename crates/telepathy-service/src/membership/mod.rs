//! Group membership engine shared by every group-shaped channel.
//!
//! A [`Membership`] tracks three pairwise disjoint handle sets (members,
//! local-pending and remote-pending) plus the [`GroupFlags`] that gate what
//! clients may do. [`Membership::change_members`] applies a batch, works out
//! what really changed and emits a single `MembersChanged` signal for it, or
//! nothing at all when the batch was a no-op.

mod change;
mod flags;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::errors::TpError;
use crate::handles::{Handle, HandleRef, HandleSet};
use crate::transport::{ObjectPath, Signal, SignalEmitter};

pub use change::{LocalPendingInfo, MembersChanged, MembershipChange};
pub use flags::{ChangeReason, GroupFlags};

pub(crate) const MEMBERSHIP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::membership");

#[derive(Debug, Clone)]
struct PendingRecord {
    actor: Option<HandleRef>,
    reason: ChangeReason,
    message: String,
}

/// Membership state of one group-shaped channel.
#[derive(Debug)]
pub struct Membership {
    emitter: SignalEmitter,
    self_handle: Option<HandleRef>,
    flags: GroupFlags,
    members: HandleSet,
    local_pending: HandleSet,
    pending_records: BTreeMap<Handle, PendingRecord>,
    remote_pending: HandleSet,
    owners: BTreeMap<Handle, HandleRef>,
}

impl Membership {
    /// Empty group emitting through `emitter`, starting with `flags`.
    #[must_use]
    pub const fn new(
        emitter: SignalEmitter,
        self_handle: Option<HandleRef>,
        flags: GroupFlags,
    ) -> Self {
        Self {
            emitter,
            self_handle,
            flags,
            members: HandleSet::new(),
            local_pending: HandleSet::new(),
            pending_records: BTreeMap::new(),
            remote_pending: HandleSet::new(),
            owners: BTreeMap::new(),
        }
    }

    /// Object the group signals come from.
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        self.emitter.path()
    }

    /// Current flags.
    #[must_use]
    pub const fn flags(&self) -> GroupFlags {
        self.flags
    }

    /// The local user's handle in this group, if any.
    #[must_use]
    pub fn self_handle(&self) -> Option<Handle> {
        self.self_handle.as_ref().map(HandleRef::handle)
    }

    /// Full members.
    #[must_use]
    pub const fn members(&self) -> &HandleSet {
        &self.members
    }

    /// Handles awaiting local approval.
    #[must_use]
    pub const fn local_pending(&self) -> &HandleSet {
        &self.local_pending
    }

    /// Handles awaiting remote approval.
    #[must_use]
    pub const fn remote_pending(&self) -> &HandleSet {
        &self.remote_pending
    }

    /// Members, local-pending and remote-pending handles, in that order.
    #[must_use]
    pub fn all_members(&self) -> (Vec<Handle>, Vec<Handle>, Vec<Handle>) {
        (
            self.members.handles(),
            self.local_pending.handles(),
            self.remote_pending.handles(),
        )
    }

    /// Whether `handle` is in any of the three sets.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.members.contains(handle)
            || self.local_pending.contains(handle)
            || self.remote_pending.contains(handle)
    }

    /// Provenance of every local-pending handle.
    #[must_use]
    pub fn local_pending_info(&self) -> Vec<LocalPendingInfo> {
        self.local_pending
            .iter()
            .map(|pending| {
                let handle = pending.handle();
                let record = self.pending_records.get(&handle);
                LocalPendingInfo {
                    handle,
                    actor: record
                        .and_then(|info| info.actor.as_ref())
                        .map(HandleRef::handle),
                    reason: record.map_or(ChangeReason::None, |info| info.reason),
                    message: record.map(|info| info.message.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Applies a membership batch.
    ///
    /// Returns `true` and emits one `MembersChanged` signal when at least one
    /// handle moved. Re-adding existing members, removing absent handles and
    /// empty batches change nothing and emit nothing.
    pub fn change_members(&mut self, change: MembershipChange) -> bool {
        debug_assert!(
            change.inputs_are_disjoint(),
            "membership change inputs overlap"
        );
        let MembershipChange {
            add,
            remove,
            local_pending: add_local,
            remote_pending: add_remote,
            actor,
            reason,
            message,
        } = change;

        let mut added = Vec::new();
        let mut removed = BTreeSet::new();
        let mut new_local = Vec::new();
        let mut new_remote = Vec::new();

        for handle in &add {
            if self.members.insert(handle.clone()) {
                added.push(handle.handle());
            }
        }
        for handle in &remove {
            if self.members.remove(handle.handle()).is_some() {
                removed.insert(handle.handle());
            }
        }
        for handle in add_local.iter().chain(add_remote.iter()) {
            self.members.remove(handle.handle());
        }

        for handle in &add_local {
            if self.local_pending.insert(handle.clone()) {
                new_local.push(handle.handle());
            }
            self.pending_records.insert(
                handle.handle(),
                PendingRecord {
                    actor: actor.clone(),
                    reason,
                    message: message.clone(),
                },
            );
        }
        for handle in add.iter().chain(add_remote.iter()) {
            self.drop_local_pending(handle.handle());
        }
        for handle in &remove {
            if self.drop_local_pending(handle.handle()) {
                removed.insert(handle.handle());
            }
        }

        for handle in &add_remote {
            if self.remote_pending.insert(handle.clone()) {
                new_remote.push(handle.handle());
            }
        }
        for handle in add.iter().chain(add_local.iter()) {
            self.remote_pending.remove(handle.handle());
        }
        for handle in &remove {
            if self.remote_pending.remove(handle.handle()).is_some() {
                removed.insert(handle.handle());
            }
        }

        for handle in &removed {
            self.owners.remove(handle);
        }
        debug_assert!(self.sets_are_disjoint(), "membership sets overlap");

        if added.is_empty() && removed.is_empty() && new_local.is_empty() && new_remote.is_empty()
        {
            return false;
        }

        let event = MembersChanged {
            message,
            added,
            removed: removed.into_iter().collect(),
            local_pending: new_local,
            remote_pending: new_remote,
            actor: actor.as_ref().map(HandleRef::handle),
            reason,
        };
        debug!(
            target: MEMBERSHIP_TARGET,
            path = %self.emitter.path(),
            added = event.added.len(),
            removed = event.removed.len(),
            local_pending = event.local_pending.len(),
            remote_pending = event.remote_pending.len(),
            reason = %event.reason,
            "members changed"
        );
        self.emitter.emit(Signal::MembersChanged(event));
        true
    }

    /// Removes every handle from all three sets with one event.
    pub fn remove_all(&mut self, reason: ChangeReason) -> bool {
        let everyone: HandleSet = self
            .members
            .iter()
            .chain(self.local_pending.iter())
            .chain(self.remote_pending.iter())
            .cloned()
            .collect();
        self.change_members(MembershipChange::new().remove(everyone).reason(reason))
    }

    /// Sets the `add` bits and clears the `remove` bits.
    ///
    /// Emits `GroupFlagsChanged` with only the bits that actually toggled and
    /// returns whether any did.
    ///
    /// # Panics
    ///
    /// Panics if `add` and `remove` share a bit.
    pub fn change_flags(&mut self, add: GroupFlags, remove: GroupFlags) -> bool {
        assert!(
            add.intersection(remove).is_empty(),
            "flags {:?} both added and removed",
            add.intersection(remove)
        );
        let added = add.difference(self.flags);
        let removed = remove.intersection(self.flags);
        if added.is_empty() && removed.is_empty() {
            return false;
        }
        self.flags = self.flags.union(added).difference(removed);
        debug!(
            target: MEMBERSHIP_TARGET,
            path = %self.emitter.path(),
            added = added.bits(),
            removed = removed.bits(),
            "group flags changed"
        );
        self.emitter
            .emit(Signal::GroupFlagsChanged { added, removed });
        true
    }

    /// Checks a client request to add `contacts`, returning the handles that
    /// are not members yet.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when a non-member is to be added without
    /// `CAN_ADD` and is not local-pending either. Nothing is changed.
    pub fn check_add(&self, contacts: &HandleSet) -> Result<HandleSet, TpError> {
        let mut outstanding = HandleSet::new();
        for contact in contacts {
            let handle = contact.handle();
            if self.members.contains(handle) {
                continue;
            }
            if !self.flags.contains(GroupFlags::CAN_ADD) && !self.local_pending.contains(handle) {
                return Err(TpError::permission_denied(format!(
                    "handle {handle} cannot be added to this group"
                )));
            }
            outstanding.insert(contact.clone());
        }
        Ok(outstanding)
    }

    /// Checks a client request to remove `contacts`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when removing a member or rejecting a
    /// local-pending handle without `CAN_REMOVE`, or rescinding a
    /// remote-pending handle without `CAN_RESCIND`; `NotAvailable` when a
    /// handle is in none of the sets. Nothing is changed.
    pub fn check_remove(&self, contacts: &HandleSet) -> Result<(), TpError> {
        for contact in contacts {
            let handle = contact.handle();
            let required = if self.members.contains(handle) || self.local_pending.contains(handle)
            {
                GroupFlags::CAN_REMOVE
            } else if self.remote_pending.contains(handle) {
                GroupFlags::CAN_RESCIND
            } else {
                return Err(TpError::not_available(format!(
                    "handle {handle} is not a current or pending member"
                )));
            };
            if !self.flags.contains(required) {
                return Err(TpError::permission_denied(format!(
                    "handle {handle} cannot be removed from this group"
                )));
            }
        }
        Ok(())
    }

    /// Records the global owner of a channel-specific handle.
    pub fn add_handle_owner(&mut self, local: Handle, owner: HandleRef) {
        self.owners.insert(local, owner);
    }

    /// Global owners of channel-specific member handles.
    ///
    /// Unknown owners are reported as `None`.
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` unless the group uses channel-specific handles
    /// and `InvalidArgument` for handles that are not members.
    pub fn get_handle_owners(&self, handles: &[Handle]) -> Result<Vec<Option<Handle>>, TpError> {
        if !self.flags.contains(GroupFlags::CHANNEL_SPECIFIC_HANDLES) {
            return Err(TpError::not_available(
                "channel doesn't have channel specific handles",
            ));
        }
        handles
            .iter()
            .map(|handle| {
                if self.members.contains(*handle) {
                    Ok(self.owners.get(handle).map(HandleRef::handle))
                } else {
                    Err(TpError::invalid_argument(format!(
                        "handle {handle} is not a member"
                    )))
                }
            })
            .collect()
    }

    fn drop_local_pending(&mut self, handle: Handle) -> bool {
        self.pending_records.remove(&handle);
        self.local_pending.remove(handle).is_some()
    }

    fn sets_are_disjoint(&self) -> bool {
        !self.members.intersects(&self.local_pending)
            && !self.members.intersects(&self.remote_pending)
            && !self.local_pending.intersects(&self.remote_pending)
    }
}
