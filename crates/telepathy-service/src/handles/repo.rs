use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use super::{EntityType, Handle, HandleLedger, HandleRef, HandleTable};
use crate::errors::HandleError;

type Normaliser = dyn Fn(&str) -> Result<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allocation {
    /// Unknown identifiers are allocated on demand.
    OnDemand,
    /// Only the identifiers supplied at construction exist.
    Fixed,
    /// Unknown identifiers must be interned after a remote lookup.
    AfterLookup,
}

struct Entry {
    id: String,
    refs: usize,
}

struct Ledger {
    entity: EntityType,
    entries: RefCell<BTreeMap<Handle, Entry>>,
}

impl HandleLedger for Ledger {
    fn retain(&self, handle: Handle) {
        match self.entries.borrow_mut().get_mut(&handle) {
            Some(entry) => entry.refs += 1,
            None => warn!(entity = %self.entity, %handle, "reference taken on unallocated handle"),
        }
    }

    fn release(&self, handle: Handle) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(&handle) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }
}

/// In-memory handle table shipped with the crate.
///
/// Handles stay allocated after their last [`HandleRef`] drops until
/// [`HandleTable::collect_unreferenced`] runs, so identifiers resolved for a
/// request that later fails remain valid for the life of the connection.
pub struct HandleRepo {
    ledger: Rc<Ledger>,
    by_id: RefCell<HashMap<String, Handle>>,
    next: Cell<u32>,
    allocation: Allocation,
    normaliser: Box<Normaliser>,
}

impl HandleRepo {
    /// Table accepting any non-empty identifier verbatim.
    #[must_use]
    pub fn new(entity: EntityType) -> Self {
        Self::with_normaliser(entity, |id: &str| {
            if id.is_empty() {
                Err("identifier is empty".to_owned())
            } else {
                Ok(id.to_owned())
            }
        })
    }

    /// Table normalising identifiers with `normaliser` before interning.
    pub fn with_normaliser<F>(entity: EntityType, normaliser: F) -> Self
    where
        F: Fn(&str) -> Result<String, String> + 'static,
    {
        Self {
            ledger: Rc::new(Ledger {
                entity,
                entries: RefCell::new(BTreeMap::new()),
            }),
            by_id: RefCell::new(HashMap::new()),
            next: Cell::new(1),
            allocation: Allocation::OnDemand,
            normaliser: Box::new(normaliser),
        }
    }

    /// Table with a closed set of identifiers, allocated up front.
    #[must_use]
    pub fn fixed(entity: EntityType, ids: &[&str]) -> Self {
        let mut repo = Self::new(entity);
        for id in ids {
            if repo.allocate((*id).to_owned()).is_none() {
                warn!(%entity, id, "fixed handle table overflowed");
            }
        }
        repo.allocation = Allocation::Fixed;
        repo
    }

    /// Table whose unknown identifiers need a remote lookup before use.
    ///
    /// `ensure` reports [`HandleError::LookupRequired`] for identifiers that
    /// have not been [interned](Self::intern) yet.
    #[must_use]
    pub fn requiring_lookup(entity: EntityType) -> Self {
        let mut repo = Self::new(entity);
        repo.allocation = Allocation::AfterLookup;
        repo
    }

    /// Allocates `id` unconditionally, bypassing any lookup requirement.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::InvalidIdentifier`] when normalisation fails or
    /// the table is fixed and does not know `id`.
    pub fn intern(&self, id: &str) -> Result<HandleRef, HandleError> {
        let normalised = self.normalise(id)?;
        if let Some(handle) = self.find(&normalised) {
            return Ok(self.reference(handle));
        }
        if self.allocation == Allocation::Fixed {
            return Err(self.invalid(id, "not a recognised name"));
        }
        let handle = self
            .allocate(normalised)
            .ok_or_else(|| self.invalid(id, "handle space exhausted"))?;
        Ok(self.reference(handle))
    }

    /// Total number of live references across all handles.
    #[must_use]
    pub fn live_references(&self) -> usize {
        self.ledger.entries.borrow().values().map(|entry| entry.refs).sum()
    }

    /// Number of references currently held on `handle`.
    #[must_use]
    pub fn references_to(&self, handle: Handle) -> usize {
        self.ledger
            .entries
            .borrow()
            .get(&handle)
            .map_or(0, |entry| entry.refs)
    }

    fn normalise(&self, id: &str) -> Result<String, HandleError> {
        (self.normaliser)(id).map_err(|reason| HandleError::InvalidIdentifier {
            entity: self.ledger.entity,
            id: id.to_owned(),
            reason,
        })
    }

    fn invalid(&self, id: &str, reason: &str) -> HandleError {
        HandleError::InvalidIdentifier {
            entity: self.ledger.entity,
            id: id.to_owned(),
            reason: reason.to_owned(),
        }
    }

    fn find(&self, normalised: &str) -> Option<Handle> {
        self.by_id.borrow().get(normalised).copied()
    }

    fn allocate(&self, normalised: String) -> Option<Handle> {
        let raw = self.next.get();
        let handle = Handle::new(raw)?;
        self.next.set(raw.checked_add(1)?);
        self.ledger.entries.borrow_mut().insert(
            handle,
            Entry {
                id: normalised.clone(),
                refs: 0,
            },
        );
        self.by_id.borrow_mut().insert(normalised, handle);
        Some(handle)
    }

    fn reference(&self, handle: Handle) -> HandleRef {
        let ledger: Rc<dyn HandleLedger> = self.ledger.clone();
        HandleRef::acquire(handle, ledger)
    }
}

impl HandleTable for HandleRepo {
    fn entity_type(&self) -> EntityType {
        self.ledger.entity
    }

    fn ensure(&self, id: &str) -> Result<HandleRef, HandleError> {
        let normalised = self.normalise(id)?;
        if let Some(handle) = self.find(&normalised) {
            return Ok(self.reference(handle));
        }
        match self.allocation {
            Allocation::Fixed => Err(self.invalid(id, "not a recognised name")),
            Allocation::AfterLookup => Err(HandleError::LookupRequired {
                entity: self.ledger.entity,
                id: normalised,
            }),
            Allocation::OnDemand => {
                let handle = self
                    .allocate(normalised)
                    .ok_or_else(|| self.invalid(id, "handle space exhausted"))?;
                Ok(self.reference(handle))
            }
        }
    }

    fn lookup(&self, id: &str) -> Option<HandleRef> {
        let normalised = self.normalise(id).ok()?;
        self.find(&normalised).map(|handle| self.reference(handle))
    }

    fn hold(&self, handle: Handle) -> Result<HandleRef, HandleError> {
        if self.is_valid(handle) {
            Ok(self.reference(handle))
        } else {
            Err(HandleError::InvalidHandle {
                entity: self.ledger.entity,
                handle: handle.get(),
            })
        }
    }

    fn inspect(&self, handle: Handle) -> Option<String> {
        self.ledger
            .entries
            .borrow()
            .get(&handle)
            .map(|entry| entry.id.clone())
    }

    fn is_valid(&self, handle: Handle) -> bool {
        self.ledger.entries.borrow().contains_key(&handle)
    }

    fn collect_unreferenced(&self) -> usize {
        if self.allocation == Allocation::Fixed {
            return 0;
        }
        let mut entries = self.ledger.entries.borrow_mut();
        let doomed: Vec<(Handle, String)> = entries
            .iter()
            .filter(|(_, entry)| entry.refs == 0)
            .map(|(handle, entry)| (*handle, entry.id.clone()))
            .collect();
        let mut by_id = self.by_id.borrow_mut();
        for (handle, id) in &doomed {
            entries.remove(handle);
            by_id.remove(id);
        }
        doomed.len()
    }
}

impl fmt::Debug for HandleRepo {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HandleRepo")
            .field("entity", &self.ledger.entity)
            .field("allocation", &self.allocation)
            .field("handles", &self.ledger.entries.borrow().len())
            .finish_non_exhaustive()
    }
}
