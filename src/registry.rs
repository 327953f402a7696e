use std::any::Any;
use std::collections::BTreeMap;

use indexmap::IndexMap;
use slab::Slab;

use crate::source::{SourceFuncs, SourceId};

pub(crate) type Destroy = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

/// Bookkeeping for one registered source. `funcs` is the behavior contract
/// (§4.6); it is `None` once the source has been finalized but the slot is
/// still alive because something still holds a reference (§3 Lifecycle).
pub(crate) struct SourceSlot {
    pub priority: i32,
    pub can_recurse: bool,
    pub in_call: bool,
    pub ready: bool,
    pub valid: bool,
    refcount: u32,
    pub funcs: Option<Box<dyn SourceFuncs>>,
    pub user_data: Option<Box<dyn Any + Send>>,
    destroy: Option<Destroy>,
}

/// The ordered set of registered sources (§4.1).
///
/// Storage (the `Slab`) is kept separate from order (the per-priority
/// `IndexMap`s inside a `BTreeMap`): the slab gives stable, reusable
/// integer handles; the `BTreeMap` keeps priority bands sorted ascending
/// and each band's `IndexMap` preserves FIFO insertion order within the
/// band, which is exactly the ordering contract in §4.1.
#[derive(Default)]
pub(crate) struct SourceRegistry {
    slots: Slab<SourceSlot>,
    order: BTreeMap<i32, IndexMap<SourceId, ()>>,
}

impl SourceRegistry {
    pub fn new() -> SourceRegistry {
        SourceRegistry {
            slots: Slab::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn add(
        &mut self,
        priority: i32,
        can_recurse: bool,
        funcs: Box<dyn SourceFuncs>,
        user_data: Box<dyn Any + Send>,
        destroy: Option<Destroy>,
    ) -> SourceId {
        let slot = SourceSlot {
            priority,
            can_recurse,
            in_call: false,
            ready: false,
            valid: true,
            refcount: 1,
            funcs: Some(funcs),
            user_data: Some(user_data),
            destroy,
        };
        let key = self.slots.insert(slot);
        let id = SourceId(key);
        self.order.entry(priority).or_default().insert(id, ());
        id
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceSlot> {
        self.slots.get(id.0)
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut SourceSlot> {
        self.slots.get_mut(id.0)
    }

    /// Iterate ids in `(priority, insertion_order)` order, valid or not;
    /// callers filter on `valid`/`in_call` themselves (§4.4 prepare/check
    /// passes need to observe `in_call` before skipping).
    pub fn ordered_ids(&self) -> Vec<SourceId> {
        let mut out = Vec::with_capacity(self.slots.len());
        for band in self.order.values() {
            out.extend(band.keys().copied());
        }
        out
    }

    /// Mark invalid, unlink from the order index, and finalize immediately
    /// by dropping the behavior object — the storage slot survives until
    /// the refcount reaches zero (§3 Lifecycle).
    fn invalidate(&mut self, id: SourceId) -> bool {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return false;
        };
        if !slot.valid {
            return false;
        }
        slot.valid = false;
        let priority = slot.priority;
        slot.funcs = None; // finalize: drop the behavior object now.

        if let Some(band) = self.order.get_mut(&priority) {
            band.shift_remove(&id);
            if band.is_empty() {
                self.order.remove(&priority);
            }
        }

        // Drop the registry's own reference (§3 Lifecycle: "...then drop the
        // registry's reference; actual freeing occurs when refcount reaches
        // zero"). Anything still inspecting this source (a pending-dispatch
        // queue entry, a prepare/check pass holding it via `acquire`) keeps
        // it alive past this point; its own `release` does the final reap.
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.refcount = slot.refcount.saturating_sub(1);
        }

        self.try_reap(id);
        true
    }

    pub fn remove(&mut self, id: SourceId) -> bool {
        self.invalidate(id)
    }

    pub fn remove_by_user_data(&mut self, matches: impl Fn(&(dyn Any + Send)) -> bool) -> bool {
        let hit = self.slots.iter().find_map(|(k, slot)| {
            slot.user_data
                .as_deref()
                .filter(|ud| matches(ud))
                .map(|_| SourceId(k))
        });
        match hit {
            Some(id) => self.invalidate(id),
            None => false,
        }
    }

    /// Add a reference, keeping the slot alive across a lock release
    /// (§5 Reference discipline).
    pub fn acquire(&mut self, id: SourceId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.refcount += 1;
        }
    }

    /// Drop a reference; reap the slot if it was invalidated and this was
    /// the last reference.
    pub fn release(&mut self, id: SourceId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.refcount = slot.refcount.saturating_sub(1);
        }
        self.try_reap(id);
    }

    fn try_reap(&mut self, id: SourceId) {
        let reap = matches!(self.slots.get(id.0), Some(slot) if !slot.valid && slot.refcount == 0);
        if reap {
            let slot = self.slots.remove(id.0);
            if let (Some(destroy), Some(user_data)) = (slot.destroy, slot.user_data) {
                destroy(user_data);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
