// 🧠 In-memory store
//
// Holds bindings, taxes and the change log in memory. Unlike the SQLite
// store it does NOT enforce the binding uniqueness constraints, which makes
// it the place to reproduce a corrupted store.

use crate::db::Event;
use crate::entities::{BindingRecord, RecordId, TaxQuery, TaxRecord};
use crate::error::{ConnectorError, Result};
use crate::storage::{Archived, BindingStore, BindingUpdate, Condition, TaxStore, WriteOrigin};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Clone, Default)]
pub struct MemoryStore {
    bindings: Arc<RwLock<Vec<BindingRecord>>>,
    taxes: Arc<RwLock<Vec<TaxRecord>>>,
    events: Arc<RwLock<Vec<Event>>>,
}

// A panic while holding a lock leaves plain data behind; keep serving it.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a binding and return its new id (ids start at 1)
    pub fn insert_binding(&self, mut binding: BindingRecord) -> RecordId {
        let mut bindings = write(&self.bindings);
        let id = bindings.iter().map(|b| b.id).max().unwrap_or(0) + 1;
        binding.id = id;
        bindings.push(binding);
        id
    }

    /// Store a tax record as given (its id is kept)
    pub fn insert_tax(&self, tax: TaxRecord) {
        write(&self.taxes).push(tax);
    }

    /// Archive or restore a binding
    pub fn set_active(&self, id: RecordId, active: bool) -> Result<()> {
        let mut bindings = write(&self.bindings);
        let binding = bindings
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| ConnectorError::PreconditionViolation(format!("binding {} not found", id)))?;
        binding.active = active;
        Ok(())
    }

    /// Change log, oldest first
    pub fn events(&self) -> Vec<Event> {
        read(&self.events).clone()
    }

    pub fn binding_count(&self) -> usize {
        read(&self.bindings).len()
    }
}

impl BindingStore for MemoryStore {
    fn search_bindings(
        &self,
        model: &str,
        conditions: &[Condition],
        archived: Archived,
    ) -> Result<Vec<BindingRecord>> {
        let bindings = read(&self.bindings);
        let mut found: Vec<BindingRecord> = bindings
            .iter()
            .filter(|b| b.model == model && archived.admits(b))
            .filter(|b| conditions.iter().all(|c| c.matches(b)))
            .cloned()
            .collect();
        found.sort_by_key(|b| b.id);
        Ok(found)
    }

    fn browse_binding(&self, model: &str, id: RecordId) -> Result<Option<BindingRecord>> {
        let bindings = read(&self.bindings);
        Ok(bindings
            .iter()
            .find(|b| b.model == model && b.id == id)
            .cloned())
    }

    fn write_binding(
        &self,
        model: &str,
        id: RecordId,
        update: &BindingUpdate,
        origin: WriteOrigin,
    ) -> Result<()> {
        let mut bindings = write(&self.bindings);
        let binding = bindings
            .iter_mut()
            .find(|b| b.model == model && b.id == id)
            .ok_or_else(|| {
                ConnectorError::PreconditionViolation(format!("{} {} does not exist", model, id))
            })?;

        binding.external_id = Some(update.external_id.clone());
        binding.sync_date = Some(update.sync_date);

        write(&self.events).push(Event::binding_written(model, id, update, origin));
        debug!(model, id, external_id = %update.external_id, "binding written");
        Ok(())
    }
}

impl TaxStore for MemoryStore {
    fn search_taxes(&self, query: &TaxQuery) -> Result<Vec<TaxRecord>> {
        let taxes = read(&self.taxes);
        let mut found: Vec<TaxRecord> = taxes.iter().filter(|t| query.matches(t)).cloned().collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }
}
