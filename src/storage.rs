// 🗄️ Storage contract
//
// What the binder and the tax matcher need from the record store. Two
// implementations ship with the crate: `db::SqliteStore` and
// `memory::MemoryStore`.

use crate::entities::{BindingRecord, RecordId, TaxQuery, TaxRecord};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// QUERY TYPES
// ============================================================================

/// Exact-match predicate on a binding row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    ExternalId(String),
    InternalId(RecordId),
    BackendId(RecordId),
}

impl Condition {
    pub fn matches(&self, binding: &BindingRecord) -> bool {
        match self {
            Condition::ExternalId(id) => binding.external_id.as_deref() == Some(id.as_str()),
            Condition::InternalId(id) => binding.internal_id == Some(*id),
            Condition::BackendId(id) => binding.backend_id == *id,
        }
    }
}

/// Whether a search sees archived (inactive) rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archived {
    Include,
    Exclude,
}

impl Archived {
    pub fn admits(&self, binding: &BindingRecord) -> bool {
        match self {
            Archived::Include => true,
            Archived::Exclude => binding.active,
        }
    }
}

// ============================================================================
// WRITES
// ============================================================================

/// Who performed a write.
///
/// Change tracking must skip exports for `Connector` writes, otherwise the
/// external id written by a bind would be pushed back to Magento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// Bookkeeping done by the connector itself
    Connector,
    /// Anything else (users, other modules)
    User,
}

impl WriteOrigin {
    pub fn suppresses_export(&self) -> bool {
        matches!(self, WriteOrigin::Connector)
    }

    pub fn actor(&self) -> &'static str {
        match self {
            WriteOrigin::Connector => "connector",
            WriteOrigin::User => "user",
        }
    }
}

/// Fields a bind sets, applied in one update
#[derive(Debug, Clone, PartialEq)]
pub struct BindingUpdate {
    pub external_id: String,
    pub sync_date: DateTime<Utc>,
}

// ============================================================================
// TRAITS
// ============================================================================

pub trait BindingStore {
    /// All bindings of `model` matching every condition, ordered by id
    fn search_bindings(
        &self,
        model: &str,
        conditions: &[Condition],
        archived: Archived,
    ) -> Result<Vec<BindingRecord>>;

    /// Binding by id, archived or not
    fn browse_binding(&self, model: &str, id: RecordId) -> Result<Option<BindingRecord>>;

    /// Apply `update` atomically and record the change with its origin
    fn write_binding(
        &self,
        model: &str,
        id: RecordId,
        update: &BindingUpdate,
        origin: WriteOrigin,
    ) -> Result<()>;
}

pub trait TaxStore {
    /// Taxes matching `query`, ordered by id
    fn search_taxes(&self, query: &TaxQuery) -> Result<Vec<TaxRecord>>;
}
