// 🗂️ Record handles
//
// A `RecordSet` is a model name plus the ids it holds. Operations that
// accept "an id or a one-record handle" take `impl Into<RecordArg>`.

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Serialize};

/// Identifier of a row in the ERP database (always positive once stored)
pub type RecordId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub model: String,
    pub ids: Vec<RecordId>,
}

impl RecordSet {
    /// Empty handle on a model
    pub fn empty(model: &str) -> Self {
        RecordSet {
            model: model.to_string(),
            ids: Vec::new(),
        }
    }

    pub fn one(model: &str, id: RecordId) -> Self {
        RecordSet {
            model: model.to_string(),
            ids: vec![id],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The single id held by this handle, or a precondition violation
    pub fn ensure_one(&self) -> Result<RecordId> {
        match self.ids.as_slice() {
            [id] => Ok(*id),
            ids => Err(ConnectorError::PreconditionViolation(format!(
                "expected singleton on {}, got {} records",
                self.model,
                ids.len()
            ))),
        }
    }
}

/// Either a bare record id or a record handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordArg {
    Id(RecordId),
    Set(RecordSet),
}

impl RecordArg {
    /// Resolve to one id. Sets must hold exactly one record.
    pub fn resolve(&self) -> Result<RecordId> {
        match self {
            RecordArg::Id(id) => Ok(*id),
            RecordArg::Set(set) => set.ensure_one(),
        }
    }
}

impl From<RecordId> for RecordArg {
    fn from(id: RecordId) -> Self {
        RecordArg::Id(id)
    }
}

impl From<RecordSet> for RecordArg {
    fn from(set: RecordSet) -> Self {
        RecordArg::Set(set)
    }
}

impl From<&RecordSet> for RecordArg {
    fn from(set: &RecordSet) -> Self {
        RecordArg::Set(set.clone())
    }
}
