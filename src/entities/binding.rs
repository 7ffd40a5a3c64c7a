// 🔗 Binding Entity - "external record X is internal record Y under backend B"
//
// Binding models are named `magento.{normal_model}` (e.g. `magento.product.product`)
// and wrap the normal ERP model through a many2one field, `erp_id` by default.
// Backend structure models (website, store, storeview) wrap nothing: their
// bindings carry no internal record and they cannot be unwrapped.
//
// Invariant (enforced by storage, asserted by the binder):
// - at most one binding per (model, backend_id, internal_id)
// - at most one binding per (model, backend_id, external_id)

use super::record::RecordId;
use crate::error::{ConnectorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field holding the wrapped record on every standard binding model
pub const DEFAULT_INTERNAL_FIELD: &str = "erp_id";

// ============================================================================
// EXTERNAL ID
// ============================================================================

/// Identifier assigned by Magento, always stored in string form.
///
/// Magento hands out `0` as a real id (default website/store), so zero must
/// survive validation while null, `""` and booleans must not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(String);

impl ExternalId {
    /// Validate a raw value coming from the backend API
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => Ok(ExternalId(n.to_string())),
            Value::String(s) if !s.is_empty() => Ok(ExternalId(s.clone())),
            other => Err(ConnectorError::PreconditionViolation(format!(
                "external id missing or invalid, got: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// BINDING RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    /// Row id of the binding itself
    pub id: RecordId,

    /// Binding model name (e.g., "magento.sale.order")
    pub model: String,

    /// Magento id; `None` until the first bind (export flows create first)
    pub external_id: Option<String>,

    /// Id of the wrapped ERP record, `None` on models that wrap nothing
    pub internal_id: Option<RecordId>,

    pub backend_id: RecordId,

    /// Last synchronization, set by every bind
    pub sync_date: Option<DateTime<Utc>>,

    /// Archived bindings stay visible to the binder
    pub active: bool,
}

impl BindingRecord {
    /// A new, not yet stored and not yet bound, binding
    pub fn new(model: &str, internal_id: RecordId, backend_id: RecordId) -> Self {
        BindingRecord {
            id: 0,
            model: model.to_string(),
            external_id: None,
            internal_id: Some(internal_id),
            backend_id,
            sync_date: None,
            active: true,
        }
    }

    /// A new binding on a model that wraps no ERP record
    pub fn standalone(model: &str, backend_id: RecordId) -> Self {
        BindingRecord {
            internal_id: None,
            ..BindingRecord::new(model, 0, backend_id)
        }
    }

    pub fn with_external_id(mut self, external_id: &str) -> Self {
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn is_bound(&self) -> bool {
        self.external_id.is_some()
    }
}

// ============================================================================
// BINDING MODEL (configuration)
// ============================================================================

/// Declared relation of a many2one field on a binding model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Target ("comodel") of the relation, e.g. "product.product"
    pub comodel: String,
}

/// Static description of one binding model.
///
/// Fields and their targets are declared here and checked once at startup
/// (`ConnectorConfig::validate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingModel {
    pub name: String,

    /// Field that holds the wrapped record; `null` for models wrapping nothing
    #[serde(default = "default_internal_field")]
    pub internal_field: Option<String>,

    /// Many2one fields declared on the model, keyed by field name
    #[serde(default)]
    pub relations: BTreeMap<String, Relation>,
}

fn default_internal_field() -> Option<String> {
    Some(DEFAULT_INTERNAL_FIELD.to_string())
}

fn backend_relation() -> (String, Relation) {
    (
        "backend_id".to_string(),
        Relation {
            comodel: "magento.backend".to_string(),
        },
    )
}

impl BindingModel {
    /// Binding model wrapping `normal_model` through `erp_id`
    pub fn wrapping(name: &str, normal_model: &str) -> Self {
        let mut relations = BTreeMap::from([backend_relation()]);
        relations.insert(
            DEFAULT_INTERNAL_FIELD.to_string(),
            Relation {
                comodel: normal_model.to_string(),
            },
        );
        BindingModel {
            name: name.to_string(),
            internal_field: default_internal_field(),
            relations,
        }
    }

    /// Backend structure model (website, store, storeview): bound to
    /// Magento but wrapping no normal model
    pub fn standalone(name: &str) -> Self {
        BindingModel {
            name: name.to_string(),
            internal_field: None,
            relations: BTreeMap::from([backend_relation()]),
        }
    }

    /// Model with no declared relations
    pub fn bare(name: &str) -> Self {
        BindingModel {
            name: name.to_string(),
            internal_field: default_internal_field(),
            relations: BTreeMap::new(),
        }
    }

    /// Whether bindings of this model point at a normal record
    pub fn wraps(&self) -> bool {
        self.internal_field.is_some()
    }

    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.get(field)
    }

    /// Name of the normal model wrapped through `internal_field`
    pub fn internal_model(&self) -> Result<&str> {
        let field = self.internal_field.as_deref();
        field
            .and_then(|f| self.relation(f))
            .map(|r| r.comodel.as_str())
            .ok_or_else(|| {
                ConnectorError::Configuration(format!(
                    "Cannot unwrap model {}, because it has no {} field",
                    self.name,
                    field.unwrap_or(DEFAULT_INTERNAL_FIELD)
                ))
            })
    }

    /// Standard binding models synchronized with Magento
    pub fn standard() -> Vec<BindingModel> {
        vec![
            BindingModel::standalone("magento.website"),
            BindingModel::standalone("magento.store"),
            BindingModel::standalone("magento.storeview"),
            BindingModel::wrapping("magento.res.partner", "res.partner"),
            BindingModel::wrapping("magento.res.partner.category", "res.partner.category"),
            BindingModel::wrapping("magento.product.product", "product.product"),
            BindingModel::wrapping("magento.product.template", "product.template"),
            BindingModel::wrapping("magento.product.category", "product.category"),
            BindingModel::wrapping("magento.sale.order", "sale.order"),
            BindingModel::wrapping("magento.sale.order.line", "sale.order.line"),
            BindingModel::wrapping("magento.account.invoice", "account.invoice"),
            BindingModel::wrapping("magento.stock.picking", "stock.picking"),
        ]
    }
}
