// 🔗 Binder - translate between Magento ids and ERP record ids
//
// One generic binder serves every binding model (partners, products, orders,
// invoices, pickings). It is built per model and per backend:
//
//     let binder = Binder::new(&store, config.binding_model("magento.sale.order")?, &backend);
//     let order_id = binder.to_internal("100000012", true)?;
//
// Not-found is `None` (or an empty `RecordSet`). Several bindings for a key
// that must be unique is a consistency violation and is never resolved here.

use crate::entities::{Backend, BindingModel, BindingRecord, ExternalId, RecordArg, RecordId, RecordSet};
use crate::error::{ConnectorError, Result};
use crate::storage::{Archived, BindingStore, BindingUpdate, Condition, WriteOrigin};
use chrono::Utc;
use std::fmt::Display;
use tracing::{debug, error};

pub struct Binder<'a, S: BindingStore> {
    store: &'a S,
    model: &'a BindingModel,
    backend: &'a Backend,
}

impl<'a, S: BindingStore> Binder<'a, S> {
    pub fn new(store: &'a S, model: &'a BindingModel, backend: &'a Backend) -> Self {
        Binder {
            store,
            model,
            backend,
        }
    }

    // ========================================================================
    // MAGENTO → ERP
    // ========================================================================

    /// ERP id for a Magento id.
    ///
    /// With `unwrap` the id of the normal record (e.g. `product.product`),
    /// otherwise the id of the binding (e.g. `magento.product.product`).
    pub fn to_internal(&self, external_id: impl Display, unwrap: bool) -> Result<Option<RecordId>> {
        if unwrap {
            self.unwrap_model()?;
        }

        match self.find_by_external(&external_id.to_string())? {
            Some(binding) if unwrap => self.wrapped_id(&binding).map(Some),
            Some(binding) => Ok(Some(binding.id)),
            None => Ok(None),
        }
    }

    /// Same as `to_internal`, as a record handle (empty when not bound)
    pub fn to_internal_set(&self, external_id: impl Display, unwrap: bool) -> Result<RecordSet> {
        let model = if unwrap {
            self.unwrap_model()?
        } else {
            self.model.name.as_str()
        };

        Ok(match self.to_internal(external_id, unwrap)? {
            Some(id) => RecordSet::one(model, id),
            None => RecordSet::empty(model),
        })
    }

    fn find_by_external(&self, external_id: &str) -> Result<Option<BindingRecord>> {
        let conditions = [
            Condition::ExternalId(external_id.to_string()),
            Condition::BackendId(self.backend.id),
        ];
        let bindings = self.search(&conditions)?;
        let found = self.expect_unique(bindings)?;

        debug!(
            model = %self.model.name,
            external_id,
            found = found.is_some(),
            "external id lookup"
        );
        Ok(found)
    }

    // ========================================================================
    // ERP → MAGENTO
    // ========================================================================

    /// Magento id for an ERP record.
    ///
    /// With `wrap == false` the record is the binding itself and must exist.
    /// With `wrap == true` the record is the normal record; its binding under
    /// the current backend is looked up and `None` returned if there is none.
    /// A bound-less binding also yields `None`.
    pub fn to_external(&self, record: impl Into<RecordArg>, wrap: bool) -> Result<Option<String>> {
        let record_id = record.into().resolve()?;

        if wrap {
            self.unwrap_model()?;
            let conditions = [
                Condition::InternalId(record_id),
                Condition::BackendId(self.backend.id),
            ];
            let bindings = self.search(&conditions)?;
            return Ok(self
                .expect_unique(bindings)?
                .and_then(|binding| binding.external_id));
        }

        let binding = self.browse_existing(record_id)?;
        Ok(binding.external_id)
    }

    // ========================================================================
    // BIND
    // ========================================================================

    /// Link a Magento id to a binding and stamp the sync date.
    ///
    /// `0` is a valid Magento id; null, `""` and booleans are rejected. The
    /// write is tagged as connector bookkeeping so it is not exported back.
    pub fn bind(&self, external_id: impl Into<serde_json::Value>, binding: impl Into<RecordArg>) -> Result<()> {
        let external_id = ExternalId::from_value(&external_id.into())?;
        let binding_id = binding.into().resolve()?;
        if binding_id <= 0 {
            return Err(ConnectorError::PreconditionViolation(format!(
                "binding id missing, got: {}, {}",
                external_id, binding_id
            )));
        }

        // Fail before writing if the binding is gone
        self.browse_existing(binding_id)?;

        let update = BindingUpdate {
            external_id: external_id.as_str().to_string(),
            sync_date: Utc::now(),
        };
        self.store
            .write_binding(&self.model.name, binding_id, &update, WriteOrigin::Connector)?;

        debug!(
            model = %self.model.name,
            binding_id,
            external_id = %external_id,
            backend = self.backend.id,
            "bound"
        );
        Ok(())
    }

    // ========================================================================
    // UNWRAP
    // ========================================================================

    /// Id of the normal record behind a binding
    pub fn unwrap_binding(&self, binding: impl Into<RecordArg>) -> Result<RecordId> {
        let binding_id = binding.into().resolve()?;
        self.unwrap_model()?;
        let binding = self.browse_existing(binding_id)?;
        self.wrapped_id(&binding)
    }

    /// Normal record behind a binding, as a handle on the normal model
    pub fn unwrap_binding_set(&self, binding: impl Into<RecordArg>) -> Result<RecordSet> {
        let internal_id = self.unwrap_binding(binding)?;
        Ok(RecordSet::one(self.unwrap_model()?, internal_id))
    }

    /// Name of the normal model, e.g. `product.product` for
    /// `magento.product.product`
    pub fn unwrap_model(&self) -> Result<&'a str> {
        self.model.internal_model()
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn search(&self, conditions: &[Condition]) -> Result<Vec<BindingRecord>> {
        // archived bindings still count as bindings
        self.store
            .search_bindings(&self.model.name, conditions, Archived::Include)
    }

    fn browse_existing(&self, binding_id: RecordId) -> Result<BindingRecord> {
        self.store
            .browse_binding(&self.model.name, binding_id)?
            .ok_or_else(|| {
                ConnectorError::PreconditionViolation(format!(
                    "{} {} does not exist",
                    self.model.name, binding_id
                ))
            })
    }

    fn wrapped_id(&self, binding: &BindingRecord) -> Result<RecordId> {
        binding.internal_id.ok_or_else(|| {
            ConnectorError::consistency(
                &self.model.name,
                format!("binding {} wraps no record", binding.id),
            )
        })
    }

    fn expect_unique(&self, mut bindings: Vec<BindingRecord>) -> Result<Option<BindingRecord>> {
        if bindings.len() > 1 {
            let ids: Vec<RecordId> = bindings.iter().map(|b| b.id).collect();
            error!(
                model = %self.model.name,
                backend = self.backend.id,
                ?ids,
                "several bindings found for a unique key"
            );
            return Err(ConnectorError::consistency(
                &self.model.name,
                format!("Several records found: {:?}", ids),
            ));
        }
        Ok(bindings.pop())
    }
}
