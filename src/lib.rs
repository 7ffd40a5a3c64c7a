// Magento Connector - Core Library
// Identifier binder and tax matcher shared by every import/export flow

pub mod binder;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod memory;
pub mod storage;
pub mod tax;

// Re-export commonly used types
pub use binder::Binder;
pub use config::{ConnectorConfig, TaxConfig, CONFIG_ENV_VAR};
pub use db::{
    Event, SqliteStore,
    setup_database, insert_binding, set_binding_active, get_binding, search_bindings,
    write_binding, insert_tax, insert_taxes, search_taxes, load_taxes_csv,
    insert_event, get_events_for_entity,
};
pub use entities::{
    Backend,
    BindingModel, BindingRecord, ExternalId, Relation, DEFAULT_INTERNAL_FIELD,
    RecordArg, RecordId, RecordSet,
    TaxQuery, TaxRecord, TaxUsage,
};
pub use error::{ConnectorError, Result};
pub use memory::MemoryStore;
pub use storage::{Archived, BindingStore, BindingUpdate, Condition, TaxStore, WriteOrigin};
pub use tax::TaxMatcher;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
