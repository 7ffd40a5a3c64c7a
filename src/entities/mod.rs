// Entity Models
//
// Plain data carried between the binder, the tax matcher and the stores:
// - Binding records and the static description of binding models
// - The backend a binder is scoped to
// - Tax records
// - Record handles (ids, one-record sets)

pub mod backend;
pub mod binding;
pub mod record;
pub mod tax;

pub use backend::Backend;
pub use binding::{BindingModel, BindingRecord, ExternalId, Relation, DEFAULT_INTERNAL_FIELD};
pub use record::{RecordArg, RecordId, RecordSet};
pub use tax::{TaxQuery, TaxRecord, TaxUsage};
