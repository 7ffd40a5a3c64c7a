// 🌐 Backend Entity - one configured Magento storefront connection
//
// Every binder holds exactly one backend; all binding lookups are scoped to it.

use super::record::RecordId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Row id of the backend record, stored as `backend_id` on bindings
    pub id: RecordId,

    /// Display name (e.g., "Main Store")
    pub name: String,

    /// Base URL of the Magento API
    #[serde(default)]
    pub location: String,

    /// Magento API version (e.g., "2.0")
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "2.0".to_string()
}

impl Backend {
    pub fn new(id: RecordId, name: &str, location: &str) -> Self {
        Backend {
            id,
            name: name.to_string(),
            location: location.to_string(),
            version: default_version(),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::new(1, "Magento", "http://localhost")
    }
}
