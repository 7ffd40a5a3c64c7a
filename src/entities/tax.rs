// 🧾 Tax Entity - sales/purchase tax rates, read-only for the connector

use super::record::RecordId;
use serde::{Deserialize, Serialize};

// ============================================================================
// TAX USAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxUsage {
    Sale,
    Purchase,
    None,
}

impl TaxUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxUsage::Sale => "sale",
            TaxUsage::Purchase => "purchase",
            TaxUsage::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sale" => Some(TaxUsage::Sale),
            "purchase" => Some(TaxUsage::Purchase),
            "none" => Some(TaxUsage::None),
            _ => None,
        }
    }
}

// ============================================================================
// TAX RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRecord {
    pub id: RecordId,
    pub name: String,

    /// Percentage (20.0 means 20%)
    pub rate: f64,

    /// Price already includes the tax
    pub inclusive: bool,

    pub usage: TaxUsage,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TaxRecord {
    pub fn new(id: RecordId, name: &str, rate: f64, inclusive: bool, usage: TaxUsage) -> Self {
        TaxRecord {
            id,
            name: name.to_string(),
            rate,
            inclusive,
            usage,
            active: true,
        }
    }

    /// Absolute distance between this tax's rate and a target rate
    pub fn distance(&self, rate: f64) -> f64 {
        (self.rate - rate).abs()
    }
}

// ============================================================================
// TAX QUERY
// ============================================================================

/// Search criteria handed to a `TaxStore`: inclusive flag, usages, rate window
#[derive(Debug, Clone, PartialEq)]
pub struct TaxQuery {
    pub inclusive: bool,
    pub usages: Vec<TaxUsage>,
    pub min_rate: f64,
    pub max_rate: f64,
}

impl TaxQuery {
    /// Window of `rate ± tolerance`
    pub fn around(rate: f64, tolerance: f64, inclusive: bool, usages: &[TaxUsage]) -> Self {
        TaxQuery {
            inclusive,
            usages: usages.to_vec(),
            min_rate: rate - tolerance,
            max_rate: rate + tolerance,
        }
    }

    pub fn matches(&self, tax: &TaxRecord) -> bool {
        tax.active
            && tax.inclusive == self.inclusive
            && self.usages.contains(&tax.usage)
            && tax.rate >= self.min_rate
            && tax.rate <= self.max_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_usage_parse() {
        assert_eq!(TaxUsage::parse("sale"), Some(TaxUsage::Sale));
        assert_eq!(TaxUsage::parse(" Purchase "), Some(TaxUsage::Purchase));
        assert_eq!(TaxUsage::parse("adjustment"), None);
        assert_eq!(TaxUsage::Sale.as_str(), "sale");
    }

    #[test]
    fn test_tax_query_matches() {
        let query = TaxQuery::around(20.0, 0.001, false, &[TaxUsage::Sale]);

        let exact = TaxRecord::new(1, "VAT 20%", 20.0, false, TaxUsage::Sale);
        assert!(query.matches(&exact));

        let included = TaxRecord::new(2, "VAT 20% incl.", 20.0, true, TaxUsage::Sale);
        assert!(!query.matches(&included));

        let purchase = TaxRecord::new(3, "VAT 20% purchase", 20.0, false, TaxUsage::Purchase);
        assert!(!query.matches(&purchase));

        let mut archived = exact.clone();
        archived.active = false;
        assert!(!query.matches(&archived));

        let far = TaxRecord::new(4, "VAT 19.6%", 19.6, false, TaxUsage::Sale);
        assert!(!query.matches(&far));
    }
}
