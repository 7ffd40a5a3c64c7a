// 🧾 Tax Matcher - find the sales tax behind a rate reported by Magento
//
// Two tiers: a tight window first, then a wider one. Stored percentages
// like 19.999 must still match 20.0, and rates rounded by a different data
// source must not fail the import. The wide tier may pick a nearby, unintended
// rate; callers that care should check the returned rate.

use crate::config::TaxConfig;
use crate::entities::{TaxQuery, TaxRecord};
use crate::error::Result;
use crate::storage::TaxStore;
use tracing::{debug, warn};

pub struct TaxMatcher<'a, S: TaxStore> {
    store: &'a S,
    config: TaxConfig,
}

impl<'a, S: TaxStore> TaxMatcher<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_config(store, TaxConfig::default())
    }

    pub fn with_config(store: &'a S, config: TaxConfig) -> Self {
        TaxMatcher { store, config }
    }

    /// Tax for `rate` (a percentage), or `None` when nothing is close enough.
    ///
    /// Among candidates of the same tier the smallest absolute difference
    /// wins; ties keep store order (ascending id).
    pub fn find_tax(&self, rate: f64, inclusive: bool) -> Result<Option<TaxRecord>> {
        for tolerance in [self.config.tolerance, self.config.fallback_tolerance] {
            if let Some(tax) = self.closest_within(rate, inclusive, tolerance)? {
                debug!(rate, inclusive, tolerance, tax = %tax.name, "tax matched");
                return Ok(Some(tax));
            }
        }

        warn!(rate, inclusive, "no tax found for rate");
        Ok(None)
    }

    fn closest_within(&self, rate: f64, inclusive: bool, tolerance: f64) -> Result<Option<TaxRecord>> {
        let query = TaxQuery::around(rate, tolerance, inclusive, &self.config.usages);
        let candidates = self.store.search_taxes(&query)?;

        // min_by keeps the first of equal elements
        Ok(candidates
            .into_iter()
            .min_by(|a, b| a.distance(rate).total_cmp(&b.distance(rate))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_taxes, SqliteStore};
    use crate::entities::TaxUsage;
    use crate::memory::MemoryStore;

    fn store_with(taxes: &[TaxRecord]) -> MemoryStore {
        let store = MemoryStore::new();
        for tax in taxes {
            store.insert_tax(tax.clone());
        }
        store
    }

    #[test]
    fn test_exact_rate_matches_first_tier() {
        let store = store_with(&[
            TaxRecord::new(1, "VAT 20%", 20.0, false, TaxUsage::Sale),
            TaxRecord::new(2, "VAT 5.5%", 5.5, false, TaxUsage::Sale),
        ]);
        let matcher = TaxMatcher::new(&store);

        for (rate, name) in [(20.0, "VAT 20%"), (5.5, "VAT 5.5%")] {
            let tax = matcher.find_tax(rate, false).unwrap().unwrap();
            assert_eq!(tax.name, name);
        }
    }

    #[test]
    fn test_near_rate_matches_only_second_tier() {
        let store = store_with(&[TaxRecord::new(1, "VAT 20%", 20.0, false, TaxUsage::Sale)]);
        let matcher = TaxMatcher::new(&store);

        // Tier 1 misses
        assert!(matcher.closest_within(20.005, false, 0.001).unwrap().is_none());

        // Tier 2 hits
        let tax = matcher.find_tax(20.005, false).unwrap().unwrap();
        assert_eq!(tax.id, 1);
    }

    #[test]
    fn test_no_tax_within_fallback_window() {
        let store = store_with(&[
            TaxRecord::new(1, "VAT 20%", 20.0, false, TaxUsage::Sale),
            TaxRecord::new(2, "VAT 20% incl.", 20.0, true, TaxUsage::Sale),
        ]);
        let matcher = TaxMatcher::new(&store);

        assert!(matcher.find_tax(20.02, false).unwrap().is_none());
        assert!(matcher.find_tax(20.02, true).unwrap().is_none());
        assert!(matcher.find_tax(7.0, false).unwrap().is_none());
    }

    #[test]
    fn test_inclusive_flag_must_match() {
        let store = store_with(&[TaxRecord::new(1, "VAT 20%", 20.0, false, TaxUsage::Sale)]);
        let matcher = TaxMatcher::new(&store);

        assert!(matcher.find_tax(20.0, true).unwrap().is_none());
    }

    #[test]
    fn test_purchase_taxes_ignored() {
        let store = store_with(&[TaxRecord::new(1, "VAT 20% purchase", 20.0, false, TaxUsage::Purchase)]);
        let matcher = TaxMatcher::new(&store);

        assert!(matcher.find_tax(20.0, false).unwrap().is_none());
    }

    #[test]
    fn test_closest_candidate_wins() {
        let store = store_with(&[
            TaxRecord::new(1, "VAT 19.995%", 19.995, false, TaxUsage::Sale),
            TaxRecord::new(2, "VAT 20.003%", 20.003, false, TaxUsage::Sale),
        ]);
        let matcher = TaxMatcher::new(&store);

        // Both in the wide window, the second is closer
        let tax = matcher.find_tax(20.004, false).unwrap().unwrap();
        assert_eq!(tax.id, 2);
    }

    #[test]
    fn test_equal_distance_keeps_store_order() {
        let store = store_with(&[
            TaxRecord::new(2, "VAT 20% B", 20.0, false, TaxUsage::Sale),
            TaxRecord::new(1, "VAT 20% A", 20.0, false, TaxUsage::Sale),
        ]);
        let matcher = TaxMatcher::new(&store);

        let tax = matcher.find_tax(20.0, false).unwrap().unwrap();
        assert_eq!(tax.id, 1);
    }

    #[test]
    fn test_custom_tolerances() {
        let store = store_with(&[TaxRecord::new(1, "VAT 20%", 20.0, false, TaxUsage::Sale)]);
        let config = TaxConfig {
            tolerance: 0.001,
            fallback_tolerance: 0.1,
            usages: vec![TaxUsage::Sale],
        };
        let matcher = TaxMatcher::with_config(&store, config);

        assert_eq!(matcher.find_tax(20.05, false).unwrap().unwrap().id, 1);
    }

    #[test]
    fn test_matcher_over_sqlite() {
        let store = SqliteStore::in_memory().unwrap();
        insert_taxes(
            &store.connection(),
            &[
                TaxRecord::new(0, "VAT 19.6%", 19.6, true, TaxUsage::Sale),
                TaxRecord::new(0, "VAT 20%", 19.999, true, TaxUsage::Sale),
            ],
        )
        .unwrap();

        let matcher = TaxMatcher::new(&store);
        let tax = matcher.find_tax(20.0, true).unwrap().unwrap();
        assert_eq!(tax.name, "VAT 20%");
    }
}
