//! Historical collection-rate estimation.
//!
//! Recent placements have not finished collecting, so a practice's
//! realizable rate is estimated from older months: skip the most recent
//! months, take the first month with both charges and payments as the
//! anchor, then average it with the usable months just older than it.

use crate::config::EstimatorConfig;
use crate::error::{KpiError, Result};
use crate::ledger::BillingLedger;
use crate::schema::{LedgerTotals, PracticeId};
use crate::utils::{last_day_of_month, shift_months};
use chrono::{Datelike, NaiveDate};
use log::debug;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CollectionEstimate {
    pub practice: PracticeId,
    pub as_of: NaiveDate,
    /// Mean of the per-month collected/placed ratios; `None` means no usable
    /// history and the caller must fall back.
    pub rate: Option<Decimal>,
    pub periods_used: u32,
    /// First day of the anchor month, when one was found
    pub anchor_month: Option<NaiveDate>,
}

impl CollectionEstimate {
    pub fn none(practice: PracticeId, as_of: NaiveDate) -> Self {
        Self {
            practice,
            as_of,
            rate: None,
            periods_used: 0,
            anchor_month: None,
        }
    }

    pub fn has_history(&self) -> bool {
        self.rate.is_some()
    }
}

/// Per-request memo of monthly ledger totals, so a practice/month pair is
/// fetched from the ledger at most once while a report is built.
pub struct MonthlyTotalsCache<'a, L: BillingLedger + ?Sized> {
    ledger: &'a L,
    months: HashMap<(PracticeId, NaiveDate), LedgerTotals>,
    queries: usize,
}

impl<'a, L: BillingLedger + ?Sized> MonthlyTotalsCache<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self {
            ledger,
            months: HashMap::new(),
            queries: 0,
        }
    }

    /// Totals for the calendar month starting at `month_start`.
    pub fn month_totals(
        &mut self,
        practice: PracticeId,
        month_start: NaiveDate,
    ) -> Result<LedgerTotals> {
        if let Some(totals) = self.months.get(&(practice, month_start)) {
            return Ok(*totals);
        }

        let month_end = last_day_of_month(month_start.year(), month_start.month())?;
        let totals = self
            .ledger
            .practice_totals(practice, month_start, month_end)?;
        self.queries += 1;
        self.months.insert((practice, month_start), totals);
        Ok(totals)
    }

    /// Number of ledger queries actually issued.
    pub fn queries_issued(&self) -> usize {
        self.queries
    }
}

pub struct CollectionRateEstimator {
    config: EstimatorConfig,
}

impl CollectionRateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn estimate<L: BillingLedger + ?Sized>(
        &self,
        cache: &mut MonthlyTotalsCache<'_, L>,
        practice: PracticeId,
        as_of: NaiveDate,
    ) -> Result<CollectionEstimate> {
        if self.config.max_periods == 0 {
            return Err(KpiError::InvalidConfig(
                "max_periods must be at least 1".to_string(),
            ));
        }

        let skip = self.config.skip_recent_months;
        let lookback = self.config.max_lookback_months;

        let mut anchor: Option<(u32, NaiveDate, Decimal)> = None;
        for offset in skip..=lookback {
            let month = shift_months(as_of, -(offset as i32))?;
            let totals = cache.month_totals(practice, month)?;
            if let Some(ratio) = totals.collection_ratio() {
                anchor = Some((offset, month, ratio));
                break;
            }
        }

        let Some((anchor_offset, anchor_month, anchor_ratio)) = anchor else {
            debug!(
                "Practice {} has no usable month between {} and {} months before {}",
                practice, skip, lookback, as_of
            );
            return Ok(CollectionEstimate::none(practice, as_of));
        };

        let mut ratios = vec![anchor_ratio];
        let trailing_end = anchor_offset + self.config.max_periods;
        for offset in (anchor_offset + 1)..trailing_end {
            if ratios.len() as u32 >= self.config.max_periods {
                break;
            }
            let month = shift_months(as_of, -(offset as i32))?;
            let totals = cache.month_totals(practice, month)?;
            if let Some(ratio) = totals.collection_ratio() {
                ratios.push(ratio);
            }
        }

        let periods_used = ratios.len() as u32;
        let sum: Decimal = ratios.iter().sum();
        let rate = sum / Decimal::from(periods_used);

        debug!(
            "Practice {} estimate as of {}: rate {} over {} periods (anchor {})",
            practice, as_of, rate, periods_used, anchor_month
        );

        Ok(CollectionEstimate {
            practice,
            as_of,
            rate: Some(rate),
            periods_used,
            anchor_month: Some(anchor_month),
        })
    }
}

impl Default for CollectionRateEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::schema::{FinancialClassTotals, PracticePlacement};
    use rust_decimal_macros::dec;
    use std::cell::Cell;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn month_back(as_of: NaiveDate, n: i32) -> NaiveDate {
        shift_months(as_of, -n).unwrap()
    }

    /// Seeds one sample in the month `n` months before `as_of`.
    fn seed(
        ledger: &mut InMemoryLedger,
        practice: PracticeId,
        as_of: NaiveDate,
        n: i32,
        placed: Decimal,
        collected: Decimal,
    ) {
        let day = month_back(as_of, n).with_day(10).unwrap();
        ledger
            .record_sample(practice, day, placed, collected, "Commercial")
            .unwrap();
    }

    #[test]
    fn test_contiguous_history_uses_six_periods_from_anchor() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Contiguous", "Alpha");
        for n in 1..=14 {
            seed(&mut ledger, p, as_of, n, dec!(1000), dec!(800));
        }

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.periods_used, 6);
        assert_eq!(estimate.anchor_month, Some(date(2025, 3, 1)));
        assert_eq!(estimate.rate, Some(dec!(0.8)));
    }

    #[test]
    fn test_no_history_yields_no_estimate() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Brand New", "Alpha");
        // Only immature months and one far outside the lookback horizon.
        seed(&mut ledger, p, as_of, 1, dec!(1000), dec!(100));
        seed(&mut ledger, p, as_of, 2, dec!(1000), dec!(100));
        seed(&mut ledger, p, as_of, 13, dec!(1000), dec!(900));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.rate, None);
        assert_eq!(estimate.periods_used, 0);
        assert!(!estimate.has_history());
    }

    #[test]
    fn test_unusable_month_cannot_anchor() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Slow Payer", "Alpha");
        // Billed but nothing collected yet, then collected with no charges.
        seed(&mut ledger, p, as_of, 3, dec!(1000), dec!(0));
        seed(&mut ledger, p, as_of, 4, dec!(0), dec!(250));
        seed(&mut ledger, p, as_of, 5, dec!(1000), dec!(600));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.anchor_month, Some(date(2025, 1, 1)));
        assert_eq!(estimate.rate, Some(dec!(0.6)));
        assert_eq!(estimate.periods_used, 1);
    }

    #[test]
    fn test_trailing_scan_reaches_past_lookback() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Lapsed", "Alpha");
        seed(&mut ledger, p, as_of, 3, dec!(1000), dec!(0));
        seed(&mut ledger, p, as_of, 12, dec!(1000), dec!(800));
        seed(&mut ledger, p, as_of, 14, dec!(1000), dec!(700));
        // Six months beyond the anchor, one past the trailing span.
        seed(&mut ledger, p, as_of, 18, dec!(1000), dec!(100));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.anchor_month, Some(date(2024, 6, 1)));
        assert_eq!(estimate.rate, Some(dec!(0.75)));
        assert_eq!(estimate.periods_used, 2);
    }

    #[test]
    fn test_single_anchor_month() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("A", "Alpha");
        seed(&mut ledger, p, as_of, 5, dec!(10000), dec!(9000));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.rate, Some(dec!(0.9)));
        assert_eq!(estimate.periods_used, 1);
        assert_eq!(estimate.anchor_month, Some(date(2025, 1, 1)));
    }

    #[test]
    fn test_gaps_after_anchor_are_skipped_not_terminal() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Gappy", "Bravo");
        seed(&mut ledger, p, as_of, 4, dec!(1000), dec!(500)); // anchor
        seed(&mut ledger, p, as_of, 5, dec!(1000), dec!(0)); // nothing collected
        seed(&mut ledger, p, as_of, 7, dec!(1000), dec!(700));
        seed(&mut ledger, p, as_of, 9, dec!(1000), dec!(900));
        // Outside the trailing span of five months beyond the anchor.
        seed(&mut ledger, p, as_of, 10, dec!(1000), dec!(100));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.periods_used, 3);
        assert_eq!(estimate.rate, Some(dec!(0.7)));
        assert_eq!(estimate.anchor_month, Some(date(2025, 2, 1)));
    }

    #[test]
    fn test_mean_is_unweighted() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Uneven", "Bravo");
        seed(&mut ledger, p, as_of, 3, dec!(100), dec!(100));
        seed(&mut ledger, p, as_of, 4, dec!(10000), dec!(5000));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.rate, Some(dec!(0.75)));
        assert_eq!(estimate.periods_used, 2);
    }

    #[test]
    fn test_december_rollover() {
        let as_of = date(2025, 3, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Winter", "Charlie");
        ledger
            .record_sample(p, date(2024, 12, 31), dec!(200), dec!(150), "Commercial")
            .unwrap();
        ledger
            .record_sample(p, date(2025, 1, 1), dec!(999), dec!(999), "Commercial")
            .unwrap();

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.anchor_month, Some(date(2024, 12, 1)));
        assert_eq!(estimate.rate, Some(dec!(0.75)));
    }

    #[test]
    fn test_configurable_constants() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Tunable", "Alpha");
        for n in 1..=8 {
            seed(&mut ledger, p, as_of, n, dec!(100), dec!(50));
        }

        let estimator = CollectionRateEstimator::new(EstimatorConfig {
            skip_recent_months: 1,
            max_lookback_months: 12,
            max_periods: 2,
        });
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let estimate = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(estimate.anchor_month, Some(date(2025, 5, 1)));
        assert_eq!(estimate.periods_used, 2);
    }

    #[test]
    fn test_cache_avoids_repeat_queries() {
        let as_of = date(2025, 6, 1);
        let mut ledger = InMemoryLedger::new();
        let p = ledger.register_practice("Cached", "Alpha");
        seed(&mut ledger, p, as_of, 3, dec!(100), dec!(90));

        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let first = estimator.estimate(&mut cache, p, as_of).unwrap();
        let after_first = cache.queries_issued();
        let second = estimator.estimate(&mut cache, p, as_of).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.queries_issued(), after_first);
        // Anchor at offset 3 plus five trailing months.
        assert_eq!(after_first, 6);
    }

    struct FailingLedger {
        calls: Cell<usize>,
        fail_on: usize,
    }

    impl BillingLedger for FailingLedger {
        fn practice_totals(
            &self,
            _practice: PracticeId,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<LedgerTotals> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            if call == self.fail_on {
                return Err(KpiError::DataSource("connection reset".to_string()));
            }
            Ok(LedgerTotals::default())
        }

        fn placements(
            &self,
            _territory: Option<&str>,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PracticePlacement>> {
            Ok(Vec::new())
        }

        fn financial_class_totals(
            &self,
            _practice: PracticeId,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<FinancialClassTotals>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_ledger_errors_propagate() {
        let ledger = FailingLedger {
            calls: Cell::new(0),
            fail_on: 4,
        };
        let estimator = CollectionRateEstimator::default();
        let mut cache = MonthlyTotalsCache::new(&ledger);
        let err = estimator
            .estimate(&mut cache, PracticeId(1), date(2025, 6, 1))
            .unwrap_err();

        assert!(matches!(err, KpiError::DataSource(_)));
        assert_eq!(ledger.calls.get(), 4);
    }
}
