use crate::error::Result;
use crate::estimator::CollectionEstimate;
use crate::ledger::TerritoryCostSource;
use crate::overrides::{CollectorOverride, CollectorSource};
use crate::period::PeriodWindow;
use crate::schema::{ExpenseType, PracticeId, PracticePlacement};
use log::{debug, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    /// Placed-weighted average of the territory's practices with history
    TerritoryAverage,
    /// Nobody in the territory has usable history
    GlobalDefault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TerritoryFallback {
    pub territory: String,
    /// Σ placed × estimated rate over practices with history
    pub actual_revenue: Decimal,
    /// Σ placed over the same practices
    pub actual_placed: Decimal,
    pub rate: Decimal,
    pub source: FallbackSource,
}

impl TerritoryFallback {
    fn global(territory: &str, default_rate: Decimal) -> Self {
        Self {
            territory: territory.to_string(),
            actual_revenue: Decimal::ZERO,
            actual_placed: Decimal::ZERO,
            rate: default_rate,
            source: FallbackSource::GlobalDefault,
        }
    }
}

/// Computes the collection rate used for practices without usable history.
///
/// Each territory's rate is `Σ(placed × rate) / Σ(placed)` over its practices
/// that do have an estimate, i.e. a placed-weighted average rather than the
/// mean of the practice rates. Territories with no such practice, or whose
/// weighted placed total is zero, get `default_rate`.
pub fn territory_fallback_rates(
    placements: &[PracticePlacement],
    estimates: &BTreeMap<PracticeId, CollectionEstimate>,
    default_rate: Decimal,
) -> BTreeMap<String, TerritoryFallback> {
    let mut sums: BTreeMap<&str, (Decimal, Decimal)> = BTreeMap::new();
    for row in placements {
        let entry = sums.entry(row.territory.as_str()).or_default();
        let Some(rate) = estimates.get(&row.practice).and_then(|e| e.rate) else {
            continue;
        };
        entry.0 += row.placed * rate;
        entry.1 += row.placed;
    }

    sums.into_iter()
        .map(|(territory, (revenue, placed))| {
            let fallback = if placed > Decimal::ZERO {
                TerritoryFallback {
                    territory: territory.to_string(),
                    actual_revenue: revenue,
                    actual_placed: placed,
                    rate: revenue / placed,
                    source: FallbackSource::TerritoryAverage,
                }
            } else {
                warn!(
                    "Territory '{}' has no practice with usable history; using default rate {}",
                    territory, default_rate
                );
                TerritoryFallback {
                    actual_revenue: revenue,
                    ..TerritoryFallback::global(territory, default_rate)
                }
            };
            (territory.to_string(), fallback)
        })
        .collect()
}

/// Looks up a territory's fallback, defaulting for territories never seen.
pub fn fallback_for(
    fallbacks: &BTreeMap<String, TerritoryFallback>,
    territory: &str,
    default_rate: Decimal,
) -> TerritoryFallback {
    fallbacks
        .get(territory)
        .cloned()
        .unwrap_or_else(|| TerritoryFallback::global(territory, default_rate))
}

/// Cost pools of one territory over a report window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TerritoryCosts {
    pub territory: String,
    pub expense: Decimal,
    pub cogs: Decimal,
    pub sample_count: u64,
    /// Collector fees carved out of `expense` when computing baseline EPS
    pub collector_cost: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CostAllocation {
    pub cogs: Decimal,
    pub sales_expense: Decimal,
    /// Reported expense per sample, collector fee included
    pub expense_per_sample: Decimal,
    /// Collector fee attributed to the practice for the window
    pub collector_cost: Decimal,
}

impl TerritoryCosts {
    /// Sums the territory's expense and COGS over every month label in the
    /// window and its collector fees over the same number of months.
    pub fn collect<C, K>(
        territory: &str,
        sample_count: u64,
        window: &PeriodWindow,
        costs: &C,
        collectors: &K,
    ) -> Result<Self>
    where
        C: TerritoryCostSource + ?Sized,
        K: CollectorSource + ?Sized,
    {
        let labels = window.month_labels();
        let mut expense = Decimal::ZERO;
        let mut cogs = Decimal::ZERO;
        for label in &labels {
            if let Some(amount) = costs.territory_cost(territory, label, ExpenseType::Expense)? {
                expense += amount;
            }
            if let Some(amount) = costs.territory_cost(territory, label, ExpenseType::Cogs)? {
                cogs += amount;
            }
        }
        let collector_cost = collectors.territory_collector_cost(territory, labels.len())?;

        debug!(
            "Territory '{}' over {}: expense {}, COGS {}, collectors {}, samples {}",
            territory, window.label, expense, cogs, collector_cost, sample_count
        );

        Ok(Self {
            territory: territory.to_string(),
            expense,
            cogs,
            sample_count,
            collector_cost,
        })
    }

    pub fn cogs_per_sample(&self) -> Decimal {
        per_sample(self.cogs, self.sample_count)
    }

    pub fn expense_per_sample(&self) -> Decimal {
        per_sample(self.expense, self.sample_count)
    }

    /// Expense per sample with collector fees removed from the pool.
    pub fn baseline_expense_per_sample(&self) -> Decimal {
        per_sample(self.expense - self.collector_cost, self.sample_count)
    }

    /// Allocates this territory's pools to a practice by sample count.
    ///
    /// COGS and sales expense are shared pro rata. The reported expense per
    /// sample starts from the collector-free baseline and, for a practice
    /// with its own collector, adds that collector's fee spread over the
    /// practice's samples.
    pub fn allocate(
        &self,
        practice_samples: u64,
        collector: Option<&CollectorOverride>,
        months: usize,
    ) -> CostAllocation {
        let samples = Decimal::from(practice_samples);
        let collector_cost = collector
            .map(|c| c.cost_for_months(months))
            .unwrap_or(Decimal::ZERO);

        let mut expense_per_sample = self.baseline_expense_per_sample();
        if collector.map(|c| c.is_collector()).unwrap_or(false) {
            expense_per_sample += per_sample(collector_cost, practice_samples);
        }

        CostAllocation {
            cogs: self.cogs_per_sample() * samples,
            sales_expense: self.expense_per_sample() * samples,
            expense_per_sample,
            collector_cost,
        }
    }
}

/// `amount / count`, or zero when there are no samples.
pub fn per_sample(amount: Decimal, count: u64) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        amount / Decimal::from(count)
    }
}

/// Sample totals per territory across a set of placements.
pub fn territory_sample_counts(placements: &[PracticePlacement]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for row in placements {
        *counts.entry(row.territory.clone()).or_insert(0) += row.sample_count;
    }
    counts
}
