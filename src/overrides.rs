use crate::error::Result;
use crate::schema::PracticeId;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-practice third-party collector arrangement.
///
/// A practice that uses an outside collector carries that collector's
/// monthly fee on top of the territory's baseline expense per sample, and
/// the fee is carved out of the territory expense pool so it is not charged
/// to everyone else as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CollectorOverride {
    pub practice: PracticeId,
    pub territory: String,

    #[schemars(description = "Collector name. Absent when the practice collects in-house.")]
    pub collector: Option<String>,

    #[schemars(description = "Fee paid to the collector per month")]
    pub monthly_cost: Decimal,
}

impl CollectorOverride {
    pub fn is_collector(&self) -> bool {
        self.collector
            .as_deref()
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
    }

    /// Collector fee for a window spanning `months` calendar months.
    pub fn cost_for_months(&self, months: usize) -> Decimal {
        if self.is_collector() {
            self.monthly_cost * Decimal::from(months as u64)
        } else {
            Decimal::ZERO
        }
    }
}

pub trait CollectorSource {
    fn collector_for(&self, practice: PracticeId) -> Result<Option<CollectorOverride>>;

    fn collectors_in_territory(&self, territory: &str) -> Result<Vec<CollectorOverride>>;

    /// Total collector fees carved out of `territory`'s expense pool.
    fn territory_collector_cost(&self, territory: &str, months: usize) -> Result<Decimal> {
        Ok(self
            .collectors_in_territory(territory)?
            .iter()
            .map(|c| c.cost_for_months(months))
            .sum())
    }
}
