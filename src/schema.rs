use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate key for a practice. Names change and collide across data
/// sources, so every join goes through this id instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct PracticeId(pub u32);

impl fmt::Display for PracticeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Practice {
    pub id: PracticeId,
    #[schemars(description = "Display name. Mutable; not used as a key.")]
    pub name: String,
    #[schemars(description = "The single territory this practice belongs to (e.g. 'Alpha')")]
    pub territory: String,
}

/// One billed sample/claim. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingRecord {
    pub practice: PracticeId,
    pub placement_date: NaiveDate,
    #[schemars(description = "Charges billed for this sample")]
    pub placed: Decimal,
    #[schemars(description = "Payments received against this sample so far")]
    pub collected: Decimal,
    pub financial_class: String,
}

/// Aggregate of billing records over some practice/date-range slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerTotals {
    pub placed: Decimal,
    pub collected: Decimal,
    pub sample_count: u64,
}

impl LedgerTotals {
    pub fn add_record(&mut self, record: &BillingRecord) {
        self.placed += record.placed;
        self.collected += record.collected;
        self.sample_count += 1;
    }

    /// A month counts towards a collection estimate only when both sides
    /// are strictly positive.
    pub fn is_usable(&self) -> bool {
        self.placed > Decimal::ZERO && self.collected > Decimal::ZERO
    }

    pub fn collection_ratio(&self) -> Option<Decimal> {
        if self.is_usable() {
            Some(self.collected / self.placed)
        } else {
            None
        }
    }
}

/// Placed amount and sample count for one practice within a report window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PracticePlacement {
    pub practice: PracticeId,
    pub name: String,
    pub territory: String,
    pub placed: Decimal,
    pub sample_count: u64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum ExpenseType {
    #[serde(rename = "Expense")]
    #[schemars(description = "Sales/operating expense booked against the territory")]
    Expense,

    #[serde(rename = "COGS")]
    #[schemars(description = "Cost of goods sold booked against the territory")]
    Cogs,
}

impl ExpenseType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "expense" | "expenses" => Some(ExpenseType::Expense),
            "cogs" => Some(ExpenseType::Cogs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TerritoryCostEntry {
    pub territory: String,
    #[schemars(description = "Month key in '<Month> <YYYY>' form, e.g. 'June 2025'")]
    pub month_label: String,
    pub expense_type: ExpenseType,
    pub amount: Decimal,
}

/// Company-wide profit and loss lines, one amount per metric and month.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum PlMetric {
    Revenue,
    #[serde(rename = "COGS")]
    Cogs,
    Expense,
    #[serde(rename = "Net Operating Income")]
    NetOperatingIncome,
    #[schemars(description = "Charges placed during the month")]
    Placed,
}

impl PlMetric {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_lowercase().as_str() {
            "revenue" => Some(PlMetric::Revenue),
            "cogs" => Some(PlMetric::Cogs),
            "expense" | "expenses" => Some(PlMetric::Expense),
            "net operating income" => Some(PlMetric::NetOperatingIncome),
            "placed" => Some(PlMetric::Placed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlEntry {
    pub metric: PlMetric,
    #[schemars(description = "Month key in '<Month> <YYYY>' form, e.g. 'June 2025'")]
    pub month_label: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FinancialClassTotals {
    pub financial_class: String,
    pub sample_count: u64,
    pub placed: Decimal,
    pub collected: Decimal,
}
