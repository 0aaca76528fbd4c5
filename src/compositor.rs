use crate::estimator::CollectionEstimate;
use crate::schema::{PracticeId, PracticePlacement};
use crate::territory::{
    per_sample, CostAllocation, FallbackSource, TerritoryCosts, TerritoryFallback,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const HUNDRED: Decimal = dec!(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    PracticeHistory,
    TerritoryAverage,
    GlobalDefault,
}

impl From<FallbackSource> for RateSource {
    fn from(source: FallbackSource) -> Self {
        match source {
            FallbackSource::TerritoryAverage => RateSource::TerritoryAverage,
            FallbackSource::GlobalDefault => RateSource::GlobalDefault,
        }
    }
}

/// KPI line for one practice. All amounts are exact; rounding happens only
/// in [`AccountKpiRow::to_json_map`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccountKpiRow {
    pub practice_id: PracticeId,
    pub practice: String,
    pub territory: String,
    pub placed: Decimal,
    pub sample_count: u64,
    pub collection_rate: Decimal,
    pub rate_source: RateSource,
    /// Historical months behind the rate; 0 whenever a fallback was used
    pub periods_used: u32,
    pub revenue: Decimal,
    pub cogs: Decimal,
    /// revenue − cogs
    pub profit: Decimal,
    pub sales_expense: Decimal,
    /// revenue − cogs − sales_expense
    pub net_income: Decimal,
    /// Return on sales expense, percent
    pub ros: Decimal,
    /// Revenue per sample
    pub rps: Decimal,
    /// Billing per sample
    pub bps: Decimal,
    /// Gross profit per sample
    pub gpps: Decimal,
    /// Expense per sample
    pub eps: Decimal,
    /// Net income per sample
    pub nips: Decimal,
    pub collector: bool,
    pub collector_cost: Decimal,
}

impl AccountKpiRow {
    pub fn uses_fallback(&self) -> bool {
        self.rate_source != RateSource::PracticeHistory
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("practice".into(), Value::from(self.practice.clone()));
        map.insert("practice_id".into(), Value::from(self.practice_id.0));
        map.insert("territory".into(), Value::from(self.territory.clone()));
        map.insert("placed".into(), money(self.placed));
        map.insert("revenue".into(), money(self.revenue));
        map.insert("cogs".into(), money(self.cogs));
        map.insert("profit".into(), money(self.profit));
        map.insert("sales_expense".into(), money(self.sales_expense));
        map.insert("net_income".into(), money(self.net_income));
        map.insert("ros".into(), whole(self.ros));
        map.insert(
            "collection_pct".into(),
            Value::from(percent_label(self.collection_rate * HUNDRED, 0)),
        );
        map.insert(
            "collection_rate_source".into(),
            serde_json::to_value(self.rate_source).unwrap_or(Value::Null),
        );
        map.insert("revenue_periods".into(), Value::from(self.periods_used));
        map.insert("rps".into(), money(self.rps));
        map.insert("bps".into(), money(self.bps));
        map.insert("gpps".into(), money(self.gpps));
        map.insert("eps".into(), money(self.eps));
        map.insert("nips".into(), money(self.nips));
        map.insert(
            "collector".into(),
            Value::from(if self.collector { "Y" } else { "N" }),
        );
        map.insert("collector_cost".into(), money(self.collector_cost));
        map.insert("sample_count".into(), Value::from(self.sample_count));
        map
    }
}

/// Builds one practice row.
///
/// The practice's own estimate wins when it exists; otherwise the
/// territory fallback rate is applied and the periods count is reported
/// as zero.
pub fn compose_row(
    placement: &PracticePlacement,
    estimate: &CollectionEstimate,
    fallback: &TerritoryFallback,
    allocation: &CostAllocation,
    collector: bool,
) -> AccountKpiRow {
    let (collection_rate, rate_source, periods_used) = match estimate.rate {
        Some(rate) => (rate, RateSource::PracticeHistory, estimate.periods_used),
        None => (fallback.rate, RateSource::from(fallback.source), 0),
    };

    let samples = placement.sample_count;
    let revenue = placement.placed * collection_rate;
    let profit = revenue - allocation.cogs;
    let net_income = revenue - allocation.cogs - allocation.sales_expense;

    AccountKpiRow {
        practice_id: placement.practice,
        practice: placement.name.clone(),
        territory: placement.territory.clone(),
        placed: placement.placed,
        sample_count: samples,
        collection_rate,
        rate_source,
        periods_used,
        revenue,
        cogs: allocation.cogs,
        profit,
        sales_expense: allocation.sales_expense,
        net_income,
        ros: return_on_sales(net_income, allocation.sales_expense),
        rps: per_sample(revenue, samples),
        bps: per_sample(placement.placed, samples),
        gpps: per_sample(profit, samples),
        eps: allocation.expense_per_sample,
        nips: per_sample(net_income, samples),
        collector,
        collector_cost: allocation.collector_cost,
    }
}

/// Aggregate line for a whole report.
///
/// Ratios are recomputed from the summed numerators and denominators, never
/// averaged across rows, and net income is re-derived from the totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TotalsRow {
    pub placed: Decimal,
    pub sample_count: u64,
    pub revenue: Decimal,
    pub cogs: Decimal,
    pub profit: Decimal,
    pub sales_expense: Decimal,
    pub net_income: Decimal,
    pub ros: Decimal,
    /// Σ(placed × rate) / Σ(placed) × 100 over practices with their own
    /// history; zero when no practice has history
    pub collection_pct: Decimal,
    pub rps: Decimal,
    pub bps: Decimal,
    pub gpps: Decimal,
    pub eps: Decimal,
    pub nips: Decimal,
    /// Mean collector cost per row
    pub collector_cost: Decimal,
}

impl TotalsRow {
    pub fn from_rows(rows: &[AccountKpiRow], territory_costs: &[TerritoryCosts]) -> Self {
        let mut placed = Decimal::ZERO;
        let mut revenue = Decimal::ZERO;
        let mut cogs = Decimal::ZERO;
        let mut profit = Decimal::ZERO;
        let mut sales_expense = Decimal::ZERO;
        let mut collector_cost = Decimal::ZERO;
        let mut sample_count = 0u64;
        let mut history_revenue = Decimal::ZERO;
        let mut history_placed = Decimal::ZERO;

        for row in rows {
            placed += row.placed;
            revenue += row.revenue;
            cogs += row.cogs;
            profit += row.profit;
            sales_expense += row.sales_expense;
            collector_cost += row.collector_cost;
            sample_count += row.sample_count;

            if row.rate_source == RateSource::PracticeHistory {
                history_revenue += row.revenue;
                history_placed += row.placed;
            }
        }

        let net_income = revenue - cogs - sales_expense;

        let collection_pct = if history_placed > Decimal::ZERO {
            history_revenue / history_placed * HUNDRED
        } else {
            Decimal::ZERO
        };

        let expense_pool: Decimal = territory_costs
            .iter()
            .map(|t| t.expense - t.collector_cost)
            .sum();

        let mean_collector_cost = if rows.is_empty() {
            Decimal::ZERO
        } else {
            collector_cost / Decimal::from(rows.len() as u64)
        };

        Self {
            placed,
            sample_count,
            revenue,
            cogs,
            profit,
            sales_expense,
            net_income,
            ros: return_on_sales(net_income, sales_expense),
            collection_pct,
            rps: per_sample(revenue, sample_count),
            bps: per_sample(placed, sample_count),
            gpps: per_sample(profit, sample_count),
            eps: per_sample(expense_pool, sample_count),
            nips: per_sample(net_income, sample_count),
            collector_cost: mean_collector_cost,
        }
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("practice".into(), Value::from("TOTAL"));
        map.insert("territory".into(), Value::from(""));
        map.insert("placed".into(), money(self.placed));
        map.insert("revenue".into(), money(self.revenue));
        map.insert("cogs".into(), money(self.cogs));
        map.insert("profit".into(), money(self.profit));
        map.insert("sales_expense".into(), money(self.sales_expense));
        map.insert("net_income".into(), money(self.net_income));
        map.insert("ros".into(), whole(self.ros));
        map.insert(
            "collection_pct".into(),
            Value::from(percent_label(self.collection_pct, 1)),
        );
        map.insert("rps".into(), money(self.rps));
        map.insert("bps".into(), money(self.bps));
        map.insert("gpps".into(), money(self.gpps));
        map.insert("eps".into(), money(self.eps));
        map.insert("nips".into(), money(self.nips));
        map.insert("collector".into(), Value::from(""));
        map.insert("collector_cost".into(), money(self.collector_cost));
        map.insert("sample_count".into(), Value::from(self.sample_count));
        map
    }
}

fn return_on_sales(net_income: Decimal, sales_expense: Decimal) -> Decimal {
    if sales_expense > Decimal::ZERO {
        net_income / sales_expense * HUNDRED
    } else {
        Decimal::ZERO
    }
}

/// Rounds a currency amount to cents, halves away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount rounded to cents as a JSON number.
pub(crate) fn money(amount: Decimal) -> Value {
    Value::from(round_currency(amount).to_f64().unwrap_or(0.0))
}

fn whole(amount: Decimal) -> Value {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Value::from(rounded.to_i64().unwrap_or(0))
}

fn percent_label(pct: Decimal, dp: u32) -> String {
    let rounded = pct
        .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    format!("{}%", rounded)
}
