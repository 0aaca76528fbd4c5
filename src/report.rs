use crate::compositor::{compose_row, money, round_currency, AccountKpiRow, TotalsRow};
use crate::config::ReportConfig;
use crate::error::Result;
use crate::estimator::{CollectionEstimate, CollectionRateEstimator, MonthlyTotalsCache};
use crate::ledger::{BillingLedger, PlSource, TerritoryCostSource};
use crate::overrides::CollectorSource;
use crate::period::{resolve_period, PeriodWindow};
use crate::schema::{PlMetric, PracticeId, PracticePlacement};
use crate::territory::{
    fallback_for, territory_fallback_rates, territory_sample_counts, TerritoryCosts,
    TerritoryFallback,
};
use crate::utils::last_day_of_month;
use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// The three external collaborators a report reads from.
#[derive(Clone, Copy)]
pub struct ReportSources<'a> {
    pub ledger: &'a dyn BillingLedger,
    pub costs: &'a dyn TerritoryCostSource,
    pub collectors: &'a dyn CollectorSource,
}

impl<'a> ReportSources<'a> {
    pub fn new(
        ledger: &'a dyn BillingLedger,
        costs: &'a dyn TerritoryCostSource,
        collectors: &'a dyn CollectorSource,
    ) -> Self {
        Self {
            ledger,
            costs,
            collectors,
        }
    }

    /// For a backend that implements every seam itself.
    pub fn from_store<S>(store: &'a S) -> Self
    where
        S: BillingLedger + TerritoryCostSource + CollectorSource,
    {
        Self::new(store, store, store)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReportRequest {
    pub period_token: String,
    /// Reference date for relative tokens such as "ytd"
    pub today: NaiveDate,
    /// Restrict the report to one territory; `None` means all
    #[serde(default)]
    pub territory: Option<String>,
}

impl ReportRequest {
    pub fn new(period_token: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            period_token: period_token.into(),
            today,
            territory: None,
        }
    }

    pub fn for_territory(mut self, territory: impl Into<String>) -> Self {
        self.territory = Some(territory.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccountReport {
    pub window: PeriodWindow,
    pub accounts: Vec<AccountKpiRow>,
    pub totals: TotalsRow,
    pub territory_costs: Vec<TerritoryCosts>,
    pub fallbacks: BTreeMap<String, TerritoryFallback>,
}

impl AccountReport {
    /// Computes the account table for one request.
    ///
    /// Either every row is produced or the first data-source error is
    /// returned; no partially populated report escapes.
    pub fn build(
        sources: ReportSources<'_>,
        request: &ReportRequest,
        config: &ReportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let window = resolve_period(&request.period_token, request.today)?;

        info!(
            "Building account report for {} ({} to {}), territory {:?}",
            window.label, window.start, window.end, request.territory
        );

        let mut placements = sources.ledger.placements(
            request.territory.as_deref(),
            window.start,
            window.end,
        )?;
        placements.sort_by(|a, b| {
            (&a.territory, &a.name, a.practice).cmp(&(&b.territory, &b.name, b.practice))
        });

        let estimator = CollectionRateEstimator::new(config.estimator.clone());
        let mut cache = MonthlyTotalsCache::new(sources.ledger);
        let estimates = estimate_all(&estimator, &mut cache, &placements, window.start)?;
        debug!(
            "Estimated {} practices with {} ledger queries",
            estimates.len(),
            cache.queries_issued()
        );

        let default_rate = config.default_collection_rate;
        let fallbacks = territory_fallback_rates(&placements, &estimates, default_rate);

        let months = window.months().len();
        let mut costs_by_territory = BTreeMap::new();
        for (territory, samples) in territory_sample_counts(&placements) {
            let costs = TerritoryCosts::collect(
                &territory,
                samples,
                &window,
                sources.costs,
                sources.collectors,
            )?;
            costs_by_territory.insert(territory, costs);
        }

        let mut accounts = Vec::with_capacity(placements.len());
        for placement in &placements {
            let estimate = estimates
                .get(&placement.practice)
                .cloned()
                .unwrap_or_else(|| CollectionEstimate::none(placement.practice, window.start));
            let fallback = fallback_for(&fallbacks, &placement.territory, default_rate);
            let collector = sources.collectors.collector_for(placement.practice)?;
            let allocation = costs_by_territory
                .get(&placement.territory)
                .map(|t| t.allocate(placement.sample_count, collector.as_ref(), months))
                .unwrap_or_default();
            let is_collector = collector.as_ref().map(|c| c.is_collector()).unwrap_or(false);

            accounts.push(compose_row(
                placement,
                &estimate,
                &fallback,
                &allocation,
                is_collector,
            ));
        }

        let territory_costs: Vec<TerritoryCosts> = costs_by_territory.into_values().collect();
        let totals = TotalsRow::from_rows(&accounts, &territory_costs);

        info!(
            "Account report for {}: {} practices, revenue {}, net income {}",
            window.label,
            accounts.len(),
            round_currency(totals.revenue),
            round_currency(totals.net_income)
        );

        Ok(Self {
            window,
            accounts,
            totals,
            territory_costs,
            fallbacks,
        })
    }

    /// Presentation form: flat rows rounded once, plus window metadata.
    pub fn to_json(&self) -> Value {
        let accounts: Vec<Value> = self
            .accounts
            .iter()
            .map(|row| Value::Object(row.to_json_map()))
            .collect();

        json!({
            "accounts": accounts,
            "totals": Value::Object(self.totals.to_json_map()),
            "period_type": self.window.token,
            "period_label": self.window.label,
            "start_date": self.window.start.to_string(),
            "end_date": self.window.end.to_string(),
        })
    }
}

fn estimate_all<L: BillingLedger + ?Sized>(
    estimator: &CollectionRateEstimator,
    cache: &mut MonthlyTotalsCache<'_, L>,
    placements: &[PracticePlacement],
    as_of: NaiveDate,
) -> Result<BTreeMap<PracticeId, CollectionEstimate>> {
    let mut estimates = BTreeMap::new();
    for placement in placements {
        if estimates.contains_key(&placement.practice) {
            continue;
        }
        let estimate = estimator.estimate(cache, placement.practice, as_of)?;
        estimates.insert(placement.practice, estimate);
    }
    Ok(estimates)
}

/// Portfolio health counts over an account report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccountMetrics {
    /// Practices priced with a fallback rate because they have no history
    pub new_accounts: usize,
    pub total_accounts: usize,
    pub positive_accounts: usize,
    /// Net income of zero counts as negative
    pub negative_accounts: usize,
    pub total_net_income: Decimal,
    pub total_sales_expense: Decimal,
    pub period_type: String,
}

impl AccountMetrics {
    pub fn from_report(report: &AccountReport) -> Self {
        let new_accounts = report.accounts.iter().filter(|r| r.uses_fallback()).count();
        let positive_accounts = report
            .accounts
            .iter()
            .filter(|r| r.net_income > Decimal::ZERO)
            .count();

        Self {
            new_accounts,
            total_accounts: report.accounts.len(),
            positive_accounts,
            negative_accounts: report.accounts.len() - positive_accounts,
            total_net_income: report.totals.net_income,
            total_sales_expense: report.totals.sales_expense,
            period_type: report.window.token.clone(),
        }
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("new_accounts".into(), Value::from(self.new_accounts));
        map.insert("total_accounts".into(), Value::from(self.total_accounts));
        map.insert("positive_accounts".into(), Value::from(self.positive_accounts));
        map.insert("negative_accounts".into(), Value::from(self.negative_accounts));
        map.insert("total_net_income".into(), money(self.total_net_income));
        map.insert("total_sales_expense".into(), money(self.total_sales_expense));
        map.insert("period_type".into(), Value::from(self.period_type.clone()));
        map
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FinancialClassBreakdown {
    pub financial_class: String,
    pub sample_count: u64,
    pub placed: Decimal,
    pub collected: Decimal,
    /// collected / placed × 100, zero when nothing was placed
    pub collection_pct: Decimal,
}

/// Splits one practice's window activity by payer financial class, largest
/// placed amount first.
pub fn financial_class_breakdown<L: BillingLedger + ?Sized>(
    ledger: &L,
    practice: PracticeId,
    window: &PeriodWindow,
) -> Result<Vec<FinancialClassBreakdown>> {
    let mut rows: Vec<FinancialClassBreakdown> = ledger
        .financial_class_totals(practice, window.start, window.end)?
        .into_iter()
        .map(|t| {
            let collection_pct = if t.placed > Decimal::ZERO {
                t.collected / t.placed * dec!(100)
            } else {
                Decimal::ZERO
            };
            FinancialClassBreakdown {
                financial_class: t.financial_class,
                sample_count: t.sample_count,
                placed: t.placed,
                collected: t.collected,
                collection_pct,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.placed
            .cmp(&a.placed)
            .then_with(|| a.financial_class.cmp(&b.financial_class))
    });
    Ok(rows)
}

/// Revenue and operating income for one month of the company P&L.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyPerformance {
    pub month_label: String,
    pub revenue: Decimal,
    pub income: Decimal,
}

/// Company-wide overview for a window, read from the consolidated P&L.
///
/// Amounts are summed over every month the window touches, and `days`
/// counts those whole months, since P&L figures are booked per month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompanySummary {
    pub window: PeriodWindow,
    pub revenue: Decimal,
    pub cogs: Decimal,
    pub expenses: Decimal,
    pub net_operating_income: Decimal,
    pub placed: Decimal,
    pub days: u32,
    /// Placed per day
    pub spd: Decimal,
    /// Revenue per placed dollar; the P&L carries no sample count
    pub bps: Decimal,
    pub rps: Decimal,
    pub monthly: Vec<MonthlyPerformance>,
}

impl CompanySummary {
    pub fn build<P: PlSource + ?Sized>(window: &PeriodWindow, source: &P) -> Result<Self> {
        let labels = window.month_labels();
        let mut monthly = Vec::with_capacity(labels.len());
        let mut revenue = Decimal::ZERO;
        let mut cogs = Decimal::ZERO;
        let mut expenses = Decimal::ZERO;
        let mut net_operating_income = Decimal::ZERO;
        let mut placed = Decimal::ZERO;

        for label in labels {
            let amount = |metric: PlMetric| -> Result<Decimal> {
                Ok(source.pl_amount(metric, &label)?.unwrap_or(Decimal::ZERO))
            };

            let month_revenue = amount(PlMetric::Revenue)?;
            let month_income = amount(PlMetric::NetOperatingIncome)?;
            revenue += month_revenue;
            net_operating_income += month_income;
            cogs += amount(PlMetric::Cogs)?;
            expenses += amount(PlMetric::Expense)?;
            placed += amount(PlMetric::Placed)?;

            monthly.push(MonthlyPerformance {
                month_label: label,
                revenue: month_revenue,
                income: month_income,
            });
        }

        let months = window.months();
        let days = match (months.first(), months.last()) {
            (Some(first), Some(last)) => {
                let end = last_day_of_month(last.year(), last.month())?;
                (end - *first).num_days() as u32 + 1
            }
            _ => 0,
        };

        let spd = if days > 0 {
            placed / Decimal::from(days)
        } else {
            Decimal::ZERO
        };
        let rps = if placed > Decimal::ZERO {
            revenue / placed
        } else {
            Decimal::ZERO
        };

        info!(
            "Company summary for {}: revenue {}, net operating income {} over {} months",
            window.label,
            round_currency(revenue),
            round_currency(net_operating_income),
            months.len()
        );

        Ok(Self {
            window: window.clone(),
            revenue,
            cogs,
            expenses,
            net_operating_income,
            placed,
            days,
            spd,
            bps: rps,
            rps,
            monthly,
        })
    }

    pub fn to_json(&self) -> Value {
        let monthly: Vec<Value> = self
            .monthly
            .iter()
            .map(|m| {
                json!({
                    "month_name": m.month_label,
                    "revenue": money(m.revenue),
                    "income": money(m.income),
                })
            })
            .collect();

        json!({
            "financial_summary": {
                "total_revenue": money(self.revenue),
                "total_cogs": money(self.cogs),
                "total_expenses": money(self.expenses),
                "net_operating_income": money(self.net_operating_income),
                "spd": money(self.spd),
                "bps": money(self.bps),
                "rps": money(self.rps),
            },
            "monthly_revenue": monthly,
            "period_type": self.window.token,
            "start_date": self.window.start.to_string(),
            "end_date": self.window.end.to_string(),
        })
    }
}
