//! # Practice KPI
//!
//! Per-practice profitability for a lab billing operation: estimates what
//! each referring practice will eventually collect, spreads territory costs
//! over the samples each practice placed, and rolls everything into an
//! account table with a totals row.
//!
//! ## Core Concepts
//!
//! - **Period Window**: `ytd`, `qtd`, `month`, `june_2025` or `q2_2025`, resolved against a reference date
//! - **Collection Rate**: collected / placed over mature months, skipping months still being worked
//! - **Fallback Rate**: placed-weighted territory average for practices with no usable history
//! - **Cost Allocation**: territory COGS and expense split per sample, with flat collector fees carved out
//! - **Totals Row**: ratios recomputed from unrounded aggregates rather than summed
//!
//! ## Example
//!
//! ```rust,ignore
//! use practice_kpi::*;
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//!
//! let mut ledger = InMemoryLedger::new();
//! let cedar = ledger.register_practice("Cedar Pediatrics", "North");
//! ledger.record_sample(
//!     cedar,
//!     NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
//!     dec!(1000),
//!     dec!(0),
//!     "Commercial",
//! )?;
//! ledger.set_territory_cost(TerritoryCostEntry {
//!     territory: "North".to_string(),
//!     month_label: "June 2025".to_string(),
//!     expense_type: ExpenseType::Cogs,
//!     amount: dec!(400),
//! });
//!
//! let today = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
//! let report = build_account_report(&ledger, "month", today)?;
//! println!("{}", serde_json::to_string_pretty(&report.to_json())?);
//! ```

pub mod compositor;
pub mod config;
pub mod error;
pub mod estimator;
pub mod ingestion;
pub mod ledger;
pub mod overrides;
pub mod period;
pub mod report;
pub mod schema;
pub mod territory;
pub mod utils;

pub use compositor::{compose_row, round_currency, AccountKpiRow, RateSource, TotalsRow};
pub use config::{EstimatorConfig, ReportConfig, DEFAULT_COLLECTION_RATE};
pub use error::{KpiError, Result};
pub use estimator::{CollectionEstimate, CollectionRateEstimator, MonthlyTotalsCache};
pub use ingestion::{
    load_billing_records, load_collectors, parse_amount, parse_collector_sheet,
    parse_cost_sheet, parse_pl_sheet, CollectorLoadSummary, CollectorSheetRow,
};
pub use ledger::{
    normalize_practice_name, BillingLedger, InMemoryLedger, PlSource, TerritoryCostSource,
};
pub use overrides::*;
pub use period::{resolve_period, resolve_period_today, PeriodWindow};
pub use report::{
    financial_class_breakdown, AccountMetrics, AccountReport, CompanySummary,
    FinancialClassBreakdown, MonthlyPerformance, ReportRequest, ReportSources,
};
pub use schema::*;
pub use territory::{
    fallback_for, territory_fallback_rates, CostAllocation, FallbackSource, TerritoryCosts,
    TerritoryFallback,
};

use chrono::NaiveDate;
use log::info;

/// Builds the all-territory account report from a single backing store
/// using the default configuration.
pub fn build_account_report<S>(
    store: &S,
    period_token: &str,
    today: NaiveDate,
) -> Result<AccountReport>
where
    S: BillingLedger + TerritoryCostSource + CollectorSource,
{
    let request = ReportRequest::new(period_token, today);
    build_account_report_with(store, &request, &ReportConfig::default())
}

pub fn build_account_report_with<S>(
    store: &S,
    request: &ReportRequest,
    config: &ReportConfig,
) -> Result<AccountReport>
where
    S: BillingLedger + TerritoryCostSource + CollectorSource,
{
    let report = AccountReport::build(ReportSources::from_store(store), request, config)?;
    info!(
        "{} accounts in {}, {} priced from a fallback rate",
        report.accounts.len(),
        report.window.label,
        report.accounts.iter().filter(|r| r.uses_fallback()).count()
    );
    Ok(report)
}

/// Company overview for a period token, read from the consolidated P&L.
pub fn build_company_summary<P: PlSource + ?Sized>(
    source: &P,
    period_token: &str,
    today: NaiveDate,
) -> Result<CompanySummary> {
    let window = resolve_period(period_token, today)?;
    CompanySummary::build(&window, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_end_to_end_single_practice() {
        let mut ledger = InMemoryLedger::new();
        let cedar = ledger.register_practice("Cedar Pediatrics", "North");
        for month in 1..=6 {
            ledger
                .record_sample(
                    cedar,
                    date(2025, month, 10),
                    dec!(1000),
                    dec!(700),
                    "Commercial",
                )
                .unwrap();
        }
        ledger.set_territory_cost(TerritoryCostEntry {
            territory: "North".to_string(),
            month_label: "June 2025".to_string(),
            expense_type: ExpenseType::Cogs,
            amount: dec!(100),
        });
        ledger.set_territory_cost(TerritoryCostEntry {
            territory: "North".to_string(),
            month_label: "June 2025".to_string(),
            expense_type: ExpenseType::Expense,
            amount: dec!(200),
        });

        let report = build_account_report(&ledger, "month", date(2025, 7, 15)).unwrap();
        assert_eq!(report.window.label, "June 2025");
        assert_eq!(report.accounts.len(), 1);

        let row = &report.accounts[0];
        assert_eq!(row.practice_id, cedar);
        assert_eq!(row.rate_source, RateSource::PracticeHistory);
        assert_eq!(row.collection_rate, dec!(0.7));
        assert_eq!(row.revenue, dec!(700));
        assert_eq!(row.profit, dec!(600));
        assert_eq!(row.net_income, dec!(400));
        assert_eq!(report.totals.net_income, dec!(400));
    }

    #[test]
    fn test_empty_store_yields_empty_report() {
        let ledger = InMemoryLedger::new();
        let report = build_account_report(&ledger, "ytd", date(2025, 7, 15)).unwrap();
        assert!(report.accounts.is_empty());
        assert_eq!(report.totals.revenue, dec!(0));
        assert_eq!(report.totals.net_income, dec!(0));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let ledger = InMemoryLedger::new();
        let mut config = ReportConfig::default();
        config.estimator.max_periods = 0;
        let request = ReportRequest::new("ytd", date(2025, 7, 15));
        let err = build_account_report_with(&ledger, &request, &config).unwrap_err();
        assert!(matches!(err, KpiError::InvalidConfig(_)));
    }

    #[test]
    fn test_company_summary_for_token() {
        let mut ledger = InMemoryLedger::new();
        for (month, amount) in [("May 2025", dec!(500)), ("June 2025", dec!(700))] {
            ledger.set_pl_amount(PlEntry {
                metric: PlMetric::Revenue,
                month_label: month.to_string(),
                amount,
            });
        }

        let summary = build_company_summary(&ledger, "month", date(2025, 7, 15)).unwrap();
        assert_eq!(summary.revenue, dec!(700));
        assert_eq!(summary.window.label, "June 2025");

        let err = build_company_summary(&ledger, "last_week", date(2025, 7, 15)).unwrap_err();
        assert!(matches!(err, KpiError::InvalidPeriod(_)));
    }
}
