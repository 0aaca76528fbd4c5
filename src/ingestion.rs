//! Spreadsheet loaders for the in-memory ledger.
//!
//! The finance team maintains four exports: a territory cost sheet whose
//! rows are labelled like "March 2025 COGS", a collectors sheet with one
//! column per month, the consolidated profit and loss sheet, and the raw
//! billing export.

use crate::error::{KpiError, Result};
use crate::ledger::InMemoryLedger;
use crate::overrides::CollectorOverride;
use crate::schema::{ExpenseType, PlEntry, PlMetric, TerritoryCostEntry};
use crate::utils::{month_from_name, month_name};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

const IDENTITY_COLUMNS: [&str; 3] = ["territory", "practice", "collector"];

/// Parses a currency cell. Accepts `$`, thousands separators and
/// accounting-style negatives like `(1,250.00)`. Blank cells are `Ok(None)`.
pub fn parse_amount(raw: &str) -> std::result::Result<Option<Decimal>, rust_decimal::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }

    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '(' | ')' | ' '))
        .collect();

    let amount = Decimal::from_str(&cleaned)?;
    Ok(Some(if negative { -amount } else { amount }))
}

fn amount_at(line: u64, raw: &str) -> Result<Option<Decimal>> {
    parse_amount(raw).map_err(|e| KpiError::Ingestion {
        line,
        details: format!("'{}' is not a valid amount: {}", raw, e),
    })
}

fn line_of(record: &StringRecord, fallback: usize) -> u64 {
    record
        .position()
        .map(|p| p.line())
        .unwrap_or(fallback as u64 + 2)
}

/// Reads the territory cost sheet.
///
/// The first column holds "<Month> <Year> <COGS|Expense>"; every other
/// column is a territory. Blank cells are skipped.
pub fn parse_cost_sheet<R: Read>(reader: R) -> Result<Vec<TerritoryCostEntry>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let territories: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, name)| !name.is_empty())
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut entries = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = line_of(&record, idx);
        let description = record.get(0).unwrap_or("");
        if description.is_empty() {
            continue;
        }

        let (month_label, expense_type) = parse_cost_description(description)
            .ok_or_else(|| KpiError::Ingestion {
                line,
                details: format!(
                    "Expected '<Month> <Year> <COGS|Expense>', found '{}'",
                    description
                ),
            })?;

        for (col, territory) in &territories {
            let Some(amount) = amount_at(line, record.get(*col).unwrap_or(""))? else {
                continue;
            };
            entries.push(TerritoryCostEntry {
                territory: territory.clone(),
                month_label: month_label.clone(),
                expense_type,
                amount,
            });
        }
    }

    debug!("Parsed {} territory cost entries", entries.len());
    Ok(entries)
}

fn parse_cost_description(description: &str) -> Option<(String, ExpenseType)> {
    let mut parts = description.split_whitespace();
    let month = month_from_name(parts.next()?)?;
    let year: i32 = parts.next()?.parse().ok()?;
    let rest: Vec<&str> = parts.collect();
    let expense_type = ExpenseType::from_label(&rest.join(" "))?;
    Some((format!("{} {}", month_name(month)?, year), expense_type))
}

/// Reads the consolidated profit and loss sheet.
///
/// The first column names the metric ("Revenue", "COGS", "Expense",
/// "Net Operating Income", "Placed"); the remaining headers are months,
/// either "June 2025" or a bare "June" that takes `default_year`. Rows with
/// other metrics and non-month columns such as "Total" are ignored.
pub fn parse_pl_sheet<R: Read>(reader: R, default_year: i32) -> Result<Vec<PlEntry>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut months: Vec<(usize, String)> = Vec::new();
    for (idx, header) in headers.iter().enumerate().skip(1) {
        match parse_month_header(header, default_year) {
            Some(label) => months.push((idx, label)),
            None => debug!("Ignoring P&L column '{}'", header),
        }
    }

    let mut entries = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = line_of(&record, idx);
        let name = record.get(0).unwrap_or("");
        let Some(metric) = PlMetric::from_label(name) else {
            if !name.is_empty() {
                debug!("Ignoring P&L row '{}' on line {}", name, line);
            }
            continue;
        };

        for (col, month_label) in &months {
            let Some(amount) = amount_at(line, record.get(*col).unwrap_or(""))? else {
                continue;
            };
            entries.push(PlEntry {
                metric,
                month_label: month_label.clone(),
                amount,
            });
        }
    }

    debug!("Parsed {} P&L entries", entries.len());
    Ok(entries)
}

fn parse_month_header(header: &str, default_year: i32) -> Option<String> {
    let mut parts = header.split_whitespace();
    let month = month_from_name(parts.next()?)?;
    let year = match parts.next() {
        Some(raw) => raw.parse().ok()?,
        None => default_year,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(format!("{} {}", month_name(month)?, year))
}

/// One row of the collectors sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSheetRow {
    pub line: u64,
    pub territory: String,
    pub practice: String,
    pub collector: Option<String>,
    /// Fee per month column, keyed by the column header ("June")
    pub amounts: BTreeMap<String, Decimal>,
}

/// Reads the collectors sheet: `Territory`, `Practice`, `Collector`, then
/// any number of month columns. Blank month cells count as zero.
pub fn parse_collector_sheet<R: Read>(reader: R) -> Result<Vec<CollectorSheetRow>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    };
    let (Some(territory_col), Some(practice_col), Some(collector_col)) =
        (column("territory"), column("practice"), column("collector"))
    else {
        return Err(KpiError::Ingestion {
            line: 1,
            details: "Collectors sheet needs Territory, Practice and Collector columns".to_string(),
        });
    };

    let month_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| {
            !h.is_empty() && !IDENTITY_COLUMNS.iter().any(|c| h.eq_ignore_ascii_case(c))
        })
        .map(|(idx, h)| (idx, h.to_string()))
        .collect();

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = line_of(&record, idx);
        let practice = record.get(practice_col).unwrap_or("").to_string();
        if practice.is_empty() {
            continue;
        }

        let collector = record
            .get(collector_col)
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != "0")
            .map(str::to_string);

        let mut amounts = BTreeMap::new();
        for (col, month) in &month_columns {
            let amount = amount_at(line, record.get(*col).unwrap_or(""))?.unwrap_or(Decimal::ZERO);
            amounts.insert(month.clone(), amount);
        }

        rows.push(CollectorSheetRow {
            line,
            territory: record.get(territory_col).unwrap_or("").to_string(),
            practice,
            collector,
            amounts,
        });
    }

    Ok(rows)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorLoadSummary {
    pub loaded: usize,
    /// Practice names that did not resolve to a registered practice
    pub unresolved: Vec<String>,
}

/// Loads collector rows into `ledger`, taking each row's fee from
/// `month_column`. Rows whose practice name is unknown are reported, not
/// guessed at.
pub fn load_collectors(
    ledger: &mut InMemoryLedger,
    rows: &[CollectorSheetRow],
    month_column: &str,
) -> Result<CollectorLoadSummary> {
    let mut summary = CollectorLoadSummary::default();

    for row in rows {
        let Some(practice) = ledger.practice_id(&row.practice) else {
            warn!(
                "Collectors sheet line {}: practice '{}' is not registered",
                row.line, row.practice
            );
            summary.unresolved.push(row.practice.clone());
            continue;
        };

        let monthly_cost = row
            .amounts
            .iter()
            .find(|(month, _)| month.eq_ignore_ascii_case(month_column))
            .map(|(_, amount)| *amount)
            .unwrap_or(Decimal::ZERO);

        ledger.set_collector(CollectorOverride {
            practice,
            territory: row.territory.clone(),
            collector: row.collector.clone(),
            monthly_cost,
        })?;
        summary.loaded += 1;
    }

    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct BillingExportRow {
    practice: String,
    territory: String,
    placement_date: String,
    #[serde(default)]
    charges: String,
    #[serde(default)]
    payments: String,
    #[serde(default)]
    financial_class: String,
}

fn parse_placement_date(raw: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

/// Reads the billing export into `ledger`, registering practices on first
/// sight. Returns the number of records added.
pub fn load_billing_records<R: Read>(reader: R, ledger: &mut InMemoryLedger) -> Result<usize> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let mut added = 0;
    for (idx, row) in rdr.deserialize::<BillingExportRow>().enumerate() {
        let row = row?;
        let line = idx as u64 + 2;

        let placement_date = parse_placement_date(&row.placement_date).ok_or_else(|| {
            KpiError::Ingestion {
                line,
                details: format!("'{}' is not a placement date", row.placement_date),
            }
        })?;
        let placed = amount_at(line, &row.charges)?.unwrap_or(Decimal::ZERO);
        let collected = amount_at(line, &row.payments)?.unwrap_or(Decimal::ZERO);

        let practice = ledger.register_practice(&row.practice, &row.territory);
        if let Some(known) = ledger.practice(practice) {
            if known.territory != row.territory {
                warn!(
                    "Billing export line {}: '{}' is registered in '{}', ignoring territory '{}'",
                    line, row.practice, known.territory, row.territory
                );
            }
        }
        let class = if row.financial_class.is_empty() {
            "Unknown"
        } else {
            row.financial_class.as_str()
        };
        ledger.record_sample(practice, placement_date, placed, collected, class)?;
        added += 1;
    }

    debug!("Loaded {} billing records", added);
    Ok(added)
}
