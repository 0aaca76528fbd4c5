use crate::error::{KpiError, Result};
use crate::overrides::{CollectorOverride, CollectorSource};
use crate::schema::{
    BillingRecord, ExpenseType, FinancialClassTotals, LedgerTotals, PlEntry, PlMetric, Practice,
    PracticeId, PracticePlacement, TerritoryCostEntry,
};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Read access to billed samples. Date ranges are inclusive on both ends.
pub trait BillingLedger {
    fn practice_totals(
        &self,
        practice: PracticeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<LedgerTotals>;

    /// One row per practice with at least one sample placed in the range,
    /// optionally restricted to a single territory.
    fn placements(
        &self,
        territory: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PracticePlacement>>;

    fn financial_class_totals(
        &self,
        practice: PracticeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FinancialClassTotals>>;
}

/// Monthly expense/COGS booked per territory, keyed by "June 2025" labels.
pub trait TerritoryCostSource {
    fn territory_cost(
        &self,
        territory: &str,
        month_label: &str,
        expense_type: ExpenseType,
    ) -> Result<Option<Decimal>>;
}

/// Company-wide profit and loss, keyed by metric and "June 2025" labels.
pub trait PlSource {
    fn pl_amount(&self, metric: PlMetric, month_label: &str) -> Result<Option<Decimal>>;
}

/// Normalizes a practice name for registry lookups: trimmed, lowercased,
/// internal whitespace collapsed.
pub fn normalize_practice_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// In-process store backing every data-source seam.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    practices: BTreeMap<PracticeId, Practice>,
    name_index: HashMap<String, PracticeId>,
    records: Vec<BillingRecord>,
    costs: BTreeMap<(String, String, ExpenseType), Decimal>,
    pl: BTreeMap<(PlMetric, String), Decimal>,
    collectors: BTreeMap<PracticeId, CollectorOverride>,
    next_id: u32,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a practice, or returns the existing id when a practice with
    /// the same normalized name is already known.
    pub fn register_practice(&mut self, name: &str, territory: &str) -> PracticeId {
        let key = normalize_practice_name(name);
        if let Some(id) = self.name_index.get(&key) {
            return *id;
        }

        self.next_id += 1;
        let id = PracticeId(self.next_id);
        self.practices.insert(
            id,
            Practice {
                id,
                name: name.trim().to_string(),
                territory: territory.trim().to_string(),
            },
        );
        self.name_index.insert(key, id);
        id
    }

    pub fn practice(&self, id: PracticeId) -> Option<&Practice> {
        self.practices.get(&id)
    }

    pub fn practice_id(&self, name: &str) -> Option<PracticeId> {
        self.name_index.get(&normalize_practice_name(name)).copied()
    }

    /// Adds an alternate spelling that resolves to an existing practice.
    pub fn add_alias(&mut self, practice: PracticeId, alias: &str) -> Result<()> {
        if !self.practices.contains_key(&practice) {
            return Err(KpiError::UnknownPractice(practice.to_string()));
        }
        self.name_index
            .insert(normalize_practice_name(alias), practice);
        Ok(())
    }

    pub fn rename_practice(&mut self, practice: PracticeId, new_name: &str) -> Result<()> {
        let entry = self
            .practices
            .get_mut(&practice)
            .ok_or_else(|| KpiError::UnknownPractice(practice.to_string()))?;
        entry.name = new_name.trim().to_string();
        self.name_index
            .insert(normalize_practice_name(new_name), practice);
        Ok(())
    }

    pub fn add_record(&mut self, record: BillingRecord) -> Result<()> {
        if !self.practices.contains_key(&record.practice) {
            return Err(KpiError::UnknownPractice(record.practice.to_string()));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn record_sample(
        &mut self,
        practice: PracticeId,
        placement_date: NaiveDate,
        placed: Decimal,
        collected: Decimal,
        financial_class: &str,
    ) -> Result<()> {
        self.add_record(BillingRecord {
            practice,
            placement_date,
            placed,
            collected,
            financial_class: financial_class.to_string(),
        })
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Upserts a cost entry; the table is keyed by (territory, month, type).
    pub fn set_territory_cost(&mut self, entry: TerritoryCostEntry) {
        self.costs.insert(
            (entry.territory, entry.month_label, entry.expense_type),
            entry.amount,
        );
    }

    /// Upserts one profit and loss amount.
    pub fn set_pl_amount(&mut self, entry: PlEntry) {
        self.pl.insert((entry.metric, entry.month_label), entry.amount);
    }

    pub fn set_collector(&mut self, collector: CollectorOverride) -> Result<()> {
        if !self.practices.contains_key(&collector.practice) {
            return Err(KpiError::UnknownPractice(collector.practice.to_string()));
        }
        self.collectors.insert(collector.practice, collector);
        Ok(())
    }

    /// Changes the monthly fee of an existing collector row. Matching zero
    /// rows is reported as not found rather than ignored.
    pub fn update_collector_cost(
        &mut self,
        practice: PracticeId,
        territory: &str,
        monthly_cost: Decimal,
    ) -> Result<()> {
        match self.collectors.get_mut(&practice) {
            Some(row) if row.territory == territory => {
                debug!(
                    "Collector cost for practice {} changed from {} to {}",
                    practice, row.monthly_cost, monthly_cost
                );
                row.monthly_cost = monthly_cost;
                Ok(())
            }
            _ => Err(KpiError::CollectorNotFound {
                practice: practice.to_string(),
                territory: territory.to_string(),
            }),
        }
    }

    fn records_in<'a>(
        &'a self,
        practice: PracticeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = &'a BillingRecord> + 'a {
        self.records.iter().filter(move |r| {
            r.practice == practice && r.placement_date >= start && r.placement_date <= end
        })
    }
}

impl BillingLedger for InMemoryLedger {
    fn practice_totals(
        &self,
        practice: PracticeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<LedgerTotals> {
        let mut totals = LedgerTotals::default();
        for record in self.records_in(practice, start, end) {
            totals.add_record(record);
        }
        Ok(totals)
    }

    fn placements(
        &self,
        territory: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PracticePlacement>> {
        let mut grouped: BTreeMap<PracticeId, LedgerTotals> = BTreeMap::new();
        for record in &self.records {
            if record.placement_date < start || record.placement_date > end {
                continue;
            }
            grouped.entry(record.practice).or_default().add_record(record);
        }

        let mut rows = Vec::with_capacity(grouped.len());
        for (id, totals) in grouped {
            let practice = self
                .practices
                .get(&id)
                .ok_or_else(|| KpiError::UnknownPractice(id.to_string()))?;

            if let Some(filter) = territory {
                if practice.territory != filter {
                    continue;
                }
            }

            rows.push(PracticePlacement {
                practice: id,
                name: practice.name.clone(),
                territory: practice.territory.clone(),
                placed: totals.placed,
                sample_count: totals.sample_count,
            });
        }

        Ok(rows)
    }

    fn financial_class_totals(
        &self,
        practice: PracticeId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FinancialClassTotals>> {
        let mut by_class: BTreeMap<&str, LedgerTotals> = BTreeMap::new();
        for record in self.records_in(practice, start, end) {
            by_class
                .entry(record.financial_class.as_str())
                .or_default()
                .add_record(record);
        }

        Ok(by_class
            .into_iter()
            .map(|(class, totals)| FinancialClassTotals {
                financial_class: class.to_string(),
                sample_count: totals.sample_count,
                placed: totals.placed,
                collected: totals.collected,
            })
            .collect())
    }
}

impl TerritoryCostSource for InMemoryLedger {
    fn territory_cost(
        &self,
        territory: &str,
        month_label: &str,
        expense_type: ExpenseType,
    ) -> Result<Option<Decimal>> {
        Ok(self
            .costs
            .get(&(territory.to_string(), month_label.to_string(), expense_type))
            .copied())
    }
}

impl PlSource for InMemoryLedger {
    fn pl_amount(&self, metric: PlMetric, month_label: &str) -> Result<Option<Decimal>> {
        Ok(self.pl.get(&(metric, month_label.to_string())).copied())
    }
}

impl CollectorSource for InMemoryLedger {
    fn collector_for(&self, practice: PracticeId) -> Result<Option<CollectorOverride>> {
        Ok(self.collectors.get(&practice).cloned())
    }

    fn collectors_in_territory(&self, territory: &str) -> Result<Vec<CollectorOverride>> {
        Ok(self
            .collectors
            .values()
            .filter(|c| c.territory == territory)
            .cloned()
            .collect())
    }
}
