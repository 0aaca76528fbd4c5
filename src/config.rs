use crate::error::{KpiError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fallback collection rate when neither the practice nor its territory has
/// usable history.
pub const DEFAULT_COLLECTION_RATE: Decimal = dec!(0.6);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EstimatorConfig {
    #[schemars(
        description = "Months immediately before the reference date that are too immature to use. The anchor search starts this many months back."
    )]
    pub skip_recent_months: u32,

    #[schemars(description = "Oldest month (counted back from the reference date) the anchor search may inspect.")]
    pub max_lookback_months: u32,

    #[schemars(description = "Maximum number of usable months averaged, anchor included.")]
    pub max_periods: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            skip_recent_months: 3,
            max_lookback_months: 12,
            max_periods: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReportConfig {
    pub estimator: EstimatorConfig,

    #[schemars(
        description = "Collection rate used for a practice whose territory has no practice with usable history. Must be within 0.0..=1.0."
    )]
    pub default_collection_rate: Decimal,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            default_collection_rate: DEFAULT_COLLECTION_RATE,
        }
    }
}

impl ReportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ReportConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let rate = self.default_collection_rate;
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(KpiError::InvalidConfig(format!(
                "default_collection_rate {} must be between 0 and 1",
                rate
            )));
        }

        let est = &self.estimator;
        if est.max_periods == 0 {
            return Err(KpiError::InvalidConfig(
                "max_periods must be at least 1".to_string(),
            ));
        }
        if est.skip_recent_months > est.max_lookback_months {
            return Err(KpiError::InvalidConfig(format!(
                "skip_recent_months ({}) exceeds max_lookback_months ({})",
                est.skip_recent_months, est.max_lookback_months
            )));
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
