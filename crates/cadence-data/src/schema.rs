//! On-disk form of the solver configuration.
//!
//! Every field is optional; missing fields keep the [`SolverSettings`]
//! default. Constraints are listed by name and durations accept either a
//! number of seconds or a string with a unit suffix (`"3d"`, `"12h"`,
//! `"30m"`, `"45s"`).

use cadence_core::settings::{self, SolverSettings};
use cadence_core::time::Duration;
use serde::Deserialize;
use std::path::Path;

use crate::loader::DataLoadError;

// ===========================================================================
// Data file structs
// ===========================================================================

/// A constraint kind as named in a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintName {
    Leadtime,
    Material,
    Capacity,
    Fence,
}

impl ConstraintName {
    fn bit(self) -> u32 {
        match self {
            ConstraintName::Leadtime => settings::LEADTIME,
            ConstraintName::Material => settings::MATERIAL,
            ConstraintName::Capacity => settings::CAPACITY,
            ConstraintName::Fence => settings::FENCE,
        }
    }
}

/// A duration entry: plain seconds, or a number with a unit suffix.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationData {
    Seconds(i64),
    Text(String),
}

impl DurationData {
    fn resolve(&self, field: &str, file: &Path) -> Result<Duration, DataLoadError> {
        let text = match self {
            DurationData::Seconds(s) => return Ok(Duration(*s)),
            DurationData::Text(t) => t.trim(),
        };
        let invalid = || DataLoadError::InvalidDuration {
            file: file.to_path_buf(),
            field: field.to_string(),
            value: text.to_string(),
        };
        let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let n: i64 = number.parse().map_err(|_| invalid())?;
        let factor = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 7 * 86_400,
            _ => return Err(invalid()),
        };
        n.checked_mul(factor).map(Duration).ok_or_else(invalid)
    }
}

/// The solver settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsData {
    pub constraints: Option<Vec<ConstraintName>>,
    pub plan_type: Option<u8>,
    pub allow_splits: Option<bool>,
    pub rotate_resources: Option<bool>,
    pub propagate: Option<bool>,
    pub cluster: Option<i32>,
    pub lazy_delay: Option<DurationData>,
    pub minimum_delay: Option<DurationData>,
    pub autofence: Option<DurationData>,
    pub iteration_threshold: Option<f64>,
    pub iteration_accuracy: Option<f64>,
    pub iteration_max: Option<u32>,
    pub administrative_leadtime: Option<DurationData>,
    pub plan_safety_stock_first: Option<bool>,
    pub erase_previous_first: Option<bool>,
    pub max_parallel: Option<usize>,
    pub log_level: Option<u8>,
    pub autocommit: Option<bool>,
}

// ===========================================================================
// Resolution
// ===========================================================================

impl SettingsData {
    /// Apply the file's fields over the defaults through the validating
    /// setters.
    pub fn resolve(&self, file: &Path) -> Result<SolverSettings, DataLoadError> {
        let config = |e| DataLoadError::Config {
            file: file.to_path_buf(),
            source: e,
        };
        let mut s = SolverSettings::default();

        if let Some(names) = &self.constraints {
            let mask = names.iter().fold(0, |m, c| m | c.bit());
            s.set_constraints(mask).map_err(config)?;
        }
        if let Some(t) = self.plan_type {
            s.set_plan_type(t).map_err(config)?;
        }
        if let Some(c) = self.cluster {
            s.set_cluster(c).map_err(config)?;
        }
        if let Some(d) = &self.lazy_delay {
            s.set_lazy_delay(d.resolve("lazy_delay", file)?).map_err(config)?;
        }
        if let Some(d) = &self.minimum_delay {
            s.set_minimum_delay(d.resolve("minimum_delay", file)?)
                .map_err(config)?;
        }
        if let Some(d) = &self.autofence {
            s.set_autofence(d.resolve("autofence", file)?).map_err(config)?;
        }
        if let Some(d) = &self.administrative_leadtime {
            s.set_administrative_leadtime(d.resolve("administrative_leadtime", file)?)
                .map_err(config)?;
        }
        if let Some(v) = self.iteration_threshold {
            s.set_iteration_threshold(v).map_err(config)?;
        }
        if let Some(v) = self.iteration_accuracy {
            s.set_iteration_accuracy(v).map_err(config)?;
        }
        if let Some(v) = self.iteration_max {
            s.set_iteration_max(v);
        }
        if let Some(v) = self.max_parallel {
            s.set_max_parallel(v).map_err(config)?;
        }

        s.allow_splits = self.allow_splits.unwrap_or(s.allow_splits);
        s.rotate_resources = self.rotate_resources.unwrap_or(s.rotate_resources);
        s.propagate = self.propagate.unwrap_or(s.propagate);
        s.plan_safety_stock_first = self
            .plan_safety_stock_first
            .unwrap_or(s.plan_safety_stock_first);
        s.erase_previous_first = self.erase_previous_first.unwrap_or(s.erase_previous_first);
        s.log_level = self.log_level.unwrap_or(s.log_level);
        s.autocommit = self.autocommit.unwrap_or(s.autocommit);

        s.validate().map_err(config)?;
        Ok(s)
    }
}
