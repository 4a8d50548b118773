//! Python bindings over the synchronous pipeline.
//!
//! Snapshots and results cross the boundary as JSON strings so the Python
//! side never has to mirror the model types.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use std::collections::BTreeMap;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use serde_json::json;

use crate::calendar::CalendarSet;
use crate::config::{LevelingOptions, SolverConfig};
use crate::critical_path::calculate_critical_path;
use crate::models::ProjectSnapshot;
use crate::pipeline::analyze_snapshot;

fn parse<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> PyResult<T> {
    serde_json::from_str(raw).map_err(|e| PyValueError::new_err(format!("invalid {}: {}", what, e)))
}

fn to_json(value: &serde_json::Value) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Analyze and optionally level a project snapshot.
///
/// # Arguments
/// * `snapshot_json` - Serialized `ProjectSnapshot`
/// * `options_json` - Serialized `LevelingOptions`; defaults when omitted
/// * `level` - Run the leveling solver (otherwise analyze only)
/// * `max_iterations_cap` - Upper bound on solver iterations
/// * `verbosity` - Solver trace level (0-3)
///
/// # Returns
/// * JSON with over-allocations, histogram, leveling result and task updates
///
/// # Raises
/// * ValueError on malformed input, cycles or capacity misconfiguration
#[pyfunction]
#[pyo3(signature = (snapshot_json, options_json=None, level=true, max_iterations_cap=500, verbosity=0))]
fn level_snapshot(
    snapshot_json: &str,
    options_json: Option<&str>,
    level: bool,
    max_iterations_cap: usize,
    verbosity: u8,
) -> PyResult<String> {
    let snapshot: ProjectSnapshot = parse("snapshot", snapshot_json)?;
    let options: LevelingOptions = match options_json {
        Some(raw) => parse("options", raw)?,
        None => LevelingOptions::default(),
    };
    let config = SolverConfig {
        max_iterations_cap,
        verbosity,
    };

    let analysis = analyze_snapshot(&snapshot, &options, level, &config)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    to_json(&json!({
        "over_allocations": analysis.over_allocations,
        "over_allocation_count": analysis.over_allocations.len(),
        "leveling": analysis.leveling,
        "histogram": analysis.histogram.daily_usage(),
        "updates": analysis.updates,
        "warnings": analysis.warnings,
    }))
}

/// Compute early/late dates and float without leveling.
#[pyfunction]
fn critical_path(snapshot_json: &str) -> PyResult<String> {
    let snapshot: ProjectSnapshot = parse("snapshot", snapshot_json)?;
    snapshot
        .validate()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let calendars = CalendarSet::from_snapshot(&snapshot);
    let result = calculate_critical_path(&snapshot, &calendars)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let timings: BTreeMap<_, _> = result.timings.iter().collect();
    let summaries: BTreeMap<_, _> = result.summaries.iter().collect();
    to_json(&json!({
        "project_start": result.project_start,
        "project_finish": result.project_finish,
        "critical_path": result.critical_path(),
        "timings": timings,
        "summaries": summaries,
    }))
}

/// The schedule_leveler Python module.
#[pymodule]
fn schedule_leveler(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(level_snapshot, m)?)?;
    m.add_function(wrap_pyfunction!(critical_path, m)?)?;
    Ok(())
}
