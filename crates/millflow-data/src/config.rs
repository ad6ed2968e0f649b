//! Loading of [`CalculatorConfig`] from `calculator.{ron,toml,json}`.
//!
//! Every field has a default, so a file only names what it overrides. A
//! directory without a calculator file yields the defaults.

use millflow_core::config::CalculatorConfig;
use std::path::Path;
use tracing::{debug, info};

use crate::loader::{DataFile, DataLoadError};

/// Base name of the calculator configuration file.
pub const CONFIG_BASE_NAME: &str = "calculator";

/// Load the calculator configuration from `dir`, falling back to the
/// defaults when no `calculator.*` file exists.
pub fn load_config(dir: &Path) -> Result<CalculatorConfig, DataLoadError> {
    match DataFile::locate(dir, CONFIG_BASE_NAME)? {
        Some(file) => load_config_file(&file.path),
        None => {
            debug!(target: "millflow.data", dir = %dir.display(), "no calculator config, using defaults");
            Ok(CalculatorConfig::default())
        }
    }
}

/// Load and validate a single configuration file.
pub fn load_config_file(path: &Path) -> Result<CalculatorConfig, DataLoadError> {
    let config: CalculatorConfig = DataFile::open(path)?.read()?;
    validate(&config, path)?;
    info!(
        target: "millflow.data",
        file = %path.display(),
        epsilon = config.solver.epsilon,
        max_rounds = config.solver.max_rounds,
        "calculator config loaded"
    );
    Ok(config)
}

fn invalid(path: &Path, field: &'static str, detail: &str) -> DataLoadError {
    DataLoadError::InvalidValue {
        file: path.to_path_buf(),
        field,
        detail: detail.to_string(),
    }
}

/// Reject values the solver cannot work with.
fn validate(config: &CalculatorConfig, path: &Path) -> Result<(), DataLoadError> {
    let solver = &config.solver;
    if !(solver.epsilon.is_finite() && solver.epsilon > 0.0) {
        return Err(invalid(path, "solver.epsilon", "must be a positive number"));
    }
    if solver.max_rounds == 0 {
        return Err(invalid(path, "solver.max_rounds", "must be at least 1"));
    }
    if !(solver.allocation_tolerance.is_finite() && solver.allocation_tolerance >= 0.0) {
        return Err(invalid(path, "solver.allocation_tolerance", "must be non-negative"));
    }
    if !(solver.conveyor_speed.is_finite() && solver.conveyor_speed > 0.0) {
        return Err(invalid(path, "solver.conveyor_speed", "must be a positive number"));
    }

    let skills = &config.skills;
    for (field, value) in [
        ("skills.conveyor_speed", skills.conveyor_speed),
        ("skills.fuel_value", skills.fuel_value),
        ("skills.fertilizer_value", skills.fertilizer_value),
        ("skills.profit", skills.profit),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(invalid(path, field, "must be a non-negative multiplier"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::{cleanup, make_test_dir};
    use std::fs;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = make_test_dir("config_missing");
        assert_eq!(load_config(&dir).unwrap(), CalculatorConfig::default());
        cleanup(&dir);
    }

    #[test]
    fn partial_ron_overrides() {
        let dir = make_test_dir("config_ron");
        fs::write(
            dir.join("calculator.ron"),
            "(solver: (max_rounds: 50), skills: (conveyor_speed: 2.0))",
        )
        .unwrap();

        let cfg = load_config(&dir).unwrap();
        assert_eq!(cfg.solver.max_rounds, 50);
        assert_eq!(cfg.solver.epsilon, 1e-4);
        assert_eq!(cfg.conveyor_speed(), 120.0);

        cleanup(&dir);
    }

    #[test]
    fn toml_and_json_load() {
        let dir = make_test_dir("config_toml_json");
        let toml_path = dir.join("a.toml");
        fs::write(&toml_path, "[solver]\nauto_import = false\n").unwrap();
        let json_path = dir.join("b.json");
        fs::write(&json_path, r#"{"skills": {"profit": 1.5}}"#).unwrap();

        assert!(!load_config_file(&toml_path).unwrap().solver.auto_import);
        assert_eq!(load_config_file(&json_path).unwrap().skills.profit, 1.5);

        cleanup(&dir);
    }

    #[test]
    fn conflicting_config_files_fail() {
        let dir = make_test_dir("config_conflict");
        fs::write(dir.join("calculator.ron"), "()").unwrap();
        fs::write(dir.join("calculator.json"), "{}").unwrap();
        assert!(matches!(load_config(&dir), Err(DataLoadError::ConflictingFormats { .. })));
        cleanup(&dir);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = make_test_dir("config_invalid");
        let path = dir.join("calculator.json");
        fs::write(&path, r#"{"solver": {"max_rounds": 0}}"#).unwrap();
        assert!(matches!(
            load_config_file(&path),
            Err(DataLoadError::InvalidValue { field: "solver.max_rounds", .. })
        ));

        fs::write(&path, r#"{"skills": {"profit": -1.0}}"#).unwrap();
        assert!(matches!(
            load_config_file(&path),
            Err(DataLoadError::InvalidValue { field: "skills.profit", .. })
        ));

        cleanup(&dir);
    }
}
