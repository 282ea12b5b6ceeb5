//! Scenario runner for batch projections
//!
//! Validates and normalizes a base model once, then runs many projections
//! with different configurations (or settings overrides) without
//! re-checking the model. Runs are independent: each owns its clock,
//! store and ledger, so batches parallelize safely.

use rayon::prelude::*;

use crate::error::EngineError;
use crate::model::data::{Model, Setting};
use crate::model::norm::NormModel;
use crate::simulate::clock::{ProjectionConfig, ProjectionEngine, ProjectionOutput};
use crate::validate::{normalize, ValidationIssue};

/// Pre-validated scenario runner
///
/// # Example
/// ```ignore
/// let runner = ScenarioRunner::from_model(&model)?;
/// for cpi in [0.0, 2.5, 5.0] {
///     let mut config = ProjectionConfig::new(start, end);
///     config.cpi = cpi;
///     let output = runner.run(config)?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    base: NormModel,
}

impl ScenarioRunner {
    /// Validate and normalize a wire model into a reusable base
    pub fn from_model(model: &Model) -> Result<Self, Vec<ValidationIssue>> {
        Ok(Self {
            base: normalize(model)?,
        })
    }

    /// Wrap an already-normalized model
    pub fn with_normalized(base: NormModel) -> Self {
        Self { base }
    }

    /// Run a single projection with the given config
    pub fn run(&self, config: ProjectionConfig) -> Result<ProjectionOutput, EngineError> {
        ProjectionEngine::new(self.base.clone(), config).run()
    }

    /// Run a projection against a variant of the base model whose
    /// settings are overridden (what-if analysis)
    pub fn run_with_settings(
        &self,
        overrides: &[Setting],
        config: ProjectionConfig,
    ) -> Result<ProjectionOutput, EngineError> {
        let mut variant = self.base.clone();
        for s in overrides {
            variant
                .settings
                .record_revaluation(&s.name, chrono::NaiveDate::MIN, &s.value);
        }
        ProjectionEngine::new(variant, config).run()
    }

    /// Run many configurations in parallel; results keep input order
    pub fn run_batch(
        &self,
        configs: &[ProjectionConfig],
    ) -> Vec<Result<ProjectionOutput, EngineError>> {
        configs
            .par_iter()
            .map(|config| ProjectionEngine::new(self.base.clone(), config.clone()).run())
            .collect()
    }

    /// The normalized base model, for inspection
    pub fn base(&self) -> &NormModel {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn base_model() -> Model {
        serde_json::from_str(
            r#"{"assets": [
                {"name": "stocks", "start": "2020", "value": "1000", "growth": "5"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_batch_results_keep_order() {
        let runner = ScenarioRunner::from_model(&base_model()).unwrap();
        let configs: Vec<_> = [0.0, 2.5, 5.0]
            .iter()
            .map(|&cpi| {
                let mut c = ProjectionConfig::new(d(2020, 1, 1), d(2030, 1, 1));
                c.cpi = cpi;
                c
            })
            .collect();
        let results = runner.run_batch(&configs);
        assert_eq!(results.len(), 3);

        let finals: Vec<f64> = results
            .iter()
            .map(|r| r.as_ref().unwrap().store.history(0).last().unwrap().1)
            .collect();
        // Higher CPI compounds to a higher final value
        assert!(finals[0] < finals[1] && finals[1] < finals[2]);
    }

    #[test]
    fn test_settings_override_changes_outcome() {
        let model: Model = serde_json::from_str(
            r#"{"settings": [{"name": "stockGrowth", "value": "5", "kind": "adjustable"}],
                "assets": [
                    {"name": "stocks", "start": "2020", "value": "1000",
                     "growth": "stockGrowth", "cpiImmune": "T"}
                ]}"#,
        )
        .unwrap();
        let runner = ScenarioRunner::from_model(&model).unwrap();
        let config = ProjectionConfig::new(d(2020, 1, 1), d(2030, 1, 1));

        let base = runner.run(config.clone()).unwrap();
        let boosted = runner
            .run_with_settings(
                &[Setting {
                    name: "stockGrowth".to_string(),
                    value: "10".to_string(),
                    hint: String::new(),
                    kind: crate::model::data::SettingKind::Adjustable,
                }],
                config,
            )
            .unwrap();

        let base_final = base.store.history(0).last().unwrap().1;
        let boosted_final = boosted.store.history(0).last().unwrap().1;
        assert!(boosted_final > base_final);
    }
}
