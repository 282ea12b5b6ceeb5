//! finsim - Deterministic personal-finance projection engine
//!
//! This library provides:
//! - Model validation and normalization with a fixed diagnostic catalogue
//! - Deterministic forward projection of assets, debts, incomes and expenses
//! - Pension, crystallization and capital-gains mechanics
//! - Per-person income tax, NI and CGT ledgers with tax-year settlement
//! - Chart series aggregation at monthly or annual frequency

pub mod error;
pub mod model;
pub mod report;
pub mod resolve;
pub mod scenario;
pub mod simulate;
pub mod validate;

// Re-export commonly used types
pub use error::EngineError;
pub use model::{Model, CASH_ASSET_NAME};
pub use report::{ChartSeries, ChartView, Detail, Focus, Frequency, ViewConfig};
pub use scenario::ScenarioRunner;
pub use simulate::{ProjectionConfig, ProjectionEngine, ProjectionOutput};
pub use validate::{check_model, normalize, ValidationIssue};
