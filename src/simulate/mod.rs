//! Simulation: transaction expansion, value store, tax ledger, clock

pub mod clock;
pub mod expander;
pub mod state;
pub mod tax;

pub use clock::{ProjectionConfig, ProjectionEngine, ProjectionOutput};
pub use expander::{expand, merge_instances, Horizon};
pub use state::{EntityId, EntityInfo, EntityKind, SnapshotStore, ValueChange};
pub use tax::{LiabilityKind, Settlement, TaxBands, TaxLedger};
