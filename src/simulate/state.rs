//! Versioned value store for one projection run
//!
//! The clock never mutates model entities; each run owns a `SnapshotStore`
//! holding every entity's current value, its value history at reporting
//! boundaries, and a flat log of individual dated changes (the "report
//! table" of the output contract).

use chrono::NaiveDate;
use serde::Serialize;

/// Index of an entity in the run's arena
pub type EntityId = usize;

/// What kind of model entity a store slot tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Asset,
    Income,
    Expense,
}

/// Static display facts about a tracked entity
#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub kind: EntityKind,
    pub name: String,
    pub category: String,
}

/// One dated value change, as surfaced in the report table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange {
    pub date: NaiveDate,
    pub name: String,
    pub change: f64,
    pub old_value: f64,
    pub new_value: f64,
    /// What caused the change: a transaction name, "growth", "income",
    /// "expense", "income tax", "NI" or "CGT"
    pub source: String,
}

#[derive(Debug, Clone)]
struct Slot {
    info: EntityInfo,
    current: f64,
    /// Whether the entity has come into existence yet
    active: bool,
    history: Vec<(NaiveDate, f64)>,
}

/// Arena of entity values for one run
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    slots: Vec<Slot>,
    changes: Vec<ValueChange>,
    snapshot_dates: Vec<NaiveDate>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity; it starts inactive with value zero
    pub fn register(&mut self, info: EntityInfo) -> EntityId {
        self.slots.push(Slot {
            info,
            current: 0.0,
            active: false,
            history: Vec::new(),
        });
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn info(&self, id: EntityId) -> &EntityInfo {
        &self.slots[id].info
    }

    pub fn value(&self, id: EntityId) -> f64 {
        self.slots[id].current
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.slots[id].active
    }

    /// Bring an entity into existence with its starting value. Funds
    /// that arrived before the start (transactions targeting a
    /// not-yet-started asset) are kept, not overwritten.
    pub fn activate(&mut self, id: EntityId, date: NaiveDate, value: f64, source: &str) {
        let slot = &mut self.slots[id];
        if slot.active {
            return;
        }
        slot.active = true;
        let old = slot.current;
        slot.current = old + value;
        if value != 0.0 {
            let name = slot.info.name.clone();
            self.log_change(date, &name, old, old + value, source);
        }
    }

    /// Overwrite a value (revaluations); logs the change
    pub fn set_value(&mut self, id: EntityId, date: NaiveDate, new: f64, source: &str) {
        let slot = &mut self.slots[id];
        let old = slot.current;
        slot.current = new;
        let name = slot.info.name.clone();
        self.log_change(date, &name, old, new, source);
    }

    /// Apply a delta (transactions, growth, postings); logs the change
    pub fn add(&mut self, id: EntityId, date: NaiveDate, delta: f64, source: &str) {
        if delta == 0.0 {
            return;
        }
        let slot = &mut self.slots[id];
        let old = slot.current;
        slot.current = old + delta;
        let name = slot.info.name.clone();
        self.log_change(date, &name, old, old + delta, source);
    }

    /// Scale a value without logging (monthly growth compounding is
    /// reported through the history, not the change table)
    pub fn scale(&mut self, id: EntityId, factor: f64) {
        self.slots[id].current *= factor;
    }

    /// Record every active entity's value at a reporting boundary
    pub fn record_snapshots(&mut self, date: NaiveDate) {
        self.snapshot_dates.push(date);
        for slot in &mut self.slots {
            let value = if slot.active { slot.current } else { 0.0 };
            slot.history.push((date, value));
        }
    }

    pub fn history(&self, id: EntityId) -> &[(NaiveDate, f64)] {
        &self.slots[id].history
    }

    pub fn snapshot_dates(&self) -> &[NaiveDate] {
        &self.snapshot_dates
    }

    pub fn changes(&self) -> &[ValueChange] {
        &self.changes
    }

    /// Ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = EntityId> {
        0..self.slots.len()
    }

    fn log_change(&mut self, date: NaiveDate, name: &str, old: f64, new: f64, source: &str) {
        self.changes.push(ValueChange {
            date,
            name: name.to_string(),
            change: new - old,
            old_value: old,
            new_value: new,
            source: source.to_string(),
        });
    }
}
