//! The simulation clock: date-ordered projection of a whole model
//!
//! One run walks the sorted union of transaction instance dates, monthly
//! boundaries, tax year ends and reporting boundaries. At each date it
//! applies revaluations, then conditionals, then ordinary transactions,
//! then monthly postings and growth, then tax settlement, then records
//! snapshots. Given the same model and horizon the output is
//! bit-identical across runs: there is no randomness and no wall-clock
//! dependence anywhere in the loop.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{Datelike, Months, NaiveDate};
use log::debug;

use super::expander::{expand, merge_instances, Horizon};
use super::state::{EntityId, EntityInfo, EntityKind, SnapshotStore};
use super::tax::{TaxBands, TaxLedger};
use crate::error::EngineError;
use crate::model::data::{TransactionKind, CASH_ASSET_NAME};
use crate::model::names::Role;
use crate::model::norm::{NormModel, NormTransaction, ValueSpec};
use crate::resolve::settings::SettingsTimeline;

/// Configuration for a projection run
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Start of the reported window
    pub roi_start: NaiveDate,

    /// End of the reported window; also the simulation horizon end
    pub roi_end: NaiveDate,

    /// Annual CPI percentage compounded into non-immune entities
    pub cpi: f64,

    /// Band tables used at tax settlement
    pub bands: TaxBands,
}

impl ProjectionConfig {
    pub fn new(roi_start: NaiveDate, roi_end: NaiveDate) -> Self {
        Self {
            roi_start,
            roi_end,
            cpi: 0.0,
            bands: TaxBands::default(),
        }
    }
}

/// Everything a run produces: the value store (histories plus the flat
/// change table) and the tax ledger
#[derive(Debug, Clone)]
pub struct ProjectionOutput {
    pub store: SnapshotStore,
    pub ledger: TaxLedger,
}

/// Main projection engine
pub struct ProjectionEngine {
    model: NormModel,
    config: ProjectionConfig,
}

/// Where a transaction endpoint landed in the arena
#[derive(Debug, Clone, Copy, PartialEq)]
enum Endpoint {
    Asset(usize),
    Income(usize),
}

struct RunState {
    timeline: SettingsTimeline,
    store: SnapshotStore,
    ledger: TaxLedger,
    /// Remaining pro-ratable purchase price, by asset index
    purchase_remaining: Vec<Option<f64>>,
    cash: Option<EntityId>,
    /// Entities revalued at the date being processed; growth skips them
    revalued_today: HashSet<EntityId>,
}

impl ProjectionEngine {
    /// Create an engine over a normalized model
    pub fn new(model: NormModel, config: ProjectionConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Run the projection from the earliest entity date to the horizon
    /// end. Aborts with the first resolution error; no partial output.
    pub fn run(&self) -> Result<ProjectionOutput, EngineError> {
        let sim_start = self.sim_start();
        let horizon = Horizon::new(sim_start, self.config.roi_end);
        debug!(
            "projection horizon {} to {}",
            horizon.start, horizon.end
        );

        let mut run = RunState {
            timeline: self.folded_timeline(horizon),
            store: SnapshotStore::new(),
            ledger: TaxLedger::new(self.config.bands.clone()),
            purchase_remaining: self.model.assets.iter().map(|a| a.purchase_price).collect(),
            cash: None,
            revalued_today: HashSet::new(),
        };
        self.register_entities(&mut run);

        // Instances of every transaction except the setting revaluations
        // already folded into the timeline
        let sim_transactions: Vec<NormTransaction> = self
            .model
            .transactions
            .iter()
            .filter(|t| !self.is_setting_revaluation(t))
            .cloned()
            .collect();
        let mut instances: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (date, idx) in merge_instances(&sim_transactions, horizon) {
            instances.entry(date).or_default().push(idx);
        }

        let growth_dates = month_sequence(sim_start, self.config.roi_end);
        let snapshot_dates = month_sequence(self.config.roi_start, self.config.roi_end);
        let tax_dates = april_fifths(sim_start, self.config.roi_end);

        let mut event_dates: BTreeSet<NaiveDate> = BTreeSet::new();
        event_dates.extend(instances.keys().copied());
        event_dates.extend(growth_dates.iter().copied());
        event_dates.extend(snapshot_dates.iter().copied());
        event_dates.extend(tax_dates.iter().copied());
        for asset in &self.model.assets {
            event_dates.insert(asset.start.min(self.config.roi_end));
        }
        for income in &self.model.incomes {
            event_dates.insert(income.value_set_date.min(self.config.roi_end));
        }
        for expense in &self.model.expenses {
            event_dates.insert(expense.value_set_date.min(self.config.roi_end));
        }

        for date in event_dates {
            run.revalued_today.clear();
            self.activate_due_entities(&mut run, date)?;

            let due = instances.get(&date).cloned().unwrap_or_default();

            // 1. Revaluations overwrite values before anything else moves
            for &idx in &due {
                let t = &sim_transactions[idx];
                if is_revaluation(t) {
                    self.apply_revaluation(&mut run, t, date)?;
                }
            }

            // 2. Conditionals fire only while they keep their target from
            //    staying negative
            for &idx in &due {
                let t = &sim_transactions[idx];
                if is_conditional(t) {
                    self.apply_conditional(&mut run, t, date)?;
                }
            }

            // 3. Ordinary transactions
            for &idx in &due {
                let t = &sim_transactions[idx];
                if !is_revaluation(t) && !is_conditional(t) {
                    self.apply_ordinary(&mut run, t, date)?;
                }
            }

            // 4. Monthly postings and growth
            if growth_dates.contains(&date) {
                self.post_incomes_and_expenses(&mut run, date)?;
                self.apply_growth(&mut run, date)?;
            }

            // 5. Tax settlement at the year end
            if tax_dates.contains(&date) {
                self.settle_taxes(&mut run, date);
            }

            // 6. Reporting boundary
            if snapshot_dates.contains(&date) {
                run.store.record_snapshots(date);
            }
        }

        Ok(ProjectionOutput {
            store: run.store,
            ledger: run.ledger,
        })
    }

    /// Simulation starts at the earliest fact the model states, so values
    /// quoted in the past have compounded correctly by the report window
    fn sim_start(&self) -> NaiveDate {
        let mut start = self.config.roi_start;
        for a in &self.model.assets {
            start = start.min(a.start);
        }
        for i in &self.model.incomes {
            start = start.min(i.start).min(i.value_set_date);
        }
        for e in &self.model.expenses {
            start = start.min(e.start).min(e.value_set_date);
        }
        start
    }

    /// Clone the base settings timeline and fold in every dated setting
    /// revaluation, so in-run resolution is a pure as-of lookup
    fn folded_timeline(&self, horizon: Horizon) -> SettingsTimeline {
        let mut timeline = self.model.settings.clone();
        for t in &self.model.transactions {
            if !self.is_setting_revaluation(t) {
                continue;
            }
            let (Some(target), Some(spec)) = (t.to.as_deref(), t.to_value.as_ref()) else {
                continue;
            };
            for date in expand(t, horizon) {
                timeline.record_revaluation(target, date, &spec.to_string());
            }
        }
        timeline
    }

    fn is_setting_revaluation(&self, t: &NormTransaction) -> bool {
        is_revaluation(t)
            && t.to
                .as_deref()
                .map(|to| self.model.settings.contains(to))
                .unwrap_or(false)
    }

    fn register_entities(&self, run: &mut RunState) {
        for a in &self.model.assets {
            let id = run.store.register(EntityInfo {
                kind: EntityKind::Asset,
                name: a.name.clone(),
                category: a.category.clone(),
            });
            if a.name == CASH_ASSET_NAME {
                run.cash = Some(id);
            }
        }
        for i in &self.model.incomes {
            run.store.register(EntityInfo {
                kind: EntityKind::Income,
                name: i.name.clone(),
                category: i.category.clone(),
            });
        }
        for e in &self.model.expenses {
            run.store.register(EntityInfo {
                kind: EntityKind::Expense,
                name: e.name.clone(),
                category: e.category.clone(),
            });
        }
    }

    fn asset_id(&self, asset_idx: usize) -> EntityId {
        asset_idx
    }

    fn income_id(&self, income_idx: usize) -> EntityId {
        self.model.assets.len() + income_idx
    }

    fn expense_id(&self, expense_idx: usize) -> EntityId {
        self.model.assets.len() + self.model.incomes.len() + expense_idx
    }

    fn find_endpoint(&self, name: &str) -> Option<Endpoint> {
        if let Some(i) = self.model.assets.iter().position(|a| a.name == name) {
            return Some(Endpoint::Asset(i));
        }
        self.model
            .incomes
            .iter()
            .position(|i| i.name == name)
            .map(Endpoint::Income)
    }

    fn activate_due_entities(&self, run: &mut RunState, date: NaiveDate) -> Result<(), EngineError> {
        for (idx, a) in self.model.assets.iter().enumerate() {
            let id = self.asset_id(idx);
            if !run.store.is_active(id) && a.start <= date {
                let unit = run.timeline.resolve_spec(&a.value, a.start, None)?;
                let mut value = unit * a.quantity;
                if a.is_debt {
                    // Debts are entered as an owed balance and tracked
                    // negative
                    value = -value.abs();
                }
                run.store.activate(id, date, value, "start");
            }
        }
        for (idx, i) in self.model.incomes.iter().enumerate() {
            let id = self.income_id(idx);
            if !run.store.is_active(id) && i.value_set_date <= date {
                let value = run.timeline.resolve_spec(&i.value, i.value_set_date, None)?;
                run.store.activate(id, date, value, "start");
            }
        }
        for (idx, e) in self.model.expenses.iter().enumerate() {
            let id = self.expense_id(idx);
            if !run.store.is_active(id) && e.value_set_date <= date {
                let value = run.timeline.resolve_spec(&e.value, e.value_set_date, None)?;
                run.store.activate(id, date, value, "start");
            }
        }
        Ok(())
    }

    fn apply_revaluation(
        &self,
        run: &mut RunState,
        t: &NormTransaction,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let target = t
            .to
            .as_deref()
            .ok_or_else(|| EngineError::UnknownEntity(t.name.clone()))?;
        let spec = t
            .to_value
            .as_ref()
            .ok_or_else(|| EngineError::UnknownEntity(t.name.clone()))?;

        let (id, quantity, is_debt) = match self.find_endpoint(target) {
            Some(Endpoint::Asset(i)) => {
                let a = &self.model.assets[i];
                (self.asset_id(i), a.quantity, a.is_debt)
            }
            Some(Endpoint::Income(i)) => (self.income_id(i), 1.0, false),
            None => match self.model.expenses.iter().position(|e| e.name == target) {
                Some(i) => (self.expense_id(i), 1.0, false),
                None => return Err(EngineError::UnknownEntity(target.to_string())),
            },
        };

        let current = run.store.value(id);
        let resolved = run.timeline.resolve_spec(spec, date, Some(current))?;
        let mut new = match spec {
            // A percentage revalues relative to the current total
            ValueSpec::Percent(_) => resolved,
            // A unit price scales by the held quantity
            _ => resolved * quantity,
        };
        if is_debt {
            new = -new.abs();
        }
        run.store.set_value(id, date, new, &t.name);
        run.revalued_today.insert(id);
        Ok(())
    }

    fn apply_conditional(
        &self,
        run: &mut RunState,
        t: &NormTransaction,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let (Some(from), Some(to)) = (t.from.as_deref(), t.to.as_deref()) else {
            return Ok(());
        };
        let Some(Endpoint::Asset(from_idx)) = self.find_endpoint(from) else {
            return Err(EngineError::UnknownEntity(from.to_string()));
        };
        let Some(Endpoint::Asset(to_idx)) = self.find_endpoint(to) else {
            return Err(EngineError::UnknownEntity(to.to_string()));
        };
        let from_id = self.asset_id(from_idx);
        let to_id = self.asset_id(to_idx);
        if !run.store.is_active(from_id) || !run.store.is_active(to_id) {
            return Ok(());
        }

        // Debts sit negative, cash shortfalls sit negative: either way the
        // conditional only fires while the target is below zero
        let need = -run.store.value(to_id);
        if need <= 0.0 {
            return Ok(());
        }

        let source_val = run.store.value(from_id);
        let from_spec = match &t.from_value {
            Some(spec) => spec,
            None => return Ok(()),
        };
        let candidate = amount_from(&run.timeline, from_spec, t.from_absolute, source_val, date)?;
        let to_candidate = match &t.to_value {
            Some(spec) => amount_from(&run.timeline, spec, t.to_absolute, candidate, date)?,
            None => candidate,
        };
        if candidate <= 0.0 || to_candidate <= 0.0 {
            return Ok(());
        }

        // Cap so the target lands on zero and the source is not overdrawn
        let ratio = to_candidate / candidate;
        let mut from_amount = candidate.min(need / ratio);
        let from_asset = &self.model.assets[from_idx];
        if !from_asset.can_be_negative {
            from_amount = from_amount.min(source_val.max(0.0));
        }
        if from_amount <= 0.0 {
            return Ok(());
        }
        let to_amount = from_amount * ratio;

        debug!("conditional '{}' moves {:.2} on {}", t.name, from_amount, date);
        self.move_between_assets(run, from_idx, to_idx, from_amount, to_amount, date, &t.name)
    }

    fn apply_ordinary(
        &self,
        run: &mut RunState,
        t: &NormTransaction,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let from_endpoint = match t.from.as_deref() {
            Some(name) => Some(
                self.find_endpoint(name)
                    .ok_or_else(|| EngineError::UnknownEntity(name.to_string()))?,
            ),
            None => None,
        };

        match from_endpoint {
            Some(Endpoint::Income(income_idx)) => {
                self.apply_from_income(run, t, income_idx, date)
            }
            Some(Endpoint::Asset(from_idx)) => self.apply_from_asset(run, t, from_idx, date),
            None => {
                // External inflow: value appears from outside the model
                let (Some(to), Some(spec)) = (t.to.as_deref(), t.to_value.as_ref()) else {
                    return Ok(());
                };
                let to_id = match self.find_endpoint(to) {
                    Some(Endpoint::Asset(i)) => self.asset_id(i),
                    Some(Endpoint::Income(i)) => self.income_id(i),
                    None => return Err(EngineError::UnknownEntity(to.to_string())),
                };
                let amount = run.timeline.resolve_spec(spec, date, None)?;
                run.store.add(to_id, date, amount, &t.name);
                Ok(())
            }
        }
    }

    /// Transactions drawing on an income: pension contributions and DB
    /// accrual. The income keeps posting gross; the contribution comes
    /// back out of cash, with tax relief through the ledger.
    fn apply_from_income(
        &self,
        run: &mut RunState,
        t: &NormTransaction,
        income_idx: usize,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let income = &self.model.incomes[income_idx];
        let income_id = self.income_id(income_idx);
        if !run.store.is_active(income_id) {
            return Ok(());
        }

        // An entitlement transfer moves value between incomes outright:
        // no cash movement, no relief, and no payout-window constraint
        if t.role == Role::PensionDbTransfer {
            let entitlement = run.store.value(income_id);
            let from_spec = match &t.from_value {
                Some(spec) => spec,
                None => return Ok(()),
            };
            let from_amount =
                amount_from(&run.timeline, from_spec, t.from_absolute, entitlement, date)?;
            if from_amount <= 0.0 {
                return Ok(());
            }
            let to_amount = match &t.to_value {
                Some(spec) => amount_from(&run.timeline, spec, t.to_absolute, from_amount, date)?,
                None => from_amount,
            };
            run.store.add(income_id, date, -from_amount, &t.name);
            if let Some(to) = t.to.as_deref() {
                let to_id = match self.find_endpoint(to) {
                    Some(Endpoint::Income(i)) => self.income_id(i),
                    Some(Endpoint::Asset(i)) => self.asset_id(i),
                    None => return Err(EngineError::UnknownEntity(to.to_string())),
                };
                run.store.add(to_id, date, to_amount, &t.name);
            }
            return Ok(());
        }

        // Contributions only draw on an income while it is paying out
        if date < income.start || date > income.end {
            return Ok(());
        }

        let salary = run.store.value(income_id);
        let from_spec = match &t.from_value {
            Some(spec) => spec,
            None => return Ok(()),
        };
        let from_amount = amount_from(&run.timeline, from_spec, t.from_absolute, salary, date)?;
        if from_amount <= 0.0 {
            return Ok(());
        }
        let to_amount = match &t.to_value {
            Some(spec) => amount_from(&run.timeline, spec, t.to_absolute, from_amount, date)?,
            None => from_amount,
        };

        // The contribution reduces take-home pay
        if let Some(cash) = run.cash {
            run.store.add(cash, date, -from_amount, &t.name);
        }

        if t.role.is_pension() {
            if let Some(person) = income.liability.as_deref() {
                let also_ni = t.role == Role::PensionSs;
                run.ledger.post_relief(date, person, from_amount, also_ni);
            }
        }

        if let Some(to) = t.to.as_deref() {
            let to_id = match self.find_endpoint(to) {
                Some(Endpoint::Asset(i)) => self.asset_id(i),
                // DB accrual adds to the entitlement's monthly value
                Some(Endpoint::Income(i)) => self.income_id(i),
                None => return Err(EngineError::UnknownEntity(to.to_string())),
            };
            run.store.add(to_id, date, to_amount, &t.name);
        }
        Ok(())
    }

    fn apply_from_asset(
        &self,
        run: &mut RunState,
        t: &NormTransaction,
        from_idx: usize,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let from_asset = &self.model.assets[from_idx];
        let from_id = self.asset_id(from_idx);
        if !run.store.is_active(from_id) {
            return Ok(());
        }

        let source_val = run.store.value(from_id);
        let from_spec = match &t.from_value {
            Some(spec) => spec,
            None => return Ok(()),
        };
        let mut from_amount =
            amount_from(&run.timeline, from_spec, t.from_absolute, source_val, date)?;
        if !from_asset.can_be_negative {
            from_amount = from_amount.min(source_val.max(0.0));
        }
        if from_amount <= 0.0 {
            return Ok(());
        }
        let to_amount = match &t.to_value {
            Some(spec) => amount_from(&run.timeline, spec, t.to_absolute, from_amount, date)?,
            None => from_amount,
        };

        let Some(to) = t.to.as_deref() else {
            // Pure outflow
            run.store.add(from_id, date, -from_amount, &t.name);
            return Ok(());
        };

        match self.find_endpoint(to) {
            Some(Endpoint::Asset(to_idx)) => {
                let to_asset = &self.model.assets[to_idx];
                if from_asset.role == Role::PensionDc
                    && to_asset.role == Role::CrystallizedTaxable
                {
                    self.crystallize(run, t, from_idx, to_idx, from_amount, to_amount, date)
                } else {
                    self.move_between_assets(
                        run,
                        from_idx,
                        to_idx,
                        from_amount,
                        to_amount,
                        date,
                        &t.name,
                    )
                }
            }
            Some(Endpoint::Income(to_idx)) => {
                // DB transfers move entitlement value between incomes
                run.store.add(from_id, date, -from_amount, &t.name);
                run.store
                    .add(self.income_id(to_idx), date, to_amount, &t.name);
                Ok(())
            }
            None => Err(EngineError::UnknownEntity(to.to_string())),
        }
    }

    /// Crystallization: a DC pot splits 25% tax-free / 75% taxable. No
    /// tax falls due at crystallization itself.
    fn crystallize(
        &self,
        run: &mut RunState,
        t: &NormTransaction,
        from_idx: usize,
        to_idx: usize,
        from_amount: f64,
        to_amount: f64,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let from_asset = &self.model.assets[from_idx];
        let to_asset = &self.model.assets[to_idx];
        run.store
            .add(self.asset_id(from_idx), date, -from_amount, &t.name);

        let tax_free_target = self.model.assets.iter().position(|a| {
            a.role == Role::CrystallizedTaxFree
                && (a.base == from_asset.base || a.base == to_asset.base)
        });

        match tax_free_target {
            Some(tf_idx) => {
                let tax_free = to_amount * 0.25;
                run.store
                    .add(self.asset_id(tf_idx), date, tax_free, &t.name);
                run.store
                    .add(self.asset_id(to_idx), date, to_amount - tax_free, &t.name);
            }
            None => {
                run.store
                    .add(self.asset_id(to_idx), date, to_amount, &t.name);
            }
        }
        Ok(())
    }

    /// The general asset-to-asset move, carrying the CGT and
    /// crystallized-withdrawal side effects
    fn move_between_assets(
        &self,
        run: &mut RunState,
        from_idx: usize,
        to_idx: usize,
        from_amount: f64,
        to_amount: f64,
        date: NaiveDate,
        source: &str,
    ) -> Result<(), EngineError> {
        let from_asset = &self.model.assets[from_idx];
        let from_id = self.asset_id(from_idx);
        let source_val = run.store.value(from_id);

        run.store.add(from_id, date, -from_amount, source);
        run.store.add(self.asset_id(to_idx), date, to_amount, source);

        // CGT on disposal: gain is proceeds less the pro-rated purchase
        // price; the remaining purchase price shrinks by the sold share
        if let (Some(pp), Some(person)) = (
            run.purchase_remaining[from_idx],
            from_asset.liability.as_deref(),
        ) {
            if source_val > 0.0 && from_amount > 0.0 {
                let fraction = (from_amount / source_val).min(1.0);
                let gain = from_amount - pp * fraction;
                run.ledger.post_gain(date, person, gain);
                run.purchase_remaining[from_idx] = Some(pp * (1.0 - fraction));
            }
        }

        // Drawing down a crystallized pot is taxable income, without NI
        if from_asset.role == Role::CrystallizedTaxable && from_amount > 0.0 {
            if let Some(person) = from_asset.liability.as_deref() {
                run.ledger.post_income(date, person, from_amount, false);
            }
        }
        Ok(())
    }

    /// Monthly income/expense postings into and out of cash
    fn post_incomes_and_expenses(
        &self,
        run: &mut RunState,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        for (idx, income) in self.model.incomes.iter().enumerate() {
            let id = self.income_id(idx);
            if !run.store.is_active(id) || date < income.start || date > income.end {
                continue;
            }
            let amount = run.store.value(id);
            if amount == 0.0 {
                continue;
            }
            if let Some(cash) = run.cash {
                run.store.add(cash, date, amount, &income.name);
            }
            if let Some(person) = income.liability.as_deref() {
                // DB pension income owes income tax but not NI
                let ni_able = income.role != Role::PensionDb;
                run.ledger.post_income(date, person, amount, ni_able);
            }
        }
        for (idx, expense) in self.model.expenses.iter().enumerate() {
            let id = self.expense_id(idx);
            if !run.store.is_active(id) || date < expense.start || date > expense.end {
                continue;
            }
            let amount = run.store.value(id);
            if amount == 0.0 {
                continue;
            }
            if let Some(cash) = run.cash {
                run.store.add(cash, date, -amount, &expense.name);
            }
        }
        Ok(())
    }

    /// Compound one month of growth (and CPI for non-immune entities)
    /// into everything active and not revalued at this date
    fn apply_growth(&self, run: &mut RunState, date: NaiveDate) -> Result<(), EngineError> {
        let cpi_factor = monthly_factor(self.config.cpi);

        // Entities starting today hold their quoted value; their first
        // month of growth lands on the next boundary
        for (idx, a) in self.model.assets.iter().enumerate() {
            let id = self.asset_id(idx);
            if !run.store.is_active(id) || run.revalued_today.contains(&id) || a.start == date {
                continue;
            }
            let factor = self.entity_growth_factor(run, &a.growth, a.cpi_immune, cpi_factor, date)?;
            run.store.scale(id, factor);
        }
        for (idx, i) in self.model.incomes.iter().enumerate() {
            let id = self.income_id(idx);
            if !run.store.is_active(id)
                || run.revalued_today.contains(&id)
                || i.value_set_date == date
            {
                continue;
            }
            let factor = self.entity_growth_factor(run, &i.growth, i.cpi_immune, cpi_factor, date)?;
            run.store.scale(id, factor);
        }
        for (idx, e) in self.model.expenses.iter().enumerate() {
            let id = self.expense_id(idx);
            if !run.store.is_active(id)
                || run.revalued_today.contains(&id)
                || e.value_set_date == date
            {
                continue;
            }
            let factor = self.entity_growth_factor(run, &e.growth, e.cpi_immune, cpi_factor, date)?;
            run.store.scale(id, factor);
        }
        Ok(())
    }

    fn entity_growth_factor(
        &self,
        run: &RunState,
        growth: &Option<ValueSpec>,
        cpi_immune: bool,
        cpi_factor: f64,
        date: NaiveDate,
    ) -> Result<f64, EngineError> {
        let annual_pct = match growth {
            None => 0.0,
            Some(ValueSpec::Literal(g)) | Some(ValueSpec::Percent(g)) => *g,
            Some(spec @ ValueSpec::SettingScaled { .. }) => {
                run.timeline.resolve_spec(spec, date, None)?
            }
        };
        let mut factor = monthly_factor(annual_pct);
        if !cpi_immune {
            factor *= cpi_factor;
        }
        Ok(factor)
    }

    fn settle_taxes(&self, run: &mut RunState, date: NaiveDate) {
        let settlements = run.ledger.settle_year(date);
        for s in &settlements {
            debug!(
                "tax settlement {} {} {:.2} at {}",
                s.person,
                s.kind.as_str(),
                s.amount,
                date
            );
            if let Some(cash) = run.cash {
                run.store.add(cash, date, -s.amount, s.kind.as_str());
            }
        }
    }
}

/// Convert an annual percentage growth rate into a monthly factor
fn monthly_factor(annual_pct: f64) -> f64 {
    (1.0 + annual_pct / 100.0).powf(1.0 / 12.0)
}

/// Resolve a transaction amount expression against its base value.
/// Percentages are always relative to the base; literals and settings
/// are absolute amounts when the flag says so, fractions otherwise.
fn amount_from(
    timeline: &SettingsTimeline,
    spec: &ValueSpec,
    absolute: bool,
    base: f64,
    date: NaiveDate,
) -> Result<f64, EngineError> {
    let resolved = timeline.resolve_spec(spec, date, Some(base))?;
    Ok(match spec {
        ValueSpec::Percent(_) => resolved,
        _ if absolute => resolved,
        _ => resolved * base,
    })
}

/// Monthly anniversaries of `start`, inclusive of both window ends
fn month_sequence(start: NaiveDate, end: NaiveDate) -> BTreeSet<NaiveDate> {
    let mut out = BTreeSet::new();
    let mut k = 0u32;
    loop {
        let Some(date) = start.checked_add_months(Months::new(k)) else {
            break;
        };
        if date > end {
            break;
        }
        out.insert(date);
        k += 1;
    }
    out
}

/// Every 5 April inside the window
fn april_fifths(start: NaiveDate, end: NaiveDate) -> BTreeSet<NaiveDate> {
    let mut out = BTreeSet::new();
    for year in start.year()..=end.year() {
        if let Some(d) = NaiveDate::from_ymd_opt(year, 4, 5) {
            if d >= start && d <= end {
                out.insert(d);
            }
        }
    }
    out
}

fn is_revaluation(t: &NormTransaction) -> bool {
    t.role == Role::Revaluation || t.kind == TransactionKind::Revaluation
}

fn is_conditional(t: &NormTransaction) -> bool {
    t.role == Role::Conditional
        || matches!(
            t.kind,
            TransactionKind::LiquidateForCash | TransactionKind::PayOffDebts
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::data::Model;
    use crate::validate::normalize;
    use approx::assert_relative_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn parse(json: &str) -> NormModel {
        let model: Model = serde_json::from_str(json).unwrap();
        normalize(&model).expect("model should validate")
    }

    fn run_model(json: &str, config: ProjectionConfig) -> ProjectionOutput {
        let norm = parse(json);
        ProjectionEngine::new(norm, config).run().unwrap()
    }

    #[test]
    fn test_growth_compounds_monthly() {
        let out = run_model(
            r#"{"assets": [{"name": "stocks", "start": "2020", "value": "1000",
                 "growth": "12", "cpiImmune": "T"}]}"#,
            ProjectionConfig::new(d(2020, 1, 1), d(2021, 1, 1)),
        );
        let history = out.store.history(0);
        let expected = 1000.0 * (1.0_f64 + 0.12).powf(1.0 / 12.0).powi(12);
        assert_relative_eq!(history.last().unwrap().1, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_cpi_compounds_unless_immune() {
        let json = r#"{"assets": [
            {"name": "a", "start": "2020", "value": "1000", "cpiImmune": "F"},
            {"name": "b", "start": "2020", "value": "1000", "cpiImmune": "T"}
        ]}"#;
        let mut config = ProjectionConfig::new(d(2020, 1, 1), d(2021, 1, 1));
        config.cpi = 2.5;
        let out = run_model(json, config);
        let a = out.store.history(0).last().unwrap().1;
        let b = out.store.history(1).last().unwrap().1;
        assert_relative_eq!(a, 1025.0, epsilon = 1e-6);
        assert_relative_eq!(b, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_determinism_bit_identical() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "500", "canBeNegative": "T"},
            {"name": "stocks", "start": "2020", "value": "1000", "growth": "5"}
        ],
        "transactions": [{"name": "drip", "from": "stocks", "fromAbsolute": "T",
            "fromValue": "20", "to": "Cash", "toAbsolute": "F", "toValue": "100%",
            "date": "2020-02-01", "recurrence": "1m"}]}"#;
        let config = ProjectionConfig::new(d(2020, 1, 1), d(2025, 1, 1));
        let first = run_model(json, config.clone());
        let second = run_model(json, config);
        let a: Vec<_> = first.store.ids().map(|id| first.store.history(id).to_vec()).collect();
        let b: Vec<_> = second.store.ids().map(|id| second.store.history(id).to_vec()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_percentage_transaction_semantics() {
        // 90% of the from-amount lands in the destination
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"},
            {"name": "stocks", "start": "2020", "value": "1000"}
        ],
        "transactions": [{"name": "sell some", "from": "stocks", "fromAbsolute": "F",
            "fromValue": "50%", "to": "Cash", "toAbsolute": "F", "toValue": "90%",
            "date": "2020-06-15"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        let changes = out.store.changes();
        let sale: Vec<_> = changes.iter().filter(|c| c.source == "sell some").collect();
        assert_eq!(sale.len(), 2);
        assert_relative_eq!(sale[0].change, -500.0, epsilon = 1e-9);
        assert_relative_eq!(sale[1].change, 450.0, epsilon = 1e-9);
    }

    #[test]
    fn test_revaluation_overwrites_before_transactions_and_skips_growth() {
        let json = r#"{"assets": [
            {"name": "house", "start": "2020", "value": "100000", "growth": "10"}
        ],
        "transactions": [{"name": "Revalue house", "to": "house", "toAbsolute": "T",
            "toValue": "90000", "date": "2020-07-01", "kind": "revaluation"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 8, 1)));
        let reval = out
            .store
            .changes()
            .iter()
            .find(|c| c.source == "Revalue house")
            .unwrap()
            .clone();
        assert_eq!(reval.new_value, 90000.0);
        // Growth is skipped on the revaluation date itself
        let history = out.store.history(0);
        let july = history.iter().find(|(dt, _)| *dt == d(2020, 7, 1)).unwrap();
        assert_relative_eq!(july.1, 90000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_revaluation_idempotent_at_same_date() {
        let json = r#"{"assets": [
            {"name": "house", "start": "2020", "value": "100000"}
        ],
        "transactions": [
            {"name": "Revalue house", "to": "house", "toAbsolute": "T",
             "toValue": "90000", "date": "2020-07-01", "kind": "revaluation"},
            {"name": "Revalue house again", "to": "house", "toAbsolute": "T",
             "toValue": "90000", "date": "2020-07-01", "kind": "revaluation"}
        ]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 8, 1)));
        assert_relative_eq!(out.store.value(0), 90000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_conditional_fires_only_when_target_negative() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "-100", "canBeNegative": "T"},
            {"name": "stocks", "start": "2020", "value": "1000"}
        ],
        "transactions": [{"name": "Conditional sell stocks", "from": "stocks",
            "fromAbsolute": "T", "fromValue": "500", "to": "Cash", "toAbsolute": "F",
            "toValue": "100%", "date": "2020-02-01", "recurrence": "1m",
            "stopDate": "2020-04-01", "kind": "liquidateForCash"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 6, 1)));
        // First firing tops cash up to exactly zero; later firings do nothing
        let sales: Vec<_> = out
            .store
            .changes()
            .iter()
            .filter(|c| c.source == "Conditional sell stocks" && c.name == "stocks")
            .cloned()
            .collect();
        assert_eq!(sales.len(), 1);
        assert_relative_eq!(sales[0].change, -100.0, epsilon = 1e-9);
        assert_relative_eq!(out.store.value(0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_conditional_debt_payoff_stops_at_zero() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "10000", "canBeNegative": "T"},
            {"name": "mortgage", "start": "2020", "value": "700", "isDebt": "T"}
        ],
        "transactions": [{"name": "Conditional pay mortgage", "from": "Cash",
            "fromAbsolute": "T", "fromValue": "300", "to": "mortgage", "toAbsolute": "F",
            "toValue": "100%", "date": "2020-02-01", "recurrence": "1m",
            "kind": "payOffDebts"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        // 700 owed: 300 + 300 + 100, then nothing further
        let payments: Vec<_> = out
            .store
            .changes()
            .iter()
            .filter(|c| c.source == "Conditional pay mortgage" && c.name == "mortgage")
            .map(|c| c.change)
            .collect();
        assert_eq!(payments.len(), 3);
        assert_relative_eq!(payments[0], 300.0, epsilon = 1e-9);
        assert_relative_eq!(payments[2], 100.0, epsilon = 1e-9);
        assert_relative_eq!(out.store.value(1), 0.0, epsilon = 1e-9);
        assert_relative_eq!(out.store.value(0), 10000.0 - 700.0, epsilon = 1e-9);
    }

    #[test]
    fn test_income_posts_to_cash_and_ledger() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"}
        ],
        "incomes": [{"name": "salary", "start": "2020-01-01", "end": "2020-06-15",
            "value": "2000", "valueSetDate": "2020-01-01", "cpiImmune": "T",
            "liability": "Joe"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        // Posts on Jan 1 .. Jun 1 boundaries
        assert_relative_eq!(out.store.value(0), 12000.0, epsilon = 1e-9);
        let base = out.ledger.cumulative_base(
            "Joe",
            crate::simulate::tax::LiabilityKind::IncomeTax,
            d(2020, 12, 1),
            false,
        );
        assert_relative_eq!(base, 12000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_expense_before_window_has_no_effect() {
        // Cash 0, a 99/month expense starting 2018 with 12% growth, viewed
        // Dec 2016 to Mar 2017: every data point is zero
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2016-12-01", "value": "0", "canBeNegative": "T"}
        ],
        "expenses": [{"name": "Phon", "start": "2018-01-01", "end": "2019-01-01",
            "value": "99", "valueSetDate": "2018-01-01", "growth": "12"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2016, 12, 1), d(2017, 3, 1)));
        for (_, v) in out.store.history(0) {
            assert_eq!(*v, 0.0);
        }
    }

    #[test]
    fn test_cgt_pro_rated_purchase_price() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"},
            {"name": "shares", "start": "2020", "value": "10000", "liability": "Joe",
             "purchasePrice": "4000"}
        ],
        "transactions": [{"name": "sell half", "from": "shares", "fromAbsolute": "F",
            "fromValue": "50%", "to": "Cash", "toAbsolute": "F", "toValue": "100%",
            "date": "2020-06-15"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        // Proceeds 5000 less half the purchase price (2000): gain 3000
        let gain = out.ledger.cumulative_base(
            "Joe",
            crate::simulate::tax::LiabilityKind::Cgt,
            d(2020, 12, 1),
            false,
        );
        assert_relative_eq!(gain, 3000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pension_contribution_relief_and_pot() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"},
            {"name": "Pension Aviva", "start": "2020", "value": "0"}
        ],
        "incomes": [{"name": "salary", "start": "2020-01-01", "end": "2021-01-01",
            "value": "3000", "valueSetDate": "2020-01-01", "cpiImmune": "T",
            "liability": "Joe"}],
        "transactions": [{"name": "PensionSS scheme", "from": "salary",
            "fromAbsolute": "F", "fromValue": "0.05", "to": "Pension Aviva",
            "toAbsolute": "F", "toValue": "2", "date": "2020-01-01",
            "stopDate": "2020-03-02", "recurrence": "1m", "kind": "autoPension"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 6, 1)));
        // Three contributions of 150, doubled by the employer match
        let pot = out.store.value(1);
        assert_relative_eq!(pot, 3.0 * 150.0 * 2.0, epsilon = 1e-9);
        // Salary sacrifice reduces both income tax and NI bases
        let it = out.ledger.cumulative_base(
            "Joe",
            crate::simulate::tax::LiabilityKind::IncomeTax,
            d(2020, 6, 1),
            false,
        );
        let ni = out.ledger.cumulative_base(
            "Joe",
            crate::simulate::tax::LiabilityKind::Ni,
            d(2020, 6, 1),
            false,
        );
        // Six salary postings minus three contributions
        assert_relative_eq!(it, 6.0 * 3000.0 - 450.0, epsilon = 1e-9);
        assert_relative_eq!(ni, 6.0 * 3000.0 - 450.0, epsilon = 1e-9);
    }

    #[test]
    fn test_crystallization_splits_tax_free_quarter() {
        let json = r#"{"assets": [
            {"name": "Pension Aviva", "start": "2020", "value": "100000"},
            {"name": "CrystallizedPension Joe", "start": "2020", "value": "0",
             "liability": "Joe"},
            {"name": "TaxFree Aviva", "start": "2020", "value": "0"}
        ],
        "transactions": [{"name": "crystallize", "from": "Pension Aviva",
            "fromAbsolute": "F", "fromValue": "100%", "to": "CrystallizedPension Joe",
            "toAbsolute": "F", "toValue": "100%", "date": "2020-06-15",
            "kind": "autoPension"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        assert_relative_eq!(out.store.value(0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(out.store.value(1), 75000.0, epsilon = 1e-9);
        assert_relative_eq!(out.store.value(2), 25000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_crystallized_withdrawal_is_taxable_income() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"},
            {"name": "CrystallizedPension Joe", "start": "2020", "value": "50000",
             "liability": "Joe"}
        ],
        "transactions": [{"name": "draw down", "from": "CrystallizedPension Joe",
            "fromAbsolute": "T", "fromValue": "1000", "to": "Cash", "toAbsolute": "F",
            "toValue": "100%", "date": "2020-02-01", "recurrence": "1m",
            "stopDate": "2020-04-02"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        let it = out.ledger.cumulative_base(
            "Joe",
            crate::simulate::tax::LiabilityKind::IncomeTax,
            d(2020, 12, 1),
            false,
        );
        let ni = out.ledger.cumulative_base(
            "Joe",
            crate::simulate::tax::LiabilityKind::Ni,
            d(2020, 12, 1),
            false,
        );
        assert_relative_eq!(it, 3000.0, epsilon = 1e-9);
        assert_eq!(ni, 0.0);
    }

    #[test]
    fn test_settings_revaluation_changes_later_resolution_only() {
        let json = r#"{
        "settings": [{"name": "USD", "value": "2", "kind": "adjustable"}],
        "assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"}
        ],
        "transactions": [
            {"name": "Revalue USD", "to": "USD", "toAbsolute": "T", "toValue": "3",
             "date": "2020-06-01", "kind": "revaluation"},
            {"name": "pay early", "to": "Cash", "toAbsolute": "T", "toValue": "50USD",
             "date": "2020-03-01"},
            {"name": "pay late", "to": "Cash", "toAbsolute": "T", "toValue": "50USD",
             "date": "2020-09-01"}
        ]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2020, 12, 1)));
        let pays: Vec<f64> = out
            .store
            .changes()
            .iter()
            .filter(|c| c.source.starts_with("pay"))
            .map(|c| c.change)
            .collect();
        assert_eq!(pays, vec![100.0, 150.0]);
    }

    #[test]
    fn test_tax_settlement_deducts_from_cash() {
        let json = r#"{"assets": [
            {"name": "Cash", "start": "2020", "value": "0", "canBeNegative": "T"}
        ],
        "incomes": [{"name": "salary", "start": "2020-01-01", "end": "2022-01-01",
            "value": "3000", "valueSetDate": "2020-01-01", "cpiImmune": "T",
            "liability": "Joe"}]}"#;
        let out = run_model(json, ProjectionConfig::new(d(2020, 1, 1), d(2021, 6, 1)));
        let tax_changes: Vec<_> = out
            .store
            .changes()
            .iter()
            .filter(|c| c.source == "incomeTax" || c.source == "NI")
            .collect();
        assert!(!tax_changes.is_empty());
        assert!(tax_changes.iter().all(|c| c.change < 0.0));
        assert!(!out.ledger.settlements().is_empty());
    }
}
