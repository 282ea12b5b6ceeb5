//! Tabular outputs: the flat change table, settings values, tax summaries

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::norm::NormModel;
use crate::simulate::state::ValueChange;
use crate::simulate::tax::{LiabilityKind, TaxLedger};

/// The individual dated value changes inside a window, oldest first.
/// This is the "report table" callers render or export.
pub fn changes_in_window(
    changes: &[ValueChange],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<ValueChange> {
    changes
        .iter()
        .filter(|c| c.date >= start && c.date <= end)
        .cloned()
        .collect()
}

/// One row of the settings value table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingRow {
    pub name: String,
    /// Raw value text applicable at the queried date
    pub raw: String,
    /// Resolved number, when the setting resolves to one
    pub value: Option<f64>,
}

/// Per-setting "today's value" table, as-of a date
pub fn settings_table(model: &NormModel, as_of: NaiveDate) -> Vec<SettingRow> {
    let mut rows = Vec::new();
    for name in model.settings.names() {
        let raw = model
            .settings
            .raw_at(name, as_of)
            .unwrap_or_default()
            .to_string();
        let value = model.settings.resolve(name, as_of).ok();
        rows.push(SettingRow {
            name: name.to_string(),
            raw,
            value,
        });
    }
    rows
}

/// One row of the tax summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSummaryRow {
    pub person: String,
    pub kind: LiabilityKind,
    /// Cumulative taxable base up to the queried date
    pub taxable: f64,
    /// Cumulative settled liability up to the queried date
    pub liability: f64,
}

/// Cumulative tax position per (person, kind), as-of a date
pub fn tax_summary(ledger: &TaxLedger, as_of: NaiveDate, net_of_allowance: bool) -> Vec<TaxSummaryRow> {
    let mut rows = Vec::new();
    for person in ledger.persons() {
        for kind in [LiabilityKind::IncomeTax, LiabilityKind::Ni, LiabilityKind::Cgt] {
            let taxable = ledger.cumulative_base(&person, kind, as_of, net_of_allowance);
            let liability = ledger.settled_total(&person, kind, as_of);
            if taxable != 0.0 || liability != 0.0 {
                rows.push(TaxSummaryRow {
                    person: person.clone(),
                    kind,
                    taxable,
                    liability,
                });
            }
        }
    }
    rows
}
