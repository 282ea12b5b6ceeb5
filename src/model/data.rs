//! Wire model structures as handed over by the form/persistence layer
//!
//! All value, growth, date and flag fields are kept as the strings callers
//! supply; the validator reports diagnostics against the raw text and the
//! normalizer converts a checked model into the typed form the clock uses.

use serde::{Deserialize, Serialize};

/// Name of the distinguished cash asset every model carries
pub const CASH_ASSET_NAME: &str = "Cash";

fn default_false_flag() -> String {
    "F".to_string()
}

/// Kind of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    /// Fixed for the life of the model
    Const,
    /// Consumed by the view layer (frequency, chart options)
    View,
    /// May be revalued at specific dates by dedicated transactions
    Adjustable,
}

/// A named value usable anywhere a number is expected
///
/// `value` may be a plain number, a percentage, or a number with a
/// currency-setting suffix ("50USD" = 50 x current value of setting "USD").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub name: String,
    pub value: String,
    /// Free-text hint shown by editing UIs; not interpreted by the engine
    #[serde(default)]
    pub hint: String,
    pub kind: SettingKind,
}

/// A named date usable anywhere a date is expected
///
/// `date` is either a literal date string or a ternary comparison over two
/// other trigger names ("A<B?B:A" = the later of A and B).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub name: String,
    pub date: String,
}

/// An asset, pension pot, or (with `is_debt`) a debt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub name: String,

    /// Grouping used by coarse-detail reporting; empty = ungrouped
    #[serde(default)]
    pub category: String,

    /// Date (or trigger) from which the asset exists
    pub start: String,

    /// Starting value: number or settings formula
    pub value: String,

    /// Optional unit count multiplying `value`; empty = 1
    #[serde(default)]
    pub quantity: String,

    /// Annual growth percentage or the name of a setting holding one
    #[serde(default)]
    pub growth: String,

    /// T/F: exempt from CPI compounding
    #[serde(default = "default_false_flag")]
    pub cpi_immune: String,

    /// T/F: the value may drop below zero without a conditional firing
    #[serde(default = "default_false_flag")]
    pub can_be_negative: String,

    /// T/F: this is a debt; the outstanding balance is tracked negative
    #[serde(default = "default_false_flag")]
    pub is_debt: String,

    /// Person liable for CGT on disposals; empty = nobody
    #[serde(default)]
    pub liability: String,

    /// Acquisition cost for CGT; empty = disposals are not CGT events
    #[serde(default)]
    pub purchase_price: String,
}

/// A recurring income paid monthly from `start` to `end`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    pub name: String,

    #[serde(default)]
    pub category: String,

    pub start: String,
    pub end: String,

    /// Monthly amount as of `value_set_date`
    pub value: String,

    /// Date the quoted value refers to; growth/CPI compound from here
    pub value_set_date: String,

    #[serde(default = "default_false_flag")]
    pub cpi_immune: String,

    #[serde(default)]
    pub growth: String,

    /// Person(s) owing income tax / NI on this income; empty = untaxed
    #[serde(default)]
    pub liability: String,
}

/// A recurring expense paid monthly from `start` to `end`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub name: String,

    #[serde(default)]
    pub category: String,

    pub start: String,
    pub end: String,

    /// Monthly amount as of `value_set_date`
    pub value: String,

    /// Date the quoted value refers to; growth/CPI compound from here
    pub value_set_date: String,

    #[serde(default = "default_false_flag")]
    pub cpi_immune: String,

    #[serde(default)]
    pub growth: String,
}

/// Origin of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    /// Entered directly by the user
    Custom,
    /// Generated by pension mechanics (contributions, accrual, transfers)
    AutoPension,
    /// Overwrites an entity or adjustable setting value; not a cash flow
    Revaluation,
    /// Conditional liquidation of an asset to keep cash non-negative
    LiquidateForCash,
    /// Conditional transfer paying down a debt while it is outstanding
    PayOffDebts,
    /// Bond purchase out of cash
    BondInvest,
    /// Bond maturity back into cash
    BondMature,
}

impl Default for TransactionKind {
    fn default() -> Self {
        TransactionKind::Custom
    }
}

/// A (possibly recurring) movement of value between entities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub name: String,

    /// Source entity name; empty = value appears from outside the model
    #[serde(default)]
    pub from: String,

    /// T/F: `from_value` is a literal amount rather than a % of the source
    #[serde(default = "default_false_flag")]
    pub from_absolute: String,

    #[serde(default)]
    pub from_value: String,

    /// Target entity name; empty = value leaves the model
    #[serde(default)]
    pub to: String,

    /// T/F: `to_value` is a literal amount rather than a % of the amount
    /// taken from the source
    #[serde(default = "default_false_flag")]
    pub to_absolute: String,

    #[serde(default)]
    pub to_value: String,

    /// First (or only) occurrence; date or trigger
    pub date: String,

    /// Last date a recurring transaction may fire; empty = horizon end
    #[serde(default)]
    pub stop_date: String,

    /// "" = one-off, or `<number>[w|m|y]`; fractional month counts allowed
    #[serde(default)]
    pub recurrence: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub kind: TransactionKind,
}

/// A complete declarative model: the immutable input of one projection run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(default)]
    pub settings: Vec<Setting>,

    #[serde(default)]
    pub triggers: Vec<Trigger>,

    #[serde(default)]
    pub assets: Vec<Asset>,

    #[serde(default)]
    pub incomes: Vec<Income>,

    #[serde(default)]
    pub expenses: Vec<Expense>,

    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Model {
    /// Look up an asset by name
    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// Look up an income by name
    pub fn income(&self, name: &str) -> Option<&Income> {
        self.incomes.iter().find(|i| i.name == name)
    }

    /// Look up an expense by name
    pub fn expense(&self, name: &str) -> Option<&Expense> {
        self.expenses.iter().find(|e| e.name == name)
    }

    /// Look up a setting by name
    pub fn setting(&self, name: &str) -> Option<&Setting> {
        self.settings.iter().find(|s| s.name == name)
    }

    /// Whether `name` refers to any asset, income or expense in the model
    pub fn has_entity(&self, name: &str) -> bool {
        self.asset(name).is_some() || self.income(name).is_some() || self.expense(name).is_some()
    }
}

/// Parse a T/F flag as supplied by the form layer
///
/// Accepts T/F, Y/N, True/False in any case. Returns None for anything
/// else so the validator can report the field instead of defaulting.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "t" | "y" | "true" | "yes" => Some(true),
        "f" | "n" | "false" | "no" => Some(false),
        _ => None,
    }
}
