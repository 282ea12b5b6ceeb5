//! Normalized model: the typed form a checked wire model is lowered to
//!
//! Dates are resolved through triggers to `NaiveDate`, flags to bools,
//! values to `ValueSpec` expressions (still time-varying through settings
//! references, so they are resolved as-of each simulated date), and each
//! name's role is decoded once and carried with the entity.

use chrono::NaiveDate;

use super::data::TransactionKind;
use super::names::Role;
use crate::resolve::settings::SettingsTimeline;

/// A parsed value expression: everything a value/growth field can hold
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    /// A plain number
    Literal(f64),
    /// A percentage ("90%" => 90.0); meaning depends on context
    Percent(f64),
    /// `<number><SETTING>`: factor times the setting's value as-of a date.
    /// A bare setting name parses with factor 1.
    SettingScaled { factor: f64, setting: String },
}

impl ValueSpec {
    /// Parse a raw value field. Returns None only for empty input; any
    /// non-numeric residue becomes a settings reference, whose existence
    /// the validator checks via the resolver.
    pub fn parse(raw: &str) -> Option<ValueSpec> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Some(ValueSpec::Literal(n));
        }
        if let Some(stripped) = raw.strip_suffix('%') {
            if let Ok(n) = stripped.trim().parse::<f64>() {
                return Some(ValueSpec::Percent(n));
            }
        }
        // Split a leading numeric factor from a trailing setting name
        let split = raw
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+'))
            .map(|(i, _)| i)
            .unwrap_or(raw.len());
        let (head, tail) = raw.split_at(split);
        if tail.is_empty() {
            // Numeric-looking but did not parse as f64 ("1.2.3")
            return None;
        }
        let factor = if head.is_empty() {
            1.0
        } else {
            head.parse::<f64>().ok()?
        };
        Some(ValueSpec::SettingScaled {
            factor,
            setting: tail.to_string(),
        })
    }

    /// The setting this expression references, if any
    pub fn setting_ref(&self) -> Option<&str> {
        match self {
            ValueSpec::SettingScaled { setting, .. } => Some(setting),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueSpec {
    /// Renders back to the wire form `parse` accepts
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSpec::Literal(n) => write!(f, "{}", n),
            ValueSpec::Percent(p) => write!(f, "{}%", p),
            ValueSpec::SettingScaled { factor, setting } => {
                if *factor == 1.0 {
                    write!(f, "{}", setting)
                } else {
                    write!(f, "{}{}", factor, setting)
                }
            }
        }
    }
}

/// How often a recurring transaction fires
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recurrence {
    /// Fires at most once, on its date
    OneOff,
    /// Every `count * 7` days
    Weekly(f64),
    /// The k-th instance falls `round(k * count)` calendar months after
    /// the first; fractional counts give non-uniform spacing
    Monthly(f64),
    /// Every `count` years
    Yearly(f64),
}

/// Why a recurrence string failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceError {
    /// Last character is not w, m or y
    BadSuffix,
    /// The part before the suffix is not a positive number
    BadCount,
}

impl Recurrence {
    /// Parse `""` or `<number>[w|m|y]`
    pub fn parse(raw: &str) -> Result<Recurrence, RecurrenceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Recurrence::OneOff);
        }
        if !raw.is_char_boundary(raw.len() - 1) {
            return Err(RecurrenceError::BadSuffix);
        }
        let (head, suffix) = raw.split_at(raw.len() - 1);
        let count: f64 = head.parse().map_err(|_| {
            if matches!(suffix, "w" | "m" | "y") {
                RecurrenceError::BadCount
            } else {
                RecurrenceError::BadSuffix
            }
        })?;
        if count <= 0.0 {
            return Err(RecurrenceError::BadCount);
        }
        match suffix {
            "w" => Ok(Recurrence::Weekly(count)),
            "m" => Ok(Recurrence::Monthly(count)),
            "y" => Ok(Recurrence::Yearly(count)),
            _ => Err(RecurrenceError::BadSuffix),
        }
    }
}

/// A normalized asset, pension pot or debt
#[derive(Debug, Clone)]
pub struct NormAsset {
    /// Full external name, prefix included
    pub name: String,
    /// Name with any role prefix stripped
    pub base: String,
    pub role: Role,
    pub category: String,
    pub start: NaiveDate,
    /// Starting value; debts hold their balance negative
    pub value: ValueSpec,
    pub quantity: f64,
    /// Annual growth percentage expression; None = no growth
    pub growth: Option<ValueSpec>,
    pub cpi_immune: bool,
    pub can_be_negative: bool,
    pub is_debt: bool,
    pub liability: Option<String>,
    pub purchase_price: Option<f64>,
}

/// A normalized income
#[derive(Debug, Clone)]
pub struct NormIncome {
    pub name: String,
    pub base: String,
    pub role: Role,
    pub category: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub value: ValueSpec,
    pub value_set_date: NaiveDate,
    pub cpi_immune: bool,
    pub growth: Option<ValueSpec>,
    pub liability: Option<String>,
}

/// A normalized expense
#[derive(Debug, Clone)]
pub struct NormExpense {
    pub name: String,
    pub base: String,
    pub role: Role,
    pub category: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub value: ValueSpec,
    pub value_set_date: NaiveDate,
    pub cpi_immune: bool,
    pub growth: Option<ValueSpec>,
}

/// A normalized transaction template
#[derive(Debug, Clone)]
pub struct NormTransaction {
    pub name: String,
    pub base: String,
    pub role: Role,
    pub kind: TransactionKind,
    pub from: Option<String>,
    pub from_absolute: bool,
    pub from_value: Option<ValueSpec>,
    pub to: Option<String>,
    pub to_absolute: bool,
    pub to_value: Option<ValueSpec>,
    pub date: NaiveDate,
    pub stop_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub category: String,
    /// Position in the wire model; breaks same-date ordering ties
    pub decl_order: usize,
}

/// A checked, normalized model plus its settings timeline
#[derive(Debug, Clone)]
pub struct NormModel {
    pub assets: Vec<NormAsset>,
    pub incomes: Vec<NormIncome>,
    pub expenses: Vec<NormExpense>,
    pub transactions: Vec<NormTransaction>,
    pub settings: SettingsTimeline,
}

impl NormModel {
    /// Index of an asset by full name
    pub fn asset_index(&self, name: &str) -> Option<usize> {
        self.assets.iter().position(|a| a.name == name)
    }

    /// Earliest date any entity comes into existence
    pub fn earliest_start(&self) -> Option<NaiveDate> {
        let assets = self.assets.iter().map(|a| a.start);
        let incomes = self.incomes.iter().map(|i| i.start);
        let expenses = self.expenses.iter().map(|e| e.start);
        assets.chain(incomes).chain(expenses).min()
    }
}
