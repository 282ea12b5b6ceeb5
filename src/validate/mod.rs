//! Model validation and normalization
//!
//! `check_model` runs the fixed battery of field, referential and temporal
//! checks and returns the list of diagnostics; `normalize` lowers a clean
//! wire model into the typed form the clock consumes. Validation never
//! mutates the model and is purely advisory: the caller decides whether
//! to block on a non-empty diagnostic list.
//!
//! The rendered message text is part of the caller contract; hosts and
//! tests match it verbatim, so the templates below change only with a
//! contract version.

use chrono::NaiveDate;
use thiserror::Error;

use crate::model::data::{parse_flag, Model, SettingKind, TransactionKind, CASH_ASSET_NAME};
use crate::model::names::{decode, Role};
use crate::model::norm::{
    NormAsset, NormExpense, NormIncome, NormModel, NormTransaction, Recurrence, RecurrenceError,
    ValueSpec,
};
use crate::resolve::settings::SettingsTimeline;
use crate::resolve::triggers::resolve_date;

/// One diagnostic from the model check
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("{kind} name needs some characters")]
    EmptyName { kind: &'static str },

    #[error("duplicate name '{name}'")]
    DuplicateName { name: String },

    #[error("{kind} '{name}' has a {field} '{value}' that is not a number or setting")]
    BadValue {
        kind: &'static str,
        name: String,
        field: &'static str,
        value: String,
    },

    #[error("asset '{name}' has a quantity '{quantity}' that is not a whole number")]
    BadQuantity { name: String, quantity: String },

    #[error("asset '{name}' has a purchase price '{price}' that is not a number")]
    BadPurchasePrice { name: String, price: String },

    #[error("{kind} '{name}' has a {field} flag '{value}' that is not T or F")]
    BadFlag {
        kind: &'static str,
        name: String,
        field: &'static str,
        value: String,
    },

    #[error("{kind} '{name}' has a bad {field}: {reason}")]
    BadDate {
        kind: &'static str,
        name: String,
        field: &'static str,
        reason: String,
    },

    #[error("setting '{name}' has a value that does not resolve: {reason}")]
    BadSetting { name: String, reason: String },

    #[error("transaction '{name}' has a recurrence '{recurrence}' that must end in w, m or y")]
    RecurrenceBadSuffix { name: String, recurrence: String },

    #[error(
        "transaction '{name}' has a recurrence '{recurrence}' that must be a number ending in w, m or y"
    )]
    RecurrenceBadCount { name: String, recurrence: String },

    #[error(
        "transaction '{name}' {field} references unrecognised asset (could be typo or before asset start date?) '{target}'"
    )]
    UnrecognisedAsset {
        name: String,
        field: &'static str,
        target: String,
    },

    #[error("transaction '{name}' has an unrecognised income source '{source_name}'")]
    UnrecognisedIncomeSource { name: String, source_name: String },

    #[error("income '{name}' funds a pension contribution but has no income tax liability")]
    ContributionNeedsLiability { name: String },

    #[error("transaction '{name}' has a pension contribution fraction '{value}' outside 0 to 1")]
    ContributionFractionOutOfRange { name: String, value: String },

    #[error("transaction '{name}' has an employer match '{value}' outside 1 to 2 times the contribution")]
    EmployerMatchOutOfRange { name: String, value: String },

    #[error("transaction '{name}' should stop contributions before the pension transfer date")]
    ContributionAfterTransfer { name: String },

    #[error("conditional transaction '{name}' must liquidate to the cash asset")]
    ConditionalNotToCash { name: String },

    #[error("revaluation '{name}' is dated before the start of '{target}'")]
    RevaluationBeforeStart { name: String, target: String },

    #[error("revaluation '{name}' targets setting '{target}' that is not adjustable")]
    RevalueConstSetting { name: String, target: String },

    #[error("revaluation '{name}' targets unrecognised '{target}'")]
    RevaluationUnknownTarget { name: String, target: String },
}

/// Run every check over a model. Empty result = all good.
pub fn check_model(model: &Model) -> Vec<ValidationIssue> {
    match build(model) {
        Ok(_) => Vec::new(),
        Err(issues) => issues,
    }
}

/// Check a model and lower it to the normalized form
pub fn normalize(model: &Model) -> Result<NormModel, Vec<ValidationIssue>> {
    build(model)
}

// A date far past any plausible model content; used as the as-of date when
// checking that base setting values resolve at all.
fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 1, 1).expect("valid constant date")
}

fn build(model: &Model) -> Result<NormModel, Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let timeline = SettingsTimeline::from_settings(&model.settings);

    check_names(model, &mut issues);
    check_settings(model, &timeline, &mut issues);
    check_triggers(model, &mut issues);

    let assets = build_assets(model, &timeline, &mut issues);
    let incomes = build_incomes(model, &timeline, &mut issues);
    let expenses = build_expenses(model, &timeline, &mut issues);
    let transactions = build_transactions(model, &timeline, &mut issues);

    cross_check(model, &transactions, &incomes, &assets, &mut issues);

    if issues.is_empty() {
        Ok(NormModel {
            assets,
            incomes,
            expenses,
            transactions,
            settings: timeline,
        })
    } else {
        Err(issues)
    }
}

fn check_names(model: &Model, issues: &mut Vec<ValidationIssue>) {
    let mut seen = std::collections::BTreeSet::new();
    let named: Vec<(&'static str, &str)> = model
        .assets
        .iter()
        .map(|a| ("asset", a.name.as_str()))
        .chain(model.incomes.iter().map(|i| ("income", i.name.as_str())))
        .chain(model.expenses.iter().map(|e| ("expense", e.name.as_str())))
        .chain(model.transactions.iter().map(|t| ("transaction", t.name.as_str())))
        .chain(model.settings.iter().map(|s| ("setting", s.name.as_str())))
        .chain(model.triggers.iter().map(|t| ("trigger", t.name.as_str())))
        .collect();

    for (kind, name) in named {
        if name.trim().is_empty() {
            issues.push(ValidationIssue::EmptyName { kind });
        } else if !seen.insert(name.to_string()) {
            issues.push(ValidationIssue::DuplicateName {
                name: name.to_string(),
            });
        }
    }
}

fn check_settings(model: &Model, timeline: &SettingsTimeline, issues: &mut Vec<ValidationIssue>) {
    for s in &model.settings {
        // View settings hold strings for the chart layer; only the numeric
        // kinds must resolve.
        if s.kind == SettingKind::View {
            continue;
        }
        if let Err(e) = timeline.resolve_with_base(&s.name, far_future(), Some(100.0)) {
            issues.push(ValidationIssue::BadSetting {
                name: s.name.clone(),
                reason: e.to_string(),
            });
        }
    }
}

fn check_triggers(model: &Model, issues: &mut Vec<ValidationIssue>) {
    for t in &model.triggers {
        if let Err(e) = resolve_date(&model.triggers, &t.name) {
            issues.push(ValidationIssue::BadDate {
                kind: "trigger",
                name: t.name.clone(),
                field: "date",
                reason: e.to_string(),
            });
        }
    }
}

fn check_date(
    model: &Model,
    kind: &'static str,
    name: &str,
    field: &'static str,
    raw: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<NaiveDate> {
    match resolve_date(&model.triggers, raw) {
        Ok(d) => Some(d),
        Err(e) => {
            issues.push(ValidationIssue::BadDate {
                kind,
                name: name.to_string(),
                field,
                reason: e.to_string(),
            });
            None
        }
    }
}

fn check_value(
    timeline: &SettingsTimeline,
    kind: &'static str,
    name: &str,
    field: &'static str,
    raw: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<ValueSpec> {
    let bad = |issues: &mut Vec<ValidationIssue>| {
        issues.push(ValidationIssue::BadValue {
            kind,
            name: name.to_string(),
            field,
            value: raw.to_string(),
        });
        None
    };
    match ValueSpec::parse(raw) {
        None => bad(issues),
        Some(spec) => {
            if let Some(setting) = spec.setting_ref() {
                if timeline
                    .resolve_with_base(setting, far_future(), Some(100.0))
                    .is_err()
                {
                    return bad(issues);
                }
            }
            Some(spec)
        }
    }
}

fn check_flag(
    kind: &'static str,
    name: &str,
    field: &'static str,
    raw: &str,
    issues: &mut Vec<ValidationIssue>,
) -> bool {
    match parse_flag(raw) {
        Some(b) => b,
        None => {
            issues.push(ValidationIssue::BadFlag {
                kind,
                name: name.to_string(),
                field,
                value: raw.to_string(),
            });
            false
        }
    }
}

fn build_assets(
    model: &Model,
    timeline: &SettingsTimeline,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<NormAsset> {
    let mut out = Vec::new();
    for a in &model.assets {
        let decoded = decode(&a.name);
        let start = check_date(model, "asset", &a.name, "start", &a.start, issues);
        let value = check_value(timeline, "asset", &a.name, "value", &a.value, issues);

        let quantity = if a.quantity.trim().is_empty() {
            1.0
        } else {
            match a.quantity.trim().parse::<i64>() {
                Ok(q) => q as f64,
                Err(_) => {
                    issues.push(ValidationIssue::BadQuantity {
                        name: a.name.clone(),
                        quantity: a.quantity.clone(),
                    });
                    1.0
                }
            }
        };

        let growth = if a.growth.trim().is_empty() {
            None
        } else {
            check_value(timeline, "asset", &a.name, "growth", &a.growth, issues)
        };

        let cpi_immune = check_flag("asset", &a.name, "cpiImmune", &a.cpi_immune, issues);
        let can_be_negative =
            check_flag("asset", &a.name, "canBeNegative", &a.can_be_negative, issues);
        let is_debt = check_flag("asset", &a.name, "isDebt", &a.is_debt, issues);

        let purchase_price = if a.purchase_price.trim().is_empty() {
            None
        } else {
            match a.purchase_price.trim().parse::<f64>() {
                Ok(p) => Some(p),
                Err(_) => {
                    issues.push(ValidationIssue::BadPurchasePrice {
                        name: a.name.clone(),
                        price: a.purchase_price.clone(),
                    });
                    None
                }
            }
        };

        if let (Some(start), Some(value)) = (start, value) {
            out.push(NormAsset {
                name: a.name.clone(),
                base: decoded.base,
                role: decoded.role,
                category: a.category.clone(),
                start,
                value,
                quantity,
                growth,
                cpi_immune,
                can_be_negative,
                is_debt,
                liability: none_if_empty(&a.liability),
                purchase_price,
            });
        }
    }
    out
}

fn build_incomes(
    model: &Model,
    timeline: &SettingsTimeline,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<NormIncome> {
    let mut out = Vec::new();
    for i in &model.incomes {
        let decoded = decode(&i.name);
        let start = check_date(model, "income", &i.name, "start", &i.start, issues);
        let end = check_date(model, "income", &i.name, "end", &i.end, issues);
        let value_set_date = check_date(
            model,
            "income",
            &i.name,
            "valueSetDate",
            &i.value_set_date,
            issues,
        );
        let value = check_value(timeline, "income", &i.name, "value", &i.value, issues);
        let growth = if i.growth.trim().is_empty() {
            None
        } else {
            check_value(timeline, "income", &i.name, "growth", &i.growth, issues)
        };
        let cpi_immune = check_flag("income", &i.name, "cpiImmune", &i.cpi_immune, issues);

        if let (Some(start), Some(end), Some(value_set_date), Some(value)) =
            (start, end, value_set_date, value)
        {
            out.push(NormIncome {
                name: i.name.clone(),
                base: decoded.base,
                role: decoded.role,
                category: i.category.clone(),
                start,
                end,
                value,
                value_set_date,
                cpi_immune,
                growth,
                liability: none_if_empty(&i.liability),
            });
        }
    }
    out
}

fn build_expenses(
    model: &Model,
    timeline: &SettingsTimeline,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<NormExpense> {
    let mut out = Vec::new();
    for e in &model.expenses {
        let decoded = decode(&e.name);
        let start = check_date(model, "expense", &e.name, "start", &e.start, issues);
        let end = check_date(model, "expense", &e.name, "end", &e.end, issues);
        let value_set_date = check_date(
            model,
            "expense",
            &e.name,
            "valueSetDate",
            &e.value_set_date,
            issues,
        );
        let value = check_value(timeline, "expense", &e.name, "value", &e.value, issues);
        let growth = if e.growth.trim().is_empty() {
            None
        } else {
            check_value(timeline, "expense", &e.name, "growth", &e.growth, issues)
        };
        let cpi_immune = check_flag("expense", &e.name, "cpiImmune", &e.cpi_immune, issues);

        if let (Some(start), Some(end), Some(value_set_date), Some(value)) =
            (start, end, value_set_date, value)
        {
            out.push(NormExpense {
                name: e.name.clone(),
                base: decoded.base,
                role: decoded.role,
                category: e.category.clone(),
                start,
                end,
                value,
                value_set_date,
                cpi_immune,
                growth,
            });
        }
    }
    out
}

fn build_transactions(
    model: &Model,
    timeline: &SettingsTimeline,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<NormTransaction> {
    let mut out = Vec::new();
    for (decl_order, t) in model.transactions.iter().enumerate() {
        let decoded = decode(&t.name);
        let date = check_date(model, "transaction", &t.name, "date", &t.date, issues);
        let stop_date = if t.stop_date.trim().is_empty() {
            None
        } else {
            check_date(model, "transaction", &t.name, "stopDate", &t.stop_date, issues)
        };

        let recurrence = match Recurrence::parse(&t.recurrence) {
            Ok(r) => r,
            Err(RecurrenceError::BadSuffix) => {
                issues.push(ValidationIssue::RecurrenceBadSuffix {
                    name: t.name.clone(),
                    recurrence: t.recurrence.clone(),
                });
                Recurrence::OneOff
            }
            Err(RecurrenceError::BadCount) => {
                issues.push(ValidationIssue::RecurrenceBadCount {
                    name: t.name.clone(),
                    recurrence: t.recurrence.clone(),
                });
                Recurrence::OneOff
            }
        };

        let from_absolute = check_flag("transaction", &t.name, "fromAbsolute", &t.from_absolute, issues);
        let to_absolute = check_flag("transaction", &t.name, "toAbsolute", &t.to_absolute, issues);

        let from = none_if_empty(&t.from);
        let to = none_if_empty(&t.to);

        // A source without an amount (or vice versa) has no meaning
        let from_value = if from.is_some() {
            check_value(timeline, "transaction", &t.name, "fromValue", &t.from_value, issues)
        } else {
            None
        };
        let to_value = if to.is_some() {
            check_value(timeline, "transaction", &t.name, "toValue", &t.to_value, issues)
        } else {
            None
        };

        if let Some(date) = date {
            out.push(NormTransaction {
                name: t.name.clone(),
                base: decoded.base,
                role: decoded.role,
                kind: t.kind,
                from,
                from_absolute,
                from_value,
                to,
                to_absolute,
                to_value,
                date,
                stop_date,
                recurrence,
                category: t.category.clone(),
                decl_order,
            });
        }
    }
    out
}

fn cross_check(
    model: &Model,
    transactions: &[NormTransaction],
    incomes: &[NormIncome],
    assets: &[NormAsset],
    issues: &mut Vec<ValidationIssue>,
) {
    for t in transactions {
        // The clock treats either marker as a revaluation; check both
        if t.role == Role::Revaluation || t.kind == TransactionKind::Revaluation {
            check_revaluation_target(model, t, assets, incomes, issues);
        } else {
            check_endpoint(t, "from", t.from.as_deref(), incomes, assets, issues);
            check_endpoint(t, "to", t.to.as_deref(), incomes, assets, issues);
        }

        if t.kind == TransactionKind::LiquidateForCash
            && t.to.as_deref() != Some(CASH_ASSET_NAME)
        {
            issues.push(ValidationIssue::ConditionalNotToCash {
                name: t.name.clone(),
            });
        }

        check_pension_contribution(t, incomes, issues);

        // A DB accrual must not keep contributing after its entitlement
        // has been transferred away.
        if t.role == Role::PensionDbTransfer {
            for accrual in transactions {
                if accrual.role == Role::PensionDb
                    && accrual.base == t.base
                    && accrual.stop_date.map(|s| s > t.date).unwrap_or(true)
                {
                    issues.push(ValidationIssue::ContributionAfterTransfer {
                        name: accrual.name.clone(),
                    });
                }
            }
        }
    }
}

fn check_endpoint(
    t: &NormTransaction,
    field: &'static str,
    target: Option<&str>,
    incomes: &[NormIncome],
    assets: &[NormAsset],
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(target) = target else { return };

    // Pension contributions draw from an income; everything else moves
    // between assets.
    if field == "from" && t.role.is_pension() {
        if incomes.iter().any(|i| i.name == target) {
            return;
        }
        if !assets.iter().any(|a| a.name == target) {
            issues.push(ValidationIssue::UnrecognisedIncomeSource {
                name: t.name.clone(),
                source_name: target.to_string(),
            });
            return;
        }
    }

    // DB accrual pays into a DB income entitlement
    if field == "to" && t.role == Role::PensionDb && incomes.iter().any(|i| i.name == target) {
        return;
    }

    match assets.iter().find(|a| a.name == target) {
        None => issues.push(ValidationIssue::UnrecognisedAsset {
            name: t.name.clone(),
            field,
            target: target.to_string(),
        }),
        Some(asset) if asset.start > t.date => {
            // Exists, but not yet: same diagnostic the typo case gets
            issues.push(ValidationIssue::UnrecognisedAsset {
                name: t.name.clone(),
                field,
                target: target.to_string(),
            });
        }
        Some(_) => {}
    }
}

fn check_revaluation_target(
    model: &Model,
    t: &NormTransaction,
    assets: &[NormAsset],
    incomes: &[NormIncome],
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(target) = t.to.as_deref() else {
        issues.push(ValidationIssue::RevaluationUnknownTarget {
            name: t.name.clone(),
            target: String::new(),
        });
        return;
    };

    if let Some(setting) = model.setting(target) {
        if setting.kind != SettingKind::Adjustable {
            issues.push(ValidationIssue::RevalueConstSetting {
                name: t.name.clone(),
                target: target.to_string(),
            });
        }
        return;
    }

    let start = assets
        .iter()
        .find(|a| a.name == target)
        .map(|a| a.start)
        .or_else(|| incomes.iter().find(|i| i.name == target).map(|i| i.start))
        .or_else(|| {
            model
                .expense(target)
                .and_then(|e| resolve_date(&model.triggers, &e.start).ok())
        });

    match start {
        None => issues.push(ValidationIssue::RevaluationUnknownTarget {
            name: t.name.clone(),
            target: target.to_string(),
        }),
        Some(start) if t.date < start => issues.push(ValidationIssue::RevaluationBeforeStart {
            name: t.name.clone(),
            target: target.to_string(),
        }),
        Some(_) => {}
    }
}

fn check_pension_contribution(
    t: &NormTransaction,
    incomes: &[NormIncome],
    issues: &mut Vec<ValidationIssue>,
) {
    if !matches!(t.role, Role::PensionDc | Role::PensionSs | Role::PensionDb) {
        return;
    }
    let Some(from) = t.from.as_deref() else { return };
    let Some(income) = incomes.iter().find(|i| i.name == from) else {
        return;
    };

    if income.liability.is_none() {
        issues.push(ValidationIssue::ContributionNeedsLiability {
            name: income.name.clone(),
        });
    }

    // The employee fraction is quoted as a proportion of the income
    if !t.from_absolute {
        let ok = match &t.from_value {
            Some(ValueSpec::Literal(f)) => (0.0..=1.0).contains(f),
            Some(ValueSpec::Percent(p)) => (0.0..=100.0).contains(p),
            _ => true,
        };
        if !ok {
            issues.push(ValidationIssue::ContributionFractionOutOfRange {
                name: t.name.clone(),
                value: value_text(&t.from_value),
            });
        }
    }

    // The to-side multiplier covers the employer match: 1 = none, 2 = 1:1
    if !t.to_absolute && t.role != Role::PensionDb {
        let ok = match &t.to_value {
            Some(ValueSpec::Literal(m)) => (1.0..=2.0).contains(m),
            Some(ValueSpec::Percent(p)) => (100.0..=200.0).contains(p),
            _ => true,
        };
        if !ok {
            issues.push(ValidationIssue::EmployerMatchOutOfRange {
                name: t.name.clone(),
                value: value_text(&t.to_value),
            });
        }
    }
}

fn value_text(spec: &Option<ValueSpec>) -> String {
    match spec {
        Some(ValueSpec::Literal(n)) => format!("{}", n),
        Some(ValueSpec::Percent(p)) => format!("{}%", p),
        Some(ValueSpec::SettingScaled { factor, setting }) => format!("{}{}", factor, setting),
        None => String::new(),
    }
}

fn none_if_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
