//! Named-date (trigger) resolution
//!
//! Triggers give a model one place to edit a date that is referenced
//! everywhere. A trigger's date is either a literal in any accepted
//! format or a ternary comparison `A<B?X:Y` whose operands are themselves
//! trigger names or literal dates.

use chrono::NaiveDate;

use super::dates::parse_flexible_date;
use crate::error::EngineError;
use crate::model::data::Trigger;

// Bounds self-referential trigger chains; real models nest one or two deep.
const MAX_DEPTH: usize = 32;

/// Resolve a date field: a trigger name, a ternary expression, or a
/// literal date.
pub fn resolve_date(triggers: &[Trigger], text: &str) -> Result<NaiveDate, EngineError> {
    resolve_inner(triggers, text, 0)
}

fn resolve_inner(triggers: &[Trigger], text: &str, depth: usize) -> Result<NaiveDate, EngineError> {
    if depth > MAX_DEPTH {
        return Err(EngineError::InvalidDate(text.to_string()));
    }
    let text = text.trim();

    // Trigger names win over literal parses: the indirection layer is the
    // point of triggers.
    if let Some(t) = triggers.iter().find(|t| t.name == text) {
        return resolve_inner(triggers, &t.date, depth + 1);
    }

    // Ternary form A<B?X:Y
    if let Some((cond, rest)) = text.split_once('?') {
        if let (Some((a, b)), Some((x, y))) = (cond.split_once('<'), rest.split_once(':')) {
            let da = resolve_inner(triggers, a, depth + 1)?;
            let db = resolve_inner(triggers, b, depth + 1)?;
            let chosen = if da < db { x } else { y };
            return resolve_inner(triggers, chosen, depth + 1);
        }
        return Err(EngineError::InvalidDate(text.to_string()));
    }

    if let Some(d) = parse_flexible_date(text) {
        return Ok(d);
    }

    if looks_like_name(text) {
        Err(EngineError::UnknownTrigger(text.to_string()))
    } else {
        Err(EngineError::InvalidDate(text.to_string()))
    }
}

// A failed parse that reads as an identifier is a typo'd trigger name; one
// full of punctuation or digits is a bad date.
fn looks_like_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() => {}
        _ => return false,
    }
    text.chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(name: &str, date: &str) -> Trigger {
        Trigger {
            name: name.to_string(),
            date: date.to_string(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_literal_and_named() {
        let triggers = vec![trigger("Retire", "2035")];
        assert_eq!(resolve_date(&triggers, "Retire").unwrap(), d(2035, 1, 1));
        assert_eq!(resolve_date(&triggers, "21/2/2020").unwrap(), d(2020, 2, 21));
    }

    #[test]
    fn test_chained_triggers() {
        let triggers = vec![
            trigger("Retire", "StatePensionAge"),
            trigger("StatePensionAge", "2040"),
        ];
        assert_eq!(resolve_date(&triggers, "Retire").unwrap(), d(2040, 1, 1));
    }

    #[test]
    fn test_ternary_picks_later_date() {
        let triggers = vec![trigger("A", "2030"), trigger("B", "2025")];
        // A<B is false, so the later of the two (A) is chosen
        assert_eq!(resolve_date(&triggers, "A<B?B:A").unwrap(), d(2030, 1, 1));
        // Earlier-of form
        assert_eq!(resolve_date(&triggers, "A<B?A:B").unwrap(), d(2025, 1, 1));
    }

    #[test]
    fn test_ternary_with_literal_operands() {
        let triggers = vec![trigger("Retire", "2035")];
        assert_eq!(
            resolve_date(&triggers, "Retire<2030?Retire:2030").unwrap(),
            d(2030, 1, 1)
        );
    }

    #[test]
    fn test_unknown_trigger_and_invalid_date() {
        let triggers = vec![];
        assert_eq!(
            resolve_date(&triggers, "RetirementDate"),
            Err(EngineError::UnknownTrigger("RetirementDate".to_string()))
        );
        assert_eq!(
            resolve_date(&triggers, "99/99/9999"),
            Err(EngineError::InvalidDate("99/99/9999".to_string()))
        );
    }

    #[test]
    fn test_cyclic_triggers_terminate() {
        let triggers = vec![trigger("A", "B"), trigger("B", "A")];
        assert!(resolve_date(&triggers, "A").is_err());
    }
}
