//! Settings timeline and as-of resolution
//!
//! A setting's value is a step function of time: the base definition plus
//! every revaluation targeting it, keyed by date. Resolution walks the
//! history up to the as-of date, then parses the raw text, following
//! currency-suffix references recursively with an explicit recursion
//! guard so cyclic definitions terminate with an error.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::EngineError;
use crate::model::data::Setting;
use crate::model::norm::ValueSpec;

/// Append-only per-setting value history
#[derive(Debug, Clone, Default)]
pub struct SettingsTimeline {
    /// name -> (date, raw value) entries sorted ascending by date;
    /// base definitions sit at `NaiveDate::MIN`
    entries: BTreeMap<String, Vec<(NaiveDate, String)>>,
}

impl SettingsTimeline {
    /// Build a timeline from the model's base settings
    pub fn from_settings(settings: &[Setting]) -> Self {
        let mut timeline = SettingsTimeline::default();
        for s in settings {
            timeline
                .entries
                .entry(s.name.clone())
                .or_default()
                .push((NaiveDate::MIN, s.value.clone()));
        }
        timeline
    }

    /// Record a dated revaluation of `name`. Later recordings at the same
    /// date overwrite earlier ones (settings are never deleted).
    pub fn record_revaluation(&mut self, name: &str, date: NaiveDate, raw: &str) {
        let history = self.entries.entry(name.to_string()).or_default();
        let pos = history.partition_point(|(d, _)| *d <= date);
        history.insert(pos, (date, raw.to_string()));
    }

    /// Whether any history exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All known setting names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Latest raw value applicable at `as_of`, unresolved
    pub fn raw_at(&self, name: &str, as_of: NaiveDate) -> Option<&str> {
        let history = self.entries.get(name)?;
        history
            .iter()
            .rev()
            .find(|(d, _)| *d <= as_of)
            .map(|(_, raw)| raw.as_str())
    }

    /// Resolve a setting to a number as-of a date (no percentage base)
    pub fn resolve(&self, name: &str, as_of: NaiveDate) -> Result<f64, EngineError> {
        self.resolve_with_base(name, as_of, None)
    }

    /// Resolve a setting to a number, supplying the base a percentage
    /// value is taken of (transaction contexts only)
    pub fn resolve_with_base(
        &self,
        name: &str,
        as_of: NaiveDate,
        base: Option<f64>,
    ) -> Result<f64, EngineError> {
        let mut open = Vec::new();
        self.resolve_name(name, as_of, base, &mut open)
    }

    /// Resolve a parsed value expression as-of a date
    pub fn resolve_spec(
        &self,
        spec: &ValueSpec,
        as_of: NaiveDate,
        base: Option<f64>,
    ) -> Result<f64, EngineError> {
        match spec {
            ValueSpec::Literal(n) => Ok(*n),
            ValueSpec::Percent(p) => base
                .map(|b| b * p / 100.0)
                .ok_or_else(|| EngineError::PercentWithoutBase(format!("{}%", p))),
            ValueSpec::SettingScaled { factor, setting } => {
                let mut open = Vec::new();
                Ok(factor * self.resolve_name(setting, as_of, None, &mut open)?)
            }
        }
    }

    fn resolve_name(
        &self,
        name: &str,
        as_of: NaiveDate,
        base: Option<f64>,
        open: &mut Vec<String>,
    ) -> Result<f64, EngineError> {
        if open.iter().any(|n| n == name) {
            return Err(EngineError::CyclicSetting(name.to_string()));
        }
        let raw = self
            .raw_at(name, as_of)
            .ok_or_else(|| EngineError::UnresolvedSetting(name.to_string()))?;

        let spec = ValueSpec::parse(raw).ok_or_else(|| EngineError::MalformedValue {
            name: name.to_string(),
            raw: raw.to_string(),
        })?;

        match spec {
            ValueSpec::Literal(n) => Ok(n),
            ValueSpec::Percent(p) => base
                .map(|b| b * p / 100.0)
                .ok_or_else(|| EngineError::PercentWithoutBase(raw.to_string())),
            ValueSpec::SettingScaled { factor, setting } => {
                open.push(name.to_string());
                let inner = self.resolve_name(&setting, as_of, None, open)?;
                open.pop();
                Ok(factor * inner)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::data::SettingKind;

    fn setting(name: &str, value: &str) -> Setting {
        Setting {
            name: name.to_string(),
            value: value.to_string(),
            hint: String::new(),
            kind: SettingKind::Adjustable,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_plain_number() {
        let t = SettingsTimeline::from_settings(&[setting("cpi", "2.5")]);
        assert_eq!(t.resolve("cpi", d(2020, 1, 1)).unwrap(), 2.5);
    }

    #[test]
    fn test_currency_suffix_reference() {
        let t = SettingsTimeline::from_settings(&[
            setting("USD", "2"),
            setting("fund", "50USD"),
        ]);
        assert_eq!(t.resolve("fund", d(2020, 1, 1)).unwrap(), 100.0);
    }

    #[test]
    fn test_revaluation_respects_as_of_date() {
        let mut t = SettingsTimeline::from_settings(&[
            setting("USD", "2"),
            setting("fund", "50USD"),
        ]);
        t.record_revaluation("USD", d(2021, 6, 1), "3");

        // Before the revaluation the old value applies; after, the new one
        assert_eq!(t.resolve("fund", d(2021, 5, 31)).unwrap(), 100.0);
        assert_eq!(t.resolve("fund", d(2021, 6, 1)).unwrap(), 150.0);
    }

    #[test]
    fn test_same_date_revaluation_overwrites() {
        let mut t = SettingsTimeline::from_settings(&[setting("USD", "2")]);
        t.record_revaluation("USD", d(2021, 6, 1), "3");
        t.record_revaluation("USD", d(2021, 6, 1), "4");
        assert_eq!(t.resolve("USD", d(2021, 6, 1)).unwrap(), 4.0);
    }

    #[test]
    fn test_unresolved_setting() {
        let t = SettingsTimeline::from_settings(&[]);
        assert_eq!(
            t.resolve("ghost", d(2020, 1, 1)),
            Err(EngineError::UnresolvedSetting("ghost".to_string()))
        );
    }

    #[test]
    fn test_cyclic_setting() {
        let t = SettingsTimeline::from_settings(&[
            setting("a", "2b"),
            setting("b", "3a"),
        ]);
        assert_eq!(
            t.resolve("a", d(2020, 1, 1)),
            Err(EngineError::CyclicSetting("a".to_string()))
        );
    }

    #[test]
    fn test_malformed_value() {
        let t = SettingsTimeline::from_settings(&[setting("bad", "1.2.3")]);
        assert!(matches!(
            t.resolve("bad", d(2020, 1, 1)),
            Err(EngineError::MalformedValue { .. })
        ));
    }

    #[test]
    fn test_percentage_needs_base() {
        let t = SettingsTimeline::from_settings(&[setting("cut", "90%")]);
        assert!(matches!(
            t.resolve("cut", d(2020, 1, 1)),
            Err(EngineError::PercentWithoutBase(_))
        ));
        assert_eq!(
            t.resolve_with_base("cut", d(2020, 1, 1), Some(200.0)).unwrap(),
            180.0
        );
    }
}
