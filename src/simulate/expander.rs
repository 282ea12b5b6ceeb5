//! Transaction expansion: recurrence templates to dated instances
//!
//! A template expands into a finite, strictly date-ordered sequence of
//! instances inside a horizon. Expansion is lazy and restartable; the
//! clock merges instances across transactions with declaration order
//! breaking same-date ties.

use chrono::{Days, Months, NaiveDate};

use crate::model::norm::{NormTransaction, Recurrence};

/// The simulated date window, inclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Horizon {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Lazy iterator over a single transaction's instance dates
pub struct InstanceIter<'a> {
    template: &'a NormTransaction,
    horizon: Horizon,
    /// Occurrence counter, including occurrences before the horizon
    k: u32,
    /// Last emitted date, for strict monotonicity
    last: Option<NaiveDate>,
    done: bool,
}

/// Expand one transaction over a horizon
pub fn expand(template: &NormTransaction, horizon: Horizon) -> InstanceIter<'_> {
    InstanceIter {
        template,
        horizon,
        k: 0,
        last: None,
        done: false,
    }
}

impl InstanceIter<'_> {
    /// Date of the k-th occurrence, ignoring bounds
    fn occurrence(&self, k: u32) -> Option<NaiveDate> {
        let first = self.template.date;
        match self.template.recurrence {
            Recurrence::OneOff => {
                if k == 0 {
                    Some(first)
                } else {
                    None
                }
            }
            Recurrence::Weekly(count) => {
                let days = (7.0 * count * f64::from(k)).round() as u64;
                first.checked_add_days(Days::new(days))
            }
            Recurrence::Monthly(count) => {
                let months = (count * f64::from(k)).round() as u32;
                first.checked_add_months(Months::new(months))
            }
            Recurrence::Yearly(count) => {
                let months = (12.0 * count * f64::from(k)).round() as u32;
                first.checked_add_months(Months::new(months))
            }
        }
    }

    fn upper_bound(&self) -> NaiveDate {
        match self.template.stop_date {
            Some(stop) => stop.min(self.horizon.end),
            None => self.horizon.end,
        }
    }
}

impl Iterator for InstanceIter<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.done {
            return None;
        }
        let bound = self.upper_bound();
        loop {
            let Some(date) = self.occurrence(self.k) else {
                self.done = true;
                return None;
            };
            self.k += 1;
            if date > bound {
                self.done = true;
                return None;
            }
            if date < self.horizon.start {
                continue;
            }
            // Rounded fractional-month counts below one month can land two
            // occurrences on the same date; emit each date once.
            if self.last == Some(date) {
                continue;
            }
            self.last = Some(date);
            return Some(date);
        }
    }
}

/// Expand every transaction and merge into one (date, template index)
/// sequence, ascending by date with declaration order breaking ties.
pub fn merge_instances(
    transactions: &[NormTransaction],
    horizon: Horizon,
) -> Vec<(NaiveDate, usize)> {
    let mut merged: Vec<(NaiveDate, usize)> = Vec::new();
    for (idx, t) in transactions.iter().enumerate() {
        for date in expand(t, horizon) {
            merged.push((date, idx));
        }
    }
    // Stable: equal dates keep declaration order from the push order
    merged.sort_by_key(|(date, _)| *date);
    merged
}
