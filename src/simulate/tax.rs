//! Tax ledger: per-person accumulation of taxable amounts
//!
//! The clock posts taxable events (income postings, pension relief, CGT
//! gains) as it steps; the ledger groups them by UK tax year (6 April to
//! 5 April), computes band-based liabilities at settlement, and answers
//! cumulative queries for the reporting layer.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Which liability a taxable amount accrues against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LiabilityKind {
    #[serde(rename = "incomeTax")]
    IncomeTax,
    #[serde(rename = "NI")]
    Ni,
    #[serde(rename = "CGT")]
    Cgt,
}

impl LiabilityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LiabilityKind::IncomeTax => "incomeTax",
            LiabilityKind::Ni => "NI",
            LiabilityKind::Cgt => "CGT",
        }
    }
}

/// Band thresholds and rates used at settlement
#[derive(Debug, Clone)]
pub struct TaxBands {
    /// Income tax personal allowance
    pub personal_allowance: f64,
    /// Upper bound of the basic-rate band (gross income)
    pub basic_rate_limit: f64,
    /// Upper bound of the higher-rate band (gross income)
    pub higher_rate_limit: f64,
    pub basic_rate: f64,
    pub higher_rate: f64,
    pub additional_rate: f64,
    /// Gross income above which the allowance tapers away £1 per £2
    pub allowance_taper_start: f64,

    /// NI primary threshold
    pub ni_primary_threshold: f64,
    /// NI upper earnings limit
    pub ni_upper_limit: f64,
    pub ni_main_rate: f64,
    pub ni_upper_rate: f64,

    /// CGT annual exempt amount
    pub cgt_annual_exempt: f64,
    pub cgt_rate: f64,
}

impl Default for TaxBands {
    fn default() -> Self {
        Self {
            personal_allowance: 12_570.0,
            basic_rate_limit: 50_270.0,
            higher_rate_limit: 125_140.0,
            basic_rate: 0.20,
            higher_rate: 0.40,
            additional_rate: 0.45,
            allowance_taper_start: 100_000.0,
            ni_primary_threshold: 12_570.0,
            ni_upper_limit: 50_270.0,
            ni_main_rate: 0.12,
            ni_upper_rate: 0.02,
            cgt_annual_exempt: 3_000.0,
            cgt_rate: 0.20,
        }
    }
}

impl TaxBands {
    /// Annual income tax on a year's taxable income
    pub fn income_tax(&self, income: f64) -> f64 {
        if income <= 0.0 {
            return 0.0;
        }
        // Allowance tapers £1 for every £2 above the taper start
        let tapered = (income - self.allowance_taper_start).max(0.0) / 2.0;
        let allowance = (self.personal_allowance - tapered).max(0.0);

        let mut tax = 0.0;
        if income > allowance {
            tax += (income.min(self.basic_rate_limit) - allowance).max(0.0) * self.basic_rate;
        }
        if income > self.basic_rate_limit {
            tax += (income.min(self.higher_rate_limit) - self.basic_rate_limit) * self.higher_rate;
        }
        if income > self.higher_rate_limit {
            tax += (income - self.higher_rate_limit) * self.additional_rate;
        }
        tax
    }

    /// Annual NI on a year's earned income
    pub fn ni(&self, earned: f64) -> f64 {
        if earned <= self.ni_primary_threshold {
            return 0.0;
        }
        let mut ni =
            (earned.min(self.ni_upper_limit) - self.ni_primary_threshold) * self.ni_main_rate;
        if earned > self.ni_upper_limit {
            ni += (earned - self.ni_upper_limit) * self.ni_upper_rate;
        }
        ni
    }

    /// CGT on a year's realized gains
    pub fn cgt(&self, gains: f64) -> f64 {
        (gains - self.cgt_annual_exempt).max(0.0) * self.cgt_rate
    }

    /// The tax-free amount for a liability kind, for net-of-allowance
    /// queries
    pub fn allowance(&self, kind: LiabilityKind) -> f64 {
        match kind {
            LiabilityKind::IncomeTax => self.personal_allowance,
            LiabilityKind::Ni => self.ni_primary_threshold,
            LiabilityKind::Cgt => self.cgt_annual_exempt,
        }
    }
}

/// The 5 April ending the tax year `date` falls in
pub fn tax_year_end_after(date: NaiveDate) -> NaiveDate {
    let april5 = NaiveDate::from_ymd_opt(date.year(), 4, 5).expect("valid April 5");
    if date <= april5 {
        april5
    } else {
        NaiveDate::from_ymd_opt(date.year() + 1, 4, 5).expect("valid April 5")
    }
}

#[derive(Debug, Clone)]
struct TaxEvent {
    date: NaiveDate,
    person: String,
    kind: LiabilityKind,
    /// Taxable base delta; negative for pension relief
    amount: f64,
}

/// A computed liability for one (person, kind, tax year)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub year_end: NaiveDate,
    pub person: String,
    pub kind: LiabilityKind,
    pub amount: f64,
}

/// Accumulates taxable amounts and computes liabilities
#[derive(Debug, Clone, Default)]
pub struct TaxLedger {
    bands: TaxBands,
    events: Vec<TaxEvent>,
    settlements: Vec<Settlement>,
}

impl TaxLedger {
    pub fn new(bands: TaxBands) -> Self {
        Self {
            bands,
            events: Vec::new(),
            settlements: Vec::new(),
        }
    }

    pub fn bands(&self) -> &TaxBands {
        &self.bands
    }

    /// Post a taxable income amount; earned income also accrues NI
    pub fn post_income(&mut self, date: NaiveDate, person: &str, amount: f64, ni_able: bool) {
        self.post(date, person, LiabilityKind::IncomeTax, amount);
        if ni_able {
            self.post(date, person, LiabilityKind::Ni, amount);
        }
    }

    /// Post pension relief: reduces the income tax base, and for salary
    /// sacrifice the NI base too
    pub fn post_relief(&mut self, date: NaiveDate, person: &str, amount: f64, also_ni: bool) {
        self.post(date, person, LiabilityKind::IncomeTax, -amount);
        if also_ni {
            self.post(date, person, LiabilityKind::Ni, -amount);
        }
    }

    /// Post a realized capital gain
    pub fn post_gain(&mut self, date: NaiveDate, person: &str, gain: f64) {
        self.post(date, person, LiabilityKind::Cgt, gain);
    }

    fn post(&mut self, date: NaiveDate, person: &str, kind: LiabilityKind, amount: f64) {
        if amount == 0.0 {
            return;
        }
        self.events.push(TaxEvent {
            date,
            person: person.to_string(),
            kind,
            amount,
        });
    }

    /// Everyone with any posted event, sorted for deterministic output
    pub fn persons(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.events.iter().map(|e| e.person.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Taxable base for one tax year (the year ending at `year_end`),
    /// clamped at zero: relief cannot produce a negative base
    pub fn base_for_year(&self, person: &str, kind: LiabilityKind, year_end: NaiveDate) -> f64 {
        let year_start = NaiveDate::from_ymd_opt(year_end.year() - 1, 4, 6).expect("valid April 6");
        let sum: f64 = self
            .events
            .iter()
            .filter(|e| {
                e.person == person
                    && e.kind == kind
                    && e.date >= year_start
                    && e.date <= year_end
            })
            .map(|e| e.amount)
            .sum();
        sum.max(0.0)
    }

    /// Cumulative taxable base up to a date, optionally net of each tax
    /// year's tax-free allowance
    pub fn cumulative_base(
        &self,
        person: &str,
        kind: LiabilityKind,
        as_of: NaiveDate,
        net_of_allowance: bool,
    ) -> f64 {
        let year_ends: BTreeSet<NaiveDate> = self
            .events
            .iter()
            .filter(|e| e.person == person && e.kind == kind && e.date <= as_of)
            .map(|e| tax_year_end_after(e.date))
            .collect();
        let mut total = 0.0;
        for year_end in year_ends {
            let base = self.base_for_year(person, kind, year_end);
            total += if net_of_allowance {
                (base - self.bands.allowance(kind)).max(0.0)
            } else {
                base
            };
        }
        total
    }

    /// Compute and record liabilities for the tax year ending at
    /// `year_end`; returns the new settlements so the clock can deduct
    /// them from cash
    pub fn settle_year(&mut self, year_end: NaiveDate) -> Vec<Settlement> {
        let mut new = Vec::new();
        for person in self.persons() {
            let income = self.base_for_year(&person, LiabilityKind::IncomeTax, year_end);
            let earned = self.base_for_year(&person, LiabilityKind::Ni, year_end);
            let gains = self.base_for_year(&person, LiabilityKind::Cgt, year_end);

            for (kind, amount) in [
                (LiabilityKind::IncomeTax, self.bands.income_tax(income)),
                (LiabilityKind::Ni, self.bands.ni(earned)),
                (LiabilityKind::Cgt, self.bands.cgt(gains)),
            ] {
                if amount > 0.0 {
                    new.push(Settlement {
                        year_end,
                        person: person.clone(),
                        kind,
                        amount,
                    });
                }
            }
        }
        self.settlements.extend(new.iter().cloned());
        new
    }

    /// Total settled liability up to a date for one (person, kind)
    pub fn settled_total(&self, person: &str, kind: LiabilityKind, as_of: NaiveDate) -> f64 {
        self.settlements
            .iter()
            .filter(|s| s.person == person && s.kind == kind && s.year_end <= as_of)
            .map(|s| s.amount)
            .sum()
    }

    pub fn settlements(&self) -> &[Settlement] {
        &self.settlements
    }
}
