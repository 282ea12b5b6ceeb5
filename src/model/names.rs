//! Name grammar: prefixes overlaying pension/crystallization semantics
//!
//! Entity names carry fixed prefixes that mark pension sub-kinds,
//! crystallization state, conditionality and revaluations. This module is
//! the only place those prefixes are interpreted; everything else works
//! with the decoded `Role`.

/// Semantics decoded from an entity name's prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// No recognized prefix
    Plain,
    /// Defined-contribution pension pot (asset)
    PensionDc,
    /// Defined-benefit accrual (income, or the accruing transaction)
    PensionDb,
    /// Salary-sacrifice contribution: reduces income tax and NI bases
    PensionSs,
    /// Defined-benefit entitlement transfer between people
    PensionDbTransfer,
    /// Crystallized pot: withdrawals are taxable income
    CrystallizedTaxable,
    /// Crystallized tax-free portion: withdrawals are untaxed
    CrystallizedTaxFree,
    /// Crystallized pot transfer between people
    CrystallizedTransfer,
    /// Fires only while it keeps its target from going negative
    Conditional,
    /// Overwrites a value; not a cash flow
    Revaluation,
}

impl Role {
    /// Whether this role marks any pension-mechanics behavior
    pub fn is_pension(self) -> bool {
        matches!(
            self,
            Role::PensionDc
                | Role::PensionDb
                | Role::PensionSs
                | Role::PensionDbTransfer
                | Role::CrystallizedTaxable
                | Role::CrystallizedTaxFree
                | Role::CrystallizedTransfer
        )
    }

    /// Whether this role marks a crystallized pot
    pub fn is_crystallized(self) -> bool {
        matches!(
            self,
            Role::CrystallizedTaxable | Role::CrystallizedTaxFree | Role::CrystallizedTransfer
        )
    }
}

/// A name split into its role and residual base name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedName {
    pub role: Role,
    /// The name with its prefix removed; the full name when `Plain`
    pub base: String,
}

// Longest prefix first: "TransferCrystallizedPension" must win over
// "CrystallizedPension", and "PensionDB"/"PensionSS"/"PensionTransfer"
// over "Pension".
const PREFIXES: &[(&str, Role)] = &[
    ("TransferCrystallizedPension", Role::CrystallizedTransfer),
    ("CrystallizedPension", Role::CrystallizedTaxable),
    ("PensionTransfer", Role::PensionDbTransfer),
    ("PensionDB", Role::PensionDb),
    ("PensionSS", Role::PensionSs),
    ("Pension", Role::PensionDc),
    ("TaxFree", Role::CrystallizedTaxFree),
    ("Conditional", Role::Conditional),
    ("Revalue", Role::Revaluation),
];

/// Decode a name into its role and base. Total over all strings:
/// unrecognized prefixes yield `Role::Plain` with the whole name as base.
pub fn decode(name: &str) -> DecodedName {
    for (prefix, role) in PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            // The prefix must end at a word boundary: a following space,
            // digit or uppercase letter. "Pensioner flat" stays Plain.
            let boundary = rest
                .chars()
                .next()
                .map(|c| c == ' ' || c.is_ascii_digit() || c.is_ascii_uppercase())
                .unwrap_or(false);
            if boundary {
                return DecodedName {
                    role: *role,
                    base: rest.trim_start().to_string(),
                };
            }
        }
    }
    DecodedName {
        role: Role::Plain,
        base: name.to_string(),
    }
}

/// Rebuild the external string form of a decoded name
pub fn encode(role: Role, base: &str) -> String {
    let prefix = PREFIXES
        .iter()
        .find(|(_, r)| *r == role)
        .map(|(p, _)| *p)
        .unwrap_or("");
    if prefix.is_empty() {
        base.to_string()
    } else {
        format!("{} {}", prefix, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pension_kinds() {
        assert_eq!(decode("Pension Aviva").role, Role::PensionDc);
        assert_eq!(decode("Pension Aviva").base, "Aviva");
        assert_eq!(decode("PensionDB Teachers").role, Role::PensionDb);
        assert_eq!(decode("PensionSS Widget Co").role, Role::PensionSs);
        assert_eq!(decode("PensionTransfer Teachers").role, Role::PensionDbTransfer);
    }

    #[test]
    fn test_decode_crystallization_kinds() {
        assert_eq!(decode("CrystallizedPension Joe").role, Role::CrystallizedTaxable);
        assert_eq!(decode("TaxFree Aviva").role, Role::CrystallizedTaxFree);
        assert_eq!(
            decode("TransferCrystallizedPension Joe").role,
            Role::CrystallizedTransfer
        );
        assert_eq!(decode("TransferCrystallizedPension Joe").base, "Joe");
    }

    #[test]
    fn test_decode_transaction_kinds() {
        assert_eq!(decode("Conditional sell stocks").role, Role::Conditional);
        assert_eq!(decode("Revalue house").role, Role::Revaluation);
        assert_eq!(decode("Revalue house").base, "house");
    }

    #[test]
    fn test_unrecognized_prefixes_are_plain() {
        assert_eq!(decode("stocks").role, Role::Plain);
        assert_eq!(decode("stocks").base, "stocks");
        assert_eq!(decode("").role, Role::Plain);
        // No word boundary after the prefix: not a pension
        assert_eq!(decode("Pensioner flat").role, Role::Plain);
        assert_eq!(decode("Taxfree-ish").role, Role::Plain);
    }

    #[test]
    fn test_longest_prefix_wins() {
        // Would decode as CrystallizedPension under naive ordering
        let d = decode("TransferCrystallizedPension B");
        assert_eq!(d.role, Role::CrystallizedTransfer);
        // PensionDB beats Pension even though both match
        assert_eq!(decode("PensionDB X").role, Role::PensionDb);
    }

    #[test]
    fn test_encode_round_trip() {
        for (name, role) in [
            ("Pension Aviva", Role::PensionDc),
            ("Conditional pay mortgage", Role::Conditional),
            ("plain name", Role::Plain),
        ] {
            let d = decode(name);
            assert_eq!(d.role, role);
            assert_eq!(encode(d.role, &d.base), name);
        }
    }
}
