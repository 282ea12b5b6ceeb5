//! Engine-internal error types for resolution and simulation failures
//!
//! Validation diagnostics live in `crate::validate::ValidationIssue`; the
//! errors here are the ones a projection run can abort with after a model
//! has passed validation.

use thiserror::Error;

/// Errors raised by the resolvers and the simulation clock.
///
/// The rendered messages are part of the caller contract: hosts surface
/// them verbatim, so variants carry the offending names/raw text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A settings reference names a setting absent from the model
    #[error("setting '{0}' cannot be resolved")]
    UnresolvedSetting(String),

    /// Settings resolution recursed into an already-open name
    #[error("setting '{0}' is defined in terms of itself")]
    CyclicSetting(String),

    /// A setting's raw value cannot be parsed as number, percentage or
    /// number-with-setting-suffix
    #[error("setting '{name}' has malformed value '{raw}'")]
    MalformedValue { name: String, raw: String },

    /// A percentage value was used where no base amount exists
    #[error("percentage '{0}' used outside a transaction context")]
    PercentWithoutBase(String),

    /// A date field names a trigger absent from the model
    #[error("unknown trigger '{0}'")]
    UnknownTrigger(String),

    /// A date field is neither a trigger nor a parseable date
    #[error("'{0}' is not a valid date")]
    InvalidDate(String),

    /// The clock hit a `from`/`to`/liability reference it cannot resolve.
    /// Validation prevents this for checked models; a run aborts rather
    /// than silently defaulting.
    #[error("unknown entity '{0}' referenced during simulation")]
    UnknownEntity(String),
}
