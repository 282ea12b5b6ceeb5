//! Resolvers for the model's indirection layers: dates, triggers, settings

pub mod dates;
pub mod settings;
pub mod triggers;

pub use dates::parse_flexible_date;
pub use settings::SettingsTimeline;
pub use triggers::resolve_date;
