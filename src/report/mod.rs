//! Reporting: chart series aggregation and tabular outputs

pub mod series;
pub mod table;

pub use series::{
    series_for_kind, ChartSeries, ChartView, DataPoint, Detail, Focus, Frequency, ViewConfig,
};
pub use table::{changes_in_window, settings_table, tax_summary, SettingRow, TaxSummaryRow};
