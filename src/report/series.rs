//! Chart series aggregation
//!
//! Turns the clock's per-date snapshots into labeled series at the
//! requested frequency, detail level and focus, in the wire shape the
//! charting collaborators consume.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::simulate::state::{EntityKind, SnapshotStore};

/// Reporting bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Monthly,
    Annually,
}

impl Frequency {
    pub fn parse(raw: &str) -> Option<Frequency> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" => Some(Frequency::Monthly),
            "annually" | "annual" | "yearly" => Some(Frequency::Annually),
            _ => None,
        }
    }
}

/// How much the output is broken down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// One series summing everything in scope
    Totalled,
    /// One series per category
    Coarse,
    /// One series per named item
    Fine,
}

impl Detail {
    pub fn parse(raw: &str) -> Option<Detail> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "totalled" | "total" => Some(Detail::Totalled),
            "coarse" => Some(Detail::Coarse),
            "fine" | "detailed" => Some(Detail::Fine),
            _ => None,
        }
    }
}

/// What subset of entities a chart covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Focus {
    All,
    Category(String),
    Item(String),
}

/// Whether a series reports levels or flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartView {
    /// Absolute value at each bucket end
    Val,
    /// Only within-bucket additions
    Additions,
    /// Only within-bucket reductions
    Reductions,
    /// Both, as paired series
    Deltas,
}

impl ChartView {
    pub fn parse(raw: &str) -> Option<ChartView> {
        match raw.trim() {
            "val" => Some(ChartView::Val),
            "+" => Some(ChartView::Additions),
            "-" => Some(ChartView::Reductions),
            "+-" => Some(ChartView::Deltas),
            _ => None,
        }
    }
}

/// Full view configuration for one chart
#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub frequency: Frequency,
    pub detail: Detail,
    pub focus: Focus,
    pub chart_view: ChartView,
    /// When set, labels show the person's age instead of the date
    pub birth_date: Option<NaiveDate>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::Monthly,
            detail: Detail::Fine,
            focus: Focus::All,
            chart_view: ChartView::Val,
            birth_date: None,
        }
    }
}

/// One chart point
#[derive(Debug, Clone, Serialize)]
pub struct DataPoint {
    pub label: String,
    pub y: f64,
    pub ttip: String,
}

/// One chart series in the wire shape the chart widgets consume
#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub name: String,
    #[serde(rename = "type")]
    pub series_type: String,
    #[serde(rename = "showInLegend")]
    pub show_in_legend: bool,
    #[serde(rename = "dataPoints")]
    pub data_points: Vec<DataPoint>,
}

fn format_label(date: NaiveDate, birth_date: Option<NaiveDate>) -> String {
    match birth_date {
        Some(birth) => format!("Age {}", age_at(birth, date)),
        None => date.format("%d %b %Y").to_string(),
    }
}

/// Whole years completed between `birth` and `date`
fn age_at(birth: NaiveDate, date: NaiveDate) -> i32 {
    let mut age = date.year() - birth.year();
    if (date.month(), date.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

fn point(date: NaiveDate, y: f64, birth_date: Option<NaiveDate>) -> DataPoint {
    let label = format_label(date, birth_date);
    let ttip = format!("{:.2} at {}", y, label);
    DataPoint { label, y, ttip }
}

/// Key identifying a reporting bucket
fn bucket_key(date: NaiveDate, frequency: Frequency) -> (i32, u32) {
    match frequency {
        Frequency::Monthly => (date.year(), date.month()),
        Frequency::Annually => (date.year(), 0),
    }
}

/// A named series scope: the summed histories of its member entities
struct Scope {
    name: String,
    /// Summed value per snapshot date, aligned with the store's
    /// snapshot dates
    values: Vec<f64>,
}

/// Build the series for one entity kind under a view configuration
pub fn series_for_kind(
    store: &SnapshotStore,
    kind: EntityKind,
    view: &ViewConfig,
) -> Vec<ChartSeries> {
    let dates = store.snapshot_dates();
    let scopes = collect_scopes(store, kind, view);

    let mut out = Vec::new();
    for scope in scopes {
        match view.chart_view {
            ChartView::Val => out.push(values_series(&scope, dates, view)),
            ChartView::Additions => {
                out.push(delta_series(&scope, dates, view, true));
            }
            ChartView::Reductions => {
                out.push(delta_series(&scope, dates, view, false));
            }
            ChartView::Deltas => {
                out.push(delta_series(&scope, dates, view, true));
                out.push(delta_series(&scope, dates, view, false));
            }
        }
    }
    out
}

fn collect_scopes(store: &SnapshotStore, kind: EntityKind, view: &ViewConfig) -> Vec<Scope> {
    let dates_len = store.snapshot_dates().len();

    // Focus first narrows the member set
    let members: Vec<usize> = store
        .ids()
        .filter(|&id| {
            let info = store.info(id);
            if info.kind != kind {
                return false;
            }
            match &view.focus {
                Focus::All => true,
                Focus::Category(c) => &info.category == c,
                Focus::Item(n) => &info.name == n,
            }
        })
        .collect();

    // Detail then chooses the grouping; group order follows first
    // appearance, which is model declaration order
    let mut scopes: Vec<Scope> = Vec::new();
    for id in members {
        let info = store.info(id);
        let group = match view.detail {
            Detail::Totalled => "Total".to_string(),
            Detail::Coarse => {
                if info.category.is_empty() {
                    info.name.clone()
                } else {
                    info.category.clone()
                }
            }
            Detail::Fine => info.name.clone(),
        };
        let pos = match scopes.iter().position(|s| s.name == group) {
            Some(pos) => pos,
            None => {
                scopes.push(Scope {
                    name: group,
                    values: vec![0.0; dates_len],
                });
                scopes.len() - 1
            }
        };
        for (slot, (_, v)) in scopes[pos].values.iter_mut().zip(store.history(id)) {
            *slot += v;
        }
    }
    scopes
}

fn values_series(scope: &Scope, dates: &[NaiveDate], view: &ViewConfig) -> ChartSeries {
    // Last value in each bucket
    let mut points: Vec<DataPoint> = Vec::new();
    let mut current: Option<((i32, u32), NaiveDate, f64)> = None;
    for (&date, &value) in dates.iter().zip(&scope.values) {
        let key = bucket_key(date, view.frequency);
        match &mut current {
            Some((k, d, v)) if *k == key => {
                *d = date;
                *v = value;
            }
            Some((_, d, v)) => {
                points.push(point(*d, *v, view.birth_date));
                current = Some((key, date, value));
            }
            None => current = Some((key, date, value)),
        }
    }
    if let Some((_, d, v)) = current {
        points.push(point(d, v, view.birth_date));
    }
    series(scope.name.clone(), points)
}

fn delta_series(
    scope: &Scope,
    dates: &[NaiveDate],
    view: &ViewConfig,
    additions: bool,
) -> ChartSeries {
    // Sum within-bucket changes, split by sign
    let mut points: Vec<DataPoint> = Vec::new();
    let mut current: Option<((i32, u32), NaiveDate, f64)> = None;
    for (i, (&date, &value)) in dates.iter().zip(&scope.values).enumerate() {
        let delta = if i == 0 {
            0.0
        } else {
            value - scope.values[i - 1]
        };
        let kept = if additions {
            delta.max(0.0)
        } else {
            delta.min(0.0)
        };
        let key = bucket_key(date, view.frequency);
        match &mut current {
            Some((k, d, sum)) if *k == key => {
                *d = date;
                *sum += kept;
            }
            Some((_, d, sum)) => {
                points.push(point(*d, *sum, view.birth_date));
                current = Some((key, date, kept));
            }
            None => current = Some((key, date, kept)),
        }
    }
    if let Some((_, d, sum)) = current {
        points.push(point(d, sum, view.birth_date));
    }
    let suffix = if additions { "/add" } else { "/less" };
    series(format!("{}{}", scope.name, suffix), points)
}

fn series(name: String, data_points: Vec<DataPoint>) -> ChartSeries {
    ChartSeries {
        name,
        series_type: "stackedColumn".to_string(),
        show_in_legend: true,
        data_points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::state::EntityInfo;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// stocks (no category), Cash and savings (category "Accessible");
    /// savings starts after the first snapshot
    fn sample_store() -> SnapshotStore {
        let mut store = SnapshotStore::new();
        let stocks = store.register(EntityInfo {
            kind: EntityKind::Asset,
            name: "stocks".to_string(),
            category: String::new(),
        });
        let cash = store.register(EntityInfo {
            kind: EntityKind::Asset,
            name: "Cash".to_string(),
            category: "Accessible".to_string(),
        });
        let savings = store.register(EntityInfo {
            kind: EntityKind::Asset,
            name: "savings".to_string(),
            category: "Accessible".to_string(),
        });

        store.activate(stocks, d(2020, 1, 1), 500.0, "start");
        store.activate(cash, d(2020, 1, 1), 500.0, "start");
        store.record_snapshots(d(2020, 1, 1));
        store.activate(savings, d(2020, 2, 1), 500.0, "start");
        store.record_snapshots(d(2020, 2, 1));
        store.record_snapshots(d(2020, 3, 1));
        store
    }

    fn view(detail: Detail) -> ViewConfig {
        ViewConfig {
            detail,
            ..ViewConfig::default()
        }
    }

    #[test]
    fn test_coarse_groups_by_category_with_name_fallback() {
        let store = sample_store();
        let series = series_for_kind(&store, EntityKind::Asset, &view(Detail::Coarse));
        let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["stocks", "Accessible"]);
        // Accessible sums Cash and savings once savings exists
        let accessible = &series[1];
        assert_eq!(accessible.data_points[0].y, 500.0);
        assert_eq!(accessible.data_points[1].y, 1000.0);
    }

    #[test]
    fn test_fine_gives_one_series_per_item() {
        let store = sample_store();
        let series = series_for_kind(&store, EntityKind::Asset, &view(Detail::Fine));
        assert_eq!(series.len(), 3);
        let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["stocks", "Cash", "savings"]);
    }

    #[test]
    fn test_totalled_sums_everything() {
        let store = sample_store();
        let series = series_for_kind(&store, EntityKind::Asset, &view(Detail::Totalled));
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "Total");
        assert_eq!(series[0].data_points[2].y, 1500.0);
    }

    #[test]
    fn test_focus_narrows_scope() {
        let store = sample_store();
        let v = ViewConfig {
            detail: Detail::Fine,
            focus: Focus::Category("Accessible".to_string()),
            ..ViewConfig::default()
        };
        let series = series_for_kind(&store, EntityKind::Asset, &v);
        let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Cash", "savings"]);

        let v = ViewConfig {
            detail: Detail::Fine,
            focus: Focus::Item("stocks".to_string()),
            ..ViewConfig::default()
        };
        assert_eq!(series_for_kind(&store, EntityKind::Asset, &v).len(), 1);
    }

    #[test]
    fn test_annual_buckets_take_last_value() {
        let mut store = SnapshotStore::new();
        let id = store.register(EntityInfo {
            kind: EntityKind::Asset,
            name: "a".to_string(),
            category: String::new(),
        });
        store.activate(id, d(2020, 1, 1), 1.0, "start");
        for m in 1..=12 {
            store.set_value(id, d(2020, m, 1), f64::from(m), "step");
            store.record_snapshots(d(2020, m, 1));
        }
        let v = ViewConfig {
            frequency: Frequency::Annually,
            ..ViewConfig::default()
        };
        let series = series_for_kind(&store, EntityKind::Asset, &v);
        assert_eq!(series[0].data_points.len(), 1);
        assert_eq!(series[0].data_points[0].y, 12.0);
        assert_eq!(series[0].data_points[0].label, "01 Dec 2020");
    }

    #[test]
    fn test_delta_views_split_by_sign() {
        let mut store = SnapshotStore::new();
        let id = store.register(EntityInfo {
            kind: EntityKind::Asset,
            name: "a".to_string(),
            category: String::new(),
        });
        store.activate(id, d(2020, 1, 1), 100.0, "start");
        store.record_snapshots(d(2020, 1, 1));
        store.set_value(id, d(2020, 2, 1), 150.0, "up");
        store.record_snapshots(d(2020, 2, 1));
        store.set_value(id, d(2020, 3, 1), 120.0, "down");
        store.record_snapshots(d(2020, 3, 1));

        let v = ViewConfig {
            chart_view: ChartView::Deltas,
            ..ViewConfig::default()
        };
        let series = series_for_kind(&store, EntityKind::Asset, &v);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "a/add");
        assert_eq!(series[1].name, "a/less");
        assert_eq!(series[0].data_points[1].y, 50.0);
        assert_eq!(series[1].data_points[2].y, -30.0);
    }

    #[test]
    fn test_birth_date_labels_as_ages() {
        let store = sample_store();
        let v = ViewConfig {
            detail: Detail::Totalled,
            birth_date: NaiveDate::from_ymd_opt(1980, 6, 15),
            ..ViewConfig::default()
        };
        let series = series_for_kind(&store, EntityKind::Asset, &v);
        // Snapshots are early 2020, before the June birthday
        assert_eq!(series[0].data_points[0].label, "Age 39");
    }

    #[test]
    fn test_series_wire_shape() {
        let store = sample_store();
        let series = series_for_kind(&store, EntityKind::Asset, &view(Detail::Totalled));
        let json = serde_json::to_string(&series[0]).unwrap();
        assert!(json.contains("\"type\":\"stackedColumn\""));
        assert!(json.contains("\"showInLegend\":true"));
        assert!(json.contains("\"dataPoints\""));
        assert!(json.contains("\"ttip\""));
    }
}
