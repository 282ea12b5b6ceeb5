//! finsim CLI
//!
//! Loads a model from JSON, validates it, runs one projection and prints
//! chart series, the report table and tax summaries; optionally exports
//! the report table as CSV.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use finsim::model::loader::load_model;
use finsim::report::{
    changes_in_window, series_for_kind, settings_table, tax_summary, ChartView, Detail, Focus,
    Frequency, ViewConfig,
};
use finsim::resolve::triggers::resolve_date;
use finsim::simulate::state::EntityKind;
use finsim::simulate::{ProjectionConfig, ProjectionEngine};
use finsim::validate::normalize;

#[derive(Parser, Debug)]
#[command(name = "finsim", about = "Deterministic personal-finance projection")]
struct Args {
    /// Path to the model JSON file
    #[arg(long)]
    model: PathBuf,

    /// Start of the reported window (date or trigger name)
    #[arg(long)]
    start: String,

    /// End of the reported window (date or trigger name)
    #[arg(long)]
    end: String,

    /// Reporting frequency: monthly or annually
    #[arg(long, default_value = "monthly")]
    frequency: String,

    /// Detail level: totalled, coarse or fine
    #[arg(long, default_value = "fine")]
    detail: String,

    /// Focus: "all", a category name or an item name
    #[arg(long, default_value = "all")]
    focus: String,

    /// Chart view: val, +, - or +-
    #[arg(long = "view", default_value = "val")]
    chart_view: String,

    /// Annual CPI percentage
    #[arg(long, default_value_t = 0.0)]
    cpi: f64,

    /// Birth date; when given, chart labels show ages instead of dates
    #[arg(long)]
    birth_date: Option<String>,

    /// Show tax bases net of the tax-free allowance
    #[arg(long, default_value_t = false)]
    tax_net: bool,

    /// Write the report table to this CSV path
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let model = load_model(&args.model)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("loading model from {}", args.model.display()))?;

    let norm = match normalize(&model) {
        Ok(norm) => norm,
        Err(issues) => {
            for issue in &issues {
                eprintln!("{}", issue);
            }
            bail!("model failed validation with {} issue(s)", issues.len());
        }
    };

    let roi_start = resolve_date(&model.triggers, &args.start)?;
    let roi_end = resolve_date(&model.triggers, &args.end)?;
    if roi_end <= roi_start {
        bail!("window end {} is not after start {}", roi_end, roi_start);
    }

    let birth_date = match &args.birth_date {
        Some(raw) => Some(resolve_date(&model.triggers, raw)?),
        None => None,
    };
    let view = ViewConfig {
        frequency: Frequency::parse(&args.frequency)
            .with_context(|| format!("bad frequency '{}'", args.frequency))?,
        detail: Detail::parse(&args.detail)
            .with_context(|| format!("bad detail '{}'", args.detail))?,
        focus: parse_focus(&model, &args.focus),
        chart_view: ChartView::parse(&args.chart_view)
            .with_context(|| format!("bad chart view '{}'", args.chart_view))?,
        birth_date,
    };

    let mut config = ProjectionConfig::new(roi_start, roi_end);
    config.cpi = args.cpi;
    let engine = ProjectionEngine::new(norm.clone(), config);
    let output = engine.run()?;

    println!("finsim v0.1.0");
    println!("=============\n");
    println!(
        "Window {} to {}, CPI {:.2}%\n",
        roi_start, roi_end, args.cpi
    );

    for kind in [EntityKind::Asset, EntityKind::Income, EntityKind::Expense] {
        let series = series_for_kind(&output.store, kind, &view);
        if series.is_empty() {
            continue;
        }
        println!("{:?} series:", kind);
        for s in &series {
            let first = s.data_points.first();
            let last = s.data_points.last();
            println!(
                "  {:30} {:>4} points  first {:>14}  last {:>14}",
                s.name,
                s.data_points.len(),
                first.map(|p| format!("{:.2}", p.y)).unwrap_or_default(),
                last.map(|p| format!("{:.2}", p.y)).unwrap_or_default(),
            );
        }
        println!();
    }

    let settings = settings_table(&norm, roi_start);
    if !settings.is_empty() {
        println!("Settings at {}:", roi_start);
        for row in &settings {
            match row.value {
                Some(v) => println!("  {:30} {:>14.2}  ({})", row.name, v, row.raw),
                None => println!("  {:30} {:>14}  ({})", row.name, "-", row.raw),
            }
        }
        println!();
    }

    let taxes = tax_summary(&output.ledger, roi_end, args.tax_net);
    if !taxes.is_empty() {
        println!("Tax position at {}:", roi_end);
        for row in &taxes {
            println!(
                "  {:20} {:10} taxable {:>14.2}  due {:>14.2}",
                row.person,
                row.kind.as_str(),
                row.taxable,
                row.liability,
            );
        }
        println!();
    }

    let changes = changes_in_window(output.store.changes(), roi_start, roi_end);
    println!("{} value changes in window", changes.len());

    if let Some(path) = &args.csv {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        for change in &changes {
            writer.serialize(change)?;
        }
        writer.flush()?;
        println!("Report table written to {}", path.display());
    }

    Ok(())
}

/// "all", else a category if any entity carries it, else an item name
fn parse_focus(model: &finsim::Model, raw: &str) -> Focus {
    if raw.eq_ignore_ascii_case("all") {
        return Focus::All;
    }
    let is_category = model.assets.iter().any(|a| a.category == raw)
        || model.incomes.iter().any(|i| i.category == raw)
        || model.expenses.iter().any(|e| e.category == raw);
    if is_category {
        Focus::Category(raw.to_string())
    } else {
        Focus::Item(raw.to_string())
    }
}
