use crate::calculator::Report;
use crate::error::Result;
use crate::reading::{READING_COLUMNS, Reading};
use bigdecimal::{BigDecimal, RoundingMode};
use clap::ValueEnum;
use jiff::Timestamp;
use jiff::tz::{Offset, TimeZone};

#[derive(ValueEnum, Copy, Clone, PartialEq, Eq, Debug)]
pub enum OutputFormat {
    /// Human-readable summary, suitable for a job summary page.
    Markdown,
    /// The full report as JSON. Can be passed back with `--previous`.
    Json,
    /// One header row and one data row. Can be passed back with `--previous`.
    Csv,
}

const UNKNOWN: &str = "unknown";

const DERIVED_COLUMNS: [&str; 9] = [
    "REMAINING_KWH",
    "PRICE_PER_KWH",
    "METER_ID",
    "DELTA_USAGE",
    "DELTA_COST",
    "ELAPSED_DAYS",
    "AVERAGE_DAILY_COST",
    "ESTIMATED_DAYS",
    "DISCONTINUITY",
];

pub fn render_summary(report: &Report, format: OutputFormat, offset: Offset) -> Result<String> {
    match format {
        OutputFormat::Markdown => Ok(render_markdown(report, offset)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)? + "\n"),
        OutputFormat::Csv => render_csv(report, offset),
    }
}

pub fn render_markdown(report: &Report, offset: Offset) -> String {
    let current = &report.current;
    let mut lines = vec![
        "# Electricity balance".to_string(),
        format!("- Time: {}", local_time(current.timestamp, offset)),
    ];
    if let Some(meter) = meter_label(current) {
        lines.push(format!("- Meter: {meter}"));
    }
    lines.push(format!("- Balance (CNY): {}", amount(&current.balance)));
    lines.push(format!("- Remaining energy (kWh): {}", opt_amount(&current.remaining_kwh)));
    if current.usage.is_some() {
        lines.push(format!("- Cumulative usage (kWh): {}", opt_amount(&current.usage)));
    }
    if let Some(price) = &current.price_per_kwh {
        lines.push(format!("- Unit price (CNY/kWh): {}", amount(price)));
    }

    match &report.previous {
        None => lines.push("- Previous reading: none, nothing to compare against".to_string()),
        Some(previous) => {
            lines.push(format!(
                "- Previous reading: {} (balance {})",
                local_time(previous.timestamp, offset),
                amount(&previous.balance)
            ));
            lines.push(format!("- Elapsed days: {}", opt_amount(&report.elapsed_days)));
            lines.push(format!(
                "- Usage since previous (kWh): {}",
                opt_amount(&report.delta_usage)
            ));
            lines.push(format!("- Cost since previous (CNY): {}", opt_amount(&report.delta_cost)));
            lines.push(format!(
                "- Average daily cost (CNY): {}",
                opt_amount(&report.average_daily_cost)
            ));
        }
    }
    lines.push(format!("- Estimated days remaining: {}", opt_days(&report.estimated_days)));
    if let Some(discontinuity) = report.discontinuity {
        lines.push(format!("- Warning: {}", discontinuity.describe()));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// One-line message for the issue comment.
pub fn render_notification(report: &Report, alert: bool) -> String {
    let prefix = if alert { "⚠️ Low balance: " } else { "" };
    let runway = match &report.estimated_days {
        Some(days) => format!("about {} days left", days_value(days)),
        None => format!("days left {UNKNOWN}"),
    };
    format!(
        "{prefix}electricity balance {} CNY, {runway}",
        amount(&report.current.balance)
    )
}

fn render_csv(report: &Report, offset: Offset) -> Result<String> {
    let current = &report.current;
    let cell = |v: &Option<BigDecimal>| v.as_ref().map(amount).unwrap_or_default();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(READING_COLUMNS.into_iter().chain(DERIVED_COLUMNS))?;
    writer.write_record([
        current.timestamp.display_with_offset(offset).to_string(),
        current.balance.to_string(),
        current.usage.as_ref().map(ToString::to_string).unwrap_or_default(),
        current.remaining_kwh.as_ref().map(ToString::to_string).unwrap_or_default(),
        current.price_per_kwh.as_ref().map(ToString::to_string).unwrap_or_default(),
        current.meter_id.clone().unwrap_or_default(),
        cell(&report.delta_usage),
        cell(&report.delta_cost),
        cell(&report.elapsed_days),
        cell(&report.average_daily_cost),
        report.estimated_days.as_ref().map(days_value).unwrap_or_default(),
        report
            .discontinuity
            .map(|d| d.describe().to_string())
            .unwrap_or_default(),
    ])?;
    let bytes = writer
        .into_inner()
        .map_err(|e| crate::error::MonitorError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn meter_label(reading: &Reading) -> Option<String> {
    match (&reading.meter_name, &reading.meter_id) {
        (Some(name), Some(id)) => Some(format!("{name} ({id})")),
        (Some(name), None) => Some(name.clone()),
        (None, Some(id)) => Some(id.clone()),
        (None, None) => None,
    }
}

fn local_time(timestamp: Timestamp, offset: Offset) -> String {
    timestamp
        .to_zoned(TimeZone::fixed(offset))
        .strftime("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

fn amount(value: &BigDecimal) -> String {
    value.with_scale_round(2, RoundingMode::HalfUp).to_string()
}

fn opt_amount(value: &Option<BigDecimal>) -> String {
    value.as_ref().map(amount).unwrap_or_else(|| UNKNOWN.to_string())
}

fn days_value(value: &BigDecimal) -> String {
    value.with_scale_round(1, RoundingMode::HalfUp).to_string()
}

fn opt_days(value: &Option<BigDecimal>) -> String {
    value.as_ref().map(days_value).unwrap_or_else(|| UNKNOWN.to_string())
}
