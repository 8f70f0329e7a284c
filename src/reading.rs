use crate::error::{MonitorError, Result};
use bigdecimal::BigDecimal;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;
use std::str::FromStr;

/// One observation of the billing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: Timestamp,
    /// Remaining prepaid balance, in CNY.
    pub balance: BigDecimal,
    /// Cumulative metered usage in kWh, when the page shows it.
    #[serde(default)]
    pub usage: Option<BigDecimal>,
    #[serde(default)]
    pub remaining_kwh: Option<BigDecimal>,
    #[serde(default)]
    pub price_per_kwh: Option<BigDecimal>,
    #[serde(default)]
    pub meter_name: Option<String>,
    #[serde(default)]
    pub meter_id: Option<String>,
}

impl Reading {
    pub fn new(timestamp: Timestamp, balance: BigDecimal, usage: Option<BigDecimal>) -> Self {
        Self {
            timestamp,
            balance,
            usage,
            remaining_kwh: None,
            price_per_kwh: None,
            meter_name: None,
            meter_id: None,
        }
    }
}

/// Leading columns of the CSV artifact. Anything after them is ignored when reading back.
pub const READING_COLUMNS: [&str; 3] = ["TIMESTAMP", "BALANCE", "USAGE"];

/// Load the reading recorded by a previous run's output artifact.
///
/// `.json` files hold either a full report (its `current` reading is used) or a bare reading.
/// Anything else is read as CSV: a `TIMESTAMP,BALANCE,USAGE,...` header and at least one row,
/// of which the last one wins. A missing file means there is no previous reading.
pub fn load_previous(path: &Path) -> Result<Option<Reading>> {
    if !path.exists() {
        return Ok(None);
    }
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let content = fs::read_to_string(path)?;
        return reading_from_json(&content).map(Some);
    }
    read_csv_reading(File::open(path)?)
}

fn reading_from_json(content: &str) -> Result<Reading> {
    let mut value: serde_json::Value = serde_json::from_str(content)?;
    if let Some(current) = value.get_mut("current").map(serde_json::Value::take) {
        value = current;
    }
    Ok(serde_json::from_value(value)?)
}

fn read_csv_reading(source: impl Read) -> Result<Option<Reading>> {
    // Job summaries may carry prose above the table, so skip ahead to the header row.
    let mut reader = BufReader::new(source);
    let mut line_buf = String::new();
    loop {
        line_buf.clear();
        if reader.read_line(&mut line_buf)? == 0 {
            return Ok(None);
        }
        if line_buf.starts_with("TIMESTAMP,BALANCE,") {
            break;
        }
    }
    let reader_with_headers = Cursor::new(line_buf).chain(reader);
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader_with_headers);
    let headers = csv_reader.headers()?.clone();
    if headers.iter().take(READING_COLUMNS.len()).ne(READING_COLUMNS) {
        return Err(MonitorError::Config(format!(
            "unexpected headers in previous reading CSV: {:?}, expected {:?}",
            headers, READING_COLUMNS
        )));
    }

    let mut last = None;
    for record in csv_reader.into_records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        last = Some(record);
    }
    let Some(record) = last else {
        return Ok(None);
    };

    let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");
    let timestamp = Timestamp::from_str(field(0)).map_err(|e| {
        MonitorError::Config(format!("invalid TIMESTAMP {:?} in previous reading: {e}", field(0)))
    })?;
    let balance = BigDecimal::from_str(field(1)).map_err(|_| {
        MonitorError::Config(format!("invalid BALANCE {:?} in previous reading", field(1)))
    })?;
    let usage = match field(2) {
        "" => None,
        raw => Some(BigDecimal::from_str(raw).map_err(|_| {
            MonitorError::Config(format!("invalid USAGE {raw:?} in previous reading"))
        })?),
    };
    Ok(Some(Reading::new(timestamp, balance, usage)))
}
