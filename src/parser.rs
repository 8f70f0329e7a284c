use crate::error::{MonitorError, Result};
use crate::reading::Reading;
use bigdecimal::BigDecimal;
use jiff::Timestamp;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

const SNIPPET_LIMIT: usize = 200;

/// Field labels as printed in the `<span>` preceding each value.
pub mod labels {
    pub const METER_NAME: &str = "表名称";
    pub const METER_ID: &str = "表号";
    pub const BALANCE: &str = "剩余金额";
    pub const REMAINING_KWH: &str = "剩余电量";
    pub const PRICE_PER_KWH: &str = "综合费用";
    pub const CUMULATIVE_USAGE: &str = "累计用电";
}

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("valid number regex"));

/// Extract a [`Reading`] from the billing page.
///
/// The page pairs a `<span>` label with the next `<label>` holding its value.
/// Only the balance is required. An overdrawn meter shows a negative balance.
pub fn parse_page(html: &str, timestamp: Timestamp) -> Result<Reading> {
    let page = Page::new(html);

    let raw_balance = page
        .find_value(labels::BALANCE)
        .ok_or_else(|| page.error(format!("no {} field on page", labels::BALANCE)))?;
    let balance = parse_number(&raw_balance)
        .ok_or_else(|| page.error(format!("balance {raw_balance:?} is not a number")))?;

    let number = |label: &str| page.find_value(label).as_deref().and_then(parse_number);
    let reading = Reading {
        timestamp,
        balance,
        usage: number(labels::CUMULATIVE_USAGE),
        remaining_kwh: number(labels::REMAINING_KWH),
        price_per_kwh: number(labels::PRICE_PER_KWH),
        meter_name: page.find_value(labels::METER_NAME),
        meter_id: page.find_value(labels::METER_ID),
    };
    tracing::debug!(?reading, "parsed billing page");
    Ok(reading)
}

struct Page<'a> {
    html: &'a str,
    // ASCII-lowercased copy; byte offsets match `html`.
    lower: String,
}

impl<'a> Page<'a> {
    fn new(html: &'a str) -> Self {
        Self {
            html,
            lower: html.to_ascii_lowercase(),
        }
    }

    fn find_value(&self, keyword: &str) -> Option<String> {
        let target = normalize_label(keyword);
        let mut from = 0;
        while let Some((start, end)) = self.next_tag_block("<span", "</span>", from) {
            let text = strip_tags(&self.html[start..end]);
            if !text.is_empty() && normalize_label(&text).starts_with(&target) {
                if let Some((vs, ve)) = self.next_tag_block("<label", "</label>", end) {
                    let value = strip_tags(&self.html[vs..ve]);
                    return (!value.is_empty()).then_some(value);
                }
            }
            from = end;
        }
        None
    }

    /// Byte range of the next `open ... close` block at or after `from`.
    fn next_tag_block(&self, open: &str, close: &str, from: usize) -> Option<(usize, usize)> {
        let start = self.lower.get(from..)?.find(open)? + from;
        let open_end = self.lower[start..].find('>')? + start + 1;
        let end = self.lower[open_end..].find(close)? + open_end + close.len();
        Some((start, end))
    }

    fn error(&self, reason: String) -> MonitorError {
        MonitorError::Parse {
            reason,
            snippet: snippet(self.html),
        }
    }
}

fn normalize_label(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '：')
        .collect()
}

/// First decimal number in `text`, thousands separators dropped.
fn parse_number(text: &str) -> Option<BigDecimal> {
    let found = NUMBER.find(text)?;
    BigDecimal::from_str(&found.as_str().replace(',', "")).ok()
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&decode_entities(&out))
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible page text, shortened for error messages.
fn snippet(html: &str) -> String {
    let text = strip_tags(html);
    if text.chars().count() <= SNIPPET_LIMIT {
        return text;
    }
    let mut short: String = text.chars().take(SNIPPET_LIMIT - 3).collect();
    short.push_str("...");
    short
}
