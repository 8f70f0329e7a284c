use crate::reading::Reading;
use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;
use serde::Serialize;

const SECONDS_PER_DAY: i64 = 86_400;

/// Why two readings could not be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discontinuity {
    /// The previous reading is not older than the current one.
    ClockNotAdvanced,
    /// Cumulative usage went down, most likely a meter reset.
    UsageDecreased,
}

impl Discontinuity {
    pub fn describe(self) -> &'static str {
        match self {
            Discontinuity::ClockNotAdvanced => "previous reading is not older than the current one",
            Discontinuity::UsageDecreased => "cumulative usage decreased (meter reset?)",
        }
    }
}

/// Comparison of the current reading against the previous run's.
///
/// The delta fields are `None` when they are unknown, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub current: Reading,
    pub previous: Option<Reading>,
    pub delta_usage: Option<BigDecimal>,
    pub delta_cost: Option<BigDecimal>,
    pub elapsed_days: Option<BigDecimal>,
    pub average_daily_cost: Option<BigDecimal>,
    pub estimated_days: Option<BigDecimal>,
    pub discontinuity: Option<Discontinuity>,
}

impl Report {
    fn without_deltas(
        current: Reading,
        previous: Option<Reading>,
        discontinuity: Option<Discontinuity>,
    ) -> Self {
        Self {
            current,
            previous,
            delta_usage: None,
            delta_cost: None,
            elapsed_days: None,
            average_daily_cost: None,
            estimated_days: None,
            discontinuity,
        }
    }
}

pub fn calculate(current: Reading, previous: Option<Reading>) -> Report {
    let Some(prev) = previous else {
        return Report::without_deltas(current, None, None);
    };

    if prev.timestamp >= current.timestamp {
        return Report::without_deltas(current, Some(prev), Some(Discontinuity::ClockNotAdvanced));
    }
    let usage_decreased = matches!(
        (&current.usage, &prev.usage),
        (Some(now), Some(before)) if now < before
    );
    if usage_decreased {
        return Report::without_deltas(current, Some(prev), Some(Discontinuity::UsageDecreased));
    }
    let delta_usage = match (&current.usage, &prev.usage) {
        (Some(now), Some(before)) => Some(now - before),
        _ => None,
    };

    let elapsed_nanos = current.timestamp.duration_since(prev.timestamp).as_nanos();
    let elapsed_days =
        BigDecimal::new(BigInt::from(elapsed_nanos), 9) / BigDecimal::from(SECONDS_PER_DAY);
    // Negative after a top-up.
    let delta_cost = &prev.balance - &current.balance;
    let average_daily_cost =
        (elapsed_days > BigDecimal::from(0)).then(|| &delta_cost / &elapsed_days);
    let estimated_days = average_daily_cost
        .as_ref()
        .and_then(|cost| estimate_days(&current.balance, cost));

    Report {
        current,
        previous: Some(prev),
        delta_usage,
        delta_cost: Some(delta_cost),
        elapsed_days: Some(elapsed_days),
        average_daily_cost,
        estimated_days,
        discontinuity: None,
    }
}

/// Days until the balance runs out at the given spend rate. `None` unless spend is positive.
/// An overdrawn balance has zero days left.
pub fn estimate_days(balance: &BigDecimal, average_daily_cost: &BigDecimal) -> Option<BigDecimal> {
    let zero = BigDecimal::from(0);
    if *average_daily_cost <= zero {
        return None;
    }
    if *balance <= zero {
        return Some(zero);
    }
    Some(balance / average_daily_cost)
}
