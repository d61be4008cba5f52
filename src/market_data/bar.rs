// =============================================================================
// Bars & Resolutions — tick-to-bar aggregation math
// =============================================================================

use anyhow::bail;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Chart resolution in the terminal's vocabulary
/// ("1", "5", "15", "30", "60", "240", "1D", "1W").
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl Resolution {
    pub const ALL: &'static [Resolution] = &[
        Resolution::Min1,
        Resolution::Min5,
        Resolution::Min15,
        Resolution::Min30,
        Resolution::Hour1,
        Resolution::Hour4,
        Resolution::Day1,
        Resolution::Week1,
    ];

    /// Length of one bar interval in milliseconds.
    pub fn as_millis(self) -> i64 {
        match self {
            Resolution::Min1 => 60_000,
            Resolution::Min5 => 300_000,
            Resolution::Min15 => 900_000,
            Resolution::Min30 => 1_800_000,
            Resolution::Hour1 => 3_600_000,
            Resolution::Hour4 => 14_400_000,
            Resolution::Day1 => 86_400_000,
            Resolution::Week1 => 604_800_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Min1 => "1",
            Resolution::Min5 => "5",
            Resolution::Min15 => "15",
            Resolution::Min30 => "30",
            Resolution::Hour1 => "60",
            Resolution::Hour4 => "240",
            Resolution::Day1 => "1D",
            Resolution::Week1 => "1W",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let res = match s {
            "1" => Resolution::Min1,
            "5" => Resolution::Min5,
            "15" => Resolution::Min15,
            "30" => Resolution::Min30,
            "60" => Resolution::Hour1,
            "240" => Resolution::Hour4,
            "1D" => Resolution::Day1,
            "1W" => Resolution::Week1,
            other => bail!("unsupported resolution: {other}"),
        };
        Ok(res)
    }
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
///
/// `time` is the bar's opening epoch-millisecond, always aligned to a
/// multiple-of-resolution offset from the channel's established boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Seed a fresh bar from the first trade of its interval.
    pub fn from_trade(time: i64, price: f64, size: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }
}

/// Opening time of the bar that follows `bar_time`.
pub fn next_bar_time(bar_time: i64, resolution: Resolution) -> i64 {
    bar_time + resolution.as_millis()
}

/// Fold one trade into the bar stream.
///
/// If the trade lands at or past the current bar's end, a new bar opens at
/// the boundary-aligned slot containing the trade (integer division, so a gap
/// of missed ticks cannot desynchronize future boundaries). Otherwise the
/// current bar is mutated in place: high/low widen, close follows the trade,
/// volume accumulates.
pub fn apply_trade(
    last: &Bar,
    price: f64,
    size: f64,
    trade_time_ms: i64,
    resolution: Resolution,
) -> Bar {
    let res_ms = resolution.as_millis();
    let next_open = next_bar_time(last.time, resolution);

    if trade_time_ms >= next_open {
        let time = next_open + ((trade_time_ms - next_open) / res_ms) * res_ms;
        Bar::from_trade(time, price, size)
    } else {
        Bar {
            time: last.time,
            open: last.open,
            high: last.high.max(price),
            low: last.low.min(price),
            close: price,
            volume: last.volume + size,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
