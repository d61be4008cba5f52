// =============================================================================
// Futures Contract Specs & Ticker Translation
// =============================================================================
//
// Two vocabularies exist for the same instrument: the broker-native contract
// ticker (e.g. "NQH6") and the user-facing display ticker (e.g. "NQ"). The
// TickerMap translates between them; the spec table carries the per-contract
// pricing parameters the order ticket needs (tick size = min_mov / price_scale).
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

/// Static pricing/venue parameters for one futures contract family.
#[derive(Debug, Clone, Copy)]
pub struct SymbolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub exchange: &'static str,
    pub min_mov: u32,
    pub price_scale: u32,
    pub point_value: f64,
}

impl SymbolSpec {
    /// Smallest price increment for the contract.
    pub fn tick_size(&self) -> f64 {
        f64::from(self.min_mov) / f64::from(self.price_scale)
    }
}

/// CME-complex contracts the dashboard trades.
pub const SYMBOL_SPECS: &[SymbolSpec] = &[
    SymbolSpec { name: "NQ",  description: "E-mini Nasdaq-100",       exchange: "CME",   min_mov: 25,  price_scale: 100,  point_value: 20.0 },
    SymbolSpec { name: "MNQ", description: "Micro E-mini Nasdaq-100", exchange: "CME",   min_mov: 25,  price_scale: 100,  point_value: 2.0 },
    SymbolSpec { name: "ES",  description: "E-mini S&P 500",          exchange: "CME",   min_mov: 25,  price_scale: 100,  point_value: 50.0 },
    SymbolSpec { name: "MES", description: "Micro E-mini S&P 500",    exchange: "CME",   min_mov: 25,  price_scale: 100,  point_value: 5.0 },
    SymbolSpec { name: "YM",  description: "E-mini Dow Jones",        exchange: "CBOT",  min_mov: 1,   price_scale: 1,    point_value: 5.0 },
    SymbolSpec { name: "RTY", description: "E-mini Russell 2000",     exchange: "CME",   min_mov: 10,  price_scale: 100,  point_value: 50.0 },
    SymbolSpec { name: "CL",  description: "Crude Oil",               exchange: "NYMEX", min_mov: 1,   price_scale: 100,  point_value: 1000.0 },
    SymbolSpec { name: "GC",  description: "Gold",                    exchange: "COMEX", min_mov: 10,  price_scale: 100,  point_value: 100.0 },
    SymbolSpec { name: "SI",  description: "Silver",                  exchange: "COMEX", min_mov: 5,   price_scale: 1000, point_value: 5000.0 },
    SymbolSpec { name: "NG",  description: "Natural Gas",             exchange: "NYMEX", min_mov: 1,   price_scale: 1000, point_value: 10000.0 },
    SymbolSpec { name: "MBT", description: "Micro Bitcoin",           exchange: "CME",   min_mov: 500, price_scale: 100,  point_value: 0.1 },
];

/// Look up the spec for a display ticker.
pub fn symbol_spec(name: &str) -> Option<&'static SymbolSpec> {
    SYMBOL_SPECS.iter().find(|s| s.name == name)
}

/// Look up the spec for a display ticker, falling back to ES for unknown
/// symbols so the order ticket always has sane pricing parameters.
pub fn symbol_spec_or_default(name: &str) -> &'static SymbolSpec {
    symbol_spec(name)
        .or_else(|| symbol_spec("ES"))
        .expect("ES spec is always present in SYMBOL_SPECS")
}

/// Instrument parameters in the shape the terminal's order ticket expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolTradeInfo {
    pub qty_min: f64,
    pub qty_max: f64,
    pub qty_step: f64,
    pub qty_default: f64,
    pub pip_size: f64,
    pub pip_value: f64,
    pub min_tick: f64,
    pub description: String,
}

/// Build the order-ticket info for a display ticker.
pub fn trade_info(display_symbol: &str) -> SymbolTradeInfo {
    let spec = symbol_spec_or_default(display_symbol);
    let tick = spec.tick_size();
    SymbolTradeInfo {
        qty_min: 1.0,
        qty_max: 1000.0,
        qty_step: 1.0,
        qty_default: 1.0,
        pip_size: tick,
        pip_value: spec.point_value * tick,
        min_tick: tick,
        description: if spec.name == display_symbol {
            spec.description.to_string()
        } else {
            display_symbol.to_string()
        },
    }
}

// ---------------------------------------------------------------------------
// Ticker translation
// ---------------------------------------------------------------------------

/// Bidirectional display ⇄ contract ticker map.
///
/// Parsed from `"DISPLAY:CONTRACT,..."` pairs (e.g. `"NQ:NQH6,ES:ESH6"`).
/// Unknown tickers translate to themselves so a missing mapping degrades to
/// pass-through rather than an error.
#[derive(Debug, Clone, Default)]
pub struct TickerMap {
    display_to_contract: HashMap<String, String>,
    contract_to_display: HashMap<String, String>,
}

impl TickerMap {
    /// Parse a comma-separated pair list. Malformed entries are skipped.
    pub fn from_pairs(pairs: &str) -> Self {
        let mut display_to_contract = HashMap::new();
        let mut contract_to_display = HashMap::new();

        for pair in pairs.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((display, contract)) = pair.split_once(':') else {
                continue;
            };
            let display = display.trim();
            let contract = contract.trim();
            if display.is_empty() || contract.is_empty() {
                continue;
            }
            display_to_contract.insert(display.to_string(), contract.to_string());
            contract_to_display.insert(contract.to_string(), display.to_string());
        }

        Self {
            display_to_contract,
            contract_to_display,
        }
    }

    /// Display ticker → broker contract ticker (identity fallback).
    pub fn contract_ticker(&self, display: &str) -> String {
        self.display_to_contract
            .get(display)
            .cloned()
            .unwrap_or_else(|| display.to_string())
    }

    /// Broker contract ticker → display ticker (identity fallback).
    pub fn display_ticker(&self, contract: &str) -> String {
        self.contract_to_display
            .get(contract)
            .cloned()
            .unwrap_or_else(|| contract.to_string())
    }

    /// All configured display tickers.
    pub fn display_tickers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.display_to_contract.keys().cloned().collect();
        names.sort();
        names
    }
}
