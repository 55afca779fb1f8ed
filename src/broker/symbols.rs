//! Symbol normalization for the broker API
//!
//! Dashboard code speaks standard pair notation ("BTC/USD"); the broker
//! wants epics ("BTCUSD"). A silent wrong-symbol trade is the bug class
//! this module exists to prevent, so unmapped symbols are flagged for the
//! caller to log rather than passed through quietly.

/// Result of a symbol mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedSymbol {
    /// Broker-side symbol (epic)
    pub symbol: String,
    /// True when no explicit table entry existed and the deterministic
    /// fallback rule was applied
    pub fallback: bool,
}

/// Explicit mappings for instruments we actively trade
const SYMBOL_TABLE: &[(&str, &str)] = &[
    ("BTC/USD", "BTCUSD"),
    ("ETH/USD", "ETHUSD"),
    ("LTC/USD", "LTCUSD"),
    ("XRP/USD", "XRPUSD"),
    ("SOL/USD", "SOLUSD"),
    ("EUR/USD", "EURUSD"),
    ("GBP/USD", "GBPUSD"),
    ("USD/JPY", "USDJPY"),
    ("AUD/USD", "AUDUSD"),
    ("USD/CHF", "USDCHF"),
    ("GOLD", "GOLD"),
    ("SILVER", "SILVER"),
    ("US500", "US500"),
    ("NAS100", "US100"),
];

/// Quote currencies that mark a pair as crypto/forex-looking for the fallback
const KNOWN_QUOTES: &[&str] = &["USD", "USDT", "EUR", "GBP", "JPY", "CHF", "AUD"];

/// Map a standard symbol to the broker's symbol
///
/// Total function: known instruments come from the explicit table, anything
/// else falls back to a deterministic rule (uppercase, separators stripped).
/// Never fails; callers should warn-log when `fallback` is set.
pub fn to_broker_symbol(standard: &str) -> MappedSymbol {
    let trimmed = standard.trim();
    let upper = trimmed.to_uppercase();

    if let Some((_, broker)) = SYMBOL_TABLE.iter().find(|(std_sym, _)| *std_sym == upper) {
        return MappedSymbol {
            symbol: (*broker).to_string(),
            fallback: false,
        };
    }

    // Deterministic fallback: strip pair separators and uppercase. Pairs
    // quoted in a known currency keep base+quote concatenation, which is
    // the broker's convention for crypto and forex epics.
    let stripped: String = upper
        .chars()
        .filter(|c| *c != '/' && *c != '-' && *c != '_' && !c.is_whitespace())
        .collect();

    let symbol = match upper.split_once('/') {
        Some((base, quote)) if KNOWN_QUOTES.contains(&quote) => {
            format!("{}{}", base, quote)
        }
        _ => stripped,
    };

    MappedSymbol {
        symbol,
        fallback: true,
    }
}

/// Whether a standard symbol has an explicit table entry
pub fn is_known_symbol(standard: &str) -> bool {
    !to_broker_symbol(standard).fallback
}
