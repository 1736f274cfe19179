use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Full high-low range
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Absolute size of the real body
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn upper_shadow(&self) -> Decimal {
        self.high - self.open.max(self.close)
    }

    pub fn lower_shadow(&self) -> Decimal {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Ordered series of candles for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeseries {
    pub label: String,
    pub candles: Vec<Candle>,
}

impl Timeseries {
    pub fn new(label: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            label: label.into(),
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// Direction implied by a detected pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Neutral,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Buy => "buy",
            Signal::Sell => "sell",
            Signal::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

/// One pattern occurrence reported by a recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub signal: Signal,
}
