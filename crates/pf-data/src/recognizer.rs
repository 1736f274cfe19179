//! Pattern recognizer interface and the built-in candlestick detector.
//!
//! Detectors are configured purely through [`Parameters`]; nothing is ever
//! compiled or evaluated from the version `code` payload.

use pf_types::{
    Candle, Detection, EvaluationError, Parameters, ParamValue, PfResult, Signal, Timeseries,
};
use rust_decimal::prelude::ToPrimitive;

/// Trait for pattern recognizers (built-in detectors, plugins, remote services)
pub trait PatternRecognizer: Send + Sync + std::fmt::Debug {
    /// Check if this recognizer knows the given algorithm
    fn supports(&self, algorithm_key: &str) -> bool;

    /// Run `algorithm_key` with `parameters` over one series
    fn recognize(
        &self,
        algorithm_key: &str,
        parameters: &Parameters,
        series: &Timeseries,
    ) -> PfResult<Vec<Detection>>;

    /// Get recognizer name
    fn name(&self) -> &str;
}

/// Candlestick patterns understood by [`CandlestickRecognizer`].
pub const BUILTIN_PATTERNS: [&str; 5] = [
    "hammer",
    "shooting_star",
    "doji",
    "bullish_engulfing",
    "bearish_engulfing",
];

/// Rule-based single/dual candle pattern detector.
#[derive(Debug, Clone, Default)]
pub struct CandlestickRecognizer;

impl CandlestickRecognizer {
    pub fn new() -> Self {
        Self
    }

    fn hammer_like(
        series: &Timeseries,
        params: &Parameters,
        inverted: bool,
    ) -> PfResult<Vec<Detection>> {
        let threshold = float_param(params, "threshold", 0.5)?;
        let body_ratio = float_param(params, "body_ratio", 0.35)?.max(1e-6);
        let shadow_ratio = float_param(params, "shadow_ratio", 2.0)?.max(1e-6);
        let lookback = int_param(params, "lookback", 5)?.max(1) as usize;
        let require_trend = bool_param(params, "require_trend", true)?;

        let mut detections = Vec::new();
        for (i, candle) in series.candles.iter().enumerate() {
            let range = to_f64(candle.range());
            if range <= 0.0 {
                continue;
            }
            let body = to_f64(candle.body());
            let (long_shadow, short_shadow) = if inverted {
                (to_f64(candle.upper_shadow()), to_f64(candle.lower_shadow()))
            } else {
                (to_f64(candle.lower_shadow()), to_f64(candle.upper_shadow()))
            };

            let actual_body_ratio = body / range;
            if actual_body_ratio > body_ratio {
                continue;
            }
            if long_shadow < shadow_ratio * body.max(range * 0.01) {
                continue;
            }
            if short_shadow > long_shadow * 0.5 {
                continue;
            }

            // hammer wants a prior decline, shooting star a prior rally
            let trend = i
                .checked_sub(lookback)
                .map(|start| {
                    let prior = to_f64(series.candles[start].close);
                    let now = to_f64(candle.close);
                    if inverted {
                        now > prior
                    } else {
                        now < prior
                    }
                })
                .unwrap_or(false);
            if require_trend && !trend {
                continue;
            }

            let shadow_score = (long_shadow / (body.max(range * 0.01) * shadow_ratio * 2.0)).min(1.0);
            let body_score = 1.0 - actual_body_ratio / body_ratio;
            let trend_score = if trend { 1.0 } else { 0.3 };
            let confidence = clamp01(0.5 * shadow_score + 0.3 * body_score + 0.2 * trend_score);

            if confidence >= threshold {
                let signal = if inverted { Signal::Sell } else { Signal::Buy };
                detections.push(detection(i, candle, confidence, signal));
            }
        }
        Ok(detections)
    }

    fn doji(series: &Timeseries, params: &Parameters) -> PfResult<Vec<Detection>> {
        let threshold = float_param(params, "threshold", 0.5)?;
        let body_ratio = float_param(params, "body_ratio", 0.1)?.max(1e-6);

        let mut detections = Vec::new();
        for (i, candle) in series.candles.iter().enumerate() {
            let range = to_f64(candle.range());
            if range <= 0.0 {
                continue;
            }
            let actual = to_f64(candle.body()) / range;
            if actual > body_ratio {
                continue;
            }
            let confidence = clamp01(1.0 - 0.5 * actual / body_ratio);
            if confidence >= threshold {
                detections.push(detection(i, candle, confidence, Signal::Neutral));
            }
        }
        Ok(detections)
    }

    fn engulfing(
        series: &Timeseries,
        params: &Parameters,
        bullish: bool,
    ) -> PfResult<Vec<Detection>> {
        let threshold = float_param(params, "threshold", 0.5)?;
        let min_body_ratio = float_param(params, "min_body_ratio", 1.0)?.max(1e-6);
        let use_volume = bool_param(params, "use_volume", false)?;

        let mut detections = Vec::new();
        for (i, pair) in series.candles.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            let shape_ok = if bullish {
                prev.is_bearish()
                    && curr.is_bullish()
                    && curr.open <= prev.close
                    && curr.close >= prev.open
            } else {
                prev.is_bullish()
                    && curr.is_bearish()
                    && curr.open >= prev.close
                    && curr.close <= prev.open
            };
            if !shape_ok {
                continue;
            }

            let prev_body = to_f64(prev.body()).max(1e-9);
            let ratio = to_f64(curr.body()) / prev_body;
            if ratio < min_body_ratio {
                continue;
            }

            let mut confidence = 0.5 + 0.5 * (1.0 - min_body_ratio / ratio);
            if use_volume && curr.volume > prev.volume {
                confidence += 0.1;
            }
            let confidence = clamp01(confidence);
            if confidence >= threshold {
                let signal = if bullish { Signal::Buy } else { Signal::Sell };
                detections.push(detection(i + 1, curr, confidence, signal));
            }
        }
        Ok(detections)
    }
}

impl PatternRecognizer for CandlestickRecognizer {
    fn supports(&self, algorithm_key: &str) -> bool {
        BUILTIN_PATTERNS.contains(&algorithm_key)
    }

    fn recognize(
        &self,
        algorithm_key: &str,
        parameters: &Parameters,
        series: &Timeseries,
    ) -> PfResult<Vec<Detection>> {
        match algorithm_key {
            "hammer" => Self::hammer_like(series, parameters, false),
            "shooting_star" => Self::hammer_like(series, parameters, true),
            "doji" => Self::doji(series, parameters),
            "bullish_engulfing" => Self::engulfing(series, parameters, true),
            "bearish_engulfing" => Self::engulfing(series, parameters, false),
            other => Err(EvaluationError::UnknownAlgorithm {
                algorithm_key: other.to_string(),
            }
            .into()),
        }
    }

    fn name(&self) -> &str {
        "candlestick"
    }
}

fn detection(index: usize, candle: &Candle, confidence: f64, signal: Signal) -> Detection {
    Detection {
        index,
        timestamp: candle.timestamp,
        price: candle.close,
        confidence,
        signal,
    }
}

fn to_f64(value: rust_decimal::Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn float_param(params: &Parameters, name: &str, default: f64) -> PfResult<f64> {
    match params.get(name) {
        None => Ok(default),
        Some(ParamValue::Bool(_)) => Err(EvaluationError::InvalidParameter {
            parameter: name.to_string(),
            message: "expected a number, got a boolean".to_string(),
        }
        .into()),
        Some(value) => {
            let v = value.as_f64().unwrap_or(default);
            if v.is_finite() {
                Ok(v)
            } else {
                Err(EvaluationError::InvalidParameter {
                    parameter: name.to_string(),
                    message: format!("value {v} is not finite"),
                }
                .into())
            }
        }
    }
}

fn int_param(params: &Parameters, name: &str, default: i64) -> PfResult<i64> {
    Ok(float_param(params, name, default as f64)?.round() as i64)
}

fn bool_param(params: &Parameters, name: &str, default: bool) -> PfResult<bool> {
    match params.get(name) {
        None => Ok(default),
        Some(ParamValue::Bool(b)) => Ok(*b),
        Some(_) => Err(EvaluationError::InvalidParameter {
            parameter: name.to_string(),
            message: "expected a boolean".to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use pf_types::parameters;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(day: i64, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle::new(start + Duration::days(day), o, h, l, c, dec!(1000))
    }

    /// Five falling candles followed by a textbook hammer.
    fn downtrend_with_hammer() -> Timeseries {
        let mut candles = Vec::new();
        let mut price = dec!(110);
        for day in 0..5 {
            candles.push(candle(day, price, price + dec!(0.5), price - dec!(2.5), price - dec!(2)));
            price -= dec!(2);
        }
        // open 100, close 100.4, low 96, high 100.5
        candles.push(candle(5, dec!(100), dec!(100.5), dec!(96), dec!(100.4)));
        Timeseries::new("downtrend", candles)
    }

    #[test]
    fn hammer_detected_after_decline() {
        let recognizer = CandlestickRecognizer::new();
        let params = parameters([("threshold", 0.5)]);
        let detections = recognizer
            .recognize("hammer", &params, &downtrend_with_hammer())
            .unwrap();

        let last = detections.last().expect("hammer expected");
        assert_eq!(last.index, 5);
        assert_eq!(last.signal, Signal::Buy);
        assert!(last.confidence >= 0.5 && last.confidence <= 1.0);
    }

    #[test]
    fn threshold_filters_detections() {
        let recognizer = CandlestickRecognizer::new();
        let loose = recognizer
            .recognize("hammer", &parameters([("threshold", 0.0)]), &downtrend_with_hammer())
            .unwrap();
        let strict = recognizer
            .recognize("hammer", &parameters([("threshold", 1.01)]), &downtrend_with_hammer())
            .unwrap();
        assert!(!loose.is_empty());
        assert!(strict.is_empty());
    }

    #[test]
    fn bullish_engulfing_detected() {
        let series = Timeseries::new(
            "engulf",
            vec![
                candle(0, dec!(101), dec!(101.5), dec!(99.5), dec!(100)),
                candle(1, dec!(99.8), dec!(102.5), dec!(99.5), dec!(102)),
            ],
        );
        let detections = CandlestickRecognizer::new()
            .recognize("bullish_engulfing", &Parameters::new(), &series)
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].index, 1);
        assert_eq!(detections[0].signal, Signal::Buy);
    }

    #[test]
    fn doji_is_neutral() {
        let series = Timeseries::new(
            "doji",
            vec![candle(0, dec!(100), dec!(102), dec!(98), dec!(100.1))],
        );
        let detections = CandlestickRecognizer::new()
            .recognize("doji", &Parameters::new(), &series)
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].signal, Signal::Neutral);
    }

    #[test]
    fn unknown_algorithm_is_an_error() {
        let recognizer = CandlestickRecognizer::new();
        assert!(!recognizer.supports("head_and_shoulders"));
        let err = recognizer
            .recognize("head_and_shoulders", &Parameters::new(), &downtrend_with_hammer())
            .unwrap_err();
        assert!(err.to_string().contains("head_and_shoulders"));
    }

    #[test]
    fn wrong_parameter_type_is_rejected() {
        let params = parameters([("threshold", ParamValue::Bool(true))]);
        let result = CandlestickRecognizer::new().recognize("hammer", &params, &downtrend_with_hammer());
        assert!(result.is_err());
    }
}
