use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single tunable parameter value.
///
/// Serialized as a bare JSON scalar. Variant order matters for untagged
/// deserialization: `3` reads back as `Int`, `3.0` as `Float`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    /// Numeric view of the value; `None` for booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(_) => None,
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool(_))
    }

    /// Build a value of the same kind as `self` from a raw number.
    ///
    /// Integers are rounded and kept at or above 1 so period-like
    /// parameters never collapse to zero.
    pub fn with_numeric(&self, value: f64) -> Self {
        match self {
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(_) => Self::Int((value.round() as i64).max(1)),
            Self::Float(_) => Self::Float(value),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Named parameter set. Ordered so serialized blobs and diffs are stable.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Build a parameter set from `(name, value)` pairs.
pub fn parameters<K, V, I>(pairs: I) -> Parameters
where
    K: Into<String>,
    V: Into<ParamValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Catalog entry describing a tunable pattern-detection algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmConfig {
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stable key used everywhere else as `algorithm_key`.
    pub english_name: String,
    pub category: String,
    pub signal_type: String,
    pub parameters: Parameters,
    pub confidence_threshold: f64,
    pub is_active: bool,
    /// Payload of the currently active version (empty until one is activated).
    #[serde(default)]
    pub code: String,
}

impl AlgorithmConfig {
    pub fn new(english_name: &str, name: &str, category: &str, signal_type: &str) -> Self {
        Self {
            id: english_name.to_string(),
            name: name.to_string(),
            english_name: english_name.to_string(),
            category: category.to_string(),
            signal_type: signal_type.to_string(),
            parameters: Parameters::new(),
            confidence_threshold: 0.5,
            is_active: true,
            code: String::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn key(&self) -> &str {
        &self.english_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_value_untagged_round_trip_keeps_kind() {
        let params = parameters([
            ("period", ParamValue::Int(14)),
            ("ratio", ParamValue::Float(2.0)),
            ("strict", ParamValue::Bool(true)),
        ]);
        let json = serde_json::to_string(&params).unwrap();
        let back: Parameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
        assert_eq!(back["ratio"], ParamValue::Float(2.0));
    }

    #[test]
    fn with_numeric_preserves_kind() {
        assert_eq!(ParamValue::Int(5).with_numeric(7.6), ParamValue::Int(8));
        assert_eq!(ParamValue::Int(5).with_numeric(0.2), ParamValue::Int(1));
        assert_eq!(ParamValue::Float(1.0).with_numeric(0.25), ParamValue::Float(0.25));
        assert_eq!(ParamValue::Bool(true).with_numeric(3.0), ParamValue::Bool(true));
    }

    #[test]
    fn config_builder() {
        let config = AlgorithmConfig::new("hammer", "Hammer", "reversal", "buy")
            .with_parameter("threshold", 0.5)
            .with_confidence_threshold(0.6);
        assert_eq!(config.key(), "hammer");
        assert_eq!(config.parameters["threshold"].as_f64(), Some(0.5));
        assert!(config.code.is_empty());
    }
}
