//! Test dataset providers.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use csv::ReaderBuilder;
use pf_types::{Candle, EvaluationError, PfResult, Timeseries};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Trait for test data providers (synthetic generators, CSV archives, APIs)
pub trait DatasetProvider: Send + Sync + std::fmt::Debug {
    /// Produce `count` series suitable for evaluating `algorithm_key`
    fn create_test_datasets(&self, algorithm_key: &str, count: usize) -> PfResult<Vec<Timeseries>>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Seeded random-walk OHLCV generator.
///
/// The same `(seed, algorithm_key, index)` always yields the same series, so
/// candidate scores are comparable across runs.
#[derive(Debug, Clone)]
pub struct SyntheticDatasetProvider {
    pub seed: u64,
    pub length: usize,
    pub start_price: f64,
    /// Daily return standard deviation
    pub volatility: f64,
}

impl Default for SyntheticDatasetProvider {
    fn default() -> Self {
        Self {
            seed: 42,
            length: 250,
            start_price: 100.0,
            volatility: 0.02,
        }
    }
}

impl SyntheticDatasetProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    fn series_seed(&self, algorithm_key: &str, index: usize) -> u64 {
        // FNV-1a keeps the stream stable across platforms and toolchains
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in algorithm_key.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        self.seed ^ hash ^ (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }

    fn generate(&self, algorithm_key: &str, index: usize) -> PfResult<Timeseries> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.series_seed(algorithm_key, index));
        let returns = Normal::new(0.0, self.volatility.max(1e-6)).map_err(|e| {
            EvaluationError::DatasetUnavailable {
                message: e.to_string(),
            }
        })?;

        // 2024-01-01T00:00:00Z
        let start = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default();
        let mut candles = Vec::with_capacity(self.length);
        let mut price = self.start_price;

        for day in 0..self.length {
            let open = price;
            let close = (open * (1.0 + returns.sample(&mut rng))).max(0.01);
            let body_top = open.max(close);
            let body_bottom = open.min(close);
            let wick = open * self.volatility;
            let high = body_top + wick * rng.gen_range(0.0..1.5);
            let low = (body_bottom - wick * rng.gen_range(0.0..1.5)).max(0.005);
            let volume = rng.gen_range(100_000.0..1_500_000.0_f64);

            candles.push(Candle::new(
                start + Duration::days(day as i64),
                to_decimal(open),
                to_decimal(high),
                to_decimal(low),
                to_decimal(close),
                to_decimal(volume.round()),
            ));
            price = close;
        }

        Ok(Timeseries::new(format!("synthetic:{algorithm_key}:{index}"), candles))
    }
}

impl DatasetProvider for SyntheticDatasetProvider {
    fn create_test_datasets(&self, algorithm_key: &str, count: usize) -> PfResult<Vec<Timeseries>> {
        debug!(algorithm = algorithm_key, count, "generating synthetic datasets");
        (0..count).map(|i| self.generate(algorithm_key, i)).collect()
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default().round_dp(4)
}

/// Historical OHLCV loaded from CSV files in a directory.
///
/// Every `*.csv` file is one series; files are served in name order.
#[derive(Debug, Clone)]
pub struct CsvDatasetProvider {
    pub data_directory: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "Date", alias = "date", alias = "Timestamp")]
    timestamp: String,
    #[serde(alias = "Open")]
    open: f64,
    #[serde(alias = "High")]
    high: f64,
    #[serde(alias = "Low")]
    low: f64,
    #[serde(alias = "Close")]
    close: f64,
    #[serde(alias = "Volume")]
    volume: f64,
}

impl CsvDatasetProvider {
    pub fn new<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            data_directory: data_directory.as_ref().to_path_buf(),
        }
    }

    fn csv_files(&self) -> PfResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.data_directory)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("csv") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load a single CSV file into a series
    pub fn load_file(path: &Path) -> PfResult<Timeseries> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| EvaluationError::DatasetUnavailable {
                message: format!("{}: {}", path.display(), e),
            })?;

        let mut candles = Vec::new();
        for (line, record) in reader.deserialize::<CsvRecord>().enumerate() {
            let record = record.map_err(|e| EvaluationError::DatasetUnavailable {
                message: format!("{} row {}: {}", path.display(), line + 1, e),
            })?;
            let timestamp = parse_timestamp(&record.timestamp).ok_or_else(|| {
                EvaluationError::DatasetUnavailable {
                    message: format!("{} row {}: bad timestamp {}", path.display(), line + 1, record.timestamp),
                }
            })?;
            candles.push(Candle::new(
                timestamp,
                to_decimal(record.open),
                to_decimal(record.high),
                to_decimal(record.low),
                to_decimal(record.close),
                to_decimal(record.volume),
            ));
        }
        candles.sort_by_key(|c| c.timestamp);

        let label = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("csv")
            .to_string();
        Ok(Timeseries::new(label, candles))
    }
}

impl DatasetProvider for CsvDatasetProvider {
    fn create_test_datasets(&self, algorithm_key: &str, count: usize) -> PfResult<Vec<Timeseries>> {
        let files = self.csv_files()?;
        if files.is_empty() {
            warn!(dir = %self.data_directory.display(), "no CSV files found");
        }

        let mut series = Vec::new();
        for path in files.into_iter().take(count) {
            match Self::load_file(&path) {
                Ok(ts) => series.push(ts),
                Err(e) => warn!(algorithm = algorithm_key, "skipping {}: {}", path.display(), e),
            }
        }
        Ok(series)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn synthetic_data_is_reproducible() {
        let provider = SyntheticDatasetProvider::new(7).with_length(50);
        let a = provider.create_test_datasets("hammer", 3).unwrap();
        let b = provider.create_test_datasets("hammer", 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|ts| ts.len() == 50));
        assert_ne!(a[0].candles, a[1].candles);
    }

    #[test]
    fn synthetic_candles_are_well_formed() {
        let provider = SyntheticDatasetProvider::default();
        let series = provider.create_test_datasets("doji", 1).unwrap();
        for candle in &series[0].candles {
            assert!(candle.high >= candle.open.max(candle.close));
            assert!(candle.low <= candle.open.min(candle.close));
            assert!(candle.low > Decimal::ZERO);
        }
    }

    #[test]
    fn different_keys_get_different_series() {
        let provider = SyntheticDatasetProvider::new(1).with_length(20);
        let a = provider.create_test_datasets("hammer", 1).unwrap();
        let b = provider.create_test_datasets("doji", 1).unwrap();
        assert_ne!(a[0].candles, b[0].candles);
    }

    #[test]
    fn csv_provider_loads_files_in_order() {
        let dir = tempdir().unwrap();
        for (name, close) in [("b.csv", "11"), ("a.csv", "10")] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
            writeln!(file, "2024-01-02,10,12,9,{close},1000").unwrap();
            writeln!(file, "2024-01-01,9,11,8,10,900").unwrap();
        }

        let provider = CsvDatasetProvider::new(dir.path());
        let series = provider.create_test_datasets("hammer", 5).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "a");
        assert_eq!(series[0].len(), 2);
        assert!(series[0].candles[0].timestamp < series[0].candles[1].timestamp);
    }

    #[test]
    fn csv_provider_respects_count() {
        let dir = tempdir().unwrap();
        for name in ["a.csv", "b.csv", "c.csv"] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
            writeln!(file, "2024-01-01T00:00:00Z,1,2,0.5,1.5,10").unwrap();
        }
        let series = CsvDatasetProvider::new(dir.path())
            .create_test_datasets("doji", 2)
            .unwrap();
        assert_eq!(series.len(), 2);
    }
}
