//! Side-by-side comparison of two stored versions.

use pf_types::{AlgorithmVersion, ParamValue, PerformanceMetrics, PfResult, StoreError, VersionId};
use serde::{Deserialize, Serialize};

use crate::store::VersionStore;

/// One line of a code diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "line", rename_all = "lowercase")]
pub enum DiffLine {
    Unchanged(String),
    Added(String),
    Removed(String),
}

/// How a single parameter differs between two versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParameterChange {
    Added { name: String, value: ParamValue },
    Removed { name: String, value: ParamValue },
    Changed { name: String, before: ParamValue, after: ParamValue },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: String,
    pub before: f64,
    pub after: f64,
    /// `None` when `before` is zero
    pub change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub version_a: AlgorithmVersion,
    pub version_b: AlgorithmVersion,
    pub code_diff: Vec<DiffLine>,
    /// 2 * matching lines / total lines, 1.0 for two empty payloads
    pub similarity: f64,
    pub parameter_changes: Vec<ParameterChange>,
    /// Empty unless both versions have recorded metrics
    pub metric_deltas: Vec<MetricDelta>,
}

impl VersionComparison {
    pub fn identical_code(&self) -> bool {
        self.code_diff
            .iter()
            .all(|line| matches!(line, DiffLine::Unchanged(_)))
    }

    /// Render as a unified-style text diff
    pub fn render_diff(&self) -> String {
        let mut out = format!(
            "--- {} v{}\n+++ {} v{}\n",
            self.version_a.algorithm_key,
            self.version_a.version_number,
            self.version_b.algorithm_key,
            self.version_b.version_number
        );
        for line in &self.code_diff {
            let (prefix, text) = match line {
                DiffLine::Unchanged(t) => (' ', t),
                DiffLine::Added(t) => ('+', t),
                DiffLine::Removed(t) => ('-', t),
            };
            out.push(prefix);
            out.push_str(text);
            out.push('\n');
        }
        out
    }
}

impl VersionStore {
    /// Compare two versions' code, parameters and latest metrics.
    pub fn compare_versions(&self, a: VersionId, b: VersionId) -> PfResult<VersionComparison> {
        let version_a = self
            .get_version(a)?
            .ok_or(StoreError::VersionNotFound { version_id: a })?;
        let version_b = self
            .get_version(b)?
            .ok_or(StoreError::VersionNotFound { version_id: b })?;

        let (code_diff, similarity) = diff_lines(&version_a.code, &version_b.code);
        let parameter_changes = parameter_changes(&version_a, &version_b);

        let metric_deltas = match (self.latest_metrics(a)?, self.latest_metrics(b)?) {
            (Some(before), Some(after)) => metric_deltas(&before, &after),
            _ => Vec::new(),
        };

        Ok(VersionComparison {
            version_a,
            version_b,
            code_diff,
            similarity,
            parameter_changes,
            metric_deltas,
        })
    }
}

/// Line diff via longest common subsequence.
pub fn diff_lines(before: &str, after: &str) -> (Vec<DiffLine>, f64) {
    let a: Vec<&str> = before.lines().collect();
    let b: Vec<&str> = after.lines().collect();
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut diff = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            diff.push(DiffLine::Unchanged(a[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            diff.push(DiffLine::Removed(a[i].to_string()));
            i += 1;
        } else {
            diff.push(DiffLine::Added(b[j].to_string()));
            j += 1;
        }
    }
    diff.extend(a[i..].iter().map(|l| DiffLine::Removed(l.to_string())));
    diff.extend(b[j..].iter().map(|l| DiffLine::Added(l.to_string())));

    let similarity = if n + m == 0 {
        1.0
    } else {
        2.0 * lcs[0][0] as f64 / (n + m) as f64
    };
    (diff, similarity)
}

fn parameter_changes(a: &AlgorithmVersion, b: &AlgorithmVersion) -> Vec<ParameterChange> {
    let mut changes = Vec::new();
    for (name, before) in &a.parameters {
        match b.parameters.get(name) {
            None => changes.push(ParameterChange::Removed {
                name: name.clone(),
                value: *before,
            }),
            Some(after) if after != before => changes.push(ParameterChange::Changed {
                name: name.clone(),
                before: *before,
                after: *after,
            }),
            Some(_) => {}
        }
    }
    for (name, value) in &b.parameters {
        if !a.parameters.contains_key(name) {
            changes.push(ParameterChange::Added {
                name: name.clone(),
                value: *value,
            });
        }
    }
    changes
}

fn metric_deltas(before: &PerformanceMetrics, after: &PerformanceMetrics) -> Vec<MetricDelta> {
    before
        .entries()
        .into_iter()
        .zip(after.entries())
        .map(|((metric, b), (_, a))| MetricDelta {
            metric: metric.to_string(),
            before: b,
            after: a,
            change_pct: (b != 0.0).then(|| (a - b) / b.abs() * 100.0),
        })
        .collect()
}
