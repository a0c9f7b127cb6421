use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A time series attached to a node, with optional bounds used for rendering.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Metric {
    pub samples: Vec<MetricSample>,
    pub min: f64,
    pub max: f64,
}

impl Metric {
    pub fn new(samples: Vec<MetricSample>) -> Self {
        let min = samples
            .iter()
            .map(|s| s.value)
            .fold(f64::INFINITY, f64::min);
        let max = samples
            .iter()
            .map(|s| s.value)
            .fold(f64::NEG_INFINITY, f64::max);
        Self {
            min: if min.is_finite() { min } else { 0.0 },
            max: if max.is_finite() { max } else { 0.0 },
            samples,
        }
    }

    /// Overrides the upper bound, e.g. with a memory limit.
    pub fn with_max(mut self, max: f64) -> Self {
        self.max = max;
        self
    }

    pub fn last(&self) -> Option<&MetricSample> {
        self.samples.last()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Node {
    pub id: String,
    pub topology: String,
    latest: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    sets: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    parents: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metrics: BTreeMap<String, Metric>,
}

impl Node {
    pub fn new(id: impl Into<String>, topology: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topology: topology.into(),
            latest: BTreeMap::default(),
            sets: BTreeMap::default(),
            parents: BTreeMap::default(),
            metrics: BTreeMap::default(),
        }
    }

    pub fn with_latest(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.latest.insert(key.into(), value.into());
        self
    }

    /// Adds every `(key, value)` pair as `<prefix><key>`.
    pub fn with_prefixed_latests(mut self, prefix: &str, values: &HashMap<String, String>) -> Self {
        for (key, value) in values {
            self.latest.insert(format!("{prefix}{key}"), value.clone());
        }
        self
    }

    pub fn with_set<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sets
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_parent(mut self, topology: impl Into<String>, id: impl Into<String>) -> Self {
        self.parents
            .entry(topology.into())
            .or_default()
            .insert(id.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, metric: Metric) -> Self {
        self.metrics.insert(key.into(), metric);
        self
    }

    pub fn latest(&self, key: &str) -> Option<&str> {
        self.latest.get(key).map(String::as_str)
    }

    pub fn latests(&self) -> &BTreeMap<String, String> {
        &self.latest
    }

    pub fn set(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.sets.get(key)
    }

    pub fn parents(&self, topology: &str) -> Option<&BTreeSet<String>> {
        self.parents.get(topology)
    }

    pub fn metric(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    /// Combines two views of the same node. Properties and metrics from `other`
    /// win; sets and parents are unioned.
    pub fn merge(mut self, other: &Node) -> Self {
        self.latest
            .extend(other.latest.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (key, values) in &other.sets {
            self.sets
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        for (key, values) in &other.parents {
            self.parents
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        self.metrics
            .extend(other.metrics.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}
