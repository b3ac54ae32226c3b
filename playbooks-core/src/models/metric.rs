use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::patch::Patch;
use crate::error::PlaybookError;

/// Opaque, immutable metric identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(String);

impl MetricId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MetricId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MetricId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    #[serde(rename = "metric_duration")]
    Duration,
    #[serde(rename = "metric_currency")]
    Currency,
    #[serde(rename = "metric_integer")]
    Integer,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Duration => "metric_duration",
            MetricType::Currency => "metric_currency",
            MetricType::Integer => "metric_integer",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = PlaybookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "metric_duration" | "duration" => Ok(MetricType::Duration),
            "metric_currency" | "currency" => Ok(MetricType::Currency),
            "metric_integer" | "integer" => Ok(MetricType::Integer),
            other => Err(PlaybookError::InvalidMetricType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Durations are in milliseconds, currency in minor units.
    pub target: Option<i64>,
}

impl Metric {
    pub fn new(title: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            id: MetricId::generate(),
            title: title.into(),
            description: String::new(),
            metric_type,
            target: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<MetricId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_target(mut self, target: i64) -> Self {
        self.target = Some(target);
        self
    }
}

/// Input for adding a metric. `metric_type` is raw so that unknown values can
/// be reported as [`PlaybookError::InvalidMetricType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMetric {
    /// Client-chosen identity; makes retries of the same add idempotent.
    #[serde(default)]
    pub id: Option<MetricId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(default)]
    pub target: Option<i64>,
}

impl NewMetric {
    pub fn new(title: impl Into<String>, metric_type: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            metric_type: metric_type.into(),
            target: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<MetricId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_target(mut self, target: i64) -> Self {
        self.target = Some(target);
        self
    }
}

/// Sparse update for an existing metric. Type and identity are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricUpdate {
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub title: Patch<String>,

    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub description: Patch<String>,

    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub target: Patch<i64>,
}

impl MetricUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_keep() && self.description.is_keep() && self.target.is_keep()
    }

    /// Writes the requested fields onto `metric`; returns whether anything changed.
    pub fn apply_to(&self, metric: &mut Metric) -> bool {
        let title = match &self.title {
            Patch::Set(title) => title.trim().to_string(),
            _ => self.title.proposed(&metric.title),
        };
        let description = self.description.proposed(&metric.description);
        let target = self.target.proposed_option(&metric.target);

        let changed =
            title != metric.title || description != metric.description || target != metric.target;

        metric.title = title;
        metric.description = description;
        metric.target = target;
        changed
    }
}
