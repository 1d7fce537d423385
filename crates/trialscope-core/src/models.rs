//! Data models for trialscope: wire types from the master plus the
//! primitives the aggregators hand to chart and table renderers.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ScopeError;

// ─── Trial samples ───────────────────────────────────────────────────────────

/// One batch pushed by the trials-sample stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialsSampleEvent {
    #[serde(default)]
    pub trials: Vec<TrialSample>,
    /// Trials newly reported as active.
    #[serde(default)]
    pub promoted_trials: Vec<i64>,
    /// Trials dropped from the sample. Currently not acted upon.
    #[serde(default)]
    pub demoted_trials: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSample {
    pub trial_id: i64,
    pub experiment_id: i64,
    /// Raw (possibly nested) hyperparameters as reported by the master.
    #[serde(default)]
    pub hparams: serde_json::Value,
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

/// A metric value recorded at a batch index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub batches: u64,
    #[serde(default = "no_value", deserialize_with = "de_metric_value")]
    pub value: f64,
}

fn no_value() -> f64 {
    f64::NAN
}

/// Metric values arrive as JSON numbers, or as the strings `"NaN"`,
/// `"Infinity"` and `"-Infinity"` for non-finite floats. `null` decodes to NaN.
fn de_metric_value<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
        Null(()),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(v) => Ok(v),
        Raw::Null(()) => Ok(f64::NAN),
        Raw::Text(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other.parse::<f64>().map_err(serde::de::Error::custom),
        },
    }
}

// ─── Hyperparameters ─────────────────────────────────────────────────────────

/// A flattened hyperparameter value.
///
/// `Missing` is the sentinel added to a value set when some active trial does
/// not define the hyperparameter; it renders as `"-"`.
#[derive(Debug, Clone)]
pub enum HpValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Missing,
}

pub const MISSING_MARKER: &str = "-";

impl HpValue {
    /// Convert a JSON leaf. Integral floats collapse to `Int` so that `1` and
    /// `1.0` count as one distinct value, and a literal `"-"` is the missing
    /// marker so it never appears twice in a value set.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => HpValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HpValue::Int(i)
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        HpValue::Int(f as i64)
                    } else {
                        HpValue::Float(f)
                    }
                }
            }
            serde_json::Value::String(s) if s == MISSING_MARKER => HpValue::Missing,
            serde_json::Value::String(s) => HpValue::Text(s.clone()),
            other => HpValue::Text(other.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, HpValue::Missing)
    }

    fn rank(&self) -> u8 {
        match self {
            HpValue::Bool(_) => 0,
            HpValue::Int(_) | HpValue::Float(_) => 1,
            HpValue::Text(_) => 2,
            HpValue::Missing => 3,
        }
    }
}

impl PartialEq for HpValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HpValue {}

impl PartialOrd for HpValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Booleans, then numbers by value, then strings, then the missing marker.
impl Ord for HpValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (HpValue::Bool(a), HpValue::Bool(b)) => a.cmp(b),
            (HpValue::Int(a), HpValue::Int(b)) => a.cmp(b),
            (HpValue::Int(a), HpValue::Float(b)) => (*a as f64).total_cmp(b),
            (HpValue::Float(a), HpValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (HpValue::Float(a), HpValue::Float(b)) => a.total_cmp(b),
            (HpValue::Text(a), HpValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for HpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HpValue::Bool(b) => write!(f, "{}", b),
            HpValue::Int(i) => write!(f, "{}", i),
            HpValue::Float(v) => write!(f, "{}", v),
            HpValue::Text(s) => write!(f, "{}", s),
            HpValue::Missing => f.write_str(MISSING_MARKER),
        }
    }
}

impl Serialize for HpValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HpValue::Bool(b) => serializer.serialize_bool(*b),
            HpValue::Int(i) => serializer.serialize_i64(*i),
            HpValue::Float(v) => serializer.serialize_f64(*v),
            HpValue::Text(s) => serializer.serialize_str(s),
            HpValue::Missing => serializer.serialize_str(MISSING_MARKER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HyperparameterType {
    /// Every observed hyperparameter is treated as constant: constant values
    /// may still differ across the compared experiments.
    #[serde(rename = "const")]
    Constant,
}

/// Table row for a trial that reported hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialHParams {
    pub id: i64,
    pub experiment_id: i64,
    pub hparams: BTreeMap<String, HpValue>,
    /// Latest finite metric value seen for the trial.
    pub metric: Option<f64>,
}

// ─── Metric names ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Training,
    Validation,
}

impl MetricType {
    /// Enum value expected by the master's query parameters.
    pub fn as_api_param(&self) -> &'static str {
        match self {
            MetricType::Training => "METRIC_TYPE_TRAINING",
            MetricType::Validation => "METRIC_TYPE_VALIDATION",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Training => write!(f, "training"),
            MetricType::Validation => write!(f, "validation"),
        }
    }
}

impl FromStr for MetricType {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "training" | "metric_type_training" => Ok(MetricType::Training),
            "validation" | "metric_type_validation" => Ok(MetricType::Validation),
            other => Err(ScopeError::Other(format!("Unknown metric type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricName {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
}

impl MetricName {
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            metric_type,
        }
    }
}

/// One batch pushed by the trials metric-names stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricNamesEvent {
    #[serde(default)]
    pub training_metrics: Vec<String>,
    #[serde(default)]
    pub validation_metrics: Vec<String>,
    #[serde(default)]
    pub searcher_metric: Option<String>,
}

// ─── Experiments ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    #[serde(rename = "STATE_ACTIVE")]
    Active,
    #[serde(rename = "STATE_PAUSED")]
    Paused,
    #[serde(rename = "STATE_STOPPING_CANCELED")]
    StoppingCanceled,
    #[serde(rename = "STATE_STOPPING_COMPLETED")]
    StoppingCompleted,
    #[serde(rename = "STATE_STOPPING_ERROR")]
    StoppingError,
    #[serde(rename = "STATE_CANCELED")]
    Canceled,
    #[serde(rename = "STATE_COMPLETED")]
    Completed,
    #[serde(rename = "STATE_ERROR")]
    Error,
    #[serde(rename = "STATE_DELETING")]
    Deleting,
    #[serde(rename = "STATE_DELETED")]
    Deleted,
    #[serde(rename = "STATE_UNSPECIFIED")]
    Unspecified,
}

impl ExperimentState {
    /// States after which the experiment never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentState::Canceled
                | ExperimentState::Completed
                | ExperimentState::Error
                | ExperimentState::Deleted
        )
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExperimentState::Active => "ACTIVE",
            ExperimentState::Paused => "PAUSED",
            ExperimentState::StoppingCanceled => "STOPPING_CANCELED",
            ExperimentState::StoppingCompleted => "STOPPING_COMPLETED",
            ExperimentState::StoppingError => "STOPPING_ERROR",
            ExperimentState::Canceled => "CANCELED",
            ExperimentState::Completed => "COMPLETED",
            ExperimentState::Error => "ERROR",
            ExperimentState::Deleting => "DELETING",
            ExperimentState::Deleted => "DELETED",
            ExperimentState::Unspecified => "UNSPECIFIED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSummary {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub state: ExperimentState,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

/// Body of `GET /api/v1/experiments/:id`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetExperimentResponse {
    pub experiment: ExperimentSummary,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl GetExperimentResponse {
    pub fn searcher_name(&self) -> Option<&str> {
        self.config.pointer("/searcher/name").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationHistory {
    pub trial_id: i64,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub searcher_metric: Option<f64>,
}

/// Everything the experiment details view renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDetails {
    pub experiment: ExperimentSummary,
    pub searcher: Option<String>,
    pub validation_history: Vec<ValidationHistory>,
}

impl ExperimentDetails {
    /// Single-trial experiments get the per-trial layout instead of the
    /// multi-trial tabs.
    pub fn is_single_trial(&self) -> bool {
        self.searcher.as_deref() == Some("single")
    }
}

// ─── Model registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub num_versions: u32,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub last_updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<ModelItem>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// Editable model fields. Fields left as `None` are not sent and stay
/// unchanged on the master.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl ModelPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.labels.is_none()
    }
}

/// The user the master authenticated the request as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_point_decodes_non_finite_strings() {
        let points: Vec<DataPoint> = serde_json::from_value(json!([
            {"batches": 0, "value": 0.5},
            {"batches": 1, "value": "NaN"},
            {"batches": 2, "value": "-Infinity"},
            {"batches": 3, "value": null},
            {"batches": 4},
        ]))
        .unwrap();
        assert_eq!(points[0].value, 0.5);
        assert!(points[1].value.is_nan());
        assert_eq!(points[2].value, f64::NEG_INFINITY);
        assert!(points[3].value.is_nan());
        assert!(points[4].value.is_nan());
    }

    #[test]
    fn test_sample_event_defaults_missing_lists() {
        let event: TrialsSampleEvent = serde_json::from_str("{}").unwrap();
        assert!(event.trials.is_empty());
        assert!(event.promoted_trials.is_empty());
    }

    #[test]
    fn test_hp_value_integral_float_is_int() {
        assert_eq!(HpValue::from_json(&json!(1.0)), HpValue::Int(1));
        assert_eq!(HpValue::from_json(&json!(1)), HpValue::Int(1));
        assert_eq!(HpValue::from_json(&json!(0.1)), HpValue::Float(0.1));
    }

    #[test]
    fn test_hp_value_order_puts_missing_last() {
        let mut vals = vec![
            HpValue::Missing,
            HpValue::Text("adam".into()),
            HpValue::Float(0.5),
            HpValue::Int(2),
            HpValue::Bool(true),
        ];
        vals.sort();
        assert_eq!(vals[0], HpValue::Bool(true));
        assert_eq!(vals[1], HpValue::Float(0.5));
        assert_eq!(vals[2], HpValue::Int(2));
        assert!(vals[4].is_missing());
    }

    #[test]
    fn test_dash_string_is_missing() {
        assert!(HpValue::from_json(&json!("-")).is_missing());
        assert_eq!(HpValue::from_json(&json!("--")), HpValue::Text("--".into()));
    }

    #[test]
    fn test_model_patch_sends_only_set_fields() {
        let patch = ModelPatch {
            labels: Some(vec!["prod".into()]),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"labels": ["prod"]}));
        assert!(!patch.is_empty());
        assert!(ModelPatch::default().is_empty());
    }

    #[test]
    fn test_missing_serializes_as_dash() {
        assert_eq!(serde_json::to_value(HpValue::Missing).unwrap(), json!("-"));
    }

    #[test]
    fn test_experiment_state_terminal() {
        let state: ExperimentState = serde_json::from_value(json!("STATE_COMPLETED")).unwrap();
        assert!(state.is_terminal());
        let state: ExperimentState = serde_json::from_value(json!("STATE_ACTIVE")).unwrap();
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_metric_type_parse() {
        assert_eq!("validation".parse::<MetricType>().unwrap(), MetricType::Validation);
        assert_eq!("METRIC_TYPE_TRAINING".parse::<MetricType>().unwrap(), MetricType::Training);
        assert!("bogus".parse::<MetricType>().is_err());
    }
}
