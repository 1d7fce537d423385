//! Filters for the comparison view and the rules that fill in their defaults
//! once data starts arriving.

use serde::{Deserialize, Serialize};

use crate::client::SampleRequest;
use crate::models::{MetricName, MetricType};

pub const DEFAULT_BATCH: u64 = 0;
pub const DEFAULT_BATCH_MARGIN: u64 = 10;
pub const DEFAULT_MAX_TRIALS: u32 = 100;
pub const DEFAULT_METRIC: &str = "validation_loss";
/// Maximum number of hyperparameter columns shown by default.
pub const MAX_HPARAM_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Linear,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    #[default]
    Grid,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationFilters {
    pub batch: u64,
    pub batch_margin: u64,
    pub hparams: Vec<String>,
    pub max_trial: u32,
    pub metric: MetricName,
    pub scale: Scale,
    pub view: ViewType,
}

impl Default for VisualizationFilters {
    fn default() -> Self {
        Self {
            batch: DEFAULT_BATCH,
            batch_margin: DEFAULT_BATCH_MARGIN,
            hparams: Vec::new(),
            max_trial: DEFAULT_MAX_TRIALS,
            metric: MetricName::new(DEFAULT_METRIC, MetricType::Validation),
            scale: Scale::Linear,
            view: ViewType::Grid,
        }
    }
}

impl VisualizationFilters {
    /// Point the batch filter at the first known batch, unless the user has
    /// already moved it. Returns whether anything changed.
    pub fn apply_default_batch(&mut self, batches: &[u64]) -> bool {
        match batches.first() {
            Some(first) if self.batch == DEFAULT_BATCH && *first != self.batch => {
                self.batch = *first;
                true
            }
            _ => false,
        }
    }

    /// Restore the default metric when a stream starts delivering trials but
    /// no metric is selected.
    pub fn ensure_metric(&mut self, has_trials: bool) -> bool {
        if has_trials && self.metric.name.is_empty() {
            *self = Self::default();
            return true;
        }
        false
    }

    /// The sample request these filters select. Batch, hparams, scale and
    /// view only change rendering; any change to this key requires a new
    /// subscription.
    pub fn subscription_key(&self, experiment_ids: &[i64]) -> SampleRequest {
        SampleRequest {
            experiment_ids: experiment_ids.to_vec(),
            metric: self.metric.clone(),
            max_trials: self.max_trial,
        }
    }
}

/// Collect repeated `id=` parameters from a query string. Entries that do not
/// parse as integers are skipped.
pub fn parse_experiment_ids(query: &str) -> Vec<i64> {
    parse_id_params(query, "id")
}

/// Collect every integer value of the repeated parameter `key`.
pub fn parse_id_params(query: &str, key: &str) -> Vec<i64> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, _)| *k == key)
        .filter_map(|(_, value)| value.trim().parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let f = VisualizationFilters::default();
        assert_eq!(f.batch, 0);
        assert_eq!(f.batch_margin, 10);
        assert_eq!(f.max_trial, 100);
        assert_eq!(f.metric, MetricName::new("validation_loss", MetricType::Validation));
        assert_eq!(f.scale, Scale::Linear);
        assert_eq!(f.view, ViewType::Grid);
    }

    #[test]
    fn test_default_batch_only_when_untouched() {
        let mut f = VisualizationFilters::default();
        assert!(f.apply_default_batch(&[100, 200]));
        assert_eq!(f.batch, 100);
        assert!(!f.apply_default_batch(&[50]));
        assert_eq!(f.batch, 100);

        let mut f = VisualizationFilters::default();
        assert!(!f.apply_default_batch(&[]));
    }

    #[test]
    fn test_ensure_metric() {
        let mut f = VisualizationFilters {
            metric: MetricName::new("", MetricType::Training),
            ..Default::default()
        };
        assert!(!f.ensure_metric(false));
        assert!(f.ensure_metric(true));
        assert_eq!(f.metric.name, DEFAULT_METRIC);
    }

    #[test]
    fn test_parse_experiment_ids() {
        assert_eq!(parse_experiment_ids("?id=1&id=2&x=3&id=abc"), vec![1, 2]);
        assert_eq!(parse_experiment_ids("id=42"), vec![42]);
        assert!(parse_experiment_ids("").is_empty());
        assert_eq!(parse_id_params("trial_id=4&id=1&trial_id=5", "trial_id"), vec![4, 5]);
    }

    #[test]
    fn test_subscription_key_ignores_view_options() {
        let a = VisualizationFilters::default();
        let b = VisualizationFilters {
            scale: Scale::Log,
            batch: 30,
            ..Default::default()
        };
        assert_eq!(a.subscription_key(&[1]), b.subscription_key(&[1]));
        assert_ne!(a.subscription_key(&[1]), a.subscription_key(&[1, 2]));

        let key = VisualizationFilters {
            max_trial: 20,
            ..Default::default()
        }
        .subscription_key(&[4]);
        assert_eq!(key.experiment_ids, vec![4]);
        assert_eq!(key.max_trials, 20);
        assert_eq!(key.metric.name, DEFAULT_METRIC);
    }
}
