//! Metric-names aggregator.
//!
//! The metric-names stream can intermittently send empty lists, so every
//! name ever seen is remembered and the output only grows.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::{MetricName, MetricNamesEvent, MetricType};
use crate::sort::alpha_numeric_cmp;

/// Published snapshot: ordered metric names plus the searcher metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricNamesView {
    pub metrics: Vec<MetricName>,
    pub searcher_metric: Option<MetricName>,
}

#[derive(Debug, Default)]
pub struct MetricNamesAggregator {
    training: HashSet<String>,
    validation: HashSet<String>,
    searcher_metric: Option<String>,
}

impl MetricNamesAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an event and return validation metrics followed by training
    /// metrics, each alphanumerically sorted.
    pub fn ingest(&mut self, event: &MetricNamesEvent) -> Vec<MetricName> {
        self.training.extend(event.training_metrics.iter().cloned());
        self.validation.extend(event.validation_metrics.iter().cloned());
        if let Some(name) = event.searcher_metric.as_ref().filter(|n| !n.is_empty()) {
            self.searcher_metric = Some(name.clone());
        }
        self.metrics()
    }

    pub fn metrics(&self) -> Vec<MetricName> {
        let mut out = sorted(&self.validation, MetricType::Validation);
        out.extend(sorted(&self.training, MetricType::Training));
        out
    }

    /// Searcher metric reported by the master, typed as validation.
    pub fn searcher_metric(&self) -> Option<MetricName> {
        self.searcher_metric
            .as_ref()
            .map(|name| MetricName::new(name.clone(), MetricType::Validation))
    }

    pub fn view(&self) -> MetricNamesView {
        MetricNamesView {
            metrics: self.metrics(),
            searcher_metric: self.searcher_metric(),
        }
    }
}

fn sorted(names: &HashSet<String>, metric_type: MetricType) -> Vec<MetricName> {
    let mut names: Vec<&String> = names.iter().collect();
    names.sort_by(|a, b| alpha_numeric_cmp(a, b));
    names
        .into_iter()
        .map(|name| MetricName::new(name.clone(), metric_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_event(training: &[&str], validation: &[&str]) -> MetricNamesEvent {
        MetricNamesEvent {
            training_metrics: training.iter().map(|s| s.to_string()).collect(),
            validation_metrics: validation.iter().map(|s| s.to_string()).collect(),
            searcher_metric: None,
        }
    }

    #[test]
    fn test_validation_first_then_training() {
        let mut agg = MetricNamesAggregator::new();
        let metrics = agg.ingest(&names_event(&["loss", "acc"], &["validation_loss"]));
        assert_eq!(
            metrics,
            vec![
                MetricName::new("validation_loss", MetricType::Validation),
                MetricName::new("acc", MetricType::Training),
                MetricName::new("loss", MetricType::Training),
            ]
        );
    }

    #[test]
    fn test_empty_event_keeps_seen_names() {
        let mut agg = MetricNamesAggregator::new();
        agg.ingest(&names_event(&["loss"], &["val_loss"]));
        let metrics = agg.ingest(&MetricNamesEvent::default());
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn test_same_name_in_both_types() {
        let mut agg = MetricNamesAggregator::new();
        let metrics = agg.ingest(&names_event(&["loss"], &["loss"]));
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].metric_type, MetricType::Validation);
    }

    #[test]
    fn test_searcher_metric_sticks() {
        let mut agg = MetricNamesAggregator::new();
        agg.ingest(&MetricNamesEvent {
            searcher_metric: Some("validation_error".into()),
            ..Default::default()
        });
        agg.ingest(&MetricNamesEvent {
            searcher_metric: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(agg.searcher_metric().unwrap().name, "validation_error");
    }

    #[test]
    fn test_view_carries_searcher_metric() {
        let mut agg = MetricNamesAggregator::new();
        agg.ingest(&MetricNamesEvent {
            validation_metrics: vec!["validation_error".into()],
            searcher_metric: Some("validation_error".into()),
            ..Default::default()
        });
        let view = agg.view();
        assert_eq!(view.metrics.len(), 1);
        assert_eq!(view.searcher_metric.as_ref(), Some(&view.metrics[0]));
        assert_eq!(
            serde_json::to_value(&view).unwrap()["searcherMetric"]["type"],
            "validation"
        );
    }
}
