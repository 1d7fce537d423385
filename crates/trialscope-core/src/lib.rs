//! trialscope-core: streaming comparison views for an experiment tracking master.
//!
//! The master pushes trial samples and metric names as line-delimited JSON.
//! A [`Subscription`] owns one ingestion task at a time; each task folds its
//! stream into an aggregator and publishes immutable snapshots through a
//! watch channel. Replacing a subscription cancels the previous task first.

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod filters;
pub mod flatten;
pub mod metric_names;
pub mod models;
pub mod polling;
pub mod registry;
pub mod sort;
pub mod stream;
pub mod subscription;

pub use aggregate::{SampleAggregator, SampleView};
pub use client::{MasterClient, MasterSource};
pub use config::ScopeConfig;
pub use error::ScopeError;
pub use filters::VisualizationFilters;
pub use metric_names::{MetricNamesAggregator, MetricNamesView};
pub use models::{HpValue, MetricName, MetricType, TrialsSampleEvent};
pub use subscription::{CompareSession, Subscription, SubscriptionState};
