//! Stream aggregator: folds trials-sample events into chart and table views.
//!
//! Every event is merged into lookup maps (membership, per-trial per-batch
//! values, per-trial hyperparameter rows, per-hyperparameter value sets) and
//! the output arrays are then re-derived from those maps. Row order follows
//! the order in which trials were first promoted; columns are the ascending
//! union of every batch index seen so far.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::trace;

use crate::flatten::flatten_hparams;
use crate::models::{HpValue, HyperparameterType, TrialHParams, TrialsSampleEvent};

/// Distinct values observed per hyperparameter.
pub type HpValsMap = BTreeMap<String, BTreeSet<HpValue>>;

/// Snapshot handed to renderers after each event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleView {
    /// Active trials in first-seen order.
    pub trial_ids: Vec<i64>,
    /// Sorted batch indices; the columns of `chart_data`.
    pub batches: Vec<u64>,
    /// One row per entry of `trial_ids`; `None` means no finite value.
    pub chart_data: Vec<Vec<Option<f64>>>,
    pub hp_vals: HpValsMap,
    /// Hyperparameter rows aligned with `trial_ids`. `None` for trials that
    /// never reported hyperparameters.
    pub trial_hps: Vec<Option<TrialHParams>>,
    pub hyperparameters: BTreeMap<String, HyperparameterType>,
    /// Number of non-empty events folded into this view.
    pub events: u64,
}

impl SampleView {
    pub fn is_empty(&self) -> bool {
        self.trial_ids.is_empty() && self.batches.is_empty()
    }

    /// Matrix row for a trial, if it is active.
    pub fn row(&self, trial_id: i64) -> Option<&[Option<f64>]> {
        self.trial_ids
            .iter()
            .position(|id| *id == trial_id)
            .map(|idx| self.chart_data[idx].as_slice())
    }
}

/// Owned aggregation state for one subscription.
#[derive(Debug, Default)]
pub struct SampleAggregator {
    trial_ids: Vec<i64>,
    active: HashSet<i64>,
    values: HashMap<i64, BTreeMap<u64, f64>>,
    batches: BTreeSet<u64>,
    trial_hps: HashMap<i64, TrialHParams>,
    hp_vals: HpValsMap,
    hyperparameters: BTreeMap<String, HyperparameterType>,
    events: u64,
    view: SampleView,
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event and return the re-derived view.
    ///
    /// Events without trial records leave every output untouched.
    pub fn ingest(&mut self, event: &TrialsSampleEvent) -> &SampleView {
        if event.trials.is_empty() {
            return &self.view;
        }
        self.events += 1;

        for id in &event.promoted_trials {
            if self.active.insert(*id) {
                self.trial_ids.push(*id);
            }
        }

        for trial in &event.trials {
            let id = trial.trial_id;
            let flat = flatten_hparams(&trial.hparams);

            for (name, value) in &flat {
                self.hyperparameters
                    .insert(name.clone(), HyperparameterType::Constant);
                self.hp_vals
                    .entry(name.clone())
                    .or_default()
                    .insert(value.clone());
            }

            if !flat.is_empty() {
                self.trial_hps.entry(id).or_insert_with(|| TrialHParams {
                    id,
                    experiment_id: trial.experiment_id,
                    hparams: flat,
                    metric: None,
                });
            }

            let series = self.values.entry(id).or_default();
            for point in &trial.data {
                self.batches.insert(point.batches);
                series.insert(point.batches, point.value);
                if let Some(row) = self.trial_hps.get_mut(&id) {
                    row.metric = finite(point.value);
                }
            }
        }

        self.mark_missing();
        self.derive();

        trace!(
            trials = self.view.trial_ids.len(),
            batches = self.view.batches.len(),
            hparams = self.view.hp_vals.len(),
            "sample event ingested"
        );

        &self.view
    }

    /// Latest derived view.
    pub fn view(&self) -> &SampleView {
        &self.view
    }

    /// Add the missing marker to every hyperparameter some active trial
    /// does not define.
    fn mark_missing(&mut self) {
        for (name, vals) in self.hp_vals.iter_mut() {
            if vals.contains(&HpValue::Missing) {
                continue;
            }
            let lacking = self.trial_ids.iter().any(|id| {
                self.trial_hps
                    .get(id)
                    .map_or(true, |row| !row.hparams.contains_key(name))
            });
            if lacking {
                vals.insert(HpValue::Missing);
            }
        }
    }

    fn derive(&mut self) {
        let batches: Vec<u64> = self.batches.iter().copied().collect();

        let chart_data = self
            .trial_ids
            .iter()
            .map(|id| {
                let series = self.values.get(id);
                batches
                    .iter()
                    .map(|batch| series.and_then(|s| s.get(batch)).and_then(|v| finite(*v)))
                    .collect()
            })
            .collect();

        let trial_hps = self
            .trial_ids
            .iter()
            .map(|id| self.trial_hps.get(id).cloned())
            .collect();

        self.view = SampleView {
            trial_ids: self.trial_ids.clone(),
            batches,
            chart_data,
            hp_vals: self.hp_vals.clone(),
            trial_hps,
            hyperparameters: self.hyperparameters.clone(),
            events: self.events,
        };
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
