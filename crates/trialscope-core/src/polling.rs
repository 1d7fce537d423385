//! Experiment details polling.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::MasterSource;
use crate::error::{Result, ScopeError};
use crate::models::ExperimentDetails;

/// Fetch the experiment and its validation history together.
pub async fn fetch_experiment_details(
    source: &dyn MasterSource,
    id: i64,
) -> Result<ExperimentDetails> {
    let (response, validation_history) =
        tokio::try_join!(source.experiment(id), source.validation_history(id)).map_err(
            |e| match e {
                ScopeError::Api { status: 404, .. } => ScopeError::ExperimentNotFound(id),
                other => other,
            },
        )?;

    Ok(ExperimentDetails {
        searcher: response.searcher_name().map(str::to_string),
        experiment: response.experiment,
        validation_history,
    })
}

/// Poll an experiment until it reaches a terminal state.
///
/// `on_change` is called with the first snapshot and then only when the
/// snapshot differs from the previous one. Returns the last snapshot, or
/// `None` if cancelled before anything was fetched. Cancellation is not an
/// error.
pub async fn poll_experiment<F>(
    source: &dyn MasterSource,
    id: i64,
    every: Duration,
    cancel: &CancellationToken,
    mut on_change: F,
) -> Result<Option<ExperimentDetails>>
where
    F: FnMut(&ExperimentDetails),
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<ExperimentDetails> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(id, "experiment polling cancelled");
                return Ok(last);
            }
            _ = ticker.tick() => {}
        }

        let details = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(id, "experiment fetch cancelled");
                return Ok(last);
            }
            details = fetch_experiment_details(source, id) => match details {
                Err(e) if e.is_aborted() => return Ok(last),
                other => other?,
            },
        };

        if last.as_ref() != Some(&details) {
            on_change(&details);
        }
        let terminal = details.experiment.state.is_terminal();
        let state = details.experiment.state;
        last = Some(details);

        if terminal {
            info!(id, %state, "experiment reached a terminal state; polling stopped");
            return Ok(last);
        }
    }
}
