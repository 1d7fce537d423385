//! REST API handlers and SSE streaming for trialscope-server.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::Stream;
use tracing::{debug, warn};

use trialscope_core::error::ScopeError;
use trialscope_core::filters::{parse_experiment_ids, parse_id_params};
use trialscope_core::models::ModelPatch;
use trialscope_core::polling::fetch_experiment_details;
use trialscope_core::registry::{
    delete_model_checked, sort_labels, ModelRegistrySettings, ModelSortKey,
};
use trialscope_core::subscription::{subscribe_metric_names, subscribe_samples};
use trialscope_core::{MetricType, Subscription, SubscriptionState, VisualizationFilters};

use crate::state::AppState;

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/compare/stream", get(stream_compare))
        .route("/metrics/stream", get(stream_metric_names))
        .route("/experiments/{id}", get(get_experiment))
        .route("/models", get(list_models))
        .route("/models/labels", get(list_model_labels))
        .route(
            "/models/{name}",
            get(get_model).patch(patch_model).delete(delete_model),
        )
        .route("/models/{name}/archive", post(archive_model))
        .route("/models/{name}/unarchive", post(unarchive_model))
        .route("/config", get(get_server_config))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn error_response(err: ScopeError) -> Response {
    let status = match &err {
        ScopeError::ExperimentNotFound(_)
        | ScopeError::ModelNotFound(_)
        | ScopeError::Api { status: 404, .. } => StatusCode::NOT_FOUND,
        ScopeError::Forbidden(_) => StatusCode::FORBIDDEN,
        ScopeError::InvalidId(_) => StatusCode::BAD_REQUEST,
        ScopeError::Api { .. } | ScopeError::Http(_) | ScopeError::StreamFrame { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn error_event(message: &str) -> Event {
    Event::default().event("error").data(message)
}

/// Turn a subscription's state changes into SSE events.
///
/// Each `Ready` snapshot becomes one JSON event. A failure produces a single
/// `error` event and ends the stream. The subscription lives as long as the
/// stream, so a disconnecting client cancels the upstream read.
fn subscription_events<V>(
    sub: Subscription<V>,
    rx: watch::Receiver<SubscriptionState<V>>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    stream::unfold(Some((sub, rx)), |st| async move {
        let (sub, mut rx) = st?;
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let state = rx.borrow_and_update().clone();
            match state {
                SubscriptionState::Ready(value) => {
                    let event = Event::default()
                        .json_data(&value)
                        .unwrap_or_else(|e| error_event(&e.to_string()));
                    return Some((Ok(event), Some((sub, rx))));
                }
                SubscriptionState::Failed(message) => {
                    return Some((Ok(error_event(&message)), None));
                }
                SubscriptionState::Idle | SubscriptionState::Loading => {}
            }
        }
    })
}

fn keep_alive(state: &AppState) -> KeepAlive {
    KeepAlive::new()
        .interval(state.config.keep_alive())
        .text("keep-alive")
}

// ─── Streams ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct CompareQuery {
    metric: Option<String>,
    #[serde(rename = "type")]
    metric_type: Option<String>,
    max_trials: Option<u32>,
}

/// SSE endpoint: aggregated sample views for `?id=..&id=..`.
async fn stream_compare(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    Query(q): Query<CompareQuery>,
) -> Response {
    let experiment_ids = parse_experiment_ids(raw.as_deref().unwrap_or_default());
    if experiment_ids.is_empty() {
        return error_response(ScopeError::InvalidId("no experiment ids given".into()));
    }

    let mut filters = VisualizationFilters {
        max_trial: q.max_trials.unwrap_or(state.config.max_trials),
        ..Default::default()
    };
    match q.metric_type.as_deref().map(str::parse::<MetricType>) {
        None => {}
        Some(Ok(t)) => filters.metric.metric_type = t,
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }
    if let Some(metric) = q.metric {
        filters.metric.name = metric;
    }
    let request = filters.subscription_key(&experiment_ids);
    debug!(?request, "compare stream requested");

    let mut sub = Subscription::new();
    let rx = sub.watch();
    subscribe_samples(&mut sub, state.source.clone(), request);

    Sse::new(subscription_events(sub, rx))
        .keep_alive(keep_alive(&state))
        .into_response()
}

/// SSE endpoint: ordered metric names for `?trial_id=..&trial_id=..`.
async fn stream_metric_names(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    let trial_ids = parse_id_params(raw.as_deref().unwrap_or_default(), "trial_id");
    if trial_ids.is_empty() {
        return error_response(ScopeError::InvalidId("no trial ids given".into()));
    }

    let mut sub = Subscription::new();
    let rx = sub.watch();
    subscribe_metric_names(&mut sub, state.source.clone(), trial_ids);

    Sse::new(subscription_events(sub, rx))
        .keep_alive(keep_alive(&state))
        .into_response()
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn get_experiment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<i64>() else {
        return error_response(ScopeError::InvalidId(id));
    };

    match fetch_experiment_details(state.source.as_ref(), id).await {
        Ok(details) => {
            let single = details.is_single_trial();
            match serde_json::to_value(&details) {
                Ok(mut body) => {
                    body["isSingleTrial"] = serde_json::Value::Bool(single);
                    Json(body).into_response()
                }
                Err(e) => error_response(e.into()),
            }
        }
        Err(e) => {
            if !e.is_not_found() {
                warn!(id, error = %e, "failed to fetch experiment");
            }
            error_response(e)
        }
    }
}

/// Query params for `list_models`. List values are comma-separated.
#[derive(Deserialize, Default)]
struct ModelsQuery {
    name: Option<String>,
    description: Option<String>,
    labels: Option<String>,
    users: Option<String>,
    #[serde(default)]
    archived: bool,
    sort: Option<String>,
    order: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

fn split_list(s: Option<&str>) -> Vec<String> {
    s.map(|s| {
        s.split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

impl ModelsQuery {
    fn into_settings(self) -> ModelRegistrySettings {
        let mut settings = ModelRegistrySettings {
            archived: self.archived,
            ..Default::default()
        };
        settings.set_name(self.name.as_deref().unwrap_or_default());
        settings.set_description(self.description.as_deref().unwrap_or_default());
        settings.set_labels(split_list(self.labels.as_deref()));
        settings.set_users(split_list(self.users.as_deref()));
        if let Some(sort) = &self.sort {
            settings.sort_key = sort.parse::<ModelSortKey>().unwrap_or_default();
        }
        if let Some(order) = &self.order {
            settings.sort_desc = !order.eq_ignore_ascii_case("asc");
        }
        if let Some(limit) = self.limit {
            settings.limit = limit;
        }
        if let Some(offset) = self.offset {
            settings.offset = offset;
        }
        settings
    }
}

async fn list_models(State(state): State<AppState>, Query(q): Query<ModelsQuery>) -> Response {
    let query = q.into_settings().to_query();
    match state.source.models(query).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_model_labels(State(state): State<AppState>) -> Response {
    match state.source.model_labels().await {
        Ok(mut labels) => {
            sort_labels(&mut labels);
            Json(labels).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ─── Model actions ───────────────────────────────────────────────────────────

async fn get_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.source.model(&name).await {
        Ok(model) => Json(model).into_response(),
        Err(e) => error_response(e),
    }
}

async fn archive_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.source.archive_model(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn unarchive_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.source.unarchive_model(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Deletes only when the master's signed-in user owns the model or is an
/// admin; otherwise 403.
async fn delete_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match delete_model_checked(state.source.as_ref(), &name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn patch_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<ModelPatch>,
) -> Response {
    if patch.is_empty() {
        return (StatusCode::BAD_REQUEST, "nothing to update").into_response();
    }
    match state.source.patch_model(&name, patch).await {
        Ok(model) => Json(model).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_server_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "masterUrl": state.config.master_url,
        "maxTrials": state.config.max_trials,
        "pollIntervalMs": state.config.poll_interval_ms,
        "keepAliveSecs": state.config.keep_alive_secs,
    }))
}
