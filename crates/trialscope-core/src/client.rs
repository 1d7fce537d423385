//! HTTP client for the experiment tracking master.
//!
//! [`MasterSource`] is the seam everything else depends on; [`MasterClient`]
//! is the reqwest-backed implementation.

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, ScopeError};
use crate::models::{
    GetExperimentResponse, MetricName, MetricNamesEvent, ModelItem, ModelList, ModelPatch,
    TrialsSampleEvent, User, ValidationHistory,
};
use crate::registry::ModelListQuery;
use crate::stream::decode_ndjson;

pub type EventStream<T> = BoxStream<'static, Result<T>>;

/// Parameters of a trials-sample subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRequest {
    pub experiment_ids: Vec<i64>,
    pub metric: MetricName,
    pub max_trials: u32,
}

/// Everything the views read from the master.
pub trait MasterSource: Send + Sync {
    /// Streaming sample of trial metrics for the given experiments.
    fn experiments_sample(&self, request: SampleRequest) -> EventStream<TrialsSampleEvent>;

    /// Streaming metric names reported by the given trials.
    fn trials_metric_names(&self, trial_ids: Vec<i64>) -> EventStream<MetricNamesEvent>;

    fn experiment(&self, id: i64) -> BoxFuture<'_, Result<GetExperimentResponse>>;

    fn validation_history(&self, id: i64) -> BoxFuture<'_, Result<Vec<ValidationHistory>>>;

    fn models(&self, query: ModelListQuery) -> BoxFuture<'_, Result<ModelList>>;

    fn model(&self, name: &str) -> BoxFuture<'_, Result<ModelItem>>;

    fn model_labels(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// The user the configured credentials belong to.
    fn current_user(&self) -> BoxFuture<'_, Result<User>>;

    fn archive_model(&self, name: &str) -> BoxFuture<'_, Result<()>>;

    fn unarchive_model(&self, name: &str) -> BoxFuture<'_, Result<()>>;

    /// Delete without a permission check; see
    /// [`delete_model_checked`](crate::registry::delete_model_checked).
    fn delete_model(&self, name: &str) -> BoxFuture<'_, Result<()>>;

    /// Rename or relabel a model. Returns the updated record.
    fn patch_model(&self, name: &str, patch: ModelPatch) -> BoxFuture<'_, Result<ModelItem>>;
}

#[derive(Clone)]
pub struct MasterClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationHistoryResponse {
    #[serde(default)]
    validation_history: Vec<ValidationHistory>,
}

#[derive(Deserialize)]
struct LabelsResponse {
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Deserialize)]
struct ModelResponse {
    model: ModelItem,
}

#[derive(Deserialize)]
struct MeResponse {
    user: User,
}

impl MasterClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base_url, path)))
    }

    /// `/api/v1/models/{name}[/{action}]` with the name percent-encoded as a
    /// single path segment.
    fn model_url(&self, name: &str, action: Option<&str>) -> Result<Url> {
        let invalid = || ScopeError::Other(format!("invalid master URL: {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["api", "v1", "models", name])
            .extend(action);
        Ok(url)
    }

    async fn model_request(
        &self,
        method: Method,
        name: &str,
        action: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = self.model_url(name, action)?;
        Self::send(self.authorize(self.client.request(method, url)))
            .await
            .map_err(|e| model_not_found(e, name))
    }

    async fn send(req: RequestBuilder) -> Result<reqwest::Response> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(ScopeError::Api { status, message });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
        let resp = Self::send(req).await?;
        Ok(resp.json().await?)
    }

    /// Open a streaming endpoint and decode it lazily. The request is only
    /// sent when the returned stream is first polled.
    fn open_stream<T>(&self, req: RequestBuilder) -> EventStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        stream::once(async move {
            let resp = Self::send(req).await?;
            Ok::<_, ScopeError>(decode_ndjson::<T, _, _, _>(Box::pin(resp.bytes_stream())))
        })
        .try_flatten()
        .boxed()
    }
}

fn model_not_found(err: ScopeError, name: &str) -> ScopeError {
    match err {
        ScopeError::Api { status: 404, .. } => ScopeError::ModelNotFound(name.to_string()),
        other => other,
    }
}

impl MasterSource for MasterClient {
    fn experiments_sample(&self, request: SampleRequest) -> EventStream<TrialsSampleEvent> {
        let mut query: Vec<(&str, String)> = request
            .experiment_ids
            .iter()
            .map(|id| ("experimentIds", id.to_string()))
            .collect();
        query.push(("metricName", request.metric.name.clone()));
        query.push(("metricType", request.metric.metric_type.as_api_param().to_string()));
        query.push(("maxTrials", request.max_trials.to_string()));

        debug!(
            experiments = ?request.experiment_ids,
            metric = %request.metric.name,
            "opening trials sample stream"
        );
        self.open_stream(
            self.get("/api/v1/experiments/metrics-stream/trials-sample")
                .query(&query),
        )
    }

    fn trials_metric_names(&self, trial_ids: Vec<i64>) -> EventStream<MetricNamesEvent> {
        let query: Vec<(&str, String)> = trial_ids
            .iter()
            .map(|id| ("trialIds", id.to_string()))
            .collect();
        self.open_stream(
            self.get("/api/v1/trials/metrics-stream/metric-names")
                .query(&query),
        )
    }

    fn experiment(&self, id: i64) -> BoxFuture<'_, Result<GetExperimentResponse>> {
        Box::pin(async move {
            Self::get_json::<GetExperimentResponse>(self.get(&format!("/api/v1/experiments/{}", id)))
                .await
                .map_err(|e| match e {
                    ScopeError::Api { status: 404, .. } => ScopeError::ExperimentNotFound(id),
                    other => other,
                })
        })
    }

    fn validation_history(&self, id: i64) -> BoxFuture<'_, Result<Vec<ValidationHistory>>> {
        Box::pin(async move {
            let resp: ValidationHistoryResponse = Self::get_json(
                self.get(&format!("/api/v1/experiments/{}/validation-history", id)),
            )
            .await?;
            Ok(resp.validation_history)
        })
    }

    fn models(&self, query: ModelListQuery) -> BoxFuture<'_, Result<ModelList>> {
        Box::pin(async move {
            Self::get_json::<ModelList>(self.get("/api/v1/models").query(&query.pairs)).await
        })
    }

    fn model(&self, name: &str) -> BoxFuture<'_, Result<ModelItem>> {
        let name = name.to_string();
        Box::pin(async move {
            let resp = self.model_request(Method::GET, &name, None).await?;
            Ok(resp.json::<ModelResponse>().await?.model)
        })
    }

    fn model_labels(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let resp: LabelsResponse = Self::get_json(self.get("/api/v1/model/labels")).await?;
            Ok(resp.labels)
        })
    }

    fn current_user(&self) -> BoxFuture<'_, Result<User>> {
        Box::pin(async move {
            let resp: MeResponse = Self::get_json(self.get("/api/v1/me")).await?;
            Ok(resp.user)
        })
    }

    fn archive_model(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_string();
        Box::pin(async move {
            self.model_request(Method::POST, &name, Some("archive")).await?;
            info!(model = %name, "model archived");
            Ok(())
        })
    }

    fn unarchive_model(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_string();
        Box::pin(async move {
            self.model_request(Method::POST, &name, Some("unarchive")).await?;
            info!(model = %name, "model unarchived");
            Ok(())
        })
    }

    fn delete_model(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_string();
        Box::pin(async move {
            self.model_request(Method::DELETE, &name, None).await?;
            info!(model = %name, "model deleted");
            Ok(())
        })
    }

    fn patch_model(&self, name: &str, patch: ModelPatch) -> BoxFuture<'_, Result<ModelItem>> {
        let name = name.to_string();
        Box::pin(async move {
            let url = self.model_url(&name, None)?;
            let req = self.authorize(self.client.patch(url).json(&patch));
            let resp = Self::send(req).await.map_err(|e| model_not_found(e, &name))?;
            Ok(resp.json::<ModelResponse>().await?.model)
        })
    }
}
