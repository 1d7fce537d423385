//! Model registry list settings and the query they translate to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use tracing::warn;

use crate::client::MasterSource;
use crate::error::ScopeError;
use crate::models::ModelItem;
use crate::sort::alpha_numeric_cmp;

pub const DEFAULT_TABLE_LIMIT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelSortKey {
    #[default]
    Unspecified,
    Name,
    Description,
    CreationTime,
    LastUpdatedTime,
    NumVersions,
}

impl ModelSortKey {
    pub fn as_api_param(&self) -> &'static str {
        match self {
            ModelSortKey::Unspecified => "SORT_BY_UNSPECIFIED",
            ModelSortKey::Name => "SORT_BY_NAME",
            ModelSortKey::Description => "SORT_BY_DESCRIPTION",
            ModelSortKey::CreationTime => "SORT_BY_CREATION_TIME",
            ModelSortKey::LastUpdatedTime => "SORT_BY_LAST_UPDATED_TIME",
            ModelSortKey::NumVersions => "SORT_BY_NUM_VERSIONS",
        }
    }
}

/// Unknown keys fall back to `Unspecified` rather than failing, so stale
/// saved settings never break the listing.
impl FromStr for ModelSortKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .trim_start_matches("SORT_BY_")
            .replace('_', "")
            .to_ascii_lowercase();
        Ok(match key.as_str() {
            "name" => ModelSortKey::Name,
            "description" => ModelSortKey::Description,
            "creationtime" => ModelSortKey::CreationTime,
            "lastupdatedtime" => ModelSortKey::LastUpdatedTime,
            "numversions" | "versions" => ModelSortKey::NumVersions,
            _ => ModelSortKey::Unspecified,
        })
    }
}

impl fmt::Display for ModelSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_param())
    }
}

/// Table settings for the model registry view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRegistrySettings {
    /// Show archived models too.
    pub archived: bool,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub limit: u64,
    pub name: Option<String>,
    pub offset: u64,
    pub sort_desc: bool,
    pub sort_key: ModelSortKey,
    pub users: Option<Vec<String>>,
}

impl Default for ModelRegistrySettings {
    fn default() -> Self {
        Self {
            archived: false,
            description: None,
            labels: None,
            limit: DEFAULT_TABLE_LIMIT,
            name: None,
            offset: 0,
            sort_desc: true,
            sort_key: ModelSortKey::LastUpdatedTime,
            users: None,
        }
    }
}

impl ModelRegistrySettings {
    pub fn set_name(&mut self, name: &str) {
        self.name = non_empty(name);
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = non_empty(description);
    }

    pub fn set_labels(&mut self, labels: Vec<String>) {
        self.labels = (!labels.is_empty()).then_some(labels);
    }

    pub fn set_users(&mut self, users: Vec<String>) {
        self.users = (!users.is_empty()).then_some(users);
    }

    /// Number of filters (labels, name, users, description) currently set.
    pub fn active_filter_count(&self) -> usize {
        [
            self.labels.is_some(),
            self.name.is_some(),
            self.users.is_some(),
            self.description.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Clear every filter and go back to the first page.
    pub fn reset_filters(&mut self) {
        self.labels = None;
        self.name = None;
        self.users = None;
        self.description = None;
        self.offset = 0;
    }

    pub fn to_query(&self) -> ModelListQuery {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if !self.archived {
            pairs.push(("archived".into(), "false".into()));
        }
        if let Some(description) = &self.description {
            pairs.push(("description".into(), description.clone()));
        }
        for label in self.labels.iter().flatten() {
            pairs.push(("labels".into(), label.clone()));
        }
        pairs.push(("limit".into(), self.limit.to_string()));
        if let Some(name) = &self.name {
            pairs.push(("name".into(), name.clone()));
        }
        pairs.push(("offset".into(), self.offset.to_string()));
        let order = if self.sort_desc { "ORDER_BY_DESC" } else { "ORDER_BY_ASC" };
        pairs.push(("orderBy".into(), order.into()));
        pairs.push(("sortBy".into(), self.sort_key.as_api_param().into()));
        for user in self.users.iter().flatten() {
            pairs.push(("users".into(), user.clone()));
        }
        ModelListQuery { pairs }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Query parameters for `GET /api/v1/models`, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelListQuery {
    pub pairs: Vec<(String, String)>,
}

impl ModelListQuery {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Sort model labels for the label filter dropdown.
pub fn sort_labels(labels: &mut [String]) {
    labels.sort_by(|a, b| alpha_numeric_cmp(a, b));
}

/// Admins can delete any model; other users only their own.
pub fn can_delete(model: &ModelItem, user_id: i64, is_admin: bool) -> bool {
    is_admin || model.user_id == Some(user_id)
}

/// Delete `name` if the signed-in user may: admins can delete any model,
/// everyone else only their own.
pub async fn delete_model_checked(
    source: &dyn MasterSource,
    name: &str,
) -> crate::error::Result<()> {
    let (model, user) = tokio::try_join!(source.model(name), source.current_user())?;
    if !can_delete(&model, user.id, user.admin) {
        warn!(model = %model.name, user = %user.username, "model delete refused");
        return Err(ScopeError::Forbidden(format!(
            "user {} cannot delete model {}",
            user.username, model.name
        )));
    }
    source.delete_model(name).await
}
