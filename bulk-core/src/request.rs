use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque filter clause forwarded to the admin API as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterClause(Map<String, Value>);

impl FilterClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPolicy {
    Keep,
    Latest,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InvocationSelector {
    Ids(Vec<String>),
    Filters(Vec<FilterClause>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchRequest {
    pub selector: InvocationSelector,
    pub deployment: Option<DeploymentPolicy>,
    pub created_after: Option<String>,
}

impl BatchRequest {
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selector: InvocationSelector::Ids(ids.into_iter().map(Into::into).collect()),
            deployment: None,
            created_after: None,
        }
    }

    pub fn by_filters(filters: Vec<FilterClause>) -> Self {
        Self {
            selector: InvocationSelector::Filters(filters),
            deployment: None,
            created_after: None,
        }
    }

    pub fn with_deployment(mut self, policy: DeploymentPolicy) -> Self {
        self.deployment = Some(policy);
        self
    }

    pub fn is_filter_based(&self) -> bool {
        matches!(self.selector, InvocationSelector::Filters(_))
    }

    /// Request for the page that follows `cursor`; nothing but `created_after` changes.
    pub fn next_page(&self, cursor: &str) -> Self {
        let mut next = self.clone();
        next.created_after = Some(cursor.to_string());
        next
    }

    pub fn to_page_body(&self, page_size: u32) -> PageRequestBody<'_> {
        let (invocation_ids, filters) = match &self.selector {
            InvocationSelector::Ids(ids) => (Some(ids.as_slice()), None),
            InvocationSelector::Filters(filters) => (None, Some(filters.as_slice())),
        };
        PageRequestBody {
            invocation_ids,
            filters,
            deployment: self.deployment,
            page_size,
            created_after: self.created_after.as_deref(),
        }
    }
}

/// Wire body of `POST /query/invocations/{operation}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<&'a [FilterClause]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentPolicy>,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<&'a str>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub successful: u64,
    pub failed: u64,
    #[serde(default)]
    pub failed_invocation_ids: Vec<String>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_created_at: Option<String>,
}
