//! Prism Central v3 intent API
//!
//! Every v3 entity (VM, subnet, image, project, role, recovery plan, cluster)
//! shares the same envelope: `{api_version, metadata, spec}` in and
//! `{metadata, spec, status}` out. Mutations are asynchronous and hand back a
//! task UUID in `status.execution_context`.

use super::http::ApiMessage;
use super::NutanixClient;
use crate::error::{ProviderError, Result, ResultExt};
use crate::poll::{Observation, PollTiming, StateChangeConf, StatusMessages};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// API version sent on every intent
pub const API_VERSION: &str = "3.1";

/// Page size for list calls
const LIST_PAGE_SIZE: i64 = 250;

/// Task states meaning "keep waiting"
pub const TASK_PENDING: &[&str] = &["QUEUED", "RUNNING"];

/// Task state meaning "done"
pub const TASK_TARGET: &[&str] = &["SUCCEEDED"];

/// Reference to another entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: String,
    /// Empty for references resolved by name on the server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Reference {
    pub fn new(kind: &str, uuid: &str) -> Self {
        Self {
            kind: kind.to_string(),
            uuid: uuid.to_string(),
            name: None,
        }
    }
}

/// Entity metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_version: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl Metadata {
    pub fn for_kind(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Default::default()
        }
    }
}

/// Desired state of a v3 entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec<R> {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub resources: R,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_reference: Option<Reference>,
}

/// Where the asynchronous work for an intent is tracked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// A single UUID, or a list of them on some endpoints
    #[serde(default)]
    pub task_uuid: Option<Value>,
}

impl ExecutionContext {
    pub fn task_uuid(&self) -> Option<String> {
        match self.task_uuid.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        }
    }
}

/// Observed state of a v3 entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub struct Status<R> {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message_list: Vec<ApiMessage>,
    #[serde(default)]
    pub execution_context: Option<ExecutionContext>,
    #[serde(default)]
    pub resources: Option<R>,
    #[serde(default)]
    pub cluster_reference: Option<Reference>,
}

/// Request body for create/update
#[derive(Debug, Clone, Serialize)]
pub struct IntentInput<R> {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: Spec<R>,
}

impl<R> IntentInput<R> {
    pub fn new(metadata: Metadata, spec: Spec<R>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            metadata,
            spec,
        }
    }
}

/// Response for create/get/update
#[derive(Debug, Clone, Deserialize)]
pub struct IntentResponse<R> {
    #[serde(default)]
    pub api_version: Option<String>,
    pub metadata: Metadata,
    #[serde(default = "Option::default")]
    pub spec: Option<Spec<R>>,
    #[serde(default = "Option::default")]
    pub status: Option<Status<R>>,
}

impl<R> IntentResponse<R> {
    pub fn uuid(&self) -> Result<String> {
        self.metadata
            .uuid
            .clone()
            .ok_or_else(|| ProviderError::Api {
                status: 200,
                message: format!("{} response carries no uuid", self.metadata.kind),
            })
    }

    pub fn task_uuid(&self) -> Option<String> {
        self.status
            .as_ref()?
            .execution_context
            .as_ref()?
            .task_uuid()
    }

    /// Status resources, falling back to spec resources
    pub fn resources(&self) -> Option<&R> {
        self.status
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .or_else(|| self.spec.as_ref().map(|s| &s.resources))
    }
}

/// Response for delete
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub status: Option<Status<Value>>,
}

impl DeleteResponse {
    pub fn task_uuid(&self) -> Option<String> {
        self.status
            .as_ref()?
            .execution_context
            .as_ref()?
            .task_uuid()
    }
}

/// List request body
#[derive(Debug, Clone, Serialize)]
pub struct ListRequest {
    pub kind: String,
    pub length: i64,
    pub offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListMetadata {
    #[serde(default)]
    total_matches: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct ListResponse<R> {
    #[serde(default = "Vec::new")]
    entities: Vec<IntentResponse<R>>,
    #[serde(default)]
    metadata: ListMetadata,
}

/// A v3 entity family
pub trait V3Kind {
    /// Value of `metadata.kind`
    const KIND: &'static str;
    /// Collection path under `/api/nutanix/v3`
    const PATH: &'static str;
    type Resources: Serialize + DeserializeOwned + Clone + Debug;
}

/// Prism task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(default)]
    pub progress_message: Option<String>,
    #[serde(default)]
    pub percentage_complete: Option<i64>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub entity_reference_list: Vec<Reference>,
    #[serde(default)]
    pub creation_time_usecs: Option<i64>,
    #[serde(default)]
    pub completion_time_usecs: Option<i64>,
}

impl Task {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.creation_time_usecs.and_then(DateTime::from_timestamp_micros)
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completion_time_usecs.and_then(DateTime::from_timestamp_micros)
    }

    /// First referenced entity of the given kind
    pub fn entity_uuid(&self, kind: &str) -> Option<&str> {
        self.entity_reference_list
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.uuid.as_str())
    }
}

impl StatusMessages for Task {
    fn status_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if let Some(detail) = self.error_detail.as_ref().filter(|d| !d.is_empty()) {
            match &self.error_code {
                Some(code) if !code.is_empty() => messages.push(format!("{} ({})", detail, code)),
                _ => messages.push(detail.clone()),
            }
        }
        if let Some(progress) = self.progress_message.as_ref().filter(|p| !p.is_empty()) {
            messages.push(progress.clone());
        }
        messages
    }
}

impl<R> StatusMessages for IntentResponse<R> {
    fn status_messages(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| {
                s.message_list
                    .iter()
                    .filter_map(|m| m.message.clone().or_else(|| m.reason.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Query one task for the poller
///
/// A task that no longer exists is reported as `INVALID_UUID`, which is terminal.
pub async fn task_state_refresh(client: &NutanixClient, task_uuid: &str) -> Result<Observation<Task>> {
    match client.get_task(task_uuid).await {
        Ok(task) => {
            let state = task.status.clone();
            Ok(Observation::new(task, state))
        }
        Err(e) if e.is_not_found() => Ok(Observation::new(
            Task {
                uuid: Some(task_uuid.to_string()),
                status: "INVALID_UUID".to_string(),
                error_detail: Some(format!("task {} does not exist", task_uuid)),
                ..Default::default()
            },
            "INVALID_UUID",
        )),
        Err(e) => Err(e),
    }
}

impl NutanixClient {
    // =========================================================================
    // Tasks
    // =========================================================================

    /// Get a task by UUID
    pub async fn get_task(&self, task_uuid: &str) -> Result<Task> {
        let url = self.v3_url(&format!("tasks/{}", task_uuid))?;
        self.get(&url)
            .await
            .map_err(|e| remap_not_found(e, "task", task_uuid))
    }

    /// Wait for a task to reach SUCCEEDED
    pub async fn wait_for_task(&self, task_uuid: &str, timing: &PollTiming, action: &str) -> Result<Task> {
        StateChangeConf::new(format!("task {} ({})", task_uuid, action))
            .pending(TASK_PENDING)
            .target(TASK_TARGET)
            .timing(timing)
            .wait_for_state(|| task_state_refresh(self, task_uuid))
            .await
    }

    // =========================================================================
    // Generic intent operations
    // =========================================================================

    /// Create an entity, returning the immediate (pending) response
    pub async fn create_entity<K: V3Kind>(
        &self,
        input: &IntentInput<K::Resources>,
    ) -> Result<IntentResponse<K::Resources>> {
        let url = self.v3_url(K::PATH)?;
        tracing::info!("Creating {} '{}'", K::KIND, input.spec.name);
        self.post(&url, input).await
    }

    /// Get an entity by UUID
    pub async fn get_entity<K: V3Kind>(&self, uuid: &str) -> Result<IntentResponse<K::Resources>> {
        let url = self.v3_url(&format!("{}/{}", K::PATH, uuid))?;
        self.get(&url)
            .await
            .map_err(|e| remap_not_found(e, K::KIND, uuid))
    }

    /// Replace an entity's spec
    pub async fn update_entity<K: V3Kind>(
        &self,
        uuid: &str,
        input: &IntentInput<K::Resources>,
    ) -> Result<IntentResponse<K::Resources>> {
        let url = self.v3_url(&format!("{}/{}", K::PATH, uuid))?;
        tracing::info!("Updating {} {}", K::KIND, uuid);
        self.put(&url, input)
            .await
            .map_err(|e| remap_not_found(e, K::KIND, uuid))
    }

    /// Delete an entity
    pub async fn delete_entity<K: V3Kind>(&self, uuid: &str) -> Result<DeleteResponse> {
        let url = self.v3_url(&format!("{}/{}", K::PATH, uuid))?;
        tracing::info!("Deleting {} {}", K::KIND, uuid);
        let response: Option<DeleteResponse> = self
            .delete(&url)
            .await
            .map_err(|e| remap_not_found(e, K::KIND, uuid))?;
        Ok(response.unwrap_or_default())
    }

    /// List all entities of a kind (auto-paginate)
    pub async fn list_entities<K: V3Kind>(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<IntentResponse<K::Resources>>> {
        let url = self.v3_url(&format!("{}/list", K::PATH))?;
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let request = ListRequest {
                kind: K::KIND.to_string(),
                length: LIST_PAGE_SIZE,
                offset,
                filter: filter.map(str::to_string),
            };
            let page: ListResponse<K::Resources> = self.post(&url, &request).await?;
            let count = page.entities.len() as i64;
            all.extend(page.entities);

            let total = page.metadata.total_matches.unwrap_or(0);
            offset += count;
            if count == 0 || offset >= total {
                break;
            }
        }

        tracing::debug!("Listed {} {} entities", all.len(), K::KIND);
        Ok(all)
    }

    /// Look up an entity UUID by exact name
    pub async fn find_entity_by_name<K: V3Kind>(&self, name: &str) -> Result<Option<String>> {
        let filter = format!("name=={}", name);
        let entities = self.list_entities::<K>(Some(&filter)).await?;
        Ok(entities
            .into_iter()
            .find(|e| {
                e.spec.as_ref().map(|s| s.name.as_str()) == Some(name)
                    || e.status.as_ref().and_then(|s| s.name.as_deref()) == Some(name)
            })
            .and_then(|e| e.metadata.uuid))
    }

    /// Create an entity and wait for its task
    pub async fn create_and_wait<K: V3Kind>(
        &self,
        input: &IntentInput<K::Resources>,
        timing: &PollTiming,
    ) -> Result<String> {
        let response = self.create_entity::<K>(input).await?;
        let uuid = response.uuid()?;
        let task = response.task_uuid().ok_or_else(|| ProviderError::Api {
            status: 202,
            message: format!("create {} returned no task uuid", K::KIND),
        })?;
        self.wait_for_task(&task, timing, &format!("create {} {}", K::KIND, uuid))
            .await
            .with_context(|| format!("error waiting for {} ({}) to create", K::KIND, uuid))?;
        Ok(uuid)
    }

    /// Update an entity and wait for its task
    pub async fn update_and_wait<K: V3Kind>(
        &self,
        uuid: &str,
        input: &IntentInput<K::Resources>,
        timing: &PollTiming,
    ) -> Result<()> {
        let response = self.update_entity::<K>(uuid, input).await?;
        if let Some(task) = response.task_uuid() {
            self.wait_for_task(&task, timing, &format!("update {} {}", K::KIND, uuid))
                .await
                .with_context(|| format!("error waiting for {} ({}) to update", K::KIND, uuid))?;
        }
        Ok(())
    }

    /// Delete an entity and wait for its task; an already missing entity is not an error
    pub async fn delete_and_wait<K: V3Kind>(&self, uuid: &str, timing: &PollTiming) -> Result<()> {
        let response = match self.delete_entity::<K>(uuid).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                tracing::info!("{} {} already deleted", K::KIND, uuid);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some(task) = response.task_uuid() {
            self.wait_for_task(&task, timing, &format!("delete {} {}", K::KIND, uuid))
                .await
                .with_context(|| format!("error waiting for {} ({}) to delete", K::KIND, uuid))?;
        }
        Ok(())
    }

    /// Current spec_version, needed for every update
    pub async fn spec_version<K: V3Kind>(&self, uuid: &str) -> Result<Metadata> {
        Ok(self.get_entity::<K>(uuid).await?.metadata)
    }
}

/// Give an HTTP-level not-found the entity kind and id it is about
pub(crate) fn remap_not_found(err: ProviderError, kind: &str, id: &str) -> ProviderError {
    if err.is_not_found() {
        ProviderError::not_found(kind, id)
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_uuid_string_or_list() {
        let single = ExecutionContext {
            task_uuid: Some(json!("t-1")),
        };
        let list = ExecutionContext {
            task_uuid: Some(json!(["t-2", "t-3"])),
        };
        assert_eq!(single.task_uuid().as_deref(), Some("t-1"));
        assert_eq!(list.task_uuid().as_deref(), Some("t-2"));
    }

    #[test]
    fn test_intent_response_parses_pending_create() {
        let body = json!({
            "api_version": "3.1",
            "metadata": {"kind": "subnet", "uuid": "s-1", "spec_version": 0},
            "spec": {"name": "vlan-10", "resources": {"vlan_id": 10}},
            "status": {"state": "PENDING", "execution_context": {"task_uuid": "t-9"}}
        });
        let response: IntentResponse<Value> = serde_json::from_value(body).unwrap();
        assert_eq!(response.uuid().unwrap(), "s-1");
        assert_eq!(response.task_uuid().as_deref(), Some("t-9"));
        assert_eq!(response.resources().unwrap()["vlan_id"], 10);
    }

    #[test]
    fn test_task_messages_and_timestamps() {
        let task: Task = serde_json::from_value(json!({
            "uuid": "t-1",
            "status": "FAILED",
            "error_code": "422",
            "error_detail": "Subnet overlaps",
            "creation_time_usecs": 1_600_000_000_000_000i64,
            "entity_reference_list": [{"kind": "subnet", "uuid": "s-1"}]
        }))
        .unwrap();
        assert_eq!(task.status_messages(), vec!["Subnet overlaps (422)".to_string()]);
        assert_eq!(task.created_at().unwrap().timestamp(), 1_600_000_000);
        assert_eq!(task.entity_uuid("subnet"), Some("s-1"));
    }

    #[test]
    fn test_metadata_omits_empty_fields() {
        let value = serde_json::to_value(Metadata::for_kind("vm")).unwrap();
        assert_eq!(value, json!({"kind": "vm"}));
    }
}
