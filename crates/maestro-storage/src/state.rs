// State store over the document database.
//
// Two collections, `workflow` and `task`, both keyed by their string `id`.
// Updates are upserts that `$set` only the provided fields, so concurrent
// writers converge field-wise (last writer wins).

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use indexmap::IndexMap;
use mongodb::bson::{doc, to_document};
use mongodb::{Client, Collection};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::{
    TaskOptions, TaskRecord, TaskResult, TaskStatus, WorkflowMetadata, WorkflowRecord,
    WorkflowStatus,
};
use maestro_core::secrets::SealedSecret;

const DATABASE_NAME: &str = "maestro";

/// Fields settable on a workflow row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WorkflowMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_revoked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields settable on a task row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<SealedSecret>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<TaskOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    pub fn new(client: Client) -> Self {
        Self {
            db: client.database(DATABASE_NAME),
        }
    }

    /// Create a database connection from a mongodb URL and ping it once so
    /// misconfiguration fails at startup rather than mid-workflow.
    pub async fn from_url(mongo_dns: &str) -> Result<Self> {
        let client = Client::with_uri_str(mongo_dns)
            .await
            .map_err(MaestroError::state)?;
        let db = client.database(DATABASE_NAME);
        db.run_command(doc! {"ping": 1})
            .await
            .map_err(|e| MaestroError::state(format!("could not connect to `{mongo_dns}`: {e}")))?;
        Ok(Self { db })
    }

    fn workflows(&self) -> Collection<WorkflowRecord> {
        self.db.collection("workflow")
    }

    fn tasks(&self) -> Collection<TaskRecord> {
        self.db.collection("task")
    }

    // ============================================
    // Workflows
    // ============================================

    pub async fn find_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>> {
        self.workflows()
            .find_one(doc! {"id": id})
            .await
            .map_err(MaestroError::state)
    }

    /// Upsert a workflow row, `$set`-ing only the provided fields, and
    /// return the resulting row.
    pub async fn upsert_workflow(&self, id: &str, patch: WorkflowPatch) -> Result<WorkflowRecord> {
        let set = to_document(&patch).map_err(MaestroError::state)?;
        self.workflows()
            .update_one(doc! {"id": id}, doc! {"$set": set})
            .upsert(true)
            .await
            .map_err(MaestroError::state)?;

        self.find_workflow(id)
            .await?
            .ok_or_else(|| MaestroError::state(format!("workflow `{id}` vanished after upsert")))
    }

    // ============================================
    // Tasks
    // ============================================

    pub async fn find_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.tasks()
            .find_one(doc! {"id": id})
            .await
            .map_err(MaestroError::state)
    }

    /// All tasks belonging to a workflow.
    pub async fn find_tasks(&self, parent: &str) -> Result<Vec<TaskRecord>> {
        let cursor = self
            .tasks()
            .find(doc! {"parent": parent})
            .await
            .map_err(MaestroError::state)?;
        cursor.try_collect().await.map_err(MaestroError::state)
    }

    /// Upsert a task row, `$set`-ing only the provided fields, and return
    /// the resulting row.
    pub async fn upsert_task(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord> {
        let set = to_document(&patch).map_err(MaestroError::state)?;
        self.tasks()
            .update_one(doc! {"id": id}, doc! {"$set": set})
            .upsert(true)
            .await
            .map_err(MaestroError::state)?;

        self.find_task(id)
            .await?
            .ok_or_else(|| MaestroError::state(format!("task `{id}` vanished after upsert")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_serialize_only_set_fields() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Running),
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        let document = to_document(&patch).unwrap();
        assert_eq!(document.len(), 2);
        assert_eq!(document.get_str("status").unwrap(), "RUNNING");
        assert!(!document.contains_key("result"));
    }

    #[test]
    fn empty_patch_is_an_empty_document() {
        let document = to_document(&WorkflowPatch::default()).unwrap();
        assert!(document.is_empty());
    }
}
