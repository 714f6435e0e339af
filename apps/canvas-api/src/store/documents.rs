use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// The persisted content of one canvas: the element list plus view state,
/// replaced wholesale on every save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasDocument {
    pub elements: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<Value>,
}

impl Default for CanvasDocument {
    fn default() -> Self {
        Self {
            elements: Value::Array(Vec::new()),
            app_state: None,
        }
    }
}

/// Abstraction over the durable canvas content store.
///
/// Backed by the platform database in production and an in-memory map in
/// tests and single-process deployments.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, canvas_id: &str) -> Result<Option<CanvasDocument>, ApiError>;

    /// Replace the stored content for `canvas_id` wholesale, attributed to
    /// `saved_by`.
    async fn replace(
        &self,
        canvas_id: &str,
        document: &CanvasDocument,
        saved_by: &str,
    ) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / single-process deployments)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredCanvas {
    document: CanvasDocument,
    saved_by: String,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    data: Mutex<HashMap<String, StoredCanvas>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Who last saved a canvas, if anyone has.
    pub fn saved_by(&self, canvas_id: &str) -> Option<String> {
        self.data
            .lock()
            .get(canvas_id)
            .map(|c| c.saved_by.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, canvas_id: &str) -> Result<Option<CanvasDocument>, ApiError> {
        Ok(self.data.lock().get(canvas_id).map(|c| c.document.clone()))
    }

    async fn replace(
        &self,
        canvas_id: &str,
        document: &CanvasDocument,
        saved_by: &str,
    ) -> Result<(), ApiError> {
        self.data.lock().insert(
            canvas_id.to_string(),
            StoredCanvas {
                document: document.clone(),
                saved_by: saved_by.to_string(),
            },
        );
        Ok(())
    }
}
