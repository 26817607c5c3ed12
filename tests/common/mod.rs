#![allow(dead_code)]

use async_trait::async_trait;
use ink_sketch::generation::{
    AssetFetcher, CreateTaskRequest, CreateTaskResponse, GenerationTransport, TaskSnapshot,
    TransportError,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUg==";

/// Service double: answers creation with a fixed response and polls from a
/// queue, reporting `IN_PROGRESS` once the queue is drained.
#[derive(Default)]
pub struct ScriptedService {
    create: CreateTaskResponse,
    polls: Mutex<VecDeque<Result<TaskSnapshot, TransportError>>>,
    poll_latency: Option<Duration>,
    creates: Mutex<Vec<CreateTaskRequest>>,
    gets: AtomicUsize,
    polled_ids: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn with_task(id: &str) -> Self {
        Self {
            create: CreateTaskResponse {
                result: Some(id.to_string()),
                ..CreateTaskResponse::default()
            },
            ..Self::default()
        }
    }

    pub fn with_create(create: CreateTaskResponse) -> Self {
        Self {
            create,
            ..Self::default()
        }
    }

    pub fn then_status(self, status: &str) -> Self {
        self.then(Ok(snapshot(status)))
    }

    pub fn then_success(self, url: &str) -> Self {
        let mut done = snapshot("SUCCEEDED");
        done.model_urls = Some(ink_sketch::generation::transport::ModelUrls {
            glb: Some(url.to_string()),
            ..Default::default()
        });
        self.then(Ok(done))
    }

    pub fn then_failure(self, message: &str) -> Self {
        let mut failed = snapshot("FAILED");
        failed.task_error = Some(ink_sketch::generation::transport::TaskError {
            message: Some(message.to_string()),
        });
        self.then(Ok(failed))
    }

    pub fn then(self, reply: Result<TaskSnapshot, TransportError>) -> Self {
        self.polls.lock().expect("lock").push_back(reply);
        self
    }

    pub fn with_poll_latency(mut self, latency: Duration) -> Self {
        self.poll_latency = Some(latency);
        self
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> Vec<CreateTaskRequest> {
        self.creates.lock().expect("lock").clone()
    }

    pub fn polled_ids(&self) -> Vec<String> {
        self.polled_ids.lock().expect("lock").clone()
    }
}

fn snapshot(status: &str) -> TaskSnapshot {
    TaskSnapshot {
        id: "task".into(),
        status: status.into(),
        progress: 0.5,
        ..TaskSnapshot::default()
    }
}

#[async_trait]
impl GenerationTransport for ScriptedService {
    async fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> Result<CreateTaskResponse, TransportError> {
        self.creates.lock().expect("lock").push(request.clone());
        Ok(self.create.clone())
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, TransportError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.polled_ids.lock().expect("lock").push(task_id.to_string());
        if let Some(latency) = self.poll_latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.polls.lock().expect("lock").pop_front();
        next.unwrap_or_else(|| Ok(snapshot("IN_PROGRESS")))
    }
}

/// Serves one container for every URL.
pub struct StaticAsset(pub Vec<u8>);

#[async_trait]
impl AssetFetcher for StaticAsset {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, TransportError> {
        Ok(self.0.clone())
    }
}

/// Binary container with a single box mesh under one root node.
pub fn box_glb() -> Vec<u8> {
    let document = json!({
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "name": "model", "children": [1] },
            { "name": "mesh", "mesh": 0 }
        ],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
        "accessors": [
            { "count": 8, "min": [-0.25, -0.25, -0.25], "max": [0.25, 0.25, 0.25] },
            { "count": 36 }
        ]
    });
    let mut json = serde_json::to_vec(&document).expect("document serializes");
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    let total = 12 + 8 + json.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(b"JSON");
    out.extend_from_slice(&json);
    out
}
