use crate::error::SketchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    TimedOut,
    #[error("http {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Failures worth another poll: connection trouble, request timeouts,
    /// throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Request(_) | TransportError::TimedOut => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Decode(_) => false,
        }
    }
}

impl From<TransportError> for SketchError {
    fn from(err: TransportError) -> Self {
        SketchError::RemoteFailure {
            message: "transport error".into(),
            detail: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTaskRequest {
    pub ai_model: String,
    pub image_url: String,
    pub enable_pbr: bool,
    pub should_remesh: bool,
    pub should_texture: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelUrls {
    pub glb: Option<String>,
    pub fbx: Option<String>,
    pub obj: Option<String>,
    pub usdz: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskError {
    pub message: Option<String>,
}

/// Reply to a task creation. The service returns the id under `result`,
/// some deployments under `id`; a finished model may come back directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTaskResponse {
    pub result: Option<String>,
    pub id: Option<String>,
    pub status: Option<String>,
    pub model_urls: Option<ModelUrls>,
    pub task_error: Option<TaskError>,
}

impl CreateTaskResponse {
    pub fn task_id(&self) -> Option<&str> {
        non_empty(self.id.as_deref()).or_else(|| non_empty(self.result.as_deref()))
    }

    pub fn glb_url(&self) -> Option<&str> {
        non_empty(self.model_urls.as_ref().and_then(|urls| urls.glb.as_deref()))
    }

    pub fn error_message(&self) -> Option<&str> {
        non_empty(self.task_error.as_ref().and_then(|err| err.message.as_deref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: String,
    pub progress: f32,
    pub model_urls: Option<ModelUrls>,
    pub task_error: Option<TaskError>,
}

impl TaskSnapshot {
    pub fn glb_url(&self) -> Option<&str> {
        non_empty(self.model_urls.as_ref().and_then(|urls| urls.glb.as_deref()))
    }

    pub fn error_message(&self) -> Option<&str> {
        non_empty(self.task_error.as_ref().and_then(|err| err.message.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Request/response exchange with the generation service.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> Result<CreateTaskResponse, TransportError>;

    async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, TransportError>;
}

#[cfg(feature = "remote-http")]
pub use http::HttpTransport;

#[cfg(feature = "remote-http")]
mod http {
    use super::{CreateTaskRequest, CreateTaskResponse, GenerationTransport, TaskSnapshot, TransportError};
    use crate::config::GenerationSettings;
    use async_trait::async_trait;
    use serde::de::DeserializeOwned;
    use url::Url;

    const TASK_PATH: &str = "image-to-3d";

    /// JSON-over-HTTPS transport with bearer authentication on every request.
    pub struct HttpTransport {
        client: reqwest::Client,
        base_url: Url,
        api_key: String,
    }

    impl HttpTransport {
        pub fn new(settings: &GenerationSettings) -> Result<Self, TransportError> {
            let base_url = Url::parse(&settings.base_url)
                .map_err(|err| TransportError::Request(format!("invalid base url: {err}")))?;
            let client = reqwest::Client::builder()
                .timeout(settings.request_timeout())
                .build()
                .map_err(map_reqwest)?;
            Ok(Self {
                client,
                base_url,
                api_key: settings.api_key.clone(),
            })
        }

        /// `{base}/image-to-3d[/{task_id}]` with the id escaped as a single
        /// path segment.
        pub fn task_url(&self, task_id: Option<&str>) -> Result<Url, TransportError> {
            let mut url = self.base_url.clone();
            {
                let mut segments = url.path_segments_mut().map_err(|_| {
                    TransportError::Request(format!("{} cannot be a base url", self.base_url))
                })?;
                segments.pop_if_empty().push(TASK_PATH);
                if let Some(task_id) = task_id {
                    segments.push(task_id);
                }
            }
            Ok(url)
        }

        async fn read_json<T: DeserializeOwned>(
            response: reqwest::Response,
        ) -> Result<T, TransportError> {
            let status = response.status();
            let body = response.text().await.map_err(map_reqwest)?;
            if !status.is_success() {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            serde_json::from_str(&body).map_err(|err| TransportError::Decode(format!("{err}: {body}")))
        }
    }

    #[async_trait]
    impl GenerationTransport for HttpTransport {
        async fn create_task(
            &self,
            request: &CreateTaskRequest,
        ) -> Result<CreateTaskResponse, TransportError> {
            let response = self
                .client
                .post(self.task_url(None)?)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
                .map_err(map_reqwest)?;
            Self::read_json(response).await
        }

        async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, TransportError> {
            let response = self
                .client
                .get(self.task_url(Some(task_id))?)
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(map_reqwest)?;
            Self::read_json(response).await
        }
    }

    pub(crate) fn map_reqwest(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::TimedOut
        } else {
            TransportError::Request(err.to_string())
        }
    }

}

#[cfg(feature = "remote-http")]
pub(crate) use http::map_reqwest;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_response_prefers_id_over_result() {
        let response: CreateTaskResponse =
            serde_json::from_str(r#"{ "result": "from-result", "id": "" }"#).expect("json");
        assert_eq!(response.task_id(), Some("from-result"));

        let response: CreateTaskResponse =
            serde_json::from_str(r#"{ "result": "from-result", "id": "from-id" }"#).expect("json");
        assert_eq!(response.task_id(), Some("from-id"));
        assert_eq!(response.glb_url(), None);
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snapshot: TaskSnapshot = serde_json::from_str(
            r#"{ "status": "FAILED", "task_error": { "message": "bad image" }, "extra": 1 }"#,
        )
        .expect("json");
        assert_eq!(snapshot.progress, 0.0);
        assert_eq!(snapshot.error_message(), Some("bad image"));
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = TransportError::Status {
            status: 503,
            body: String::new(),
        };
        let client = TransportError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(TransportError::TimedOut.is_transient());
        assert!(!TransportError::Decode("x".into()).is_transient());
    }

    #[test]
    fn transport_errors_surface_as_remote_failures_with_detail() {
        let err = SketchError::from(TransportError::TimedOut);
        assert_eq!(err.to_string(), "remote generation failed: transport error (request timed out)");
    }
}
