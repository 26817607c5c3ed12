//! Client for the remote image-to-3D service: submit a sketch, poll the job
//! until it settles, then import the resulting model.

pub mod data_uri;
pub mod glb;
pub mod import;
pub mod transport;

pub use data_uri::{DEFAULT_MIME, make_data_uri};
pub use glb::{GlbAsset, GlbError, parse_glb};
pub use import::{AssetFetcher, AssetImporter};
pub use transport::{
    CreateTaskRequest, CreateTaskResponse, GenerationTransport, TaskSnapshot, TransportError,
};

#[cfg(feature = "remote-http")]
pub use import::HttpAssetFetcher;
#[cfg(feature = "remote-http")]
pub use transport::HttpTransport;

use crate::config::GenerationSettings;
use crate::error::{SketchError, SketchResult, cancellable};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request model options.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub ai_model: String,
    pub enable_pbr: bool,
    pub should_remesh: bool,
    pub should_texture: bool,
}

impl GenerationOptions {
    /// PBR maps are only produced for textured models, so PBR forces texturing.
    pub fn effective_should_texture(&self) -> bool {
        self.should_texture || self.enable_pbr
    }

    fn to_request(&self, image_url: String) -> CreateTaskRequest {
        CreateTaskRequest {
            ai_model: self.ai_model.clone(),
            image_url,
            enable_pbr: self.enable_pbr,
            should_remesh: self.should_remesh,
            should_texture: self.effective_should_texture(),
        }
    }
}

impl From<&GenerationSettings> for GenerationOptions {
    fn from(settings: &GenerationSettings) -> Self {
        Self {
            ai_model: settings.ai_model.clone(),
            enable_pbr: settings.enable_pbr,
            should_remesh: settings.should_remesh,
            should_texture: settings.should_texture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    /// Case-insensitive mapping of a service status; anything unrecognised
    /// keeps the job running.
    pub fn classify(status: &str) -> JobStatus {
        let status = status.trim();
        if status.eq_ignore_ascii_case("SUCCEEDED") {
            JobStatus::Succeeded
        } else if status.eq_ignore_ascii_case("FAILED") {
            JobStatus::Failed
        } else if status.eq_ignore_ascii_case("PENDING") {
            JobStatus::Pending
        } else {
            JobStatus::InProgress
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

/// Client-side view of one remote job. The deadline is fixed when the job
/// is created and terminal states never change again.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    id: String,
    status: JobStatus,
    result_url: Option<String>,
    error: Option<String>,
    progress: f32,
    submitted_at: Instant,
    deadline: Instant,
}

impl GenerationJob {
    pub fn new(id: impl Into<String>, submitted_at: Instant, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            result_url: None,
            error: None,
            progress: 0.0,
            submitted_at,
            deadline: submitted_at + timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Folds a poll response into the job and returns the new status.
    pub fn apply(&mut self, snapshot: &TaskSnapshot) -> JobStatus {
        if self.is_terminal() {
            return self.status;
        }
        let status = JobStatus::classify(&snapshot.status);
        self.progress = snapshot.progress;
        match status {
            JobStatus::Succeeded => self.result_url = snapshot.glb_url().map(str::to_string),
            JobStatus::Failed => {
                self.error = Some(
                    snapshot
                        .error_message()
                        .unwrap_or("task failed")
                        .to_string(),
                )
            }
            _ => {}
        }
        self.status = status;
        status
    }

    pub fn mark_timed_out(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::TimedOut;
        }
    }
}

/// Result of a submission: either a finished model or a job to poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobHandle {
    Ready(String),
    Pending(GenerationJob),
}

enum PollFailure {
    Transient(TransportError),
    Fatal(SketchError),
}

impl From<PollFailure> for SketchError {
    fn from(failure: PollFailure) -> Self {
        match failure {
            PollFailure::Transient(err) => err.into(),
            PollFailure::Fatal(err) => err,
        }
    }
}

pub struct GenerationClient<T> {
    transport: T,
    settings: GenerationSettings,
}

impl<T: GenerationTransport> GenerationClient<T> {
    pub fn new(transport: T, settings: GenerationSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Starts a job for `image`, given as raw base64 or a data URI.
    pub async fn submit(
        &self,
        image: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> SketchResult<JobHandle> {
        self.require_api_key()?;
        let image_url = make_data_uri(image, DEFAULT_MIME)
            .ok_or_else(|| SketchError::InvalidInput("image is not valid base64 or a data URI".into()))?;
        let request = options.to_request(image_url);

        let submitted_at = Instant::now();
        let response = cancellable(cancel, async {
            self.transport
                .create_task(&request)
                .await
                .map_err(SketchError::from)
        })
        .await?;

        if let Some(message) = response.error_message() {
            return Err(SketchError::remote(message));
        }
        if let Some(url) = response.glb_url() {
            log::info!("[generation] model ready at submission");
            return Ok(JobHandle::Ready(url.to_string()));
        }
        let id = response
            .task_id()
            .ok_or_else(|| SketchError::remote("create response carries neither a model url nor a task id"))?;
        log::info!("[generation] submitted task {id}");
        Ok(JobHandle::Pending(GenerationJob::new(
            id,
            submitted_at,
            self.settings.total_timeout(),
        )))
    }

    /// One status request for `job`. Transport failures come back as
    /// `RemoteFailure` with the transport detail.
    pub async fn poll(
        &self,
        job: &mut GenerationJob,
        cancel: &CancellationToken,
    ) -> SketchResult<JobStatus> {
        self.poll_once(job, cancel).await.map_err(SketchError::from)
    }

    async fn poll_once(
        &self,
        job: &mut GenerationJob,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, PollFailure> {
        if job.is_terminal() {
            return Ok(job.status());
        }
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollFailure::Fatal(SketchError::Cancelled)),
            result = self.transport.get_task(job.id()) => result.map_err(PollFailure::Transient)?,
        };
        let status = job.apply(&snapshot);
        log::debug!(
            "[generation] task {} is {status:?} ({:.1}%)",
            job.id(),
            job.progress() * 100.0
        );
        Ok(status)
    }

    /// Polls at a fixed interval until the job settles, the deadline set at
    /// submission passes, or `cancel` fires.
    pub async fn wait_for_result(
        &self,
        mut job: GenerationJob,
        cancel: &CancellationToken,
    ) -> SketchResult<String> {
        let interval = self.settings.poll_interval();
        let mut transient_failures = 0;
        let mut first = true;

        loop {
            if !first {
                let now = Instant::now();
                if now >= job.deadline() {
                    return Err(self.time_out(&mut job));
                }
                let wake = (now + interval).min(job.deadline());
                cancellable(cancel, async {
                    tokio::time::sleep_until(wake).await;
                    Ok(())
                })
                .await?;
                if Instant::now() >= job.deadline() {
                    return Err(self.time_out(&mut job));
                }
            }
            first = false;

            match self.poll_once(&mut job, cancel).await {
                Ok(JobStatus::Succeeded) => {
                    return job.result_url().map(str::to_string).ok_or_else(|| {
                        SketchError::remote(format!("task {} succeeded without a glb url", job.id()))
                    });
                }
                Ok(JobStatus::Failed) => {
                    return Err(SketchError::remote(job.error().unwrap_or("task failed")));
                }
                Ok(_) => transient_failures = 0,
                Err(PollFailure::Transient(err))
                    if err.is_transient() && transient_failures < self.settings.transport_retries =>
                {
                    transient_failures += 1;
                    log::warn!(
                        "[generation] poll of {} failed ({err}); retry {transient_failures}/{}",
                        job.id(),
                        self.settings.transport_retries
                    );
                }
                Err(failure) => return Err(failure.into()),
            }
        }
    }

    /// Submits `image` and waits for the model URL.
    pub async fn generate(
        &self,
        image: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> SketchResult<String> {
        match self.submit(image, options, cancel).await? {
            JobHandle::Ready(url) => Ok(url),
            JobHandle::Pending(job) => self.wait_for_result(job, cancel).await,
        }
    }

    /// Picks up an already submitted job; its deadline starts now.
    pub async fn resume(&self, job_id: &str, cancel: &CancellationToken) -> SketchResult<String> {
        self.require_api_key()?;
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(SketchError::InvalidInput("task id is empty".into()));
        }
        let job = GenerationJob::new(job_id, Instant::now(), self.settings.total_timeout());
        self.wait_for_result(job, cancel).await
    }

    fn require_api_key(&self) -> SketchResult<()> {
        if self.settings.api_key.trim().is_empty() {
            return Err(SketchError::InvalidInput("API key is empty".into()));
        }
        Ok(())
    }

    fn time_out(&self, job: &mut GenerationJob) -> SketchError {
        job.mark_timed_out();
        log::warn!("[generation] task {} timed out", job.id());
        SketchError::Timeout(self.settings.total_timeout())
    }
}

/// Reads a text file holding base64 or a data URI.
pub fn image_from_file(path: impl AsRef<Path>) -> SketchResult<String> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|err| SketchError::InvalidInput(format!("failed to read {}: {err}", path.display())))?;
    if content.trim().is_empty() {
        return Err(SketchError::InvalidInput(format!("{} is empty", path.display())));
    }
    Ok(content)
}
