//! HTTP job backend
//!
//! Talks to a worker pool gateway that exposes:
//! - `POST {base}/jobs` with a JSON `JobRequest`, answering `{"job_id": "..."}`
//! - `GET {base}/jobs/{job_id}`, answering a job report in broker vocabulary
//!
//! A 404 on a status query means the broker has not seen the job yet and is
//! reported as `PENDING`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use super::{JobBackend, JobRequest};
use crate::config::BackendConfig;
use crate::errors::{BackendError, BackendResult};
use crate::models::{JobHandle, JobReport, RemoteJobState};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Clone)]
pub struct HttpJobBackend {
    client: Client,
    base_url: Url,
}

impl HttpJobBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> BackendResult<Self> {
        let base_url = Url::parse(base_url).map_err(|_| BackendError::InvalidEndpoint {
            url: base_url.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidEndpoint {
                url: base_url.to_string(),
            });
        }

        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        Self::new(&config.base_url, config.request_timeout)
    }

    fn jobs_url(&self, job: Option<&JobHandle>) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::InvalidEndpoint {
                    url: self.base_url.to_string(),
                })?;
            segments.pop_if_empty().push("jobs");
            if let Some(job) = job {
                segments.push(job.as_str());
            }
        }
        Ok(url)
    }

    async fn rejection(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let message = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        BackendError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn submit_job(&self, request: &JobRequest) -> BackendResult<JobHandle> {
        let url = self.jobs_url(None)?;
        trace!("POST {} for source {}", url, request.source_id);

        let response = self.client.post(url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let body: SubmitResponse = response.json().await?;
        debug!(
            "Backend accepted {} for source {} as job {}",
            request.method, request.source_id, body.job_id
        );
        Ok(JobHandle::new(body.job_id))
    }

    async fn query_job(&self, job: &JobHandle) -> BackendResult<JobReport> {
        let url = self.jobs_url(Some(job))?;
        trace!("GET {}", url);

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(JobReport::new(RemoteJobState::Pending)),
            status if status.is_success() => Ok(response.json().await?),
            _ => Err(Self::rejection(response).await),
        }
    }
}
