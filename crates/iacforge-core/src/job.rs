//! Job model.
//!
//! A [`Job`] is created queued on submission and then only moves forward:
//!
//! ```text
//! queued ──► running ──► succeeded
//!   │           ├──────► failed
//!   │           └──────► cancelled
//!   ├──────────────────► failed      (never started)
//!   └──────────────────► cancelled
//! ```
//!
//! Terminal jobs are immutable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorCategory, JobError};

/// Which engine a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Generate,
    ImageConvert,
    ComplianceCheck,
    CostAnalyze,
}

impl JobKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::ImageConvert => "image-convert",
            Self::ComplianceCheck => "compliance-check",
            Self::CostAnalyze => "cost-analyze",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_become(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => next.is_terminal(),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target syntax for generated code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Terraform native syntax.
    #[default]
    Hcl,
    /// Terraform JSON syntax.
    Json,
}

impl Target {
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Hcl => "text/x-hcl; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hcl => "hcl",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job request as submitted by a client.
///
/// Serialized as `{"kind": "...", "input": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "input", rename_all = "kebab-case")]
pub enum JobRequest {
    Generate {
        description: String,
        #[serde(default)]
        target: Target,
    },
    ImageConvert {
        diagram_artifact_id: String,
        #[serde(default)]
        target: Target,
    },
    ComplianceCheck {
        standard: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code_artifact_id: Option<String>,
    },
    CostAnalyze {
        credential_handle: String,
        region: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_days: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cpu_threshold_percent: Option<f64>,
    },
}

impl JobRequest {
    #[must_use]
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Generate { .. } => JobKind::Generate,
            Self::ImageConvert { .. } => JobKind::ImageConvert,
            Self::ComplianceCheck { .. } => JobKind::ComplianceCheck,
            Self::CostAnalyze { .. } => JobKind::CostAnalyze,
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub message: String,
}

impl ErrorDetail {
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<&EngineError> for ErrorDetail {
    fn from(err: &EngineError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}

/// A unit of asynchronous work and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub request: JobRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh queued job with a random id.
    #[must_use]
    pub fn new(request: JobRequest, dedup_key: Option<String>) -> Self {
        Self {
            id: format!("job_{}", uuid::Uuid::new_v4().simple()),
            kind: request.kind(),
            status: JobStatus::Queued,
            request,
            dedup_key,
            result_artifact_id: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, stamping timestamps.
    ///
    /// # Errors
    ///
    /// - [`JobError::AlreadyTerminal`] if the job is terminal.
    /// - [`JobError::InvalidTransition`] for any other backwards move.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                job_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        if !self.status.can_become(next) {
            return Err(JobError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Mark running.
    ///
    /// # Errors
    ///
    /// See [`transition`](Self::transition).
    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Running)
    }

    /// Mark succeeded with its output artifact.
    ///
    /// # Errors
    ///
    /// See [`transition`](Self::transition).
    pub fn succeed(&mut self, artifact_id: String) -> Result<(), JobError> {
        self.transition(JobStatus::Succeeded)?;
        self.result_artifact_id = Some(artifact_id);
        Ok(())
    }

    /// Mark failed with an explanation.
    ///
    /// # Errors
    ///
    /// See [`transition`](Self::transition).
    pub fn fail(&mut self, detail: ErrorDetail) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(detail);
        Ok(())
    }

    /// Mark cancelled.
    ///
    /// # Errors
    ///
    /// See [`transition`](Self::transition).
    pub fn cancel(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Cancelled)?;
        self.error = Some(ErrorDetail::new(
            ErrorCategory::Cancelled,
            "cancelled by request",
        ));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn generate() -> JobRequest {
        JobRequest::Generate {
            description: "a vpc".to_owned(),
            target: Target::Hcl,
        }
    }

    #[test]
    fn happy_path_stamps_timestamps() {
        let mut job = Job::new(generate(), None);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.id.starts_with("job_"));

        job.start().unwrap();
        assert!(job.started_at.is_some());
        job.succeed("ab".repeat(32)).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.completed_at.is_some());
        assert!(job.result_artifact_id.is_some());
    }

    #[test]
    fn terminal_jobs_are_immutable() {
        let mut job = Job::new(generate(), None);
        job.cancel().unwrap();
        let before = job.clone();

        assert!(matches!(job.start(), Err(JobError::AlreadyTerminal { .. })));
        assert!(matches!(
            job.succeed("x".to_owned()),
            Err(JobError::AlreadyTerminal { .. })
        ));
        assert_eq!(job, before);
    }

    #[test]
    fn running_cannot_go_back_to_queued() {
        let mut job = Job::new(generate(), None);
        job.start().unwrap();
        assert!(matches!(
            job.transition(JobStatus::Queued),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn queued_can_fail_without_running() {
        let mut job = Job::new(generate(), None);
        job.fail(ErrorDetail::new(ErrorCategory::Internal, "interrupted by restart"))
            .unwrap();
        assert!(job.started_at.is_none());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn request_wire_shape() {
        let req: JobRequest = serde_json::from_value(serde_json::json!({
            "kind": "compliance-check",
            "input": { "standard": "CIS Benchmark", "code": "resource \"aws_ebs_volume\" \"d\" {}" }
        }))
        .unwrap();
        assert_eq!(req.kind(), JobKind::ComplianceCheck);

        let req: JobRequest = serde_json::from_value(serde_json::json!({
            "kind": "generate",
            "input": { "description": "a vpc" }
        }))
        .unwrap();
        assert_eq!(
            req,
            JobRequest::Generate {
                description: "a vpc".to_owned(),
                target: Target::Hcl
            }
        );
    }
}
