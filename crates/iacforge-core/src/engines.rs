//! The engines behind the executor, wired into one [`JobRunner`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::compliance;
use crate::cost::{AnalyzeOptions, CostAnalyzer};
use crate::credential::{self, CredentialManager};
use crate::error::{ComplianceError, EngineError};
use crate::executor::{CancelToken, JobOutput, JobRunner};
use crate::generate::{Generated, Generator, description};
use crate::hcl;
use crate::job::{Job, JobRequest};

const REPORT_CONTENT_TYPE: &str = "application/json";

/// Dispatches each job kind to its engine.
pub struct Engines {
    generator: Generator,
    artifacts: Arc<ArtifactStore>,
    credentials: Arc<CredentialManager>,
    analyzer: CostAnalyzer,
}

impl Engines {
    #[must_use]
    pub fn new(
        generator: Generator,
        artifacts: Arc<ArtifactStore>,
        credentials: Arc<CredentialManager>,
        analyzer: CostAnalyzer,
    ) -> Self {
        Self {
            generator,
            artifacts,
            credentials,
            analyzer,
        }
    }

    /// Inline code, or the text of the referenced artifact.
    async fn compliance_source(
        &self,
        code: Option<&String>,
        code_artifact_id: Option<&String>,
    ) -> Result<String, EngineError> {
        match (code, code_artifact_id) {
            (Some(code), None) => Ok(code.clone()),
            (None, Some(id)) => {
                let (_, bytes) = self.artifacts.get(id).await?;
                String::from_utf8(bytes)
                    .map_err(|_| EngineError::input(format!("artifact {id} is not UTF-8 text")))
            }
            _ => Err(EngineError::input(
                "exactly one of code or code_artifact_id is required",
            )),
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

fn terraform(generated: Generated) -> JobOutput {
    JobOutput {
        kind: ArtifactKind::TerraformText,
        content_type: generated.target.content_type().to_owned(),
        content: generated.text.into_bytes(),
    }
}

fn report<T: Serialize>(kind: ArtifactKind, value: &T) -> Result<JobOutput, EngineError> {
    let mut content = serde_json::to_vec_pretty(value).map_err(|e| EngineError::Internal {
        reason: format!("report serialization failed: {e}"),
    })?;
    content.push(b'\n');
    Ok(JobOutput {
        kind,
        content_type: REPORT_CONTENT_TYPE.to_owned(),
        content,
    })
}

#[async_trait]
impl JobRunner for Engines {
    async fn validate(&self, request: &JobRequest) -> Result<(), EngineError> {
        match request {
            JobRequest::Generate {
                description: text, ..
            } => {
                description::interpret(text)?;
            }
            JobRequest::ImageConvert {
                diagram_artifact_id,
                ..
            } => {
                self.artifacts.meta(diagram_artifact_id).await?;
            }
            JobRequest::ComplianceCheck {
                standard,
                code,
                code_artifact_id,
            } => {
                compliance::resolve(standard)?;
                match (code, code_artifact_id) {
                    (Some(code), None) => {
                        hcl::parse(code).map_err(ComplianceError::from)?;
                    }
                    (None, Some(id)) => {
                        self.artifacts.meta(id).await?;
                    }
                    _ => {
                        return Err(EngineError::input(
                            "exactly one of code or code_artifact_id is required",
                        ));
                    }
                }
            }
            JobRequest::CostAnalyze {
                credential_handle,
                region,
                window_days,
                cpu_threshold_percent,
            } => {
                AnalyzeOptions::new(*window_days, *cpu_threshold_percent)?;
                if !credential::is_supported_region(region) {
                    return Err(EngineError::input(format!("unsupported region '{region}'")));
                }
                self.credentials.resolve(credential_handle).await?;
            }
        }
        Ok(())
    }

    async fn run(&self, job: &Job, cancel: CancelToken) -> Result<JobOutput, EngineError> {
        cancel.check()?;
        debug!(job_id = %job.id, kind = %job.kind, "engine started");
        match &job.request {
            JobRequest::Generate {
                description,
                target,
            } => Ok(terraform(self.generator.generate(description, *target)?)),
            JobRequest::ImageConvert {
                diagram_artifact_id,
                target,
            } => {
                let (meta, bytes) = self.artifacts.get(diagram_artifact_id).await?;
                cancel.check()?;
                let generated = self
                    .generator
                    .convert(&bytes, &meta.content_type, *target)
                    .await?;
                Ok(terraform(generated))
            }
            JobRequest::ComplianceCheck {
                standard,
                code,
                code_artifact_id,
            } => {
                let source = self
                    .compliance_source(code.as_ref(), code_artifact_id.as_ref())
                    .await?;
                cancel.check()?;
                let findings = compliance::check(&source, standard)?;
                report(ArtifactKind::FindingReport, &findings)
            }
            JobRequest::CostAnalyze {
                credential_handle,
                region,
                window_days,
                cpu_threshold_percent,
            } => {
                let options = AnalyzeOptions::new(*window_days, *cpu_threshold_percent)?;
                let analysis = self
                    .analyzer
                    .analyze(credential_handle, region, options)
                    .await?;
                report(ArtifactKind::CostReport, &analysis)
            }
        }
    }
}
