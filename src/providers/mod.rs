//! # Collaborator Traits
//!
//! External systems the engine consults. Each trait returns a value or a
//! failure; timeouts and retries belong to the implementation.
//!
//! HTTP implementations live in [`crate::clients`]. Tests use in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Parameters, SecretRef, SloDocument, UpstreamBuild};

/// Download location of a repository snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub file_name: String,
    pub url: String,
}

/// An SLO currently below its target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachedSlo {
    pub document: String,
    pub name: String,
    pub current_value: f64,
    pub target: f64,
}

/// Manifests rendered from a resource template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub resources: Vec<serde_json::Value>,
    /// Commit the ref resolved to while rendering
    pub commit_sha: String,
}

/// Version control system
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Resolve a branch or tag to its current head commit
    async fn resolve_commit(&self, repo_url: &str, reference: &str) -> Result<String>;

    /// Archive download info for a commit
    async fn archive_info(&self, repo_url: &str, commit_sha: &str) -> Result<ArchiveInfo>;
}

/// CI job system
#[async_trait]
pub trait CiJobs: Send + Sync {
    /// Latest completed build of a job
    async fn latest_build(&self, instance: &str, job: &str) -> Result<UpstreamBuild>;

    /// Browser url of a job, used in trigger reasons
    fn job_url(&self, instance: &str, job: &str) -> String;

    /// Whether a job exists that builds `repo_url` at `reference`
    async fn job_exists(
        &self,
        instance: &str,
        job: &str,
        repo_url: &str,
        reference: &str,
    ) -> Result<bool>;
}

/// Container image registry
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Resolve `image:tag` to its content digest
    async fn resolve_digest(&self, image_ref: &str) -> Result<String>;
}

/// SLO evaluation backend
#[async_trait]
pub trait SloEvaluator: Send + Sync {
    /// SLOs of `documents` breached for the namespace
    async fn breached_slos(
        &self,
        namespace: &str,
        cluster: &str,
        documents: &[SloDocument],
    ) -> Result<Vec<BreachedSlo>>;
}

/// Manifest templating backend
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        path: &str,
        reference: &str,
        parameters: &Parameters,
    ) -> Result<RenderedTemplate>;
}

/// Secret store
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read(&self, secret: &SecretRef) -> Result<String>;
}
