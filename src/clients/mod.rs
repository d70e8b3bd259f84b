//! # HTTP Collaborators
//!
//! `reqwest` implementations of the collaborator traits:
//!
//! - `git`: GitHub/GitLab commits, archives and template files
//! - `template`: OpenShift template processing
//! - `registry`: Docker registry v2 manifest digests
//! - `jenkins`: Jenkins JSON API
//! - `prometheus`: SLO queries
//! - `secrets`: file and in-memory secret readers

use anyhow::{Context, Result};
use std::time::Duration;

pub mod git;
pub mod jenkins;
pub mod prometheus;
pub mod registry;
pub mod retry;
pub mod secrets;
pub mod template;

pub use git::GitClient;
pub use jenkins::JenkinsClient;
pub use prometheus::PrometheusSloEvaluator;
pub use registry::RegistryClient;
pub use secrets::{FileSecretReader, MapSecretReader};

/// Shared HTTP client with a request timeout
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("saas-herder/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Fail with the response body when the status is not a success
pub(crate) async fn error_for_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{what} returned {status}: {}", body.chars().take(200).collect::<String>())
}
