//! # Jenkins Client
//!
//! Reads the last completed build of upstream jobs and checks that jobs
//! referenced by targets exist.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::error_for_status;
use super::retry::send_with_retry;
use crate::model::UpstreamBuild;
use crate::providers::CiJobs;

#[derive(Debug, Deserialize)]
struct BuildResponse {
    number: u64,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    actions: Vec<BuildAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildAction {
    #[serde(default)]
    last_built_revision: Option<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    #[serde(rename = "SHA1")]
    sha1: String,
}

impl BuildResponse {
    fn into_build(self) -> UpstreamBuild {
        let commit_sha = self
            .actions
            .into_iter()
            .find_map(|action| action.last_built_revision)
            .map(|revision| revision.sha1)
            .unwrap_or_default();
        UpstreamBuild {
            number: self.number,
            result: self.result.unwrap_or_default(),
            commit_sha,
        }
    }
}

/// Jenkins JSON API client for a set of named instances
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    http: Client,
    instances: BTreeMap<String, String>,
    user: Option<String>,
    token: Option<String>,
    max_retries: u32,
}

impl JenkinsClient {
    #[must_use]
    pub fn new(http: Client, user: Option<String>, token: Option<String>) -> Self {
        Self {
            http,
            instances: BTreeMap::new(),
            user,
            token,
            max_retries: crate::constants::DEFAULT_HTTP_MAX_RETRIES,
        }
    }

    /// Register an instance name with its server url
    #[must_use]
    pub fn with_instance(mut self, name: impl Into<String>, server_url: impl Into<String>) -> Self {
        let server_url: String = server_url.into();
        self.instances
            .insert(name.into(), server_url.trim_end_matches('/').to_string());
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn server_url(&self, instance: &str) -> Result<&str> {
        self.instances
            .get(instance)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Unknown Jenkins instance '{instance}'"))
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.http.get(url);
        match (&self.user, &self.token) {
            (Some(user), token) => request.basic_auth(user, token.as_ref()),
            (None, Some(token)) => request.bearer_auth(token),
            (None, None) => request,
        }
    }
}

#[async_trait]
impl CiJobs for JenkinsClient {
    async fn latest_build(&self, instance: &str, job: &str) -> Result<UpstreamBuild> {
        let url = format!(
            "{}/job/{job}/lastCompletedBuild/api/json",
            self.server_url(instance)?
        );
        let request = self.get(&url).query(&[(
            "tree",
            "number,result,actions[lastBuiltRevision[SHA1]]",
        )]);
        let response = send_with_retry(request, self.max_retries).await?;
        let response = error_for_status(response, &format!("{instance}/{job}")).await?;
        Ok(response.json::<BuildResponse>().await?.into_build())
    }

    fn job_url(&self, instance: &str, job: &str) -> String {
        match self.instances.get(instance) {
            Some(url) => format!("{url}/job/{job}"),
            None => format!("{instance}/job/{job}"),
        }
    }

    async fn job_exists(
        &self,
        instance: &str,
        job: &str,
        repo_url: &str,
        reference: &str,
    ) -> Result<bool> {
        let url = format!("{}/job/{job}/config.xml", self.server_url(instance)?);
        let response = send_with_retry(self.get(&url), self.max_retries).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let config = error_for_status(response, &format!("{instance}/{job}"))
            .await?
            .text()
            .await?;
        Ok(config.contains(repo_url.trim_end_matches('/')) && config.contains(reference))
    }
}
