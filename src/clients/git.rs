//! # Git Hosting Client
//!
//! Resolves refs, builds archive urls and fetches manifest files from GitHub
//! and GitLab. Repositories hosted on `github.com` go through the GitHub REST
//! API; every other host is treated as a GitLab instance.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tracing::debug;

use super::retry::send_with_retry;
use super::{error_for_status, template};
use crate::model::{is_commit_sha, Parameters};
use crate::providers::{ArchiveInfo, RenderedTemplate, TemplateRenderer, Vcs};

const GITHUB_JSON: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct GithubCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitlabCommit {
    id: String,
}

/// Repository coordinates parsed from its browser url
#[derive(Debug, Clone, PartialEq, Eq)]
enum Repository {
    Github { owner: String, name: String },
    Gitlab { base: Url, project: String },
}

impl Repository {
    fn parse(repo_url: &str) -> Result<Self> {
        let url = Url::parse(repo_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid repository url: {repo_url}"))?;
        let project = url
            .path()
            .trim_matches('/')
            .trim_end_matches(".git")
            .to_string();
        if project.is_empty() {
            return Err(anyhow!("Repository url has no project path: {repo_url}"));
        }

        if url.host_str() == Some("github.com") {
            let (owner, name) = project
                .split_once('/')
                .ok_or_else(|| anyhow!("GitHub url must be owner/repo: {repo_url}"))?;
            return Ok(Self::Github {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        let mut base = url.clone();
        base.set_path("");
        base.set_query(None);
        Ok(Self::Gitlab { base, project })
    }

    fn name(&self) -> &str {
        match self {
            Self::Github { name, .. } => name,
            Self::Gitlab { project, .. } => project.rsplit('/').next().unwrap_or(project.as_str()),
        }
    }
}

/// GitHub and GitLab client
#[derive(Debug, Clone)]
pub struct GitClient {
    http: Client,
    github_api_url: String,
    github_token: Option<String>,
    gitlab_token: Option<String>,
    max_retries: u32,
    hash_length: usize,
}

impl GitClient {
    #[must_use]
    pub fn new(http: Client, github_api_url: impl Into<String>, hash_length: usize) -> Self {
        Self {
            http,
            github_api_url: github_api_url.into().trim_end_matches('/').to_string(),
            github_token: None,
            gitlab_token: None,
            max_retries: crate::constants::DEFAULT_HTTP_MAX_RETRIES,
            hash_length,
        }
    }

    #[must_use]
    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    #[must_use]
    pub fn with_gitlab_token(mut self, token: Option<String>) -> Self {
        self.gitlab_token = token;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn github_request(&self, path: &str, accept: &str) -> RequestBuilder {
        let request = self
            .http
            .get(format!("{}{path}", self.github_api_url))
            .header("Accept", accept);
        match &self.github_token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    fn gitlab_request(&self, base: &Url, project: &str, tail: &[&str]) -> Result<RequestBuilder> {
        let mut url = base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| anyhow!("GitLab url cannot be a base: {base}"))?;
            segments.clear();
            segments.extend(["api", "v4", "projects", project]);
            segments.extend(tail);
        }
        let request = self.http.get(url);
        Ok(match &self.gitlab_token {
            Some(token) => request.header("PRIVATE-TOKEN", token),
            None => request,
        })
    }

    async fn fetch_file(&self, repo_url: &str, path: &str, commit_sha: &str) -> Result<String> {
        let path = path.trim_start_matches('/');
        let request = match Repository::parse(repo_url)? {
            Repository::Github { owner, name } => self
                .github_request(
                    &format!("/repos/{owner}/{name}/contents/{path}"),
                    "application/vnd.github.raw",
                )
                .query(&[("ref", commit_sha)]),
            Repository::Gitlab { base, project } => self
                .gitlab_request(&base, &project, &["repository", "files", path, "raw"])?
                .query(&[("ref", commit_sha)]),
        };
        let response = send_with_retry(request, self.max_retries).await?;
        let response = error_for_status(response, &format!("fetching {repo_url}:{path}")).await?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read {repo_url}:{path}"))
    }
}

#[async_trait]
impl Vcs for GitClient {
    async fn resolve_commit(&self, repo_url: &str, reference: &str) -> Result<String> {
        let repository = Repository::parse(repo_url)?;
        let request = match &repository {
            Repository::Github { owner, name } => self.github_request(
                &format!("/repos/{owner}/{name}/commits/{reference}"),
                GITHUB_JSON,
            ),
            Repository::Gitlab { base, project } => {
                self.gitlab_request(base, project, &["repository", "commits", reference])?
            }
        };
        let response = send_with_retry(request, self.max_retries).await?;
        let response =
            error_for_status(response, &format!("resolving {repo_url}@{reference}")).await?;

        let sha = match repository {
            Repository::Github { .. } => response.json::<GithubCommit>().await?.sha,
            Repository::Gitlab { .. } => response.json::<GitlabCommit>().await?.id,
        };
        debug!("Resolved {repo_url}@{reference} to {sha}");
        Ok(sha)
    }

    async fn archive_info(&self, repo_url: &str, commit_sha: &str) -> Result<ArchiveInfo> {
        let repository = Repository::parse(repo_url)?;
        let info = match &repository {
            Repository::Github { owner, name } => ArchiveInfo {
                file_name: format!("{owner}-{name}-{commit_sha}.tar.gz"),
                url: format!(
                    "{}/repos/{owner}/{name}/tarball/{commit_sha}",
                    self.github_api_url
                ),
            },
            Repository::Gitlab { .. } => {
                let name = repository.name();
                let file_name = format!("{name}-{commit_sha}.tar.gz");
                ArchiveInfo {
                    url: format!(
                        "{}/-/archive/{commit_sha}/{file_name}",
                        repo_url.trim_end_matches('/')
                    ),
                    file_name,
                }
            }
        };
        Ok(info)
    }
}

#[async_trait]
impl TemplateRenderer for GitClient {
    async fn render(
        &self,
        url: &str,
        path: &str,
        reference: &str,
        parameters: &Parameters,
    ) -> Result<RenderedTemplate> {
        let commit_sha = if is_commit_sha(reference) {
            reference.to_string()
        } else {
            self.resolve_commit(url, reference).await?
        };
        let content = self.fetch_file(url, path, &commit_sha).await?;
        let resources = template::process(&content, parameters, &commit_sha, self.hash_length)
            .with_context(|| format!("Failed to process {url}:{path}"))?;
        Ok(RenderedTemplate {
            resources,
            commit_sha,
        })
    }
}
