//! # Image Registry Client
//!
//! Resolves `image:tag` references to manifest digests through the Docker
//! Registry HTTP API v2.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, Method};
use tracing::debug;

use super::error_for_status;
use super::retry::send_with_retry;
use crate::providers::ImageRegistry;

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

const MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    /// Tag, or digest when the reference is pinned with `@sha256:...`
    pub reference: String,
}

impl ImageReference {
    /// Parse `[registry/]repository[:tag|@digest]`; the tag defaults to `latest`
    pub fn parse(image: &str) -> Result<Self> {
        let (name, reference) = match image.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => {
                let last_slash = image.rfind('/').map_or(0, |idx| idx + 1);
                match image[last_slash..].rfind(':') {
                    Some(colon) => (
                        &image[..last_slash + colon],
                        image[last_slash + colon + 1..].to_string(),
                    ),
                    None => (image, "latest".to_string()),
                }
            }
        };
        if name.is_empty() || reference.is_empty() {
            return Err(anyhow!("Invalid image reference: {image}"));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                (host.to_string(), rest.to_string())
            }
            _ => (DOCKER_HUB.to_string(), name.to_string()),
        };
        let (registry, repository) = if registry == DOCKER_HUB {
            let repository = if repository.contains('/') {
                repository
            } else {
                format!("library/{repository}")
            };
            (DOCKER_HUB_REGISTRY.to_string(), repository)
        } else {
            (registry, repository)
        };

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    #[must_use]
    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }
}

/// Registry v2 client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    token: Option<String>,
    scheme: &'static str,
    max_retries: u32,
}

impl RegistryClient {
    #[must_use]
    pub fn new(http: Client, token: Option<String>) -> Self {
        Self {
            http,
            token,
            scheme: "https",
            max_retries: crate::constants::DEFAULT_HTTP_MAX_RETRIES,
        }
    }

    /// Talk to registries over plain HTTP (local registries and tests)
    #[must_use]
    pub fn with_plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn manifest_digest(&self, image: &ImageReference, method: Method) -> Result<Option<String>> {
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme, image.registry, image.repository, image.reference
        );
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES.join(", "));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = send_with_retry(request, self.max_retries).await?;
        let response = error_for_status(response, &format!("{method} {url}")).await?;
        Ok(digest_header(response.headers()))
    }
}

fn digest_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DIGEST_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn resolve_digest(&self, image_ref: &str) -> Result<String> {
        let image = ImageReference::parse(image_ref)?;
        if image.is_digest() {
            return Ok(image.reference);
        }

        // Some registries only send the digest header on GET
        let digest = match self.manifest_digest(&image, Method::HEAD).await? {
            Some(digest) => digest,
            None => self
                .manifest_digest(&image, Method::GET)
                .await?
                .ok_or_else(|| anyhow!("Registry did not return a digest for {image_ref}"))?,
        };
        debug!("Resolved {image_ref} to {digest}");
        Ok(digest)
    }
}
