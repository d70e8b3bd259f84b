//! Common test utilities for engine integration tests
//!
//! In-memory collaborators and bundle fixture builders shared by the test
//! binaries.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use saas_herder::model::{
    is_commit_sha, App, CiInstance, Cluster, CodeComponent, Environment, Namespace, Parameters,
    PipelinesProvider, ResourceTemplate, SaasFile, SecretRef, Slo, SloDocument, SloNamespace,
    SloParameters, Target, TargetPromotion, Upstream, UpstreamBuild,
};
use saas_herder::providers::{
    ArchiveInfo, BreachedSlo, CiJobs, ImageRegistry, RenderedTemplate, SecretReader,
    SloEvaluator, TemplateRenderer, Vcs,
};
use saas_herder::state::{MemoryStateStore, StateStore};
use saas_herder::{Collaborators, HerderSettings, SaasHerder};

pub const REPO: &str = "https://github.com/app-sre/web";
pub const OTHER_REPO: &str = "https://github.com/app-sre/api";
pub const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const SHA_C: &str = "cccccccccccccccccccccccccccccccccccccccc";

// ============================================================================
// Fixtures
// ============================================================================

pub fn namespace(cluster: &str, name: &str, environment: &str) -> Namespace {
    Namespace {
        name: name.to_string(),
        cluster: Cluster {
            name: cluster.to_string(),
            server_url: None,
        },
        environment: Environment {
            name: environment.to_string(),
            parameters: None,
        },
        app: None,
    }
}

pub fn target(cluster: &str, ns: &str, environment: &str, reference: &str) -> Target {
    Target {
        name: None,
        namespace: namespace(cluster, ns, environment),
        reference: reference.to_string(),
        parameters: None,
        secret_parameters: None,
        images: None,
        upstream: None,
        promotion: None,
        disable: None,
        delete: None,
        slos: None,
    }
}

pub fn resource_template(name: &str, url: &str, targets: Vec<Target>) -> ResourceTemplate {
    ResourceTemplate {
        name: name.to_string(),
        url: url.to_string(),
        path: "/openshift/template.yaml".to_string(),
        hash_length: None,
        parameters: None,
        targets,
    }
}

pub fn saas_file(name: &str, resource_templates: Vec<ResourceTemplate>) -> SaasFile {
    SaasFile {
        name: name.to_string(),
        app: App {
            name: "web".to_string(),
            code_components: Vec::new(),
        },
        pipelines_provider: PipelinesProvider {
            name: "tekton-app-sre".to_string(),
            provider: "tekton".to_string(),
        },
        managed_resource_types: vec!["Deployment".to_string(), "ConfigMap".to_string()],
        parameters: None,
        publish_job_logs: None,
        takeover: None,
        compare: None,
        timeout: None,
        resource_templates,
    }
}

/// Single SaaS file with a single resource template on `REPO`
pub fn bundle(targets: Vec<Target>) -> Vec<SaasFile> {
    vec![saas_file("web", vec![resource_template("web", REPO, targets)])]
}

pub fn code_component(url: &str, hotfix: &[&str], blocked: &[&str]) -> CodeComponent {
    CodeComponent {
        url: url.to_string(),
        hotfix_versions: Some(hotfix.iter().map(ToString::to_string).collect()),
        blocked_versions: Some(blocked.iter().map(ToString::to_string).collect()),
    }
}

pub fn promotion(publish: &[&str], subscribe: &[&str]) -> TargetPromotion {
    let channels = |names: &[&str]| {
        (!names.is_empty()).then(|| names.iter().map(ToString::to_string).collect())
    };
    TargetPromotion {
        publish: channels(publish),
        subscribe: channels(subscribe),
        ..TargetPromotion::default()
    }
}

pub fn upstream(instance: &str, job: &str) -> Upstream {
    Upstream {
        instance: CiInstance {
            name: instance.to_string(),
            server_url: None,
        },
        name: job.to_string(),
    }
}

pub fn slo_document(name: &str, cluster: &str, ns: &str) -> SloDocument {
    SloDocument {
        name: name.to_string(),
        namespaces: vec![SloNamespace {
            name: ns.to_string(),
            cluster: cluster.to_string(),
            slo_namespace: None,
        }],
        slos: vec![Slo {
            name: "availability".to_string(),
            expr: "sum(rate(http_requests_total{code!~\"5..\"}[{{window}}]))".to_string(),
            sli_type: "availability".to_string(),
            slo_target: 0.99,
            slo_target_unit: "percent_0_1".to_string(),
            slo_parameters: SloParameters {
                window: "28d".to_string(),
            },
        }],
    }
}

pub fn parameters(entries: &[(&str, Value)]) -> Parameters {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn secret_ref(path: &str, field: &str) -> SecretRef {
    SecretRef {
        path: path.to_string(),
        field: field.to_string(),
        version: None,
        format: None,
    }
}

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Default)]
pub struct FakeVcs {
    commits: HashMap<String, String>,
    pub resolves: AtomicUsize,
}

impl FakeVcs {
    pub fn with_commit(mut self, url: &str, reference: &str, sha: &str) -> Self {
        self.commits
            .insert(format!("{url}@{reference}"), sha.to_string());
        self
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn resolve_commit(&self, repo_url: &str, reference: &str) -> Result<String> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.commits
            .get(&format!("{repo_url}@{reference}"))
            .cloned()
            .ok_or_else(|| anyhow!("unknown ref {repo_url}@{reference}"))
    }

    async fn archive_info(&self, repo_url: &str, commit_sha: &str) -> Result<ArchiveInfo> {
        Ok(ArchiveInfo {
            file_name: format!("{commit_sha}.tar.gz"),
            url: format!("{repo_url}/archive/{commit_sha}.tar.gz"),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeCi {
    builds: HashMap<(String, String), UpstreamBuild>,
    jobs: HashSet<(String, String)>,
    broken: HashSet<(String, String)>,
    pub fetches: AtomicUsize,
}

impl FakeCi {
    pub fn with_build(mut self, instance: &str, job: &str, number: u64, result: &str, sha: &str) -> Self {
        self.builds.insert(
            (instance.to_string(), job.to_string()),
            UpstreamBuild {
                number,
                result: result.to_string(),
                commit_sha: sha.to_string(),
            },
        );
        self.jobs.insert((instance.to_string(), job.to_string()));
        self
    }

    pub fn with_broken_job(mut self, instance: &str, job: &str) -> Self {
        self.broken.insert((instance.to_string(), job.to_string()));
        self
    }
}

#[async_trait]
impl CiJobs for FakeCi {
    async fn latest_build(&self, instance: &str, job: &str) -> Result<UpstreamBuild> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = (instance.to_string(), job.to_string());
        if self.broken.contains(&key) {
            bail!("CI instance {instance} unavailable");
        }
        self.builds
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("no build for {instance}/{job}"))
    }

    fn job_url(&self, instance: &str, job: &str) -> String {
        format!("https://{instance}.ci.example.com/job/{job}")
    }

    async fn job_exists(
        &self,
        instance: &str,
        job: &str,
        _repo_url: &str,
        _reference: &str,
    ) -> Result<bool> {
        let key = (instance.to_string(), job.to_string());
        if self.broken.contains(&key) {
            bail!("CI instance {instance} unavailable");
        }
        Ok(self.jobs.contains(&key))
    }
}

#[derive(Debug, Default)]
pub struct FakeRegistry {
    digests: HashMap<String, String>,
}

impl FakeRegistry {
    pub fn with_digest(mut self, image_ref: &str, digest: &str) -> Self {
        self.digests
            .insert(image_ref.to_string(), digest.to_string());
        self
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn resolve_digest(&self, image_ref: &str) -> Result<String> {
        self.digests
            .get(image_ref)
            .cloned()
            .ok_or_else(|| anyhow!("manifest unknown: {image_ref}"))
    }
}

#[derive(Debug, Default)]
pub struct FakeSlo {
    breached: HashMap<(String, String), Vec<BreachedSlo>>,
    failing: bool,
    pub calls: AtomicUsize,
}

impl FakeSlo {
    pub fn with_breach(mut self, cluster: &str, ns: &str) -> Self {
        self.breached.insert(
            (cluster.to_string(), ns.to_string()),
            vec![BreachedSlo {
                document: "web-slos".to_string(),
                name: "availability".to_string(),
                current_value: 0.9,
                target: 0.99,
            }],
        );
        self
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SloEvaluator for FakeSlo {
    async fn breached_slos(
        &self,
        namespace: &str,
        cluster: &str,
        _documents: &[SloDocument],
    ) -> Result<Vec<BreachedSlo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("Prometheus unavailable");
        }
        Ok(self
            .breached
            .get(&(cluster.to_string(), namespace.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Renders a fixed resource list per repository and remembers the parameters
/// it was called with, keyed by `url@ref`
#[derive(Debug, Default)]
pub struct FakeRenderer {
    commits: HashMap<String, String>,
    resources: HashMap<String, Vec<Value>>,
    broken: HashSet<String>,
    calls: Mutex<HashMap<String, Parameters>>,
}

impl FakeRenderer {
    pub fn with_commit(mut self, url: &str, reference: &str, sha: &str) -> Self {
        self.commits
            .insert(format!("{url}@{reference}"), sha.to_string());
        self
    }

    pub fn with_resources(mut self, url: &str, resources: Vec<Value>) -> Self {
        self.resources.insert(url.to_string(), resources);
        self
    }

    pub fn with_broken_repo(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    pub fn parameters_for(&self, url: &str, reference: &str) -> Option<Parameters> {
        self.calls
            .lock()
            .unwrap()
            .get(&format!("{url}@{reference}"))
            .cloned()
    }
}

#[async_trait]
impl TemplateRenderer for FakeRenderer {
    async fn render(
        &self,
        url: &str,
        _path: &str,
        reference: &str,
        parameters: &Parameters,
    ) -> Result<RenderedTemplate> {
        if self.broken.contains(url) {
            bail!("template not found in {url}");
        }
        self.calls
            .lock()
            .unwrap()
            .insert(format!("{url}@{reference}"), parameters.clone());
        let commit_sha = if is_commit_sha(reference) {
            reference.to_string()
        } else {
            self.commits
                .get(&format!("{url}@{reference}"))
                .cloned()
                .ok_or_else(|| anyhow!("unknown ref {url}@{reference}"))?
        };
        Ok(RenderedTemplate {
            resources: self.resources.get(url).cloned().unwrap_or_default(),
            commit_sha,
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeSecrets {
    values: HashMap<(String, String), String>,
}

impl FakeSecrets {
    pub fn with_secret(mut self, path: &str, field: &str, value: &str) -> Self {
        self.values
            .insert((path.to_string(), field.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl SecretReader for FakeSecrets {
    async fn read(&self, secret: &SecretRef) -> Result<String> {
        self.values
            .get(&(secret.path.clone(), secret.field.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("secret {}/{} not found", secret.path, secret.field))
    }
}

/// Collaborator set handed to the engine; fields stay reachable for
/// assertions
#[derive(Debug, Default)]
pub struct Fakes {
    pub state: Arc<MemoryStateStore>,
    pub vcs: Arc<FakeVcs>,
    pub ci: Arc<FakeCi>,
    pub registry: Arc<FakeRegistry>,
    pub slo: Arc<FakeSlo>,
}

impl Fakes {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            state: Arc::clone(&self.state) as Arc<dyn StateStore>,
            vcs: Arc::clone(&self.vcs) as Arc<dyn Vcs>,
            ci: Arc::clone(&self.ci) as Arc<dyn CiJobs>,
            registry: Arc::clone(&self.registry) as Arc<dyn ImageRegistry>,
            slo: Arc::clone(&self.slo) as Arc<dyn SloEvaluator>,
        }
    }

    pub fn herder(&self, saas_files: Vec<SaasFile>) -> SaasHerder {
        self.herder_with(saas_files, HerderSettings::default())
    }

    pub fn herder_with(&self, saas_files: Vec<SaasFile>, settings: HerderSettings) -> SaasHerder {
        SaasHerder::new(saas_files, self.collaborators(), settings)
    }
}
