//! # SaaS File Model
//!
//! Desired-state bundle types. A SaaS file groups resource templates (a
//! repository path holding manifests) and each resource template lists its
//! deployment targets.
//!
//! Field names follow the bundle's camelCase convention. Optional fields stay
//! `Option` so that `None` can be stripped before hashing a target config.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form parameter map passed to templates
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Root of a desired-state bundle
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default)]
    pub saas_files: Vec<SaasFile>,
}

/// A SaaS file: one deployable application component
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaasFile {
    pub name: String,
    pub app: App,
    pub pipelines_provider: PipelinesProvider,
    /// Resource kinds this SaaS file is allowed to manage
    #[serde(default)]
    pub managed_resource_types: Vec<String>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub publish_job_logs: Option<bool>,
    #[serde(default)]
    pub takeover: Option<bool>,
    #[serde(default)]
    pub compare: Option<bool>,
    /// Pipeline timeout handed to triggered runs (e.g. "1h")
    #[serde(default)]
    pub timeout: Option<String>,
    pub resource_templates: Vec<ResourceTemplate>,
}

/// Application owning a SaaS file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub code_components: Vec<CodeComponent>,
}

/// Source repository of an application with its version overrides
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeComponent {
    pub url: String,
    /// Refs allowed to bypass SLO gating
    #[serde(default)]
    pub hotfix_versions: Option<Vec<String>>,
    /// Refs that must never be promoted
    #[serde(default)]
    pub blocked_versions: Option<Vec<String>>,
}

/// Pipeline system that executes triggered deployments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelinesProvider {
    pub name: String,
    pub provider: String,
}

/// A repository path with manifests, deployed to a list of targets
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub name: String,
    pub url: String,
    pub path: String,
    /// Overrides the engine-wide commit prefix length used for image tags
    #[serde(default)]
    pub hash_length: Option<usize>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    pub targets: Vec<Target>,
}

/// One resource template applied to one namespace
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub name: Option<String>,
    pub namespace: Namespace,
    /// Branch name or pinned commit sha
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub parameters: Option<Parameters>,
    #[serde(default)]
    pub secret_parameters: Option<Vec<SecretParameter>>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub upstream: Option<Upstream>,
    #[serde(default)]
    pub promotion: Option<TargetPromotion>,
    #[serde(default)]
    pub disable: Option<bool>,
    #[serde(default)]
    pub delete: Option<bool>,
    #[serde(default)]
    pub slos: Option<Vec<SloDocument>>,
}

impl Target {
    /// Whether the target is excluded from every detector
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disable.unwrap_or(false)
    }

    /// Subscribed channel names (empty when not a subscriber)
    #[must_use]
    pub fn subscribed_channels(&self) -> &[String] {
        self.promotion
            .as_ref()
            .and_then(|p| p.subscribe.as_deref())
            .unwrap_or_default()
    }

    /// Published channel names (empty when not a publisher)
    #[must_use]
    pub fn published_channels(&self) -> &[String] {
        self.promotion
            .as_ref()
            .and_then(|p| p.publish.as_deref())
            .unwrap_or_default()
    }
}

/// Deployment namespace with its cluster and environment
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,
    pub cluster: Cluster,
    pub environment: Environment,
    #[serde(default)]
    pub app: Option<NamespaceApp>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub server_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub parameters: Option<Parameters>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceApp {
    pub name: String,
}

/// Indirection into the secret store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretParameter {
    pub name: String,
    pub secret: SecretRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub path: String,
    pub field: String,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
}

/// CI job whose successful builds trigger the target
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub instance: CiInstance,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CiInstance {
    pub name: String,
    #[serde(default)]
    pub server_url: Option<String>,
}

/// Promotion metadata declared on a target
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetPromotion {
    #[serde(default)]
    pub auto: Option<bool>,
    #[serde(default)]
    pub publish: Option<Vec<String>>,
    #[serde(default)]
    pub subscribe: Option<Vec<String>>,
    #[serde(default)]
    pub promotion_data: Option<Vec<PromotionChannelData>>,
    #[serde(default)]
    pub soak_days: Option<u32>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub redeploy_on_publisher_config_change: Option<bool>,
}

/// Publisher config hashes recorded for one subscribed channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromotionChannelData {
    pub channel: String,
    #[serde(default)]
    pub data: Vec<ParentSaasConfigPromotion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParentSaasConfigPromotion {
    #[serde(rename = "type", default = "default_promotion_data_type")]
    pub kind: String,
    #[serde(default)]
    pub parent_saas: Option<String>,
    pub target_config_hash: String,
}

pub(crate) fn default_promotion_data_type() -> String {
    "parent_saas_config".to_string()
}

/// SLO document gating the deployment of a target
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SloDocument {
    pub name: String,
    #[serde(default)]
    pub namespaces: Vec<SloNamespace>,
    #[serde(default)]
    pub slos: Vec<Slo>,
}

impl SloDocument {
    /// Whether the document evaluates SLOs of the given namespace
    #[must_use]
    pub fn covers(&self, cluster: &str, namespace: &str) -> bool {
        self.namespaces
            .iter()
            .any(|ns| ns.cluster == cluster && ns.name == namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SloNamespace {
    pub name: String,
    pub cluster: String,
    /// Namespace whose metrics back the SLO when different from `name`
    #[serde(default)]
    pub slo_namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Slo {
    pub name: String,
    pub expr: String,
    #[serde(rename = "SLIType", alias = "sliType")]
    pub sli_type: String,
    #[serde(rename = "SLOTarget", alias = "sloTarget")]
    pub slo_target: f64,
    #[serde(rename = "SLOTargetUnit", alias = "sloTargetUnit")]
    pub slo_target_unit: String,
    #[serde(rename = "SLOParameters", alias = "sloParameters")]
    pub slo_parameters: SloParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SloParameters {
    pub window: String,
}
