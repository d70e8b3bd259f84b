//! # SaaS Herder
//!
//! Reconciliation engine over a bundle of SaaS files.
//!
//! Construction validates the bundle, renders templated parameters and
//! computes target config hashes (snapshotting publisher hashes into auto
//! promotions on the way). A run then:
//!
//! 1. renders desired state ([`SaasHerder::populate_desired_state`]),
//! 2. asks the detectors for triggers (`get_*_diff`),
//! 3. drops triggers gated by breached SLOs,
//! 4. validates promotions,
//! 5. writes trigger state and promotion data back once the pass is done.
//!
//! Collaborator failures never abort a pass; they skip the affected target
//! for the affected detector.

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::error;

use crate::config::HerderSettings;
use crate::error::ValidationError;
use crate::model::{Channel, Promotion, SaasFile, TargetIdentity, TargetView, TriggerBase};
use crate::observability::metrics;
use crate::providers::{CiJobs, ImageRegistry, SloEvaluator, Vcs};
use crate::state::{PromotionState, StateStore};
use crate::utils::{config_hash, remove_none_values};

mod features;
mod populate;
mod promotions;
mod slo;
mod triggers;
mod validation;

pub use features::{FeatureSetting, SaasFileFeature};
pub use triggers::TriggerDiff;

/// External systems consulted during a run
#[derive(Clone)]
pub struct Collaborators {
    pub state: Arc<dyn StateStore>,
    pub vcs: Arc<dyn Vcs>,
    pub ci: Arc<dyn CiJobs>,
    pub registry: Arc<dyn ImageRegistry>,
    pub slo: Arc<dyn SloEvaluator>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Index of a target inside the bundle: (saas file, resource template, target)
type Position = (usize, usize, usize);

#[derive(Debug)]
pub struct SaasHerder {
    saas_files: Vec<SaasFile>,
    collaborators: Collaborators,
    promotion_state: PromotionState,
    settings: HerderSettings,
    errors: Vec<ValidationError>,
    channels: BTreeMap<String, Channel>,
    config_hashes: HashMap<TargetIdentity, String>,
    promotions: Vec<Promotion>,
    hotfix_versions: HashMap<String, HashSet<String>>,
    blocked_versions: HashMap<String, HashSet<String>>,
}

impl SaasHerder {
    pub fn new(
        saas_files: Vec<SaasFile>,
        collaborators: Collaborators,
        settings: HerderSettings,
    ) -> Self {
        let promotion_state = PromotionState::new(Arc::clone(&collaborators.state));
        let mut herder = Self {
            saas_files,
            collaborators,
            promotion_state,
            settings,
            errors: Vec::new(),
            channels: BTreeMap::new(),
            config_hashes: HashMap::new(),
            promotions: Vec::new(),
            hotfix_versions: HashMap::new(),
            blocked_versions: HashMap::new(),
        };
        herder.collect_version_overrides();
        herder.channels = herder.build_channels();
        herder.validate();
        herder.resolve_templated_parameters();
        herder.compute_config_hashes();

        for err in &herder.errors {
            error!("Validation error: {err}");
        }
        metrics::increment_validation_errors(herder.errors.len());
        herder
    }

    /// `false` when any validation error was found
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    #[must_use]
    pub fn saas_files(&self) -> &[SaasFile] {
        &self.saas_files
    }

    #[must_use]
    pub fn settings(&self) -> &HerderSettings {
        &self.settings
    }

    /// Every target of the bundle in declaration order
    pub fn targets(&self) -> impl Iterator<Item = TargetView<'_>> {
        TargetView::all(&self.saas_files)
    }

    #[must_use]
    pub fn channels(&self) -> &BTreeMap<String, Channel> {
        &self.channels
    }

    /// Config hash computed for a target at construction
    #[must_use]
    pub fn target_config_hash(&self, identity: &TargetIdentity) -> Option<&str> {
        self.config_hashes.get(identity).map(String::as_str)
    }

    /// Promotion records produced by the last populate pass
    #[must_use]
    pub fn promotions(&self) -> &[Promotion] {
        &self.promotions
    }

    pub fn promotions_mut(&mut self) -> &mut Vec<Promotion> {
        &mut self.promotions
    }

    /// Refs allowed to bypass SLO gating, per repository url
    #[must_use]
    pub fn hotfix_versions(&self) -> &HashMap<String, HashSet<String>> {
        &self.hotfix_versions
    }

    pub fn hotfix_versions_mut(&mut self) -> &mut HashMap<String, HashSet<String>> {
        &mut self.hotfix_versions
    }

    /// Refs that must never be promoted, per repository url
    #[must_use]
    pub fn blocked_versions(&self) -> &HashMap<String, HashSet<String>> {
        &self.blocked_versions
    }

    pub fn blocked_versions_mut(&mut self) -> &mut HashMap<String, HashSet<String>> {
        &mut self.blocked_versions
    }

    /// Bound of concurrent collaborator calls
    fn pool_size(&self) -> usize {
        self.settings.thread_pool_size.max(1)
    }

    fn is_hotfix(&self, url: &str, reference: &str) -> bool {
        self.hotfix_versions
            .get(url)
            .is_some_and(|versions| versions.contains(reference))
    }

    fn is_blocked(&self, url: &str, reference: &str) -> bool {
        self.blocked_versions
            .get(url)
            .is_some_and(|versions| versions.contains(reference))
    }

    fn collect_version_overrides(&mut self) {
        for saas_file in &self.saas_files {
            for component in &saas_file.app.code_components {
                if let Some(versions) = &component.hotfix_versions {
                    self.hotfix_versions
                        .entry(component.url.clone())
                        .or_default()
                        .extend(versions.iter().cloned());
                }
                if let Some(versions) = &component.blocked_versions {
                    self.blocked_versions
                        .entry(component.url.clone())
                        .or_default()
                        .extend(versions.iter().cloned());
                }
            }
        }
    }

    /// Channels keyed by name, publishers in declaration order
    fn build_channels(&self) -> BTreeMap<String, Channel> {
        let mut channels = BTreeMap::new();
        for view in self.targets() {
            let uid = view.uid();
            for name in view.target.published_channels() {
                let channel = channels.entry(name.clone()).or_insert_with(|| Channel {
                    name: name.clone(),
                    publisher_uids: Vec::new(),
                });
                if !channel.publisher_uids.contains(&uid) {
                    channel.publisher_uids.push(uid.clone());
                }
            }
        }
        channels
    }

    fn positions(&self) -> Vec<Position> {
        self.saas_files
            .iter()
            .enumerate()
            .flat_map(|(i, saas_file)| {
                saas_file
                    .resource_templates
                    .iter()
                    .enumerate()
                    .flat_map(move |(j, rt)| (0..rt.targets.len()).map(move |k| (i, j, k)))
            })
            .collect()
    }

    fn view_at(&self, (i, j, k): Position) -> TargetView<'_> {
        let saas_file = &self.saas_files[i];
        let resource_template = &saas_file.resource_templates[j];
        TargetView {
            saas_file,
            resource_template,
            target: &resource_template.targets[k],
        }
    }

    /// Target matching the identity fields of a trigger
    fn find_target(&self, base: &TriggerBase) -> Option<TargetView<'_>> {
        let identity = base.identity();
        self.targets().find(|view| view.identity() == identity)
    }

    fn trigger_base(&self, view: TargetView<'_>, target_ref: &str, reason: Option<String>) -> TriggerBase {
        TriggerBase {
            saas_file_name: view.saas_file.name.clone(),
            env_name: view.target.namespace.environment.name.clone(),
            timeout: view.saas_file.timeout.clone(),
            pipelines_provider: view.saas_file.pipelines_provider.clone(),
            resource_template_name: view.resource_template.name.clone(),
            cluster_name: view.target.namespace.cluster.name.clone(),
            namespace_name: view.target.namespace.name.clone(),
            target_ref: target_ref.to_string(),
            reason: reason.filter(|_| self.settings.include_trigger_trace),
        }
    }
}

/// Full desired config of a target, the input of the config hash.
///
/// A subscriber that opted out of redeploying on publisher config changes
/// does not carry its promotion data into the config.
#[must_use]
pub fn target_config(view: TargetView<'_>) -> Value {
    let target = view.target;
    let mut config = json!({
        "saas_file_name": view.saas_file.name,
        "saas_file_managed_resource_types": view.saas_file.managed_resource_types,
        "saas_file_parameters": view.saas_file.parameters,
        "url": view.resource_template.url,
        "path": view.resource_template.path,
        "rt_parameters": view.resource_template.parameters,
        "name": target.name,
        "ref": target.reference,
        "namespace": target.namespace,
        "parameters": target.parameters,
        "secretParameters": target.secret_parameters,
        "images": target.images,
        "upstream": target.upstream,
        "disable": target.disable,
        "delete": target.delete,
        "slos": target.slos,
        "promotion": target.promotion,
    });

    let redeploy = target
        .promotion
        .as_ref()
        .and_then(|p| p.redeploy_on_publisher_config_change);
    if redeploy == Some(false) {
        if let Some(promotion) = config.get_mut("promotion").and_then(Value::as_object_mut) {
            promotion.remove("promotionData");
        }
    }
    config
}

/// Hash of a target config with `null` members stripped
#[must_use]
pub fn hash_target_config(config: &Value) -> String {
    config_hash(&remove_none_values(Some(config)))
}
