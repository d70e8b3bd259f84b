//! # Desired State Populator
//!
//! Templated parameters, promotion-data snapshots, config hashes and the
//! rendering of every target into a [`ResourceInventory`].

use futures::stream::{self, StreamExt};
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

use super::{hash_target_config, target_config, Position, SaasHerder};
use crate::error::{InventoryError, ValidationError};
use crate::model::{
    Channel, ParentSaasConfigPromotion, Parameters, Promotion, PromotionChannelData,
    ResourceInventory, SecretParameter, Target, TargetIdentity, TargetView,
};
use crate::model::saas_file::default_promotion_data_type;
use crate::observability::metrics;
use crate::providers::{RenderedTemplate, SecretReader, TemplateRenderer};

/// Renders `{{{ ... }}}` placeholders. Other brace syntax, such as Go
/// templates (`{{ .Value }}`), is left alone.
struct ParameterTemplater {
    env: Environment<'static>,
}

impl ParameterTemplater {
    fn new() -> Self {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("{{{", "}}}")
            .block_delimiters("{{%", "%}}")
            .comment_delimiters("{{#", "#}}")
            .build()
            .expect("templated parameter syntax is hardcoded and valid");
        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    fn is_templated(value: &str) -> bool {
        value.contains("{{{") || value.contains("{{%")
    }

    fn render(&self, value: &str, context: &Value) -> Result<String, minijinja::Error> {
        self.env.render_str(value, context)
    }
}

fn templating_context(view: TargetView<'_>) -> Value {
    let namespace = &view.target.namespace;
    let app_name = namespace
        .app
        .as_ref()
        .map_or(view.saas_file.app.name.as_str(), |app| app.name.as_str());
    json!({
        "resource": {
            "namespace": {
                "name": namespace.name,
                "cluster": {"name": namespace.cluster.name},
                "environment": {"name": namespace.environment.name},
                "app": {"name": app_name},
            }
        }
    })
}

/// Everything needed to render one target, detached from the herder borrow
struct RenderJob {
    position: Position,
    owner: String,
    url: String,
    path: String,
    reference: String,
    cluster: String,
    namespace: String,
    managed_kinds: Vec<String>,
    parameters: Parameters,
    secret_parameters: Vec<SecretParameter>,
}

impl SaasHerder {
    pub(super) fn resolve_templated_parameters(&mut self) {
        let templater = ParameterTemplater::new();
        for position in self.positions() {
            let view = self.view_at(position);
            let context = templating_context(view);
            let identity = view.identity();
            let mut target = view.target.clone();

            let mut failures = Vec::new();
            render_target_parameters(&templater, &context, &mut target, &mut failures);
            for (parameter, message) in failures {
                self.errors.push(ValidationError::TemplatedParameter {
                    target: identity.clone(),
                    parameter,
                    message,
                });
            }

            let (i, j, k) = position;
            self.saas_files[i].resource_templates[j].targets[k] = target;
        }
    }

    /// Compute config hashes in publisher-before-subscriber order, filling
    /// the promotion data of auto subscribers on the way
    pub(super) fn compute_config_hashes(&mut self) {
        let positions = self.positions();
        let index_by_uid: HashMap<String, usize> = positions
            .iter()
            .enumerate()
            .map(|(idx, pos)| (self.view_at(*pos).uid(), idx))
            .collect();

        let mut indegree = vec![0usize; positions.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); positions.len()];
        for (idx, pos) in positions.iter().enumerate() {
            let view = self.view_at(*pos);
            for channel in view.target.subscribed_channels() {
                let Some(channel) = self.channels.get(channel) else {
                    continue;
                };
                for uid in &channel.publisher_uids {
                    if let Some(&publisher) = index_by_uid.get(uid) {
                        dependents[publisher].push(idx);
                        indegree[idx] += 1;
                    }
                }
            }
        }

        let mut ready: VecDeque<usize> = (0..positions.len())
            .filter(|idx| indegree[*idx] == 0)
            .collect();
        let mut order = Vec::with_capacity(positions.len());
        while let Some(idx) = ready.pop_front() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        let mut in_cycle = vec![false; positions.len()];
        for (idx, remaining) in indegree.iter().enumerate() {
            if *remaining > 0 {
                in_cycle[idx] = true;
                let identity = self.view_at(positions[idx]).identity();
                self.errors.push(ValidationError::PromotionCycle(identity));
                order.push(idx);
            }
        }

        for idx in order {
            let position = positions[idx];
            if !in_cycle[idx] {
                self.snapshot_promotion_data(position);
            }
            let view = self.view_at(position);
            let hash = hash_target_config(&target_config(view));
            self.config_hashes.insert(view.identity(), hash);
        }
    }

    /// Record the current publisher hashes for subscribed channels that have
    /// no promotion data yet. Only auto promotions are snapshotted.
    fn snapshot_promotion_data(&mut self, position: Position) {
        let view = self.view_at(position);
        let Some(promotion) = view.target.promotion.as_ref() else {
            return;
        };
        if promotion.auto != Some(true) {
            return;
        }

        let publishers: HashMap<String, (String, TargetIdentity)> = self
            .targets()
            .map(|v| (v.uid(), (v.saas_file.name.clone(), v.identity())))
            .collect();

        let mut additions = Vec::new();
        for channel_name in view.target.subscribed_channels() {
            let recorded = promotion
                .promotion_data
                .as_ref()
                .is_some_and(|data| data.iter().any(|entry| &entry.channel == channel_name));
            if recorded {
                continue;
            }
            let Some(channel) = self.channels.get(channel_name) else {
                continue;
            };
            let data = channel
                .publisher_uids
                .iter()
                .filter_map(|uid| {
                    let (saas_name, identity) = publishers.get(uid)?;
                    let hash = self.config_hashes.get(identity)?;
                    Some(ParentSaasConfigPromotion {
                        kind: default_promotion_data_type(),
                        parent_saas: Some(saas_name.clone()),
                        target_config_hash: hash.clone(),
                    })
                })
                .collect();
            additions.push(PromotionChannelData {
                channel: channel_name.clone(),
                data,
            });
        }

        if additions.is_empty() {
            return;
        }
        let (i, j, k) = position;
        if let Some(promotion) = self.saas_files[i].resource_templates[j].targets[k]
            .promotion
            .as_mut()
        {
            promotion
                .promotion_data
                .get_or_insert_with(Vec::new)
                .extend(additions);
        }
    }

    /// Render every enabled target into `inventory` and rebuild the promotion
    /// records.
    ///
    /// Secret values only flow into the rendering parameters. Failures are
    /// registered on the inventory and skip the target.
    pub async fn populate_desired_state(
        &mut self,
        inventory: &mut ResourceInventory,
        renderer: &dyn TemplateRenderer,
        secrets: &dyn SecretReader,
    ) {
        let jobs: Vec<RenderJob> = self
            .positions()
            .into_iter()
            .filter_map(|position| {
                let view = self.view_at(position);
                (!view.target.is_disabled()).then(|| render_job(position, view))
            })
            .collect();

        for job in &jobs {
            for kind in &job.managed_kinds {
                inventory.initialize_resource_type(&job.cluster, &job.namespace, kind);
            }
        }

        let rendered: Vec<(RenderJob, Result<RenderedTemplate, String>)> = stream::iter(jobs)
            .map(|job| async move {
                let result = render(&job, renderer, secrets).await;
                (job, result)
            })
            .buffered(self.pool_size())
            .collect()
            .await;

        let mut promotions = Vec::new();
        for (job, result) in rendered {
            let template = match result {
                Ok(template) => template,
                Err(message) => {
                    error!("Failed to render {}: {message}", job.owner);
                    metrics::increment_collaborator_errors("render");
                    inventory.register_error(InventoryError::Render {
                        target: job.owner.clone(),
                        message,
                    });
                    continue;
                }
            };

            let deleting = self.view_at(job.position).target.delete == Some(true);
            if !deleting {
                add_resources(inventory, &job, template.resources);
            }
            if let Some(promotion) = self.promotion_record(job.position, &template.commit_sha) {
                promotions.push(promotion);
            }
        }
        info!(
            "Populated {} desired resources and {} promotions",
            inventory.len(),
            promotions.len()
        );
        self.promotions = promotions;
    }

    fn promotion_record(&self, position: Position, commit_sha: &str) -> Option<Promotion> {
        let view = self.view_at(position);
        let promotion = view.target.promotion.as_ref()?;
        let identity = view.identity();
        let subscribe = view
            .target
            .subscribed_channels()
            .iter()
            .map(|name| {
                self.channels
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Channel {
                        name: name.clone(),
                        publisher_uids: Vec::new(),
                    })
            })
            .collect();
        Some(Promotion {
            url: view.resource_template.url.clone(),
            commit_sha: commit_sha.to_string(),
            saas_file: view.saas_file.name.clone(),
            target_config_hash: self
                .config_hashes
                .get(&identity)
                .cloned()
                .unwrap_or_default(),
            saas_target_uid: identity.uid(),
            soak_days: promotion.soak_days.unwrap_or(0),
            subscribe,
            publish: view.target.published_channels().to_vec(),
            auto: promotion.auto.unwrap_or(false),
            promotion_data: promotion.promotion_data.clone(),
        })
    }
}

fn render_target_parameters(
    templater: &ParameterTemplater,
    context: &Value,
    target: &mut Target,
    failures: &mut Vec<(String, String)>,
) {
    if let Some(parameters) = target.parameters.as_mut() {
        for (name, value) in parameters.iter_mut() {
            let Some(raw) = value.as_str().filter(|raw| ParameterTemplater::is_templated(raw))
            else {
                continue;
            };
            match templater.render(raw, context) {
                Ok(rendered) => *value = Value::String(rendered),
                Err(e) => failures.push((name.clone(), e.to_string())),
            }
        }
    }

    for secret_parameter in target.secret_parameters.iter_mut().flatten() {
        for field in [
            &mut secret_parameter.secret.path,
            &mut secret_parameter.secret.field,
        ] {
            if !ParameterTemplater::is_templated(field) {
                continue;
            }
            match templater.render(field, context) {
                Ok(rendered) => *field = rendered,
                Err(e) => failures.push((secret_parameter.name.clone(), e.to_string())),
            }
        }
    }
}

fn render_job(position: Position, view: TargetView<'_>) -> RenderJob {
    let mut parameters = Parameters::new();
    for layer in [
        view.saas_file.parameters.as_ref(),
        view.resource_template.parameters.as_ref(),
        view.target.namespace.environment.parameters.as_ref(),
        view.target.parameters.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        parameters.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    RenderJob {
        position,
        owner: view.identity().to_string(),
        url: view.resource_template.url.clone(),
        path: view.resource_template.path.clone(),
        reference: view.target.reference.clone(),
        cluster: view.target.namespace.cluster.name.clone(),
        namespace: view.target.namespace.name.clone(),
        managed_kinds: view.saas_file.managed_resource_types.clone(),
        parameters,
        secret_parameters: view.target.secret_parameters.clone().unwrap_or_default(),
    }
}

async fn render(
    job: &RenderJob,
    renderer: &dyn TemplateRenderer,
    secrets: &dyn SecretReader,
) -> Result<RenderedTemplate, String> {
    let mut parameters = job.parameters.clone();
    for secret_parameter in &job.secret_parameters {
        let value = secrets
            .read(&secret_parameter.secret)
            .await
            .map_err(|e| format!("secret parameter {}: {e:#}", secret_parameter.name))?;
        parameters.insert(secret_parameter.name.clone(), Value::String(value));
    }
    debug!("Rendering {}@{}:{}", job.url, job.reference, job.path);
    renderer
        .render(&job.url, &job.path, &job.reference, &parameters)
        .await
        .map_err(|e| format!("{}@{}:{}: {e:#}", job.url, job.reference, job.path))
}

fn add_resources(inventory: &mut ResourceInventory, job: &RenderJob, resources: Vec<Value>) {
    for resource in resources {
        let kind = resource
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !job.managed_kinds.contains(&kind) {
            warn!(
                "{}: skipping resource of unmanaged kind '{kind}'",
                job.owner
            );
            continue;
        }
        match inventory.add_desired(&job.cluster, &job.namespace, resource, &job.owner) {
            Ok(()) => {}
            Err(err @ InventoryError::NotInitialized { .. }) => {
                warn!("{}: {err}", job.owner);
            }
            Err(err) => {
                error!("{}: {err}", job.owner);
                inventory.register_error(err);
            }
        }
    }
}
