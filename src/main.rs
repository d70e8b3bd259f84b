//! # saasherder
//!
//! Runs one reconciliation pass over a bundle of SaaS files against a
//! directory-backed state store.
//!
//! ## Usage
//!
//! ```bash
//! # Validate the bundle (including upstream job lookups)
//! saasherder --bundle bundle.yaml validate
//!
//! # Print the triggers of one detector (never recorded)
//! saasherder --bundle bundle.yaml diff --kind moving-commits
//!
//! # Full pass: render, detect, gate and record
//! saasherder --bundle bundle.yaml run
//!
//! # Record the outcome of a deployment for publishing targets
//! saasherder --bundle bundle.yaml publish --success
//!
//! # Print the stored publisher records
//! saasherder --bundle bundle.yaml history
//! ```
//!
//! Collaborator credentials come from the environment (see
//! [`HerderConfig::from_env`]).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use saas_herder::clients::{
    build_http_client, FileSecretReader, GitClient, JenkinsClient, MapSecretReader,
    PrometheusSloEvaluator, RegistryClient,
};
use saas_herder::constants::TRIGGER_TOGGLE_NAME;
use saas_herder::feature_flags::{FeatureToggles, ToggleContext};
use saas_herder::model::{Bundle, ResourceInventory, SloDocument, TriggerSpec};
use saas_herder::observability::logging::{init_logging, LogFormat};
use saas_herder::observability::metrics;
use saas_herder::providers::{BreachedSlo, SecretReader, SloEvaluator};
use saas_herder::state::FileStateStore;
use saas_herder::{Collaborators, HerderConfig, SaasHerder, SloFailurePolicy, TriggerDiff};

/// SaaS deployment reconciliation
#[derive(Parser)]
#[command(name = "saasherder", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Bundle of SaaS files (YAML or JSON)
    #[arg(short, long, global = true, env = "SAASHERDER_BUNDLE")]
    bundle: Option<PathBuf>,

    /// State store directory
    #[arg(long, global = true, env = "SAASHERDER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Concurrent collaborator calls
    #[arg(long, global = true)]
    thread_pool_size: Option<usize>,

    /// Record trigger reasons on trigger specs
    #[arg(long, global = true)]
    include_trigger_trace: bool,

    /// How a failed SLO query gates a trigger (fail-closed, fail-open)
    #[arg(long, global = true)]
    slo_failure_policy: Option<SloFailurePolicy>,

    /// Compute everything but write nothing back
    #[arg(long, global = true)]
    dry_run: bool,

    /// Write the Prometheus text exposition here when done
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the bundle
    Validate,
    /// Print the ungated triggers of the detectors without recording them
    Diff {
        #[arg(long, value_enum, default_value_t = DiffKind::All)]
        kind: DiffKind,
    },
    /// Render desired state, detect and gate triggers, validate promotions
    /// and record the results
    Run,
    /// Record the outcome of a deployment for publishing targets
    Publish {
        /// The deployment succeeded
        #[arg(long, conflicts_with = "failure")]
        success: bool,
        /// The deployment failed
        #[arg(long)]
        failure: bool,
    },
    /// Print the stored publisher records of the bundle's channels
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DiffKind {
    All,
    MovingCommits,
    UpstreamJobs,
    ContainerImages,
    Configs,
}

/// Stand-in when no Prometheus endpoint is configured
#[derive(Debug)]
struct NoSloBackend;

#[async_trait]
impl SloEvaluator for NoSloBackend {
    async fn breached_slos(
        &self,
        _namespace: &str,
        _cluster: &str,
        _documents: &[SloDocument],
    ) -> Result<Vec<BreachedSlo>> {
        bail!("no Prometheus endpoint configured (PROMETHEUS_URL)")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = HerderConfig::from_env();
    apply_overrides(&mut config, &cli);

    let log_format: LogFormat = config.log_format.parse().unwrap_or_default();
    init_logging(&config.log_level, log_format)?;
    metrics::register_metrics()?;
    info!(
        "saasherder {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME")
    );

    let started = Instant::now();
    let result = execute(&cli, &config).await;
    metrics::observe_run_duration(started.elapsed().as_secs_f64());

    if let Some(path) = &cli.metrics_file {
        let exposition = metrics::encode_metrics()?;
        tokio::fs::write(path, exposition)
            .await
            .context(format!("Failed to write metrics: {}", path.display()))?;
    }
    result
}

fn apply_overrides(config: &mut HerderConfig, cli: &Cli) {
    if let Some(state_dir) = &cli.state_dir {
        config.state_dir = state_dir.display().to_string();
    }
    if let Some(size) = cli.thread_pool_size {
        config.thread_pool_size = size;
    }
    if cli.include_trigger_trace {
        config.include_trigger_trace = true;
    }
    if let Some(policy) = cli.slo_failure_policy {
        config.slo_failure_policy = policy;
    }
}

async fn execute(cli: &Cli, config: &HerderConfig) -> Result<()> {
    let bundle_path = cli
        .bundle
        .as_deref()
        .context("--bundle (or SAASHERDER_BUNDLE) is required")?;
    let bundle = load_bundle(bundle_path).await?;
    info!(
        "Loaded {} SaaS files from {}",
        bundle.saas_files.len(),
        bundle_path.display()
    );

    let http = build_http_client(config.http_timeout())?;
    let git = Arc::new(
        GitClient::new(http.clone(), &config.github_api_url, config.hash_length)
            .with_github_token(config.github_token.clone())
            .with_gitlab_token(config.gitlab_token.clone())
            .with_max_retries(config.http_max_retries),
    );
    let collaborators = Collaborators {
        state: Arc::new(FileStateStore::new(&config.state_dir)),
        vcs: Arc::clone(&git) as _,
        ci: Arc::new(jenkins_client(&bundle, http.clone(), config)),
        registry: Arc::new(
            RegistryClient::new(http.clone(), config.registry_token.clone())
                .with_max_retries(config.http_max_retries),
        ),
        slo: slo_evaluator(http.clone(), config),
    };

    let mut herder = SaasHerder::new(bundle.saas_files, collaborators, config.herder_settings());

    match &cli.command {
        Commands::Validate => {
            herder.validate_upstream_jobs().await;
            report_validation(&herder)?;
            info!(
                "Bundle is valid: {} repositories, {} images",
                herder.collect_repo_urls().len(),
                herder.collect_image_patterns().len()
            );
            Ok(())
        }
        Commands::Diff { kind } => {
            report_validation(&herder)?;
            let toggles = feature_toggles(http, config).await;
            let triggers = detect(&herder, *kind, &toggles).await;
            toggles.shutdown().await;
            print_triggers(&triggers)
        }
        Commands::Run => {
            herder.validate_upstream_jobs().await;
            report_validation(&herder)?;
            let mut inventory = ResourceInventory::new();
            let secrets = secret_reader(config);
            herder
                .populate_desired_state(&mut inventory, git.as_ref(), secrets.as_ref())
                .await;
            if inventory.has_error_registered() {
                for err in inventory.errors() {
                    error!("Desired state error: {err}");
                }
                bail!(
                    "Desired state has {} errors; nothing was triggered",
                    inventory.errors().len()
                );
            }

            let toggles = feature_toggles(http, config).await;
            let triggers = detect(&herder, DiffKind::All, &toggles).await;
            toggles.shutdown().await;
            let triggers = herder
                .gate_triggers(triggers)
                .await
                .context("Nothing was triggered")?;

            print_triggers(&triggers)?;
            if cli.dry_run {
                info!("Dry run: {} triggers not recorded", triggers.len());
            } else {
                herder.update_states(&triggers).await?;
            }
            Ok(())
        }
        Commands::Publish { success, failure } => {
            if success == failure {
                bail!("exactly one of --success or --failure is required");
            }
            let mut inventory = ResourceInventory::new();
            let secrets = secret_reader(config);
            herder
                .populate_desired_state(&mut inventory, git.as_ref(), secrets.as_ref())
                .await;
            if cli.dry_run {
                info!("Dry run: {} promotions not published", herder.promotions().len());
                return Ok(());
            }
            herder.publish_promotions(*success).await
        }
        Commands::History => {
            let history = herder.promotion_history().await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
    }
}

async fn load_bundle(path: &Path) -> Result<Bundle> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context(format!("Failed to read bundle: {}", path.display()))?;
    // YAML is a superset of JSON
    serde_yaml::from_str(&content).context(format!("Failed to parse bundle: {}", path.display()))
}

fn report_validation(herder: &SaasHerder) -> Result<()> {
    if herder.is_valid() {
        return Ok(());
    }
    bail!("Bundle has {} validation errors", herder.errors().len())
}

fn jenkins_client(bundle: &Bundle, http: reqwest::Client, config: &HerderConfig) -> JenkinsClient {
    let mut client = JenkinsClient::new(http, config.jenkins_user.clone(), config.jenkins_token.clone())
        .with_max_retries(config.http_max_retries);
    let instances = bundle
        .saas_files
        .iter()
        .flat_map(|saas_file| &saas_file.resource_templates)
        .flat_map(|rt| &rt.targets)
        .filter_map(|target| target.upstream.as_ref())
        .filter_map(|upstream| {
            let url = upstream.instance.server_url.as_ref()?;
            Some((upstream.instance.name.clone(), url.clone()))
        });
    for (name, url) in instances {
        client = client.with_instance(name, url);
    }
    client
}

fn slo_evaluator(http: reqwest::Client, config: &HerderConfig) -> Arc<dyn SloEvaluator> {
    match &config.prometheus_url {
        Some(url) => Arc::new(
            PrometheusSloEvaluator::new(http, url, config.prometheus_token.clone())
                .with_max_retries(config.http_max_retries),
        ),
        None => Arc::new(NoSloBackend),
    }
}

fn secret_reader(config: &HerderConfig) -> Box<dyn SecretReader> {
    match &config.secrets_dir {
        Some(dir) => Box::new(FileSecretReader::new(dir)),
        None => Box::new(MapSecretReader::new()),
    }
}

async fn feature_toggles(http: reqwest::Client, config: &HerderConfig) -> FeatureToggles {
    let Some(url) = &config.feature_toggle_url else {
        return FeatureToggles::disabled();
    };
    match FeatureToggles::init(
        http,
        url,
        config.feature_toggle_token.clone(),
        config.feature_toggle_refresh_interval(),
    )
    .await
    {
        Ok(toggles) => toggles,
        Err(e) => {
            warn!("Feature toggles unavailable, using defaults: {e:#}");
            FeatureToggles::disabled()
        }
    }
}

async fn detect(herder: &SaasHerder, kind: DiffKind, toggles: &FeatureToggles) -> Vec<TriggerSpec> {
    let mut diffs: Vec<TriggerDiff> = Vec::new();
    if matches!(kind, DiffKind::All | DiffKind::MovingCommits) {
        diffs.push(herder.get_moving_commits_diff().await);
    }
    if matches!(kind, DiffKind::All | DiffKind::UpstreamJobs) {
        diffs.push(herder.get_upstream_jobs_diff().await);
    }
    if matches!(kind, DiffKind::All | DiffKind::ContainerImages) {
        diffs.push(herder.get_container_images_diff().await);
    }
    if matches!(kind, DiffKind::All | DiffKind::Configs) {
        diffs.push(herder.get_configs_diff().await);
    }

    let mut triggers = Vec::new();
    for trigger in diffs.into_iter().flat_map(|diff| diff.triggers) {
        let context = ToggleContext::for_cluster(&trigger.base().cluster_name);
        if toggles.is_enabled(TRIGGER_TOGGLE_NAME, &context, true).await {
            triggers.push(trigger);
        } else {
            info!(
                "Triggers disabled for cluster {}, skipping {}",
                trigger.base().cluster_name,
                trigger.store_key()
            );
        }
    }
    triggers
}

fn print_triggers(triggers: &[TriggerSpec]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(triggers)?);
    Ok(())
}
