//! # Desired State Tests
//!
//! These tests verify:
//! - Parameter layering and secret parameters handed to the renderer
//! - Managed kinds and duplicate resources in the inventory
//! - Deleted, disabled and failing targets
//! - Promotion records and promotion-data snapshots
//! - Aggregated SaaS file features

mod common;

use common::*;
use saas_herder::model::{ResourceInventory, SecretParameter, Target, TargetPromotion};
use saas_herder::{FeatureSetting, InventoryError, SaasFileFeature, SaasHerder};
use serde_json::{json, Value};

fn deployment(name: &str) -> Value {
    json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": name}})
}

fn config_map(name: &str) -> Value {
    json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}})
}

async fn populate(
    herder: &mut SaasHerder,
    renderer: &FakeRenderer,
    secrets: &FakeSecrets,
) -> ResourceInventory {
    let mut inventory = ResourceInventory::new();
    herder
        .populate_desired_state(&mut inventory, renderer, secrets)
        .await;
    inventory
}

#[tokio::test]
async fn test_parameter_layers_and_secrets() {
    let mut web = target("c1", "web", "prod", "main");
    web.namespace.environment.parameters = Some(parameters(&[
        ("ENV", json!("env")),
        ("TARGET", json!("env")),
    ]));
    web.parameters = Some(parameters(&[("TARGET", json!("target"))]));
    web.secret_parameters = Some(vec![SecretParameter {
        name: "DB_PASSWORD".to_string(),
        secret: secret_ref("app/prod/db", "password"),
    }]);

    let mut saas_files = bundle(vec![web]);
    saas_files[0].parameters = Some(parameters(&[
        ("SAAS", json!("saas")),
        ("RT", json!("saas")),
        ("ENV", json!("saas")),
        ("TARGET", json!("saas")),
    ]));
    saas_files[0].resource_templates[0].parameters = Some(parameters(&[
        ("RT", json!("rt")),
        ("ENV", json!("rt")),
        ("TARGET", json!("rt")),
    ]));

    let renderer = FakeRenderer::default().with_commit(REPO, "main", SHA_A);
    let secrets = FakeSecrets::default().with_secret("app/prod/db", "password", "hunter2");
    let mut herder = Fakes::default().herder(saas_files);
    let inventory = populate(&mut herder, &renderer, &secrets).await;
    assert!(!inventory.has_error_registered());

    let params = renderer.parameters_for(REPO, "main").unwrap();
    assert_eq!(params["SAAS"], json!("saas"));
    assert_eq!(params["RT"], json!("rt"));
    assert_eq!(params["ENV"], json!("env"));
    assert_eq!(params["TARGET"], json!("target"));
    assert_eq!(params["DB_PASSWORD"], json!("hunter2"));
}

#[tokio::test]
async fn test_unmanaged_kinds_are_skipped() {
    let renderer = FakeRenderer::default().with_resources(
        REPO,
        vec![
            deployment("web"),
            config_map("web-config"),
            json!({"kind": "Secret", "metadata": {"name": "web-secret"}}),
        ],
    );
    let mut herder = Fakes::default().herder(bundle(vec![target("c1", "web", "prod", SHA_A)]));
    let inventory = populate(&mut herder, &renderer, &FakeSecrets::default()).await;

    assert!(!inventory.has_error_registered());
    assert_eq!(inventory.len(), 2);
    let deployments: Vec<_> = inventory.desired("c1", "web", "Deployment").collect();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].owner, "web/web/c1/web/prod");
    assert_eq!(inventory.desired("c1", "web", "Secret").count(), 0);
}

#[tokio::test]
async fn test_duplicate_resource_across_targets() {
    let saas_files = vec![saas_file(
        "web",
        vec![
            resource_template("web", REPO, vec![target("c1", "web", "prod", SHA_A)]),
            resource_template("web-copy", OTHER_REPO, vec![target("c1", "web", "prod", SHA_B)]),
        ],
    )];
    let renderer = FakeRenderer::default()
        .with_resources(REPO, vec![deployment("web")])
        .with_resources(OTHER_REPO, vec![deployment("web")]);
    let mut herder = Fakes::default().herder(saas_files);
    assert!(herder.is_valid(), "unexpected errors: {:?}", herder.errors());

    let inventory = populate(&mut herder, &renderer, &FakeSecrets::default()).await;
    assert_eq!(inventory.len(), 1);
    assert!(matches!(
        inventory.errors(),
        [InventoryError::Duplicate { kind, name, .. }] if kind == "Deployment" && name == "web"
    ));
}

#[tokio::test]
async fn test_deleted_target_still_records_promotion() {
    let mut deleted = target("c1", "web", "prod", SHA_A);
    deleted.delete = Some(true);
    deleted.promotion = Some(promotion(&["web-prod-ok"], &[]));

    let renderer = FakeRenderer::default().with_resources(REPO, vec![deployment("web")]);
    let mut herder = Fakes::default().herder(bundle(vec![deleted]));
    let inventory = populate(&mut herder, &renderer, &FakeSecrets::default()).await;

    assert!(inventory.is_empty());
    assert!(!inventory.has_error_registered());
    assert_eq!(herder.promotions().len(), 1);
    assert_eq!(herder.promotions()[0].publish, vec!["web-prod-ok"]);
}

#[tokio::test]
async fn test_disabled_target_is_not_rendered() {
    let mut disabled = target("c1", "web", "prod", "main");
    disabled.disable = Some(true);

    let renderer = FakeRenderer::default().with_resources(REPO, vec![deployment("web")]);
    let mut herder = Fakes::default().herder(bundle(vec![disabled]));
    let inventory = populate(&mut herder, &renderer, &FakeSecrets::default()).await;

    assert!(inventory.is_empty());
    assert!(renderer.parameters_for(REPO, "main").is_none());
}

#[tokio::test]
async fn test_failures_are_isolated_to_the_target() {
    let mut missing_secret = target("c2", "web", "prod", SHA_A);
    missing_secret.secret_parameters = Some(vec![SecretParameter {
        name: "TOKEN".to_string(),
        secret: secret_ref("app/prod/token", "value"),
    }]);

    let saas_files = vec![saas_file(
        "web",
        vec![
            resource_template("broken", REPO, vec![target("c1", "broken", "prod", SHA_A)]),
            resource_template(
                "web",
                OTHER_REPO,
                vec![target("c1", "web", "prod", SHA_B), missing_secret],
            ),
        ],
    )];
    let renderer = FakeRenderer::default()
        .with_broken_repo(REPO)
        .with_resources(OTHER_REPO, vec![deployment("web")]);
    let mut herder = Fakes::default().herder(saas_files);
    let inventory = populate(&mut herder, &renderer, &FakeSecrets::default()).await;

    let failed: Vec<_> = inventory
        .errors()
        .iter()
        .filter_map(|e| match e {
            InventoryError::Render { target, .. } => Some(target.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["web/broken/c1/broken/prod", "web/web/c2/web/prod"]);
    assert_eq!(inventory.desired("c1", "web", "Deployment").count(), 1);
    assert_eq!(inventory.desired("c2", "web", "Deployment").count(), 0);
}

#[tokio::test]
async fn test_promotion_record_carries_commit_and_hash() {
    let mut publisher = target("c1", "web-stage", "stage", "main");
    publisher.promotion = Some(TargetPromotion {
        publish: Some(vec!["web-stage-ok".to_string()]),
        soak_days: Some(2),
        ..TargetPromotion::default()
    });

    let renderer = FakeRenderer::default().with_commit(REPO, "main", SHA_C);
    let mut herder = Fakes::default().herder(bundle(vec![publisher]));
    populate(&mut herder, &renderer, &FakeSecrets::default()).await;

    let identity = herder.targets().next().unwrap().identity();
    let expected_hash = herder.target_config_hash(&identity).unwrap().to_string();

    let record = &herder.promotions()[0];
    assert_eq!(record.commit_sha, SHA_C);
    assert_eq!(record.url, REPO);
    assert_eq!(record.saas_file, "web");
    assert_eq!(record.target_config_hash, expected_hash);
    assert_eq!(record.saas_target_uid, identity.uid());
    assert_eq!(record.soak_days, 2);
    assert!(!record.auto);
}

// ============================================================================
// Promotion data snapshots
// ============================================================================

fn subscriber(ns: &str, auto: bool, redeploy: Option<bool>) -> Target {
    let mut subscriber = target("c2", ns, "prod", SHA_A);
    subscriber.promotion = Some(TargetPromotion {
        auto: Some(auto),
        subscribe: Some(vec!["web-stage-ok".to_string()]),
        redeploy_on_publisher_config_change: redeploy,
        ..TargetPromotion::default()
    });
    subscriber
}

fn publisher(replicas: i64) -> Target {
    let mut publisher = target("c1", "web-stage", "stage", SHA_A);
    publisher.parameters = Some(parameters(&[("REPLICAS", json!(replicas))]));
    publisher.promotion = Some(promotion(&["web-stage-ok"], &[]));
    publisher
}

#[test]
fn test_snapshot_only_for_auto_subscribers() {
    let herder = Fakes::default().herder(bundle(vec![
        publisher(1),
        subscriber("web-auto", true, None),
        subscriber("web-manual", false, None),
    ]));
    assert!(herder.is_valid(), "unexpected errors: {:?}", herder.errors());

    let publisher_identity = herder.targets().next().unwrap().identity();
    let publisher_hash = herder.target_config_hash(&publisher_identity).unwrap();

    let targets = &herder.saas_files()[0].resource_templates[0].targets;
    let auto = targets[1].promotion.as_ref().unwrap();
    let data = auto.promotion_data.as_ref().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].channel, "web-stage-ok");
    assert_eq!(data[0].data[0].target_config_hash, publisher_hash);
    assert_eq!(data[0].data[0].parent_saas.as_deref(), Some("web"));

    let manual = targets[2].promotion.as_ref().unwrap();
    assert!(manual.promotion_data.is_none());
}

fn subscriber_hash(replicas: i64, redeploy: Option<bool>) -> String {
    let herder = Fakes::default().herder(bundle(vec![
        publisher(replicas),
        subscriber("web-prod", true, redeploy),
    ]));
    let identity = herder.targets().nth(1).unwrap().identity();
    herder.target_config_hash(&identity).unwrap().to_string()
}

#[test]
fn test_publisher_change_redeploys_subscriber_by_default() {
    assert_ne!(subscriber_hash(1, None), subscriber_hash(2, None));
}

#[test]
fn test_subscriber_opted_out_of_redeploy() {
    assert_eq!(
        subscriber_hash(1, Some(false)),
        subscriber_hash(2, Some(false))
    );
}

// ============================================================================
// SaaS file features
// ============================================================================

#[test]
fn test_saas_file_features() {
    let mut first = saas_file("first", vec![]);
    first.publish_job_logs = Some(true);
    first.takeover = Some(true);
    let mut second = saas_file("second", vec![]);
    second.takeover = Some(false);

    let herder = Fakes::default().herder(vec![first, second]);
    assert_eq!(
        herder.saas_file_feature(SaasFileFeature::PublishJobLogs),
        FeatureSetting::Value(true)
    );
    assert_eq!(
        herder.saas_file_feature(SaasFileFeature::Takeover),
        FeatureSetting::Ambiguous
    );
    assert_eq!(
        herder.saas_file_feature(SaasFileFeature::Compare),
        FeatureSetting::Unset
    );
    assert!(herder.feature_enabled(SaasFileFeature::Compare, true));
    assert!(!herder.feature_enabled(SaasFileFeature::Takeover, true));
}
