//! # SLO Gating Tests
//!
//! These tests verify:
//! - Triggers of targets with breached SLOs are dropped
//! - Hotfix versions bypass SLO gating
//! - Targets without SLO documents are never queried
//! - Query failures follow the configured failure policy
//! - Gated-out triggers are not recorded and fire again on the next pass
//! - A rejected promotion rejects the whole trigger set

mod common;

use common::*;
use saas_herder::model::{Channel, Promotion};
use saas_herder::{HerderError, HerderSettings, SloFailurePolicy};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn guarded(cluster: &str, ns: &str, reference: &str) -> saas_herder::model::Target {
    let mut guarded = target(cluster, ns, "prod", reference);
    guarded.slos = Some(vec![slo_document("web-slos", cluster, ns)]);
    guarded
}

#[tokio::test]
async fn test_breached_config_trigger_is_dropped() {
    let fakes = Fakes {
        slo: Arc::new(FakeSlo::default().with_breach("c1", "web")),
        ..Fakes::default()
    };
    let herder = fakes.herder(bundle(vec![
        guarded("c1", "web", "main"),
        guarded("c1", "web-canary", "main"),
    ]));
    assert!(herder.is_valid(), "unexpected errors: {:?}", herder.errors());

    let diff = herder.get_configs_diff().await;
    assert_eq!(diff.triggers.len(), 2);

    let kept = herder.filter_slo_breached_triggers(diff.triggers).await;
    let namespaces: Vec<_> = kept
        .iter()
        .map(|t| t.base().namespace_name.as_str())
        .collect();
    assert_eq!(namespaces, vec!["web-canary"]);
    assert_eq!(fakes.slo.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_hotfix_version_bypasses_breach() {
    let fakes = Fakes {
        slo: Arc::new(FakeSlo::default().with_breach("c1", "web")),
        ..Fakes::default()
    };
    let mut saas_files = bundle(vec![guarded("c1", "web", SHA_A)]);
    saas_files[0].app.code_components = vec![code_component(REPO, &[SHA_A], &[])];
    let herder = fakes.herder(saas_files);
    assert!(herder.hotfix_versions()[REPO].contains(SHA_A));
    assert!(herder.blocked_versions().get(REPO).is_none_or(|v| v.is_empty()));

    let diff = herder.get_configs_diff().await;
    let kept = herder.filter_slo_breached_triggers(diff.triggers).await;
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].base().target_ref, SHA_A);
    assert_eq!(fakes.slo.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_target_without_slos_is_not_queried() {
    let fakes = Fakes {
        slo: Arc::new(FakeSlo::default().with_breach("c1", "web")),
        ..Fakes::default()
    };
    let herder = fakes.herder(bundle(vec![target("c1", "web", "prod", "main")]));

    let diff = herder.get_configs_diff().await;
    let kept = herder.filter_slo_breached_triggers(diff.triggers).await;
    assert_eq!(kept.len(), 1);
    assert_eq!(fakes.slo.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_failure_fails_closed_by_default() {
    let fakes = Fakes {
        slo: Arc::new(FakeSlo::failing()),
        ..Fakes::default()
    };
    let herder = fakes.herder(bundle(vec![guarded("c1", "web", "main")]));

    let diff = herder.get_configs_diff().await;
    let kept = herder.filter_slo_breached_triggers(diff.triggers).await;
    assert!(kept.is_empty());
}

#[tokio::test]
async fn test_query_failure_fail_open() {
    let fakes = Fakes {
        slo: Arc::new(FakeSlo::failing()),
        ..Fakes::default()
    };
    let settings = HerderSettings {
        slo_failure_policy: SloFailurePolicy::FailOpen,
        ..HerderSettings::default()
    };
    let herder = fakes.herder_with(bundle(vec![guarded("c1", "web", "main")]), settings);

    let diff = herder.get_configs_diff().await;
    let kept = herder.filter_slo_breached_triggers(diff.triggers).await;
    assert_eq!(kept.len(), 1);
}

#[tokio::test]
async fn test_moving_commit_trigger_uses_target_slos() {
    let fakes = Fakes {
        vcs: Arc::new(FakeVcs::default().with_commit(REPO, "main", SHA_B)),
        slo: Arc::new(FakeSlo::default().with_breach("c1", "web")),
        ..Fakes::default()
    };
    let herder = fakes.herder(bundle(vec![guarded("c1", "web", "main")]));

    let diff = herder.get_moving_commits_diff().await;
    assert_eq!(diff.triggers.len(), 1);
    let kept = herder.filter_slo_breached_triggers(diff.triggers).await;
    assert!(kept.is_empty());
    assert_eq!(fakes.slo.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Trigger gating before state write-back
// ============================================================================

#[tokio::test]
async fn test_breached_trigger_is_not_recorded() {
    let fakes = Fakes {
        slo: Arc::new(FakeSlo::default().with_breach("c1", "web")),
        ..Fakes::default()
    };
    let herder = fakes.herder(bundle(vec![guarded("c1", "web", "main")]));

    let diff = herder.get_configs_diff().await;
    assert_eq!(diff.triggers.len(), 1);
    let gated = herder.gate_triggers(diff.triggers).await.unwrap();
    assert!(gated.is_empty());
    herder.update_states(&gated).await.unwrap();
    assert!(fakes.state.snapshot().is_empty());

    // Once the SLO recovers the same config change still fires
    let recovered = Fakes {
        state: Arc::clone(&fakes.state),
        ..Fakes::default()
    };
    let herder = recovered.herder(bundle(vec![guarded("c1", "web", "main")]));
    let diff = herder.get_configs_diff().await;
    assert_eq!(diff.triggers.len(), 1);

    let gated = herder.gate_triggers(diff.triggers).await.unwrap();
    herder.update_states(&gated).await.unwrap();
    assert!(herder.get_configs_diff().await.triggers.is_empty());
}

#[tokio::test]
async fn test_rejected_promotion_rejects_all_triggers() {
    let fakes = Fakes::default();
    let mut herder = fakes.herder(bundle(vec![target("c1", "web", "prod", "main")]));
    *herder.promotions_mut() = vec![Promotion {
        url: REPO.to_string(),
        commit_sha: SHA_A.to_string(),
        saas_file: "web".to_string(),
        target_config_hash: "H".to_string(),
        saas_target_uid: "subscriber-uid".to_string(),
        soak_days: 0,
        subscribe: vec![Channel {
            name: "web-stage-ok".to_string(),
            publisher_uids: vec!["p1".to_string()],
        }],
        publish: Vec::new(),
        auto: true,
        promotion_data: None,
    }];
    herder
        .blocked_versions_mut()
        .insert(REPO.to_string(), HashSet::from([SHA_A.to_string()]));

    let diff = herder.get_configs_diff().await;
    assert_eq!(diff.triggers.len(), 1);
    let result = herder.gate_triggers(diff.triggers).await;
    assert!(matches!(result, Err(HerderError::PromotionsRejected)));
}
