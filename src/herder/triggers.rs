//! # Trigger Diff Engine
//!
//! Four independent detectors compare desired state and external systems
//! with the state recorded by the last triggered run:
//!
//! - moving commits: head of a branch ref
//! - upstream jobs: latest successful CI build
//! - container images: digests of images built from the head commit
//! - configs: hash of the full target config
//!
//! A failing collaborator call skips the target for that detector only.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::{debug, error, info};

use super::{hash_target_config, target_config, SaasHerder};
use crate::constants::UPSTREAM_JOB_SUCCESS;
use crate::error::HerderError;
use crate::model::{
    is_commit_sha, ConfigTrigger, ContainerImageTrigger, MovingCommitTrigger, TargetView,
    TriggerKind, TriggerSpec, UpstreamBuild, UpstreamJobTrigger,
};
use crate::observability::metrics;
use crate::providers::ArchiveInfo;
use crate::utils::remove_none_values;

static COMMIT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<repo>\S+?)/commit/(?P<sha>[0-9a-f]{7,40})\b")
        .expect("commit url regex is valid")
});

/// Result of one detector pass
#[derive(Debug, Default)]
pub struct TriggerDiff {
    pub triggers: Vec<TriggerSpec>,
    /// Targets skipped because a collaborator call failed
    pub error_count: usize,
}

impl TriggerDiff {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    fn from_results(kind: TriggerKind, results: Vec<Result<Option<TriggerSpec>>>) -> Self {
        let mut diff = Self::default();
        for result in results {
            match result {
                Ok(Some(trigger)) => diff.triggers.push(trigger),
                Ok(None) => {}
                Err(e) => {
                    error!("{kind}: {e:#}");
                    metrics::increment_collaborator_errors(kind.as_str());
                    diff.error_count += 1;
                }
            }
        }
        metrics::increment_triggers(kind.as_str(), diff.triggers.len());
        info!(
            "{kind}: {} triggers, {} errors",
            diff.triggers.len(),
            diff.error_count
        );
        diff
    }
}

fn commit_reason(url: &str, commit_sha: &str) -> String {
    format!("{url}/commit/{commit_sha}")
}

impl SaasHerder {
    /// Branch refs whose head moved since the last triggered run.
    ///
    /// Pinned refs never move. Targets driven by upstream jobs or images are
    /// left to those detectors.
    pub async fn get_moving_commits_diff(&self) -> TriggerDiff {
        let candidates: Vec<TargetView<'_>> = self
            .targets()
            .filter(|view| {
                let target = view.target;
                !target.is_disabled()
                    && !is_commit_sha(&target.reference)
                    && target.upstream.is_none()
                    && !target.images.as_ref().is_some_and(|i| !i.is_empty())
            })
            .collect();

        let results: Vec<_> = stream::iter(candidates)
            .map(|view| self.moving_commit_trigger(view))
            .buffered(self.pool_size())
            .collect()
            .await;
        TriggerDiff::from_results(TriggerKind::MovingCommit, results)
    }

    async fn moving_commit_trigger(&self, view: TargetView<'_>) -> Result<Option<TriggerSpec>> {
        let url = &view.resource_template.url;
        let reference = &view.target.reference;
        let commit_sha = self
            .collaborators
            .vcs
            .resolve_commit(url, reference)
            .await
            .with_context(|| format!("{}: failed to resolve {url}@{reference}", view.identity()))?;

        let trigger = TriggerSpec::MovingCommit(MovingCommitTrigger {
            base: self.trigger_base(view, &commit_sha, Some(commit_reason(url, &commit_sha))),
            reference: reference.clone(),
            state_content: commit_sha.clone(),
        });
        let stored = self.collaborators.state.get(&trigger.store_key()).await?;
        if stored.as_ref().and_then(Value::as_str) == Some(commit_sha.as_str()) {
            debug!("{}: {reference} still at {commit_sha}", view.identity());
            return Ok(None);
        }
        Ok(Some(trigger))
    }

    /// Targets whose upstream job has a new successful build.
    ///
    /// Each distinct job is fetched once per pass.
    pub async fn get_upstream_jobs_diff(&self) -> TriggerDiff {
        let candidates: Vec<TargetView<'_>> = self
            .targets()
            .filter(|view| !view.target.is_disabled() && view.target.upstream.is_some())
            .collect();

        let jobs: BTreeSet<(String, String)> = candidates
            .iter()
            .filter_map(|view| view.target.upstream.as_ref())
            .map(|upstream| (upstream.instance.name.clone(), upstream.name.clone()))
            .collect();
        let ci = &self.collaborators.ci;
        let builds: HashMap<(String, String), Result<UpstreamBuild, String>> = stream::iter(jobs)
            .map(|(instance, job)| async move {
                let build = ci
                    .latest_build(&instance, &job)
                    .await
                    .map_err(|e| format!("{e:#}"));
                ((instance, job), build)
            })
            .buffer_unordered(self.pool_size())
            .collect()
            .await;

        let results: Vec<_> = stream::iter(candidates)
            .map(|view| self.upstream_job_trigger(view, &builds))
            .buffered(self.pool_size())
            .collect()
            .await;
        TriggerDiff::from_results(TriggerKind::UpstreamJob, results)
    }

    async fn upstream_job_trigger(
        &self,
        view: TargetView<'_>,
        builds: &HashMap<(String, String), Result<UpstreamBuild, String>>,
    ) -> Result<Option<TriggerSpec>> {
        let Some(upstream) = view.target.upstream.as_ref() else {
            return Ok(None);
        };
        let instance = &upstream.instance.name;
        let job = &upstream.name;
        let build = match builds.get(&(instance.clone(), job.clone())) {
            Some(Ok(build)) => build,
            Some(Err(e)) => {
                anyhow::bail!("{}: failed to fetch {instance}/{job}: {e}", view.identity())
            }
            None => return Ok(None),
        };
        if build.result != UPSTREAM_JOB_SUCCESS {
            debug!(
                "{}: last build of {instance}/{job} is {}",
                view.identity(),
                build.result
            );
            return Ok(None);
        }

        let url = &view.resource_template.url;
        let job_url = self.collaborators.ci.job_url(instance, job);
        let reason = format!(
            "{} via {job_url}/{}",
            commit_reason(url, &build.commit_sha),
            build.number
        );
        let trigger = TriggerSpec::UpstreamJob(UpstreamJobTrigger {
            base: self.trigger_base(view, &build.commit_sha, Some(reason)),
            instance_name: instance.clone(),
            job_name: job.clone(),
            state_content: build.clone(),
        });

        let stored = self.collaborators.state.get(&trigger.store_key()).await?;
        let stored: Option<UpstreamBuild> = stored.and_then(|v| serde_json::from_value(v).ok());
        if stored.as_ref() == Some(build) {
            return Ok(None);
        }
        Ok(Some(trigger))
    }

    /// Targets whose images, tagged with the head commit, have new digests
    pub async fn get_container_images_diff(&self) -> TriggerDiff {
        let candidates: Vec<TargetView<'_>> = self
            .targets()
            .filter(|view| {
                let target = view.target;
                !target.is_disabled()
                    && !is_commit_sha(&target.reference)
                    && target.images.as_ref().is_some_and(|i| !i.is_empty())
            })
            .collect();

        let results: Vec<_> = stream::iter(candidates)
            .map(|view| self.container_image_trigger(view))
            .buffered(self.pool_size())
            .collect()
            .await;
        TriggerDiff::from_results(TriggerKind::ContainerImage, results)
    }

    async fn container_image_trigger(&self, view: TargetView<'_>) -> Result<Option<TriggerSpec>> {
        let url = &view.resource_template.url;
        let reference = &view.target.reference;
        let commit_sha = self
            .collaborators
            .vcs
            .resolve_commit(url, reference)
            .await
            .with_context(|| format!("{}: failed to resolve {url}@{reference}", view.identity()))?;

        let hash_length = view
            .resource_template
            .hash_length
            .unwrap_or(self.settings.hash_length);
        let tag = commit_sha.get(..hash_length).unwrap_or(&commit_sha);

        let mut images = view.target.images.clone().unwrap_or_default();
        images.sort();
        let mut digests = BTreeMap::new();
        for image in &images {
            let image_ref = format!("{image}:{tag}");
            let digest = self
                .collaborators
                .registry
                .resolve_digest(&image_ref)
                .await
                .with_context(|| format!("{}: failed to resolve {image_ref}", view.identity()))?;
            digests.insert(image_ref, digest);
        }

        let mut sorted_digests: Vec<&str> = digests.values().map(String::as_str).collect();
        sorted_digests.sort_unstable();
        let state_content = sorted_digests.join(",");
        let pairs: Vec<String> = digests
            .iter()
            .map(|(image_ref, digest)| format!("{image_ref}@{digest}"))
            .collect();
        let reason = format!(
            "{} build {}",
            commit_reason(url, &commit_sha),
            pairs.join(", ")
        );

        let trigger = TriggerSpec::ContainerImage(ContainerImageTrigger {
            base: self.trigger_base(view, &commit_sha, Some(reason)),
            images,
            state_content: state_content.clone(),
        });
        let stored = self.collaborators.state.get(&trigger.store_key()).await?;
        if stored.as_ref().and_then(Value::as_str) == Some(state_content.as_str()) {
            return Ok(None);
        }
        Ok(Some(trigger))
    }

    /// Targets whose desired config hash differs from the last deployed one
    pub async fn get_configs_diff(&self) -> TriggerDiff {
        let candidates: Vec<TargetView<'_>> = self
            .targets()
            .filter(|view| !view.target.is_disabled())
            .collect();

        let results: Vec<_> = stream::iter(candidates)
            .map(|view| self.config_trigger(view))
            .buffered(self.pool_size())
            .collect()
            .await;
        TriggerDiff::from_results(TriggerKind::Config, results)
    }

    async fn config_trigger(&self, view: TargetView<'_>) -> Result<Option<TriggerSpec>> {
        let desired = remove_none_values(Some(&target_config(view)));
        let url = &view.resource_template.url;
        let reference = &view.target.reference;

        let trigger = TriggerSpec::Config(ConfigTrigger {
            base: self.trigger_base(view, reference, Some(commit_reason(url, reference))),
            target_name: view.target.name.clone(),
            resource_template_url: url.clone(),
            slos: view.target.slos.clone(),
            state_content: desired,
        });
        let stored = self.collaborators.state.get(&trigger.store_key()).await?;
        if let (Some(stored), TriggerSpec::Config(config)) = (stored.as_ref(), &trigger) {
            if hash_target_config(stored) == hash_target_config(&config.state_content) {
                return Ok(None);
            }
        }
        Ok(Some(trigger))
    }

    /// Persist the state of a trigger that has run
    pub async fn update_state(&self, trigger: &TriggerSpec) -> Result<()> {
        let value = trigger.state_content()?;
        self.collaborators
            .state
            .set(&trigger.store_key(), &value)
            .await
            .with_context(|| format!("Failed to store {}", trigger.store_key()))
    }

    /// Persist every trigger; called once the whole pass is done
    pub async fn update_states(&self, triggers: &[TriggerSpec]) -> Result<()> {
        for trigger in triggers {
            self.update_state(trigger).await?;
        }
        Ok(())
    }

    /// Archive download info for the commit a trigger reason points at
    pub async fn get_archive_info(&self, trigger_reason: &str) -> Result<ArchiveInfo, HerderError> {
        let captures = COMMIT_URL
            .captures(trigger_reason)
            .ok_or_else(|| HerderError::InvalidTriggerReason(trigger_reason.to_string()))?;
        let repo = &captures["repo"];
        let sha = &captures["sha"];
        Ok(self.collaborators.vcs.archive_info(repo, sha).await?)
    }

    /// Repository urls of every resource template
    #[must_use]
    pub fn collect_repo_urls(&self) -> BTreeSet<String> {
        self.saas_files
            .iter()
            .flat_map(|saas_file| &saas_file.resource_templates)
            .map(|rt| rt.url.clone())
            .collect()
    }

    /// Image names referenced by any target
    #[must_use]
    pub fn collect_image_patterns(&self) -> BTreeSet<String> {
        self.targets()
            .filter_map(|view| view.target.images.as_ref())
            .flatten()
            .cloned()
            .collect()
    }
}
