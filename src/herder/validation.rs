//! Bundle validation. Problems are collected into the herder's error list and
//! never abort construction.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::{error, warn};

use super::SaasHerder;
use crate::constants::IMAGE_TAG_PARAMETER;
use crate::error::ValidationError;
use crate::model::{is_commit_sha, TargetView};
use crate::observability::metrics;

impl SaasHerder {
    pub(super) fn validate(&mut self) {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let urls_by_uid: HashMap<String, &str> = self
            .targets()
            .map(|view| (view.uid(), view.resource_template.url.as_str()))
            .collect();

        for view in self.targets() {
            let identity = view.identity();
            if !seen.insert(identity.clone()) {
                errors.push(ValidationError::DuplicateTarget(identity.clone()));
            }
            self.validate_target(view, &urls_by_uid, &mut errors);
        }
        self.errors.extend(errors);
    }

    fn validate_target(
        &self,
        view: TargetView<'_>,
        urls_by_uid: &HashMap<String, &str>,
        errors: &mut Vec<ValidationError>,
    ) {
        let target = view.target;
        let identity = view.identity();
        let pinned = is_commit_sha(&target.reference);
        let has_images = target.images.as_ref().is_some_and(|i| !i.is_empty());

        if let Some(promotion) = &target.promotion {
            if promotion.auto == Some(true) && !pinned {
                errors.push(ValidationError::AutoPromotionWithMovingRef {
                    target: identity.clone(),
                    reference: target.reference.clone(),
                });
            }
        }
        if target.upstream.is_some() && pinned {
            errors.push(ValidationError::UpstreamWithCommitSha {
                target: identity.clone(),
            });
        }
        if has_images && pinned {
            errors.push(ValidationError::ImagesWithCommitSha {
                target: identity.clone(),
            });
        }
        if target.upstream.is_some() && has_images {
            errors.push(ValidationError::UpstreamWithImages {
                target: identity.clone(),
            });
        }
        if pinned && self.image_tag_matches_ref(view) {
            errors.push(ValidationError::ImageTagEqualsRef {
                target: identity.clone(),
            });
        }

        let subscribed = target.subscribed_channels();
        if let Some(data) = target
            .promotion
            .as_ref()
            .and_then(|p| p.promotion_data.as_ref())
        {
            for entry in data {
                if !subscribed.contains(&entry.channel) {
                    errors.push(ValidationError::DanglingPromotionData {
                        target: identity.clone(),
                        channel: entry.channel.clone(),
                    });
                }
            }
        }

        for channel_name in subscribed {
            let Some(channel) = self.channels.get(channel_name) else {
                errors.push(ValidationError::UnknownChannel {
                    target: identity.clone(),
                    channel: channel_name.clone(),
                });
                continue;
            };
            let mismatch = channel
                .publisher_uids
                .iter()
                .filter_map(|uid| urls_by_uid.get(uid))
                .find(|url| **url != view.resource_template.url);
            if let Some(publisher_url) = mismatch {
                errors.push(ValidationError::PromotionSourceMismatch {
                    target: identity.clone(),
                    channel: channel_name.clone(),
                    publisher_url: (*publisher_url).to_string(),
                });
            }
        }

        for document in target.slos.iter().flatten() {
            if !document.covers(&target.namespace.cluster.name, &target.namespace.name) {
                errors.push(ValidationError::SloDocumentNamespaceMismatch {
                    target: identity.clone(),
                    document: document.name.clone(),
                });
            }
        }
    }

    /// Whether `IMAGE_TAG` is just the short form of the pinned ref, which
    /// would deploy an image tag that is never built for that commit
    fn image_tag_matches_ref(&self, view: TargetView<'_>) -> bool {
        let hash_length = view
            .resource_template
            .hash_length
            .unwrap_or(self.settings.hash_length);
        let Some(short_ref) = view.target.reference.get(..hash_length) else {
            return false;
        };
        [
            view.target.parameters.as_ref(),
            view.resource_template.parameters.as_ref(),
            view.saas_file.parameters.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find_map(|params| params.get(IMAGE_TAG_PARAMETER))
        .and_then(serde_json::Value::as_str)
        .is_some_and(|tag| tag == short_ref)
    }

    /// Check that every upstream job exists and builds the target's
    /// repository and ref. Lookup failures are logged and do not add errors.
    pub async fn validate_upstream_jobs(&mut self) {
        let checks: Vec<_> = self
            .targets()
            .filter_map(|view| {
                view.target.upstream.as_ref().map(|upstream| {
                    (
                        view.identity(),
                        upstream.instance.name.clone(),
                        upstream.name.clone(),
                        view.resource_template.url.clone(),
                        view.target.reference.clone(),
                    )
                })
            })
            .collect();

        let ci = &self.collaborators.ci;
        let results: Vec<_> = stream::iter(checks)
            .map(|(identity, instance, job, url, reference)| async move {
                let exists = ci.job_exists(&instance, &job, &url, &reference).await;
                (identity, instance, job, exists)
            })
            .buffered(self.pool_size())
            .collect()
            .await;

        for (identity, instance, job, exists) in results {
            match exists {
                Ok(true) => {}
                Ok(false) => {
                    let err = ValidationError::UnknownUpstreamJob {
                        target: identity,
                        instance,
                        job,
                    };
                    error!("Validation error: {err}");
                    metrics::increment_validation_errors(1);
                    self.errors.push(err);
                }
                Err(e) => {
                    warn!("Could not look up upstream job {instance}/{job} for {identity}: {e:#}");
                    metrics::increment_collaborator_errors("upstream-jobs");
                }
            }
        }
    }
}
