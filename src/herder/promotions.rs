//! # Promotion Validator
//!
//! A run may only roll out when every subscriber's promotion is permissible.
//! Publishers record their outcome per channel and commit; subscribers are
//! checked against those records.

use anyhow::Result;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use super::SaasHerder;
use crate::error::HerderError;
use crate::model::{Promotion, PromotionData, PublishedPromotion, TriggerSpec};
use crate::observability::metrics;

impl SaasHerder {
    /// `true` when every subscriber promotion may proceed.
    ///
    /// A promotion is rejected when its commit is blocked, a publisher never
    /// succeeded with it, a publisher's config hash differs from the one
    /// recorded on the subscriber, or the publishers have not soaked long
    /// enough. Publishers without any record do not gate. Failing to read the
    /// state store rejects the run.
    pub async fn validate_promotions(&self) -> bool {
        for promotion in &self.promotions {
            if promotion.subscribe.is_empty() {
                continue;
            }
            if self.is_blocked(&promotion.url, &promotion.commit_sha) {
                error!(
                    "Commit {} of {} is blocked from promotion",
                    promotion.commit_sha, promotion.url
                );
                metrics::increment_promotion_validation_failures("blocked");
                return false;
            }
            if !self.promotion_permitted(promotion).await {
                return false;
            }
        }
        true
    }

    /// Triggers that may be recorded and run: SLO-breached triggers are
    /// dropped, and the whole set is rejected when a promotion is not
    /// permitted.
    pub async fn gate_triggers(
        &self,
        triggers: Vec<TriggerSpec>,
    ) -> Result<Vec<TriggerSpec>, HerderError> {
        let kept = self.filter_slo_breached_triggers(triggers).await;
        if !self.validate_promotions().await {
            return Err(HerderError::PromotionsRejected);
        }
        Ok(kept)
    }

    async fn promotion_permitted(&self, promotion: &Promotion) -> bool {
        let lookups: Vec<(&str, &str)> = promotion
            .subscribe
            .iter()
            .flat_map(|channel| {
                channel
                    .publisher_uids
                    .iter()
                    .map(move |uid| (channel.name.as_str(), uid.as_str()))
            })
            .collect();

        let records: Vec<_> = stream::iter(lookups)
            .map(|(channel, uid)| async move {
                let data = self
                    .promotion_state
                    .get_promotion_data(&promotion.commit_sha, channel, uid)
                    .await;
                (channel, uid, data)
            })
            .buffered(self.pool_size())
            .collect()
            .await;

        let now = Utc::now();
        let mut soaked = Duration::zero();
        let mut found = false;
        for (channel, uid, data) in records {
            let data: PromotionData = match data {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to read promotion data of {uid} in {channel}: {e:#}");
                    metrics::increment_promotion_validation_failures("state_error");
                    return false;
                }
            };
            found = true;

            if !data.succeeded() {
                info!(
                    "Publisher {uid} in {channel} has not succeeded with {}",
                    promotion.commit_sha
                );
                metrics::increment_promotion_validation_failures("publisher_not_succeeded");
                return false;
            }

            if let (Some(published_hash), Some(recorded)) = (
                data.target_config_hash.as_deref(),
                promotion.recorded_hashes(channel),
            ) {
                if !recorded.contains(&published_hash) {
                    info!(
                        "Publisher {uid} in {channel} deployed config {published_hash}, \
                         promotion of {} recorded {recorded:?}",
                        promotion.saas_file
                    );
                    metrics::increment_promotion_validation_failures("config_hash_mismatch");
                    return false;
                }
            }

            if let Some(check_in) = data.check_in {
                soaked += (now - check_in).max(Duration::zero());
            }
        }

        if found && promotion.soak_days > 0 {
            let required = Duration::days(i64::from(promotion.soak_days));
            if soaked < required {
                info!(
                    "Promotion of {} soaked {}h of required {}h",
                    promotion.saas_file,
                    soaked.num_hours(),
                    required.num_hours()
                );
                metrics::increment_promotion_validation_failures("soak_days");
                return false;
            }
        }
        true
    }

    /// Every stored publisher record of the channels in the bundle, grouped by
    /// channel
    pub async fn promotion_history(&self) -> Result<Vec<PublishedPromotion>> {
        let mut history = Vec::new();
        for channel in self.channels.values() {
            for uid in &channel.publisher_uids {
                for commit_sha in self.promotion_state.published_commits(&channel.name, uid).await? {
                    let Some(data) = self
                        .promotion_state
                        .get_promotion_data(&commit_sha, &channel.name, uid)
                        .await?
                    else {
                        continue;
                    };
                    history.push(PublishedPromotion {
                        channel: channel.name.clone(),
                        publisher_uid: uid.clone(),
                        commit_sha,
                        data,
                    });
                }
            }
        }
        Ok(history)
    }

    /// Record the outcome of this run for every publishing target.
    ///
    /// `has_succeeded_once` sticks once a commit has deployed successfully.
    pub async fn publish_promotions(&self, success: bool) -> Result<()> {
        let now = Utc::now();
        for promotion in &self.promotions {
            for channel in &promotion.publish {
                let previous = self
                    .promotion_state
                    .get_promotion_data(&promotion.commit_sha, channel, &promotion.saas_target_uid)
                    .await;
                let succeeded_before = match previous {
                    Ok(previous) => previous.is_some_and(|p| p.succeeded()),
                    Err(e) => {
                        warn!(
                            "Ignoring unreadable promotion data of {} in {channel}: {e:#}",
                            promotion.saas_target_uid
                        );
                        false
                    }
                };
                let data = PromotionData {
                    success,
                    target_config_hash: Some(promotion.target_config_hash.clone()),
                    saas_file: Some(promotion.saas_file.clone()),
                    has_succeeded_once: Some(success || succeeded_before),
                    check_in: Some(now),
                };
                self.promotion_state
                    .publish_promotion_data(
                        &promotion.commit_sha,
                        channel,
                        &promotion.saas_target_uid,
                        &data,
                    )
                    .await?;
                info!(
                    "Published {} of {} to {channel} (success: {success})",
                    promotion.commit_sha, promotion.saas_file
                );
            }
        }
        Ok(())
    }
}
