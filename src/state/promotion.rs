//! # Promotion State
//!
//! Publisher deployment outcomes, keyed by channel, publisher uid and commit:
//! `promotions_v2/{channel}/{uid}/{sha}`.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::StateStore;
use crate::constants::PROMOTION_STATE_PREFIX;
use crate::model::PromotionData;

#[derive(Clone)]
pub struct PromotionState {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for PromotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionState").finish_non_exhaustive()
    }
}

impl PromotionState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn key(channel: &str, target_uid: &str, commit_sha: &str) -> String {
        format!("{PROMOTION_STATE_PREFIX}/{channel}/{target_uid}/{commit_sha}")
    }

    /// Latest record of a publisher for a commit, `None` if it never ran
    pub async fn get_promotion_data(
        &self,
        commit_sha: &str,
        channel: &str,
        target_uid: &str,
    ) -> Result<Option<PromotionData>> {
        let key = Self::key(channel, target_uid, commit_sha);
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let data = serde_json::from_value(value)
            .context(format!("Malformed promotion data at {key}"))?;
        Ok(Some(data))
    }

    pub async fn publish_promotion_data(
        &self,
        commit_sha: &str,
        channel: &str,
        target_uid: &str,
        data: &PromotionData,
    ) -> Result<()> {
        let key = Self::key(channel, target_uid, commit_sha);
        let value = serde_json::to_value(data)?;
        self.store.set(&key, &value).await
    }

    /// Commits with recorded promotion data for a publisher in a channel
    pub async fn published_commits(&self, channel: &str, target_uid: &str) -> Result<Vec<String>> {
        let prefix = format!("{PROMOTION_STATE_PREFIX}/{channel}/{target_uid}/");
        Ok(self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(ToString::to_string))
            .collect())
    }
}
