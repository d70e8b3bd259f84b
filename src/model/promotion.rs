//! # Promotion Records
//!
//! Per-run view of the promotion graph. Publishers write [`PromotionData`] into
//! the state store; subscribers are validated against it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::model::saas_file::PromotionChannelData;

/// A named group of publisher targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub publisher_uids: Vec<String>,
}

/// Promotion information of one rendered target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    /// Repository url of the resource template
    pub url: String,
    /// Commit deployed by the target (the resolved ref)
    pub commit_sha: String,
    pub saas_file: String,
    pub target_config_hash: String,
    pub saas_target_uid: String,
    #[serde(default)]
    pub soak_days: u32,
    #[serde(default)]
    pub subscribe: Vec<Channel>,
    #[serde(default)]
    pub publish: Vec<String>,
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub promotion_data: Option<Vec<PromotionChannelData>>,
}

impl Promotion {
    /// Config hashes recorded for a subscribed channel, `None` when the
    /// channel has no entry
    #[must_use]
    pub fn recorded_hashes(&self, channel: &str) -> Option<Vec<&str>> {
        self.promotion_data
            .as_ref()?
            .iter()
            .find(|entry| entry.channel == channel)
            .map(|entry| {
                entry
                    .data
                    .iter()
                    .map(|d| d.target_config_hash.as_str())
                    .collect()
            })
    }
}

/// Record persisted per (channel, publisher uid, commit sha)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionData {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saas_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_succeeded_once: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_check_in"
    )]
    pub check_in: Option<DateTime<Utc>>,
}

impl PromotionData {
    /// Whether the publisher has ever deployed this commit successfully.
    ///
    /// Records written before `has_succeeded_once` existed fall back to
    /// `success`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.has_succeeded_once.unwrap_or(self.success)
    }
}

/// A stored publisher record, as listed by the promotion history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedPromotion {
    pub channel: String,
    pub publisher_uid: String,
    pub commit_sha: String,
    pub data: PromotionData,
}

/// Accepts RFC 3339 as well as the `YYYY-MM-DD HH:MM:SS[.ffffff][+HH:MM]`
/// form found in older records
fn deserialize_check_in<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_check_in(&s).map_err(serde::de::Error::custom))
        .transpose()
}

pub(crate) fn parse_check_in(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ts| ts.and_utc())
        .map_err(|e| format!("invalid check_in timestamp '{raw}': {e}"))
}
