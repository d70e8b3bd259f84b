//! # Trigger Specs
//!
//! A trigger spec is a pending-deployment signal produced by one of the four
//! detectors. Each variant carries the value to persist once the deployment
//! fires (`state_content`) and the key under which that value lives.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::saas_file::{PipelinesProvider, SloDocument};
use crate::model::target::TargetIdentity;

/// Detector that produced a trigger; doubles as the state key prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    MovingCommit,
    UpstreamJob,
    ContainerImage,
    Config,
}

impl TriggerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MovingCommit => "moving-commits",
            Self::UpstreamJob => "upstream-jobs",
            Self::ContainerImage => "container-images",
            Self::Config => "configs",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every trigger variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBase {
    pub saas_file_name: String,
    pub env_name: String,
    pub timeout: Option<String>,
    pub pipelines_provider: PipelinesProvider,
    pub resource_template_name: String,
    pub cluster_name: String,
    pub namespace_name: String,
    /// Commit the triggered run deploys
    pub target_ref: String,
    /// Human-readable trace, only filled when requested
    pub reason: Option<String>,
}

impl TriggerBase {
    /// Identity of the target this trigger deploys
    #[must_use]
    pub fn identity(&self) -> TargetIdentity {
        TargetIdentity {
            saas_file_name: self.saas_file_name.clone(),
            resource_template_name: self.resource_template_name.clone(),
            cluster_name: self.cluster_name.clone(),
            namespace_name: self.namespace_name.clone(),
            environment_name: self.env_name.clone(),
        }
    }

    fn state_key(&self) -> String {
        self.identity().to_string()
    }
}

/// Latest completed build of a CI job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamBuild {
    pub number: u64,
    pub result: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovingCommitTrigger {
    #[serde(flatten)]
    pub base: TriggerBase,
    #[serde(rename = "ref")]
    pub reference: String,
    /// Head commit of `reference`
    pub state_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamJobTrigger {
    #[serde(flatten)]
    pub base: TriggerBase,
    pub instance_name: String,
    pub job_name: String,
    pub state_content: UpstreamBuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImageTrigger {
    #[serde(flatten)]
    pub base: TriggerBase,
    pub images: Vec<String>,
    /// Sorted digests joined by ","
    pub state_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTrigger {
    #[serde(flatten)]
    pub base: TriggerBase,
    pub target_name: Option<String>,
    pub resource_template_url: String,
    pub slos: Option<Vec<SloDocument>>,
    /// Full desired config of the target
    pub state_content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TriggerSpec {
    MovingCommit(MovingCommitTrigger),
    UpstreamJob(UpstreamJobTrigger),
    ContainerImage(ContainerImageTrigger),
    Config(ConfigTrigger),
}

impl TriggerSpec {
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::MovingCommit(_) => TriggerKind::MovingCommit,
            Self::UpstreamJob(_) => TriggerKind::UpstreamJob,
            Self::ContainerImage(_) => TriggerKind::ContainerImage,
            Self::Config(_) => TriggerKind::Config,
        }
    }

    #[must_use]
    pub fn base(&self) -> &TriggerBase {
        match self {
            Self::MovingCommit(t) => &t.base,
            Self::UpstreamJob(t) => &t.base,
            Self::ContainerImage(t) => &t.base,
            Self::Config(t) => &t.base,
        }
    }

    /// Key under which the detector stores the last triggered state.
    ///
    /// Image keys sort the image list so that reordering the bundle does not
    /// look like a change.
    #[must_use]
    pub fn state_key(&self) -> String {
        let base = self.base().state_key();
        match self {
            Self::MovingCommit(t) => format!("{base}/{}", t.reference),
            Self::UpstreamJob(t) => format!("{base}/{}/{}", t.instance_name, t.job_name),
            Self::ContainerImage(t) => {
                let mut images: Vec<&str> = t.images.iter().map(String::as_str).collect();
                images.sort_unstable();
                format!("{base}/{}", images.join("/"))
            }
            Self::Config(t) => match &t.target_name {
                Some(name) => format!("{base}/{name}"),
                None => base,
            },
        }
    }

    /// Full state store key: `{kind}/{state_key}`
    #[must_use]
    pub fn store_key(&self) -> String {
        format!("{}/{}", self.kind(), self.state_key())
    }

    /// Value persisted once the trigger has run
    pub fn state_content(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::MovingCommit(t) => Ok(serde_json::Value::String(t.state_content.clone())),
            Self::UpstreamJob(t) => serde_json::to_value(&t.state_content),
            Self::ContainerImage(t) => Ok(serde_json::Value::String(t.state_content.clone())),
            Self::Config(t) => Ok(t.state_content.clone()),
        }
    }

    /// SLO documents gating this trigger, when the trigger carries them
    #[must_use]
    pub fn slos(&self) -> Option<&[SloDocument]> {
        match self {
            Self::Config(t) => t.slos.as_deref(),
            _ => None,
        }
    }
}
