//! # Model
//!
//! Desired-state bundle types and the per-run records derived from them.

pub mod inventory;
pub mod promotion;
pub mod saas_file;
pub mod target;
pub mod trigger;

pub use inventory::{DesiredResource, ResourceInventory};
pub use promotion::{Channel, Promotion, PromotionData, PublishedPromotion};
pub use saas_file::{
    App, Bundle, CiInstance, Cluster, CodeComponent, Environment, Namespace, NamespaceApp,
    ParentSaasConfigPromotion, Parameters, PipelinesProvider, PromotionChannelData,
    ResourceTemplate, SaasFile, SecretParameter, SecretRef, Slo, SloDocument, SloNamespace,
    SloParameters, Target, TargetPromotion, Upstream,
};
pub use target::{is_commit_sha, TargetIdentity, TargetView};
pub use trigger::{
    ConfigTrigger, ContainerImageTrigger, MovingCommitTrigger, TriggerBase, TriggerKind,
    TriggerSpec, UpstreamBuild, UpstreamJobTrigger,
};
