//! # Errors
//!
//! Typed errors raised by the engine.
//!
//! Validation errors are collected per run and reported together; they never
//! abort construction. Collaborator failures travel as `anyhow::Error` and are
//! wrapped in [`HerderError`] only where a caller needs to branch on them.

use thiserror::Error;

use crate::model::TargetIdentity;

/// A problem found while validating the SaaS file bundle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate target {0}")]
    DuplicateTarget(TargetIdentity),

    #[error("{target}: auto promotion requires a pinned commit sha, got ref '{reference}'")]
    AutoPromotionWithMovingRef {
        target: TargetIdentity,
        reference: String,
    },

    #[error("{target}: upstream job cannot be used with a pinned commit sha")]
    UpstreamWithCommitSha { target: TargetIdentity },

    #[error("{target}: images cannot be used with a pinned commit sha")]
    ImagesWithCommitSha { target: TargetIdentity },

    #[error("{target}: upstream job and images cannot be used together")]
    UpstreamWithImages { target: TargetIdentity },

    #[error("{target}: IMAGE_TAG parameter must not be derived from the pinned ref")]
    ImageTagEqualsRef { target: TargetIdentity },

    #[error("{target}: promotion data references channel '{channel}' which is not subscribed")]
    DanglingPromotionData {
        target: TargetIdentity,
        channel: String,
    },

    #[error("{target}: subscribed channel '{channel}' has no publishers")]
    UnknownChannel {
        target: TargetIdentity,
        channel: String,
    },

    #[error("{target}: channel '{channel}' is published from a different repository ({publisher_url})")]
    PromotionSourceMismatch {
        target: TargetIdentity,
        channel: String,
        publisher_url: String,
    },

    #[error("{target}: SLO document '{document}' does not cover this namespace")]
    SloDocumentNamespaceMismatch {
        target: TargetIdentity,
        document: String,
    },

    #[error("promotion channels form a cycle through {0}")]
    PromotionCycle(TargetIdentity),

    #[error("{target}: templated parameter '{parameter}' failed to render: {message}")]
    TemplatedParameter {
        target: TargetIdentity,
        parameter: String,
        message: String,
    },

    #[error("{target}: upstream job {instance}/{job} not found for this repository and ref")]
    UnknownUpstreamJob {
        target: TargetIdentity,
        instance: String,
        job: String,
    },
}

/// Errors surfaced by engine operations that cannot degrade gracefully
#[derive(Debug, Error)]
pub enum HerderError {
    #[error("invalid trigger reason '{0}': no commit url found")]
    InvalidTriggerReason(String),

    #[error("promotion validation failed")]
    PromotionsRejected,

    #[error("collaborator call failed: {0}")]
    Collaborator(#[from] anyhow::Error),
}

/// Errors raised while adding rendered resources to an inventory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("resource type {kind} is not managed in {cluster}/{namespace}")]
    NotInitialized {
        cluster: String,
        namespace: String,
        kind: String,
    },

    #[error("resource {kind}/{name} in {cluster}/{namespace} is already desired by another target")]
    Duplicate {
        cluster: String,
        namespace: String,
        kind: String,
        name: String,
    },

    #[error("rendered resource is missing kind or metadata.name")]
    Malformed,

    #[error("failed to render {target}: {message}")]
    Render { target: String, message: String },
}
