//! # SaaS Herder
//!
//! Deployment reconciliation engine for GitOps-managed SaaS targets.
//!
//! The engine reads a bundle of SaaS files, compares it with the trigger and
//! promotion state recorded in a key/value store and with external systems,
//! and decides which targets must be deployed and whether gated promotions
//! may proceed.
//!
//! ## Modules
//!
//! - [`model`]: bundle types, target identities, trigger specs, promotion
//!   records and the desired resource inventory
//! - [`state`]: key/value state store and the promotion state layer
//! - [`herder`]: the engine (validation, populator, detectors, promotion
//!   and SLO gates)
//! - [`providers`]: collaborator traits
//! - [`clients`]: HTTP implementations of the collaborators
//! - [`feature_flags`]: per-cluster feature toggles
//! - [`config`], [`observability`]: settings, logging and metrics

pub mod clients;
pub mod config;
pub mod constants;
pub mod error;
pub mod feature_flags;
pub mod herder;
pub mod model;
pub mod observability;
pub mod providers;
pub mod state;
pub mod utils;

pub use config::{HerderConfig, HerderSettings, SloFailurePolicy};
pub use error::{HerderError, InventoryError, ValidationError};
pub use herder::{Collaborators, FeatureSetting, SaasFileFeature, SaasHerder, TriggerDiff};
