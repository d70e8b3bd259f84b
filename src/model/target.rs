//! # Target Identity
//!
//! A target is one resource template applied to one namespace. Its identity
//! tuple must be unique across a bundle and feeds every state key and uid the
//! engine derives.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

use crate::constants::TARGET_UID_LENGTH;
use crate::model::saas_file::{ResourceTemplate, SaasFile, Target};

static COMMIT_SHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("commit sha regex is valid"));

/// Whether a ref is a pinned (full, lowercase hex) git commit sha
#[must_use]
pub fn is_commit_sha(reference: &str) -> bool {
    COMMIT_SHA.is_match(reference)
}

/// `(saas_file, resource_template, cluster, namespace, environment)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub saas_file_name: String,
    pub resource_template_name: String,
    pub cluster_name: String,
    pub namespace_name: String,
    pub environment_name: String,
}

impl TargetIdentity {
    #[must_use]
    pub fn new(saas_file: &SaasFile, resource_template: &ResourceTemplate, target: &Target) -> Self {
        Self {
            saas_file_name: saas_file.name.clone(),
            resource_template_name: resource_template.name.clone(),
            cluster_name: target.namespace.cluster.name.clone(),
            namespace_name: target.namespace.name.clone(),
            environment_name: target.namespace.environment.name.clone(),
        }
    }

    /// Stable digest of the identity tuple, used as publisher id in channels
    /// and in promotion state keys
    #[must_use]
    pub fn uid(&self) -> String {
        let digest = Sha256::digest(
            format!(
                "{}:{}:{}:{}:{}",
                self.saas_file_name,
                self.resource_template_name,
                self.cluster_name,
                self.namespace_name,
                self.environment_name
            )
            .as_bytes(),
        );
        let mut hex = format!("{digest:x}");
        hex.truncate(TARGET_UID_LENGTH);
        hex
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.saas_file_name,
            self.resource_template_name,
            self.cluster_name,
            self.namespace_name,
            self.environment_name
        )
    }
}

/// Borrowed view of a target together with its parents
#[derive(Debug, Clone, Copy)]
pub struct TargetView<'a> {
    pub saas_file: &'a SaasFile,
    pub resource_template: &'a ResourceTemplate,
    pub target: &'a Target,
}

impl<'a> TargetView<'a> {
    #[must_use]
    pub fn identity(&self) -> TargetIdentity {
        TargetIdentity::new(self.saas_file, self.resource_template, self.target)
    }

    #[must_use]
    pub fn uid(&self) -> String {
        self.identity().uid()
    }

    /// Iterates every target of a bundle in declaration order
    pub fn all(saas_files: &'a [SaasFile]) -> impl Iterator<Item = TargetView<'a>> + 'a {
        saas_files.iter().flat_map(|saas_file| {
            saas_file.resource_templates.iter().flat_map(move |rt| {
                rt.targets.iter().map(move |target| TargetView {
                    saas_file,
                    resource_template: rt,
                    target,
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> TargetIdentity {
        TargetIdentity {
            saas_file_name: "saas".to_string(),
            resource_template_name: "rt".to_string(),
            cluster_name: "cluster".to_string(),
            namespace_name: "ns".to_string(),
            environment_name: "env".to_string(),
        }
    }

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("1234567890123456789012345678901234567890"));
        assert!(is_commit_sha("abcdefabcdefabcdefabcdefabcdefabcdefabcd"));
        assert!(!is_commit_sha("main"));
        assert!(!is_commit_sha("123456789012345678901234567890123456789"));
        assert!(!is_commit_sha("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
    }

    #[test]
    fn test_uid_is_stable_and_truncated() {
        let uid = identity().uid();
        assert_eq!(uid.len(), TARGET_UID_LENGTH);
        assert_eq!(uid, identity().uid());
    }

    #[test]
    fn test_uid_differs_per_environment() {
        let mut other = identity();
        other.environment_name = "prod".to_string();
        assert_ne!(identity().uid(), other.uid());
    }

    #[test]
    fn test_display_joins_identity_fields() {
        assert_eq!(identity().to_string(), "saas/rt/cluster/ns/env");
    }
}
