//! # Constants
//!
//! Shared constants used throughout the engine.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default number of targets (or collaborator lookups) processed concurrently
pub const DEFAULT_THREAD_POOL_SIZE: usize = 10;

/// Default length of the commit SHA prefix used as an image tag
pub const DEFAULT_HASH_LENGTH: usize = 7;

/// Length of the hex digest kept for target config hashes
pub const CONFIG_HASH_LENGTH: usize = 16;

/// Length of the hex digest kept for target uids
pub const TARGET_UID_LENGTH: usize = 32;

/// Length of a full git commit SHA
pub const COMMIT_SHA_LENGTH: usize = 40;

/// Parameter name checked against pinned refs
pub const IMAGE_TAG_PARAMETER: &str = "IMAGE_TAG";

/// Build result that allows an upstream job to trigger a deployment
pub const UPSTREAM_JOB_SUCCESS: &str = "SUCCESS";

/// State store prefix for promotion records
pub const PROMOTION_STATE_PREFIX: &str = "promotions_v2";

/// Default request timeout for HTTP collaborators (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Retries attempted by HTTP collaborators on rate limiting or server errors
pub const DEFAULT_HTTP_MAX_RETRIES: u32 = 3;

/// Default GitHub API endpoint
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Default refresh interval of the feature toggle client (seconds)
pub const DEFAULT_FEATURE_TOGGLE_REFRESH_SECS: u64 = 15;

/// Feature toggle application name sent to the toggle server
pub const FEATURE_TOGGLE_APP_NAME: &str = "saas-herder";

/// Default directory for the file-backed state store
pub const DEFAULT_STATE_DIR: &str = "/tmp/saasherder/state";

/// Feature toggle switching trigger execution per cluster
pub const TRIGGER_TOGGLE_NAME: &str = "saasherder-trigger";
