//! # Feature Toggles
//!
//! Unleash client used to switch reconciliation off per cluster. Toggles are
//! fetched once on [`FeatureToggles::init`] and refreshed in the background
//! until [`FeatureToggles::shutdown`].
//!
//! Supported strategies:
//! - `default`: on
//! - `enableCluster`: on for clusters listed in `cluster_name`
//! - `disableCluster`: off for clusters listed in `cluster_name`
//!
//! Unknown strategies evaluate to off.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clients::error_for_status;
use crate::constants::FEATURE_TOGGLE_APP_NAME;

#[derive(Debug, Clone, Deserialize)]
struct FeaturesResponse {
    #[serde(default)]
    features: Vec<FeatureToggle>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureToggle {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Strategy {
    pub name: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Evaluation context of a toggle
#[derive(Debug, Clone, Default)]
pub struct ToggleContext {
    pub cluster_name: Option<String>,
}

impl ToggleContext {
    #[must_use]
    pub fn for_cluster(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: Some(cluster_name.into()),
        }
    }
}

impl Strategy {
    fn listed_clusters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .get("cluster_name")
            .map(String::as_str)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    fn lists_cluster(&self, context: &ToggleContext) -> bool {
        context
            .cluster_name
            .as_deref()
            .is_some_and(|cluster| self.listed_clusters().any(|name| name == cluster))
    }

    fn evaluate(&self, context: &ToggleContext) -> bool {
        match self.name.as_str() {
            "default" => true,
            "enableCluster" => self.lists_cluster(context),
            "disableCluster" => !self.lists_cluster(context),
            other => {
                debug!("Unknown toggle strategy '{other}'");
                false
            }
        }
    }
}

impl FeatureToggle {
    /// Off when disabled, on when there are no strategies, otherwise on when
    /// any strategy is on
    #[must_use]
    pub fn evaluate(&self, context: &ToggleContext) -> bool {
        if !self.enabled {
            return false;
        }
        self.strategies.is_empty() || self.strategies.iter().any(|s| s.evaluate(context))
    }
}

type ToggleMap = Arc<RwLock<HashMap<String, FeatureToggle>>>;

/// Feature toggle client
#[derive(Debug)]
pub struct FeatureToggles {
    toggles: ToggleMap,
    refresher: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl FeatureToggles {
    /// Client without a server: every lookup returns its default
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            toggles: Arc::new(RwLock::new(HashMap::new())),
            refresher: None,
        }
    }

    /// Client over a fixed toggle set
    #[must_use]
    pub fn from_toggles(toggles: impl IntoIterator<Item = FeatureToggle>) -> Self {
        let toggles = toggles.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self {
            toggles: Arc::new(RwLock::new(toggles)),
            refresher: None,
        }
    }

    /// Fetch the toggles and start refreshing them every `refresh_interval`
    pub async fn init(
        http: Client,
        api_url: &str,
        token: Option<String>,
        refresh_interval: Duration,
    ) -> Result<Self> {
        let fetcher = Fetcher {
            http,
            url: format!("{}/client/features", api_url.trim_end_matches('/')),
            token,
        };
        let initial = fetcher.fetch().await?;
        info!("Loaded {} feature toggles", initial.len());
        let toggles: ToggleMap = Arc::new(RwLock::new(initial));

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let shared = Arc::clone(&toggles);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => match fetcher.fetch().await {
                        Ok(latest) => *shared.write().await = latest,
                        Err(e) => warn!("Feature toggle refresh failed: {e:#}"),
                    },
                }
            }
            debug!("Feature toggle refresh stopped");
        });

        Ok(Self {
            toggles,
            refresher: Some((stop_tx, handle)),
        })
    }

    /// Evaluate `name`; unknown toggles return `default`
    pub async fn is_enabled(&self, name: &str, context: &ToggleContext, default: bool) -> bool {
        self.toggles
            .read()
            .await
            .get(name)
            .map_or(default, |toggle| toggle.evaluate(context))
    }

    /// Stop the background refresh
    pub async fn shutdown(self) {
        if let Some((stop, handle)) = self.refresher {
            // The task may already have exited
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!("Feature toggle refresh task failed: {e}");
            }
        }
    }
}

#[derive(Debug)]
struct Fetcher {
    http: Client,
    url: String,
    token: Option<String>,
}

impl Fetcher {
    async fn fetch(&self) -> Result<HashMap<String, FeatureToggle>> {
        let mut request = self
            .http
            .get(&self.url)
            .header("UNLEASH-APPNAME", FEATURE_TOGGLE_APP_NAME);
        if let Some(token) = &self.token {
            request = request.header("Authorization", token);
        }
        let response = request.send().await.context("Feature toggle request failed")?;
        let response = error_for_status(response, "Feature toggle server").await?;
        let body: FeaturesResponse = response
            .json()
            .await
            .context("Failed to decode feature toggles")?;
        Ok(body
            .features
            .into_iter()
            .map(|toggle| (toggle.name.clone(), toggle))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn toggle(enabled: bool, strategies: Vec<(&str, Option<&str>)>) -> FeatureToggle {
        FeatureToggle {
            name: "saasherder-trigger".to_string(),
            enabled,
            strategies: strategies
                .into_iter()
                .map(|(name, clusters)| Strategy {
                    name: name.to_string(),
                    parameters: clusters
                        .map(|c| HashMap::from([("cluster_name".to_string(), c.to_string())]))
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_disabled_toggle_is_off() {
        assert!(!toggle(false, vec![("default", None)]).evaluate(&ToggleContext::default()));
    }

    #[test]
    fn test_toggle_without_strategies_is_on() {
        assert!(toggle(true, vec![]).evaluate(&ToggleContext::default()));
    }

    #[test]
    fn test_cluster_strategies() {
        let enable = toggle(true, vec![("enableCluster", Some("c1, c2"))]);
        assert!(enable.evaluate(&ToggleContext::for_cluster("c2")));
        assert!(!enable.evaluate(&ToggleContext::for_cluster("c3")));
        assert!(!enable.evaluate(&ToggleContext::default()));

        let disable = toggle(true, vec![("disableCluster", Some("c1"))]);
        assert!(!disable.evaluate(&ToggleContext::for_cluster("c1")));
        assert!(disable.evaluate(&ToggleContext::for_cluster("c2")));
    }

    #[test]
    fn test_unknown_strategy_is_off() {
        assert!(!toggle(true, vec![("gradualRollout", None)]).evaluate(&ToggleContext::default()));
    }

    #[tokio::test]
    async fn test_unknown_toggle_uses_default() {
        let toggles = FeatureToggles::disabled();
        let context = ToggleContext::for_cluster("c1");
        assert!(toggles.is_enabled("anything", &context, true).await);
        assert!(!toggles.is_enabled("anything", &context, false).await);
    }

    #[tokio::test]
    async fn test_init_fetches_toggles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/features"))
            .and(header("Authorization", "client-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": 1,
                "features": [{
                    "name": "saasherder-trigger",
                    "enabled": true,
                    "strategies": [{"name": "disableCluster", "parameters": {"cluster_name": "c1"}}]
                }]
            })))
            .mount(&server)
            .await;

        let toggles = FeatureToggles::init(
            Client::new(),
            &format!("{}/api", server.uri()),
            Some("client-token".to_string()),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert!(
            !toggles
                .is_enabled("saasherder-trigger", &ToggleContext::for_cluster("c1"), true)
                .await
        );
        assert!(
            toggles
                .is_enabled("saasherder-trigger", &ToggleContext::for_cluster("c2"), false)
                .await
        );
        toggles.shutdown().await;
    }
}
