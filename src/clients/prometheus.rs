//! # Prometheus SLO Evaluator
//!
//! Evaluates SLO expressions with instant queries. An SLO is breached when
//! its current value is below the target.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::error_for_status;
use super::retry::send_with_retry;
use crate::model::{Slo, SloDocument};
use crate::providers::{BreachedSlo, SloEvaluator};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    /// `[timestamp, "value"]`
    value: (f64, String),
}

/// SLO evaluator backed by the Prometheus HTTP API.
///
/// The base url may contain `{cluster}`, which is replaced by the target's
/// cluster name for per-cluster Prometheus instances.
#[derive(Debug, Clone)]
pub struct PrometheusSloEvaluator {
    http: Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
}

impl PrometheusSloEvaluator {
    #[must_use]
    pub fn new(http: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            max_retries: crate::constants::DEFAULT_HTTP_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn query(&self, cluster: &str, expr: &str) -> Result<Option<f64>> {
        let url = format!("{}/api/v1/query", self.base_url.replace("{cluster}", cluster));
        let mut request = self.http.get(&url).query(&[("query", expr)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = send_with_retry(request, self.max_retries).await?;
        let response = error_for_status(response, "Prometheus query").await?;
        let body: QueryResponse = response
            .json()
            .await
            .context("Failed to decode Prometheus response")?;
        if body.status != "success" {
            return Err(anyhow!(
                "Prometheus query failed: {}",
                body.error.unwrap_or(body.status)
            ));
        }
        let Some(sample) = body.data.and_then(|data| data.result.into_iter().next()) else {
            return Ok(None);
        };
        let value = sample
            .value
            .1
            .parse::<f64>()
            .with_context(|| format!("Invalid sample value '{}'", sample.value.1))?;
        Ok(Some(value))
    }
}

/// Expression with the SLO window filled in
fn expand_expr(slo: &Slo) -> String {
    let window = &slo.slo_parameters.window;
    slo.expr
        .replace("{{window}}", window)
        .replace("{{ window }}", window)
        .replace("$__range", window)
}

#[async_trait]
impl SloEvaluator for PrometheusSloEvaluator {
    async fn breached_slos(
        &self,
        namespace: &str,
        cluster: &str,
        documents: &[SloDocument],
    ) -> Result<Vec<BreachedSlo>> {
        let mut breached = Vec::new();
        for document in documents {
            for slo in &document.slos {
                let expr = expand_expr(slo);
                let Some(value) = self
                    .query(cluster, &expr)
                    .await
                    .with_context(|| format!("SLO {}/{}", document.name, slo.name))?
                else {
                    debug!("SLO {}/{} has no data for {namespace}", document.name, slo.name);
                    continue;
                };
                if value < slo.slo_target {
                    breached.push(BreachedSlo {
                        document: document.name.clone(),
                        name: slo.name.clone(),
                        current_value: value,
                        target: slo.slo_target,
                    });
                }
            }
        }
        Ok(breached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SloNamespace, SloParameters};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slo(name: &str, target: f64) -> Slo {
        Slo {
            name: name.to_string(),
            expr: format!("{name}_ratio[{{{{window}}}}]"),
            sli_type: "availability".to_string(),
            slo_target: target,
            slo_target_unit: "percent_0_1".to_string(),
            slo_parameters: SloParameters {
                window: "28d".to_string(),
            },
        }
    }

    fn sample(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [{"metric": {}, "value": [1700000000.0, value]}]}
        }))
    }

    #[test]
    fn test_expand_expr() {
        assert_eq!(expand_expr(&slo("availability", 0.9)), "availability_ratio[28d]");
    }

    #[tokio::test]
    async fn test_breached_slos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", "availability_ratio[28d]"))
            .respond_with(sample("0.95"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", "latency_ratio[28d]"))
            .respond_with(sample("0.5"))
            .mount(&server)
            .await;

        let http = crate::clients::build_http_client(Duration::from_secs(5)).unwrap();
        let evaluator = PrometheusSloEvaluator::new(http, server.uri(), None).with_max_retries(0);
        let document = SloDocument {
            name: "web-slos".to_string(),
            namespaces: vec![SloNamespace {
                name: "web".to_string(),
                cluster: "c1".to_string(),
                slo_namespace: None,
            }],
            slos: vec![slo("availability", 0.9), slo("latency", 0.9)],
        };
        let breached = evaluator
            .breached_slos("web", "c1", &[document])
            .await
            .unwrap();
        assert_eq!(breached.len(), 1);
        assert_eq!(breached[0].name, "latency");
        assert!((breached[0].current_value - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_query_error_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = crate::clients::build_http_client(Duration::from_secs(5)).unwrap();
        let evaluator = PrometheusSloEvaluator::new(http, server.uri(), None).with_max_retries(0);
        let document = SloDocument {
            name: "web-slos".to_string(),
            namespaces: Vec::new(),
            slos: vec![slo("availability", 0.9)],
        };
        assert!(evaluator.breached_slos("web", "c1", &[document]).await.is_err());
    }
}
