//! SLO gating of triggers. Unlike promotion validation this is a soft veto:
//! a breached target drops out of the trigger set, the rest still run.

use futures::stream::{self, StreamExt};
use tracing::{error, warn};

use super::SaasHerder;
use crate::config::SloFailurePolicy;
use crate::model::{SloDocument, TriggerSpec};
use crate::observability::metrics;

impl SaasHerder {
    /// Drop triggers whose target has a breached SLO, unless the deployed ref
    /// is a hotfix version of the repository
    pub async fn filter_slo_breached_triggers(&self, triggers: Vec<TriggerSpec>) -> Vec<TriggerSpec> {
        let decisions: Vec<(TriggerSpec, bool)> = stream::iter(triggers)
            .map(|trigger| async move {
                let keep = self.passes_slo_gate(&trigger).await;
                (trigger, keep)
            })
            .buffered(self.pool_size())
            .collect()
            .await;

        decisions
            .into_iter()
            .filter_map(|(trigger, keep)| keep.then_some(trigger))
            .collect()
    }

    async fn passes_slo_gate(&self, trigger: &TriggerSpec) -> bool {
        let base = trigger.base();
        let target = self.find_target(base);
        let url = match trigger {
            TriggerSpec::Config(config) => Some(config.resource_template_url.as_str()),
            _ => target.map(|view| view.resource_template.url.as_str()),
        };
        let documents: &[SloDocument] = match trigger.slos() {
            Some(slos) => slos,
            None => target
                .and_then(|view| view.target.slos.as_deref())
                .unwrap_or_default(),
        };

        let covering: Vec<SloDocument> = documents
            .iter()
            .filter(|doc| doc.covers(&base.cluster_name, &base.namespace_name))
            .cloned()
            .collect();
        if covering.is_empty() {
            return true;
        }
        if url.is_some_and(|url| self.is_hotfix(url, &base.target_ref)) {
            return true;
        }

        match self
            .collaborators
            .slo
            .breached_slos(&base.namespace_name, &base.cluster_name, &covering)
            .await
        {
            Ok(breached) if breached.is_empty() => true,
            Ok(breached) => {
                let names: Vec<&str> = breached.iter().map(|slo| slo.name.as_str()).collect();
                warn!(
                    "Skipping {} in {}/{}: SLOs breached: {}",
                    base.saas_file_name,
                    base.cluster_name,
                    base.namespace_name,
                    names.join(", ")
                );
                metrics::increment_slo_gated_triggers();
                false
            }
            Err(e) => {
                error!(
                    "SLO query for {}/{} failed: {e:#}",
                    base.cluster_name, base.namespace_name
                );
                metrics::increment_collaborator_errors("slo");
                match self.settings.slo_failure_policy {
                    SloFailurePolicy::FailClosed => {
                        metrics::increment_slo_gated_triggers();
                        false
                    }
                    SloFailurePolicy::FailOpen => true,
                }
            }
        }
    }
}
