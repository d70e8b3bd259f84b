//! SaaS file feature flags (`publishJobLogs`, `takeover`, `compare`) read
//! across every SaaS file of the run.

use super::SaasHerder;
use crate::model::SaasFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaasFileFeature {
    PublishJobLogs,
    Takeover,
    Compare,
}

impl SaasFileFeature {
    fn value(self, saas_file: &SaasFile) -> Option<bool> {
        match self {
            Self::PublishJobLogs => saas_file.publish_job_logs,
            Self::Takeover => saas_file.takeover,
            Self::Compare => saas_file.compare,
        }
    }
}

/// Aggregate value of a feature over the SaaS files of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSetting {
    /// No SaaS file sets the feature
    Unset,
    /// Every SaaS file that sets the feature agrees
    Value(bool),
    /// SaaS files disagree
    Ambiguous,
}

impl FeatureSetting {
    /// Resolve to a flag: `default` when unset, `false` when ambiguous
    #[must_use]
    pub fn enabled(self, default: bool) -> bool {
        match self {
            Self::Unset => default,
            Self::Value(value) => value,
            Self::Ambiguous => false,
        }
    }
}

impl SaasHerder {
    #[must_use]
    pub fn saas_file_feature(&self, feature: SaasFileFeature) -> FeatureSetting {
        let mut values = self
            .saas_files
            .iter()
            .filter_map(|saas_file| feature.value(saas_file));
        let Some(first) = values.next() else {
            return FeatureSetting::Unset;
        };
        if values.all(|value| value == first) {
            FeatureSetting::Value(first)
        } else {
            FeatureSetting::Ambiguous
        }
    }

    #[must_use]
    pub fn feature_enabled(&self, feature: SaasFileFeature, default: bool) -> bool {
        self.saas_file_feature(feature).enabled(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_setting_enabled() {
        assert!(FeatureSetting::Unset.enabled(true));
        assert!(!FeatureSetting::Unset.enabled(false));
        assert!(FeatureSetting::Value(true).enabled(false));
        assert!(!FeatureSetting::Ambiguous.enabled(true));
    }
}
