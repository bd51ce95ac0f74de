use bosk_tree::Difference;
use serde::Serialize;

use crate::manifest::Manifest;

/// Health of one replica relative to the shared log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusReport {
    /// Problems met while gathering the report. The other fields may be
    /// incomplete when this is set.
    pub error: Option<String>,
    pub manifest: ManifestStatus,
    pub state: StateStatus,
}

impl StatusReport {
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.manifest.matches() && self.state.difference.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManifestStatus {
    /// The manifest this replica runs with.
    pub expected: Manifest,
    /// The stored one, if it could be read.
    pub actual: Option<Manifest>,
}

impl ManifestStatus {
    pub fn matches(&self) -> bool {
        self.actual.as_ref() == Some(&self.expected)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateStatus {
    /// Replayed log state (expected) against this replica's tree (actual).
    pub difference: Difference,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::StateFormat;
    use bosk_types::Path;

    fn report(actual: Option<Manifest>, difference: Difference) -> StatusReport {
        StatusReport {
            error: None,
            manifest: ManifestStatus {
                expected: Manifest::new(StateFormat::Json),
                actual,
            },
            state: StateStatus { difference },
        }
    }

    #[test]
    fn healthy_only_when_everything_agrees() {
        let json = Some(Manifest::new(StateFormat::Json));
        assert!(report(json.clone(), Difference::NoDifference).is_healthy());
        assert!(!report(Some(Manifest::new(StateFormat::Bincode)), Difference::NoDifference).is_healthy());
        assert!(!report(None, Difference::NoDifference).is_healthy());
        let drifted = Difference::PrimitiveDifference {
            path: Path::parse("/name").unwrap(),
        };
        assert!(!report(json, drifted).is_healthy());
    }

    #[test]
    fn serializes_for_status_endpoints() {
        let json = serde_json::to_value(report(None, Difference::NoDifference)).unwrap();
        assert_eq!(json["manifest"]["actual"], serde_json::Value::Null);
        assert_eq!(json["state"]["difference"]["kind"], "no_difference");
    }
}
