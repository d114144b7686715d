// record.rs — Per-constraint exemption records.
//
// A record holds at most one AdmissionResult per resource identity
// (group/version/kind/namespace/name). Newer results replace older ones in
// place, so merging the same results twice leaves the record unchanged apart
// from its timestamp.

use chrono::{DateTime, Utc};
use ishield_policy::{AdmissionResult, ResourceIdentity};
use serde::{Deserialize, Serialize};

/// `lastUpdate` format, e.g. `2024-05-01 12:30:00`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIME_FORMAT).to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionSpec {
    pub constraint_name: String,
    #[serde(default)]
    pub admission_results: Vec<AdmissionResult>,
    #[serde(default)]
    pub last_update: String,
}

/// Exemption record stored under the constraint's name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExemptionRecord {
    pub name: String,
    pub spec: ExemptionSpec,
}

impl ExemptionRecord {
    pub fn new(constraint_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: constraint_name.to_string(),
            spec: ExemptionSpec {
                constraint_name: constraint_name.to_string(),
                admission_results: Vec::new(),
                last_update: format_timestamp(now),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spec.admission_results.is_empty()
    }

    /// Replace-by-identity merge. Results for new identities are appended in
    /// arrival order.
    pub fn merge(&mut self, results: &[AdmissionResult], now: DateTime<Utc>) {
        for incoming in results {
            let identity = incoming.identity();
            match self
                .spec
                .admission_results
                .iter_mut()
                .find(|existing| existing.identity() == identity)
            {
                Some(slot) => *slot = incoming.clone(),
                None => self.spec.admission_results.push(incoming.clone()),
            }
        }
        self.spec.last_update = format_timestamp(now);
    }

    /// Keep only results for which `keep` returns true. Returns true if
    /// anything was removed; the timestamp is refreshed only then.
    pub fn retain<F>(&mut self, now: DateTime<Utc>, mut keep: F) -> bool
    where
        F: FnMut(&ResourceIdentity) -> bool,
    {
        let before = self.spec.admission_results.len();
        self.spec
            .admission_results
            .retain(|result| keep(&result.identity()));
        let removed = self.spec.admission_results.len() != before;
        if removed {
            self.spec.last_update = format_timestamp(now);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(name: &str, reason: &str) -> AdmissionResult {
        AdmissionResult {
            api_group: "apps".into(),
            api_version: "v1".into(),
            kind: "Deployment".into(),
            namespace: "prod".into(),
            name: name.into(),
            constraint_name: "c".into(),
            reason: reason.into(),
            ..Default::default()
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn timestamp_uses_space_separated_format() {
        assert_eq!(format_timestamp(at(0)), "1970-01-01 00:00:00");
    }

    #[test]
    fn merge_replaces_by_identity() {
        let mut record = ExemptionRecord::new("c", at(0));
        record.merge(&[result("a", "first"), result("b", "first")], at(1));
        record.merge(&[result("a", "second")], at(2));
        let reasons: Vec<(&str, &str)> = record
            .spec
            .admission_results
            .iter()
            .map(|r| (r.name.as_str(), r.reason.as_str()))
            .collect();
        assert_eq!(reasons, vec![("a", "second"), ("b", "first")]);
        assert_eq!(record.spec.last_update, format_timestamp(at(2)));
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = [result("a", "x"), result("b", "y"), result("a", "z")];
        let mut once = ExemptionRecord::new("c", at(0));
        once.merge(&batch, at(1));
        let mut twice = once.clone();
        twice.merge(&batch, at(1));
        assert_eq!(once, twice);
        assert_eq!(once.spec.admission_results.len(), 2);
    }

    #[test]
    fn retain_never_grows_and_reports_removal() {
        let mut record = ExemptionRecord::new("c", at(0));
        record.merge(&[result("a", "x"), result("b", "y")], at(1));
        assert!(!record.retain(at(5), |_| true));
        assert_eq!(record.spec.last_update, format_timestamp(at(1)));
        assert!(record.retain(at(5), |id| id.name == "b"));
        assert_eq!(record.spec.admission_results.len(), 1);
        assert_eq!(record.spec.last_update, format_timestamp(at(5)));
    }

    #[test]
    fn record_json_matches_stored_format() {
        let mut record = ExemptionRecord::new("c", at(0));
        record.merge(&[result("a", "x")], at(0));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["spec"]["constraintName"], "c");
        assert_eq!(json["spec"]["lastUpdate"], "1970-01-01 00:00:00");
        assert_eq!(json["spec"]["admissionResults"][0]["name"], "a");
    }
}
