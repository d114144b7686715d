// aggregator.rs — Exemption aggregation loop.
//
// Event lines (one JSON AdmissionResult each) are queued as they arrive. On
// every timer tick the queue is drained and reconciled:
//
// 1. parse each line, skipping malformed ones;
// 2. group results by constraint name, dropping results with no name;
// 3. merge each group into its record (create or update);
// 4. prune every record: drop results whose resource no longer exists and
//    delete records that end up empty.
//
// Store and lookup failures are logged and only skip the affected record, so
// one bad record never stops the loop. Reconciliation is idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ishield_policy::AdmissionResult;
use tokio::sync::mpsc;

use crate::lookup::ResourceLookup;
use crate::record::ExemptionRecord;
use crate::store::ExemptionStore;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 10;

/// Parse an interval in whole seconds, falling back to the default (with a
/// warning) when the value is missing or invalid.
pub fn parse_interval(raw: Option<&str>) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Duration::from_secs(DEFAULT_INTERVAL_SECONDS);
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            tracing::warn!(
                value = raw,
                default = DEFAULT_INTERVAL_SECONDS,
                "failed to parse interval seconds; using default"
            );
            Duration::from_secs(DEFAULT_INTERVAL_SECONDS)
        }
    }
}

/// What one reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Lines parsed into admission results.
    pub accepted: usize,
    /// Lines that were not valid admission results.
    pub malformed: usize,
    /// Results dropped for having no constraint name.
    pub unnamed: usize,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// Records that lost entries but still exist.
    pub pruned: Vec<String>,
    pub deleted: Vec<String>,
    /// Records skipped because the store or lookup failed.
    pub failed: Vec<String>,
}

pub struct Aggregator {
    store: Arc<dyn ExemptionStore>,
    lookup: Arc<dyn ResourceLookup>,
    queue: Vec<String>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ExemptionStore>, lookup: Arc<dyn ResourceLookup>) -> Self {
        Self {
            store,
            lookup,
            queue: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, line: impl Into<String>) {
        self.queue.push(line.into());
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue and reconcile it into the store.
    pub fn reconcile(&mut self) -> ReconcileReport {
        self.reconcile_at(Utc::now())
    }

    pub fn reconcile_at(&mut self, now: DateTime<Utc>) -> ReconcileReport {
        let lines = std::mem::take(&mut self.queue);
        let mut report = ReconcileReport::default();

        let mut results = Vec::new();
        for line in lines.iter().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AdmissionResult>(line) {
                Ok(result) => results.push(result),
                Err(e) => {
                    report.malformed += 1;
                    tracing::debug!(error = %e, "skipping malformed event line");
                }
            }
        }
        report.accepted = results.len();

        for (constraint, group) in group_by_constraint(results) {
            if constraint.is_empty() {
                report.unnamed += group.len();
                tracing::warn!("constraint name is empty; exemption record will not be created");
                continue;
            }
            self.merge_group(&constraint, &group, now, &mut report);
        }

        self.prune_all(now, &mut report);
        report
    }

    fn merge_group(
        &self,
        constraint: &str,
        group: &[AdmissionResult],
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) {
        let existing = match self.store.get(constraint) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(constraint, error = %e, "failed to load exemption record");
                report.failed.push(constraint.to_string());
                return;
            }
        };
        let is_new = existing.is_none();
        let mut record = existing.unwrap_or_else(|| ExemptionRecord::new(constraint, now));
        record.merge(group, now);

        let saved = if is_new {
            self.store.create(&record)
        } else {
            self.store.update(&record)
        };
        match saved {
            Ok(()) => {
                tracing::info!(constraint, entries = record.spec.admission_results.len(), "updated exemption record");
                if is_new {
                    report.created.push(constraint.to_string());
                } else {
                    report.updated.push(constraint.to_string());
                }
            }
            Err(e) => {
                tracing::error!(constraint, error = %e, "failed to update/create exemption record");
                report.failed.push(constraint.to_string());
            }
        }
    }

    /// Drop entries for resources that no longer exist, across every record.
    fn prune_all(&self, now: DateTime<Utc>, report: &mut ReconcileReport) {
        let records = match self.store.list() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "failed to list exemption records");
                return;
            }
        };
        for mut record in records {
            let mut lookup_failed = false;
            let changed = record.retain(now, |identity| match self.lookup.exists(identity) {
                Ok(exists) => {
                    if !exists {
                        tracing::info!(resource = %identity, "removed exemption entry because resource does not exist");
                    }
                    exists
                }
                Err(e) => {
                    tracing::warn!(resource = %identity, error = %e, "resource lookup failed; keeping entry");
                    lookup_failed = true;
                    true
                }
            });
            if lookup_failed {
                report.failed.push(record.name.clone());
            }
            if !changed {
                continue;
            }
            if record.is_empty() {
                match self.store.delete(&record.name) {
                    Ok(()) => {
                        tracing::info!(record = %record.name, "removed exemption record because it has no entries");
                        report.deleted.push(record.name);
                    }
                    Err(e) => {
                        tracing::error!(record = %record.name, error = %e, "failed to delete exemption record");
                        report.failed.push(record.name);
                    }
                }
            } else {
                match self.store.update(&record) {
                    Ok(()) => report.pruned.push(record.name),
                    Err(e) => {
                        tracing::error!(record = %record.name, error = %e, "failed to update exemption record");
                        report.failed.push(record.name);
                    }
                }
            }
        }
    }

    /// Queue lines from `events` and reconcile on every `interval` tick.
    ///
    /// Returns after a final reconcile once the sender side is closed.
    pub async fn run(mut self, mut events: mpsc::Receiver<String>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                line = events.recv() => match line {
                    Some(line) => self.enqueue(line),
                    None => {
                        let report = self.reconcile();
                        tracing::info!(?report, "event source closed; final reconcile done");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    let report = self.reconcile();
                    tracing::debug!(?report, "reconciled exemption records");
                }
            }
        }
    }
}

/// Group results by constraint name, keeping first-seen order for both
/// groups and members.
fn group_by_constraint(results: Vec<AdmissionResult>) -> Vec<(String, Vec<AdmissionResult>)> {
    let mut groups: Vec<(String, Vec<AdmissionResult>)> = Vec::new();
    for result in results {
        match groups.iter_mut().find(|(name, _)| *name == result.constraint_name) {
            Some((_, members)) => members.push(result),
            None => groups.push((result.constraint_name.clone(), vec![result])),
        }
    }
    groups
}
