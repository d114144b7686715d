// handler.rs — Admission request handler.
//
// Wraps the engine for one admission request:
//
//   parse objects → evaluate → report skip-user allows → log denials
//     → apply enforcement → record deny event
//
// A request whose objects cannot be parsed is denied without evaluation and
// the parse error is returned alongside the decision. Failures of the logs
// and the event store are logged and never change the decision.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::{ManifestIntegrityConstraint, RequestHandlerConfig};
use crate::enforcement::{apply_enforcement, effective_mode, EnforceMode};
use crate::engine::{DecisionResult, EvaluationStep, PolicyEvaluator, PolicyRequest};
use crate::error::PolicyError;
use crate::event::{record_deny_event, DenyEventStore};
use crate::report::{AdmissionLog, AdmissionResult};
use crate::resource::AdmissionRequest;

const FAILED_TO_DECIDE: &str = "IntegrityShield failed to decide the response.";

/// The handler's answer to one admission request.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    #[serde(flatten)]
    pub decision: DecisionResult,
    pub steps: Vec<EvaluationStep>,
    /// Set when the request could not be evaluated at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AdmissionHandler {
    evaluator: PolicyEvaluator,
    config: RequestHandlerConfig,
    event_store: Option<Arc<dyn DenyEventStore>>,
    denial_log: Option<Arc<AdmissionLog>>,
    decision_reporter: Option<Arc<AdmissionLog>>,
}

impl AdmissionHandler {
    pub fn new(evaluator: PolicyEvaluator, config: RequestHandlerConfig) -> Self {
        Self {
            evaluator,
            config,
            event_store: None,
            denial_log: None,
            decision_reporter: None,
        }
    }

    /// Store for deny events. Events are only written when
    /// `sideEffect.createDenyEvent` is set.
    pub fn with_event_store(mut self, store: Arc<dyn DenyEventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Log that receives every deny before enforcement is applied.
    pub fn with_denial_log(mut self, log: Arc<AdmissionLog>) -> Self {
        self.denial_log = Some(log);
        self
    }

    /// Log that receives skip-user allows. Only written when
    /// `decisionReporter.enabled` is set.
    pub fn with_decision_reporter(mut self, log: Arc<AdmissionLog>) -> Self {
        self.decision_reporter = Some(log);
        self
    }

    pub fn config(&self) -> &RequestHandlerConfig {
        &self.config
    }

    pub fn handle(
        &self,
        request: &AdmissionRequest,
        constraint: &ManifestIntegrityConstraint,
    ) -> AdmissionResponse {
        let constraint_name = constraint.constraint_name.as_str();
        if constraint_name.is_empty() {
            tracing::warn!("constraint name is empty; set constraintName in the constraint");
        }
        tracing::info!(
            namespace = %request.namespace,
            name = %request.name,
            kind = %request.kind.kind,
            operation = %request.operation,
            user = %request.user_info.username,
            "process new request"
        );

        let (resource, old_resource) = match parse_objects(request) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(name = %request.name, error = %e, "failed to parse admission request");
                let decision = DecisionResult::deny(format!("{} {}", FAILED_TO_DECIDE, capitalize(&e.to_string())));
                log_decision(request, &decision);
                return AdmissionResponse {
                    uid: request.uid.clone(),
                    decision,
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mode = effective_mode(
            constraint.action.as_ref(),
            &self.config.default_constraint_action,
            constraint_name,
        );
        tracing::info!(constraint = constraint_name, mode = %mode, "enforce action is {}",
            if mode == EnforceMode::Enforce { "enabled" } else { "disabled" });

        let policy_request = PolicyRequest {
            resource: &resource,
            old_resource: old_resource.as_ref(),
            username: &request.user_info.username,
            operation: request.operation,
        };
        let trace = self.evaluator.evaluate_with_trace(
            &policy_request,
            &self.config.request_filter_profile,
            constraint,
        );
        let now = Utc::now();

        if trace.decision.allow && trace.skipped_by_user() && self.config.decision_reporter.enabled {
            if let Some(reporter) = &self.decision_reporter {
                let record = AdmissionResult::from_request(request, constraint_name, &trace.decision, now);
                if let Err(e) = reporter.append(&record) {
                    tracing::error!(error = %e, "failed to report decision");
                }
            }
        }

        if !trace.decision.allow {
            if let Some(log) = &self.denial_log {
                let record = AdmissionResult::from_request(request, constraint_name, &trace.decision, now);
                if let Err(e) = log.append(&record) {
                    tracing::error!(error = %e, "failed to append denial to event log");
                }
            }
        }

        let mut steps = trace.steps;
        let decision = apply_enforcement(trace.decision, mode);
        steps.push(EvaluationStep {
            check: "enforcement".to_string(),
            outcome: mode.to_string(),
            terminal: false,
        });
        log_decision(request, &decision);

        if !decision.allow && self.config.side_effect.create_deny_event {
            if let Some(store) = &self.event_store {
                let fallback = self.evaluator.settings().pod_namespace.as_str();
                if let Err(e) = record_deny_event(
                    store.as_ref(),
                    request,
                    constraint_name,
                    &decision.message,
                    fallback,
                    now,
                ) {
                    tracing::error!(error = %e, "failed to generate deny event");
                }
            }
        }

        AdmissionResponse {
            uid: request.uid.clone(),
            decision,
            steps,
            error: None,
        }
    }
}

fn parse_objects(
    request: &AdmissionRequest,
) -> Result<(crate::resource::Resource, Option<crate::resource::Resource>), PolicyError> {
    Ok((request.parse_object()?, request.parse_old_object()?))
}

fn log_decision(request: &AdmissionRequest, decision: &DecisionResult) {
    tracing::info!(
        namespace = %request.namespace,
        name = %request.name,
        kind = %request.kind.kind,
        operation = %request.operation,
        user = %request.user_info.username,
        allow = decision.allow,
        "{}",
        decision.message
    );
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
