// engine.rs — Admission decision engine.
//
// Every request passes through `evaluate()`, which checks, in order:
//
// 1. Is this a signature resource (ConfigMap with the signature label)? → Allow
// 2. Does a skip-user rule match and no in-scope-user rule? → Allow
// 3. Is the object outside the constraint's object selector? → Allow
// 4. Does a skip-object rule match? → Allow
// 5. Is this an UPDATE whose masked, ignore-filtered diff is empty? → Allow
// 6. Otherwise → ask the signature verifier
//
// If the decision is still allow (from steps 2–6) and the constraint has an
// image profile, every in-scope image must also verify.
//
// The engine never fails: verifier errors become denials that carry the
// error text. Enforcement (inform vs enforce) is applied afterwards by the
// caller, see `enforcement.rs`.

use std::sync::Arc;

use ishield_mapnode::{DiffResult, Node};
use serde::{Deserialize, Serialize};

use crate::config::{ManifestIntegrityConstraint, RequestFilterProfile};
use crate::resource::{Operation, Resource};
use crate::verifier::{ImageVerifier, KeySecretResolver, ResourceVerifier, VerifyOptions};
use crate::{ANNOTATION_KEY_DOMAIN, DEFAULT_POD_NAMESPACE, SIGNATURE_ANNOTATION, SIGNATURE_RESOURCE_LABEL};

/// Fields that change on every write and never count as a mutation.
pub const MUTATION_MASK: &[&str] = &[
    "metadata.annotations.namespace",
    r#"metadata.annotations.kubectl."kubernetes.io/last-applied-configuration""#,
    "metadata.annotations.deprecated.daemonset.template.generation",
    "metadata.creationTimestamp",
    "metadata.uid",
    "metadata.generation",
    "metadata.managedFields",
    "metadata.selfLink",
    "metadata.resourceVersion",
    "status",
];

pub const MSG_SIGNATURE_RESOURCE: &str = "allowed because this resource is signatureResource.";
pub const MSG_SKIP_USERS: &str = "SkipUsers rule matched.";
pub const MSG_OUT_OF_SCOPE: &str = "ObjectSelector rule did not match. Out of scope of verification.";
pub const MSG_SKIP_OBJECTS: &str = "SkipObjects rule matched.";
pub const MSG_NO_MUTATION: &str = "no mutation found";
pub const MSG_NOT_PROTECTED: &str = "not protected";
const SIGNATURE_REQUIRED: &str = "Signature verification is required for this request, but";
const IMAGE_SIGNATURE_REQUIRED: &str =
    "Image signature verification is required, but failed to verify signature: ";

/// A request to decide: the new object, the prior version for updates, and
/// who is asking.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub resource: &'a Resource,
    pub old_resource: Option<&'a Resource>,
    pub username: &'a str,
    pub operation: Operation,
}

/// Allow/deny with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionResult {
    pub allow: bool,
    pub message: String,
}

impl DecisionResult {
    pub fn allow(message: impl Into<String>) -> Self {
        Self {
            allow: true,
            message: message.into(),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allow: false,
            message: message.into(),
        }
    }
}

/// One check the engine performed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationStep {
    /// Which check was performed (e.g. "skip_users", "mutation_check").
    pub check: String,
    /// What the check found (e.g. "passed", "matched: allow").
    pub outcome: String,
    /// Whether this step decided the request.
    pub terminal: bool,
}

/// A decision together with the ordered checks that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub decision: DecisionResult,
    pub steps: Vec<EvaluationStep>,
    /// Ignore fields that applied to the mutation check, if it ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_fields: Vec<String>,
}

impl EvaluationTrace {
    /// True when the decision came from the skip-users rule.
    pub fn skipped_by_user(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.check == "skip_users" && s.terminal)
    }
}

struct TraceBuilder {
    steps: Vec<EvaluationStep>,
}

impl TraceBuilder {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn pass(&mut self, check: &str, outcome: impl Into<String>) {
        self.steps.push(EvaluationStep {
            check: check.to_string(),
            outcome: outcome.into(),
            terminal: false,
        });
    }

    fn decide(&mut self, check: &str, outcome: impl Into<String>) {
        self.steps.push(EvaluationStep {
            check: check.to_string(),
            outcome: outcome.into(),
            terminal: true,
        });
    }
}

/// Process-level settings for the evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    /// Namespace used for verifier dry runs and for key secrets that name no
    /// namespace.
    pub pod_namespace: String,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            pod_namespace: DEFAULT_POD_NAMESPACE.to_string(),
        }
    }
}

/// The decision engine. Holds no per-request state and can be shared across
/// threads.
#[derive(Clone)]
pub struct PolicyEvaluator {
    verifier: Arc<dyn ResourceVerifier>,
    image_verifier: Option<Arc<dyn ImageVerifier>>,
    key_resolver: Option<Arc<dyn KeySecretResolver>>,
    settings: EvaluatorSettings,
}

impl PolicyEvaluator {
    pub fn new(verifier: Arc<dyn ResourceVerifier>) -> Self {
        Self {
            verifier,
            image_verifier: None,
            key_resolver: None,
            settings: EvaluatorSettings::default(),
        }
    }

    pub fn with_image_verifier(mut self, verifier: Arc<dyn ImageVerifier>) -> Self {
        self.image_verifier = Some(verifier);
        self
    }

    pub fn with_key_resolver(mut self, resolver: Arc<dyn KeySecretResolver>) -> Self {
        self.key_resolver = Some(resolver);
        self
    }

    pub fn with_settings(mut self, settings: EvaluatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Decide a request against a profile and constraint.
    pub fn evaluate(
        &self,
        request: &PolicyRequest<'_>,
        profile: &RequestFilterProfile,
        constraint: &ManifestIntegrityConstraint,
    ) -> DecisionResult {
        self.evaluate_with_trace(request, profile, constraint).decision
    }

    /// Same as [`evaluate`](Self::evaluate), also returning every check made.
    pub fn evaluate_with_trace(
        &self,
        request: &PolicyRequest<'_>,
        profile: &RequestFilterProfile,
        constraint: &ManifestIntegrityConstraint,
    ) -> EvaluationTrace {
        let mut trace = TraceBuilder::new();
        let mut ignore_fields = Vec::new();
        let resource = request.resource;

        if is_signature_resource(resource, request.old_resource, request.operation) {
            trace.decide("signature_resource", "matched: allow");
            return EvaluationTrace {
                decision: DecisionResult::allow(MSG_SIGNATURE_RESOURCE),
                steps: trace.steps,
                ignore_fields,
            };
        }
        trace.pass("signature_resource", "not a signature resource");

        let decision = 'stages: {
            let skip_user = profile.skip_users.matches(resource, request.username)
                || constraint.skip_users.matches(resource, request.username);
            let forced_user = constraint.in_scope_users.matches(resource, request.username);
            if skip_user && !forced_user {
                trace.decide("skip_users", "matched: allow");
                break 'stages DecisionResult::allow(MSG_SKIP_USERS);
            }
            trace.pass(
                "skip_users",
                if skip_user {
                    "matched, overridden by in-scope users"
                } else {
                    "no match"
                },
            );

            if !constraint.object_selector.matches(resource) {
                trace.decide("object_selector", "no match: allow");
                break 'stages DecisionResult::allow(MSG_OUT_OF_SCOPE);
            }
            trace.pass("object_selector", "matched");

            if profile.skip_objects.matches(resource) || constraint.skip_objects.matches(resource) {
                trace.decide("skip_objects", "matched: allow");
                break 'stages DecisionResult::allow(MSG_SKIP_OBJECTS);
            }
            trace.pass("skip_objects", "no match");

            if request.operation == Operation::Update {
                match request.old_resource {
                    Some(old) => {
                        ignore_fields = constraint
                            .ignore_fields
                            .matched_fields(resource)
                            .into_iter()
                            .chain(profile.ignore_fields.matched_fields(resource))
                            .collect();
                        let unfiltered = mutation_check(old.node(), resource.node(), &ignore_fields);
                        if unfiltered.is_empty() {
                            trace.decide("mutation_check", "no mutation: allow");
                            break 'stages DecisionResult::allow(MSG_NO_MUTATION);
                        }
                        trace.pass(
                            "mutation_check",
                            format!("{} mutated field(s)", unfiltered.size()),
                        );
                    }
                    None => trace.pass("mutation_check", "no prior version; verifying"),
                }
            }

            self.verify_signature(request, profile, constraint, &mut trace)
        };

        let decision = if decision.allow {
            self.verify_images(request, constraint, decision, &mut trace)
        } else {
            decision
        };

        EvaluationTrace {
            decision,
            steps: trace.steps,
            ignore_fields,
        }
    }

    fn verify_signature(
        &self,
        request: &PolicyRequest<'_>,
        profile: &RequestFilterProfile,
        constraint: &ManifestIntegrityConstraint,
        trace: &mut TraceBuilder,
    ) -> DecisionResult {
        let resource = request.resource;
        let options = self.build_verify_options(resource, profile, constraint);
        tracing::debug!(
            namespace = resource.namespace(),
            name = resource.name(),
            kind = resource.kind(),
            operation = %request.operation,
            user = request.username,
            options = ?options,
            "verify options"
        );

        let result = match self.verifier.verify(resource, &options) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    namespace = resource.namespace(),
                    name = resource.name(),
                    kind = resource.kind(),
                    operation = %request.operation,
                    user = request.username,
                    "{} verifier returned an error: {}",
                    SIGNATURE_REQUIRED,
                    e
                );
                trace.decide("signature_verification", format!("verifier error: {}", e));
                return DecisionResult::deny(e.to_string());
            }
        };
        tracing::debug!(
            namespace = resource.namespace(),
            name = resource.name(),
            in_scope = result.in_scope,
            verified = result.verified,
            signer = %result.signer,
            "verify result"
        );

        let decision = if !result.in_scope {
            DecisionResult::allow(MSG_NOT_PROTECTED)
        } else if result.verified {
            DecisionResult::allow(format!("signed by a valid signer: {}", result.signer))
        } else {
            match &result.diff {
                Some(diff) if !diff.is_empty() => DecisionResult::deny(format!(
                    "{} failed to verify signature. diff found: {}",
                    SIGNATURE_REQUIRED, diff
                )),
                _ if !result.signer.is_empty() => DecisionResult::deny(format!(
                    "{} no signer config matches with this resource. This is signed by {}",
                    SIGNATURE_REQUIRED, result.signer
                )),
                _ => DecisionResult::deny(format!("{} no signature is found.", SIGNATURE_REQUIRED)),
            }
        };
        trace.decide(
            "signature_verification",
            if decision.allow { "allow" } else { "deny" },
        );
        decision
    }

    fn verify_images(
        &self,
        request: &PolicyRequest<'_>,
        constraint: &ManifestIntegrityConstraint,
        decision: DecisionResult,
        trace: &mut TraceBuilder,
    ) -> DecisionResult {
        let profile = &constraint.image_profile;
        if !profile.enabled() {
            return decision;
        }
        let Some(verifier) = &self.image_verifier else {
            trace.decide("image_verification", "no image verifier configured: deny");
            return DecisionResult::deny(format!(
                "{}no image verifier is configured",
                IMAGE_SIGNATURE_REQUIRED
            ));
        };
        match verifier.verify(request.resource, profile) {
            Err(e) => {
                tracing::error!(name = request.resource.name(), "failed to verify images: {}", e);
                trace.decide("image_verification", format!("verifier error: {}", e));
                DecisionResult::deny(format!("{}{}", IMAGE_SIGNATURE_REQUIRED, e))
            }
            Ok(results) => match results.iter().find(|r| r.in_scope && !r.verified) {
                Some(failed) => {
                    trace.decide("image_verification", format!("{} not verified: deny", failed.image));
                    DecisionResult::deny(format!("{}{}", IMAGE_SIGNATURE_REQUIRED, failed.fail_reason))
                }
                None => {
                    trace.pass("image_verification", format!("{} image(s) checked", results.len()));
                    decision
                }
            },
        }
    }

    /// Merge constraint references, resolved keys and ignore fields into the
    /// options handed to the verifier.
    ///
    /// Ignore fields are the verify option's own, then the constraint's, then
    /// the profile's. The constraint's bindings are included so the verifier
    /// ignores the same fields the mutation check already ignored.
    pub fn build_verify_options(
        &self,
        resource: &Resource,
        profile: &RequestFilterProfile,
        constraint: &ManifestIntegrityConstraint,
    ) -> VerifyOptions {
        let mut options = constraint.verify_option.clone();
        let sig = &constraint.signature_ref;

        if !sig.image_ref.is_empty() {
            options.image_ref = sig.image_ref.clone();
        }
        if let Some(uri) = sig.signature_resource_ref.as_uri() {
            options.signature_resource_ref = uri;
        }
        if let Some(uri) = sig.provenance_resource_ref.as_uri() {
            options.provenance_resource_ref = uri;
        }
        options.dry_run_namespace = self.settings.pod_namespace.clone();
        if resource.has_annotation(SIGNATURE_ANNOTATION) {
            options.annotation_key_domain = Some(ANNOTATION_KEY_DOMAIN.to_string());
        }

        let key_paths = self.resolve_keys(constraint);
        if !key_paths.is_empty() {
            options.key_paths = key_paths;
        }

        options.ignore_fields = options
            .ignore_fields
            .merged(&constraint.ignore_fields)
            .merged(&profile.ignore_fields);
        options
    }

    fn resolve_keys(&self, constraint: &ManifestIntegrityConstraint) -> Vec<String> {
        let mut paths = Vec::new();
        for key in constraint.key_configs.iter().filter(|k| !k.key_secret_name.is_empty()) {
            let namespace = if key.key_secret_namespace.is_empty() {
                self.settings.pod_namespace.as_str()
            } else {
                key.key_secret_namespace.as_str()
            };
            let Some(resolver) = &self.key_resolver else {
                tracing::error!(
                    secret = %key.key_secret_name,
                    "failed to load key secret: no key resolver configured"
                );
                continue;
            };
            match resolver.resolve(namespace, &key.key_secret_name) {
                Ok(path) => paths.push(path.display().to_string()),
                Err(e) => tracing::error!("failed to load key secret: {}", e),
            }
        }
        paths
    }
}

/// Diff `old` against `new` after the fixed mask and return the differences
/// that no ignore field covers. Empty means no mutation.
pub fn mutation_check<S: AsRef<str>>(old: &Node, new: &Node, ignore_fields: &[S]) -> DiffResult {
    let dr = old.mask(MUTATION_MASK).diff(&new.mask(MUTATION_MASK));
    if dr.is_empty() {
        return dr;
    }
    dr.filter(ignore_fields).unfiltered
}

/// A ConfigMap carrying the signature label. On UPDATE the prior version must
/// carry it too; any other operation never qualifies.
pub fn is_signature_resource(
    resource: &Resource,
    old_resource: Option<&Resource>,
    operation: Operation,
) -> bool {
    if resource.kind() != "ConfigMap" || resource.label(SIGNATURE_RESOURCE_LABEL).is_none() {
        return false;
    }
    match operation {
        Operation::Create => true,
        Operation::Update => {
            old_resource.is_some_and(|old| old.label(SIGNATURE_RESOURCE_LABEL).is_some())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageProfile, KeyConfig, ResourceRef, SignatureRef};
    use crate::matcher::{
        ObjectFieldBinding, ObjectReference, ObjectReferenceList, ObjectUserBinding,
    };
    use crate::verifier::{
        ImageVerifyResult, KeyDirResolver, StaticVerifier, VerifierError, VerifyResult,
    };
    use ishield_mapnode::Difference;
    use std::sync::Mutex;

    fn resource(json: &str) -> Resource {
        Resource::new(Node::from_bytes(json.as_bytes()).unwrap()).unwrap()
    }

    fn deployment(replicas: u32) -> Resource {
        resource(&format!(
            r#"{{"apiVersion":"apps/v1","kind":"Deployment",
                "metadata":{{"name":"web","namespace":"prod","uid":"u-{r}","resourceVersion":"{r}"}},
                "spec":{{"replicas":{r}}},"status":{{"ready":{r}}}}}"#,
            r = replicas
        ))
    }

    fn constraint() -> ManifestIntegrityConstraint {
        ManifestIntegrityConstraint {
            constraint_name: "deploy".into(),
            object_selector: ObjectReferenceList(vec![ObjectReference {
                kind: "Deployment".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn users(names: &[&str]) -> crate::matcher::ObjectUserBindingList {
        vec![ObjectUserBinding {
            objects: ObjectReferenceList::default(),
            users: names.iter().map(|s| s.to_string()).collect(),
        }]
        .into()
    }

    fn evaluator(result: VerifyResult) -> PolicyEvaluator {
        PolicyEvaluator::new(Arc::new(StaticVerifier::new(result)))
    }

    fn create<'a>(r: &'a Resource, user: &'a str) -> PolicyRequest<'a> {
        PolicyRequest {
            resource: r,
            old_resource: None,
            username: user,
            operation: Operation::Create,
        }
    }

    /// Records the options it was called with.
    struct RecordingVerifier {
        seen: Mutex<Vec<VerifyOptions>>,
    }

    impl ResourceVerifier for RecordingVerifier {
        fn verify(&self, _: &Resource, options: &VerifyOptions) -> Result<VerifyResult, VerifierError> {
            self.seen.lock().unwrap().push(options.clone());
            Ok(VerifyResult {
                in_scope: true,
                verified: true,
                signer: "ops".into(),
                diff: None,
            })
        }
    }

    struct FixedImages(Vec<ImageVerifyResult>);

    impl ImageVerifier for FixedImages {
        fn verify(&self, _: &Resource, _: &ImageProfile) -> Result<Vec<ImageVerifyResult>, VerifierError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn signature_resource_is_allowed_on_create() {
        let cm = resource(
            r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"sig",
                "labels":{"integrityshield.io/signatureResource":"true"}}}"#,
        );
        let trace = evaluator(VerifyResult::default()).evaluate_with_trace(
            &create(&cm, "alice"),
            &RequestFilterProfile::default(),
            &constraint(),
        );
        assert!(trace.decision.allow);
        assert!(trace.decision.message.contains("signatureResource"));
        assert_eq!(trace.steps.len(), 1);
        assert!(trace.steps[0].terminal);
    }

    #[test]
    fn signature_resource_update_needs_label_on_both_versions() {
        let labelled = resource(
            r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"sig",
                "labels":{"integrityshield.io/signatureResource":"true"}}}"#,
        );
        let plain = resource(r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"sig"}}"#);
        assert!(is_signature_resource(&labelled, Some(&labelled), Operation::Update));
        assert!(!is_signature_resource(&labelled, Some(&plain), Operation::Update));
        assert!(!is_signature_resource(&labelled, None, Operation::Update));
        assert!(!is_signature_resource(&labelled, None, Operation::Delete));
        let secret = resource(
            r#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"sig",
                "labels":{"integrityshield.io/signatureResource":"true"}}}"#,
        );
        assert!(!is_signature_resource(&secret, None, Operation::Create));
    }

    #[test]
    fn skip_users_precede_scope_check() {
        let pod = resource(r#"{"apiVersion":"v1","kind":"Pod","metadata":{"name":"p"}}"#);
        let profile = RequestFilterProfile {
            skip_users: users(&["system:*"]),
            ..Default::default()
        };
        let decision = evaluator(VerifyResult::default()).evaluate(
            &create(&pod, "system:admin"),
            &profile,
            &constraint(),
        );
        assert_eq!(decision, DecisionResult::allow(MSG_SKIP_USERS));
    }

    #[test]
    fn in_scope_user_overrides_skip_users() {
        let pod = resource(r#"{"apiVersion":"v1","kind":"Pod","metadata":{"name":"p"}}"#);
        let profile = RequestFilterProfile {
            skip_users: users(&["*"]),
            ..Default::default()
        };
        let mut c = constraint();
        c.in_scope_users = users(&["alice"]);
        let trace = evaluator(VerifyResult::default()).evaluate_with_trace(
            &create(&pod, "alice"),
            &profile,
            &c,
        );
        assert_eq!(trace.decision, DecisionResult::allow(MSG_OUT_OF_SCOPE));
        assert!(!trace.skipped_by_user());
    }

    #[test]
    fn constraint_skip_objects_apply() {
        let d = deployment(1);
        let mut c = constraint();
        c.skip_objects = ObjectReferenceList(vec![ObjectReference {
            name: "web".into(),
            ..Default::default()
        }]);
        let decision = evaluator(VerifyResult::default()).evaluate(
            &create(&d, "alice"),
            &RequestFilterProfile::default(),
            &c,
        );
        assert_eq!(decision, DecisionResult::allow(MSG_SKIP_OBJECTS));
    }

    #[test]
    fn update_without_mutation_is_allowed() {
        let old = deployment(1);
        let new = resource(
            r#"{"apiVersion":"apps/v1","kind":"Deployment",
                "metadata":{"name":"web","namespace":"prod","uid":"other","resourceVersion":"9",
                    "managedFields":[{"manager":"kubectl"}]},
                "spec":{"replicas":1},"status":{"ready":0}}"#,
        );
        let request = PolicyRequest {
            resource: &new,
            old_resource: Some(&old),
            username: "alice",
            operation: Operation::Update,
        };
        let decision = evaluator(VerifyResult {
            in_scope: true,
            ..Default::default()
        })
        .evaluate(&request, &RequestFilterProfile::default(), &constraint());
        assert_eq!(decision, DecisionResult::allow(MSG_NO_MUTATION));
    }

    #[test]
    fn ignore_fields_from_profile_and_constraint_suppress_mutation() {
        let old = deployment(1);
        let new = deployment(3);
        let request = PolicyRequest {
            resource: &new,
            old_resource: Some(&old),
            username: "alice",
            operation: Operation::Update,
        };
        let profile = RequestFilterProfile {
            ignore_fields: vec![ObjectFieldBinding {
                objects: ObjectReferenceList::default(),
                fields: vec!["spec.replicas".into()],
            }]
            .into(),
            ..Default::default()
        };
        let trace = evaluator(VerifyResult {
            in_scope: true,
            ..Default::default()
        })
        .evaluate_with_trace(&request, &profile, &constraint());
        assert_eq!(trace.decision, DecisionResult::allow(MSG_NO_MUTATION));
        assert_eq!(trace.ignore_fields, vec!["spec.replicas".to_string()]);
    }

    #[test]
    fn update_without_old_object_goes_to_verification() {
        let new = deployment(2);
        let request = PolicyRequest {
            resource: &new,
            old_resource: None,
            username: "alice",
            operation: Operation::Update,
        };
        let decision = evaluator(VerifyResult {
            in_scope: true,
            ..Default::default()
        })
        .evaluate(&request, &RequestFilterProfile::default(), &constraint());
        assert!(!decision.allow);
        assert!(decision.message.contains("no signature is found"));
    }

    #[test]
    fn verifier_outcomes_map_to_messages() {
        let d = deployment(1);
        let eval = |result: VerifyResult| {
            evaluator(result).evaluate(&create(&d, "alice"), &RequestFilterProfile::default(), &constraint())
        };

        assert_eq!(eval(VerifyResult::default()), DecisionResult::allow(MSG_NOT_PROTECTED));

        let signed = eval(VerifyResult {
            in_scope: true,
            verified: true,
            signer: "ops@example.com".into(),
            diff: None,
        });
        assert!(signed.allow);
        assert!(signed.message.contains("ops@example.com"));

        let diff = DiffResult {
            items: vec![Difference::new("spec.replicas", Some(Node::from(serde_json::json!(1))), Some(Node::from(serde_json::json!(2))))],
        };
        let tampered = eval(VerifyResult {
            in_scope: true,
            verified: false,
            signer: String::new(),
            diff: Some(diff),
        });
        assert!(!tampered.allow);
        assert!(tampered.message.contains("diff found"));
        assert!(tampered.message.contains("spec.replicas"));

        let wrong_signer = eval(VerifyResult {
            in_scope: true,
            verified: false,
            signer: "mallory".into(),
            diff: Some(DiffResult::default()),
        });
        assert!(!wrong_signer.allow);
        assert!(wrong_signer.message.contains("This is signed by mallory"));
    }

    #[test]
    fn verifier_error_is_a_deny_with_error_text() {
        let d = deployment(1);
        let evaluator = PolicyEvaluator::new(Arc::new(StaticVerifier::failing("registry unreachable")));
        let trace = evaluator.evaluate_with_trace(
            &create(&d, "alice"),
            &RequestFilterProfile::default(),
            &constraint(),
        );
        assert_eq!(trace.decision, DecisionResult::deny("registry unreachable"));
        let last = trace.steps.last().unwrap();
        assert_eq!(last.check, "signature_verification");
        assert!(last.terminal);
    }

    #[test]
    fn verify_options_merge_refs_keys_and_ignore_fields() {
        let keys = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(keys.path().join("shield")).unwrap();
        std::fs::write(keys.path().join("shield/pubkey"), "k").unwrap();
        std::fs::create_dir_all(keys.path().join("ops-ns")).unwrap();
        std::fs::write(keys.path().join("ops-ns/ops"), "k").unwrap();

        let recorder = Arc::new(RecordingVerifier {
            seen: Mutex::new(Vec::new()),
        });
        let evaluator = PolicyEvaluator::new(recorder.clone())
            .with_key_resolver(Arc::new(KeyDirResolver::new(keys.path())))
            .with_settings(EvaluatorSettings {
                pod_namespace: "shield".into(),
            });

        let mut c = constraint();
        c.signature_ref = SignatureRef {
            image_ref: "registry.example.com/sig:1".into(),
            signature_resource_ref: ResourceRef {
                name: "sig".into(),
                namespace: "prod".into(),
            },
            provenance_resource_ref: ResourceRef {
                name: "prov".into(),
                namespace: String::new(),
            },
        };
        c.key_configs = vec![
            KeyConfig {
                key_secret_name: "pubkey".into(),
                key_secret_namespace: String::new(),
            },
            KeyConfig {
                key_secret_name: "missing".into(),
                key_secret_namespace: "shield".into(),
            },
            KeyConfig {
                key_secret_name: "ops".into(),
                key_secret_namespace: "ops-ns".into(),
            },
        ];
        c.ignore_fields = vec![ObjectFieldBinding {
            objects: ObjectReferenceList::default(),
            fields: vec!["spec.a".into()],
        }]
        .into();
        let profile = RequestFilterProfile {
            ignore_fields: vec![ObjectFieldBinding {
                objects: ObjectReferenceList::default(),
                fields: vec!["spec.b".into()],
            }]
            .into(),
            ..Default::default()
        };

        let annotated = resource(
            r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"web",
                "annotations":{"integrityshield.io/signature":"..."}}}"#,
        );
        let decision = evaluator.evaluate(&create(&annotated, "alice"), &profile, &c);
        assert!(decision.allow);

        let seen = recorder.seen.lock().unwrap();
        let options = &seen[0];
        assert_eq!(options.image_ref, "registry.example.com/sig:1");
        assert_eq!(options.signature_resource_ref, "k8s://ConfigMap/prod/sig");
        assert_eq!(options.provenance_resource_ref, "");
        assert_eq!(options.dry_run_namespace, "shield");
        assert_eq!(options.annotation_key_domain.as_deref(), Some("integrityshield.io"));
        assert_eq!(options.key_paths.len(), 2);
        assert!(options.key_path().contains(','));
        let fields: Vec<String> = options
            .ignore_fields
            .iter()
            .flat_map(|b| b.fields.clone())
            .collect();
        assert_eq!(fields, vec!["spec.a".to_string(), "spec.b".to_string()]);
    }

    #[test]
    fn image_stage_denies_first_failing_image() {
        let d = deployment(1);
        let mut c = constraint();
        c.image_profile = ImageProfile {
            matches: vec!["*".into()],
            exclude: vec![],
        };
        let images = FixedImages(vec![
            ImageVerifyResult {
                image: "a".into(),
                in_scope: false,
                verified: false,
                fail_reason: "ignored".into(),
            },
            ImageVerifyResult {
                image: "b".into(),
                in_scope: true,
                verified: false,
                fail_reason: "no signature for b".into(),
            },
        ]);
        let evaluator = evaluator(VerifyResult::default()).with_image_verifier(Arc::new(images));
        let trace =
            evaluator.evaluate_with_trace(&create(&d, "alice"), &RequestFilterProfile::default(), &c);
        assert!(!trace.decision.allow);
        assert!(trace.decision.message.ends_with("no signature for b"));
        assert_eq!(trace.steps.last().unwrap().check, "image_verification");
    }

    #[test]
    fn image_stage_without_verifier_fails_closed() {
        let d = deployment(1);
        let mut c = constraint();
        c.image_profile.matches = vec!["*".into()];
        let decision = evaluator(VerifyResult::default()).evaluate(
            &create(&d, "alice"),
            &RequestFilterProfile::default(),
            &c,
        );
        assert!(!decision.allow);
        assert!(decision.message.starts_with("Image signature verification is required"));
    }

    #[test]
    fn mutation_check_masks_fixed_fields() {
        let old = Node::from_bytes(
            br#"{"metadata":{"annotations":{"kubectl.kubernetes.io/last-applied-configuration":"{}",
                "deprecated.daemonset.template.generation":"1"},"generation":1}}"#,
        )
        .unwrap();
        let new = Node::from_bytes(
            br#"{"metadata":{"annotations":{"kubectl.kubernetes.io/last-applied-configuration":"{x}",
                "deprecated.daemonset.template.generation":"2"},"generation":2}}"#,
        )
        .unwrap();
        let none: [&str; 0] = [];
        assert!(mutation_check(&old, &new, &none).is_empty());
    }
}
