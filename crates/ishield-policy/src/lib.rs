//! # ishield-policy
//!
//! Admission decision engine for IntegrityShield.
//!
//! Every create/update request for a protected resource passes through the
//! [`PolicyEvaluator`], which walks a fixed, short-circuiting pipeline:
//! signature-resource bypass, skip users, object selector, skip objects, the
//! mutation check (masked structural diff filtered by ignore fields), and
//! finally the external signature and image verifiers. The
//! [`AdmissionHandler`] wraps the evaluator with request parsing, the
//! inform/enforce downgrade, deny events and the admission logs.
//!
//! ## Key invariants
//!
//! - **Fail closed**: an empty object selector protects nothing, but anything
//!   in scope that cannot be shown unmodified or signed is denied.
//! - **Skip users first**: a matching skip-user rule decides before the scope
//!   check, unless an in-scope-user rule names the requester.
//! - **Errors are not denials**: a verifier error becomes a deny carrying the
//!   error text; only unparseable requests produce an evaluation error.
//! - **Only `enforce` blocks**: every other mode turns a deny into
//!   `allowed because not enforced: <reason>`.

pub mod config;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod matcher;
pub mod report;
pub mod resource;
pub mod verifier;

pub use config::{
    ActionConfig, DecisionReporterConfig, ImageProfile, KeyConfig, LogConfig,
    ManifestIntegrityConstraint, RequestFilterProfile, RequestHandlerConfig, ResourceRef,
    SideEffectConfig, SignatureRef,
};
pub use enforcement::{apply_enforcement, effective_mode, EnforceMode};
pub use engine::{
    DecisionResult, EvaluationStep, EvaluationTrace, EvaluatorSettings, PolicyEvaluator,
    PolicyRequest,
};
pub use error::PolicyError;
pub use event::{DenyEvent, DenyEventStore, JsonDirEventStore, MemoryEventStore};
pub use handler::{AdmissionHandler, AdmissionResponse};
pub use matcher::{
    ObjectFieldBinding, ObjectFieldBindingList, ObjectReference, ObjectReferenceList,
    ObjectUserBinding, ObjectUserBindingList,
};
pub use report::{AdmissionLog, AdmissionResult};
pub use resource::{AdmissionRequest, Operation, Resource, ResourceIdentity};
pub use verifier::{
    ImageVerifier, ImageVerifyResult, KeyDirResolver, KeySecretResolver, ResourceVerifier,
    StaticImageVerifier, StaticVerifier, VerifierError, VerifyOptions, VerifyResult,
};

/// Label that marks a ConfigMap as a signature carrier.
pub const SIGNATURE_RESOURCE_LABEL: &str = "integrityshield.io/signatureResource";
/// Annotation that carries an inline resource signature.
pub const SIGNATURE_ANNOTATION: &str = "integrityshield.io/signature";
/// Annotation key domain passed to the verifier for inline signatures.
pub const ANNOTATION_KEY_DOMAIN: &str = "integrityshield.io";
pub const DEFAULT_POD_NAMESPACE: &str = "integrity-shield-operator-system";
