// evaluate.rs — Decide one admission request and print the response.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use ishield_policy::{
    AdmissionHandler, AdmissionLog, AdmissionRequest, EvaluatorSettings, JsonDirEventStore,
    KeyDirResolver, ManifestIntegrityConstraint, PolicyEvaluator, RequestHandlerConfig,
    ResourceVerifier, StaticImageVerifier, StaticVerifier, VerifyResult,
};
use serde::Deserialize;

use crate::settings::ShieldSettings;

#[derive(Args)]
pub struct EvaluateArgs {
    /// AdmissionRequest JSON, bare or wrapped in an AdmissionReview.
    request: PathBuf,
    /// ManifestIntegrityConstraint YAML.
    #[arg(long)]
    constraint: PathBuf,
    /// RequestHandlerConfig YAML (defaults to the settings entry).
    #[arg(long)]
    handler_config: Option<PathBuf>,
    /// Canned signature verification result (JSON). Without it every
    /// protected change is treated as unsigned.
    #[arg(long)]
    verifier_result: Option<PathBuf>,
    /// Image reference treated as signed; repeatable.
    #[arg(long = "trusted-image")]
    trusted_images: Vec<String>,
    /// Skip deny events and admission logs.
    #[arg(long)]
    no_side_effects: bool,
    /// Exit non-zero when the request is denied.
    #[arg(long)]
    fail_on_deny: bool,
}

#[derive(Deserialize)]
struct AdmissionReview {
    request: AdmissionRequest,
}

pub fn execute(args: &EvaluateArgs, settings: &ShieldSettings) -> anyhow::Result<()> {
    let request = read_request(&args.request)?;
    let constraint = ManifestIntegrityConstraint::load(&args.constraint)?;
    let config_path = args
        .handler_config
        .clone()
        .unwrap_or_else(|| settings.request_handler_config.clone());
    let config = RequestHandlerConfig::load_or_default(&config_path)?;

    let verifier: Arc<dyn ResourceVerifier> = match &args.verifier_result {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let result: VerifyResult = serde_json::from_str(&content)
                .with_context(|| format!("invalid verify result in {}", path.display()))?;
            Arc::new(StaticVerifier::new(result))
        }
        None => Arc::new(StaticVerifier::unsigned()),
    };
    let evaluator = PolicyEvaluator::new(verifier)
        .with_image_verifier(Arc::new(StaticImageVerifier::new(args.trusted_images.clone())))
        .with_key_resolver(Arc::new(KeyDirResolver::new(&settings.key_dir)))
        .with_settings(EvaluatorSettings {
            pod_namespace: settings.pod_namespace.clone(),
        });

    let reporter_path = config
        .decision_reporter
        .enabled
        .then(|| PathBuf::from(&config.decision_reporter.path));
    let mut handler = AdmissionHandler::new(evaluator, config);
    if !args.no_side_effects {
        handler = handler
            .with_event_store(Arc::new(JsonDirEventStore::new(&settings.deny_event_dir)?))
            .with_denial_log(Arc::new(AdmissionLog::open(&settings.events_file)?));
        if let Some(path) = reporter_path.filter(|p| !p.as_os_str().is_empty()) {
            handler = handler.with_decision_reporter(Arc::new(AdmissionLog::open(path)?));
        }
    }

    let response = handler.handle(&request, &constraint);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if args.fail_on_deny && !response.decision.allow {
        anyhow::bail!("request denied: {}", response.decision.message);
    }
    Ok(())
}

fn read_request(path: &std::path::Path) -> anyhow::Result<AdmissionRequest> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if let Ok(review) = serde_json::from_str::<AdmissionReview>(&content) {
        return Ok(review.request);
    }
    serde_json::from_str(&content)
        .with_context(|| format!("invalid admission request in {}", path.display()))
}
