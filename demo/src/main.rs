//! keel command-line driver.
//!
//! Runs the mutate and generate pipelines against resources read from disk,
//! with in-memory stores standing in for a cluster.
//!
//! Usage:
//!   cargo run -p demo -- mutate --policy demo/policies/pod-defaults.toml --resource demo/resources/pod.json --user alice
//!   cargo run -p demo -- generate --policy demo/policies/namespace-defaults.toml \
//!       --resource demo/resources/namespace.json --existing demo/resources/registry-secret.json

use std::{fs, path::Path, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use keel_audit::{InMemoryEventRecorder, InMemoryViolationRecorder};
use keel_contracts::{
    error::{KeelError, KeelResult},
    generate::GenerateRequest,
    policy::{RequestInfo, UserInfo},
    resource::ResourceExt,
};
use keel_core::{traits::ResourceStore, InMemoryPolicyStore, InMemoryResourceStore};
use keel_generate::{GenerateController, InMemoryGenerateRequestStore};
use keel_policy::{mutate, PolicyContext, PolicySet};

// ── CLI definition ────────────────────────────────────────────────────────────

/// keel: mutate and generate Kubernetes-style resources from policies.
#[derive(Parser)]
#[command(name = "keel", about = "keel policy engine driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every mutate rule in the policy file to a resource.
    Mutate {
        /// Policy file (.toml, or .json for a single policy or a policy set).
        #[arg(long)]
        policy: PathBuf,
        /// Resource document (JSON).
        #[arg(long)]
        resource: PathBuf,
        /// Username of the admission caller. Omit for a background pass.
        #[arg(long)]
        user: Option<String>,
    },
    /// Run one generate pass for a triggering resource.
    Generate {
        #[arg(long)]
        policy: PathBuf,
        /// The triggering resource (JSON).
        #[arg(long)]
        resource: PathBuf,
        /// Objects to seed the store with, such as clone sources.
        #[arg(long)]
        existing: Vec<PathBuf>,
        #[arg(long)]
        user: Option<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for per-rule output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Mutate { policy, resource, user } => run_mutate(&policy, &resource, user),
        Command::Generate {
            policy,
            resource,
            existing,
            user,
        } => run_generate(&policy, &resource, &existing, user),
    };

    if let Err(e) = result {
        eprintln!("keel: {e}");
        std::process::exit(1);
    }
}

// ── mutate ────────────────────────────────────────────────────────────────────

fn run_mutate(policy_path: &Path, resource_path: &Path, user: Option<String>) -> KeelResult<()> {
    let policies = PolicySet::from_file(policy_path)?;
    let mut resource = read_resource(resource_path)?;
    let info = request_info(user);

    let mut responses = Vec::new();
    for policy in &policies.policies {
        let ctx = PolicyContext::new(policy, resource.clone(), info.clone());
        let response = mutate(&ctx);
        info!(
            policy = %policy.name,
            applied = response.policy_response.rules_applied_count,
            failed = response.failed_rules().len(),
            "mutation finished"
        );
        resource = response.patched_resource.clone();
        responses.push(json!({
            "policy": policy.name,
            "rules": response.policy_response.rules,
            "patches": response.patches(),
        }));
    }

    print_json(&json!({ "responses": responses, "patchedResource": resource }))
}

// ── generate ──────────────────────────────────────────────────────────────────

fn run_generate(policy_path: &Path, resource_path: &Path, existing: &[PathBuf], user: Option<String>) -> KeelResult<()> {
    let policies = PolicySet::from_file(policy_path)?;
    let trigger = read_resource(resource_path)?;

    let store = Arc::new(InMemoryResourceStore::new());
    for path in existing {
        store.insert(read_resource(path)?);
    }
    store.insert(trigger.clone());

    let policy_store = Arc::new(InMemoryPolicyStore::new());
    for policy in &policies.policies {
        policy_store.insert(policy.clone());
    }
    let requests = Arc::new(InMemoryGenerateRequestStore::new());
    let violations = Arc::new(InMemoryViolationRecorder::new());
    let events = Arc::new(InMemoryEventRecorder::new());
    let controller = GenerateController::new(
        store.clone(),
        policy_store,
        requests.clone(),
        requests.clone(),
        violations.clone(),
        events.clone(),
    );

    let info = request_info(user);
    let mut results = Vec::new();
    for policy in policies.policies.iter().filter(|p| p.has_generate()) {
        let request = GenerateRequest::new(&policy.name, trigger.spec(), info.clone());
        requests.insert(request.clone());
        controller.process_request(&request)?;

        let status = requests.status(&request.name).unwrap_or_default();
        let created: Vec<Value> = status
            .generated_resources
            .iter()
            .filter_map(|spec| store.get(&spec.kind, &spec.namespace, &spec.name).ok())
            .collect();
        results.push(json!({
            "policy": policy.name,
            "request": request.name,
            "status": status,
            "resources": created,
        }));
    }

    print_json(&json!({
        "requests": results,
        "violations": violations.export_log(),
        "events": events.export_log(),
    }))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn request_info(user: Option<String>) -> RequestInfo {
    user.map(|username| RequestInfo {
        user_info: UserInfo {
            username,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap_or_default()
}

fn read_resource(path: &Path) -> KeelResult<Value> {
    let text = fs::read_to_string(path).map_err(|e| KeelError::Config {
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    serde_json::from_str(&text).map_err(|e| KeelError::ParseFailed {
        reason: format!("{}: {e}", path.display()),
    })
}

fn print_json(value: &Value) -> KeelResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| KeelError::ParseFailed {
        reason: e.to_string(),
    })?;
    println!("{text}");
    Ok(())
}
