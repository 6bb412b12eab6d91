//! Submit one wallet operation and follow it to a terminal status.
//!
//! ```text
//! op_lifecycle --kind internal_transfer --payload transfer.json [--env dev]
//! ```
//!
//! The final engine state is printed to stdout as JSON. With the
//! `mock-backend` feature, `--mock` runs against a scripted in-memory
//! backend instead of the configured one.

use anyhow::{Context, Result, anyhow, bail};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use op_lifecycle::config::AppConfig;
use op_lifecycle::lifecycle::{
    ActiveOperationRegistry, EngineState, EnvCredentials, OperationEngine, OperationKind, Payload,
};
use op_lifecycle::logging;

/// How often the follow loop re-checks that a poll is still running
const WAKE_INTERVAL: Duration = Duration::from_secs(1);

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn use_mock_backend() -> bool {
    std::env::args().any(|a| a == "--mock")
}

fn read_payload(path: &str) -> Result<Payload> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading payload file {path}"))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("parsing payload file {path}"))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("payload file {path} must contain a JSON object"),
    }
}

#[cfg(feature = "mock-backend")]
fn mock_engine(
    kind: OperationKind,
    config: &AppConfig,
    registry: Arc<ActiveOperationRegistry>,
) -> Result<OperationEngine> {
    use op_lifecycle::lifecycle::adapters::MockAdapter;
    use op_lifecycle::lifecycle::types::BackendResponse;
    use op_lifecycle::lifecycle::validation::{ValidationRules, Validator};

    let adapter = MockAdapter::new("mock");
    adapter.push_status_response(Ok(BackendResponse::ok("op-1", "PROCESSING")));
    adapter.set_status_response(Ok(BackendResponse::ok("op-1", "SUCCESSFUL")));
    Ok(OperationEngine::new(
        kind,
        Validator::new(ValidationRules::for_kind(kind, config.limits.for_kind(kind))),
        Arc::new(adapter),
        registry,
        config.engine.engine_config(),
    ))
}

#[cfg(not(feature = "mock-backend"))]
fn mock_engine(
    _kind: OperationKind,
    _config: &AppConfig,
    _registry: Arc<ActiveOperationRegistry>,
) -> Result<OperationEngine> {
    bail!("--mock requires the mock-backend feature")
}

fn print_state(state: &EngineState) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = logging::init_logging(&config);

    let kind_arg = get_arg(&["--kind", "-k"]).ok_or_else(|| anyhow!("--kind is required"))?;
    let kind = OperationKind::parse(&kind_arg)
        .ok_or_else(|| anyhow!("unknown operation kind: {kind_arg}"))?;
    let payload_path =
        get_arg(&["--payload", "-p"]).ok_or_else(|| anyhow!("--payload is required"))?;
    let payload = read_payload(&payload_path)?;

    info!(env = %env, kind = %kind, base_url = %config.backend.base_url, "Starting op_lifecycle");

    let registry = ActiveOperationRegistry::spawn(config.engine.registry_refresh_interval());
    let engine = if use_mock_backend() {
        mock_engine(kind, &config, registry.clone())?
    } else {
        OperationEngine::for_backend(
            kind,
            &config,
            registry.clone(),
            Arc::new(EnvCredentials::new(config.backend.session_token_env.clone())),
        )?
    };

    let op = match engine.submit(payload).await {
        Ok(op) => op,
        Err(err) => {
            warn!(kind = %err.kind, action = ?err.required_action, "{}", err.user_message());
            print_state(&engine.state())?;
            return Ok(ExitCode::FAILURE);
        }
    };

    if let Some(id) = op.id.clone()
        && !op.is_terminal()
    {
        let mut state_rx = engine.subscribe();
        let handle = engine
            .start_polling(&id, None)
            .map_err(|e| anyhow!("cannot poll {id}: {e}"))?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!(op_id = %id, "Interrupted, stopping poll");
                    handle.cancel();
                    break;
                }
                changed = tokio::time::timeout(WAKE_INTERVAL, state_rx.changed()) => {
                    if matches!(changed, Ok(Err(_))) {
                        break;
                    }
                    let status = state_rx.borrow_and_update().operation.as_ref().map(|o| o.status);
                    if let Some(status) = status {
                        if changed.is_ok() {
                            info!(op_id = %id, status = %status, "Status update");
                        }
                        if status.is_terminal() {
                            break;
                        }
                    }
                    if !engine.is_polling(&id) {
                        warn!(op_id = %id, "Polling ended before a terminal status");
                        break;
                    }
                }
            }
        }
    }

    let state = engine.state();
    print_state(&state)?;
    engine.dispose();
    registry.dispose();

    if state.error.is_some() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
