//! Dialogue backend service.
//!
//! Serves `POST /agent` in front of the configured agent CLI. Logs go to
//! stderr; set `RUST_LOG` to change verbosity.

use std::path::PathBuf;
use std::sync::Arc;
use xiaot::AssistantConfig;
use xiaot::backend::{BackendServer, CommandAgentRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    xiaot::diagnostics::init_tracing(xiaot::diagnostics::DEFAULT_FILTER);

    let config = load_config(std::env::args().skip(1).collect())?;
    let runner = Arc::new(CommandAgentRunner::new(&config.backend));
    let server = BackendServer::start(runner, &config.backend, &config.tts.locale)
        .await
        .map_err(|e| anyhow::anyhow!("xiaot-backend failed to start: {e}"))?;

    tracing::info!(
        agent_command = %config.backend.agent_command,
        default_agent = %config.backend.default_agent,
        "ready at {}",
        server.url()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown();
    Ok(())
}

fn load_config(args: Vec<String>) -> anyhow::Result<AssistantConfig> {
    match args.as_slice() {
        [] => {
            let path = AssistantConfig::default_config_path();
            if path.is_file() {
                tracing::info!("loading config from {}", path.display());
                Ok(AssistantConfig::from_file(&path)?)
            } else {
                Ok(AssistantConfig::default())
            }
        }
        [flag, path] if flag == "--config" || flag == "-c" => {
            Ok(AssistantConfig::from_file(&PathBuf::from(path))?)
        }
        [flag] if flag == "--help" || flag == "-h" => {
            println!("usage: xiaot-backend [--config <path>]");
            std::process::exit(0);
        }
        other => anyhow::bail!(
            "unexpected arguments: {other:?} (usage: xiaot-backend [--config <path>])"
        ),
    }
}
