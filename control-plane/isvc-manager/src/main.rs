use anyhow::Result;
use clap::{Arg, Command, value_parser};
use isvc_manager::{bootstrap::build_from_config, config::AppConfig};
use isvc_models::ClusterId;
use isvc_observability::{TracingConfig, setup_tracing};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("isvc-manager")
        .about("Integrated service lifecycle manager")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(
            Command::new("cleanup")
                .about("Disable every service instance on a cluster ahead of teardown")
                .arg(
                    Arg::new("cluster-id")
                        .required(true)
                        .value_parser(value_parser!(ClusterId)),
                ),
        )
        .get_matches();

    let config = AppConfig::load_from_env()?;
    setup_tracing(TracingConfig::new(
        "isvc-manager",
        &config.log_level,
        config.log_format.eq_ignore_ascii_case("json"),
    ))?;

    let stack = build_from_config(&config).await?;

    if let Some(cleanup) = matches.subcommand_matches("cleanup") {
        let cluster_id = cleanup
            .get_one::<ClusterId>("cluster-id")
            .copied()
            .ok_or_else(|| anyhow::anyhow!("cluster-id is required"))?;
        let outcome = stack.cleaner.disable_service_instances(cluster_id).await;
        stack.shutdown();
        if let Err(e) = &outcome {
            error!(cluster_id, error = %e, "cleanup failed");
        }
        outcome?;
        return Ok(());
    }

    info!("integrated service manager running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    stack.shutdown();
    Ok(())
}
