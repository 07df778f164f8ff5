use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use pcidp::config::Cli;
use pcidp::config::Commands;
use pcidp::config::CommonArgs;
use pcidp::config::DaemonArgs;
use pcidp::config::DiscoverArgs;
use pcidp::config::ResourceConfigList;
use pcidp::discovery::discover;
use pcidp::factory::DefaultResourceFactory;
use pcidp::inventory::SysfsInventory;
use pcidp::manager::ResourceManager;
use pcidp::plugin::DevicePluginService;
use pcidp::sysfs::SysFs;
use tokio_util::sync::CancellationToken;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(daemon_args).await,
        Commands::Discover(discover_args) => run_discover(discover_args),
    }
}

fn load_resource_list(common: &CommonArgs) -> Result<ResourceConfigList> {
    let list = ResourceConfigList::load(&common.config_file, &common.resource_prefix)
        .map_err(|e| anyhow::anyhow!("Failed to load resource list: {e:?}"))?;
    tracing::info!(
        config_file = %common.config_file.display(),
        resources = list.resource_list.len(),
        "loaded resource list"
    );
    Ok(list)
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = utils::logging::init(daemon_args.common.log_file.as_deref())
        .context("failed to initialize logging")?;

    tracing::info!("Starting pcidp daemon {}", env!("CARGO_PKG_VERSION"));

    let list = load_resource_list(&daemon_args.common)?;
    let sysfs = SysFs::new(&daemon_args.common.sysfs_root);
    let manager = Arc::new(ResourceManager::new(
        Arc::new(SysfsInventory::new(sysfs.clone())),
        Arc::new(DefaultResourceFactory::new(sysfs)),
        list.resource_list,
    ));

    let services: Vec<DevicePluginService> = manager
        .pools()
        .iter()
        .cloned()
        .map(DevicePluginService::new)
        .collect();
    for service in &services {
        tracing::info!(resource = %service.resource_name(), "serving resource");
    }

    let cancellation_token = CancellationToken::new();
    let interval = Duration::from_secs(daemon_args.refresh_interval_secs.max(1));
    let manager_task = tokio::spawn({
        let manager = manager.clone();
        let cancellation_token = cancellation_token.clone();
        async move { manager.run(cancellation_token, interval).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    cancellation_token.cancel();
    manager_task.await.context("resource manager task failed")?;
    tracing::info!("pcidp daemon stopped");
    Ok(())
}

fn run_discover(discover_args: DiscoverArgs) -> Result<()> {
    let _guard = utils::logging::init(discover_args.common.log_file.as_deref())
        .context("failed to initialize logging")?;

    let list = load_resource_list(&discover_args.common)?;
    let sysfs = SysFs::new(&discover_args.common.sysfs_root);
    let pools = discover(
        &SysfsInventory::new(sysfs.clone()),
        &DefaultResourceFactory::new(sysfs),
        &list.resource_list,
    )
    .map_err(|e| anyhow::anyhow!("Discovery failed: {e:?}"))?;

    let output: Vec<serde_json::Value> = pools.iter().map(|p| p.to_json()).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to serialize discovery result")?
    );
    Ok(())
}
