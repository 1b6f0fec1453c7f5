use std::{env, sync::Arc};

use edgehook::RewriteHook;
use edgehook::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, load_config};
use edgehook::replay::{self, Replay, Zone};
use edgehook_abi::AbiVersions;
use edgehook_hooks::{HookDispatcher, HookRunner, ModuleEntries};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking;
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (nb, _guard) = non_blocking(std::io::stdout());

    let config_path = env::var(CONFIG_PATH_ENV).unwrap_or(DEFAULT_CONFIG_PATH.to_string());

    let config = load_config(&config_path)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(nb)
                .with_target(false)
                .with_filter(LevelFilter::from(config.server.log_level.clone())),
        )
        .init();

    let negotiated = AbiVersions::CURRENT.negotiate(AbiVersions::CURRENT)?;
    let versions = negotiated.versions();
    tracing::info!(packet = versions.packet, host_env = versions.host_env, "abi negotiated");

    let runner: Arc<dyn HookRunner> = if config.server.ffi {
        // SAFETY: the entries are this crate's own exports of `RewriteHook`.
        let entries = unsafe {
            ModuleEntries::new(
                edgehook::hook_recv,
                edgehook::hook_deliver,
                edgehook::hook_hit,
                edgehook::hook_miss,
            )
        };
        tracing::info!(path = %config_path, "running hooks through exported entry points");
        Arc::new(entries)
    } else {
        Arc::new(HookDispatcher::new(RewriteHook::from_config(&config.rewrite)?, negotiated))
    };

    let zone = Zone::parse(config.zone.iter().map(|z| z.record.as_str()))?;
    tracing::info!(records = zone.len(), queries = config.replay.len(), "zone loaded");

    let replay = Replay::new(runner, zone, config.server.cache_capacity);
    for round in 1..=config.server.rounds {
        for outcome in replay.run_all(&config.replay).await? {
            replay::report(round, &outcome);
        }
    }

    Ok(())
}
