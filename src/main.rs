use std::process;
use std::sync::Arc;

use replica_proxy::{
    config::Config,
    errors::ProxyError,
    handlers::routes,
    logger::init_logger,
    models::ProxyState,
    services::{
        proxy::{cache_sizes, sweep_caches},
        ReqwestTransport,
    },
};

fn print_diagnostics(config: &Config, rules: usize) {
    tracing::info!("Starting Replica reverse proxy");
    tracing::info!("TARGET_ORIGIN={}", config.target_origin);
    tracing::info!("MY_ORIGIN={}", config.my_origin);
    tracing::info!("REPLACEMENTS={} rules ({} active)", config.replacements.len(), rules);
    tracing::info!("STATIC_EXTENSIONS={}", config.static_extensions.join(","));
    tracing::info!("CACHE_TTL_STATIC={}", config.cache_ttl_static.as_secs());
    tracing::info!("CACHE_TTL_HTML={}", config.cache_ttl_dynamic.as_secs());
    tracing::info!(
        "INJECT_JS={} at {}",
        if config.inject_script.is_some() { "set" } else { "unset" },
        config.inject_location.as_str()
    );
}

#[tokio::main]
async fn main() {
    init_logger();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ProxyError::Config(errors)) => {
            for err in &errors {
                tracing::error!("{}", err);
            }
            tracing::error!("Startup validation failed, exiting");
            process::exit(2);
        }
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            process::exit(2);
        }
    };

    let addr = config.listen_addr;
    let sweep_interval = config.cache_sweep_interval;
    let state = Arc::new(ProxyState::new(config, Arc::new(ReqwestTransport::new())));
    print_diagnostics(&state.config, state.rewriter.rule_count());

    if let Some(interval) = sweep_interval {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = sweep_caches(&state).await;
                let (static_len, dynamic_len) = cache_sizes(&state).await;
                tracing::debug!(
                    "Cache sweep purged {} entries ({} static, {} dynamic left)",
                    purged,
                    static_len,
                    dynamic_len
                );
            }
        });
    }

    tracing::info!("Replica proxy listening on http://{}", addr);
    warp::serve(routes(state)).run(addr).await;
}
