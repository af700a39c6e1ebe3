// Copyright the deadlockd authors. Licensed under Apache-2.0.

//! Process entry point: reads configuration from the environment,
//! builds the [`LockManager`], and serves the HTTP facade.
//!
//! Mirrors the teacher's binary/library split (`cmd/` drives a library
//! crate) and `tos-network-tos`'s daemon entry point, which likewise
//! initializes logging before anything else and then hands off to the
//! HTTP server's own runtime.

use deadlockd::facade;
use deadlockd::server::lock_manager::{Config, LockManager};
use deadlockd::ServiceConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServiceConfig::from_env().unwrap_or_else(|e| {
        log::error!("invalid configuration: {}", e);
        std::process::exit(1);
    });

    log::info!(
        "starting {} on port {} with peers {:?}",
        cfg.service_name,
        cfg.port,
        cfg.peers
    );

    let lock_manager = LockManager::new(cfg.service_name.clone(), cfg.peers.clone(), Config::default());

    facade::serve(lock_manager, cfg.port).await
}
