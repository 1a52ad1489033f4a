// src/main.rs

//! # Credential Ledger - Main Entry Point
//!
//! Loads settings, connects the ledger, content store, index, and attempt
//! store, starts the background reconciler, and serves the API.
//!
//! ## Configuration
//! `credential-ledger.toml` (optional) and `CREDLEDGER__*` environment
//! variables, e.g.:
//! - `CREDLEDGER__LEDGER__MODE`: `rest` or `sandbox`
//! - `CREDLEDGER__SIGNER__URL`: wallet bridge endpoint (rest mode)
//! - `CREDLEDGER__CONTENT__PROVIDER`: `ipfs`, `pinata`, or `memory`
//! - `CREDLEDGER__INDEX__BACKEND`: `postgrest` or `memory`

use anyhow::Context;
use credential_ledger::app::{connect_backends, Services, Tuning};
use credential_ledger::config::Settings;
use credential_ledger::services::{spawn_reconciler, trigger_channel};
use log::info;
use std::sync::Arc;

const RECONCILE_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;
    let tuning = Tuning::from_settings(&settings)?;
    let backends = connect_backends(&settings)
        .await
        .context("failed to connect backends")?;

    let (trigger, requests) = trigger_channel(RECONCILE_QUEUE);
    let services = Services::assemble(&backends, &tuning, settings.reconciler.enabled.then(|| trigger.clone()));

    let _reconciler = if settings.reconciler.enabled {
        info!("Reconciler enabled, sweep interval {:?}", settings.reconciler.interval());
        Some(spawn_reconciler(
            services.reconciler.clone(),
            settings.reconciler.interval(),
            requests,
        ))
    } else {
        None
    };

    let api_server = Arc::new(services.into_api());

    let addr = settings.server.bind;
    println!("API server running at http://{}", addr);
    println!("Available endpoints:");
    println!("- GET  /health");
    println!("- GET  /authorization/:address");
    println!("- POST /credentials");
    println!("- GET  /credentials/attempts/:attempt_id");
    println!("- POST /credentials/attempts/:attempt_id/resume");
    println!("- POST /credentials/:token_id/revoke");
    println!("- GET  /credentials/:token_id/verify");
    println!("- GET  /students/:address/credentials");
    println!("- GET  /issuers/:address/credentials");
    println!("- POST /admin/initialize");
    println!("- POST /admin/issuers");
    println!("- POST /reconcile");

    api_server.run(addr).await.context("API server failed")?;
    Ok(())
}
