// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fleetd entry point.

use std::sync::Arc;

use fleet_core::{Backend, SystemClock};
use fleet_daemon::config::Config;
use fleet_daemon::lifecycle::{self, StartupResult};
use fleet_daemon::listener::{ListenCtx, Listener};
use fleet_daemon::orchestrator::Orchestrator;
use fleet_daemon::reconciler::Reconciler;
use fleet_daemon::env;
use fleet_provider::{ContainerProvider, GceConfig, GceProvider, K8sConfig, Provider};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let state_dir = match env::state_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("fleetd: {e}");
            return 1;
        }
    };
    let config = match Config::load(state_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fleetd: {e}");
            return 1;
        }
    };

    let _log_guard = match lifecycle::init_tracing(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("fleetd: failed to initialize logging: {e}");
            return 1;
        }
    };

    let startup = match lifecycle::startup(&config).await {
        Ok(startup) => startup,
        Err(e) => {
            error!("startup failed: {e}");
            eprintln!("fleetd: {e}");
            return 1;
        }
    };

    match config.backend {
        Backend::Gce => {
            let Some(gce) = config.gce.clone() else {
                eprintln!("fleetd: gce backend selected but [gce] section is missing");
                return 1;
            };
            let Some(token) = gce.access_token.clone() else {
                eprintln!("fleetd: gce backend requires an access token");
                return 1;
            };
            let mut provider_cfg = GceConfig::new(&gce.project, &gce.zone, &gce.bucket, &token);
            provider_cfg.service_account = gce.service_account.clone();
            serve(config, startup, Arc::new(GceProvider::new(provider_cfg))).await
        }
        Backend::Kubernetes => {
            let Some(k8s) = config.k8s.clone() else {
                eprintln!("fleetd: kubernetes backend selected but [k8s] section is missing");
                return 1;
            };
            let provider_cfg = K8sConfig::new(&k8s.namespace, &k8s.image, config.objects_dir());
            let provider = match ContainerProvider::connect(provider_cfg).await {
                Ok(provider) => provider,
                Err(e) => {
                    error!("kubernetes connection failed: {e}");
                    eprintln!("fleetd: {e}");
                    return 1;
                }
            };
            serve(config, startup, Arc::new(provider)).await
        }
    }
}

async fn serve<P: Provider>(config: Config, startup: StartupResult, provider: Arc<P>) -> i32 {
    let StartupResult { daemon, unix, tcp } = startup;
    let mut daemon = daemon;
    let clock = SystemClock;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&daemon.registry),
        Arc::clone(&provider),
        clock.clone(),
        (&config).into(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&daemon.registry),
        provider,
        clock,
        (&config).into(),
    ));

    let shutdown = Arc::new(Notify::new());
    let ctx = Arc::new(ListenCtx {
        orchestrator,
        reconciler: Arc::clone(&reconciler),
        shutdown: Arc::clone(&shutdown),
        auth_token: env::auth_token(),
    });

    let cancel = CancellationToken::new();
    tokio::spawn(Arc::clone(&reconciler).run(cancel.clone()));

    let listener = match tcp {
        Some(tcp) => Listener::with_tcp(unix, tcp, ctx),
        None => Listener::new(unix, ctx),
    };
    tokio::spawn(listener.run());

    // Signal readiness on stdout for supervising processes.
    println!("READY");
    info!(backend = %config.backend, "fleetd ready");

    tokio::select! {
        _ = shutdown.notified() => info!("shutdown requested"),
        _ = ctrl_c() => info!("interrupt received"),
    }

    cancel.cancel();
    daemon.shutdown();
    0
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for interrupt: {e}");
        std::future::pending::<()>().await;
    }
}
