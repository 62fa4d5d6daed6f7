// Controller-manager entrypoint: logging, configuration, leader election,
// probe endpoints, webhook bootstrap, and controller wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use kube::Client;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use toolhive_operator::controller::{self, Context};
use toolhive_operator::{OperatorConfig, leader, platform, webhook};

static READY: AtomicBool = AtomicBool::new(false);

async fn healthz() -> StatusCode {
	StatusCode::OK
}

async fn readyz() -> StatusCode {
	if READY.load(Ordering::Relaxed) {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	}
}

async fn serve_probes(addr: String) -> anyhow::Result<()> {
	let app = Router::new()
		.route("/healthz", get(healthz))
		.route("/readyz", get(readyz));
	let listener = TcpListener::bind(&addr)
		.await
		.with_context(|| format!("binding probe address {addr}"))?;
	info!(target: "operator", %addr, "probe server listening");
	axum::serve(listener, app).await.context("probe server")?;
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	// Pin the process-level TLS provider before any client or server is
	// built; feature unification may otherwise leave it ambiguous.
	let _ = rustls::crypto::ring::default_provider().install_default();

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(tracing_subscriber::fmt::layer().json())
		.init();

	let config = OperatorConfig::from_env().context("reading operator configuration")?;
	info!(
		target: "operator",
		server = config.enable_server,
		registry = config.enable_registry,
		vmcp = config.enable_vmcp,
		webhooks = config.enable_webhooks,
		"starting toolhive-operator"
	);

	let client = Client::try_default()
		.await
		.context("connecting to the cluster")?;

	// Probe endpoints come up before leadership so rollouts stay healthy.
	let probe_addr = config.probe_addr.clone();
	let probes = tokio::spawn(serve_probes(probe_addr));

	let leadership = leader::acquire(&client, &config.pod_namespace, &config.leader_election_id)
		.await
		.context("acquiring leader lease")?;

	// Detect once; reconcilers read the cached result.
	match platform::detect(&client).await {
		Ok(detected) => info!(target: "operator", platform = %detected, "platform detected"),
		Err(err) => error!(target: "operator", error = %err, "platform detection failed"),
	}

	if config.enable_webhooks {
		let webhook_client = client.clone();
		let webhook_config = config.clone();
		tokio::spawn(async move {
			if let Err(err) = webhook::serve(webhook_client, webhook_config).await {
				error!(target: "webhook", error = %err, "webhook server exited");
			}
		});
	}

	READY.store(true, Ordering::Relaxed);

	let ctx = Context::new(client, config);
	let controllers = controller::run_all(ctx);
	let renewal = leadership.renew_loop();

	tokio::select! {
		result = controllers => {
			result.context("controller group exited")?;
		},
		err = renewal => {
			// In-flight reconciles must not outlive leadership.
			anyhow::bail!("leadership lost: {err}");
		},
		result = probes => {
			result.context("probe server task")??;
		},
	}

	Ok(())
}
