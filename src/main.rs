//! Entrypoint: parses flags, wires the façade, watch, and reconciler
//! together, and runs until a shutdown signal is observed.

use std::process::ExitCode;
use std::sync::Arc;

use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rpc_registrar::config::Opt;
use rpc_registrar::error::Error;
use rpc_registrar::pod::PodEvent;
use rpc_registrar::queue::WorkQueue;
use rpc_registrar::reconciler::Reconciler;
use rpc_registrar::registry::{MockRegistry, RealRegistry, RegistryFacade, DEFAULT_QPS};
use rpc_registrar::shutdown::watch_shutdown_signal;
use rpc_registrar::watch;

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	match run().await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!(error = %e, "fatal error");
			ExitCode::FAILURE
		}
	}
}

async fn run() -> Result<(), Error> {
	let opt = Opt::from_args();
	opt.validate()?;

	let shutdown = watch_shutdown_signal();

	info!("connecting to the cluster...");
	let client = kube::Client::try_default().await.map_err(Error::Kube)?;

	let queue: Arc<WorkQueue<PodEvent>> = WorkQueue::new();

	info!("starting pod watch...");
	let cache = watch::start(client, opt.namespace(), queue.clone(), shutdown.clone()).await?;

	if opt.mockregistry {
		info!("using mock registry façade");
		let facade = Arc::new(MockRegistry);
		run_reconciler(queue, cache, facade, &opt, shutdown).await
	} else {
		info!(servers = %opt.zkservers, base_path = %opt.zkpath, "connecting to the registry store...");
		let facade = Arc::new(
			RealRegistry::connect(&opt.zk_servers(), opt.zkpath.clone(), DEFAULT_QPS, shutdown.clone()).await?,
		);
		run_reconciler(queue, cache, facade, &opt, shutdown).await
	}
}

async fn run_reconciler<F: RegistryFacade + 'static>(
	queue: Arc<WorkQueue<PodEvent>>,
	cache: kube::runtime::reflector::Store<k8s_openapi::api::core::v1::Pod>,
	facade: Arc<F>,
	opt: &Opt,
	shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Error> {
	let reconciler = Arc::new(Reconciler::new(queue, cache, facade, opt.syncperiod));
	reconciler.run(shutdown).await;
	info!("shut down cleanly");
	Ok(())
}
