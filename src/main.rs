//! Keep local key state in sync with the directory.
use std::process::ExitCode;

use dnskey_watcher::{
	Config, Daemon, Error, Identity, Kinit, LdapConnector, RunState, ShutdownController,
	TracingConsumer,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| "dnskey_watcher=info".into()),
		)
		.init();

	match run().await {
		Ok(code) => code,
		Err(err) => {
			error!("Startup failed: {err}");
			ExitCode::FAILURE
		}
	}
}

/// Load the configuration, install signal handlers and watch.
async fn run() -> Result<ExitCode, Error> {
	let config = Config::from_env()?;
	let identity = Identity::from_config(&config.kerberos)?;
	let run_state = RunState::new();
	let _signals = ShutdownController::new(run_state.clone()).listen()?;

	let factory = LdapConnector::new(config.connection.clone(), identity.host());
	let provider = Kinit::new(config.kerberos.kinit.clone());
	let termination =
		Daemon::new(config, identity, run_state).run(&provider, factory, TracingConsumer).await;
	Ok(termination.into())
}
