//! Wiring of credentials, connections and the reconnect loop.
use tracing::{error, info};

use crate::{
	config::{Config, DAEMON_NAME},
	connection::ConnectionFactory,
	consumer::ChangeConsumer,
	kerberos::{CredentialCache, CredentialProvider, Identity},
	reconnect::{ReconnectLoop, Termination},
	shutdown::RunState,
	watcher::WatchTarget,
};

/// The watcher process: obtain credentials once, then keep watching.
#[derive(Debug)]
pub struct Daemon {
	/// Configuration
	config: Config,
	/// Who we authenticate as
	identity: Identity,
	/// Stopped by the signal handler
	run_state: RunState,
}

impl Daemon {
	/// Create a daemon that stops when `run_state` does.
	#[must_use]
	pub fn new(config: Config, identity: Identity, run_state: RunState) -> Self {
		Self { config, identity, run_state }
	}

	/// Where the ticket is stored.
	#[must_use]
	pub fn credential_cache(&self) -> CredentialCache {
		CredentialCache::in_dir(&self.config.kerberos.cache_dir, DAEMON_NAME)
	}

	/// Obtain a ticket and run the reconnect loop. No connection is attempted
	/// if no ticket can be obtained.
	pub async fn run<P, F, C>(&self, provider: &P, factory: F, consumer: C) -> Termination
	where
		P: CredentialProvider,
		F: ConnectionFactory,
		C: ChangeConsumer,
	{
		let kerberos = &self.config.kerberos;
		let cache = self.credential_cache();
		info!(principal = %self.identity, keytab = %kerberos.keytab.display(), "Obtaining Kerberos ticket");
		let acquired = self
			.run_state
			.unless_stopped(provider.acquire(
				&self.identity,
				&kerberos.keytab,
				&cache,
				kerberos.attempts,
			))
			.await;
		match acquired {
			None => return Termination::Shutdown,
			Some(Err(err)) => {
				error!("{err}");
				return Termination::Fatal(err.into());
			}
			Some(Ok(())) => {}
		}

		ReconnectLoop::new(
			factory,
			consumer,
			self.config.url.clone(),
			WatchTarget::new(&self.config.watch),
			self.run_state.clone(),
		)
		.with_retry_delay(self.config.reconnect_delay())
		.run()
		.await
	}
}
