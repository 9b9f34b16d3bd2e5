//! The outer control loop: connect, watch, and decide what to do when
//! something fails.
//!
//! Failures while establishing a connection are retried after a fixed delay
//! for as long as the process is running. Once a subscription is active,
//! losing the server is fatal and the restart is left to the process
//! supervisor; a broken subscription is never resumed in place.
use std::time::Duration;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
	connection::{Connection, ConnectionFactory},
	consumer::ChangeConsumer,
	error::{BindError, Error, WatchError},
	sequence::SequenceGuard,
	shutdown::RunState,
	watcher::{ChangeStream, WatchEvent, WatchTarget},
};

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Upper bound for releasing a connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the loop ended.
#[derive(Debug)]
pub enum Termination {
	/// Shutdown was requested.
	Shutdown,
	/// An unrecoverable error occurred.
	Fatal(Error),
}

impl Termination {
	/// Process exit status: 0 for a requested shutdown, 1 for any fatal
	/// error.
	#[must_use]
	pub fn exit_code(&self) -> u8 {
		match self {
			Self::Shutdown => 0,
			Self::Fatal(_) => 1,
		}
	}
}

impl From<Termination> for std::process::ExitCode {
	fn from(termination: Termination) -> Self {
		Self::from(termination.exit_code())
	}
}

/// Where a watch ended up failing.
#[derive(Debug)]
enum WatchFailure {
	/// The subscription could not be established.
	Subscribe(WatchError),
	/// The subscription broke.
	Stream(WatchError),
}

/// Keeps a subscription to the directory alive and forwards its changes.
#[derive(Debug)]
pub struct ReconnectLoop<F, C> {
	/// Opens connections
	factory: F,
	/// Receives changes
	consumer: C,
	/// Server to connect to
	url: Url,
	/// What to subscribe to
	target: WatchTarget,
	/// Delay between connection attempts
	retry_delay: Duration,
	/// Stops the loop when shutdown is requested
	run_state: RunState,
}

impl<F, C> ReconnectLoop<F, C>
where
	F: ConnectionFactory,
	C: ChangeConsumer,
{
	/// Create a loop with the default retry delay.
	pub fn new(factory: F, consumer: C, url: Url, target: WatchTarget, run_state: RunState) -> Self {
		Self { factory, consumer, url, target, retry_delay: DEFAULT_RETRY_DELAY, run_state }
	}

	/// Change the delay between connection attempts.
	#[must_use]
	pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
		self.retry_delay = retry_delay;
		self
	}

	/// The consumer changes are forwarded to.
	#[must_use]
	pub fn consumer(&self) -> &C {
		&self.consumer
	}

	/// Run until shutdown is requested or a fatal error occurs.
	///
	/// At most one connection is open at any time. It is closed exactly once
	/// before this returns or reconnects.
	pub async fn run(&mut self) -> Termination {
		let run_state = self.run_state.clone();
		while run_state.is_running() {
			info!(url = %self.url, "Connecting to directory server");
			let Some(opened) = run_state.unless_stopped(self.factory.open(&self.url)).await else {
				break;
			};
			let mut connection = match opened {
				Ok(connection) => connection,
				Err(BindError::ServerUnavailable(err)) => {
					warn!("Directory server unavailable, retrying in {:?}: {err}", self.retry_delay);
					self.wait_before_retry().await;
					continue;
				}
				Err(err) => {
					error!("Connecting to directory server failed: {err}");
					return Termination::Fatal(err.into());
				}
			};

			let outcome = run_state.unless_stopped(self.watch(&mut connection)).await;
			release(&mut connection).await;
			match outcome {
				None => break,
				Some(Ok(())) => info!("Server ended the search, reconnecting"),
				Some(Err(WatchFailure::Subscribe(WatchError::ServerUnavailable(err)))) => {
					warn!("Subscribing failed, retrying in {:?}: {err}", self.retry_delay);
					self.wait_before_retry().await;
				}
				Some(Err(WatchFailure::Subscribe(err) | WatchFailure::Stream(err))) => {
					error!("Watching for changes failed: {err}");
					return Termination::Fatal(err.into());
				}
			}
		}
		info!("Watcher stopped");
		Termination::Shutdown
	}

	/// Sleep for the retry delay, waking early on shutdown.
	async fn wait_before_retry(&self) {
		self.run_state.unless_stopped(tokio::time::sleep(self.retry_delay)).await;
	}

	/// Subscribe on the connection and forward changes until the search
	/// ends.
	async fn watch(&mut self, connection: &mut F::Connection) -> Result<(), WatchFailure> {
		let mut stream = connection.subscribe(&self.target).await.map_err(WatchFailure::Subscribe)?;
		info!(base = %self.target.base, filter = %self.target.filter, "Watching for changes");

		let mut sequence = SequenceGuard::default();
		while let Some(event) = stream.next().await.map_err(WatchFailure::Stream)? {
			self.forward(event, &mut sequence).await;
		}
		debug!(cookie = ?sequence.cookie().map(String::from_utf8_lossy), "Search ended");
		Ok(())
	}

	/// Hand one event to the consumer. Consumer failures are logged only.
	async fn forward(&mut self, event: WatchEvent, sequence: &mut SequenceGuard) {
		let result = match event {
			WatchEvent::Change(change) => {
				if !sequence.admit(&change) {
					return;
				}
				self.consumer.apply(change).await
			}
			WatchEvent::Cookie(cookie) => {
				sequence.set_cookie(&cookie);
				self.consumer.cookie(&cookie).await
			}
			WatchEvent::RefreshDone => self.consumer.refresh_done().await,
			WatchEvent::IdSet { uuids, deleted } => self.consumer.id_set(uuids, deleted).await,
		};
		if let Err(err) = result {
			error!("Applying change failed: {err}");
		}
	}
}

/// Close a connection, logging instead of propagating failures.
async fn release<T: Connection>(connection: &mut T) {
	match tokio::time::timeout(CLOSE_TIMEOUT, connection.close()).await {
		Ok(Ok(())) => debug!("Connection closed"),
		Ok(Err(err)) => warn!("Closing connection failed: {err}"),
		Err(_) => warn!("Closing connection timed out"),
	}
}
