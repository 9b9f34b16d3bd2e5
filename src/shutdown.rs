//! Run state shared between the watcher and the signal handler.
use std::{future::Future, sync::Arc};

use tokio::{
	signal::unix::{signal, SignalKind},
	sync::watch,
	task::JoinHandle,
};
use tracing::info;

/// Whether the process should keep running.
///
/// Starts out running and can only ever be stopped, never restarted.
#[derive(Debug, Clone)]
pub struct RunState {
	/// `true` while running
	running: Arc<watch::Sender<bool>>,
}

impl RunState {
	/// A new, running state.
	#[must_use]
	pub fn new() -> Self {
		Self { running: Arc::new(watch::Sender::new(true)) }
	}

	/// Whether shutdown has not been requested yet.
	#[must_use]
	pub fn is_running(&self) -> bool {
		*self.running.borrow()
	}

	/// Request shutdown. Returns whether this call made the transition.
	pub fn stop(&self) -> bool {
		self.running.send_if_modified(|running| std::mem::replace(running, false))
	}

	/// Wait until shutdown has been requested.
	pub async fn stopped(&self) {
		let mut receiver = self.running.subscribe();
		// The sender lives as long as `self`, so this cannot fail.
		let _ = receiver.wait_for(|running| !*running).await;
	}

	/// Run `future` unless shutdown is requested first. Returns `None` if
	/// it was cut short.
	pub async fn unless_stopped<F: Future>(&self, future: F) -> Option<F::Output> {
		tokio::select! {
			biased;
			() = self.stopped() => None,
			output = future => Some(output),
		}
	}
}

impl Default for RunState {
	fn default() -> Self {
		Self::new()
	}
}

/// Turns SIGTERM and SIGINT into a stopped [`RunState`].
///
/// The handler does nothing but flip the state. The watcher, which always
/// waits on the state alongside its I/O, notices at once and releases its
/// connection.
#[derive(Debug)]
pub struct ShutdownController {
	/// State to stop on a signal
	run_state: RunState,
}

impl ShutdownController {
	/// Create a controller for the given state.
	#[must_use]
	pub fn new(run_state: RunState) -> Self {
		Self { run_state }
	}

	/// Register the signal handlers and start listening in the background.
	pub fn listen(self) -> std::io::Result<JoinHandle<()>> {
		let mut sigterm = signal(SignalKind::terminate())?;
		let mut sigint = signal(SignalKind::interrupt())?;
		Ok(tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = sigterm.recv() => info!("Received SIGTERM"),
					_ = sigint.recv() => info!("Received SIGINT"),
				}
				if self.run_state.stop() {
					info!("Shutting down");
				}
			}
		}))
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serial_test::serial;

	use super::{RunState, ShutdownController};

	#[test]
	fn stop_is_one_way() {
		let state = RunState::new();
		let other = state.clone();
		assert!(state.is_running());

		assert!(other.stop(), "First stop makes the transition");
		assert!(!state.is_running());
		assert!(!state.stop(), "Second stop is a no-op");
		assert!(!other.is_running());
	}

	#[tokio::test]
	async fn stopped_wakes_waiters() -> Result<(), Box<dyn std::error::Error>> {
		let state = RunState::new();
		let waiter = tokio::spawn({
			let state = state.clone();
			async move { state.stopped().await }
		});
		tokio::task::yield_now().await;
		state.stop();
		tokio::time::timeout(Duration::from_secs(5), waiter).await??;

		// Already stopped states resolve immediately.
		tokio::time::timeout(Duration::from_secs(5), state.stopped()).await?;
		Ok(())
	}

	#[tokio::test]
	async fn unless_stopped_cuts_short() {
		let state = RunState::new();
		assert_eq!(state.unless_stopped(async { 7 }).await, Some(7));

		state.stop();
		assert_eq!(state.unless_stopped(std::future::pending::<()>()).await, None);
	}

	async fn signal_stops_the_run_state(signal: &str) -> Result<(), Box<dyn std::error::Error>> {
		let state = RunState::new();
		let handle = ShutdownController::new(state.clone()).listen()?;

		let status = tokio::process::Command::new("kill")
			.arg(signal)
			.arg(std::process::id().to_string())
			.status()
			.await?;
		assert!(status.success());

		tokio::time::timeout(Duration::from_secs(5), state.stopped()).await?;
		assert!(!state.is_running());
		handle.abort();
		Ok(())
	}

	#[tokio::test]
	#[serial]
	async fn sigterm_stops_the_run_state() -> Result<(), Box<dyn std::error::Error>> {
		signal_stops_the_run_state("-TERM").await
	}

	#[tokio::test]
	#[serial]
	async fn sigint_stops_the_run_state() -> Result<(), Box<dyn std::error::Error>> {
		signal_stops_the_run_state("-INT").await
	}
}
