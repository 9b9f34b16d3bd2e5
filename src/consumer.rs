//! The receiving end of the change stream.
use async_trait::async_trait;
use tracing::{debug, info};

use crate::entry::{ChangeNotification, SearchEntryExt};

/// Error type consumers may fail with.
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

/// Applies observed changes to local key state.
///
/// Every call completes before the watcher reads the next message from the
/// server, so implementations see events one at a time and in server order.
#[async_trait]
pub trait ChangeConsumer: Send {
	/// An entry was reported.
	async fn apply(&mut self, change: ChangeNotification) -> Result<(), ConsumerError>;

	/// The server handed out a new sync cookie.
	async fn cookie(&mut self, _cookie: &[u8]) -> Result<(), ConsumerError> {
		Ok(())
	}

	/// The initial content has been transferred completely.
	async fn refresh_done(&mut self) -> Result<(), ConsumerError> {
		Ok(())
	}

	/// The server listed entries by UUID, either as deleted or as still
	/// present.
	async fn id_set(&mut self, _uuids: Vec<Vec<u8>>, _deleted: bool) -> Result<(), ConsumerError> {
		Ok(())
	}
}

/// Logs every change. Used when no other consumer is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsumer;

#[async_trait]
impl ChangeConsumer for TracingConsumer {
	async fn apply(&mut self, change: ChangeNotification) -> Result<(), ConsumerError> {
		info!(
			dn = %change.dn,
			kind = ?change.kind,
			object = ?change.object_kind(),
			name = change.attr_first("idnsName"),
			"Directory entry changed"
		);
		Ok(())
	}

	async fn refresh_done(&mut self) -> Result<(), ConsumerError> {
		info!("Initial synchronization complete");
		Ok(())
	}

	async fn id_set(&mut self, uuids: Vec<Vec<u8>>, deleted: bool) -> Result<(), ConsumerError> {
		debug!(count = uuids.len(), deleted, "Received entry UUID set");
		Ok(())
	}
}
