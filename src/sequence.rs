//! Tracking of the server's sequencing tokens within one connection.
use tracing::debug;

use crate::entry::ChangeNotification;

/// Remembers the most recent sync cookie and the identity of the last
/// delivered notification, so a repeated delivery can be dropped.
///
/// The server guarantees ordering, so a repeated event always directly
/// follows its first delivery. A fresh guard is used for every connection.
#[derive(Debug, Default)]
pub(crate) struct SequenceGuard {
	/// Entry UUID and token of the last admitted notification
	last: Option<(Vec<u8>, Vec<u8>)>,
	/// The newest cookie the server handed out
	cookie: Option<Vec<u8>>,
}

impl SequenceGuard {
	/// Check whether a notification should be delivered, and record it if so.
	pub(crate) fn admit(&mut self, change: &ChangeNotification) -> bool {
		let Some(token) = &change.token else {
			return true;
		};
		if self
			.last
			.as_ref()
			.is_some_and(|(uuid, last)| *uuid == change.entry_uuid && last == token)
		{
			debug!(dn = %change.dn, "Dropping repeated change notification");
			return false;
		}
		self.last = Some((change.entry_uuid.clone(), token.clone()));
		self.cookie = Some(token.clone());
		true
	}

	/// Record a cookie sent outside of an entry.
	pub(crate) fn set_cookie(&mut self, cookie: &[u8]) {
		self.cookie = Some(cookie.to_vec());
	}

	/// The newest cookie seen on this connection.
	pub(crate) fn cookie(&self) -> Option<&[u8]> {
		self.cookie.as_deref()
	}
}
