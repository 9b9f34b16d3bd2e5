//! Persistent search over the watched subtree.
//!
//! The search carries the [content synchronization] request control in
//! `refreshAndPersist` mode: the server first returns every matching entry,
//! then keeps the operation open and streams changes as they happen.
//!
//! [content synchronization]: https://www.rfc-editor.org/rfc/rfc4533.html
use std::{collections::VecDeque, fmt};

use async_trait::async_trait;
use ldap3::{
	controls::{parse_syncinfo, RefreshMode, SyncInfo, SyncRequest, SyncState},
	ldap_escape, ResultEntry, Scope, SearchEntry, SearchStream,
};
use tracing::debug;

use crate::{
	config::WatchConfig,
	entry::{ChangeNotification, PUBLIC_KEY_OBJECT_CLASS, SEC_KEY_OBJECT_CLASS, ZONE_OBJECT_CLASS},
	error::WatchError,
};

/// OID of the sync state control attached to every synchronized entry.
const SYNC_STATE_OID: &str = "1.3.6.1.4.1.4203.1.9.1.2";

/// What to watch: everything below `base` matching `filter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
	/// Search base
	pub base: String,
	/// Search filter, applied to the whole subtree
	pub filter: String,
	/// Attributes to request
	pub attributes: Vec<String>,
}

impl WatchTarget {
	/// Watch zones, key metadata and public keys below the configured base.
	#[must_use]
	pub fn new(config: &WatchConfig) -> Self {
		Self {
			base: config.base.clone(),
			filter: Self::object_class_filter(&[
				ZONE_OBJECT_CLASS,
				SEC_KEY_OBJECT_CLASS,
				PUBLIC_KEY_OBJECT_CLASS,
			]),
			attributes: config.attributes.clone(),
		}
	}

	/// A filter matching entries with any of the given object classes.
	#[must_use]
	pub fn object_class_filter(classes: &[&str]) -> String {
		let terms: String =
			classes.iter().map(|class| format!("(objectClass={})", ldap_escape(*class))).collect();
		format!("(|{terms})")
	}
}

/// One message from the change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
	/// An entry was reported.
	Change(ChangeNotification),
	/// The server handed out a new sync cookie without an entry.
	Cookie(Vec<u8>),
	/// The initial refresh phase is complete; what follows are live changes.
	RefreshDone,
	/// The server listed entries by UUID instead of sending them.
	IdSet {
		/// Entry UUIDs
		uuids: Vec<Vec<u8>>,
		/// Whether the listed entries were deleted, rather than still present
		deleted: bool,
	},
}

/// A stream of changes produced by a subscription.
#[async_trait]
pub trait ChangeStream: Send {
	/// Wait for the next event. `Ok(None)` means the server ended the search.
	async fn next(&mut self) -> Result<Option<WatchEvent>, WatchError>;
}

/// A content synchronization search on an LDAP connection.
pub struct LdapChangeStream {
	/// The running search
	search: SearchStream<'static, String, Vec<String>>,
	/// Events decoded but not yet handed out
	pending: VecDeque<WatchEvent>,
	/// Whether the search has finished
	done: bool,
}

impl fmt::Debug for LdapChangeStream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapChangeStream")
			.field("pending", &self.pending)
			.field("done", &self.done)
			.finish_non_exhaustive()
	}
}

impl LdapChangeStream {
	/// Start the search on the given connection.
	pub(crate) async fn start(
		ldap: &mut ldap3::Ldap,
		target: &WatchTarget,
	) -> Result<Self, WatchError> {
		let request =
			SyncRequest { mode: RefreshMode::RefreshAndPersist, cookie: None, reload_hint: false };
		let search = ldap
			.with_controls(request)
			.streaming_search(&target.base, Scope::Subtree, &target.filter, target.attributes.clone())
			.await?;
		Ok(Self { search, pending: VecDeque::new(), done: false })
	}
}

#[async_trait]
impl ChangeStream for LdapChangeStream {
	async fn next(&mut self) -> Result<Option<WatchEvent>, WatchError> {
		loop {
			if let Some(event) = self.pending.pop_front() {
				return Ok(Some(event));
			}
			if self.done {
				return Ok(None);
			}
			match self.search.next().await? {
				Some(entry) if entry.is_intermediate() => {
					self.pending.extend(sync_info_events(parse_syncinfo(entry)));
				}
				Some(entry) if entry.is_ref() => debug!("Ignoring search reference"),
				Some(entry) => {
					let state = sync_state(&entry);
					let change = ChangeNotification::from_sync(SearchEntry::construct(entry), state);
					return Ok(Some(WatchEvent::Change(change)));
				}
				None => {
					self.done = true;
					self.search.finish().await.success()?;
				}
			}
		}
	}
}

/// Extract the sync state control from a search result entry.
fn sync_state(entry: &ResultEntry) -> Option<SyncState> {
	entry.1.iter().find(|ctrl| ctrl.1.ctype == SYNC_STATE_OID).map(|ctrl| ctrl.1.parse())
}

/// Translate a sync info message into the events it implies.
fn sync_info_events(info: SyncInfo) -> Vec<WatchEvent> {
	let (cookie, refresh_done, ids) = match info {
		SyncInfo::NewCookie(cookie) => (Some(cookie), false, None),
		SyncInfo::RefreshDelete { cookie, refresh_done }
		| SyncInfo::RefreshPresent { cookie, refresh_done } => (cookie, refresh_done, None),
		SyncInfo::SyncIdSet { cookie, refresh_deletes, sync_uuids } => (
			cookie,
			false,
			Some(WatchEvent::IdSet { uuids: sync_uuids.into_iter().collect(), deleted: refresh_deletes }),
		),
	};
	let mut events: Vec<WatchEvent> = cookie.map(WatchEvent::Cookie).into_iter().collect();
	events.extend(ids);
	if refresh_done {
		events.push(WatchEvent::RefreshDone);
	}
	events
}
