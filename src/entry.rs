//! Change notifications and helper methods for extracting data from them.
use std::collections::HashMap;

use ldap3::{
	controls::{EntryState, SyncState},
	SearchEntry,
};

/// Object class of DNS zone entries.
pub const ZONE_OBJECT_CLASS: &str = "idnsZone";
/// Object class of DNSSEC key metadata entries.
pub const SEC_KEY_OBJECT_CLASS: &str = "idnsSecKey";
/// Object class of PKCS#11 public key entries.
pub const PUBLIC_KEY_OBJECT_CLASS: &str = "ipk11PublicKey";

/// What happened to an entry, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	/// The entry existed when the search started. Sent during the initial
	/// refresh phase.
	Present,
	/// The entry was added.
	Add,
	/// The entry was modified.
	Modify,
	/// The entry was deleted. Only the DN and UUID are meaningful.
	Delete,
}

impl From<EntryState> for ChangeKind {
	fn from(state: EntryState) -> Self {
		match state {
			EntryState::Present => Self::Present,
			EntryState::Add => Self::Add,
			EntryState::Modify => Self::Modify,
			EntryState::Delete => Self::Delete,
		}
	}
}

/// Which kind of key material an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
	/// A DNS zone
	Zone,
	/// DNSSEC key metadata
	SecKey,
	/// A PKCS#11 public key
	PublicKey,
	/// None of the above, e.g. a deleted entry without attributes
	Unknown,
}

/// A single observed entry event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
	/// Distinguished name of the entry
	pub dn: String,
	/// What happened to the entry
	pub kind: ChangeKind,
	/// The server's stable identifier of the entry
	pub entry_uuid: Vec<u8>,
	/// Sequencing token (sync cookie) the server attached to this event
	pub token: Option<Vec<u8>>,
	/// Textual attributes
	pub attrs: HashMap<String, Vec<String>>,
	/// Attributes with values that are not valid UTF-8
	pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl ChangeNotification {
	/// Combine a search result entry with the sync state control the server
	/// sent along with it. Entries without a state are treated as present.
	#[must_use]
	pub fn from_sync(entry: SearchEntry, state: Option<SyncState>) -> Self {
		let (kind, entry_uuid, token) = match state {
			Some(state) => (state.state.into(), state.entry_uuid, state.cookie),
			None => (ChangeKind::Present, Vec::new(), None),
		};
		Self { dn: entry.dn, kind, entry_uuid, token, attrs: entry.attrs, bin_attrs: entry.bin_attrs }
	}

	/// Classify the entry by its object classes.
	#[must_use]
	pub fn object_kind(&self) -> ObjectKind {
		if self.has_object_class(ZONE_OBJECT_CLASS) {
			ObjectKind::Zone
		} else if self.has_object_class(SEC_KEY_OBJECT_CLASS) {
			ObjectKind::SecKey
		} else if self.has_object_class(PUBLIC_KEY_OBJECT_CLASS) {
			ObjectKind::PublicKey
		} else {
			ObjectKind::Unknown
		}
	}
}

/// An extension trait for entries that provides convenience methods for
/// extracting data.
pub trait SearchEntryExt {
	/// All textual values of an attribute. Attribute names are matched
	/// case-insensitively.
	fn attr(&self, attr: &str) -> Option<&[String]>;

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr(attr)?.first().map(String::as_str)
	}

	/// Whether the entry carries the given object class.
	fn has_object_class(&self, class: &str) -> bool {
		self.attr("objectClass")
			.is_some_and(|classes| classes.iter().any(|c| c.eq_ignore_ascii_case(class)))
	}
}

impl SearchEntryExt for ChangeNotification {
	fn attr(&self, attr: &str) -> Option<&[String]> {
		self.attrs
			.get(attr)
			.or_else(|| {
				self.attrs.iter().find(|(name, _)| name.eq_ignore_ascii_case(attr)).map(|(_, v)| v)
			})
			.map(Vec::as_slice)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use ldap3::{
		controls::{EntryState, SyncState},
		SearchEntry,
	};

	use super::{ChangeKind, ChangeNotification, ObjectKind, SearchEntryExt};

	fn zone() -> SearchEntry {
		SearchEntry {
			dn: String::from("idnsname=example.com.,cn=dns,dc=example,dc=com"),
			attrs: [
				(String::from("objectClass"), vec![String::from("top"), String::from("idnszone")]),
				(String::from("idnsName"), vec![String::from("example.com.")]),
				(String::from("idnsSecInlineSigning"), vec![String::from("TRUE")]),
			]
			.into_iter()
			.collect(),
			bin_attrs: [(String::from("ipk11Id"), vec![vec![0xde, 0xad]])].into_iter().collect(),
		}
	}

	#[test]
	fn attr_first() {
		let change = ChangeNotification::from_sync(zone(), None);
		assert_eq!(
			change.attr_first("attribute_does_not_exist"),
			None,
			"Undefined attributes should return None"
		);
		assert_eq!(change.attr_first("idnsName"), Some("example.com."));
		assert_eq!(change.attr_first("idnsname"), Some("example.com."), "Names are case-insensitive");
		assert_eq!(change.attr_first("ipk11Id"), None, "Binary values are not textual");
		assert!(change.has_object_class("idnsZone"));
		assert!(!change.has_object_class("idnsSecKey"));
	}

	#[test]
	fn notification_from_sync_state() {
		let state = SyncState {
			state: EntryState::Modify,
			entry_uuid: vec![1, 2, 3],
			cookie: Some(b"rid=000,csn=1".to_vec()),
		};
		let change = ChangeNotification::from_sync(zone(), Some(state));

		assert_eq!(change.kind, ChangeKind::Modify);
		assert_eq!(change.entry_uuid, [1, 2, 3]);
		assert_eq!(change.token.as_deref(), Some(&b"rid=000,csn=1"[..]));
		assert_eq!(change.object_kind(), ObjectKind::Zone, "Object classes match case-insensitively");
		assert_eq!(change.attr_first("idnsName"), Some("example.com."));
	}

	#[test]
	fn deleted_entry_has_no_kind() {
		let entry = SearchEntry {
			dn: String::from("ipk11UniqueId=abc,cn=keys,cn=sec,cn=dns,dc=example,dc=com"),
			attrs: HashMap::new(),
			bin_attrs: HashMap::new(),
		};
		let state = SyncState { state: EntryState::Delete, entry_uuid: vec![9], cookie: None };
		let change = ChangeNotification::from_sync(entry, Some(state));

		assert_eq!(change.kind, ChangeKind::Delete);
		assert_eq!(change.object_kind(), ObjectKind::Unknown);
	}

	#[test]
	fn missing_state_is_present() {
		let change = ChangeNotification::from_sync(zone(), None);
		assert_eq!(change.kind, ChangeKind::Present);
		assert!(change.entry_uuid.is_empty());
		assert_eq!(change.token, None);
	}
}
