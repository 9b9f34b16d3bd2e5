//! Error codes

use ldap3::LdapError;

/// LDAP result code for a rejected bind.
pub(crate) const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code reported by a server that is too busy to answer.
pub(crate) const RC_BUSY: u32 = 51;
/// LDAP result code reported by a server that is shutting down or not ready.
pub(crate) const RC_UNAVAILABLE: u32 = 52;

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The contents of an attribute or setting did not conform to the
	/// expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// The configuration file could not be parsed.
	#[error("Invalid configuration: {0}")]
	Config(#[from] serde_yaml::Error),
	/// Reading a file failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] LdapError),
	/// Kerberos credentials could not be acquired.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Connecting or binding to the directory failed.
	#[error(transparent)]
	Bind(#[from] BindError),
	/// The change stream failed.
	#[error(transparent)]
	Watch(#[from] WatchError),
}

/// Failure to obtain a Kerberos ticket.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
	/// Every attempt failed.
	#[error("Could not obtain a ticket for {principal} after {attempts} attempts: {reason}")]
	Exhausted {
		/// Principal the ticket was requested for
		principal: String,
		/// Number of attempts made
		attempts: u32,
		/// Failure reported by the last attempt
		reason: String,
	},
	/// The credential cache directory could not be prepared.
	#[error("Could not prepare credential cache: {0}")]
	Cache(#[source] std::io::Error),
}

/// Failure to establish an authenticated connection.
#[derive(thiserror::Error, Debug)]
pub enum BindError {
	/// The server rejected our credentials.
	#[error("Invalid credentials: {0}")]
	InvalidCredentials(String),
	/// The server could not be reached. Worth retrying.
	#[error("Server unavailable: {0}")]
	ServerUnavailable(#[source] LdapError),
	/// Any other failure.
	#[error("Bind failed: {0}")]
	Failed(#[source] Box<Error>),
}

/// Failure of a persistent search.
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
	/// The server went away or the transport broke.
	#[error("Server unavailable: {0}")]
	ServerUnavailable(#[source] LdapError),
	/// Any other failure.
	#[error("Search failed: {0}")]
	Failed(#[source] LdapError),
}

impl From<LdapError> for BindError {
	fn from(err: LdapError) -> Self {
		match err {
			LdapError::LdapResult { result } if result.rc == RC_INVALID_CREDENTIALS => {
				Self::InvalidCredentials(result.text)
			}
			err if is_unavailable(&err) => Self::ServerUnavailable(err),
			err => Self::Failed(Box::new(Error::Ldap(err))),
		}
	}
}

impl From<LdapError> for WatchError {
	fn from(err: LdapError) -> Self {
		if is_unavailable(&err) {
			Self::ServerUnavailable(err)
		} else {
			Self::Failed(err)
		}
	}
}

/// Whether an error means the server could not be reached or the transport
/// died, as opposed to the server answering with a refusal.
#[must_use]
pub fn is_unavailable(err: &LdapError) -> bool {
	match err {
		LdapError::Io { .. }
		| LdapError::Timeout { .. }
		| LdapError::EndOfStream
		| LdapError::OpSend { .. }
		| LdapError::ResultRecv { .. } => true,
		LdapError::LdapResult { result } => matches!(result.rc, RC_BUSY | RC_UNAVAILABLE),
		_ => false,
	}
}
