//! Authenticated connections to the directory server.
use std::fmt;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapResult};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
	config::ConnectionConfig,
	error::{BindError, Error, WatchError},
	watcher::{ChangeStream, LdapChangeStream, WatchTarget},
};

/// An authenticated session with the directory server.
#[async_trait]
pub trait Connection: Send {
	/// The stream of changes a subscription yields.
	type Stream: ChangeStream;

	/// Start a persistent search for the target.
	async fn subscribe(&mut self, target: &WatchTarget) -> Result<Self::Stream, WatchError>;

	/// Release the session. Calling this more than once has no effect.
	async fn close(&mut self) -> Result<(), Error>;
}

/// Opens [`Connection`]s.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
	/// The kind of connection produced.
	type Connection: Connection;

	/// Connect to the server at `url` and bind.
	async fn open(&self, url: &Url) -> Result<Self::Connection, BindError>;
}

/// Connects with `ldap3` and binds with SASL GSSAPI using the active
/// Kerberos credential cache.
#[derive(Debug, Clone)]
pub struct LdapConnector {
	/// Connection settings
	config: ConnectionConfig,
	/// Our own host name, used as the server name for `ldapi` URLs
	local_host: String,
}

impl LdapConnector {
	/// Create a connector. `local_host` is the server name used for the
	/// GSSAPI exchange when connecting over a unix socket.
	#[must_use]
	pub fn new(config: ConnectionConfig, local_host: &str) -> Self {
		Self { config, local_host: local_host.to_owned() }
	}

	/// The host name the server's service principal is expected to carry.
	fn server_fqdn<'a>(&'a self, url: &'a Url) -> &'a str {
		match url.scheme() {
			"ldapi" => &self.local_host,
			_ => url.host_str().unwrap_or(&self.local_host),
		}
	}
}

#[async_trait]
impl ConnectionFactory for LdapConnector {
	type Connection = LdapConnection;

	async fn open(&self, url: &Url) -> Result<LdapConnection, BindError> {
		let settings =
			self.config.to_settings().await.map_err(|err| BindError::Failed(Box::new(err)))?;
		let (conn, ldap) = LdapConnAsync::from_url_with_settings(settings, url).await?;
		let driver = tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});
		let mut connection = LdapConnection { ldap, driver, closed: false };

		let fqdn = self.server_fqdn(url);
		debug!(%url, fqdn, "Binding with GSSAPI");
		connection.ldap.sasl_gssapi_bind(fqdn).await.and_then(LdapResult::success)?;
		info!(%url, "Connected to directory server");
		Ok(connection)
	}
}

/// A bound `ldap3` connection and the task driving it.
pub struct LdapConnection {
	/// Handle used to issue operations
	ldap: ldap3::Ldap,
	/// Background task driving the connection
	driver: JoinHandle<()>,
	/// Whether [`Connection::close`] has run
	closed: bool,
}

impl fmt::Debug for LdapConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapConnection").field("closed", &self.closed).finish_non_exhaustive()
	}
}

#[async_trait]
impl Connection for LdapConnection {
	type Stream = LdapChangeStream;

	async fn subscribe(&mut self, target: &WatchTarget) -> Result<LdapChangeStream, WatchError> {
		LdapChangeStream::start(&mut self.ldap, target).await
	}

	async fn close(&mut self) -> Result<(), Error> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		let result = self.ldap.unbind().await;
		self.driver.abort();
		Ok(result?)
	}
}

impl Drop for LdapConnection {
	fn drop(&mut self) {
		self.driver.abort();
	}
}
