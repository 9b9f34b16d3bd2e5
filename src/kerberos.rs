//! Obtaining Kerberos tickets for the GSSAPI bind.
use std::{
	fmt,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{
	config::{KerberosConfig, DAEMON_NAME},
	error::{AuthError, Error},
};

/// Environment variable Kerberos libraries read the active credential cache
/// from.
pub const CCACHE_ENV: &str = "KRB5CCNAME";

/// The service principal we authenticate as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	/// Service name, the first principal component
	service: String,
	/// Fully qualified host name, the second principal component
	host: String,
	/// Realm, or the configured default realm if `None`
	realm: Option<String>,
}

impl Identity {
	/// Create an identity from its parts.
	#[must_use]
	pub fn new(service: &str, host: &str, realm: Option<&str>) -> Self {
		Self { service: service.to_owned(), host: host.to_owned(), realm: realm.map(String::from) }
	}

	/// The identity of this daemon on the configured or the local host.
	pub fn from_config(config: &KerberosConfig) -> Result<Self, Error> {
		let host = match &config.host {
			Some(host) => host.clone(),
			None => hostname::get()?.into_string().map_err(|name| {
				Error::Invalid(format!("Host name {name:?} is not valid UTF-8"))
			})?,
		};
		Ok(Self::new(DAEMON_NAME, &host, config.realm.as_deref()))
	}

	/// The host component.
	#[must_use]
	pub fn host(&self) -> &str {
		&self.host
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.service, self.host)?;
		if let Some(realm) = &self.realm {
			write!(f, "@{realm}")?;
		}
		Ok(())
	}
}

/// A file backed credential cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCache {
	/// Location of the cache file
	path: PathBuf,
}

impl CredentialCache {
	/// A cache named after the service inside the given private directory.
	#[must_use]
	pub fn in_dir(dir: &Path, service: &str) -> Self {
		Self { path: dir.join(format!("{service}.ccache")) }
	}

	/// Location of the cache file.
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Cache name as understood by Kerberos libraries.
	#[must_use]
	pub fn name(&self) -> String {
		format!("FILE:{}", self.path.display())
	}

	/// Make this the cache used by every subsequent GSSAPI bind.
	pub fn activate(&self) {
		std::env::set_var(CCACHE_ENV, self.name());
	}

	/// Create the directory holding the cache, readable only by us.
	async fn prepare(&self) -> std::io::Result<()> {
		let Some(dir) = self.path.parent() else {
			return Ok(());
		};
		let mut builder = tokio::fs::DirBuilder::new();
		builder.recursive(true).mode(0o700);
		builder.create(dir).await
	}
}

/// Something that can put a ticket for an identity into a credential cache.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
	/// Authenticate with the keytab, writing the ticket into `cache` and
	/// activating it. Gives up after `max_attempts` failed attempts.
	async fn acquire(
		&self,
		identity: &Identity,
		keytab: &Path,
		cache: &CredentialCache,
		max_attempts: u32,
	) -> Result<(), AuthError>;
}

/// Obtains tickets by running `kinit` with a keytab.
#[derive(Debug, Clone)]
pub struct Kinit {
	/// The program to run
	program: PathBuf,
}

impl Kinit {
	/// Use the given `kinit` binary.
	#[must_use]
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self { program: program.into() }
	}

	/// Run `kinit` once, returning why it failed.
	async fn attempt(
		&self,
		principal: &str,
		keytab: &Path,
		cache: &CredentialCache,
	) -> Result<(), String> {
		let output = Command::new(&self.program)
			.arg("-k")
			.arg("-t")
			.arg(keytab)
			.arg("-c")
			.arg(cache.name())
			.arg(principal)
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|err| format!("Could not run {}: {err}", self.program.display()))?;
		if output.status.success() {
			return Ok(());
		}
		let stderr = String::from_utf8_lossy(&output.stderr);
		Err(format!("{} ({})", stderr.trim(), output.status))
	}
}

impl Default for Kinit {
	fn default() -> Self {
		Self::new("kinit")
	}
}

#[async_trait]
impl CredentialProvider for Kinit {
	async fn acquire(
		&self,
		identity: &Identity,
		keytab: &Path,
		cache: &CredentialCache,
		max_attempts: u32,
	) -> Result<(), AuthError> {
		cache.prepare().await.map_err(AuthError::Cache)?;

		let principal = identity.to_string();
		let attempts = max_attempts.max(1);
		let mut reason = String::new();
		for attempt in 1..=attempts {
			match self.attempt(&principal, keytab, cache).await {
				Ok(()) => {
					cache.activate();
					info!(%principal, cache = %cache.name(), "Obtained Kerberos ticket");
					return Ok(());
				}
				Err(err) => {
					warn!(%principal, attempt, "Obtaining Kerberos ticket failed: {err}");
					reason = err;
				}
			}
		}
		Err(AuthError::Exhausted { principal, attempts, reason })
	}
}
