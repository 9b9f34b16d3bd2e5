//! Config for the watcher.
use std::{
	io::BufReader,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Environment variable that overrides where the configuration is read from.
pub const CONFIG_ENV: &str = "DNSKEY_WATCHER_CONFIG";
/// Where the configuration is read from by default.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dnskey-watcher/config.yaml";
/// Fixed service name used as the first component of our Kerberos principal.
pub const DAEMON_NAME: &str = "dnskey-watcher";

/// Watcher configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// Which part of the directory to watch
	pub watch: WatchConfig,
	/// How to obtain Kerberos credentials
	#[serde(default)]
	pub kerberos: KerberosConfig,
	/// Seconds to wait before retrying when the server cannot be reached
	#[serde(default = "default_reconnect_delay")]
	pub reconnect_delay: u64,
}

impl Config {
	/// Read the configuration from a YAML file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
		let contents = std::fs::read_to_string(path)?;
		Self::from_yaml(&contents)
	}

	/// Parse the configuration from a YAML document.
	pub fn from_yaml(contents: &str) -> Result<Self, Error> {
		Ok(serde_yaml::from_str(contents)?)
	}

	/// Read the configuration from the file named by [`CONFIG_ENV`], falling
	/// back to [`DEFAULT_CONFIG_PATH`].
	pub fn from_env() -> Result<Self, Error> {
		let path = std::env::var_os(CONFIG_ENV)
			.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
		Self::from_file(path)
	}

	/// Delay between connection attempts while the server is unreachable.
	#[must_use]
	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_secs(self.reconnect_delay)
	}
}

/// Default for [`Config::reconnect_delay`].
const fn default_reconnect_delay() -> u64 {
	5
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// TLS config
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 30, tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

/// The subtree to watch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
	/// Base DN of the subtree holding zones and keys
	pub base: String,
	/// Attributes the server should return for every entry
	#[serde(default = "default_attributes")]
	pub attributes: Vec<String>,
}

/// Default for [`WatchConfig::attributes`].
fn default_attributes() -> Vec<String> {
	vec!["*".to_owned(), "entryUUID".to_owned()]
}

/// Kerberos settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KerberosConfig {
	/// Host part of the service principal. The local host name if unset.
	pub host: Option<String>,
	/// Realm of the service principal. The default realm if unset.
	pub realm: Option<String>,
	/// Keytab holding the service key
	pub keytab: PathBuf,
	/// Private directory the credential cache is written to
	pub cache_dir: PathBuf,
	/// How often to try obtaining a ticket before giving up
	pub attempts: u32,
	/// The `kinit` program to run
	pub kinit: PathBuf,
}

impl Default for KerberosConfig {
	fn default() -> Self {
		Self {
			host: None,
			realm: None,
			keytab: PathBuf::from("/etc/dnskey-watcher/dnskey-watcher.keytab"),
			cache_dir: PathBuf::from("/var/lib/dnskey-watcher"),
			attempts: 5,
			kinit: PathBuf::from("kinit"),
		}
	}
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			for certificate in read_certificates(path).await? {
				roots
					.add(&certificate)
					.map_err(|_| Error::Invalid("Could not read root certificate".to_owned()))?;
			}
			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

			let config = match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
				(Some(key_path), Some(cert_path)) => {
					let chain = read_certificates(cert_path).await?;
					let key = read_private_key(key_path).await?;
					builder.with_client_auth_cert(chain, key).map_err(|_| {
						Error::Invalid("Could not read client certificates".to_owned())
					})?
				}
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}

/// Read all PEM encoded certificates from a file.
async fn read_certificates(path: &Path) -> Result<Vec<Certificate>, Error> {
	let pem = tokio::fs::read(path).await?;
	let certificates = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))?;
	if certificates.is_empty() {
		return Err(Error::Invalid(format!("No certificates found in {}", path.display())));
	}
	Ok(certificates.into_iter().map(Certificate).collect())
}

/// Read the first PKCS8 private key from a PEM file.
async fn read_private_key(path: &Path) -> Result<PrivateKey, Error> {
	let pem = tokio::fs::read(path).await?;
	rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(pem.as_slice()))?
		.into_iter()
		.next()
		.map(PrivateKey)
		.ok_or_else(|| Error::Invalid(format!("No PKCS8 key found in {}", path.display())))
}
