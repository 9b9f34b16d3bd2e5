//! Watch a directory subtree holding DNSSEC key material and react to
//! changes as they happen.
//!
//! The watcher authenticates with a Kerberos service ticket obtained from a
//! keytab, binds to the directory server with SASL GSSAPI and issues a
//! persistent search using the [content synchronization] control in
//! `refreshAndPersist` mode. The server first sends every zone, key metadata
//! and public key entry below the configured base, then keeps the search open
//! and streams additions, modifications and deletions. Each of them is
//! handed to a [`ChangeConsumer`] before the next one is read.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [content synchronization]: https://www.rfc-editor.org/rfc/rfc4533.html
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Failure handling
//! * A server that cannot be reached while connecting is retried after a
//!   fixed delay, for as long as the process runs.
//! * Rejected credentials, a failure to obtain a ticket, and losing the server
//!   while a subscription is active are fatal: [`Termination::Fatal`], exit
//!   status 1. Restarting is left to the process supervisor.
//! * SIGTERM and SIGINT stop the [`RunState`]; the active connection is closed
//!   and the watcher ends with [`Termination::Shutdown`], exit status 0.
//!
//! # Getting started
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use dnskey_watcher::{
//!     Config, Daemon, Identity, Kinit, LdapConnector, RunState, ShutdownController,
//!     TracingConsumer,
//! };
//!
//! let config = Config::from_file("/etc/dnskey-watcher/config.yaml")?;
//! let identity = Identity::from_config(&config.kerberos)?;
//! let run_state = RunState::new();
//! ShutdownController::new(run_state.clone()).listen()?;
//!
//! let factory = LdapConnector::new(config.connection.clone(), identity.host());
//! let provider = Kinit::new(config.kerberos.kinit.clone());
//! let termination = Daemon::new(config, identity, run_state)
//!     .run(&provider, factory, TracingConsumer)
//!     .await;
//! std::process::exit(termination.exit_code().into());
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod consumer;
pub mod daemon;
pub mod entry;
pub mod error;
pub mod kerberos;
pub mod reconnect;
mod sequence;
pub mod shutdown;
pub mod watcher;

pub use ldap3;

pub use crate::{
	config::{Config, ConnectionConfig, KerberosConfig, TLSConfig, WatchConfig},
	connection::{Connection, ConnectionFactory, LdapConnection, LdapConnector},
	consumer::{ChangeConsumer, ConsumerError, TracingConsumer},
	daemon::Daemon,
	entry::{ChangeKind, ChangeNotification, ObjectKind, SearchEntryExt},
	error::{AuthError, BindError, Error, WatchError},
	kerberos::{CredentialCache, CredentialProvider, Identity, Kinit},
	reconnect::{ReconnectLoop, Termination},
	shutdown::{RunState, ShutdownController},
	watcher::{ChangeStream, LdapChangeStream, WatchEvent, WatchTarget},
};
