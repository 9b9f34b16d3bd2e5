use std::{
	collections::{HashMap, VecDeque},
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
};

use async_trait::async_trait;
use dnskey_watcher::{
	ldap3::LdapError, AuthError, BindError, ChangeConsumer, ChangeKind, ChangeNotification,
	ChangeStream, Config, Connection, ConnectionFactory, ConsumerError, CredentialCache,
	CredentialProvider, Error, Identity, RunState, WatchError, WatchEvent, WatchTarget,
};
use url::Url;

/// What the next call to [`FakeFactory::open`] does.
pub enum Open {
	Unavailable,
	Rejected,
	Failed,
	Connect(Session),
}

/// Behaviour of a connection handed out by [`FakeFactory`].
#[derive(Default)]
pub struct Session {
	pub subscribe_error: Option<WatchError>,
	pub steps: Vec<Step>,
}

impl Session {
	pub fn streaming(steps: Vec<Step>) -> Self {
		Self { subscribe_error: None, steps }
	}
}

/// What the next call to [`FakeStream::next`] does.
pub enum Step {
	Event(WatchEvent),
	Unavailable,
	Fail,
	/// Stop the run state, then block forever.
	Stop(RunState),
	/// Block forever.
	Hang,
}

#[derive(Clone, Default)]
pub struct Stats {
	pub opens: Arc<AtomicUsize>,
	pub closes: Arc<AtomicUsize>,
	pub subscribes: Arc<AtomicUsize>,
}

impl Stats {
	pub fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	pub fn subscribes(&self) -> usize {
		self.subscribes.load(Ordering::SeqCst)
	}
}

pub struct FakeFactory {
	script: Mutex<VecDeque<Open>>,
	pub stats: Stats,
}

impl FakeFactory {
	pub fn new(script: Vec<Open>) -> Self {
		Self { script: Mutex::new(script.into()), stats: Stats::default() }
	}
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
	type Connection = FakeConnection;

	async fn open(&self, _url: &Url) -> Result<FakeConnection, BindError> {
		self.stats.opens.fetch_add(1, Ordering::SeqCst);
		let next = self.script.lock().unwrap().pop_front();
		match next.expect("unexpected connection attempt") {
			Open::Unavailable => Err(BindError::ServerUnavailable(LdapError::EndOfStream)),
			Open::Rejected => Err(BindError::InvalidCredentials("ticket rejected".to_owned())),
			Open::Failed => Err(BindError::Failed(Box::new(Error::Ldap(LdapError::FilterParsing)))),
			Open::Connect(session) => {
				Ok(FakeConnection { session: Some(session), stats: self.stats.clone() })
			}
		}
	}
}

pub struct FakeConnection {
	session: Option<Session>,
	stats: Stats,
}

#[async_trait]
impl Connection for FakeConnection {
	type Stream = FakeStream;

	async fn subscribe(&mut self, _target: &WatchTarget) -> Result<FakeStream, WatchError> {
		self.stats.subscribes.fetch_add(1, Ordering::SeqCst);
		let session = self.session.take().expect("subscribed twice on one connection");
		if let Some(err) = session.subscribe_error {
			return Err(err);
		}
		Ok(FakeStream { steps: session.steps.into() })
	}

	async fn close(&mut self) -> Result<(), Error> {
		// Deliberately not idempotent: every call is counted.
		self.stats.closes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

pub struct FakeStream {
	steps: VecDeque<Step>,
}

#[async_trait]
impl ChangeStream for FakeStream {
	async fn next(&mut self) -> Result<Option<WatchEvent>, WatchError> {
		match self.steps.pop_front() {
			None => Ok(None),
			Some(Step::Event(event)) => Ok(Some(event)),
			Some(Step::Unavailable) => Err(WatchError::ServerUnavailable(LdapError::EndOfStream)),
			Some(Step::Fail) => Err(WatchError::Failed(LdapError::FilterParsing)),
			Some(Step::Stop(run_state)) => {
				run_state.stop();
				std::future::pending().await
			}
			Some(Step::Hang) => std::future::pending().await,
		}
	}
}

/// Records everything it is given.
#[derive(Default)]
pub struct RecordingConsumer {
	pub changes: Vec<ChangeNotification>,
	pub cookies: Vec<Vec<u8>>,
	pub refreshes: usize,
	pub fail: bool,
}

#[async_trait]
impl ChangeConsumer for RecordingConsumer {
	async fn apply(&mut self, change: ChangeNotification) -> Result<(), ConsumerError> {
		self.changes.push(change);
		if self.fail {
			return Err("disk full".into());
		}
		Ok(())
	}

	async fn cookie(&mut self, cookie: &[u8]) -> Result<(), ConsumerError> {
		self.cookies.push(cookie.to_vec());
		Ok(())
	}

	async fn refresh_done(&mut self) -> Result<(), ConsumerError> {
		self.refreshes += 1;
		Ok(())
	}
}

/// A credential provider that either succeeds at once, fails, or never
/// finishes.
pub struct FakeProvider {
	pub outcome: Option<bool>,
	pub calls: AtomicUsize,
	pub max_attempts: Mutex<Option<u32>>,
}

impl FakeProvider {
	pub fn new(outcome: Option<bool>) -> Self {
		Self { outcome, calls: AtomicUsize::new(0), max_attempts: Mutex::new(None) }
	}
}

#[async_trait]
impl CredentialProvider for FakeProvider {
	async fn acquire(
		&self,
		identity: &Identity,
		_keytab: &Path,
		_cache: &CredentialCache,
		max_attempts: u32,
	) -> Result<(), AuthError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		*self.max_attempts.lock().unwrap() = Some(max_attempts);
		match self.outcome {
			Some(true) => Ok(()),
			Some(false) => Err(AuthError::Exhausted {
				principal: identity.to_string(),
				attempts: max_attempts,
				reason: "Keytab contains no suitable keys".to_owned(),
			}),
			None => std::future::pending().await,
		}
	}
}

pub fn url() -> Url {
	Url::parse("ldap://ipa.example.com").unwrap()
}

pub fn target() -> WatchTarget {
	WatchTarget {
		base: "cn=dns,dc=example,dc=com".to_owned(),
		filter: "(|(objectClass=idnsZone)(objectClass=idnsSecKey)(objectClass=ipk11PublicKey))"
			.to_owned(),
		attributes: vec!["*".to_owned()],
	}
}

pub fn config() -> Config {
	Config::from_yaml("url: ldap://ipa.example.com\nwatch:\n  base: cn=dns,dc=example,dc=com\n")
		.unwrap()
}

pub fn change(kind: ChangeKind, token: &[u8]) -> WatchEvent {
	WatchEvent::Change(ChangeNotification {
		dn: "idnsname=example.com.,cn=dns,dc=example,dc=com".to_owned(),
		kind,
		entry_uuid: b"4c6a0b9e".to_vec(),
		token: Some(token.to_vec()),
		attrs: HashMap::from([(
			"objectClass".to_owned(),
			vec!["top".to_owned(), "idnsZone".to_owned()],
		)]),
		bin_attrs: HashMap::new(),
	})
}
