//! Client for connecting to LDAP and issuing raw directory operations.

use std::{collections::HashSet, fmt, future::Future, time::Duration};

use ldap3::{LdapConnAsync, LdapError, Mod, Scope, SearchEntry, SearchStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
	config::Config,
	entry::Entry,
	error::{is_disconnect, Error},
};

/// Result code the server answers with when a bind carried wrong credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;
/// Result code the server answers with when the targeted DN does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// A bound connection to an LDAP server.
///
/// All operations issued through one connection share a single session and
/// execute sequentially. If the server drops the connection while an operation
/// is in flight, the connection re-establishes the transport, rebinds with the
/// configured credentials and re-issues the whole operation exactly once; a
/// second failure propagates to the caller.
#[derive(Debug)]
pub struct LdapConnection {
	/// The configuration the connection was opened with, kept around for
	/// rebinding on reconnects and for transient authentication sessions.
	config: Config,
	/// Handle for the currently bound session. Replaced in place on reconnect.
	ldap: Mutex<ldap3::Ldap>,
}

impl LdapConnection {
	/// Open a connection to the server named in the configuration and bind
	/// with the configured credentials.
	///
	/// # Errors
	/// Fails with [`Error::InvalidCredentials`] if the server rejects the
	/// bind credentials, or with a transport or protocol error.
	pub async fn connect(config: Config) -> Result<Self, Error> {
		let ldap = Self::open(&config).await?;
		Ok(LdapConnection { config, ldap: Mutex::new(ldap) })
	}

	/// The base DN searches default to.
	#[must_use]
	pub fn base(&self) -> &str {
		&self.config.base
	}

	/// Create an [`Entry`] for an object assumed to exist on the server. No
	/// network traffic happens until an attribute is first accessed.
	#[must_use]
	pub fn get_entry(&self, dn: impl Into<String>) -> Entry<'_> {
		Entry::new(self, dn.into(), false)
	}

	/// Create an [`Entry`] for an object that does not exist on the server
	/// yet. It is created remotely on the first [`Entry::save`].
	#[must_use]
	pub fn new_entry(&self, dn: impl Into<String>) -> Entry<'_> {
		Entry::new(self, dn.into(), true)
	}

	/// Try to bind as `dn` on a separate, short-lived session. Returns `false`
	/// if the server rejects the credentials, `true` if the bind succeeds.
	///
	/// The primary session is never touched by this, so authentication checks
	/// cannot disturb concurrently running operations.
	///
	/// # Errors
	/// Transport failures and unexpected result codes propagate.
	pub async fn authenticate(&self, dn: &str, password: &str) -> Result<bool, Error> {
		match self.try_authenticate(dn, password).await {
			Err(err) if err.is_disconnect() => {
				warn!("Connection lost during authenticate, retrying");
				self.try_authenticate(dn, password).await
			}
			res => res,
		}
	}

	/// Add a new object with the given attributes.
	///
	/// # Errors
	/// Fails if the server reports anything but success.
	pub async fn add(&self, dn: &str, attrs: Vec<(String, HashSet<String>)>) -> Result<(), Error> {
		debug!(%dn, "ldap add");
		self.with_retry("add", |mut ldap| {
			let attrs = attrs.clone();
			async move {
				ldap.add(dn, attrs).await?.success()?;
				Ok(())
			}
		})
		.await
	}

	/// Apply a list of modify instructions to the object at `dn`.
	///
	/// # Errors
	/// Fails if the server reports anything but success.
	pub async fn modify(&self, dn: &str, mods: Vec<Mod<String>>) -> Result<(), Error> {
		debug!(%dn, changes = mods.len(), "ldap modify");
		self.with_retry("modify", |mut ldap| {
			let mods = mods.clone();
			async move {
				ldap.modify(dn, mods).await?.success()?;
				Ok(())
			}
		})
		.await
	}

	/// Delete the object at `dn`.
	///
	/// # Errors
	/// Fails with [`Error::NoSuchObject`] if no such object exists, or if the
	/// server reports anything but success.
	pub async fn delete(&self, dn: &str) -> Result<(), Error> {
		debug!(%dn, "ldap delete");
		let res = self
			.with_retry("delete", |mut ldap| async move {
				ldap.delete(dn).await?.success()?;
				Ok(())
			})
			.await;
		match res {
			Err(Error::Ldap(LdapError::LdapResult { result }))
				if result.rc == RC_NO_SUCH_OBJECT =>
			{
				Err(Error::NoSuchObject(dn.to_owned()))
			}
			res => res,
		}
	}

	/// Issue a streaming search and return a handle producing the results one
	/// at a time. `base` defaults to the configured base DN.
	///
	/// If the connection drops while the results are being consumed, the
	/// search is restarted from the beginning after a reconnect, at most once.
	/// Entries served before the restart may therefore be produced twice, or
	/// entries changed in between may be skipped.
	///
	/// # Errors
	/// Fails if the search cannot be started.
	pub async fn search(
		&self,
		filter: &str,
		attrs: &[&str],
		base: Option<&str>,
		scope: Scope,
	) -> Result<SearchResults<'_>, Error> {
		let base = base.unwrap_or(&self.config.base).to_owned();
		let attrs: Vec<String> = attrs.iter().map(|attr| (*attr).to_owned()).collect();
		debug!(%base, filter, "ldap search");
		let (stream, retried) = match self.start_search(&base, scope, filter, attrs.clone()).await
		{
			Err(err) if is_disconnect(&err) => {
				warn!("Connection lost starting a search, reconnecting");
				self.reconnect().await?;
				(self.start_search(&base, scope, filter, attrs.clone()).await?, true)
			}
			res => (res?, false),
		};
		Ok(SearchResults {
			conn: self,
			base,
			scope,
			filter: filter.to_owned(),
			attrs,
			stream,
			retried,
			done: false,
		})
	}

	/// Check whether an object exists at `dn`. An empty result and a
	/// no-such-object answer both count as absent.
	///
	/// # Errors
	/// Transport and protocol failures propagate.
	pub async fn dn_exists(&self, dn: &str) -> Result<bool, Error> {
		// "1.1" asks the server to return no attributes at all.
		let mut results = self.search("(objectClass=*)", &["1.1"], Some(dn), Scope::Base).await?;
		match results.next().await {
			Ok(Some(_)) => {
				// Consume the end marker so the operation finishes cleanly
				// instead of being abandoned on the session.
				while results.next().await?.is_some() {}
				Ok(true)
			}
			Ok(None) => Ok(false),
			Err(Error::NoSuchObject(_)) => Ok(false),
			Err(err) => Err(err),
		}
	}

	/// The configured per-result wait timeout.
	pub(crate) fn operation_timeout(&self) -> Duration {
		self.config.connection.operation_timeout
	}

	/// Open a transport to the configured server, spawn the task driving its
	/// message loop and bind with the configured credentials.
	async fn open(config: &Config) -> Result<ldap3::Ldap, Error> {
		let settings = config.connection.to_settings().await?;
		let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &config.url).await?;
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});
		let res = ldap.simple_bind(&config.bind_dn, &config.bind_password).await?;
		if res.rc == RC_INVALID_CREDENTIALS {
			return Err(Error::InvalidCredentials);
		}
		res.success()?;
		Ok(ldap)
	}

	/// Replace the session with a freshly opened and bound one. The old
	/// transport is abandoned; its drive task ends once the connection closes.
	pub(crate) async fn reconnect(&self) -> Result<(), Error> {
		debug!(url = %self.config.url, "Reconnecting");
		let ldap = Self::open(&self.config).await?;
		*self.ldap.lock().await = ldap;
		Ok(())
	}

	/// A clone of the current session handle with the operation timeout set.
	async fn handle(&self) -> ldap3::Ldap {
		let mut ldap = self.ldap.lock().await.clone();
		ldap.with_timeout(self.config.connection.operation_timeout);
		ldap
	}

	/// Run `op` against the current session. If it fails because the
	/// connection dropped, reconnect once and run it once more; any further
	/// failure propagates.
	async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, Error>
	where
		F: Fn(ldap3::Ldap) -> Fut,
		Fut: Future<Output = Result<T, LdapError>>,
	{
		match op(self.handle().await).await {
			Err(err) if is_disconnect(&err) => {
				warn!("Connection lost during {what}, retrying after reconnect");
				self.reconnect().await?;
				Ok(op(self.handle().await).await?)
			}
			res => Ok(res?),
		}
	}

	/// Issue a streaming search on the current session, without retry.
	///
	/// Deliberately not issued through [`Self::handle`]: per-result waits are
	/// enforced in [`SearchResults::next`], and ldap3's own operation timeout
	/// firing first would surface as an I/O error and be mistaken for a
	/// dropped connection.
	async fn start_search(
		&self,
		base: &str,
		scope: Scope,
		filter: &str,
		attrs: Vec<String>,
	) -> Result<SearchStream<'static, String, Vec<String>>, LdapError> {
		let mut ldap = self.ldap.lock().await.clone();
		ldap.streaming_search(base, scope, filter, attrs).await
	}

	/// One bind attempt on a transient session.
	async fn try_authenticate(&self, dn: &str, password: &str) -> Result<bool, Error> {
		let settings = self.config.connection.to_settings().await?;
		let (conn, mut ldap) =
			LdapConnAsync::from_url_with_settings(settings, &self.config.url).await?;
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});
		let res = ldap.simple_bind(dn, password).await?;
		let _ = ldap.unbind().await;
		if res.rc == RC_INVALID_CREDENTIALS {
			return Ok(false);
		}
		res.success()?;
		Ok(true)
	}
}

/// A running streaming search.
///
/// Produces entries one at a time as they arrive from the server; the sequence
/// is finite and ends when the server signals that there are no more results.
/// Each step may block on network I/O up to the configured operation timeout.
/// Dropping the handle before the end abandons the search without affecting
/// the session.
pub struct SearchResults<'a> {
	/// The connection the search runs on, used for mid-stream reconnects.
	conn: &'a LdapConnection,
	/// Search base, kept for restarting the search after a reconnect.
	base: String,
	/// Search scope, kept for restarting.
	scope: Scope,
	/// Search filter, kept for restarting.
	filter: String,
	/// Requested attributes, kept for restarting.
	attrs: Vec<String>,
	/// The underlying protocol-level stream.
	stream: SearchStream<'static, String, Vec<String>>,
	/// Whether the one permitted reconnect has been used up.
	retried: bool,
	/// Whether the end of the results has been reached.
	done: bool,
}

impl SearchResults<'_> {
	/// Produce the next entry, or `None` once the server has signalled the end
	/// of the results.
	///
	/// # Errors
	/// Fails with [`Error::Timeout`] if no result arrives within the operation
	/// timeout, with [`Error::NoSuchObject`] if the search base does not
	/// exist, or with a transport or protocol error. A timed-out search is
	/// abandoned on the server like a dropped handle; the session itself
	/// remains usable.
	pub async fn next(&mut self) -> Result<Option<SearchEntry>, Error> {
		if self.done {
			return Ok(None);
		}
		loop {
			let step =
				tokio::time::timeout(self.conn.operation_timeout(), self.stream.next()).await;
			match step {
				Err(_elapsed) => {
					self.done = true;
					return Err(Error::Timeout);
				}
				Ok(Ok(Some(entry))) => return Ok(Some(SearchEntry::construct(entry))),
				Ok(Ok(None)) => {
					self.done = true;
					let res = self.stream.finish().await;
					if res.rc == RC_NO_SUCH_OBJECT {
						return Err(Error::NoSuchObject(self.base.clone()));
					}
					res.success()?;
					return Ok(None);
				}
				Ok(Err(err)) if is_disconnect(&err) && !self.retried => {
					self.retried = true;
					warn!("Connection lost mid-search, restarting the search after reconnect");
					self.conn.reconnect().await?;
					self.stream = self
						.conn
						.start_search(&self.base, self.scope, &self.filter, self.attrs.clone())
						.await?;
				}
				Ok(Err(err)) => {
					self.done = true;
					return Err(err.into());
				}
			}
		}
	}
}

impl fmt::Debug for SearchResults<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SearchResults")
			.field("base", &self.base)
			.field("filter", &self.filter)
			.field("attrs", &self.attrs)
			.field("done", &self.done)
			.finish_non_exhaustive()
	}
}
