//! Error codes

use ldap3::LdapError;

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The server rejected the credentials given for the initial bind.
	#[error("Invalid credentials")]
	InvalidCredentials,
	/// No entry exists at the given DN.
	#[error("No such object: {0}")]
	NoSuchObject(String),
	/// The entry has no attribute with the given name.
	#[error("Attribute not found: {0}")]
	AttributeNotFound(String),
	/// The entry's attributes were never fetched, so there is nothing to
	/// compute changes against.
	#[error("Entry has not been fetched")]
	NotFetched,
	/// The entry was deleted from the server and must not be used any more.
	#[error("Entry is no longer valid")]
	InvalidEntry,
	/// Waiting for the next search result took longer than the configured
	/// operation timeout.
	#[error("Timed out waiting for a search result")]
	Timeout,
	/// A configuration value was malformed.
	#[error("{0}")]
	Invalid(String),
	/// An I/O error occurred, e.g. while reading certificate files.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] LdapError),
}

impl Error {
	/// Whether this error wraps a dropped server connection.
	pub(crate) fn is_disconnect(&self) -> bool {
		matches!(self, Error::Ldap(err) if is_disconnect(err))
	}
}

/// Whether an [`LdapError`] indicates that the connection to the server
/// dropped, as opposed to the server answering with a failure result. Only
/// these errors are eligible for the one-shot reconnect and retry.
pub(crate) fn is_disconnect(err: &LdapError) -> bool {
	matches!(
		err,
		LdapError::Io { .. }
			| LdapError::OpSend { .. }
			| LdapError::ResultRecv { .. }
			| LdapError::EndOfStream
	)
}
