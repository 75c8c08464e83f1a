//! Lazily fetched directory entries with local change tracking.

use std::{
	collections::{HashMap, HashSet},
	fmt,
};

use ldap3::{Mod, Scope};
use tracing::debug;

use crate::{attribute::Attribute, error::Error, ldap::LdapConnection};

/// A directory object identified by its DN.
///
/// Attributes are fetched from the server lazily on first access, so entries
/// can be created without network traffic. Local mutations are recorded per
/// attribute and turned into a single add or modify call by [`Entry::save`];
/// until then nothing is sent to the server.
#[derive(Debug)]
pub struct Entry<'a> {
	/// The connection used for all remote operations on this entry.
	conn: &'a LdapConnection,
	/// The DN identifying the object. Immutable.
	dn: String,
	/// Attribute trackers by attribute name. `None` until the entry has been
	/// fetched; new entries start out with an empty map instead.
	attrs: Option<HashMap<String, Attribute>>,
	/// Attribute names whose server-side deletion is pending.
	pending_deletes: Vec<String>,
	/// Whether the object has not been created on the server yet.
	new: bool,
	/// Cleared once the entry has been deleted from the server.
	valid: bool,
}

impl<'a> Entry<'a> {
	/// Create an entry handle. Called through [`LdapConnection::get_entry`]
	/// and [`LdapConnection::new_entry`].
	pub(crate) fn new(conn: &'a LdapConnection, dn: String, new: bool) -> Self {
		Entry {
			conn,
			dn,
			attrs: new.then(HashMap::new),
			pending_deletes: Vec::new(),
			new,
			valid: true,
		}
	}

	/// The DN of this entry.
	#[must_use]
	pub fn dn(&self) -> &str {
		&self.dn
	}

	/// Whether the entry still has to be created on the server.
	#[must_use]
	pub fn is_new(&self) -> bool {
		self.new
	}

	/// Load the attributes from the server, discarding any local state.
	///
	/// Usually there is no need to call this directly since reads and writes
	/// fetch on demand, but it can be used to refresh an entry.
	///
	/// # Errors
	/// Fails with [`Error::NoSuchObject`] if no object exists at this DN.
	pub async fn fetch(&mut self) -> Result<(), Error> {
		if !self.valid {
			return Err(Error::InvalidEntry);
		}
		let mut results =
			self.conn.search("(objectClass=*)", &["*"], Some(&self.dn), Scope::Base).await?;
		let Some(entry) = results.next().await? else {
			return Err(Error::NoSuchObject(self.dn.clone()));
		};
		// Base-scope searches produce a single entry, but the stream must
		// still be consumed to its end marker.
		while results.next().await?.is_some() {}
		self.attrs = Some(
			entry
				.attrs
				.into_iter()
				.map(|(name, values)| (name.clone(), Attribute::loaded(name, values)))
				.collect(),
		);
		self.pending_deletes.clear();
		Ok(())
	}

	/// Get an attribute by name, fetching the entry first if necessary.
	///
	/// # Errors
	/// Fails with [`Error::AttributeNotFound`] if the entry has no such
	/// attribute.
	pub async fn get(&mut self, name: &str) -> Result<&Attribute, Error> {
		self.ensure_fetched().await?;
		self.attrs
			.as_ref()
			.ok_or(Error::NotFetched)?
			.get(name)
			.ok_or_else(|| Error::AttributeNotFound(name.to_owned()))
	}

	/// Get an attribute by name for in-place mutation, e.g. to
	/// [`append`](Attribute::append) individual values.
	///
	/// # Errors
	/// Fails with [`Error::AttributeNotFound`] if the entry has no such
	/// attribute.
	pub async fn get_mut(&mut self, name: &str) -> Result<&mut Attribute, Error> {
		self.ensure_fetched().await?;
		self.attrs
			.as_mut()
			.ok_or(Error::NotFetched)?
			.get_mut(name)
			.ok_or_else(|| Error::AttributeNotFound(name.to_owned()))
	}

	/// Whether `class` is a member of the entry's `objectClass` attribute.
	/// The comparison is a case-sensitive exact match; an entry without an
	/// `objectClass` attribute is not a member of any class.
	///
	/// # Errors
	/// Fails if the entry cannot be fetched.
	pub async fn has_object_class(&mut self, class: &str) -> Result<bool, Error> {
		self.ensure_fetched().await?;
		Ok(self
			.attrs
			.as_ref()
			.ok_or(Error::NotFetched)?
			.get("objectClass")
			.map_or(false, |attr| attr.contains(class)))
	}

	/// Set the values of an attribute, replacing any existing ones. An
	/// attribute the entry does not have yet is created.
	///
	/// # Errors
	/// Fails if the entry cannot be fetched.
	pub async fn set<I, S>(&mut self, name: &str, values: I) -> Result<(), Error>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.ensure_fetched().await?;
		let was_pending = if let Some(pos) = self.pending_deletes.iter().position(|n| n == name) {
			self.pending_deletes.remove(pos);
			true
		} else {
			false
		};
		let attrs = self.attrs.as_mut().ok_or(Error::NotFetched)?;
		if let Some(attr) = attrs.get_mut(name) {
			attr.set_values(values);
		} else if was_pending {
			// The attribute still exists on the server, so a plain add would
			// pile the new values on top of the old ones. Replace instead.
			let mut attr = Attribute::loaded(name, Vec::<String>::new());
			attr.set_values(values);
			attrs.insert(name.to_owned(), attr);
		} else {
			attrs.insert(name.to_owned(), Attribute::added(name, values));
		}
		Ok(())
	}

	/// Remove an attribute, queueing its server-side deletion for the next
	/// [`Entry::save`].
	///
	/// # Errors
	/// Fails with [`Error::AttributeNotFound`] if the entry has no such
	/// attribute.
	pub async fn remove(&mut self, name: &str) -> Result<(), Error> {
		self.ensure_fetched().await?;
		let attrs = self.attrs.as_mut().ok_or(Error::NotFetched)?;
		if attrs.remove(name).is_none() {
			return Err(Error::AttributeNotFound(name.to_owned()));
		}
		// A new entry has nothing on the server to delete.
		if !self.new && !self.pending_deletes.iter().any(|n| n == name) {
			self.pending_deletes.push(name.to_owned());
		}
		Ok(())
	}

	/// Write all pending changes back to the server.
	///
	/// A new entry is created with a single add carrying every attribute's
	/// full value set. An existing entry gets a single modify combining the
	/// pending attribute deletions with every attribute's change instructions;
	/// if there are no changes at all, no call is made. Local dirty state is
	/// only cleared once the server has confirmed the operation, so a failed
	/// save can simply be retried.
	///
	/// # Errors
	/// Fails with [`Error::NotFetched`] when called on an existing entry that
	/// was never fetched, or with any error of the underlying operation.
	pub async fn save(&mut self) -> Result<(), Error> {
		if !self.valid {
			return Err(Error::InvalidEntry);
		}
		if self.new {
			let attrs = self.attrs.as_ref().ok_or(Error::NotFetched)?;
			let attr_list: Vec<(String, HashSet<String>)> = attrs
				.values()
				.filter(|attr| !attr.is_empty())
				.map(|attr| (attr.name().to_owned(), attr.iter().cloned().collect()))
				.collect();
			self.conn.add(&self.dn, attr_list).await?;
			self.new = false;
		} else {
			let attrs = self.attrs.as_ref().ok_or(Error::NotFetched)?;
			let mods = collect_mods(&self.pending_deletes, attrs);
			if mods.is_empty() {
				return Ok(());
			}
			self.conn.modify(&self.dn, mods).await?;
		}
		self.pending_deletes.clear();
		if let Some(attrs) = self.attrs.as_mut() {
			for attr in attrs.values_mut() {
				attr.discard_changes();
			}
		}
		Ok(())
	}

	/// Delete the object from the server. Afterwards the entry is invalid and
	/// every further operation on it fails.
	///
	/// # Errors
	/// Fails with [`Error::NoSuchObject`] if the object does not exist.
	pub async fn delete(&mut self) -> Result<(), Error> {
		if !self.valid {
			return Err(Error::InvalidEntry);
		}
		self.conn.delete(&self.dn).await?;
		self.valid = false;
		Ok(())
	}

	/// Whether an object exists at this entry's DN.
	///
	/// # Errors
	/// Transport and protocol failures propagate.
	pub async fn exists(&self) -> Result<bool, Error> {
		if !self.valid {
			return Err(Error::InvalidEntry);
		}
		self.conn.dn_exists(&self.dn).await
	}

	/// Check a password against this entry by binding as its DN on a separate
	/// session.
	///
	/// # Errors
	/// Transport and protocol failures propagate.
	pub async fn check_password(&self, password: &str) -> Result<bool, Error> {
		if !self.valid {
			return Err(Error::InvalidEntry);
		}
		self.conn.authenticate(&self.dn, password).await
	}

	/// Set the `userPassword` attribute. The value is passed through as-is;
	/// hashing is left to the server.
	///
	/// # Errors
	/// Fails if the entry cannot be fetched.
	pub async fn set_password(&mut self, password: &str) -> Result<(), Error> {
		self.set("userPassword", [password]).await
	}

	/// Fetch the attributes if that has not happened yet.
	async fn ensure_fetched(&mut self) -> Result<(), Error> {
		if !self.valid {
			return Err(Error::InvalidEntry);
		}
		if self.attrs.is_none() {
			debug!(dn = %self.dn, "Lazily fetching entry");
			self.fetch().await?;
		}
		Ok(())
	}
}

impl fmt::Display for Entry<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.dn)
	}
}

/// Combine pending attribute deletions and per-attribute change instructions
/// into the instruction list for a single modify call. Deletions come first so
/// that a deleted-then-recreated attribute ends up with the new values.
fn collect_mods(pending_deletes: &[String], attrs: &HashMap<String, Attribute>) -> Vec<Mod<String>> {
	let mut mods: Vec<Mod<String>> = pending_deletes
		.iter()
		.map(|name| Mod::Delete(name.clone(), HashSet::new()))
		.collect();
	for attr in attrs.values() {
		mods.extend(attr.changes());
	}
	mods
}
