//! Change tracking for a single named attribute of a directory entry.

use std::{collections::HashSet, fmt};

use ldap3::Mod;

/// The values of one named attribute, together with a record of the local
/// changes made to them since the last save.
///
/// Values form an ordered set of strings; inserting a value that is already
/// present is a silent no-op. Changes are tracked on two channels: a list of
/// incrementally added values, and a "replace everything" flag which is set by
/// any mutation that cannot be expressed as a plain add (wholesale replacement,
/// positional assignment, removal, clearing). When the flag is set the
/// incremental list is ignored, since the replace already covers the final
/// state.
#[derive(Debug, Clone)]
pub struct Attribute {
	/// The attribute name, e.g. `cn` or `objectClass`.
	name: String,
	/// The current values. Ordered, free of duplicates.
	values: Vec<String>,
	/// Values added since the last save, in insertion order.
	added: Vec<String>,
	/// Whether the value set must be replaced wholesale on the server.
	replace_all: bool,
}

impl Attribute {
	/// Create an attribute from values fetched from the server. The attribute
	/// starts out clean, producing no change instructions.
	pub fn loaded<I, S>(name: impl Into<String>, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Attribute {
			name: name.into(),
			values: values.into_iter().map(Into::into).collect(),
			added: Vec::new(),
			replace_all: false,
		}
	}

	/// Create an attribute that does not exist on the server yet. Every value
	/// is deduplicated and recorded as an incremental add.
	pub fn added<I, S>(name: impl Into<String>, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut attr = Attribute {
			name: name.into(),
			values: Vec::new(),
			added: Vec::new(),
			replace_all: false,
		};
		for value in values {
			attr.append(value);
		}
		attr
	}

	/// The attribute name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The current values, in order.
	#[must_use]
	pub fn values(&self) -> &[String] {
		&self.values
	}

	/// The first value, if any. Convenient for single-valued attributes.
	#[must_use]
	pub fn first(&self) -> Option<&str> {
		self.values.first().map(String::as_str)
	}

	/// The number of values.
	#[must_use]
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Whether the attribute has no values.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Whether the given value is a member of the value set. Comparison is an
	/// exact string match.
	#[must_use]
	pub fn contains(&self, value: &str) -> bool {
		self.values.iter().any(|v| v == value)
	}

	/// Whether there are unsaved changes on either channel.
	#[must_use]
	pub fn is_dirty(&self) -> bool {
		self.replace_all || !self.added.is_empty()
	}

	/// Add a value, recording an incremental add instruction. A value that is
	/// already present is silently ignored and produces no instruction.
	pub fn append(&mut self, value: impl Into<String>) {
		let value = value.into();
		if self.contains(&value) {
			return;
		}
		self.values.push(value.clone());
		self.added.push(value);
	}

	/// Replace the entire value set. Any incremental adds recorded so far
	/// become irrelevant for the next save.
	pub fn set_values<I, S>(&mut self, values: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.values.clear();
		for value in values {
			let value = value.into();
			if !self.contains(&value) {
				self.values.push(value);
			}
		}
		self.replace_all = true;
	}

	/// Replace the value at `index`. Assigning a value that is already present
	/// at another position collapses the two slots into one, keeping the value
	/// set free of duplicates.
	///
	/// # Panics
	/// Panics if `index` is out of bounds.
	pub fn set(&mut self, index: usize, value: impl Into<String>) {
		let value = value.into();
		match self.values.iter().position(|v| *v == value) {
			Some(existing) if existing != index => {
				self.values.remove(index);
			}
			Some(_) => {}
			None => self.values[index] = value,
		}
		self.replace_all = true;
	}

	/// Remove the value at `index`.
	///
	/// # Panics
	/// Panics if `index` is out of bounds.
	pub fn remove(&mut self, index: usize) {
		self.values.remove(index);
		self.replace_all = true;
	}

	/// Remove a value by exact match. Returns whether the value was present.
	pub fn remove_value(&mut self, value: &str) -> bool {
		let Some(index) = self.values.iter().position(|v| v == value) else {
			return false;
		};
		self.values.remove(index);
		self.replace_all = true;
		true
	}

	/// Remove all values.
	pub fn clear(&mut self) {
		self.values.clear();
		self.replace_all = true;
	}

	/// Compute the modify instructions needed to bring the server-side
	/// attribute in sync with the local values.
	///
	/// If the value set was replaced wholesale, an empty set yields a single
	/// delete-attribute instruction, and a non-empty set yields one replace
	/// instruction carrying the first value followed by one add per remaining
	/// value. The protocol's replace verb atomically replaces all existing
	/// values with the single value it carries; the rest are layered on with
	/// adds in the same exchange. Which value rides the replace is arbitrary.
	///
	/// Otherwise the incrementally added values are returned verbatim, one add
	/// instruction each, in insertion order.
	#[must_use]
	pub fn changes(&self) -> Vec<Mod<String>> {
		if self.replace_all {
			if self.values.is_empty() {
				return vec![Mod::Delete(self.name.clone(), HashSet::new())];
			}
			let mut mods = Vec::with_capacity(self.values.len());
			let mut values = self.values.iter();
			if let Some(first) = values.next() {
				mods.push(Mod::Replace(self.name.clone(), HashSet::from([first.clone()])));
			}
			for value in values {
				mods.push(Mod::Add(self.name.clone(), HashSet::from([value.clone()])));
			}
			return mods;
		}
		self.added
			.iter()
			.map(|value| Mod::Add(self.name.clone(), HashSet::from([value.clone()])))
			.collect()
	}

	/// Reset both change channels without touching the values. Must only be
	/// called once the changes have been confirmed saved.
	pub fn discard_changes(&mut self) {
		self.added.clear();
		self.replace_all = false;
	}

	/// Iterate over the values.
	pub fn iter(&self) -> std::slice::Iter<'_, String> {
		self.values.iter()
	}
}

impl<'a> IntoIterator for &'a Attribute {
	type Item = &'a String;
	type IntoIter = std::slice::Iter<'a, String>;

	fn into_iter(self) -> Self::IntoIter {
		self.values.iter()
	}
}

impl fmt::Display for Attribute {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.values.as_slice() {
			[single] => f.write_str(single),
			values => write!(f, "{values:?}"),
		}
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use ldap3::Mod;

	use super::Attribute;

	#[test]
	fn loaded_attribute_starts_clean() {
		let attr = Attribute::loaded("cn", ["jack"]);
		assert!(!attr.is_dirty());
		assert!(attr.changes().is_empty());
		assert_eq!(attr.first(), Some("jack"));
	}

	#[test]
	fn added_attribute_records_adds() {
		let attr = Attribute::added("memberUid", ["alice", "bob", "alice"]);
		assert_eq!(attr.values(), ["alice", "bob"], "Input values should be deduplicated");
		let changes = attr.changes();
		assert_eq!(changes.len(), 2);
		assert!(matches!(&changes[0], Mod::Add(name, values) if name == "memberUid" && values.contains("alice")));
		assert!(matches!(&changes[1], Mod::Add(name, values) if name == "memberUid" && values.contains("bob")));
	}

	#[test]
	fn append_is_idempotent() {
		let mut attr = Attribute::loaded("memberUid", ["alice"]);
		attr.append("bob");
		attr.append("bob");
		assert_eq!(attr.values(), ["alice", "bob"]);
		assert_eq!(attr.changes().len(), 1, "Appending an existing value must not add an instruction");
	}

	#[test]
	fn append_existing_loaded_value_is_a_noop() {
		let mut attr = Attribute::loaded("memberUid", ["alice"]);
		attr.append("alice");
		assert!(!attr.is_dirty());
		assert!(attr.changes().is_empty());
	}

	#[test]
	fn set_values_yields_replace_then_adds() {
		let mut attr = Attribute::loaded("loginShell", ["/bin/bash"]);
		attr.set_values(["a", "b", "c"]);
		let changes = attr.changes();
		assert_eq!(changes.len(), 3, "Exactly one replace and two adds are needed");
		assert!(matches!(&changes[0], Mod::Replace(name, values) if name == "loginShell" && values.contains("a")));
		assert!(matches!(&changes[1], Mod::Add(_, values) if values.contains("b")));
		assert!(matches!(&changes[2], Mod::Add(_, values) if values.contains("c")));
	}

	#[test]
	fn set_values_to_empty_yields_attribute_delete() {
		let mut attr = Attribute::loaded("loginShell", ["/bin/bash"]);
		attr.set_values(Vec::<String>::new());
		let changes = attr.changes();
		assert_eq!(changes.len(), 1);
		assert!(matches!(&changes[0], Mod::Delete(name, values) if name == "loginShell" && values.is_empty()));
	}

	#[test]
	fn replace_flag_overrides_incremental_adds() {
		let mut attr = Attribute::loaded("memberUid", ["alice"]);
		attr.append("bob");
		attr.set_values(["carol"]);
		let changes = attr.changes();
		assert_eq!(changes.len(), 1, "The replace channel must win over recorded adds");
		assert!(matches!(&changes[0], Mod::Replace(_, values) if values.contains("carol")));
	}

	#[test]
	fn positional_mutations_force_a_replace() {
		let mut attr = Attribute::loaded("memberUid", ["alice", "bob"]);
		attr.set(0, "carol");
		assert!(matches!(attr.changes().first(), Some(Mod::Replace(..))));

		let mut attr = Attribute::loaded("memberUid", ["alice", "bob"]);
		attr.remove(1);
		assert!(matches!(attr.changes().first(), Some(Mod::Replace(..))));

		let mut attr = Attribute::loaded("memberUid", ["alice", "bob"]);
		assert!(attr.remove_value("alice"));
		assert!(!attr.remove_value("nobody"));
		assert!(matches!(attr.changes().first(), Some(Mod::Replace(..))));
	}

	#[test]
	fn positional_assignment_keeps_values_unique() {
		let mut attr = Attribute::loaded("memberUid", ["alice", "bob"]);
		attr.set(0, "bob");
		assert_eq!(attr.values(), ["bob"], "Assigning an existing value must not duplicate it");
		let changes = attr.changes();
		assert_eq!(changes.len(), 1);
		assert!(matches!(&changes[0], Mod::Replace(_, values) if values.contains("bob")));

		// Assigning a value to its own position keeps the values unchanged
		// but still marks the attribute for replacement.
		let mut attr = Attribute::loaded("memberUid", ["alice", "bob"]);
		attr.set(1, "bob");
		assert_eq!(attr.values(), ["alice", "bob"]);
		assert!(attr.is_dirty());
	}

	#[test]
	fn clear_yields_attribute_delete() {
		let mut attr = Attribute::loaded("description", ["a", "b"]);
		attr.clear();
		let changes = attr.changes();
		assert_eq!(changes.len(), 1);
		assert!(matches!(&changes[0], Mod::Delete(..)));
	}

	#[test]
	fn discard_changes_keeps_values() {
		let mut attr = Attribute::loaded("memberUid", ["alice"]);
		attr.append("bob");
		attr.discard_changes();
		assert!(!attr.is_dirty());
		assert!(attr.changes().is_empty());
		assert_eq!(attr.values(), ["alice", "bob"]);
	}

	#[test]
	fn display_prints_single_values_bare() {
		let attr = Attribute::loaded("cn", ["jack"]);
		assert_eq!(attr.to_string(), "jack");
		let attr = Attribute::loaded("memberUid", ["alice", "bob"]);
		assert_eq!(attr.to_string(), r#"["alice", "bob"]"#);
	}
}
