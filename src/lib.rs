//! An object mapper for LDAP directory entries.
//!
//! The library maps directory objects onto [`Entry`] values that fetch their
//! attributes lazily, track local mutations per attribute, and write
//! everything back in a single batched modify (or add, for objects that do not
//! exist yet). The change tracking computes the minimal instruction list for
//! the write-back: plain value additions are sent as incremental adds, while
//! anything that cannot be expressed that way collapses into one replace
//! followed by adds for the remaining values. Dropped server connections are
//! recovered transparently: every operation retries exactly once after a full
//! reconnect and rebind.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource. The site
//! "firstyear's blog-a-log" also has [a guide][firstyear] which is more
//! visually oriented and goes into more detail about searching
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//! [firstyear]: https://fy.blackhats.net.au/blog/html/pages/ldap_guide_part_1_foundations.html
//!
//! # Getting started
//! A minimal example of connecting and editing an entry might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ldap_mapper::{Config, ConnectionConfig, LdapConnection};
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//!     url: Url::parse("ldap://localhost")?,
//!     connection: ConnectionConfig::default(),
//!     base: "dc=example,dc=com".to_owned(),
//!     bind_dn: "cn=admin,dc=example,dc=com".to_owned(),
//!     bind_password: "verysecret".to_owned(),
//! };
//!
//! let conn = LdapConnection::connect(config).await?;
//! let mut entry = conn.get_entry("cn=jack,dc=example,dc=com");
//! println!("shell: {}", entry.get("loginShell").await?);
//! entry.set("loginShell", ["/bin/zsh"]).await?;
//! entry.save().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Attribute values are opaque UTF-8 strings; binary attributes and typed
//!   schema handling are out of scope.
//! * If the connection drops while search results are being consumed, the
//!   search restarts from the beginning, so entries may be produced twice or
//!   skipped across the restart.
//! * [`Entry::set_password`] submits the password as-is and leaves hashing to
//!   the server.
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the bind
//!   password, it probably should be

pub mod attribute;
pub mod config;
pub mod entry;
pub mod error;
pub mod ldap;

pub use ldap3::{self, Mod, Scope, SearchEntry};

pub use crate::{
	attribute::Attribute,
	config::{Config, ConnectionConfig, TLSConfig},
	entry::Entry,
	error::Error,
	ldap::{LdapConnection, SearchResults},
};
