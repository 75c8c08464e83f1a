#![allow(dead_code)]

use std::{error::Error, net::SocketAddr};

use ldap3::{LdapConnAsync, SearchEntry};
use ldap_mapper::{Config, ConnectionConfig, LdapConnection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

pub fn test_config() -> Config {
	Config {
		url: Url::parse("ldap://localhost:1389").unwrap(),
		connection: ConnectionConfig::default(),
		base: "dc=example,dc=org".to_owned(),
		bind_dn: "cn=admin,dc=example,dc=org".to_owned(),
		bind_password: "adminpassword".to_owned(),
	}
}

pub async fn mapper_connect() -> Result<LdapConnection, Box<dyn Error>> {
	Ok(LdapConnection::connect(test_config()).await?)
}

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:1389").await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword").await?;
	Ok(ldap)
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={},dc=example,dc=org", ou)).await?.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	cn: &str,
	sn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={},ou=users,dc=example,dc=org", cn),
		vec![("objectClass", ["inetOrgPerson"].into()), ("sn", [sn].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_user(ldap: &mut ldap3::Ldap, cn: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={},ou=users,dc=example,dc=org", cn)).await?.success()?;
	Ok(())
}

pub async fn ldap_user_add_attribute(
	ldap: &mut ldap3::Ldap,
	cn: &str,
	attribute: &str,
	value: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.modify(
		&format!("cn={},ou=users,dc=example,dc=org", cn),
		vec![ldap3::Mod::Add(attribute, [value].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_search_user(
	ldap: &mut ldap3::Ldap,
	cn: &str,
) -> Result<SearchEntry, Box<dyn Error>> {
	let (result, _res) = ldap
		.search(
			&format!("cn={},ou=users,dc=example,dc=org", cn),
			ldap3::Scope::Base,
			"(objectClass=inetOrgPerson)",
			vec!["*"],
		)
		.await?
		.success()?;
	let entry = result.first().ok_or("No entry found")?.clone();
	Ok(SearchEntry::construct(entry))
}

/// A pre-encoded BindResponse with messageID 1 and resultCode success.
const BIND_SUCCESS: [u8; 14] =
	[0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00];

/// Start a server that accepts one connection, acknowledges the initial bind
/// and then swallows every further request without ever answering. Useful for
/// testing what happens when the server stops responding without dropping the
/// connection.
pub async fn spawn_silent_ldap_stub() -> Result<SocketAddr, Box<dyn Error>> {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;
	tokio::spawn(async move {
		let (mut socket, _) = listener.accept().await.expect("stub accept failed");
		let mut buf = [0_u8; 1024];
		let _ = socket.read(&mut buf).await;
		socket.write_all(&BIND_SUCCESS).await.expect("stub bind response failed");
		loop {
			match socket.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(_) => {}
			}
		}
	});
	Ok(addr)
}

pub async fn cleanup_users(ldap: &mut ldap3::Ldap, cns: &[&str]) {
	for cn in cns {
		let _ = ldap_delete_user(ldap, cn).await;
	}
	let _ = ldap_delete_organizational_unit(ldap, "users").await;
}
