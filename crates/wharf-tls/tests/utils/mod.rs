use std::{convert::TryFrom, sync::Arc};

use anyhow::{bail, Context, Error};
use bytes::Bytes;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName};
use wharf_tls::{TlsContext, TlsEngine};

pub struct Pki {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
}

pub fn given_self_signed() -> Result<Pki, Error> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;

    Ok(Pki {
        cert_pem: cert.serialize_pem()?,
        key_pem: cert.serialize_private_key_pem(),
        cert_der: cert.serialize_der()?,
    })
}

pub fn given_server(pki: &Pki) -> Result<TlsEngine, Error> {
    let context = TlsContext::from_pem(pki.cert_pem.as_bytes(), pki.key_pem.as_bytes(), None)?;
    let engine = TlsEngine::handshake(&context)?;
    Ok(engine)
}

pub fn given_client(pki: &Pki) -> Result<ClientConnection, Error> {
    let mut roots = RootCertStore::empty();
    roots.add(&rustls::Certificate(pki.cert_der.clone()))?;

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let name = ServerName::try_from("localhost").context("invalid server name")?;

    let client = ClientConnection::new(Arc::new(config), name)?;
    Ok(client)
}

/// Take all records the client wants to send.
pub fn client_outgoing(client: &mut ClientConnection) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    while client.wants_write() {
        client.write_tls(&mut out)?;
    }
    Ok(out)
}

/// Feed server records to the client.
pub fn client_incoming(client: &mut ClientConnection, mut records: &[u8]) -> Result<(), Error> {
    while !records.is_empty() {
        client.read_tls(&mut records)?;
        client.process_new_packets()?;
    }
    Ok(())
}

/// Shuttle records until both sides finished the handshake.
pub fn when_handshake_completed(
    server: &mut TlsEngine,
    client: &mut ClientConnection,
) -> Result<(), Error> {
    for _ in 0..10 {
        if !server.is_handshaking() && !client.is_handshaking() {
            return Ok(());
        }

        let records = client_outgoing(client)?;
        let plaintext = server.unwrap(&records)?;
        if plaintext.map_or(false, |p: Bytes| !p.is_empty()) {
            bail!("plaintext during handshake");
        }

        let records = server.take_outgoing()?;
        client_incoming(client, &records)?;
    }

    bail!("handshake did not complete")
}
