use std::io::{ErrorKind, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use rustls::{Certificate, ServerConnection};
use tracing::{event, Level};

use crate::{TlsContext, TlsError};

/// Server side TLS state of one connection.
///
/// Sans-IO: ciphertext goes in through `unwrap` and comes out of `wrap` and `take_outgoing`,
/// the caller moves it to and from the socket.
pub struct TlsEngine {
    conn: ServerConnection,
    peer_closed: bool,
}

impl TlsEngine {
    /// Start the server half of a handshake.
    pub fn handshake(context: &TlsContext) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(context.config())?;

        Ok(Self {
            conn,
            peer_closed: false,
        })
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Feed received ciphertext in and return the plaintext it carried.
    ///
    /// The returned plaintext may be empty, for example while handshaking. Returns `None` once
    /// the peer sent close_notify. Handshake and alert records this produces must be sent with
    /// `take_outgoing`.
    pub fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Option<Bytes>, TlsError> {
        let mut plaintext = BytesMut::new();
        let mut remaining = ciphertext;

        // Plaintext is drained after every record batch so rustls' buffer never fills up
        while !remaining.is_empty() {
            let read = self.conn.read_tls(&mut remaining)?;
            if read == 0 {
                break;
            }

            let state = self.conn.process_new_packets()?;
            if state.peer_has_closed() {
                self.peer_closed = true;
            }

            self.drain_plaintext(&mut plaintext)?;
        }

        if self.peer_closed && plaintext.is_empty() {
            event!(Level::DEBUG, "peer sent close_notify");
            return Ok(None);
        }

        Ok(Some(plaintext.freeze()))
    }

    fn drain_plaintext(&mut self, out: &mut BytesMut) -> Result<(), TlsError> {
        let mut chunk = [0; 4096];

        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(read) => out.put(&chunk[..read]),
                Err(error) if error.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Encrypt `plaintext`, returning the records to send along with anything else pending.
    pub fn wrap(&mut self, plaintext: &[u8]) -> Result<Bytes, TlsError> {
        self.conn.writer().write_all(plaintext)?;
        self.take_outgoing()
    }

    /// Take all records waiting to be sent.
    pub fn take_outgoing(&mut self) -> Result<Bytes, TlsError> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out)?;
        }

        Ok(Bytes::from(out))
    }

    /// Queue close_notify and return the final records.
    ///
    /// Failures here don't matter anymore, they're logged and an empty buffer is returned.
    pub fn close(&mut self) -> Bytes {
        self.conn.send_close_notify();

        match self.take_outgoing() {
            Ok(records) => records,
            Err(error) => {
                event!(Level::DEBUG, ?error, "failed to flush close_notify");
                Bytes::new()
            }
        }
    }

    /// Whether the peer sent close_notify.
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Certificates the client presented, with mutual TLS.
    pub fn peer_certificates(&self) -> Option<&[Certificate]> {
        self.conn.peer_certificates()
    }

    /// SNI host name the client asked for.
    pub fn server_name(&self) -> Option<&str> {
        self.conn.server_name()
    }
}
