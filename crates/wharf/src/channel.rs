use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
};

/// A non-blocking, connected byte stream a session runs on.
///
/// Reads and writes return `WouldBlock` instead of waiting.
pub trait Channel: Read + Write + Send {
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Channel for mio::net::TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::peer_addr(self)
    }
}
