//! Non-blocking std TCP transport

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use aerolog_core::error::{ConnectivityFault, IoFault};
use aerolog_core::server::{Connection, Listener};
use log::{debug, info, warn};

pub struct HostListener {
    addr: SocketAddr,
    socket: Option<TcpListener>,
}

impl HostListener {
    /// Binding happens on the first [`Listener::restart`].
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, socket: None }
    }
}

impl Listener for HostListener {
    type Conn = HostConnection;

    fn link_up(&self) -> bool {
        self.socket.is_some()
    }

    fn try_accept(&mut self) -> Result<Option<HostConnection>, ConnectivityFault> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(ConnectivityFault::LinkDown);
        };
        match socket.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!("Dropping {}: {}", peer, err);
                    return Ok(None);
                }
                debug!("Accepted {}", peer);
                Ok(Some(HostConnection { stream }))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => {
                warn!("Accept failed: {}", err);
                self.socket = None;
                Err(ConnectivityFault::ListenFailed)
            }
        }
    }

    fn restart(&mut self) -> Result<(), ConnectivityFault> {
        let socket = TcpListener::bind(self.addr).map_err(|err| {
            warn!("Cannot bind {}: {}", self.addr, err);
            ConnectivityFault::ListenFailed
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|_| ConnectivityFault::ListenFailed)?;
        info!("Serving on http://{}", self.addr);
        self.socket = Some(socket);
        Ok(())
    }
}

pub struct HostConnection {
    stream: TcpStream,
}

fn io_fault(err: io::Error) -> IoFault {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => IoFault::Reset,
        _ => IoFault::Closed,
    }
}

impl Connection for HostConnection {
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, IoFault> {
        match self.stream.read(buf) {
            Ok(0) => Err(IoFault::Closed),
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(io_fault(err)),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> Result<usize, IoFault> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(io_fault(err)),
        }
    }

    fn close(&mut self) {
        let _ = self.stream.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
