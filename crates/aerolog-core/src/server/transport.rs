use crate::error::{ConnectivityFault, IoFault};

/// One accepted client connection. All calls return immediately.
pub trait Connection {
    /// `Ok(0)` means nothing has arrived yet; end of stream is
    /// `Err(IoFault::Closed)`.
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, IoFault>;

    /// `Ok(0)` means the send buffer is full for now.
    fn try_write(&mut self, buf: &[u8]) -> Result<usize, IoFault>;

    fn close(&mut self);
}

/// Source of incoming connections on the device's network interface.
pub trait Listener {
    type Conn: Connection;

    fn link_up(&self) -> bool;

    /// `Ok(None)` when no client is waiting.
    fn try_accept(&mut self) -> Result<Option<Self::Conn>, ConnectivityFault>;

    /// Re-establish the link and start listening again.
    fn restart(&mut self) -> Result<(), ConnectivityFault>;
}
