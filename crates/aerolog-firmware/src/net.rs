//! Wi-Fi station and the HTTP socket pool
//!
//! The request server polls its transport without awaiting, so the pool keeps
//! a fixed set of embassy-net sockets in LISTEN and hands out the ones that
//! have reached ESTABLISHED. Socket futures are polled exactly once; a pending
//! result means "nothing yet" and the supervisor comes back next cycle.

use core::cell::RefCell;
use core::task::Poll;

use aerolog_core::error::{ConnectivityFault, IoFault};
use aerolog_core::server::{Connection, Listener};
use embassy_futures::poll_once;
use embassy_net::tcp::{State, TcpSocket};
use embassy_net::{Runner, Stack};
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent};
use log::{debug, info, warn};
use static_cell::{ConstStaticCell, StaticCell};

/// Sockets in the pool; the server's `max_connections` should not exceed it.
pub const POOL_SIZE: usize = 4;

const RX_BUFFER: usize = 1024;
const TX_BUFFER: usize = 2048;

const SSID: Option<&str> = option_env!("AEROLOG_WIFI_SSID");
const PASSWORD: Option<&str> = option_env!("AEROLOG_WIFI_PASSWORD");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Not listening; armed on the next restart or accept pass.
    Idle,
    Listening,
    /// Owned by a session.
    InUse,
    /// Closed by its session, waiting for the FIN exchange to finish.
    Draining,
}

struct SocketBuffers {
    rx: [u8; RX_BUFFER],
    tx: [u8; TX_BUFFER],
}

impl SocketBuffers {
    const EMPTY: Self = Self {
        rx: [0; RX_BUFFER],
        tx: [0; TX_BUFFER],
    };
}

pub struct SocketPool {
    sockets: [TcpSocket<'static>; POOL_SIZE],
    slots: [Slot; POOL_SIZE],
    port: u16,
}

impl SocketPool {
    /// Allocate the pool once, with static socket buffers.
    pub fn init(stack: Stack<'static>, port: u16) -> &'static RefCell<SocketPool> {
        static BUFFERS: ConstStaticCell<[SocketBuffers; POOL_SIZE]> =
            ConstStaticCell::new([const { SocketBuffers::EMPTY }; POOL_SIZE]);
        static POOL: StaticCell<RefCell<SocketPool>> = StaticCell::new();

        let sockets = BUFFERS.take().each_mut().map(|buffers| {
            let mut socket = TcpSocket::new(stack, &mut buffers.rx, &mut buffers.tx);
            socket.set_timeout(Some(Duration::from_secs(30)));
            socket
        });

        POOL.init(RefCell::new(SocketPool {
            sockets,
            slots: [Slot::Idle; POOL_SIZE],
            port,
        }))
    }

    /// Put a socket into LISTEN.
    fn arm(&mut self, index: usize) -> Result<(), ConnectivityFault> {
        let port = self.port;
        match poll_once(self.sockets[index].accept(port)) {
            // Ready(Ok) when a SYN was already queued.
            Poll::Pending | Poll::Ready(Ok(())) => {
                self.slots[index] = Slot::Listening;
                Ok(())
            }
            Poll::Ready(Err(e)) => {
                warn!("Socket {} cannot listen: {:?}", index, e);
                self.sockets[index].abort();
                self.slots[index] = Slot::Idle;
                Err(ConnectivityFault::ListenFailed)
            }
        }
    }

    /// A listening socket has completed a handshake.
    pub fn connection_waiting(&self) -> bool {
        self.slots.iter().zip(&self.sockets).any(|(slot, socket)| {
            *slot == Slot::Listening && matches!(socket.state(), State::Established | State::CloseWait)
        })
    }

    /// Return drained sockets to LISTEN.
    fn recycle(&mut self) {
        for index in 0..POOL_SIZE {
            if self.slots[index] != Slot::Draining {
                continue;
            }
            match self.sockets[index].state() {
                State::Closed | State::TimeWait => {
                    self.sockets[index].abort();
                    self.slots[index] = Slot::Idle;
                }
                _ => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

pub struct PoolListener {
    stack: Stack<'static>,
    pool: &'static RefCell<SocketPool>,
}

impl PoolListener {
    pub fn new(stack: Stack<'static>, pool: &'static RefCell<SocketPool>) -> Self {
        Self { stack, pool }
    }
}

impl Listener for PoolListener {
    type Conn = PoolConnection;

    fn link_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    fn try_accept(&mut self) -> Result<Option<PoolConnection>, ConnectivityFault> {
        if !self.link_up() {
            return Err(ConnectivityFault::LinkDown);
        }
        let mut pool = self.pool.borrow_mut();
        pool.recycle();

        for index in 0..POOL_SIZE {
            match pool.slots[index] {
                Slot::Idle => pool.arm(index)?,
                Slot::Listening => match pool.sockets[index].state() {
                    State::Listen | State::SynReceived => {}
                    State::Established | State::CloseWait => {
                        pool.slots[index] = Slot::InUse;
                        debug!("Socket {} accepted {:?}", index, pool.sockets[index].remote_endpoint());
                        return Ok(Some(PoolConnection {
                            pool: self.pool,
                            index,
                        }));
                    }
                    // Reset before the handshake finished.
                    _ => {
                        pool.sockets[index].abort();
                        pool.slots[index] = Slot::Idle;
                    }
                },
                Slot::InUse | Slot::Draining => {}
            }
        }
        Ok(None)
    }

    fn restart(&mut self) -> Result<(), ConnectivityFault> {
        if !self.link_up() {
            return Err(ConnectivityFault::LinkDown);
        }
        let mut pool = self.pool.borrow_mut();
        for index in 0..POOL_SIZE {
            if pool.slots[index] != Slot::InUse {
                pool.sockets[index].abort();
                pool.arm(index)?;
            }
        }
        info!("Listening on port {} with {} sockets", pool.port, POOL_SIZE);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct PoolConnection {
    pool: &'static RefCell<SocketPool>,
    index: usize,
}

impl Connection for PoolConnection {
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, IoFault> {
        let mut pool = self.pool.borrow_mut();
        match poll_once(pool.sockets[self.index].read(buf)) {
            Poll::Pending => Ok(0),
            Poll::Ready(Ok(0)) => Err(IoFault::Closed),
            Poll::Ready(Ok(n)) => Ok(n),
            Poll::Ready(Err(_)) => Err(IoFault::Reset),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> Result<usize, IoFault> {
        let mut pool = self.pool.borrow_mut();
        match poll_once(pool.sockets[self.index].write(buf)) {
            Poll::Pending => Ok(0),
            Poll::Ready(Ok(n)) => Ok(n),
            Poll::Ready(Err(_)) => Err(IoFault::Reset),
        }
    }

    fn close(&mut self) {
        let mut pool = self.pool.borrow_mut();
        pool.sockets[self.index].close();
        pool.slots[self.index] = Slot::Draining;
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        let mut pool = self.pool.borrow_mut();
        if pool.slots[self.index] == Slot::InUse {
            pool.sockets[self.index].abort();
            pool.slots[self.index] = Slot::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Keep the station associated, reconnecting with a fixed delay.
#[embassy_executor::task]
pub async fn wifi_task(mut controller: WifiController<'static>) {
    let (Some(ssid), Some(password)) = (SSID, PASSWORD) else {
        warn!("No Wi-Fi credentials compiled in, staying offline");
        return;
    };

    loop {
        if !matches!(controller.is_started(), Ok(true)) {
            let config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(ssid.into())
                    .with_password(password.into()),
            );
            if let Err(e) = controller.set_config(&config) {
                warn!("Wi-Fi config rejected: {:?}", e);
                Timer::after(Duration::from_secs(10)).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                warn!("Wi-Fi start failed: {:?}", e);
                Timer::after(Duration::from_secs(10)).await;
                continue;
            }
        }

        info!("Connecting to \"{}\"", ssid);
        match controller.connect_async().await {
            Ok(()) => {
                info!("Wi-Fi associated");
                controller.wait_for_event(WifiEvent::StaDisconnected).await;
                warn!("Wi-Fi disconnected");
                Timer::after(Duration::from_secs(5)).await;
            }
            Err(e) => {
                warn!("Wi-Fi connect failed: {:?}", e);
                Timer::after(Duration::from_secs(10)).await;
            }
        }
    }
}
