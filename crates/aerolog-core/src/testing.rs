//! Test doubles for the platform traits

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{ConnectivityFault, IoFault, SensorFault};
use crate::health::SystemProbe;
use crate::power::{IdleSleep, WakeReason};
use crate::sensors::{SensorPort, SensorSample};
use crate::server::{Connection, Listener};
use crate::storage::Centi;
use crate::watchdog::HardwareWatchdog;

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::from_secs(0))),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, at: Instant) {
        self.now.set(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

pub fn sample(co2_ppm: u16) -> SensorSample {
    SensorSample::new(co2_ppm, Centi(2150), Centi(4000))
}

/// Sensor answering from a script, then with a steady default sample.
#[derive(Clone)]
pub struct ScriptedSensor {
    script: Rc<RefCell<VecDeque<Result<SensorSample, SensorFault>>>>,
    reads: Rc<Cell<u32>>,
    resets: Rc<Cell<u32>>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self {
            script: Rc::default(),
            reads: Rc::default(),
            resets: Rc::default(),
        }
    }

    pub fn push(&self, outcome: Result<SensorSample, SensorFault>) {
        self.script.borrow_mut().push_back(outcome);
    }

    pub fn reads(&self) -> u32 {
        self.reads.get()
    }

    pub fn resets(&self) -> u32 {
        self.resets.get()
    }
}

impl SensorPort for ScriptedSensor {
    async fn read(&mut self) -> Result<SensorSample, SensorFault> {
        self.reads.set(self.reads.get() + 1);
        self.script.borrow_mut().pop_front().unwrap_or(Ok(sample(600)))
    }

    async fn reset(&mut self) -> Result<(), SensorFault> {
        self.resets.set(self.resets.get() + 1);
        Ok(())
    }
}

/// Sensor whose read never completes.
pub struct StallingSensor;

impl SensorPort for StallingSensor {
    async fn read(&mut self) -> Result<SensorSample, SensorFault> {
        core::future::pending().await
    }
}

#[derive(Debug, Default)]
pub struct MockWatchdog {
    timeout: Option<Duration>,
    feeds: u32,
}

impl MockWatchdog {
    pub fn feeds(&self) -> u32 {
        self.feeds
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl HardwareWatchdog for MockWatchdog {
    fn enable(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn feed(&mut self) {
        self.feeds += 1;
    }
}

pub struct FixedProbe {
    free: usize,
    total: usize,
}

impl FixedProbe {
    pub fn new(free: usize, total: usize) -> Self {
        Self { free, total }
    }
}

impl SystemProbe for FixedProbe {
    fn free_memory(&self) -> usize {
        self.free
    }

    fn total_memory(&self) -> usize {
        self.total
    }
}

/// Idle primitive that advances a [`ManualClock`] instead of waiting.
pub struct InstantIdle {
    clock: ManualClock,
    pub waits: Vec<(Instant, bool)>,
}

impl InstantIdle {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            waits: Vec::new(),
        }
    }
}

impl IdleSleep for InstantIdle {
    async fn idle_until(&mut self, until: Instant, low_power: bool) -> WakeReason {
        self.waits.push((until, low_power));
        if until > self.clock.now() {
            self.clock.set(until);
        }
        WakeReason::Timer
    }
}

#[derive(Default)]
struct ConnState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    closed: bool,
    write_capacity: Option<usize>,
}

/// Scripted client connection. Clones are handles on the same connection.
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Rc<RefCell<ConnState>>,
}

impl MockConnection {
    pub fn send(&self, bytes: &[u8]) {
        self.state.borrow_mut().inbound.extend(bytes);
    }

    /// Client closes its end.
    pub fn hang_up(&self) {
        self.state.borrow_mut().peer_closed = true;
    }

    /// Bytes accepted per write call; 0 models a full send buffer.
    pub fn set_write_capacity(&self, capacity: usize) {
        self.state.borrow_mut().write_capacity = Some(capacity);
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.state.borrow().outbound).into_owned()
    }
}

impl Connection for MockConnection {
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, IoFault> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(IoFault::Closed);
        }
        if state.inbound.is_empty() {
            return if state.peer_closed { Err(IoFault::Closed) } else { Ok(0) };
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> Result<usize, IoFault> {
        let mut state = self.state.borrow_mut();
        if state.closed || state.peer_closed {
            return Err(IoFault::Closed);
        }
        let n = state.write_capacity.map_or(buf.len(), |cap| cap.min(buf.len()));
        state.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

struct ListenerState {
    waiting: VecDeque<MockConnection>,
    link: bool,
    restarts: u32,
}

/// Listener fed by [`MockListener::connect`]. Clones share state.
#[derive(Clone)]
pub struct MockListener {
    state: Rc<RefCell<ListenerState>>,
}

impl MockListener {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ListenerState {
                waiting: VecDeque::new(),
                link: true,
                restarts: 0,
            })),
        }
    }

    /// Queue a client that has already sent `request`.
    pub fn connect(&self, request: &str) -> MockConnection {
        let conn = MockConnection::default();
        conn.send(request.as_bytes());
        self.state.borrow_mut().waiting.push_back(conn.clone());
        conn
    }

    pub fn set_link(&self, up: bool) {
        self.state.borrow_mut().link = up;
    }

    pub fn restarts(&self) -> u32 {
        self.state.borrow().restarts
    }
}

impl Listener for MockListener {
    type Conn = MockConnection;

    fn link_up(&self) -> bool {
        self.state.borrow().link
    }

    fn try_accept(&mut self) -> Result<Option<MockConnection>, ConnectivityFault> {
        let mut state = self.state.borrow_mut();
        if !state.link {
            return Err(ConnectivityFault::LinkDown);
        }
        Ok(state.waiting.pop_front())
    }

    fn restart(&mut self) -> Result<(), ConnectivityFault> {
        self.state.borrow_mut().restarts += 1;
        Ok(())
    }
}
