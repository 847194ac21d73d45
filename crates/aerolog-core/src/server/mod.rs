//! Cooperative HTTP request server
//!
//! [`RequestServer::poll`] is called once per supervisor cycle. It accepts
//! waiting clients, then gives a bounded slice of I/O to a bounded number of
//! sessions in round-robin order and returns. A session that cannot make
//! progress (no request bytes yet, send buffer full) simply waits for the next
//! cycle, so one slow client never delays acquisition or other clients.
//!
//! The server only ever sees shared references to the history store and the
//! health monitor; serving a request cannot change device state.

pub mod http;
mod routes;
mod session;
pub mod transport;

pub use http::{Route, Status};
pub use session::REQUEST_BUFFER;
pub use transport::{Connection, Listener};

use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::config::ServerConfig;
use crate::error::ConnectivityFault;
use crate::health::{ConnectionState, HealthMonitor, SystemProbe};
use crate::storage::{HistoryStore, Storage};
use session::{Session, Stage};

/// Read-only view of device state handed to the server for one poll.
pub struct ServeContext<'a, S: Storage, P: SystemProbe> {
    pub history: &'a HistoryStore<S>,
    pub health: &'a HealthMonitor,
    pub probe: &'a P,
    pub now: Instant,
}

/// What one [`RequestServer::poll`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    pub accepted: u32,
    /// Connections turned away with 503 because every session slot was taken.
    pub rejected: u32,
    pub closed: u32,
    pub serviced: u32,
    pub bytes_written: usize,
    pub protocol_errors: u32,
    pub link_down: bool,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: u32,
    pub rejected: u32,
    pub protocol_errors: u32,
    pub timeouts: u32,
    pub link_losses: u32,
}

pub struct RequestServer<L: Listener> {
    listener: L,
    slots: Vec<Option<Session<L::Conn>>>,
    /// Slot the next round-robin pass starts from.
    next_slot: usize,
    next_id: u32,
    listening: bool,
    backoff: ExponentialBackoff,
    slice_bytes: usize,
    session_budget: usize,
    session_timeout: Duration,
    stats: ServerStats,
}

impl<L: Listener> RequestServer<L> {
    /// The listener is (re)started on the first poll.
    pub fn new(listener: L, config: &ServerConfig) -> Self {
        let mut slots = Vec::with_capacity(config.max_connections);
        slots.resize_with(config.max_connections, || None);
        Self {
            listener,
            slots,
            next_slot: 0,
            next_id: 0,
            listening: false,
            backoff: ExponentialBackoff::new(
                Duration::from_millis(config.backoff_base_ms as u64),
                Duration::from_millis(config.backoff_max_ms as u64),
            ),
            slice_bytes: config.slice_bytes,
            session_budget: config.session_budget,
            session_timeout: config.session_timeout(),
            stats: ServerStats::default(),
        }
    }

    pub fn poll<S: Storage, P: SystemProbe>(&mut self, ctx: &ServeContext<'_, S, P>) -> ServeReport {
        let mut report = ServeReport::default();
        if !self.maintain_link(ctx.now) {
            report.link_down = true;
            return report;
        }

        self.accept(ctx.now, &mut report);
        self.service(ctx, &mut report);
        report
    }

    /// Keep the listener up, restarting it with backoff after a link loss.
    /// Returns whether the server is listening.
    fn maintain_link(&mut self, now: Instant) -> bool {
        if self.listening {
            if self.listener.link_up() {
                return true;
            }
            self.lose_link(ConnectivityFault::LinkDown);
        }
        if !self.backoff.ready(now) {
            return false;
        }

        match self.listener.restart() {
            Ok(()) if self.listener.link_up() => {
                info!("Listening again after {} attempts", self.backoff.attempts());
                self.listening = true;
                self.backoff.reset();
                true
            }
            Ok(()) => {
                let delay = self.backoff.failed(now);
                debug!("Link still down, retrying in {} ms", delay.as_millis());
                false
            }
            Err(fault) => {
                let delay = self.backoff.failed(now);
                warn!("Listener restart failed: {}, retrying in {} ms", fault, delay.as_millis());
                false
            }
        }
    }

    fn lose_link(&mut self, fault: ConnectivityFault) {
        let dropped = self.close_all();
        warn!("{}, dropped {} sessions", fault, dropped);
        self.listening = false;
        self.stats.link_losses += 1;
    }

    fn accept(&mut self, now: Instant, report: &mut ServeReport) {
        // Bounded so a flood of connects cannot monopolize the cycle.
        for _ in 0..=self.slots.len() {
            let conn = match self.listener.try_accept() {
                Ok(Some(conn)) => conn,
                Ok(None) => return,
                Err(fault) => {
                    self.lose_link(fault);
                    self.backoff.failed(now);
                    return;
                }
            };

            let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
                reject(conn);
                report.rejected += 1;
                self.stats.rejected += 1;
                continue;
            };
            self.next_id = self.next_id.wrapping_add(1);
            debug!("session {} opened", self.next_id);
            *slot = Some(Session::new(self.next_id, conn, now));
            report.accepted += 1;
            self.stats.accepted += 1;
        }
    }

    fn service<S: Storage, P: SystemProbe>(&mut self, ctx: &ServeContext<'_, S, P>, report: &mut ServeReport) {
        let slots = self.slots.len();
        let start = self.next_slot;
        let mut visited = 0;
        for step in 0..slots {
            if visited == self.session_budget {
                break;
            }
            let index = (start + step) % slots;
            let Some(session) = self.slots[index].as_mut() else {
                continue;
            };

            if session.is_idle_since(ctx.now, self.session_timeout) {
                debug!("session timed out");
                session.close();
                self.stats.timeouts += 1;
            } else {
                let progress = session.service(ctx, self.slice_bytes);
                report.bytes_written += progress.bytes_written;
                if progress.protocol_error {
                    report.protocol_errors += 1;
                    self.stats.protocol_errors += 1;
                }
                report.serviced += 1;
            }
            visited += 1;
            self.next_slot = (index + 1) % slots;

            if session.stage() == Stage::Closed {
                self.slots[index] = None;
                report.closed += 1;
            }
        }
    }

    fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for slot in &mut self.slots {
            if let Some(mut session) = slot.take() {
                session.close();
                closed += 1;
            }
        }
        closed
    }

    /// Close every session to give back their buffers.
    pub fn shed_sessions(&mut self) -> usize {
        let closed = self.close_all();
        if closed > 0 {
            warn!("Closed {} sessions to free memory", closed);
        }
        closed
    }

    /// Open sessions keep the device awake.
    pub fn has_pending_work(&self) -> bool {
        self.active_sessions() > 0
    }

    pub fn active_sessions(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.listening {
            ConnectionState::Up
        } else if self.backoff.attempts() > 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Down
        }
    }

    /// Earliest time a link restart will be attempted.
    pub fn next_restart(&self) -> Option<Instant> {
        if self.listening {
            None
        } else {
            self.backoff.next_attempt()
        }
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }
}

/// Best-effort 503 on a connection we have no slot for.
fn reject<C: Connection>(mut conn: C) {
    let _ = conn.try_write(http::BUSY_RESPONSE);
    conn.close();
    warn!("Session limit reached, rejected connection");
}
