use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use log::{debug, warn};

use super::http::{self, Status};
use super::routes;
use super::transport::Connection;
use super::ServeContext;
use crate::error::{IoFault, ProtocolFault};
use crate::health::SystemProbe;
use crate::storage::{ExportProgress, ExportStream, Storage};

/// Request head limit; anything longer is answered with 431.
pub const REQUEST_BUFFER: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Reading,
    Writing,
    Closed,
}

/// What one service slice achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Progress {
    pub bytes_written: usize,
    pub protocol_error: bool,
}

/// Per-connection state, owned by the request server.
pub(crate) struct Session<C: Connection> {
    id: u32,
    conn: C,
    request: [u8; REQUEST_BUFFER],
    filled: usize,
    response: Vec<u8>,
    cursor: usize,
    export: Option<ExportStream>,
    stage: Stage,
    last_activity: Instant,
}

impl<C: Connection> Session<C> {
    pub fn new(id: u32, conn: C, now: Instant) -> Self {
        Self {
            id,
            conn,
            request: [0; REQUEST_BUFFER],
            filled: 0,
            response: Vec::new(),
            cursor: 0,
            export: None,
            stage: Stage::Reading,
            last_activity: now,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_idle_since(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    /// Advance the session by at most `slice` bytes of output. Never blocks:
    /// returns as soon as the connection has nothing more to offer.
    pub fn service<S: Storage, P: SystemProbe>(&mut self, ctx: &ServeContext<'_, S, P>, slice: usize) -> Progress {
        let mut progress = Progress::default();
        if self.stage == Stage::Reading {
            match self.read_request(ctx) {
                Ok(true) => {}
                Ok(false) => return progress,
                Err(fault) => {
                    debug!("session {}: {}", self.id, fault);
                    progress.protocol_error = true;
                    let status = Status::from(fault);
                    self.respond(http::error_response(status, &alloc::format!("{fault}")));
                }
            }
            self.last_activity = ctx.now;
        }
        if self.stage == Stage::Writing {
            progress.bytes_written = self.write_response(ctx, slice);
        }
        progress
    }

    /// `Ok(true)` once a response is queued, `Ok(false)` while waiting for
    /// more of the request.
    fn read_request<S: Storage, P: SystemProbe>(&mut self, ctx: &ServeContext<'_, S, P>) -> Result<bool, ProtocolFault> {
        loop {
            if let Some(end) = http::find_header_end(&self.request[..self.filled]) {
                let route = http::parse_request(&self.request[..end])?;
                debug!("session {}: {:?}", self.id, route);
                match routes::handle(route, ctx) {
                    routes::Reply::Complete(bytes) => self.respond(bytes),
                    routes::Reply::Stream { head, export } => {
                        self.respond(head);
                        self.export = Some(export);
                    }
                }
                return Ok(true);
            }
            if self.filled == REQUEST_BUFFER {
                return Err(ProtocolFault::HeadersTooLarge);
            }

            match self.conn.try_read(&mut self.request[self.filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.filled += n;
                    self.last_activity = ctx.now;
                }
                Err(fault) => {
                    debug!("session {}: {} before request completed", self.id, fault);
                    self.close();
                    return Ok(false);
                }
            }
        }
    }

    fn respond(&mut self, bytes: Vec<u8>) {
        self.response = bytes;
        self.cursor = 0;
        self.stage = Stage::Writing;
    }

    fn write_response<S: Storage, P: SystemProbe>(&mut self, ctx: &ServeContext<'_, S, P>, slice: usize) -> usize {
        let mut written = 0;
        while written < slice {
            if self.cursor == self.response.len() && !self.refill(ctx, slice) {
                self.close();
                break;
            }

            let end = self.response.len().min(self.cursor + (slice - written));
            match self.conn.try_write(&self.response[self.cursor..end]) {
                Ok(0) => break,
                Ok(n) => {
                    self.cursor += n;
                    written += n;
                    self.last_activity = ctx.now;
                }
                Err(IoFault::Closed | IoFault::Reset) => {
                    debug!("session {}: client went away mid-response", self.id);
                    self.close();
                    break;
                }
            }
        }
        written
    }

    /// Pull the next chunk of an export into the response buffer. Returns
    /// false when there is nothing more to send.
    fn refill<S: Storage, P: SystemProbe>(&mut self, ctx: &ServeContext<'_, S, P>, slice: usize) -> bool {
        let Some(export) = self.export.as_mut() else {
            return false;
        };
        self.response.clear();
        self.cursor = 0;
        match export.fill(ctx.history, &mut self.response, slice) {
            Ok(ExportProgress::More) => {}
            Ok(ExportProgress::Done) => {
                debug!("session {}: export of {} records complete", self.id, export.records());
                self.export = None;
            }
            Err(fault) => {
                warn!("session {}: export aborted: {}", self.id, fault);
                self.export = None;
                self.response.clear();
            }
        }
        !self.response.is_empty()
    }

    pub fn close(&mut self) {
        if self.stage != Stage::Closed {
            self.conn.close();
            self.stage = Stage::Closed;
            self.export = None;
        }
    }
}
