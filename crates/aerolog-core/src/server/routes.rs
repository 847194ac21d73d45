//! Response bodies for each route

use alloc::vec::Vec;

use log::error;
use serde::Serialize;

use super::ServeContext;
use super::http::{self, Route, Status};
use crate::health::SystemProbe;
use crate::storage::{ExportStream, QuantityStats, ReadingJson, Storage};

pub(crate) enum Reply {
    Complete(Vec<u8>),
    /// Header block followed by an export streamed until close.
    Stream { head: Vec<u8>, export: ExportStream },
}

#[derive(Serialize)]
struct NoData {
    status: &'static str,
}

#[derive(Serialize)]
struct StatsJson {
    samples: usize,
    invalid: usize,
    first_timestamp: Option<u32>,
    last_timestamp: Option<u32>,
    co2_ppm: Option<QuantityStats>,
    temperature_c: Option<QuantityStats>,
    humidity_pct: Option<QuantityStats>,
}

pub(crate) fn handle<S: Storage, P: SystemProbe>(route: Route, ctx: &ServeContext<'_, S, P>) -> Reply {
    let body = match route {
        Route::Live => match ctx.history.latest() {
            Some(reading) => serde_json::to_vec(&ReadingJson::assessed(reading)),
            None => serde_json::to_vec(&NoData { status: "no data" }),
        },
        Route::History => {
            let rows: Vec<ReadingJson> = ctx.history.buffer().iter().map(ReadingJson::from).collect();
            serde_json::to_vec(&rows)
        }
        Route::Stats => {
            let stats = ctx.history.window_stats();
            serde_json::to_vec(&StatsJson {
                samples: stats.samples,
                invalid: stats.invalid,
                first_timestamp: stats.first_timestamp,
                last_timestamp: stats.last_timestamp,
                co2_ppm: stats.co2_ppm.map(|s| s.scaled(1.0)),
                temperature_c: stats.temperature.map(|s| s.scaled(100.0)),
                humidity_pct: stats.humidity.map(|s| s.scaled(100.0)),
            })
        }
        Route::Health => serde_json::to_vec(&ctx.health.snapshot(ctx.now, ctx.probe, ctx.history)),
        Route::Test => return Reply::Complete(http::response(Status::Ok, "text/plain", b"ok")),
        Route::Export(format) => {
            let mut head = Vec::new();
            http::write_head(&mut head, Status::Ok, format.content_type(), None, Some(format.file_name()));
            return Reply::Stream {
                head,
                export: ctx.history.export(format),
            };
        }
    };

    match body {
        Ok(body) => Reply::Complete(http::json_response(&body)),
        Err(_) => {
            error!("Failed to render {:?}", route);
            Reply::Complete(http::error_response(Status::InternalError, "render failed"))
        }
    }
}
