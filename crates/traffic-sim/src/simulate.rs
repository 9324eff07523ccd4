//! The simulated traffic loop.
//!
//! Every iteration mimics one request: it bumps the active-user and request
//! counters, runs a traced unit of work that sometimes fails, and records a
//! simulated ping.

use std::ops::Range;
use std::time::Duration;

use pipeline::logs::Logger;
use pipeline::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
use pipeline::trace::Tracer;
use pipeline::{Attributes, KeyValue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Span name of the simulated unit of work.
pub const WORK_SPAN: &str = "process_user_data";

/// Pings above this many milliseconds are logged as warnings.
pub const PING_WARN_MS: f64 = 200.0;

const WORK_MS: Range<f64> = 100.0..500.0;
const PING_MS: Range<f64> = 10.0..300.0;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulated processing failure for user {0}")]
    Processing(u32),
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub user_id: u32,
    pub failed: bool,
    pub ping_ms: f64,
}

struct Instruments {
    active_users: UpDownCounter,
    requests: Counter,
    processing_duration: Histogram,
    ping: Gauge,
}

impl Instruments {
    fn new(meter: &Meter) -> Self {
        Self {
            active_users: meter
                .i64_up_down_counter("app.users.active")
                .with_description("Users currently being served")
                .with_unit("{user}")
                .init(),
            requests: meter
                .u64_counter("app.requests")
                .with_description("Simulated requests")
                .with_unit("{request}")
                .init(),
            processing_duration: meter
                .f64_histogram("app.processing.duration")
                .with_description("Time spent processing user data")
                .with_unit("ms")
                .init(),
            ping: meter
                .f64_gauge("app.ping")
                .with_description("Simulated network latency")
                .with_unit("ms")
                .init(),
        }
    }
}

pub struct Simulator {
    tracer: Tracer,
    logger: Logger,
    instruments: Instruments,
    error_rate: f64,
    work_ms: Range<f64>,
    rng: StdRng,
}

impl Simulator {
    pub fn new(tracer: Tracer, meter: &Meter, logger: Logger, error_rate: f64) -> Self {
        Self {
            tracer,
            logger,
            instruments: Instruments::new(meter),
            error_rate: error_rate.clamp(0.0, 1.0),
            work_ms: WORK_MS,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed and a custom work duration range.
    pub fn with_rng(mut self, seed: u64, work_ms: Range<f64>) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.work_ms = work_ms;
        self
    }

    /// Iterate every `interval` until `cancel` fires.
    pub async fn run(&mut self, interval: Duration, cancel: CancellationToken) {
        self.logger
            .info("Starting traffic simulation (Ctrl-C to stop)", Attributes::new());
        loop {
            let tick = self.tick().await;
            debug!(user_id = tick.user_id, failed = tick.failed, ping_ms = tick.ping_ms, "iteration done");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        self.logger.info("Stopping simulation", Attributes::new());
    }

    /// One simulated request.
    pub async fn tick(&mut self) -> Tick {
        let i = &self.instruments;
        i.active_users.add(1, &[]);
        i.requests.add(1, &[KeyValue::new("endpoint", "/api/process")]);

        let user_id: u32 = self.rng.gen_range(1000..=9999);
        let work_ms = if self.work_ms.is_empty() {
            self.work_ms.start
        } else {
            self.rng.gen_range(self.work_ms.clone())
        };
        let fail = self.rng.gen_bool(self.error_rate);

        let histogram = i.processing_duration.clone();
        let result = self
            .tracer
            .in_span_async(WORK_SPAN, move |_ctx| async move {
                tokio::time::sleep(Duration::from_secs_f64(work_ms / 1_000.0)).await;
                histogram.record(work_ms, &[KeyValue::new("user_type", "standard")]);
                if fail {
                    Err(SimError::Processing(user_id))
                } else {
                    Ok(())
                }
            })
            .await;

        let attrs = Attributes::from([KeyValue::new("user.id", i64::from(user_id))]);
        match &result {
            Ok(()) => self
                .logger
                .info(format!("Request completed for user {user_id}"), attrs),
            Err(e) => self
                .logger
                .error(format!("Error processing request: {e}"), attrs),
        }
        self.instruments.active_users.add(-1, &[]);

        let ping_ms = self.rng.gen_range(PING_MS);
        self.instruments.ping.record(ping_ms, &[]);
        if ping_ms > PING_WARN_MS {
            self.logger.warn(
                format!("High ping detected: {ping_ms:.2}ms"),
                Attributes::from([KeyValue::new("ping_ms", ping_ms)]),
            );
        }

        Tick {
            user_id,
            failed: result.is_err(),
            ping_ms,
        }
    }
}
