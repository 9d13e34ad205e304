//! Per-request timing records.
//!
//! [`RequestInstrumentation`] wraps one unit of work (typically one HTTP
//! request), runs it to completion and emits exactly one `info` record:
//!
//! ```text
//! request  latency=50.2ms method=GET path=/ping status=200 ip=127.0.0.1
//! ```

use async_trait::async_trait;
use std::borrow::Cow;
use std::time::{Duration, Instant};

use crate::logger::Logger;
use crate::record::{Field, Severity};

/// Message of every request record.
pub const REQUEST_MESSAGE: &str = "request";

/// The work being measured, e.g. one HTTP request.
///
/// `invoke` must always return an outcome: failures and panics inside
/// the work are expected to be turned into a status code by the
/// implementation before control comes back here.
#[async_trait]
pub trait UnitOfWork: Send {
    fn method(&self) -> &str;
    fn path(&self) -> &str;
    fn client_address(&self) -> String;

    /// Run the work and report its status code.
    async fn invoke(&mut self) -> u16;
}

/// Timing and outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub latency: Duration,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub client_address: String,
}

impl RequestRecord {
    /// Fields in emission order: `latency`, `method`, `path`, `status`, `ip`.
    pub fn into_fields(self) -> [Field; 5] {
        [
            Field::duration("latency", self.latency),
            Field::str("method", self.method),
            Field::str("path", self.path),
            Field::int("status", i64::from(self.status)),
            Field::str("ip", self.client_address),
        ]
    }
}

/// Before/after hook that logs one record per unit of work.
#[derive(Clone)]
pub struct RequestInstrumentation {
    logger: Logger,
    message: Cow<'static, str>,
}

impl RequestInstrumentation {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            message: Cow::Borrowed(REQUEST_MESSAGE),
        }
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }

    /// Run `work` and log its outcome once it has completed.
    ///
    /// **Returns**
    /// - the status code reported by the work, unchanged.
    pub async fn instrument<W>(&self, work: &mut W) -> u16
    where
        W: UnitOfWork + ?Sized,
    {
        let start = Instant::now();
        let status = work.invoke().await;
        let latency = start.elapsed();

        self.emit(RequestRecord {
            latency,
            method: work.method().to_string(),
            path: work.path().to_string(),
            status,
            client_address: work.client_address(),
        });
        status
    }

    /// Synchronous variant for hosts without an async runtime.
    pub fn instrument_blocking<F>(&self, method: &str, path: &str, client_address: &str, work: F) -> u16
    where
        F: FnOnce() -> u16,
    {
        let start = Instant::now();
        let status = work();
        self.emit(RequestRecord {
            latency: start.elapsed(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            client_address: client_address.to_string(),
        });
        status
    }

    pub fn emit(&self, record: RequestRecord) {
        self.logger
            .log(Severity::Info, self.message.as_ref(), record.into_fields());
    }
}
