//! Shared helpers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::invoker::{RecipientTransport, Reply, TransportError};
use crate::recipient::Recipient;

pub fn at(s: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(s).unwrap()
}

pub fn utc(s: &str) -> DateTime<Utc> {
    at(s).with_timezone(&Utc)
}

/// Answers from a script of status codes, then a fallback. Status `0`
/// stands for a transport error. Tracks how many deliveries overlap.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<u16>>,
    fallback: u16,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn always(status: u16) -> Self {
        Self::scripted([], status)
    }

    pub fn scripted(script: impl IntoIterator<Item = u16>, fallback: u16) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecipientTransport for ScriptedTransport {
    async fn deliver(&self, _recipient: &Recipient) -> Result<Reply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let status = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if status == 0 {
            return Err(TransportError::transport("connection refused"));
        }
        Ok(Reply { status, body: format!("status {status}") })
    }
}
