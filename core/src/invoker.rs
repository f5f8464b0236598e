use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::recipient::{Payload, Recipient, RecipientKind};
use crate::response::{
    JobExecutionResponse, CODE_INVALID_REQUEST, CODE_TIMEOUT, CODE_TRANSPORT_ERROR, CODE_UNSUPPORTED,
};
use crate::retry::FailureKind;

/// What the far side answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

/// Delivery failed before any status was received.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Transport, message: message.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::InvalidRequest, message: message.into() }
    }

    pub fn unsupported(kind: RecipientKind) -> Self {
        Self {
            kind: FailureKind::Unsupported,
            message: format!("no transport for {kind} recipients"),
        }
    }
}

/// The only component that talks to the outside world. One implementation
/// per recipient kind, registered on a [`RecipientInvoker`].
#[async_trait]
pub trait RecipientTransport: Send + Sync + 'static {
    async fn deliver(&self, recipient: &Recipient) -> Result<Reply, TransportError>;
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure(FailureKind),
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub verdict: Verdict,
    pub response: JobExecutionResponse,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }
}

/// Transport for [`Recipient::Log`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl RecipientTransport for LogTransport {
    async fn deliver(&self, recipient: &Recipient) -> Result<Reply, TransportError> {
        let Recipient::Log(log) = recipient else {
            return Err(TransportError::unsupported(recipient.kind()));
        };
        let body = match &log.payload {
            Some(Payload::Text(s)) => s.clone(),
            Some(Payload::Json(v)) => v.to_string(),
            Some(Payload::Binary(b)) => format!("<{} bytes>", b.len()),
            None => String::new(),
        };
        info!(label = %log.label, payload = %body, "log recipient fired");
        Ok(Reply { status: 200, body: "logged".to_string() })
    }
}

/// Dispatch table from recipient kind to transport, with a bounded timeout
/// around every attempt.
#[derive(Clone)]
pub struct RecipientInvoker {
    transports: HashMap<RecipientKind, Arc<dyn RecipientTransport>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RecipientInvoker {
    /// An invoker that knows [`LogTransport`]; add others with [`with_transport`](Self::with_transport).
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut transports: HashMap<RecipientKind, Arc<dyn RecipientTransport>> = HashMap::new();
        transports.insert(RecipientKind::Log, Arc::new(LogTransport));
        Self { transports, timeout, clock }
    }

    pub fn with_transport(mut self, kind: RecipientKind, transport: Arc<dyn RecipientTransport>) -> Self {
        self.transports.insert(kind, transport);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn invoke(&self, recipient: &Recipient, job_id: &str) -> Outcome {
        let result = match self.transports.get(&recipient.kind()) {
            Some(transport) => tokio::time::timeout(self.timeout, transport.deliver(recipient))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError {
                        kind: FailureKind::Timeout,
                        message: format!("timed out after {}ms", self.timeout.as_millis()),
                    })
                }),
            None => Err(TransportError::unsupported(recipient.kind())),
        };

        let (verdict, code, message) = match result {
            Ok(reply) if (200..300).contains(&reply.status) => {
                (Verdict::Success, i32::from(reply.status), reply.body)
            }
            Ok(reply) => (
                Verdict::Failure(FailureKind::Status(reply.status)),
                i32::from(reply.status),
                reply.body,
            ),
            Err(e) => (Verdict::Failure(e.kind), failure_code(e.kind), e.message),
        };
        debug!(job_id, code, ?verdict, "dispatch attempt finished");

        Outcome {
            verdict,
            response: JobExecutionResponse::new(job_id, code, message, self.clock.now()),
        }
    }
}

fn failure_code(kind: FailureKind) -> i32 {
    match kind {
        FailureKind::Status(status) => i32::from(status),
        FailureKind::Transport => CODE_TRANSPORT_ERROR,
        FailureKind::Timeout => CODE_TIMEOUT,
        FailureKind::Unsupported => CODE_UNSUPPORTED,
        FailureKind::InvalidRequest => CODE_INVALID_REQUEST,
    }
}
