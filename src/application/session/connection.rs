//! Live WebSocket session with one charge point.
//!
//! The session owns the outbound FIFO consumed by its single writer task
//! (spawned by the WebSocket server) and the pending-call table used to
//! correlate CallResults/CallErrors with in-flight Calls. Callers never
//! touch the socket: they submit frames here and the writer linearizes
//! them onto the wire.
//!
//! Backpressure: operator-initiated Calls take a depth-limited permit and
//! fail fast with `Busy` when the queue is full. Replies to inbound Calls
//! bypass the bound: answering the charger must never be dropped, or the
//! protocol deadlocks.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{CoreError, CoreResult, OcppErrorCode, OcppVersion};
use crate::support::ocpp_frame::OcppFrame;
use crate::support::shutdown::{ShutdownNotified, ShutdownSignal};

use super::pending::{CallOutcome, PendingCallTable};

/// Queue-depth permit held by an enqueued operator Call; returned to the
/// pool when the writer dequeues (or drops) the frame.
pub struct CallPermit(Arc<AtomicUsize>);

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A frame queued for the writer task.
pub enum OutboundFrame {
    /// CallResult/CallError answering an inbound Call. Never bounded.
    Reply(String),
    /// Operator-initiated Call, counted against the queue bound.
    Call {
        text: String,
        _permit: CallPermit,
    },
}

impl OutboundFrame {
    pub fn text(&self) -> &str {
        match self {
            Self::Reply(text) => text,
            Self::Call { text, .. } => text,
        }
    }
}

/// Per-session knobs, derived from the application configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound for queued operator Calls.
    pub call_queue_capacity: usize,
    /// Default Call round-trip deadline.
    pub call_timeout: Duration,
    /// Heartbeat interval advertised at boot, seconds.
    pub heartbeat_interval_s: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_queue_capacity: 64,
            call_timeout: Duration::from_secs(30),
            heartbeat_interval_s: 300,
        }
    }
}

/// One live charge-point session.
pub struct Session {
    charge_point_id: String,
    ocpp_version: OcppVersion,
    remote_addr: String,
    connected_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    queued_calls: Arc<AtomicUsize>,
    call_queue_capacity: usize,
    default_call_timeout: Duration,
    message_counter: AtomicU64,
    pending: PendingCallTable,
    closed: AtomicBool,
    close_signal: ShutdownSignal,
    last_activity_unix: AtomicI64,
    heartbeat_interval_s: AtomicU64,
}

impl Session {
    /// Create a session and hand back the receiver its writer task consumes.
    pub fn new(
        charge_point_id: impl Into<String>,
        ocpp_version: OcppVersion,
        remote_addr: impl Into<String>,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            charge_point_id: charge_point_id.into(),
            ocpp_version,
            remote_addr: remote_addr.into(),
            connected_at: Utc::now(),
            outbound: tx,
            queued_calls: Arc::new(AtomicUsize::new(0)),
            call_queue_capacity: config.call_queue_capacity,
            default_call_timeout: config.call_timeout,
            message_counter: AtomicU64::new(1),
            pending: PendingCallTable::new(),
            closed: AtomicBool::new(false),
            close_signal: ShutdownSignal::new(),
            last_activity_unix: AtomicI64::new(Utc::now().timestamp()),
            heartbeat_interval_s: AtomicU64::new(config.heartbeat_interval_s),
        });
        (session, rx)
    }

    // ── Accessors ──────────────────────────────────────────

    pub fn charge_point_id(&self) -> &str {
        &self.charge_point_id
    }

    pub fn ocpp_version(&self) -> OcppVersion {
        self.ocpp_version
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    // ── Activity / heartbeat bookkeeping ───────────────────

    /// Record inbound traffic for the heartbeat watchdog.
    pub fn touch(&self) {
        let now = Utc::now().timestamp();
        self.last_activity_unix.store(now, Ordering::Relaxed);
        metrics::gauge!(
            "ocpp_last_seen_timestamp_seconds",
            "charge_point_id" => self.charge_point_id.clone()
        )
        .set(now as f64);
    }

    pub fn idle_seconds(&self) -> i64 {
        Utc::now().timestamp() - self.last_activity_unix.load(Ordering::Relaxed)
    }

    /// Store the interval advertised to the charger at boot.
    pub fn set_heartbeat_interval(&self, seconds: u64) {
        self.heartbeat_interval_s.store(seconds, Ordering::Relaxed);
    }

    pub fn heartbeat_interval_s(&self) -> u64 {
        self.heartbeat_interval_s.load(Ordering::Relaxed)
    }

    // ── Outbound: operator Calls ───────────────────────────

    /// Issue a Call to the charger and await its resolution.
    ///
    /// Exactly one of CallResult (Ok), CallError, Timeout, or SessionClosed
    /// is ever observed. Dropping the returned future abandons the waiter;
    /// a later matching response is discarded silently.
    pub async fn call(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> CoreResult<Value> {
        if self.is_closed() {
            return Err(CoreError::SessionClosed);
        }

        // Reserve a queue slot; replies are exempt from this bound.
        let occupied = self.queued_calls.fetch_add(1, Ordering::SeqCst);
        if occupied >= self.call_queue_capacity {
            self.queued_calls.fetch_sub(1, Ordering::SeqCst);
            metrics::counter!("ocpp_outbound_queue_overflows_total").increment(1);
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                action, "Outbound queue full — rejecting Call"
            );
            return Err(CoreError::Busy);
        }
        let permit = CallPermit(self.queued_calls.clone());

        let message_id = self.next_message_id();
        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };

        let mut rx = self.pending.register(&message_id, action);

        metrics::counter!("ocpp_messages_out_total", "action" => action.to_string()).increment(1);
        debug!(
            charge_point_id = self.charge_point_id.as_str(),
            action,
            message_id = message_id.as_str(),
            "Sending Call"
        );

        if self
            .outbound
            .send(OutboundFrame::Call {
                text: frame.serialize(),
                _permit: permit,
            })
            .is_err()
        {
            self.pending.abandon(&message_id);
            return Err(CoreError::SessionClosed);
        }

        let deadline = timeout.unwrap_or(self.default_call_timeout);
        let started = std::time::Instant::now();

        let outcome = match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // Completion slot dropped without an outcome: the table was
            // cleared out from under us, so the session is gone.
            Ok(Err(_)) => CallOutcome::SessionClosed,
            Err(_) => {
                if self.pending.abandon(&message_id) {
                    warn!(
                        charge_point_id = self.charge_point_id.as_str(),
                        action,
                        message_id = message_id.as_str(),
                        "Call timed out"
                    );
                    CallOutcome::Timeout
                } else {
                    // Resolution raced the deadline; take what was delivered.
                    rx.try_recv().unwrap_or(CallOutcome::SessionClosed)
                }
            }
        };

        metrics::histogram!("ocpp_call_roundtrip_seconds", "action" => action.to_string())
            .record(started.elapsed().as_secs_f64());

        match outcome {
            CallOutcome::Result(value) => Ok(value),
            CallOutcome::Error {
                code, description, ..
            } => Err(CoreError::CallError { code, description }),
            CallOutcome::Timeout => Err(CoreError::Timeout),
            CallOutcome::SessionClosed => Err(CoreError::SessionClosed),
        }
    }

    // ── Outbound: replies to inbound Calls ─────────────────

    /// Answer an inbound Call with a CallResult.
    pub fn reply(&self, message_id: &str, payload: Value) {
        let frame = OcppFrame::CallResult {
            unique_id: message_id.to_string(),
            payload,
        };
        self.enqueue_reply(frame.serialize());
    }

    /// Answer an inbound Call with a CallError.
    pub fn reply_error(&self, message_id: &str, code: OcppErrorCode, description: &str) {
        metrics::counter!(
            "ocpp_call_errors_total",
            "code" => code.as_str(),
            "direction" => "outbound"
        )
        .increment(1);
        let frame = OcppFrame::error_response(message_id, code.as_str(), description);
        self.enqueue_reply(frame.serialize());
    }

    fn enqueue_reply(&self, text: String) {
        if self.outbound.send(OutboundFrame::Reply(text)).is_err() {
            debug!(
                charge_point_id = self.charge_point_id.as_str(),
                "Reply dropped — session writer already gone"
            );
        }
    }

    // ── Inbound resolution (driven by the dispatcher) ──────

    /// Resolve a pending Call with the payload of an inbound CallResult.
    /// Returns `false` for unknown ids (late arrival after timeout).
    pub fn resolve_result(&self, message_id: &str, payload: Value) -> bool {
        self.pending
            .complete(message_id, CallOutcome::Result(payload))
            .is_some()
    }

    /// Resolve a pending Call with an inbound CallError.
    pub fn resolve_error(
        &self,
        message_id: &str,
        code: String,
        description: String,
        details: Value,
    ) -> bool {
        metrics::counter!(
            "ocpp_call_errors_total",
            "code" => code.clone(),
            "direction" => "inbound"
        )
        .increment(1);
        self.pending
            .complete(
                message_id,
                CallOutcome::Error {
                    code,
                    description,
                    details,
                },
            )
            .is_some()
    }

    // ── Close ──────────────────────────────────────────────

    /// Transition to Closing: drain every pending waiter with
    /// `SessionClosed`, then stop the reader and writer tasks. Idempotent.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            charge_point_id = self.charge_point_id.as_str(),
            reason, "Closing session"
        );
        self.pending.drain_closed();
        self.close_signal.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A future resolving once `close` has been called.
    pub fn close_notified(&self) -> ShutdownNotified {
        self.close_signal.notified()
    }

    fn next_message_id(&self) -> String {
        let n = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("cs-{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(capacity: usize) -> (Arc<Session>, mpsc::UnboundedReceiver<OutboundFrame>) {
        Session::new(
            "CP001",
            OcppVersion::V201,
            "127.0.0.1:9999",
            SessionConfig {
                call_queue_capacity: capacity,
                call_timeout: Duration::from_millis(50),
                heartbeat_interval_s: 300,
            },
        )
    }

    #[tokio::test]
    async fn call_resolves_with_result() {
        let (session, mut rx) = test_session(4);

        let s = session.clone();
        let task = tokio::spawn(async move {
            s.call("Reset", serde_json::json!({"type":"Immediate"}), None)
                .await
        });

        // The writer would ship this frame; answer it through the dispatcher path.
        let frame = rx.recv().await.unwrap();
        let parsed = OcppFrame::parse(frame.text()).unwrap();
        let id = parsed.unique_id().to_string();
        assert!(session.resolve_result(&id, serde_json::json!({"status":"Accepted"})));

        let result = task.await.unwrap().unwrap();
        assert_eq!(result["status"], "Accepted");
        assert_eq!(session.pending_calls(), 0);
    }

    #[tokio::test]
    async fn call_times_out_and_late_response_is_dropped() {
        let (session, mut rx) = test_session(4);

        let err = session
            .call("Reset", serde_json::json!({}), Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
        assert_eq!(session.pending_calls(), 0);

        // Late response after timeout resolves nothing.
        let frame = rx.recv().await.unwrap();
        let id = OcppFrame::parse(frame.text()).unwrap().unique_id().to_string();
        assert!(!session.resolve_result(&id, serde_json::json!({})));
    }

    #[tokio::test]
    async fn queue_overflow_fails_fast_with_busy() {
        // Capacity 1, writer never drains: the second Call must be rejected.
        let (session, _rx) = test_session(1);

        let s1 = session.clone();
        let first = tokio::spawn(async move {
            s1.call("Reset", serde_json::json!({}), Some(Duration::from_millis(200)))
                .await
        });
        // Give the first call time to take the slot.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = session
            .call("Reset", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Busy));

        // Replies still go through: liveness for inbound Calls.
        session.reply("in-1", serde_json::json!({"currentTime":"2024-01-01T00:00:00Z"}));

        let _ = first.await.unwrap();
    }

    #[tokio::test]
    async fn close_drains_pending_with_session_closed() {
        let (session, _rx) = test_session(4);

        let s = session.clone();
        let task = tokio::spawn(async move { s.call("Reset", serde_json::json!({}), None).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.close("test");
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed));
        assert_eq!(session.pending_calls(), 0);
        assert!(session.is_closed());

        // Calls after close fail immediately.
        let err = session.call("Reset", serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed));
    }
}
