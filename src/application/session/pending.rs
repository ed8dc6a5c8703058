//! Per-session pending-call correlation table.
//!
//! Every outgoing Call registers a one-shot completion slot keyed by its
//! message id. Exactly one of the four outcomes is ever delivered to the
//! waiter: the entry is removed from the table at resolution time, so a
//! late CallResult/CallError after a timeout finds nothing and is dropped.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

/// Resolution of a pending Call.
#[derive(Debug)]
pub enum CallOutcome {
    /// The charger answered with a CallResult payload.
    Result(Value),
    /// The charger answered with a CallError frame.
    Error {
        code: String,
        description: String,
        details: Value,
    },
    /// The deadline elapsed before any answer arrived.
    Timeout,
    /// The session closed (socket error, eviction, shutdown).
    SessionClosed,
}

struct PendingEntry {
    action: String,
    sent_at: DateTime<Utc>,
    tx: oneshot::Sender<CallOutcome>,
}

/// Table of in-flight Calls for one session.
#[derive(Default)]
pub struct PendingCallTable {
    entries: DashMap<String, PendingEntry>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh Call and obtain its completion slot.
    pub fn register(&self, message_id: &str, action: &str) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            message_id.to_string(),
            PendingEntry {
                action: action.to_string(),
                sent_at: Utc::now(),
                tx,
            },
        );
        rx
    }

    /// Resolve a pending Call. Returns the action name and send timestamp
    /// when a waiter existed, `None` for unknown ids (late arrivals).
    ///
    /// The waiter may have gone away (caller cancellation); the outcome is
    /// then dropped silently, which is the required behavior.
    pub fn complete(&self, message_id: &str, outcome: CallOutcome) -> Option<(String, DateTime<Utc>)> {
        let (_, entry) = self.entries.remove(message_id)?;
        let action = entry.action;
        let sent_at = entry.sent_at;
        let _ = entry.tx.send(outcome);
        Some((action, sent_at))
    }

    /// Remove an entry without signalling it. Used by the timeout path after
    /// the waiter has already given up.
    pub fn abandon(&self, message_id: &str) -> bool {
        self.entries.remove(message_id).is_some()
    }

    /// Signal `SessionClosed` to every waiter and empty the table.
    pub fn drain_closed(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.tx.send(CallOutcome::SessionClosed);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_delivers_exactly_once() {
        let table = PendingCallTable::new();
        let rx = table.register("m1", "Reset");

        let resolved = table.complete("m1", CallOutcome::Result(serde_json::json!({"status":"Accepted"})));
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().0, "Reset");

        // Second resolution finds nothing: single assignment.
        assert!(table.complete("m1", CallOutcome::Timeout).is_none());

        match rx.await.unwrap() {
            CallOutcome::Result(v) => assert_eq!(v["status"], "Accepted"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn drain_signals_session_closed_and_empties() {
        let table = PendingCallTable::new();
        let rx1 = table.register("m1", "Reset");
        let rx2 = table.register("m2", "TriggerMessage");

        table.drain_closed();
        assert!(table.is_empty());

        assert!(matches!(rx1.await.unwrap(), CallOutcome::SessionClosed));
        assert!(matches!(rx2.await.unwrap(), CallOutcome::SessionClosed));
    }

    #[tokio::test]
    async fn late_response_after_abandon_is_dropped() {
        let table = PendingCallTable::new();
        let rx = table.register("m1", "Reset");
        drop(rx); // caller cancelled

        assert!(table.abandon("m1"));
        // A later matching response resolves nothing.
        assert!(table.complete("m1", CallOutcome::Result(Value::Null)).is_none());
    }

    #[tokio::test]
    async fn completion_to_cancelled_waiter_is_silent() {
        let table = PendingCallTable::new();
        let rx = table.register("m1", "Reset");
        drop(rx);

        // Entry still present; resolution succeeds but the send goes nowhere.
        assert!(table.complete("m1", CallOutcome::Result(Value::Null)).is_some());
        assert!(table.is_empty());
    }
}
