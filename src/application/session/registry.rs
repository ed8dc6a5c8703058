//! Session registry: the single source of truth for "is this charger
//! connected?".
//!
//! Registration atomically swaps the session for a charge point id: the
//! evicted predecessor is closed (draining its pending calls with
//! `SessionClosed`) before the new session becomes reachable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::CoreResult;
#[cfg(test)]
use crate::domain::CoreError;

use super::connection::Session;

/// Outcome of a registration attempt.
pub enum RegisterOutcome {
    /// Fresh connection, no previous session existed.
    New,
    /// Replaced an existing session; the predecessor has already reached
    /// Closed and its waiters have been signalled.
    Evicted(Arc<Session>),
    /// Rejected because the charge point reconnected too quickly after a
    /// disconnect.
    Debounced { seconds_remaining: i64 },
}

/// Thread-safe registry of active charge-point sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    /// Disconnect timestamps for reconnect debouncing.
    last_disconnect: DashMap<String, DateTime<Utc>>,
    debounce_secs: i64,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new(debounce_secs: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            last_disconnect: DashMap::new(),
            debounce_secs,
        }
    }

    pub fn shared(debounce_secs: i64) -> SharedSessionRegistry {
        Arc::new(Self::new(debounce_secs))
    }

    /// Register a session, evicting any predecessor for the same id.
    ///
    /// The predecessor is fully closed before the new session is inserted,
    /// so a pending Call on the old session resolves `SessionClosed` before
    /// the new one is reachable.
    pub fn register(&self, session: Arc<Session>) -> RegisterOutcome {
        let charge_point_id = session.charge_point_id().to_string();

        // Debounce only applies to reconnect-after-disconnect; a parallel
        // duplicate connect goes down the eviction path below.
        if !self.sessions.contains_key(&charge_point_id) {
            if let Some(last_dc) = self.last_disconnect.get(&charge_point_id) {
                let elapsed = Utc::now().signed_duration_since(*last_dc).num_seconds();
                if elapsed < self.debounce_secs {
                    let seconds_remaining = self.debounce_secs - elapsed;
                    warn!(
                        charge_point_id = charge_point_id.as_str(),
                        elapsed_seconds = elapsed,
                        "Reconnection too fast — debouncing"
                    );
                    return RegisterOutcome::Debounced { seconds_remaining };
                }
            }
        }

        let evicted = self.sessions.remove(&charge_point_id).map(|(_, old)| {
            warn!(
                charge_point_id = charge_point_id.as_str(),
                old_version = %old.ocpp_version(),
                connected_since = %old.connected_at(),
                "Evicting session — new connection replaces old"
            );
            old.close("evicted by new connection");
            old
        });

        info!(
            charge_point_id = charge_point_id.as_str(),
            version = %session.ocpp_version(),
            remote_addr = session.remote_addr(),
            "Registering charge point session"
        );
        self.sessions.insert(charge_point_id.clone(), session);
        self.last_disconnect.remove(&charge_point_id);

        metrics::gauge!("ocpp_connected_stations").set(self.sessions.len() as f64);

        match evicted {
            Some(old) => RegisterOutcome::Evicted(old),
            None => RegisterOutcome::New,
        }
    }

    /// Unregister a specific session instance and record the disconnect time.
    ///
    /// A session evicted by a newer connection no longer owns the registry
    /// entry; its late unregister must not remove its replacement, hence the
    /// pointer-identity check.
    pub fn unregister(&self, session: &Arc<Session>) -> bool {
        let charge_point_id = session.charge_point_id();
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, current| Arc::ptr_eq(current, session));

        if removed.is_some() {
            self.last_disconnect
                .insert(charge_point_id.to_string(), Utc::now());
            metrics::gauge!("ocpp_connected_stations").set(self.sessions.len() as f64);
            info!(charge_point_id, "Unregistered charge point session");
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, charge_point_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(charge_point_id).map(|s| s.clone())
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the live sessions for iteration.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|r| r.value().clone()).collect()
    }

    /// Issue the same Call to every connected charger concurrently,
    /// collecting the per-id outcome.
    pub async fn fan_out(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<std::time::Duration>,
    ) -> Vec<(String, CoreResult<Value>)> {
        let targets = self.sessions();
        let calls = targets.iter().map(|session| {
            let payload = payload.clone();
            async move {
                let outcome = session.call(action, payload, timeout).await;
                (session.charge_point_id().to_string(), outcome)
            }
        });
        join_all(calls).await
    }

    /// Close every session (used by graceful shutdown).
    pub fn close_all(&self, reason: &str) {
        for session in self.sessions() {
            session.close(reason);
            self.unregister(&session);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::connection::SessionConfig;
    use crate::domain::OcppVersion;

    fn session(id: &str) -> Arc<Session> {
        Session::new(id, OcppVersion::V201, "127.0.0.1:1", SessionConfig::default()).0
    }

    #[tokio::test]
    async fn duplicate_register_evicts_predecessor() {
        let registry = SessionRegistry::new(0);
        let s1 = session("CP001");
        let s2 = session("CP001");

        assert!(matches!(registry.register(s1.clone()), RegisterOutcome::New));

        // A pending call on s1 must resolve SessionClosed at eviction time.
        let s1_call = s1.clone();
        let pending = tokio::spawn(async move {
            s1_call.call("Reset", serde_json::json!({}), None).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        match registry.register(s2.clone()) {
            RegisterOutcome::Evicted(old) => {
                assert!(old.is_closed());
                assert_eq!(old.pending_calls(), 0);
            }
            _ => panic!("expected eviction"),
        }

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed));

        // Registry now points at s2.
        let current = registry.lookup("CP001").unwrap();
        assert!(Arc::ptr_eq(&current, &s2));
    }

    #[tokio::test]
    async fn late_unregister_of_evicted_session_keeps_replacement() {
        let registry = SessionRegistry::new(0);
        let s1 = session("CP001");
        let s2 = session("CP001");

        registry.register(s1.clone());
        registry.register(s2.clone());

        // The evicted session's connection task cleans up late.
        registry.unregister(&s1);
        assert!(registry.is_connected("CP001"));

        registry.unregister(&s2);
        assert!(!registry.is_connected("CP001"));
    }

    #[tokio::test]
    async fn reconnect_within_debounce_window_is_rejected() {
        let registry = SessionRegistry::new(30);
        let s1 = session("CP001");
        registry.register(s1.clone());
        registry.unregister(&s1);

        let s2 = session("CP001");
        assert!(matches!(
            registry.register(s2),
            RegisterOutcome::Debounced { .. }
        ));
    }
}
