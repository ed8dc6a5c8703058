//! Id-token authorization through the user repository and cache.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Cache, CoreResult, UserRepo};

/// Authorization status carried back to the charger in `IdTokenInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Invalid,
    ConcurrentTx,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Blocked => "Blocked",
            Self::Invalid => "Invalid",
            Self::ConcurrentTx => "ConcurrentTx",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Resolution of an id token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub status: AuthorizationStatus,
    pub user_id: Option<String>,
}

pub struct AuthorizationService {
    users: Arc<dyn UserRepo>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
}

pub type SharedAuthorizationService = Arc<AuthorizationService>;

impl AuthorizationService {
    pub fn new(
        users: Arc<dyn UserRepo>,
        cache: Arc<dyn Cache>,
        cache_ttl: Duration,
    ) -> SharedAuthorizationService {
        Arc::new(Self {
            users,
            cache,
            cache_ttl,
        })
    }

    /// Resolve an id token to a user. Unknown tokens are Blocked and no
    /// transaction may open for them.
    pub async fn authorize(&self, id_token: &str) -> CoreResult<AuthorizationDecision> {
        let cache_key = format!("auth:{}", id_token);

        match self.cache.get(&cache_key).await {
            Ok(Some(cached)) => {
                metrics::counter!("cache_hits_total", "kind" => "authorization").increment(1);
                if let Ok(decision) = serde_json::from_str::<AuthorizationDecision>(&cached) {
                    debug!(id_token, status = decision.status.as_str(), "Authorization cache hit");
                    return Ok(decision);
                }
            }
            Ok(None) => {
                metrics::counter!("cache_misses_total", "kind" => "authorization").increment(1);
            }
            Err(e) => {
                // Cache trouble never blocks authorization.
                warn!(error = %e, "Authorization cache unavailable");
            }
        }

        let decision = match self.users.find_by_id(id_token).await? {
            Some(user) if user.is_active => AuthorizationDecision {
                status: AuthorizationStatus::Accepted,
                user_id: Some(user.id),
            },
            Some(user) => {
                warn!(id_token, user_id = user.id.as_str(), "Inactive user blocked");
                AuthorizationDecision {
                    status: AuthorizationStatus::Blocked,
                    user_id: Some(user.id),
                }
            }
            None => {
                warn!(id_token, "Unknown id token blocked");
                AuthorizationDecision {
                    status: AuthorizationStatus::Blocked,
                    user_id: None,
                }
            }
        };

        if let Ok(serialized) = serde_json::to_string(&decision) {
            let _ = self.cache.set(&cache_key, &serialized, self.cache_ttl).await;
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::User;
    use crate::infrastructure::memory_cache::MemoryCache;
    use crate::infrastructure::memory_repos::MemoryUserRepo;

    fn service_with_users(users: Vec<User>) -> SharedAuthorizationService {
        AuthorizationService::new(
            Arc::new(MemoryUserRepo::with_users(users)),
            MemoryCache::shared(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn known_active_user_is_accepted() {
        let svc = service_with_users(vec![User::new("U1", "u1@example.com", "User One")]);
        let decision = svc.authorize("U1").await.unwrap();
        assert!(decision.status.is_accepted());
        assert_eq!(decision.user_id.as_deref(), Some("U1"));
    }

    #[tokio::test]
    async fn unknown_token_is_blocked() {
        let svc = service_with_users(vec![]);
        let decision = svc.authorize("GHOST").await.unwrap();
        assert_eq!(decision.status, AuthorizationStatus::Blocked);
        assert!(decision.user_id.is_none());
    }

    #[tokio::test]
    async fn inactive_user_is_blocked() {
        let mut user = User::new("U2", "u2@example.com", "User Two");
        user.is_active = false;
        let svc = service_with_users(vec![user]);
        let decision = svc.authorize("U2").await.unwrap();
        assert_eq!(decision.status, AuthorizationStatus::Blocked);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let svc = service_with_users(vec![User::new("U1", "u1@example.com", "User One")]);
        let first = svc.authorize("U1").await.unwrap();
        let second = svc.authorize("U1").await.unwrap();
        assert_eq!(first.status, second.status);
    }
}
