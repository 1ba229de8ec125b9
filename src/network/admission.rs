//! Session Admission
//!
//! Gate every connection passes before it can play: per-address throttling,
//! credential resolution and duplicate-session prevention.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::external::profiles::{ProfileStore, StoreError};
use crate::game::participant::{PlayerId, Profile};
use crate::network::auth::{guest_profile, validate_token, AuthConfig, AuthError};
use crate::network::protocol::{AuthRequest, ErrorCode, ServerError};

/// Who a connection plays as.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Profile snapshot taken at admission.
    pub profile: Profile,
    /// Guests have no stored profile and are casual-only.
    pub guest: bool,
}

impl Identity {
    /// Player id.
    pub fn id(&self) -> PlayerId {
        self.profile.id
    }
}

/// Admission errors. Every one of them rejects the connection.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Too many attempts from this address.
    #[error("too many connection attempts, retry in {}ms", .retry_after.as_millis())]
    RateLimited {
        /// Time until the oldest attempt leaves the window.
        retry_after: Duration,
    },
    /// The identity already has a live session.
    #[error("player {0} is already connected")]
    DuplicateSession(PlayerId),
    /// Token rejected.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// Valid token, but no stored profile.
    #[error("no profile for player {0}")]
    UnknownProfile(PlayerId),
    /// Profile lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Wire error for this rejection.
    pub fn to_server_error(&self) -> ServerError {
        let code = match self {
            AdmissionError::RateLimited { .. } => ErrorCode::RateLimited,
            AdmissionError::DuplicateSession(_) => ErrorCode::DuplicateSession,
            AdmissionError::Auth(_) | AdmissionError::UnknownProfile(_) => ErrorCode::AuthFailed,
            AdmissionError::Store(_) => ErrorCode::InternalError,
        };
        let mut error = ServerError::new(code, self.to_string());
        if let AdmissionError::RateLimited { retry_after } = self {
            error.retry_after_ms = Some(retry_after.as_millis() as u64);
        }
        error
    }
}

/// Rate limiter and live-session set.
#[derive(Debug)]
pub struct SessionAdmission {
    auth: AuthConfig,
    limits: RateLimitConfig,
    attempts: Mutex<BTreeMap<IpAddr, VecDeque<Instant>>>,
    active: Mutex<BTreeSet<PlayerId>>,
}

impl SessionAdmission {
    /// Create the gate.
    pub fn new(auth: AuthConfig, limits: RateLimitConfig) -> Self {
        Self {
            auth,
            limits,
            attempts: Mutex::new(BTreeMap::new()),
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// Admit a connection from `addr`.
    ///
    /// Rejections leave every existing session untouched. On success the
    /// identity is marked live until [`SessionAdmission::release`].
    pub async fn admit(
        &self,
        request: &AuthRequest,
        addr: IpAddr,
        profiles: &dyn ProfileStore,
    ) -> Result<Identity, AdmissionError> {
        self.throttle(addr).await?;
        let identity = self.resolve(request, profiles).await?;

        let mut active = self.active.lock().await;
        if !active.insert(identity.id()) {
            return Err(AdmissionError::DuplicateSession(identity.id()));
        }
        debug!(player = %identity.id().short(), guest = identity.guest, "Admitted");
        Ok(identity)
    }

    /// End a live session.
    pub async fn release(&self, id: PlayerId) {
        self.active.lock().await.remove(&id);
    }

    /// Whether `id` has a live session.
    pub async fn is_active(&self, id: PlayerId) -> bool {
        self.active.lock().await.contains(&id)
    }

    /// Number of live sessions.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Count an attempt against `addr`'s sliding window.
    async fn throttle(&self, addr: IpAddr) -> Result<(), AdmissionError> {
        let now = Instant::now();
        let window = self.limits.window;
        let mut attempts = self.attempts.lock().await;

        // Forget addresses whose window has emptied
        attempts.retain(|_, times| times.back().map_or(false, |t| now.duration_since(*t) < window));

        let times = attempts.entry(addr).or_default();
        while times.front().map_or(false, |t| now.duration_since(*t) >= window) {
            times.pop_front();
        }
        if times.len() >= self.limits.max_attempts {
            let oldest = times.front().copied().unwrap_or(now);
            return Err(AdmissionError::RateLimited {
                retry_after: window.saturating_sub(now.duration_since(oldest)),
            });
        }
        times.push_back(now);
        Ok(())
    }

    async fn resolve(
        &self,
        request: &AuthRequest,
        profiles: &dyn ProfileStore,
    ) -> Result<Identity, AdmissionError> {
        if let Some(token) = request.token.as_deref() {
            let claims = validate_token(token, &self.auth)?;
            let id = claims.player_id();
            let profile = profiles
                .get_profile(id)
                .await?
                .ok_or(AdmissionError::UnknownProfile(id))?;
            return Ok(Identity { profile, guest: false });
        }

        let seed = match &request.guest_seed {
            Some(seed) => seed.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        Ok(Identity {
            profile: guest_profile(&seed),
            guest: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use crate::external::profiles::InMemoryProfileStore;
    use crate::network::auth::TokenClaims;

    const SECRET: &str = "admission-test-secret";

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    fn admission(max_attempts: usize) -> SessionAdmission {
        SessionAdmission::new(
            AuthConfig {
                secret: Some(SECRET.into()),
                skip_expiry: true,
                ..Default::default()
            },
            RateLimitConfig {
                window: Duration::from_secs(10),
                max_attempts,
            },
        )
    }

    fn guest(seed: &str) -> AuthRequest {
        AuthRequest {
            guest_seed: Some(seed.into()),
            ..Default::default()
        }
    }

    fn token_for(sub: &str) -> AuthRequest {
        let claims = TokenClaims {
            sub: sub.into(),
            exp: 0,
            iat: 0,
            iss: None,
            aud: None,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        AuthRequest {
            token: Some(token),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_guest_admission() {
        let gate = admission(10);
        let store = InMemoryProfileStore::new();

        let identity = gate.admit(&guest("1234"), addr(1), &store).await.unwrap();
        assert!(identity.guest);
        assert!(gate.is_active(identity.id()).await);
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let gate = admission(10);
        let store = InMemoryProfileStore::new();

        let first = gate.admit(&guest("1234"), addr(1), &store).await.unwrap();
        let err = gate.admit(&guest("1234"), addr(2), &store).await.unwrap_err();
        assert!(matches!(err, AdmissionError::DuplicateSession(id) if id == first.id()));
        assert_eq!(err.to_server_error().code, ErrorCode::DuplicateSession);
        assert_eq!(gate.active_count().await, 1);

        gate.release(first.id()).await;
        assert!(gate.admit(&guest("1234"), addr(2), &store).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window() {
        let gate = admission(2);
        let store = InMemoryProfileStore::new();

        gate.admit(&guest("a"), addr(1), &store).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        gate.admit(&guest("b"), addr(1), &store).await.unwrap();

        let err = gate.admit(&guest("c"), addr(1), &store).await.unwrap_err();
        let AdmissionError::RateLimited { retry_after } = err else {
            panic!("expected rate limit, got {err:?}");
        };
        assert_eq!(retry_after, Duration::from_secs(6));
        assert!(!gate.is_active(guest_profile("c").id).await);

        // Other addresses are unaffected
        assert!(gate.admit(&guest("d"), addr(2), &store).await.is_ok());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(gate.admit(&guest("c"), addr(1), &store).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_resolves_stored_profile() {
        let gate = admission(10);
        let profile = Profile {
            id: PlayerId::new([7; 16]),
            name: "seven".into(),
            rating: 1234,
            avatar: None,
        };
        let store = InMemoryProfileStore::with_profiles([profile.clone()]);

        let identity = gate
            .admit(&token_for("07070707-0707-0707-0707-070707070707"), addr(1), &store)
            .await
            .unwrap();
        assert!(!identity.guest);
        assert_eq!(identity.profile, profile);
    }

    #[tokio::test]
    async fn test_unknown_profile_and_bad_token_rejected() {
        let gate = admission(10);
        let store = InMemoryProfileStore::new();

        let err = gate.admit(&token_for("nobody"), addr(1), &store).await.unwrap_err();
        assert!(matches!(err, AdmissionError::UnknownProfile(_)));

        let bad = AuthRequest {
            token: Some("garbage".into()),
            ..Default::default()
        };
        let err = gate.admit(&bad, addr(1), &store).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Auth(_)));
        assert_eq!(err.to_server_error().code, ErrorCode::AuthFailed);
        assert_eq!(gate.active_count().await, 0);
    }
}
