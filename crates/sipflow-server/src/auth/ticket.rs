//! Short-lived single-use tickets for streaming and download requests

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use moka::sync::Cache;
use rand::RngCore;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use super::Claims;

pub const TICKET_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_TICKET_PREFIX: &str = "sipflow";

const TICKET_BYTES: usize = 32;
const MAX_TICKETS: u64 = 100_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("error storing ticket: {0}")]
    Store(String),
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Store `claims` under `key` for the store's time-to-live.
    async fn set_ex(&self, key: String, claims: Option<Claims>) -> Result<(), TicketError>;

    /// Atomically take the entry under `key`.
    ///
    /// Returns [`TicketError::Unauthorized`] if it is missing or expired.
    async fn get_del(&self, key: &str) -> Result<Option<Claims>, TicketError>;
}

/// In-process [`TicketStore`] backed by a TTL cache.
#[derive(Clone)]
pub struct MemoryTicketStore {
    cache: Cache<String, Option<Claims>>,
}

impl MemoryTicketStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(MAX_TICKETS)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl Default for MemoryTicketStore {
    fn default() -> Self {
        Self::new(TICKET_TTL)
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn set_ex(&self, key: String, claims: Option<Claims>) -> Result<(), TicketError> {
        self.cache.insert(key, claims);
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<Claims>, TicketError> {
        self.cache.remove(key).ok_or(TicketError::Unauthorized)
    }
}

pub type SharedRng = Arc<Mutex<dyn RngCore + Send>>;

/// Issues and redeems tickets. Without a store every operation is a no-op.
#[derive(Clone)]
pub struct TicketProvider {
    store: Option<Arc<dyn TicketStore>>,
    prefix: String,
    rng: SharedRng,
}

impl fmt::Debug for TicketProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketProvider")
            .field("enabled", &self.store.is_some())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl TicketProvider {
    pub fn new(store: Arc<dyn TicketStore>, prefix: impl Into<String>, rng: SharedRng) -> Self {
        Self {
            store: Some(store),
            prefix: prefix.into(),
            rng,
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            prefix: DEFAULT_TICKET_PREFIX.to_string(),
            rng: Arc::new(Mutex::new(rand::rngs::OsRng)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Issue a ticket bound to `claims`; `None` when tickets are disabled.
    pub async fn request(&self, claims: Option<&Claims>) -> Result<Option<String>, TicketError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let ticket = self.ticket();
        store.set_ex(self.store_key(&ticket), claims.cloned()).await?;
        Ok(Some(ticket))
    }

    /// Redeem `ticket`, returning the claims it was issued with.
    pub async fn check(&self, ticket: &str) -> Result<Option<Claims>, TicketError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        if ticket.is_empty() {
            return Err(TicketError::Unauthorized);
        }
        store.get_del(&self.store_key(ticket)).await
    }

    fn store_key(&self, ticket: &str) -> String {
        format!("{}:session:{}", self.prefix, ticket)
    }

    fn ticket(&self) -> String {
        let mut bytes = [0u8; TICKET_BYTES];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn provider() -> TicketProvider {
        TicketProvider::new(
            Arc::new(MemoryTicketStore::default()),
            DEFAULT_TICKET_PREFIX,
            Arc::new(Mutex::new(StdRng::seed_from_u64(7))),
        )
    }

    #[tokio::test]
    async fn test_ticket_is_single_use() {
        let provider = provider();
        let ticket = provider.request(None).await.unwrap().unwrap();

        assert_eq!(provider.check(&ticket).await, Ok(None));
        assert_eq!(provider.check(&ticket).await, Err(TicketError::Unauthorized));
    }

    #[tokio::test]
    async fn test_ticket_carries_claims() {
        let provider = provider();
        let claims = Claims {
            email: "a@b".into(),
            sub: "u1".into(),
            ..Default::default()
        };
        let ticket = provider.request(Some(&claims)).await.unwrap().unwrap();
        assert_eq!(provider.check(&ticket).await.unwrap(), Some(claims));
    }

    #[tokio::test]
    async fn test_ticket_format_is_deterministic_with_seeded_rng() {
        let a = provider().request(None).await.unwrap().unwrap();
        let b = provider().request(None).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_unauthorized() {
        let provider = provider();
        assert_eq!(provider.check("nope").await, Err(TicketError::Unauthorized));
        assert_eq!(provider.check("").await, Err(TicketError::Unauthorized));
    }

    #[tokio::test]
    async fn test_expired_ticket_is_unauthorized() {
        let provider = TicketProvider::new(
            Arc::new(MemoryTicketStore::new(Duration::from_millis(50))),
            "test",
            Arc::new(Mutex::new(StdRng::seed_from_u64(1))),
        );
        let ticket = provider.request(None).await.unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(provider.check(&ticket).await, Err(TicketError::Unauthorized));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_noop() {
        let provider = TicketProvider::disabled();
        assert!(!provider.is_enabled());
        assert_eq!(provider.request(None).await, Ok(None));
        assert_eq!(provider.check("anything").await, Ok(None));
    }
}
