//! Credential pool manager
//!
//! Owns the finite set of broker credentials available to the process.
//! Counters are mutated only through `acquire`/`release`/`reset_all`;
//! nothing outside this module reads-then-writes them.

use std::collections::BTreeMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::common::types::CredentialId;
use crate::config::types::CredentialConfig;

/// One reserved slot on a credential
///
/// Held for the duration of one evaluation; returned to the pool via
/// `release(lease.credential_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLease {
    pub credential_id: CredentialId,
    pub broker: String,
    pub demo: bool,
}

/// Result of an acquisition attempt
///
/// `Busy` is a control-flow signal, not an error: no credential currently
/// has a free slot and the caller should retry on the next release event.
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(CredentialLease),
    Busy,
}

/// Read-only usage snapshot for one credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CredentialUsage {
    pub in_use: u32,
    pub max: u32,
}

struct CredentialSlots {
    broker: String,
    demo: bool,
    max: u32,
    in_use: u32,
}

/// Tracks per-credential in-flight usage and decides admission
pub struct CredentialPool {
    // BTreeMap keeps acquisition order deterministic across calls
    inner: Mutex<BTreeMap<CredentialId, CredentialSlots>>,
    released: Notify,
}

impl CredentialPool {
    /// Build the pool from configured credentials
    pub fn new(credentials: &[CredentialConfig]) -> Self {
        let inner = credentials
            .iter()
            .map(|c| {
                (
                    c.id.clone(),
                    CredentialSlots {
                        broker: c.broker.clone(),
                        demo: c.demo,
                        max: c.max_sessions.max(1),
                        in_use: 0,
                    },
                )
            })
            .collect();

        Self {
            inner: Mutex::new(inner),
            released: Notify::new(),
        }
    }

    /// Try to reserve one slot
    ///
    /// Non-blocking: returns `Busy` immediately when every credential is at
    /// its limit. When a broker preference is given, only that broker's
    /// credentials are considered; a bot bound to broker A never silently
    /// runs on broker B.
    pub async fn acquire(&self, preferred_broker: Option<&str>) -> AcquireOutcome {
        let mut inner = self.inner.lock().await;

        for (id, slots) in inner.iter_mut() {
            if let Some(preferred) = preferred_broker {
                if slots.broker != preferred {
                    continue;
                }
            }
            if slots.in_use < slots.max {
                slots.in_use += 1;
                debug!(credential = %id, in_use = slots.in_use, max = slots.max, "credential slot acquired");
                return AcquireOutcome::Acquired(CredentialLease {
                    credential_id: id.clone(),
                    broker: slots.broker.clone(),
                    demo: slots.demo,
                });
            }
        }

        AcquireOutcome::Busy
    }

    /// Return one slot to the pool
    ///
    /// Releasing an already-free credential indicates a bug upstream; it is
    /// logged and absorbed, never propagated.
    pub async fn release(&self, credential_id: &str) {
        let mut inner = self.inner.lock().await;

        match inner.get_mut(credential_id) {
            Some(slots) if slots.in_use > 0 => {
                slots.in_use -= 1;
                debug!(credential = %credential_id, in_use = slots.in_use, "credential slot released");
            }
            Some(_) => {
                warn!(credential = %credential_id, "release called on credential with no active reservation");
                return;
            }
            None => {
                warn!(credential = %credential_id, "release called on unknown credential");
                return;
            }
        }

        drop(inner);
        self.released.notify_one();
    }

    /// Zero every in-use counter
    ///
    /// Part of emergency recovery: clears reservations leaked by workers
    /// that died without releasing.
    pub async fn reset_all(&self) {
        let mut inner = self.inner.lock().await;
        let leaked: u32 = inner.values().map(|s| s.in_use).sum();
        for slots in inner.values_mut() {
            slots.in_use = 0;
        }
        drop(inner);

        if leaked > 0 {
            info!(leaked, "credential pool reset cleared leaked reservations");
        }
        self.released.notify_one();
    }

    /// Read-only usage snapshot
    pub async fn snapshot(&self) -> BTreeMap<CredentialId, CredentialUsage> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(id, slots)| {
                (
                    id.clone(),
                    CredentialUsage {
                        in_use: slots.in_use,
                        max: slots.max,
                    },
                )
            })
            .collect()
    }

    /// Whether any credential currently has a free slot
    pub async fn has_capacity(&self) -> bool {
        self.inner
            .lock()
            .await
            .values()
            .any(|s| s.in_use < s.max)
    }

    /// Sum of all credentials' session limits
    pub async fn total_capacity(&self) -> u32 {
        self.inner.lock().await.values().map(|s| s.max).sum()
    }

    /// Wait until some slot is released (or the pool is reset)
    pub async fn release_event(&self) {
        self.released.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn credential(id: &str, max_sessions: u32) -> CredentialConfig {
        CredentialConfig {
            id: id.to_string(),
            broker: "capital".to_string(),
            api_key: "key".to_string(),
            identifier: "user".to_string(),
            password: "pass".to_string(),
            demo: true,
            max_sessions,
        }
    }

    #[tokio::test]
    async fn test_acquire_until_busy() {
        let pool = CredentialPool::new(&[credential("a", 1)]);

        let first = pool.acquire(None).await;
        assert!(matches!(first, AcquireOutcome::Acquired(_)));

        let second = pool.acquire(None).await;
        assert!(matches!(second, AcquireOutcome::Busy));

        pool.release("a").await;
        assert!(matches!(pool.acquire(None).await, AcquireOutcome::Acquired(_)));
    }

    #[tokio::test]
    async fn test_release_never_goes_negative() {
        let pool = CredentialPool::new(&[credential("a", 1)]);

        // Double release is absorbed
        pool.release("a").await;
        pool.release("a").await;

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot["a"].in_use, 0);
    }

    #[tokio::test]
    async fn test_release_unknown_credential_is_absorbed() {
        let pool = CredentialPool::new(&[credential("a", 1)]);
        pool.release("does-not-exist").await;
        assert_eq!(pool.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_preferred_broker_filters_candidates() {
        let mut other = credential("b", 1);
        other.broker = "other-broker".to_string();
        let pool = CredentialPool::new(&[credential("a", 1), other]);

        match pool.acquire(Some("other-broker")).await {
            AcquireOutcome::Acquired(lease) => {
                assert_eq!(lease.credential_id, "b");
                assert_eq!(lease.broker, "other-broker");
            }
            AcquireOutcome::Busy => panic!("expected acquisition"),
        }

        // Preference exhausted even though "a" still has capacity
        assert!(matches!(
            pool.acquire(Some("other-broker")).await,
            AcquireOutcome::Busy
        ));
    }

    #[tokio::test]
    async fn test_reset_all_clears_leaked_reservations() {
        let pool = CredentialPool::new(&[credential("a", 2), credential("b", 1)]);
        pool.acquire(None).await;
        pool.acquire(None).await;
        pool.acquire(None).await;

        pool.reset_all().await;

        let snapshot = pool.snapshot().await;
        assert!(snapshot.values().all(|u| u.in_use == 0));
        assert!(pool.has_capacity().await);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_max() {
        let pool = Arc::new(CredentialPool::new(&[credential("a", 2), credential("b", 3)]));
        let capacity = pool.total_capacity().await as usize;

        let mut handles = Vec::new();
        for _ in 0..64 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                match pool.acquire(None).await {
                    AcquireOutcome::Acquired(lease) => Some(lease),
                    AcquireOutcome::Busy => None,
                }
            }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            if let Some(lease) = handle.await.unwrap() {
                granted.push(lease);
            }
        }

        // Exactly capacity slots granted, no double-reservations
        assert_eq!(granted.len(), capacity);
        let snapshot = pool.snapshot().await;
        for usage in snapshot.values() {
            assert!(usage.in_use <= usage.max);
        }

        // Full drain returns to zero
        for lease in granted {
            pool.release(&lease.credential_id).await;
        }
        let snapshot = pool.snapshot().await;
        assert!(snapshot.values().all(|u| u.in_use == 0));
    }

    #[tokio::test]
    async fn test_release_event_wakes_waiter() {
        let pool = Arc::new(CredentialPool::new(&[credential("a", 1)]));
        pool.acquire(None).await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.release_event().await;
            })
        };

        pool.release("a").await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken by release")
            .unwrap();
    }
}
