use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as KeyLock, OwnedMutexGuard};

use crate::clock::{Clock, WallClock};

/// A value held at a key.
///
/// The limiter only ever writes [`Value::Str`] holding the decimal TAT; other
/// shapes exist so stores can report what they actually found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
}

impl Value {
    /// Name of this value's shape, as reported in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
        }
    }
}

/// Abstract key-value storage backing the limiter.
///
/// `open` enters the per-key critical section: until the returned handle is
/// dropped, no other `open` on the same key may complete. Different keys must
/// never block each other. This is the only concurrency guarantee the limiter
/// relies on.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;
    /// Exclusive access to one key.
    type Handle: KeyHandle<Error = Self::Error>;

    /// Acquire exclusive access to `key`.
    async fn open(&self, key: &str) -> Result<Self::Handle, Self::Error>;
}

/// Individually atomic operations on an opened key.
#[async_trait]
pub trait KeyHandle: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current value, or `None` if absent or expired.
    async fn get(&mut self) -> Result<Option<Value>, Self::Error>;

    /// Overwrite the value, clearing any expiration.
    async fn set(&mut self, value: Value) -> Result<(), Self::Error>;

    /// Delete the key once `ttl` has elapsed. A zero `ttl` deletes it now.
    async fn expire(&mut self, ttl: Duration) -> Result<(), Self::Error>;
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    expires_at: Option<Duration>,
}

impl Slot {
    fn evict_if_expired(&mut self, now: Duration) {
        if matches!(self.expires_at, Some(at) if at <= now) {
            self.value = None;
            self.expires_at = None;
        }
    }
}

type SlotMap = Mutex<HashMap<String, Arc<KeyLock<Slot>>>>;

/// Opens between two sweeps of expired keys.
pub const DEFAULT_SWEEP_EVERY: u64 = 1024;

/// Simple in-memory key store.
///
/// Each key has its own async lock, so checks on the same key serialize while
/// checks on different keys run in parallel. Expiration is lazy and measured
/// with the injected clock.
///
/// Keys without a value are forgotten as soon as their last holder lets go,
/// and every [`DEFAULT_SWEEP_EVERY`] opens the store sweeps keys whose value
/// has expired, so memory tracks the set of live subjects.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    // Map key -> slot; the outer lock only guards lookup, never an await.
    slots: Arc<SlotMap>,
    clock: Arc<dyn Clock>,
    opens: Arc<AtomicU64>,
    sweep_every: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(WallClock)
    }

    /// Measure expirations with `clock`. Share it with the limiter in tests.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
            opens: Arc::new(AtomicU64::new(0)),
            sweep_every: DEFAULT_SWEEP_EVERY,
        }
    }

    /// Sweep expired keys every `opens` calls to [`KeyStore::open`] (at least 1).
    pub fn with_sweep_every(mut self, opens: u64) -> Self {
        self.sweep_every = opens.max(1);
        self
    }

    fn slot(&self, key: &str) -> Arc<KeyLock<Slot>> {
        let mut slots = self.slots.lock().expect("memory store poisoned");
        slots.entry(key.to_string()).or_default().clone()
    }

    fn existing(&self, key: &str) -> Option<Arc<KeyLock<Slot>>> {
        self.slots.lock().expect("memory store poisoned").get(key).cloned()
    }

    /// Store `value` at `key` without expiration.
    pub async fn insert(&self, key: &str, value: Value) {
        let slot = self.slot(key);
        let mut slot = slot.lock().await;
        slot.value = Some(value);
        slot.expires_at = None;
    }

    /// Read `key` outside any check, honoring expiration.
    pub async fn value(&self, key: &str) -> Option<Value> {
        let slot = self.existing(key)?;
        let mut state = slot.lock().await;
        state.evict_if_expired(self.clock.now());
        forget_if_vacant(&self.slots, key, &slot, &state);
        state.value.clone()
    }

    /// Time left before `key` expires; `None` if absent or persistent.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let slot = self.existing(key)?;
        let mut state = slot.lock().await;
        let now = self.clock.now();
        state.evict_if_expired(now);
        forget_if_vacant(&self.slots, key, &slot, &state);
        state.value.as_ref()?;
        state.expires_at.map(|at| at.saturating_sub(now))
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("memory store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired and empty keys that nobody currently holds. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.slots.lock().expect("memory store poisoned");
        let before = slots.len();
        slots.retain(|_, slot| {
            // Anyone else holding the slot may be about to lock it.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(mut guard) => {
                    guard.evict_if_expired(now);
                    guard.value.is_some()
                }
                Err(_) => true,
            }
        });
        before - slots.len()
    }
}

/// Remove `key` from the map when `state` holds nothing and no one but the
/// caller references `slot`. The caller must hold the slot's lock.
fn forget_if_vacant(slots: &SlotMap, key: &str, slot: &Arc<KeyLock<Slot>>, state: &Slot) {
    if state.value.is_some() {
        return;
    }
    let Ok(mut map) = slots.lock() else {
        return;
    };
    // One reference from the map, one from the caller; clones are only made
    // under the map lock, so no waiter can appear after this check.
    if Arc::strong_count(slot) == 2 && map.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
        map.remove(key);
    }
}

/// Exclusive handle on one [`MemoryStore`] key.
///
/// Dropping the handle releases the key; a key left without a value is
/// forgotten unless another caller is waiting on it.
#[derive(Debug)]
pub struct MemoryHandle {
    key: String,
    slot: OwnedMutexGuard<Slot>,
    slots: Arc<SlotMap>,
    clock: Arc<dyn Clock>,
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        forget_if_vacant(&self.slots, &self.key, OwnedMutexGuard::mutex(&self.slot), &self.slot);
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    type Error = Infallible;
    type Handle = MemoryHandle;

    async fn open(&self, key: &str) -> Result<Self::Handle, Self::Error> {
        if (self.opens.fetch_add(1, Ordering::Relaxed) + 1) % self.sweep_every == 0 {
            let swept = self.purge_expired();
            if swept > 0 {
                tracing::trace!(target: "cellrate::store", swept, "swept expired keys");
            }
        }
        let slot = self.slot(key).lock_owned().await;
        Ok(MemoryHandle {
            key: key.to_string(),
            slot,
            slots: self.slots.clone(),
            clock: self.clock.clone(),
        })
    }
}

#[async_trait]
impl KeyHandle for MemoryHandle {
    type Error = Infallible;

    async fn get(&mut self) -> Result<Option<Value>, Self::Error> {
        self.slot.evict_if_expired(self.clock.now());
        Ok(self.slot.value.clone())
    }

    async fn set(&mut self, value: Value) -> Result<(), Self::Error> {
        self.slot.value = Some(value);
        self.slot.expires_at = None;
        Ok(())
    }

    async fn expire(&mut self, ttl: Duration) -> Result<(), Self::Error> {
        if self.slot.value.is_none() {
            return Ok(());
        }
        if ttl.is_zero() {
            self.slot.value = None;
            self.slot.expires_at = None;
        } else {
            self.slot.expires_at = Some(self.clock.now().saturating_add(ttl));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn set_get_and_expire() {
        let clock = ManualClock::new(Duration::from_secs(100));
        let store = MemoryStore::with_clock(clock.clone());

        let mut h = store.open("k").await.unwrap();
        assert_eq!(h.get().await.unwrap(), None);
        h.set(Value::Str("42".into())).await.unwrap();
        h.expire(Duration::from_secs(5)).await.unwrap();
        drop(h);

        assert_eq!(store.ttl("k").await, Some(Duration::from_secs(5)));
        clock.advance(Duration::from_secs(4));
        assert_eq!(store.value("k").await, Some(Value::Str("42".into())));
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.value("k").await, None);
        assert_eq!(store.ttl("k").await, None);
    }

    #[tokio::test]
    async fn zero_expire_deletes_and_set_clears_ttl() {
        let store = MemoryStore::with_clock(ManualClock::new(Duration::from_secs(1)));
        let mut h = store.open("k").await.unwrap();
        h.set(Value::Str("1".into())).await.unwrap();
        h.expire(Duration::from_secs(3)).await.unwrap();
        h.set(Value::Str("2".into())).await.unwrap();
        drop(h);
        assert_eq!(store.ttl("k").await, None);

        let mut h = store.open("k").await.unwrap();
        h.expire(Duration::ZERO).await.unwrap();
        assert_eq!(h.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn open_serializes_same_key_only() {
        let store = MemoryStore::new();
        let held = store.open("a").await.unwrap();

        // Another key is not blocked.
        let other = tokio::time::timeout(Duration::from_millis(200), store.open("b")).await;
        assert!(other.is_ok());

        // The same key waits until the first handle is dropped.
        let same = tokio::time::timeout(Duration::from_millis(50), store.open("a")).await;
        assert!(same.is_err());
        drop(held);
        let same = tokio::time::timeout(Duration::from_millis(200), store.open("a")).await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn purge_drops_expired_keys() {
        let clock = ManualClock::new(Duration::from_secs(10));
        let store = MemoryStore::with_clock(clock.clone());
        store.insert("keep", Value::List(vec!["x".into()])).await;
        let mut h = store.open("gone").await.unwrap();
        h.set(Value::Str("1".into())).await.unwrap();
        h.expire(Duration::from_secs(1)).await.unwrap();
        drop(h);

        assert_eq!(store.len(), 2);
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.value("keep").await.map(|v| v.kind()), Some("list"));
    }

    #[tokio::test]
    async fn reads_and_empty_handles_leave_no_keys() {
        let store = MemoryStore::with_clock(ManualClock::new(Duration::from_secs(10)));
        assert_eq!(store.value("missing").await, None);
        assert_eq!(store.ttl("missing").await, None);
        assert!(store.is_empty());

        let mut h = store.open("peeked").await.unwrap();
        assert_eq!(h.get().await.unwrap(), None);
        drop(h);
        assert!(store.is_empty());

        let mut h = store.open("deleted").await.unwrap();
        h.set(Value::Str("1".into())).await.unwrap();
        h.expire(Duration::ZERO).await.unwrap();
        drop(h);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_key_survives_while_someone_waits() {
        let store = MemoryStore::new();
        let held = store.open("k").await.unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut h = store.open("k").await.unwrap();
                h.set(Value::Str("7".into())).await.unwrap();
            })
        };
        while Arc::strong_count(OwnedMutexGuard::mutex(&held.slot)) < 3 {
            tokio::task::yield_now().await;
        }
        drop(held);
        waiter.await.unwrap();
        assert_eq!(store.value("k").await, Some(Value::Str("7".into())));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn open_sweeps_expired_keys_periodically() {
        let clock = ManualClock::new(Duration::from_secs(10));
        let store = MemoryStore::with_clock(clock.clone()).with_sweep_every(4);
        for key in ["a", "b", "c"] {
            let mut h = store.open(key).await.unwrap();
            h.set(Value::Str("1".into())).await.unwrap();
            h.expire(Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(store.len(), 3);

        clock.advance(Duration::from_secs(2));
        // The fourth open triggers the sweep before taking its own key.
        drop(store.open("d").await.unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn value_kinds() {
        assert_eq!(Value::Str(String::new()).kind(), "string");
        assert_eq!(Value::List(vec![]).kind(), "list");
        assert_eq!(Value::Hash(BTreeMap::new()).kind(), "hash");
    }
}
