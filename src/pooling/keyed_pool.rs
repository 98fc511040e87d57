//! Keyed pool: one lazily created sub-pool per key

use crate::error::{PoolError, Result};
use crate::pooling::factory::Factory;
use crate::pooling::load_balancer::{default_load_balancer, LoadBalancer};
use crate::pooling::maintenance::{spawn_maintenance, Maintain};
use crate::pooling::pool::{Budget, Lease, Pool, PoolConfig, PoolStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What to do when asked for a key the key supplier does not list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnknownKeyPolicy {
    /// Fail with [`PoolError::InvalidKey`]
    #[default]
    Reject,
    /// Behave as if nothing were available
    Absent,
}

/// Keyed pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyedPoolConfig {
    /// Number of supplier keys whose sub-pools are created up front
    pub core_size: usize,
    /// Maximum number of live resources across all keys
    pub max_size: usize,
    /// Core size of each sub-pool
    pub core_size_per_key: usize,
    /// Maximum size of each sub-pool
    pub max_size_per_key: usize,
    /// Default time to wait in a blocking borrow
    pub borrow_timeout: Duration,
    /// Handling of keys missing from the key supplier
    pub unknown_keys: UnknownKeyPolicy,
}

impl Default for KeyedPoolConfig {
    fn default() -> Self {
        Self {
            core_size: 0,
            max_size: 64,
            core_size_per_key: 2,
            max_size_per_key: 10,
            borrow_timeout: Duration::from_secs(5),
            unknown_keys: UnknownKeyPolicy::default(),
        }
    }
}

impl KeyedPoolConfig {
    /// Create a new keyed pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of eagerly created sub-pools
    pub fn with_core_size(mut self, size: usize) -> Self {
        self.core_size = size;
        self
    }

    /// Set global maximum number of resources
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set per-key core size
    pub fn with_core_size_per_key(mut self, size: usize) -> Self {
        self.core_size_per_key = size;
        self
    }

    /// Set per-key maximum size
    pub fn with_max_size_per_key(mut self, size: usize) -> Self {
        self.max_size_per_key = size;
        self
    }

    /// Set borrow timeout
    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// Set unknown key policy
    pub fn with_unknown_keys(mut self, policy: UnknownKeyPolicy) -> Self {
        self.unknown_keys = policy;
        self
    }

    /// Configuration handed to every sub-pool
    pub fn per_key(&self) -> PoolConfig {
        PoolConfig::new()
            .with_core_size(self.core_size_per_key)
            .with_max_size(self.max_size_per_key)
            .with_borrow_timeout(self.borrow_timeout)
    }

    /// Check that the sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(PoolError::invalid_construction(
                "max_size must be greater than 0",
            ));
        }
        self.per_key().validate()
    }
}

/// Enumerates the keys a keyed pool accepts
pub trait KeySupplier<K>: Send + Sync {
    /// All valid keys
    fn keys(&self) -> Vec<K>;

    /// Whether `key` is valid
    fn contains(&self, key: &K) -> bool;
}

impl<K> KeySupplier<K> for Vec<K>
where
    K: PartialEq + Clone + Send + Sync,
{
    fn keys(&self) -> Vec<K> {
        self.clone()
    }

    fn contains(&self, key: &K) -> bool {
        self.as_slice().contains(key)
    }
}

struct KeyedShared<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    config: KeyedPoolConfig,
    factory: Arc<dyn Factory<K, V>>,
    balancer: Arc<dyn LoadBalancer<V>>,
    key_balancer: Arc<dyn LoadBalancer<K>>,
    supplier: Option<Arc<dyn KeySupplier<K>>>,
    budget: Arc<Budget>,
    pools: RwLock<HashMap<K, Arc<Pool<K, V>>>>,
    closed: AtomicBool,
}

impl<K, V> KeyedShared<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    fn pool_for(&self, key: &K) -> Result<Option<Arc<Pool<K, V>>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        if let Some(pool) = self.pools.read().get(key) {
            return Ok(Some(Arc::clone(pool)));
        }

        if let Some(supplier) = &self.supplier {
            if !supplier.contains(key) {
                return match self.config.unknown_keys {
                    UnknownKeyPolicy::Reject => {
                        Err(PoolError::invalid_key(format!("{:?}", key)))
                    }
                    UnknownKeyPolicy::Absent => Ok(None),
                };
            }
        }

        let mut pools = self.pools.write();
        // close() takes the write lock after setting the flag
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = pools.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(key = ?key, "Creating pool for key");
            Arc::new(Pool::assemble(
                key.clone(),
                Arc::clone(&self.factory),
                self.config.per_key(),
                Arc::clone(&self.balancer),
                Some(Arc::clone(&self.budget)),
            ))
        });
        Ok(Some(Arc::clone(pool)))
    }

    /// Keys with a live sub-pool plus every supplier key
    fn known_keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.pools.read().keys().cloned().collect();
        if let Some(supplier) = &self.supplier {
            for key in supplier.keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    fn snapshot(&self) -> Vec<Arc<Pool<K, V>>> {
        self.pools.read().values().cloned().collect()
    }

    fn reclaim(&self) -> usize {
        self.snapshot().iter().map(|pool| pool.reclaim()).sum()
    }

    fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        // Closed sub-pools stay mapped so late returns still match their owner
        let pools: Vec<_> = self.pools.write().values().cloned().collect();
        pools.iter().map(|pool| pool.close()).sum()
    }
}

impl<K, V> Maintain for KeyedShared<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    fn maintain(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        for pool in self.snapshot() {
            pool.reclaim();
            if let Err(e) = pool.ensure_core() {
                tracing::warn!(key = ?pool.key(), "Pool maintenance could not restore core size: {}", e);
            }
        }
        true
    }
}

/// A map of key to [`Pool`], creating each sub-pool on first use.
///
/// Sub-pools are independent; only the global size budget is shared, and
/// it is tracked with atomics. Leases carry their key, so releasing one
/// needs no extra routing information.
pub struct KeyedPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    shared: Arc<KeyedShared<K, V>>,
}

impl<K, V> KeyedPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create a keyed pool accepting any key
    pub fn new(factory: Arc<dyn Factory<K, V>>, config: KeyedPoolConfig) -> Result<Self> {
        Self::assemble(
            factory,
            config,
            None,
            Arc::new(default_load_balancer()),
            Arc::new(default_load_balancer()),
        )
    }

    /// Create a keyed pool accepting only the keys `supplier` lists
    pub fn with_key_supplier(
        factory: Arc<dyn Factory<K, V>>,
        config: KeyedPoolConfig,
        supplier: Arc<dyn KeySupplier<K>>,
    ) -> Result<Self> {
        Self::assemble(
            factory,
            config,
            Some(supplier),
            Arc::new(default_load_balancer()),
            Arc::new(default_load_balancer()),
        )
    }

    pub(crate) fn assemble(
        factory: Arc<dyn Factory<K, V>>,
        config: KeyedPoolConfig,
        supplier: Option<Arc<dyn KeySupplier<K>>>,
        balancer: Arc<dyn LoadBalancer<V>>,
        key_balancer: Arc<dyn LoadBalancer<K>>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = Self {
            shared: Arc::new(KeyedShared {
                budget: Arc::new(Budget::new(config.max_size)),
                config,
                factory,
                balancer,
                key_balancer,
                supplier,
                pools: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        };
        pool.prewarm();
        Ok(pool)
    }

    /// Create the first `core_size` supplier keys' sub-pools and fill them
    fn prewarm(&self) {
        let Some(supplier) = &self.shared.supplier else {
            return;
        };

        for key in supplier.keys().into_iter().take(self.shared.config.core_size) {
            match self.shared.pool_for(&key) {
                Ok(Some(pool)) => {
                    if let Err(e) = pool.ensure_core() {
                        tracing::warn!(key = ?key, "Failed to prewarm pool: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(key = ?key, "Failed to prewarm pool: {}", e),
            }
        }
    }

    /// Keyed pool configuration
    pub fn config(&self) -> &KeyedPoolConfig {
        &self.shared.config
    }

    /// The sub-pool for `key`, created if this is its first use.
    ///
    /// Returns `Ok(None)` for an unknown key under
    /// [`UnknownKeyPolicy::Absent`].
    pub fn pool(&self, key: &K) -> Result<Option<Arc<Pool<K, V>>>> {
        self.shared.pool_for(key)
    }

    /// Borrow for `key` without blocking
    pub fn borrow(&self, key: &K) -> Result<Option<Lease<K, V>>> {
        match self.shared.pool_for(key)? {
            Some(pool) => pool.borrow(),
            None => Ok(None),
        }
    }

    /// Borrow for `key`, waiting up to `timeout`
    pub fn borrow_timeout(&self, key: &K, timeout: Duration) -> Result<Option<Lease<K, V>>> {
        match self.shared.pool_for(key)? {
            Some(pool) => pool.borrow_timeout(timeout),
            None => Ok(None),
        }
    }

    /// Borrow from any known key without blocking.
    ///
    /// The key load balancer picks where to start; remaining keys are tried
    /// in order after it.
    pub fn borrow_any(&self) -> Result<Option<Lease<K, V>>> {
        let keys = self.shared.known_keys();
        let Some(start) = self.shared.key_balancer.select_index(&keys) else {
            return Ok(None);
        };

        for offset in 0..keys.len() {
            let key = &keys[(start + offset) % keys.len()];
            if let Some(lease) = self.borrow(key)? {
                return Ok(Some(lease));
            }
        }
        Ok(None)
    }

    /// Borrow from any known key, waiting up to `timeout` on the key the
    /// key load balancer picks when nothing is free right away
    pub fn borrow_any_timeout(&self, timeout: Duration) -> Result<Option<Lease<K, V>>> {
        let deadline = Instant::now() + timeout;
        if let Some(lease) = self.borrow_any()? {
            return Ok(Some(lease));
        }

        let keys = self.shared.known_keys();
        match self.shared.key_balancer.select(&keys) {
            Some(key) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.borrow_timeout(key, remaining)
            }
            None => Ok(None),
        }
    }

    /// Return a lease to the sub-pool it came from
    pub fn release(&self, lease: Lease<K, V>) -> Result<()> {
        self.check_owner(&lease)?;
        lease.release();
        Ok(())
    }

    /// Destroy a leased resource
    pub fn invalidate(&self, lease: Lease<K, V>) -> Result<()> {
        self.check_owner(&lease)?;
        lease.invalidate();
        Ok(())
    }

    fn check_owner(&self, lease: &Lease<K, V>) -> Result<()> {
        let pools = self.shared.pools.read();
        match pools.get(lease.key()) {
            Some(pool) if pool.owns(lease) => Ok(()),
            _ => Err(PoolError::ForeignLease),
        }
    }

    /// Number of sub-pools created so far
    pub fn pool_count(&self) -> usize {
        self.shared.pools.read().len()
    }

    /// Live resources across all keys
    pub fn size(&self) -> usize {
        self.shared.budget.used()
    }

    /// Statistics for every sub-pool
    pub fn stats(&self) -> HashMap<K, PoolStats> {
        self.shared
            .pools
            .read()
            .iter()
            .map(|(key, pool)| (key.clone(), pool.stats()))
            .collect()
    }

    /// Shrink every sub-pool to its core size; returns resources destroyed
    pub fn reclaim(&self) -> usize {
        self.shared.reclaim()
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close every sub-pool; returns the number of idle resources destroyed
    pub fn close(&self) -> usize {
        self.shared.close()
    }

    /// Run reclamation for every key every `interval` on the given runtime
    pub fn start_maintenance(
        &self,
        handle: &tokio::runtime::Handle,
        interval: Duration,
    ) -> Result<tokio::task::JoinHandle<()>> {
        if interval.is_zero() {
            return Err(PoolError::invalid_construction(
                "maintenance interval must be greater than zero",
            ));
        }
        Ok(spawn_maintenance(handle, Arc::downgrade(&self.shared), interval))
    }
}

impl<K, V> Drop for KeyedPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::factory::factory_fn;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    fn string_factory() -> Arc<dyn Factory<String, String>> {
        let counter = Arc::new(AtomicUsize::new(0));
        Arc::new(factory_fn(move |key: &String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(format!("{}#{}", key, n))
        }))
    }

    fn supplier(keys: &[&str]) -> Arc<dyn KeySupplier<String>> {
        Arc::new(keys.iter().map(|k| k.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_lazy_pool_creation() {
        let pool = KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap();
        assert_eq!(pool.pool_count(), 0);

        let lease = pool.borrow(&"a".to_string()).unwrap().unwrap();
        assert_eq!(lease.key(), "a");
        assert!(lease.starts_with("a#"));
        assert_eq!(pool.pool_count(), 1);

        pool.release(lease).unwrap();
        assert_eq!(pool.stats()[&"a".to_string()].idle, 1);
    }

    #[test]
    fn test_unknown_key_reject() {
        let pool = KeyedPool::with_key_supplier(
            string_factory(),
            KeyedPoolConfig::default(),
            supplier(&["a", "b"]),
        )
        .unwrap();

        assert!(pool.borrow(&"a".to_string()).unwrap().is_some());
        let result = pool.borrow(&"zzz".to_string());
        assert!(matches!(result, Err(PoolError::InvalidKey(_))));
    }

    #[test]
    fn test_unknown_key_absent() {
        let config = KeyedPoolConfig::default().with_unknown_keys(UnknownKeyPolicy::Absent);
        let pool = KeyedPool::with_key_supplier(string_factory(), config, supplier(&["a"])).unwrap();

        assert!(pool.borrow(&"zzz".to_string()).unwrap().is_none());
        assert!(pool
            .borrow_timeout(&"zzz".to_string(), Duration::from_millis(10))
            .unwrap()
            .is_none());
        assert_eq!(pool.pool_count(), 0);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_pool() {
        let pool = Arc::new(KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    pool.pool(&"shared".to_string()).unwrap().unwrap()
                })
            })
            .collect();

        let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(pool.pool_count(), 1);
        assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
    }

    #[test]
    fn test_per_key_and_global_bounds() {
        let config = KeyedPoolConfig::default()
            .with_max_size(3)
            .with_core_size_per_key(0)
            .with_max_size_per_key(2);
        let pool = KeyedPool::new(string_factory(), config).unwrap();
        let a = "a".to_string();
        let b = "b".to_string();

        let a1 = pool.borrow(&a).unwrap().unwrap();
        let _a2 = pool.borrow(&a).unwrap().unwrap();
        // Per-key cap
        assert!(pool.borrow(&a).unwrap().is_none());

        let _b1 = pool.borrow(&b).unwrap().unwrap();
        // Global cap
        assert!(pool.borrow(&b).unwrap().is_none());
        assert_eq!(pool.size(), 3);

        pool.invalidate(a1).unwrap();
        assert_eq!(pool.size(), 2);
        assert!(pool.borrow(&b).unwrap().is_some());
    }

    #[test]
    fn test_waiter_wakes_when_other_key_frees_capacity() {
        let config = KeyedPoolConfig::default()
            .with_max_size(1)
            .with_core_size_per_key(0)
            .with_max_size_per_key(1);
        let pool = Arc::new(KeyedPool::new(string_factory(), config).unwrap());
        let held = pool.borrow(&"a".to_string()).unwrap().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                pool.borrow_timeout(&"b".to_string(), Duration::from_secs(5))
                    .map(|lease| lease.map(|l| l.key().clone()))
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        pool.invalidate(held).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_idle_resource_of_other_key_is_evicted() {
        let config = KeyedPoolConfig::default()
            .with_max_size(1)
            .with_core_size_per_key(0);
        let pool = KeyedPool::new(string_factory(), config).unwrap();

        let lease = pool.borrow(&"a".to_string()).unwrap().unwrap();
        pool.release(lease).unwrap();
        assert_eq!(pool.stats()[&"a".to_string()].idle, 1);

        let lease = pool.borrow(&"b".to_string()).unwrap().unwrap();
        assert_eq!(lease.key(), "b");
        assert_eq!(pool.stats()[&"a".to_string()].size, 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_returned_resource_yields_to_starved_key() {
        let config = KeyedPoolConfig::default()
            .with_max_size(1)
            .with_core_size_per_key(0);
        let pool = Arc::new(KeyedPool::new(string_factory(), config).unwrap());
        let held = pool.borrow(&"a".to_string()).unwrap().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                pool.borrow_timeout(&"b".to_string(), Duration::from_secs(5))
                    .map(|lease| lease.is_some())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        pool.release(held).unwrap();

        assert!(waiter.join().unwrap().unwrap());
        assert_eq!(pool.stats()[&"a".to_string()].size, 0);
    }

    #[test]
    fn test_foreign_lease() {
        let one = KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap();
        let two = KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap();

        let lease = one.borrow(&"a".to_string()).unwrap().unwrap();
        assert!(matches!(two.release(lease), Err(PoolError::ForeignLease)));
        assert_eq!(one.stats()[&"a".to_string()].idle, 1);
    }

    #[test]
    fn test_borrow_any_rotates_keys() {
        let config = KeyedPoolConfig::default().with_core_size_per_key(0);
        let pool = KeyedPool::with_key_supplier(string_factory(), config, supplier(&["x", "y"])).unwrap();

        let first = pool.borrow_any().unwrap().unwrap();
        let second = pool.borrow_any().unwrap().unwrap();
        assert_ne!(first.key(), second.key());
    }

    #[test]
    fn test_prewarm_core_keys() {
        let config = KeyedPoolConfig::default()
            .with_core_size(2)
            .with_core_size_per_key(1);
        let pool = KeyedPool::with_key_supplier(string_factory(), config, supplier(&["a", "b", "c"])).unwrap();

        assert_eq!(pool.pool_count(), 2);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_close() {
        let pool = KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap();
        let held = pool.borrow(&"a".to_string()).unwrap().unwrap();
        let idle = pool.borrow(&"b".to_string()).unwrap().unwrap();
        pool.release(idle).unwrap();

        assert_eq!(pool.close(), 1);
        assert!(pool.is_closed());
        assert!(matches!(pool.borrow(&"a".to_string()), Err(PoolError::Closed)));
        assert!(matches!(pool.borrow(&"new".to_string()), Err(PoolError::Closed)));

        pool.release(held).unwrap();
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_release_after_close_rejects_foreign_lease() {
        let one = KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap();
        let two = KeyedPool::new(string_factory(), KeyedPoolConfig::default()).unwrap();
        let own = one.borrow(&"a".to_string()).unwrap().unwrap();
        let other = two.borrow(&"a".to_string()).unwrap().unwrap();

        one.close();
        assert!(matches!(one.release(other), Err(PoolError::ForeignLease)));
        one.release(own).unwrap();
        assert_eq!(one.size(), 0);

        // The rejected lease went home when dropped
        assert_eq!(two.stats()[&"a".to_string()].idle, 1);
    }

    #[test]
    fn test_close_wakes_blocked_borrower() {
        let config = KeyedPoolConfig::default()
            .with_core_size_per_key(0)
            .with_max_size_per_key(1);
        let pool = Arc::new(KeyedPool::new(string_factory(), config).unwrap());
        let _held = pool.borrow(&"a".to_string()).unwrap().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let started = Instant::now();
                let result = pool.borrow_timeout(&"a".to_string(), Duration::from_secs(5));
                (result.map(|lease| lease.is_some()), started.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        pool.close();

        let (result, elapsed) = waiter.join().unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_budget_freed_during_eviction_scan_is_not_missed() {
        let config = KeyedPoolConfig::default()
            .with_max_size(1)
            .with_core_size_per_key(0)
            .with_max_size_per_key(1);
        let pool = Arc::new(KeyedPool::new(string_factory(), config).unwrap());
        // Empty sub-pools lengthen the scan a starved borrower runs unlocked
        for i in 0..2_000 {
            pool.pool(&format!("empty-{}", i)).unwrap();
        }

        for trial in 0..40u64 {
            let held = pool.borrow(&"a".to_string()).unwrap().unwrap();

            let waiter = {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let started = Instant::now();
                    let lease = pool
                        .borrow_timeout(&"b".to_string(), Duration::from_secs(2))
                        .unwrap();
                    (lease.is_some(), started.elapsed())
                })
            };

            std::thread::sleep(Duration::from_micros(50 * (trial % 10)));
            if trial % 2 == 0 {
                pool.invalidate(held).unwrap();
            } else {
                pool.release(held).unwrap();
            }

            let (got, elapsed) = waiter.join().unwrap();
            assert!(got, "trial {} timed out", trial);
            assert!(elapsed < Duration::from_secs(1), "trial {} waited {:?}", trial, elapsed);
        }
    }
}
