//! Bounded resource pool for a single key

use crate::error::{PoolError, Result};
use crate::pooling::factory::Factory;
use crate::pooling::load_balancer::{default_load_balancer, LoadBalancer};
use crate::pooling::maintenance::{spawn_maintenance, Maintain};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Number of resources the pool tries to keep around
    pub core_size: usize,
    /// Maximum number of resources allowed
    pub max_size: usize,
    /// Default time to wait in a blocking borrow
    pub borrow_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: 2,
            max_size: 10,
            borrow_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set core pool size
    pub fn with_core_size(mut self, size: usize) -> Self {
        self.core_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set borrow timeout
    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// Check that the sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(PoolError::invalid_construction(
                "max_size must be greater than 0",
            ));
        }
        if self.core_size > self.max_size {
            return Err(PoolError::invalid_construction(format!(
                "core_size ({}) must not exceed max_size ({})",
                self.core_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Resources waiting to be borrowed
    pub idle: usize,
    /// Resources currently lent out (including ones being created)
    pub borrowed: usize,
    /// Total live resources, always `idle + borrowed`
    pub size: usize,
    /// Configured core size
    pub core_size: usize,
    /// Configured maximum size
    pub max_size: usize,
}

/// Pool taking part in a shared [`Budget`]
pub(crate) trait CapacityWaiter: Send + Sync {
    /// Wake local waiters so they retry reserving capacity
    fn wake(&self);

    /// Destroy one idle resource, giving its slot back to the budget
    fn evict_idle(&self) -> bool;
}

/// Upper bound on live resources shared by several pools
pub(crate) struct Budget {
    limit: usize,
    used: AtomicUsize,
    /// Borrowers blocked on the budget rather than their own pool's limit
    starved: AtomicUsize,
    waiters: Mutex<Vec<Weak<dyn CapacityWaiter>>>,
}

impl Budget {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            starved: AtomicUsize::new(0),
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    fn register(&self, waiter: Weak<dyn CapacityWaiter>) {
        let mut waiters = self.waiters.lock();
        waiters.retain(|w| w.strong_count() > 0);
        waiters.push(waiter);
    }

    fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    fn is_starved(&self) -> bool {
        self.starved.load(Ordering::SeqCst) > 0
    }

    /// Mark a borrower as blocked on the budget until the guard drops
    fn starve(&self) -> StarvedGuard<'_> {
        self.starved.fetch_add(1, Ordering::SeqCst);
        StarvedGuard { budget: self }
    }

    fn members(&self) -> Vec<Arc<dyn CapacityWaiter>> {
        self.waiters.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Give back `count` slots. Must not be called while holding a pool lock.
    fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.used.fetch_sub(count, Ordering::AcqRel);

        for waiter in self.members() {
            waiter.wake();
        }
    }

    /// Destroy an idle resource held by any pool other than `requester`.
    /// Must not be called while holding a pool lock.
    fn evict_for(&self, requester: *const ()) -> bool {
        self.members()
            .iter()
            .filter(|member| Arc::as_ptr(*member) as *const () != requester)
            .any(|member| member.evict_idle())
    }
}

struct StarvedGuard<'a> {
    budget: &'a Budget,
}

impl Drop for StarvedGuard<'_> {
    fn drop(&mut self) {
        self.budget.starved.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Internal pool state
struct PoolState<V> {
    idle: Vec<V>,
    borrowed: usize,
    size: usize,
    waiting: usize,
    closed: bool,
}

struct Shared<K, V> {
    key: K,
    config: PoolConfig,
    factory: Arc<dyn Factory<K, V>>,
    balancer: Arc<dyn LoadBalancer<V>>,
    budget: Option<Arc<Budget>>,
    state: Mutex<PoolState<V>>,
    available: Condvar,
}

impl<K, V> Shared<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn try_reserve(&self) -> bool {
        self.budget.as_ref().map_or(true, |b| b.try_acquire())
    }

    fn release_budget(&self, count: usize) {
        if let Some(budget) = &self.budget {
            budget.release(count);
        }
    }

    /// Drop `count` resources from the books and let waiters try to grow
    fn shrink_by(&self, state: &mut PoolState<V>, count: usize) {
        state.size -= count;
        if state.waiting > 0 {
            self.available.notify_all();
        }
    }

    fn destroy_all(&self, resources: Vec<V>) {
        for resource in resources {
            self.factory.destroy(&self.key, resource);
        }
    }

    fn checkin(&self, resource: V) {
        let valid = self.factory.is_valid(&self.key, &resource);

        let mut state = self.state.lock();
        state.borrowed -= 1;
        // Read under the lock so a starving borrower's eviction scan sees
        // either this flag's effect or the parked resource
        let yield_slot = state.waiting == 0 && self.budget.as_ref().map_or(false, |b| b.is_starved());
        if valid && !state.closed && !yield_slot {
            state.idle.push(resource);
            self.available.notify_one();
            return;
        }
        self.shrink_by(&mut state, 1);
        drop(state);

        if !valid {
            tracing::debug!("Released resource failed validation, destroying");
        }
        self.release_budget(1);
        self.factory.destroy(&self.key, resource);
    }

    fn discard(&self, resource: V) {
        {
            let mut state = self.state.lock();
            state.borrowed -= 1;
            self.shrink_by(&mut state, 1);
        }
        self.release_budget(1);
        self.factory.destroy(&self.key, resource);
    }

    /// Roll back a slot reserved for a creation that failed
    fn abandon_reservation(&self) {
        {
            let mut state = self.state.lock();
            state.borrowed -= 1;
            self.shrink_by(&mut state, 1);
        }
        self.release_budget(1);
    }

    fn close(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let drained = std::mem::take(&mut state.idle);
            state.size -= drained.len();
            self.available.notify_all();
            drained
        };

        let count = drained.len();
        self.release_budget(count);
        self.destroy_all(drained);
        tracing::debug!(destroyed = count, "Pool closed");
        count
    }

    fn reclaim(&self) -> usize {
        let excess = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let count = state
                .idle
                .len()
                .min(state.size.saturating_sub(self.config.core_size));
            // Oldest returns sit at the front
            let excess: Vec<V> = state.idle.drain(..count).collect();
            self.shrink_by(&mut state, count);
            excess
        };

        let count = excess.len();
        self.release_budget(count);
        self.destroy_all(excess);
        if count > 0 {
            tracing::debug!(reclaimed = count, "Reclaimed idle resources");
        }
        count
    }

    fn ensure_core(&self) -> Result<usize> {
        let mut created = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if state.size >= self.config.core_size || !self.try_reserve() {
                    return Ok(created);
                }
                state.size += 1;
                state.borrowed += 1;
            }

            match self.factory.create(&self.key) {
                Ok(resource) => {
                    self.checkin(resource);
                    created += 1;
                }
                Err(e) => {
                    self.abandon_reservation();
                    tracing::warn!("Failed to pre-create pooled resource: {}", e);
                    return Err(PoolError::Create(e));
                }
            }
        }
    }
}

impl<K, V> CapacityWaiter for Shared<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn wake(&self) {
        let state = self.state.lock();
        if state.waiting > 0 {
            self.available.notify_all();
        }
    }

    fn evict_idle(&self) -> bool {
        let resource = {
            let mut state = self.state.lock();
            if state.closed || state.idle.is_empty() {
                return false;
            }
            let resource = state.idle.remove(0);
            self.shrink_by(&mut state, 1);
            resource
        };

        tracing::debug!("Evicted idle resource to free shared capacity");
        self.release_budget(1);
        self.factory.destroy(&self.key, resource);
        true
    }
}

impl<K, V> Maintain for Shared<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn maintain(&self) -> bool {
        if self.state.lock().closed {
            return false;
        }
        self.reclaim();
        if let Err(e) = self.ensure_core() {
            tracing::warn!("Pool maintenance could not restore core size: {}", e);
        }
        true
    }
}

/// Bounded pool of resources for a single key.
///
/// Resources are lent out as [`Lease`]s. A lease goes back to the pool when
/// it is released, is destroyed when invalidated, and is returned
/// automatically when dropped (or invalidated, if dropped while the thread
/// is panicking).
///
/// # Example
///
/// ```
/// use rust_pool_system::pooling::{factory_fn, Pool, PoolConfig};
/// use std::sync::Arc;
///
/// let factory = Arc::new(factory_fn(|key: &&str| Ok::<_, std::io::Error>(format!("{}-conn", key))));
/// let pool = Pool::new("db", factory, PoolConfig::new().with_max_size(2)).unwrap();
///
/// let lease = pool.borrow().unwrap().unwrap();
/// assert_eq!(&*lease, "db-conn");
/// pool.release(lease).unwrap();
/// assert_eq!(pool.stats().idle, 1);
/// ```
pub struct Pool<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Pool<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create a pool using round-robin idle selection
    pub fn new(key: K, factory: Arc<dyn Factory<K, V>>, config: PoolConfig) -> Result<Self> {
        Self::with_load_balancer(key, factory, config, Arc::new(default_load_balancer()))
    }

    /// Create a pool with a custom idle-selection strategy
    pub fn with_load_balancer(
        key: K,
        factory: Arc<dyn Factory<K, V>>,
        config: PoolConfig,
        balancer: Arc<dyn LoadBalancer<V>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(key, factory, config, balancer, None))
    }

    pub(crate) fn assemble(
        key: K,
        factory: Arc<dyn Factory<K, V>>,
        config: PoolConfig,
        balancer: Arc<dyn LoadBalancer<V>>,
        budget: Option<Arc<Budget>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            key,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max_size),
                borrowed: 0,
                size: 0,
                waiting: 0,
                closed: false,
            }),
            config,
            factory,
            balancer,
            budget,
            available: Condvar::new(),
        });

        if let Some(budget) = &shared.budget {
            let weak = Arc::downgrade(&shared);
            let waiter: Weak<dyn CapacityWaiter> = weak;
            budget.register(waiter);
        }

        Self { shared }
    }

    /// Key this pool creates resources for
    pub fn key(&self) -> &K {
        &self.shared.key
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            idle: state.idle.len(),
            borrowed: state.borrowed,
            size: state.size,
            core_size: self.shared.config.core_size,
            max_size: self.shared.config.max_size,
        }
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Borrow without blocking.
    ///
    /// Returns `Ok(None)` when nothing is idle and the pool is at capacity.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closed`] once the pool is closed, [`PoolError::Create`]
    /// when the factory fails to grow the pool.
    pub fn borrow(&self) -> Result<Option<Lease<K, V>>> {
        self.acquire(None)
    }

    /// Borrow, waiting up to `timeout` for a resource to come free.
    ///
    /// Returns `Ok(None)` when the timeout elapses first.
    pub fn borrow_timeout(&self, timeout: Duration) -> Result<Option<Lease<K, V>>> {
        // Overflowing deadlines wait forever in practice
        let deadline = Instant::now().checked_add(timeout);
        match deadline {
            Some(deadline) => self.acquire(Some(deadline)),
            None => self.acquire(Some(Instant::now() + Duration::from_secs(u32::MAX as u64))),
        }
    }

    /// Borrow using the configured default timeout
    pub fn borrow_default(&self) -> Result<Option<Lease<K, V>>> {
        self.borrow_timeout(self.shared.config.borrow_timeout)
    }

    fn acquire(&self, deadline: Option<Instant>) -> Result<Option<Lease<K, V>>> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let mut expired = false;
        let mut starving = None;
        let mut scanned = false;

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(index) = shared.balancer.select_index(&state.idle) {
                let resource = state.idle.remove(index);
                state.borrowed += 1;
                return Ok(Some(Lease::new(resource, Arc::clone(shared))));
            }

            let below_max = state.size < shared.config.max_size;
            if below_max && shared.try_reserve() {
                drop(starving);
                state.size += 1;
                state.borrowed += 1;
                drop(state);
                return self.create_leased().map(Some);
            }

            // Only a shared budget can refuse below max_size
            match shared.budget.as_deref().filter(|_| below_max) {
                Some(budget) => {
                    // Announced before scanning so returns elsewhere yield
                    // their slot instead of parking it
                    if starving.is_none() {
                        starving = Some(budget.starve());
                    }
                    if !scanned {
                        scanned = true;
                        drop(state);
                        budget.evict_for(Arc::as_ptr(shared) as *const ());
                        state = shared.state.lock();
                        // Capacity may have been freed while unlocked
                        continue;
                    }
                }
                None => starving = None,
            }

            let deadline = match deadline {
                Some(deadline) if !expired => deadline,
                _ => return Ok(None),
            };

            state.waiting += 1;
            expired = shared.available.wait_until(&mut state, deadline).timed_out();
            state.waiting -= 1;
            scanned = false;
        }
    }

    fn create_leased(&self) -> Result<Lease<K, V>> {
        match self.shared.factory.create(&self.shared.key) {
            Ok(resource) => {
                tracing::debug!("Created pooled resource");
                Ok(Lease::new(resource, Arc::clone(&self.shared)))
            }
            Err(e) => {
                self.shared.abandon_reservation();
                tracing::warn!("Failed to create pooled resource: {}", e);
                Err(PoolError::Create(e))
            }
        }
    }

    /// Return a borrowed resource to idle.
    ///
    /// # Errors
    ///
    /// [`PoolError::ForeignLease`] if the lease came from another pool; the
    /// lease still goes back to the pool that issued it.
    pub fn release(&self, lease: Lease<K, V>) -> Result<()> {
        self.check_owner(&lease)?;
        lease.release();
        Ok(())
    }

    /// Destroy a borrowed resource instead of returning it
    pub fn invalidate(&self, lease: Lease<K, V>) -> Result<()> {
        self.check_owner(&lease)?;
        lease.invalidate();
        Ok(())
    }

    fn check_owner(&self, lease: &Lease<K, V>) -> Result<()> {
        if Arc::ptr_eq(&self.shared, &lease.pool) {
            Ok(())
        } else {
            Err(PoolError::ForeignLease)
        }
    }

    pub(crate) fn owns(&self, lease: &Lease<K, V>) -> bool {
        Arc::ptr_eq(&self.shared, &lease.pool)
    }

    /// Destroy idle resources while the pool is above its core size.
    ///
    /// Returns the number of resources destroyed.
    pub fn reclaim(&self) -> usize {
        self.shared.reclaim()
    }

    /// Create idle resources until the pool reaches its core size.
    ///
    /// Returns the number of resources created.
    pub fn ensure_core(&self) -> Result<usize> {
        self.shared.ensure_core()
    }

    /// Close the pool, destroying idle resources and failing all waiters.
    ///
    /// Resources still borrowed are destroyed when they are returned.
    /// Returns the number of resources destroyed now.
    pub fn close(&self) -> usize {
        self.shared.close()
    }

    /// Run reclamation every `interval` on the given runtime
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConstruction`] for a zero interval.
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

impl<K, V> Drop for Pool<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        let borrowed = self.shared.state.lock().borrowed;
        if borrowed > 0 {
            tracing::warn!(
                "Pool dropped with {} resources still borrowed; they will be destroyed on return",
                borrowed
            );
        }
        self.shared.close();
    }
}

/// A borrowed resource.
///
/// Dereferences to the resource. Hand it back with [`Lease::release`] or
/// [`Lease::invalidate`]; dropping it releases it, or invalidates it when the
/// thread is unwinding from a panic.
pub struct Lease<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    resource: Option<V>,
    pool: Arc<Shared<K, V>>,
}

impl<K, V> Lease<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn new(resource: V, pool: Arc<Shared<K, V>>) -> Self {
        Self {
            resource: Some(resource),
            pool,
        }
    }

    /// Key of the pool that issued this lease
    pub fn key(&self) -> &K {
        &self.pool.key
    }

    /// Return the resource to idle
    pub fn release(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.checkin(resource);
        }
    }

    /// Mark the resource broken; it is destroyed and never handed out again
    pub fn invalidate(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.discard(resource);
        }
    }
}

impl<K, V> std::ops::Deref for Lease<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    type Target = V;

    fn deref(&self) -> &Self::Target {
        // Invariant: resource is Some until release/invalidate/drop consume the lease
        self.resource
            .as_ref()
            .expect("Lease invariant violated: resource is None before Drop")
    }
}

impl<K, V> std::ops::DerefMut for Lease<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .expect("Lease invariant violated: resource is None before Drop")
    }
}

impl<K, V> std::fmt::Debug for Lease<K, V>
where
    K: Send + Sync + std::fmt::Debug + 'static,
    V: Send + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.pool.key)
            .field("resource", &self.resource)
            .finish()
    }
}

impl<K, V> Drop for Lease<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if std::thread::panicking() {
                self.pool.discard(resource);
            } else {
                self.pool.checkin(resource);
            }
        }
    }
}
