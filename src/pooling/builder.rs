//! Assembly of keyed and executing pools

use crate::error::{PoolError, Result};
use crate::pooling::executing_pool::ExecutingPool;
use crate::pooling::factory::Factory;
use crate::pooling::keyed_pool::{KeySupplier, KeyedPool, KeyedPoolConfig, UnknownKeyPolicy};
use crate::pooling::load_balancer::{default_load_balancer, LoadBalancer};
use crate::retry::Retryer;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Builder for [`KeyedPool`] and [`ExecutingPool`].
///
/// Only the factory is required; everything else falls back to
/// [`KeyedPoolConfig::default`] and round-robin selection.
///
/// ```
/// use rust_pool_system::pooling::{factory_fn, PoolBuilder};
/// use rust_pool_system::retry::exponential_backoff;
/// use std::sync::Arc;
///
/// let pool = PoolBuilder::new()
///     .core_pool_size(2)
///     .max_pool_size(8)
///     .core_size_per_key(1)
///     .max_size_per_key(4)
///     .key_supplier(Arc::new(vec!["a".to_string(), "b".to_string()]))
///     .factory(Arc::new(factory_fn(|key: &String| Ok::<_, std::io::Error>(key.len()))))
///     .build_executing_pool(exponential_backoff(10))
///     .unwrap();
///
/// assert_eq!(pool.execute(&"a".to_string(), |n| Ok::<_, std::io::Error>(*n)).unwrap(), 1);
/// ```
pub struct PoolBuilder<K, V> {
    config: KeyedPoolConfig,
    factory: Option<Arc<dyn Factory<K, V>>>,
    supplier: Option<Arc<dyn KeySupplier<K>>>,
    balancer: Option<Arc<dyn LoadBalancer<V>>>,
    key_balancer: Option<Arc<dyn LoadBalancer<K>>>,
    maintenance: Option<(Handle, Duration)>,
}

impl<K, V> Default for PoolBuilder<K, V> {
    fn default() -> Self {
        Self {
            config: KeyedPoolConfig::default(),
            factory: None,
            supplier: None,
            balancer: None,
            key_balancer: None,
            maintenance: None,
        }
    }
}

impl<K, V> PoolBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn with_config(config: KeyedPoolConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Number of supplier keys whose pools are created up front
    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.config.core_size = size;
        self
    }

    /// Maximum number of resources across all keys
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// Core size of each key's pool
    pub fn core_size_per_key(mut self, size: usize) -> Self {
        self.config.core_size_per_key = size;
        self
    }

    /// Maximum size of each key's pool
    pub fn max_size_per_key(mut self, size: usize) -> Self {
        self.config.max_size_per_key = size;
        self
    }

    /// Default time a blocking borrow waits
    pub fn borrow_timeout(mut self, timeout: Duration) -> Self {
        self.config.borrow_timeout = timeout;
        self
    }

    /// Handling of keys the supplier does not list
    pub fn unknown_keys(mut self, policy: UnknownKeyPolicy) -> Self {
        self.config.unknown_keys = policy;
        self
    }

    /// Restrict the pool to the keys `supplier` lists
    pub fn key_supplier(mut self, supplier: Arc<dyn KeySupplier<K>>) -> Self {
        self.supplier = Some(supplier);
        self
    }

    /// Factory creating resources for each key
    pub fn factory(mut self, factory: Arc<dyn Factory<K, V>>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Strategy choosing among idle resources of a key
    pub fn load_balancer(mut self, balancer: Arc<dyn LoadBalancer<V>>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Strategy choosing a key for [`KeyedPool::borrow_any`]
    pub fn key_load_balancer(mut self, balancer: Arc<dyn LoadBalancer<K>>) -> Self {
        self.key_balancer = Some(balancer);
        self
    }

    /// Run reclamation every `interval` on `handle`
    pub fn maintenance(mut self, handle: Handle, interval: Duration) -> Self {
        self.maintenance = Some((handle, interval));
        self
    }

    /// Build a keyed pool
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConstruction`] when no factory was given or the
    /// sizes are inconsistent.
    pub fn build_keyed_pool(self) -> Result<KeyedPool<K, V>> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::invalid_construction("a factory is required"))?;

        let pool = KeyedPool::assemble(
            factory,
            self.config,
            self.supplier,
            self.balancer
                .unwrap_or_else(|| Arc::new(default_load_balancer())),
            self.key_balancer
                .unwrap_or_else(|| Arc::new(default_load_balancer())),
        )?;

        if let Some((handle, interval)) = self.maintenance {
            // The task stops by itself once the pool closes
            drop(pool.start_maintenance(&handle, interval)?);
        }

        Ok(pool)
    }

    /// Build an executing pool retrying with `retryer`
    pub fn build_executing_pool<R: Retryer + 'static>(self, retryer: R) -> Result<ExecutingPool<K, V>> {
        Ok(ExecutingPool::new(self.build_keyed_pool()?, retryer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::factory::factory_fn;
    use crate::pooling::load_balancer::MaxLoadBalancer;
    use crate::retry::NoRetry;

    fn factory() -> Arc<dyn Factory<String, u64>> {
        Arc::new(factory_fn(|key: &String| Ok::<_, std::io::Error>(key.len() as u64)))
    }

    #[test]
    fn test_factory_required() {
        let result = PoolBuilder::<String, u64>::new().build_keyed_pool();
        assert!(matches!(result, Err(PoolError::InvalidConstruction(_))));
    }

    #[test]
    fn test_inconsistent_sizes_rejected() {
        let result = PoolBuilder::new()
            .core_size_per_key(5)
            .max_size_per_key(2)
            .factory(factory())
            .build_keyed_pool();
        assert!(matches!(result, Err(PoolError::InvalidConstruction(_))));
    }

    #[test]
    fn test_builder_applies_settings() {
        let pool = PoolBuilder::new()
            .max_pool_size(3)
            .max_size_per_key(3)
            .core_size_per_key(1)
            .borrow_timeout(Duration::from_millis(20))
            .unknown_keys(UnknownKeyPolicy::Absent)
            .key_supplier(Arc::new(vec!["abc".to_string()]))
            .load_balancer(Arc::new(MaxLoadBalancer::<u64>::natural()))
            .factory(factory())
            .build_keyed_pool()
            .unwrap();

        let config = pool.config();
        assert_eq!(config.max_size, 3);
        assert_eq!(config.borrow_timeout, Duration::from_millis(20));
        assert!(pool.borrow(&"zzz".to_string()).unwrap().is_none());
        assert_eq!(*pool.borrow(&"abc".to_string()).unwrap().unwrap(), 3);
    }

    #[test]
    fn test_build_executing_pool() {
        let pool = PoolBuilder::new()
            .factory(factory())
            .build_executing_pool(NoRetry)
            .unwrap();

        let doubled = pool
            .execute(&"four".to_string(), |n| Ok::<_, std::io::Error>(*n * 2))
            .unwrap();
        assert_eq!(doubled, 8);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_maintenance_interval_must_be_positive() {
        let result = PoolBuilder::new()
            .factory(factory())
            .maintenance(Handle::current(), Duration::ZERO)
            .build_keyed_pool();
        assert!(matches!(result, Err(PoolError::InvalidConstruction(_))));
    }
}
