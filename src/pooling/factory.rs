//! Resource creation and destruction for pools

use crate::error::FactoryError;
use std::marker::PhantomData;

/// Creates pooled resources for a key.
///
/// Only [`create`](Factory::create) is required. Factories whose resources
/// need explicit teardown override [`destroy`](Factory::destroy); otherwise
/// destroyed resources are simply dropped. Factories that can detect a
/// broken resource cheaply override [`is_valid`](Factory::is_valid), which
/// the pool consults whenever a resource is released back to idle.
pub trait Factory<K, V>: Send + Sync {
    /// Create a new resource for `key`
    fn create(&self, key: &K) -> Result<V, FactoryError>;

    /// Tear down a resource that will never be handed out again
    fn destroy(&self, key: &K, resource: V) {
        let _ = key;
        drop(resource);
    }

    /// Whether a released resource may go back to idle
    fn is_valid(&self, key: &K, resource: &V) -> bool {
        let _ = (key, resource);
        true
    }
}

/// [`Factory`] built from a closure
pub struct FnFactory<F, K, V> {
    create: F,
    _marker: PhantomData<fn(&K) -> V>,
}

/// Wrap a closure as a [`Factory`]
///
/// # Example
///
/// ```
/// use rust_pool_system::pooling::{factory_fn, Factory};
///
/// let factory = factory_fn(|key: &String| Ok::<_, std::io::Error>(format!("conn-{}", key)));
/// assert_eq!(factory.create(&"a".to_string()).unwrap(), "conn-a");
/// ```
pub fn factory_fn<F, K, V, E>(create: F) -> FnFactory<F, K, V>
where
    F: Fn(&K) -> Result<V, E> + Send + Sync,
    E: Into<FactoryError>,
{
    FnFactory {
        create,
        _marker: PhantomData,
    }
}

impl<F, K, V, E> Factory<K, V> for FnFactory<F, K, V>
where
    F: Fn(&K) -> Result<V, E> + Send + Sync,
    E: Into<FactoryError>,
{
    fn create(&self, key: &K) -> Result<V, FactoryError> {
        (self.create)(key).map_err(Into::into)
    }
}
