//! Background maintenance tests

use rust_pool_system::pooling::Factory;
use rust_pool_system::{FactoryError, KeyedPool, KeyedPoolConfig, Pool, PoolBuilder, PoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Default)]
struct CountingFactory {
    live: AtomicUsize,
}

impl Factory<u32, u32> for CountingFactory {
    fn create(&self, key: &u32) -> Result<u32, FactoryError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(*key)
    }

    fn destroy(&self, _key: &u32, _resource: u32) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pool_maintenance_shrinks_to_core() {
    let factory = Arc::new(CountingFactory::default());
    let pool = Arc::new(
        Pool::<u32, u32>::new(7, factory.clone(), PoolConfig::new().with_core_size(1).with_max_size(4)).unwrap(),
    );

    let leases: Vec<_> = (0..4).map(|_| pool.borrow().unwrap().unwrap()).collect();
    for lease in leases {
        pool.release(lease).unwrap();
    }
    assert_eq!(pool.stats().idle, 4);

    let task = pool
        .start_maintenance(&Handle::current(), Duration::from_millis(20))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.stats().size, 1);
    assert_eq!(factory.live.load(Ordering::SeqCst), 1);

    pool.close();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("maintenance task did not stop")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_keyed_maintenance_restores_core() {
    let factory = Arc::new(CountingFactory::default());
    let pool = KeyedPool::<u32, u32>::new(
        factory.clone(),
        KeyedPoolConfig::new().with_core_size_per_key(2).with_max_size_per_key(4),
    )
    .unwrap();

    let lease = pool.borrow(&1).unwrap().unwrap();
    pool.invalidate(lease).unwrap();
    assert_eq!(pool.size(), 0);

    let _task = pool
        .start_maintenance(&Handle::current(), Duration::from_millis(20))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.stats()[&1].idle, 2);
    assert_eq!(pool.size(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_maintenance_stops_when_pool_dropped() {
    let factory = Arc::new(CountingFactory::default());
    let pool = PoolBuilder::<u32, u32>::new()
        .factory(factory.clone())
        .build_keyed_pool()
        .unwrap();
    let task = pool
        .start_maintenance(&Handle::current(), Duration::from_millis(10))
        .unwrap();

    drop(pool);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("maintenance task did not stop")
        .unwrap();
    assert_eq!(factory.live.load(Ordering::SeqCst), 0);
}
