//! Rust Pool System
//!
//! Thread-safe generic resource pooling for Rust.
//!
//! ## Features
//!
//! - Bounded pools with blocking borrow and deadline-based waits
//! - Keyed pools with lazily created per-key sub-pools under a global limit
//! - Pluggable selection of idle resources (round robin, max, random, forwarding)
//! - Executing pools that borrow, run and return with configurable retry
//! - Background reclamation on a tokio runtime
//!
//! ## Example
//!
//! ```
//! use rust_pool_system::pooling::{factory_fn, KeyedPool, KeyedPoolConfig};
//! use rust_pool_system::{ExecutingPool, FixedRetryer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let factory = factory_fn(|host: &String| Ok::<_, std::io::Error>(format!("conn:{host}")));
//! let pool = KeyedPool::new(Arc::new(factory), KeyedPoolConfig::default()).unwrap();
//! let executor = ExecutingPool::new(pool, FixedRetryer::new(3, Duration::from_millis(10)));
//!
//! let reply = executor
//!     .execute(&"db1".to_string(), |conn| Ok::<_, std::io::Error>(conn.len()))
//!     .unwrap();
//! assert_eq!(reply, 11);
//! ```

pub mod error;
pub mod pooling;
pub mod retry;
pub mod util;

// Re-export main types
pub use error::{ExecuteError, FactoryError, PoolError, Result};
pub use pooling::{
    default_load_balancer, factory_fn, Disposition, ExecutingPool, Factory, ForwardingLoadBalancer,
    KeySupplier, KeyedPool, KeyedPoolConfig, Lease, LoadBalancer, MaxLoadBalancer, Pool,
    PoolBuilder, PoolConfig, PoolStats, RandomLoadBalancer, RoundRobinLoadBalancer,
    UnknownKeyPolicy,
};
pub use retry::{
    exponential_backoff, ExponentialBackoffRetryer, FixedRetryer, NoRetry, RetryContext, Retryer,
};
pub use util::LongCounter;
