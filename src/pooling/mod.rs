//! Resource pools, load balancing and pooled execution

pub mod builder;
pub mod executing_pool;
pub mod factory;
pub mod keyed_pool;
pub mod load_balancer;
mod maintenance;
pub mod pool;

pub use builder::PoolBuilder;
pub use executing_pool::{Disposition, ExecutingPool};
pub use factory::{factory_fn, Factory, FnFactory};
pub use keyed_pool::{KeySupplier, KeyedPool, KeyedPoolConfig, UnknownKeyPolicy};
pub use load_balancer::{
    default_load_balancer, ForwardingLoadBalancer, LoadBalancer, MaxLoadBalancer,
    RandomLoadBalancer, RoundRobinLoadBalancer,
};
pub use pool::{Lease, Pool, PoolConfig, PoolStats};
