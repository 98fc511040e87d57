//! Borrow, run, return: retry-aware execution against pooled resources

use crate::error::{ExecuteError, PoolError};
use crate::pooling::keyed_pool::KeyedPool;
use crate::retry::{RetryContext, Retryer};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happens to a resource whose operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The failure had nothing to do with the resource; put it back
    Release,
    /// The resource is suspect; destroy it
    Invalidate,
}

/// Failure of a single attempt
enum Failure<E> {
    Pool(PoolError),
    Operation(E),
}

impl<E> Failure<E> {
    fn into_error(self, attempts: u32) -> ExecuteError<E> {
        match self {
            Failure::Pool(e) => ExecuteError::Pool(e),
            Failure::Operation(source) => ExecuteError::Operation { attempts, source },
        }
    }
}

/// Runs caller operations against resources from a [`KeyedPool`].
///
/// Every attempt releases or invalidates the resource it borrowed exactly
/// once, including when the operation panics (the resource is then
/// invalidated as the panic unwinds).
///
/// # Example
///
/// ```
/// use rust_pool_system::pooling::{factory_fn, ExecutingPool, KeyedPool, KeyedPoolConfig};
/// use rust_pool_system::retry::exponential_backoff;
/// use std::sync::Arc;
///
/// let factory = Arc::new(factory_fn(|key: &String| Ok::<_, std::io::Error>(vec![key.clone()])));
/// let pool = KeyedPool::new(factory, KeyedPoolConfig::default()).unwrap();
/// let executor = ExecutingPool::new(pool, exponential_backoff(3));
///
/// let len = executor
///     .execute(&"orders".to_string(), |conn| Ok::<_, std::io::Error>(conn.len()))
///     .unwrap();
/// assert_eq!(len, 1);
/// ```
pub struct ExecutingPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    pool: Arc<KeyedPool<K, V>>,
    retryer: Arc<dyn Retryer>,
    borrow_timeout: Duration,
}

impl<K, V> ExecutingPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create an executing pool borrowing with the pool's configured timeout
    pub fn new<R: Retryer + 'static>(pool: KeyedPool<K, V>, retryer: R) -> Self {
        let borrow_timeout = pool.config().borrow_timeout;
        Self {
            pool: Arc::new(pool),
            retryer: Arc::new(retryer),
            borrow_timeout,
        }
    }

    /// Create from a shared pool and retryer
    pub fn from_shared(pool: Arc<KeyedPool<K, V>>, retryer: Arc<dyn Retryer>) -> Self {
        let borrow_timeout = pool.config().borrow_timeout;
        Self {
            pool,
            retryer,
            borrow_timeout,
        }
    }

    /// Set how long each attempt waits for a resource
    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// The underlying keyed pool
    pub fn pool(&self) -> &Arc<KeyedPool<K, V>> {
        &self.pool
    }

    /// Run `operation` against a resource for `key`.
    ///
    /// A failed resource is treated as suspect and invalidated. Use
    /// [`execute_with`](Self::execute_with) to keep resources whose failures
    /// are unrelated to the resource itself.
    pub fn execute<T, E, F>(&self, key: &K, operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(&mut V) -> Result<T, E>,
        E: std::fmt::Display,
    {
        self.execute_with(key, operation, |_| Disposition::Invalidate)
    }

    /// Run `operation`, letting `classify` decide what happens to a resource
    /// whose operation failed.
    ///
    /// # Errors
    ///
    /// [`ExecuteError::Pool`] when no resource could be borrowed (closed pool,
    /// unknown key, or creation failures/timeouts once retries run out);
    /// [`ExecuteError::Operation`] carrying the last cause when the operation
    /// failed on every attempt the retryer allowed.
    pub fn execute_with<T, E, F, C>(
        &self,
        key: &K,
        mut operation: F,
        classify: C,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(&mut V) -> Result<T, E>,
        C: Fn(&E) -> Disposition,
        E: std::fmt::Display,
    {
        let pool = self
            .pool
            .pool(key)?
            .ok_or_else(|| PoolError::invalid_key(format!("{:?}", key)))?;

        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let failure = match pool.borrow_timeout(self.borrow_timeout) {
                Ok(Some(mut lease)) => match operation(&mut *lease) {
                    Ok(value) => {
                        lease.release();
                        return Ok(value);
                    }
                    Err(e) => {
                        match classify(&e) {
                            Disposition::Release => lease.release(),
                            Disposition::Invalidate => lease.invalidate(),
                        }
                        Failure::Operation(e)
                    }
                },
                Ok(None) => Failure::Pool(PoolError::Timeout(self.borrow_timeout)),
                Err(e) if e.is_transient() => Failure::Pool(e),
                Err(e) => return Err(ExecuteError::Pool(e)),
            };

            let ctx = RetryContext {
                attempt,
                elapsed: started.elapsed(),
            };
            match self.retryer.next_delay(&ctx) {
                Some(delay) => {
                    match &failure {
                        Failure::Pool(e) => {
                            tracing::warn!(key = ?key, attempt, "Borrow failed, retrying in {:?}: {}", delay, e)
                        }
                        Failure::Operation(e) => {
                            tracing::warn!(key = ?key, attempt, "Operation failed, retrying in {:?}: {}", delay, e)
                        }
                    }
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                None => {
                    tracing::debug!(key = ?key, attempts = attempt, "Giving up after retries");
                    return Err(failure.into_error(attempt));
                }
            }
        }
    }

    /// Close the underlying pool
    pub fn close(&self) -> usize {
        self.pool.close()
    }
}
