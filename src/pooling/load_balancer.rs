//! Load balancing strategies for choosing among candidates

use crate::error::{PoolError, Result};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Strategy selecting one element from a list of candidates.
///
/// Implementations never mutate the candidate list and must tolerate
/// concurrent calls with lists of differing lengths. An empty list always
/// yields `None`.
pub trait LoadBalancer<T>: Send + Sync {
    /// Select one candidate
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T>;

    /// Select one candidate and report its position in `candidates`
    fn select_index(&self, candidates: &[T]) -> Option<usize> {
        let chosen = self.select(candidates)?;
        candidates.iter().position(|c| std::ptr::eq(c, chosen))
    }
}

impl<T, B: LoadBalancer<T> + ?Sized> LoadBalancer<T> for Arc<B> {
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T> {
        (**self).select(candidates)
    }

    fn select_index(&self, candidates: &[T]) -> Option<usize> {
        (**self).select_index(candidates)
    }
}

impl<T, B: LoadBalancer<T> + ?Sized> LoadBalancer<T> for Box<B> {
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T> {
        (**self).select(candidates)
    }

    fn select_index(&self, candidates: &[T]) -> Option<usize> {
        (**self).select_index(candidates)
    }
}

/// The load balancer used when none is configured (round robin)
pub fn default_load_balancer() -> RoundRobinLoadBalancer {
    RoundRobinLoadBalancer::new()
}

/// Round-robin selection over whatever list is passed in.
///
/// The position is shared by every caller and taken modulo the list length
/// at call time, so it stays in bounds when the list grows or shrinks
/// between calls.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    position: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    /// Create a round-robin balancer starting at the first element
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a round-robin balancer starting at `position`
    pub fn starting_at(position: usize) -> Self {
        Self {
            position: AtomicUsize::new(position),
        }
    }
}

impl<T> LoadBalancer<T> for RoundRobinLoadBalancer {
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        // fetch_add wraps on overflow
        let index = self.position.fetch_add(1, Ordering::Relaxed);
        candidates.get(index % candidates.len())
    }

    fn select_index(&self, candidates: &[T]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.position.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }
}

type Comparator<T> = dyn Fn(&T, &T) -> CmpOrdering + Send + Sync;

/// Selects the greatest candidate by a total ordering.
///
/// Ties go to the candidate that appears first.
pub struct MaxLoadBalancer<T> {
    ordering: Arc<Comparator<T>>,
}

impl<T: 'static> MaxLoadBalancer<T> {
    /// Create from an ordering that may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConstruction`] when `ordering` is `None`.
    pub fn try_new<F>(ordering: Option<F>) -> Result<Self>
    where
        F: Fn(&T, &T) -> CmpOrdering + Send + Sync + 'static,
    {
        match ordering {
            Some(f) => Ok(Self::by(f)),
            None => Err(PoolError::invalid_construction(
                "MaxLoadBalancer requires an ordering",
            )),
        }
    }

    /// Create from a comparison function
    pub fn by<F>(ordering: F) -> Self
    where
        F: Fn(&T, &T) -> CmpOrdering + Send + Sync + 'static,
    {
        Self {
            ordering: Arc::new(ordering),
        }
    }

    /// Create ordering candidates by a derived key
    pub fn by_key<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::by(move |a, b| key(a).cmp(&key(b)))
    }
}

impl<T: Ord + 'static> MaxLoadBalancer<T> {
    /// Create using the natural ordering of `T`
    pub fn natural() -> Self {
        Self::by(T::cmp)
    }
}

impl<T> Clone for MaxLoadBalancer<T> {
    fn clone(&self) -> Self {
        Self {
            ordering: Arc::clone(&self.ordering),
        }
    }
}

impl<T> std::fmt::Debug for MaxLoadBalancer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxLoadBalancer").finish_non_exhaustive()
    }
}

impl<T> LoadBalancer<T> for MaxLoadBalancer<T> {
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T> {
        let mut iter = candidates.iter();
        let first = iter.next()?;
        // Iterator::max_by keeps the last of equal elements; only replace on strictly greater
        Some(iter.fold(first, |best, candidate| {
            if (self.ordering)(candidate, best) == CmpOrdering::Greater {
                candidate
            } else {
                best
            }
        }))
    }
}

/// Uniform random selection
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    /// Create a random balancer
    pub fn new() -> Self {
        Self
    }
}

impl<T> LoadBalancer<T> for RandomLoadBalancer {
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T> {
        use rand::seq::SliceRandom;
        candidates.choose(&mut rand::thread_rng())
    }
}

/// Delegates every selection to an inner strategy.
///
/// Carries no selection state of its own; it exists so cross-cutting
/// behavior can be layered over any strategy. Each selection is reported at
/// `trace` level.
#[derive(Debug, Clone, Default)]
pub struct ForwardingLoadBalancer<B> {
    inner: B,
}

impl<B> ForwardingLoadBalancer<B> {
    /// Wrap `inner`
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// The strategy selections are delegated to
    pub fn delegate(&self) -> &B {
        &self.inner
    }

    /// Unwrap the inner strategy
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<T, B: LoadBalancer<T>> LoadBalancer<T> for ForwardingLoadBalancer<B> {
    fn select<'a>(&self, candidates: &'a [T]) -> Option<&'a T> {
        let selected = self.inner.select(candidates);
        tracing::trace!(
            candidates = candidates.len(),
            selected = selected.is_some(),
            "load balancer selection"
        );
        selected
    }

    fn select_index(&self, candidates: &[T]) -> Option<usize> {
        let selected = self.inner.select_index(candidates);
        tracing::trace!(
            candidates = candidates.len(),
            index = ?selected,
            "load balancer selection"
        );
        selected
    }
}
