//! Background maintenance scheduling

use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Something that can be periodically tidied up
pub(crate) trait Maintain: Send + Sync {
    /// Run one maintenance pass; returns `false` once there is nothing left
    /// to maintain (the target was closed)
    fn maintain(&self) -> bool;
}

/// Spawn a task on `handle` that calls [`Maintain::maintain`] every `interval`.
///
/// The task holds only a weak reference and stops by itself when the target
/// is dropped or closed. Passes run on the blocking thread pool since
/// factories are synchronous.
pub(crate) fn spawn_maintenance<T>(handle: &Handle, target: Weak<T>, interval: Duration) -> JoinHandle<()>
where
    T: Maintain + 'static,
{
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(target) = target.upgrade() else {
                break;
            };

            match tokio::task::spawn_blocking(move || target.maintain()).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::error!("Pool maintenance pass failed: {}", e);
                    break;
                }
            }
        }

        tracing::debug!("Pool maintenance stopped");
    })
}
