//! Bridge for running async work from the synchronous dispatch path.
//!
//! The merge engine is strictly synchronous, while the HTTP client is async.
//! Dispatchers call [`block_on_future`] to drive one request to completion.

use anyhow::anyhow;
use std::future::Future;
use tokio::{runtime::Handle, task};

/// Execute an async future from synchronous code.
///
/// Reuses the current Tokio runtime when called from inside one (which must be
/// multi-threaded, since the current worker is parked with `block_in_place`),
/// and otherwise spins up a single-threaded runtime for the call.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| anyhow!("could not start async runtime: {error}"))?
            .block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::block_on_future;

    #[test]
    fn runs_future_outside_of_a_runtime() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>(41 + 1) }).expect("future result");
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reuses_the_current_multi_threaded_runtime() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>("inside") }).expect("future result");
        assert_eq!(value, "inside");
    }
}
