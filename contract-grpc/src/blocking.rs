//! Sync-over-async.
//!
//! Blocking a thread on an asynchronous call is a known hazard: on a single-threaded runtime
//! it deadlocks because the call can never make progress. [`block_on`] therefore refuses to
//! run on a current-thread runtime, uses `block_in_place` on a multi-threaded one, and spins
//! up a private runtime when called outside of tokio.
use std::future::Future;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};

#[derive(Debug, thiserror::Error)]
pub enum BlockingError {
    #[error("Cannot block on a call from a current-thread runtime, it would deadlock")]
    CurrentThreadRuntime,
    #[error("Failed to start a runtime for a blocking call: {0}")]
    Runtime(#[source] std::io::Error),
}

pub fn block_on<F>(future: F) -> Result<F::Output, BlockingError>
where
    F: Future,
{
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(BlockingError::CurrentThreadRuntime),
            _ => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        },
        Err(_) => {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(BlockingError::Runtime)?;
            Ok(runtime.block_on(future))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_runtime() {
        assert_eq!(block_on(async { 40 + 2 }).unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inside_multi_thread_runtime() {
        assert_eq!(block_on(async { "done" }).unwrap(), "done");
    }

    #[tokio::test]
    async fn test_refuses_current_thread_runtime() {
        assert!(matches!(
            block_on(async {}),
            Err(BlockingError::CurrentThreadRuntime)
        ));
    }
}
