//! Racing blocking control calls against deadlines.
//!
//! The driver has no way to abort a call in progress. A call that must
//! respect a deadline runs on the blocking pool; the caller waits for
//! either its completion or the deadline. On expiry the call is abandoned:
//! it keeps running and its result is dropped.

use std::time::Instant;

use tracing::trace;

use crate::core::{Error, Result};

/// Whether `deadline` has already passed.
pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| d <= Instant::now())
}

/// Run `call` on the blocking pool, giving up at `deadline`.
///
/// An already expired deadline fails with [`Error::Timeout`] before anything
/// is dispatched. `None` waits for as long as the call takes.
pub(crate) async fn run_blocking<T, F>(deadline: Option<Instant>, call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if expired(deadline) {
        return Err(Error::Timeout);
    }

    let task = tokio::task::spawn_blocking(call);
    let joined = match deadline {
        Some(deadline) => {
            let deadline = tokio::time::Instant::from_std(deadline);
            match tokio::time::timeout_at(deadline, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    trace!("deadline expired, abandoning control call");
                    return Err(Error::Timeout);
                }
            }
        }
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(Error::Unknown(std::io::Error::other(e))),
    }
}
