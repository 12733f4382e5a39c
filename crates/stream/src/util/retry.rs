use std::{future::Future, time::Duration};

use crate::{config::RetryPolicy, util::http::FetchFailure};

/// Run `attempt` until it succeeds, fails fatally, or the policy is exhausted.
///
/// Returns the reason of the last failure.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut attempt: F,
) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchFailure>>,
{
    let attempts = policy.attempts.max(1);
    let mut failed = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(FetchFailure::Fatal(reason)) => {
                tracing::warn!("Fetching {what} failed: {reason}");
                return Err(reason);
            }
            Err(FetchFailure::Transient(reason)) => {
                failed += 1;
                if failed >= attempts {
                    tracing::error!("Fetching {what} failed, max retries exceed. {reason}");
                    return Err(reason);
                }

                let delay: Duration = policy.delay(failed);
                tracing::warn!("Fetching {what} failed, retry in {delay:?}. {reason}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
