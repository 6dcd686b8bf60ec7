//! Ordered delivery fallback, as a named primitive: fold a list of steps
//! left-to-right, advancing on failure, stopping at the first success. Only
//! the last attempted step's error propagates; earlier failures are logged
//! and counted, nothing more.

use std::future::Future;

use metrics::counter;

/// Run `attempt` over `steps` in order. Returns the first success together
/// with the step that produced it.
pub async fn run_fallback<S, F, Fut, T, E>(steps: &[S], mut attempt: F) -> Result<(T, &S), E>
where
    S: std::fmt::Debug,
    F: FnMut(&S) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    debug_assert!(!steps.is_empty(), "fallback chain must have at least one step");
    let mut last_err: Option<E> = None;
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            counter!("delivery_fallback_advances_total").increment(1);
        }
        match attempt(step).await {
            Ok(v) => return Ok((v, step)),
            Err(e) => {
                tracing::warn!(step = ?step, error = %e, "delivery step failed, advancing");
                last_err = Some(e);
            }
        }
    }
    // Non-empty chain guaranteed by construction; the last error is present.
    Err(last_err.expect("fallback chain ran with no steps"))
}
