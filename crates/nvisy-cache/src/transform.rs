//! Optimistic read-modify-write on a single key.
//!
//! A transform reads the current value with its revision token, applies a
//! pure function to it, and writes the result back with compare-and-set (or
//! add-if-absent when there was no value). A lost race re-reads and re-applies
//! the function; the loop ends on the first successful write, on an error, or
//! when the deadline passes. Every store call is bounded by the time left
//! until the deadline.

use std::time::Duration;

use tokio::time::Instant;

use crate::{Cache, Codec, Error, Result, TRACING_TARGET_CACHE};

/// Outcome of a successful transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed<T> {
    /// Value the winning attempt read, `None` if the key was absent.
    pub old: Option<T>,
    /// Value the winning attempt wrote.
    pub new: T,
}

impl<T, C> Cache<T, C>
where
    T: Send + Sync + 'static,
    C: Codec<T>,
{
    /// Applies `mutate` to the value under `key` and returns the new value.
    ///
    /// The whole loop, retries included, is bounded by the configured
    /// operation timeout.
    #[tracing::instrument(skip(self, mutate), target = TRACING_TARGET_CACHE)]
    pub async fn transform_and_get<F>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        mutate: F,
    ) -> Result<T>
    where
        F: Fn(Option<&T>) -> T,
    {
        let deadline = Instant::now() + self.timeout();
        Ok(self.transform(key, ttl, deadline, mutate).await?.new)
    }

    /// Applies `mutate` to the value under `key` and returns the value it
    /// replaced, `None` if the key was absent.
    ///
    /// The whole loop, retries included, is bounded by the configured
    /// operation timeout.
    #[tracing::instrument(skip(self, mutate), target = TRACING_TARGET_CACHE)]
    pub async fn get_and_transform<F>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        mutate: F,
    ) -> Result<Option<T>>
    where
        F: Fn(Option<&T>) -> T,
    {
        let deadline = Instant::now() + self.timeout();
        Ok(self.transform(key, ttl, deadline, mutate).await?.old)
    }

    /// Applies `mutate` until a write wins or `deadline` passes.
    ///
    /// `mutate` may run once per attempt and should be free of side effects.
    /// It receives `None` when the key is absent, in which case its result is
    /// written with add-if-absent semantics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] once the deadline has passed, before or
    /// between attempts, without issuing further store calls. Any other store
    /// or codec error ends the loop immediately.
    pub async fn transform<F>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        deadline: Instant,
        mutate: F,
    ) -> Result<Transformed<T>>
    where
        F: Fn(Option<&T>) -> T,
    {
        let remaining = || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                Err(Error::timeout(key))
            } else {
                Ok(remaining)
            }
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let read = match remaining() {
                Ok(timeout) => self.gets_decoded(key, timeout).await?,
                Err(error) => {
                    tracing::debug!(
                        target: TRACING_TARGET_CACHE,
                        key = %key,
                        attempts = attempts - 1,
                        "Transform deadline elapsed"
                    );
                    return Err(error);
                }
            };

            let outcome = match read {
                None => {
                    let new = mutate(None);
                    let bytes = self.encode(key, &new)?;
                    self.add_encoded(key, bytes, ttl, remaining()?)
                        .await?
                        .then(|| Transformed { old: None, new })
                }
                Some((current, token)) => {
                    let new = mutate(Some(&current));
                    let bytes = self.encode(key, &new)?;
                    self.cas_encoded(key, bytes, token, ttl, remaining()?)
                        .await?
                        .then(|| Transformed {
                            old: Some(current),
                            new,
                        })
                }
            };

            if let Some(transformed) = outcome {
                tracing::debug!(
                    target: TRACING_TARGET_CACHE,
                    key = %key,
                    attempts = attempts,
                    created = transformed.old.is_none(),
                    "Transform completed"
                );
                return Ok(transformed);
            }

            tracing::trace!(
                target: TRACING_TARGET_CACHE,
                key = %key,
                attempt = attempts,
                "Transform lost a race, retrying"
            );
            tokio::task::yield_now().await;
        }
    }
}
