use crate::utils::error::BookingError;
use std::time::Duration;
use tokio::time::sleep;

/// 有上限的指數退避，只重試 `is_retryable()` 的錯誤
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
        }
    }

    /// 不重試
    pub fn none() -> Self {
        Self::new(1, 1, 1)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, BookingError>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, BookingError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.next_delay(attempt);
                    tracing::warn!(
                        "🔁 Attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        err,
                        delay
                    );
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 200, 2_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
    }

    #[test]
    fn next_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 500);
        let delays: Vec<_> = (0..5).map(|attempt| policy.next_delay(attempt)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500));
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_unavailable_storage_until_success() {
        let policy = RetryPolicy::new(3, 1, 1);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result = policy
            .retry(|_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BookingError::StorageUnavailable {
                            message: "connection refused".into(),
                        })
                    } else {
                        Ok("committed")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "committed");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_conflicts() {
        let policy = RetryPolicy::new(5, 1, 1);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<(), BookingError> = policy
            .retry(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BookingError::Conflict {
                        dietitian: "D1".into(),
                        date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                        time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    })
                }
            })
            .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2, 1, 1);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<(), BookingError> = policy
            .retry(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BookingError::StorageUnavailable {
                        message: "down".into(),
                    })
                }
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
