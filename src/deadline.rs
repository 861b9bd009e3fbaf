use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppError, AppResult};

/// Point in time by which a unit of work must finish. Created once at the
/// edge (an inbound request, one bus event) and handed down to every
/// blocking collaborator call so a slow store, bus or status API cannot
/// stall the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Runs `fut` to completion unless the deadline passes first, in which
    /// case the work is dropped and reported as a retryable infra failure.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, "deadline exceeded");
                Err(AppError::InfraFailure(format!(
                    "{operation} exceeded its deadline"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_budget() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = deadline.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collaborator_becomes_infra_failure() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let err = deadline
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .expect_err("should time out");
        assert!(err.is_retryable());
        assert!(deadline.is_expired());
    }
}
