use std::future::Future;
use std::time::Duration;

use builder_core::{BuildLogger, BuilderError, BuilderResult, LogStatus};
use tracing::warn;

/// 重试不会改变结果的错误
fn is_permanent(error: &BuilderError) -> bool {
    matches!(
        error,
        BuilderError::InvalidTaskParams(_)
            | BuilderError::UnknownTaskType(_)
            | BuilderError::Cancelled
            | BuilderError::RegistryWriteDisabled
            | BuilderError::ImageAuthRequired(_)
            | BuilderError::SourceAuthRequired(_)
            | BuilderError::SourceAuthFailed { .. }
            | BuilderError::SpecificationViolation(_)
    )
}

/// 执行 `op`，失败后最多再重试 `max_retries` 次
pub async fn with_retries<T, F, Fut>(
    max_retries: u32,
    delay: Duration,
    what: &str,
    logger: &dyn BuildLogger,
    mut op: F,
) -> BuilderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BuilderResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && !is_permanent(&e) => {
                attempt += 1;
                warn!(what, attempt, error = %e, "操作失败，准备重试");
                logger
                    .info(
                        &format!("{what}失败，第 {attempt} 次重试"),
                        "retry",
                        LogStatus::None,
                    )
                    .await;
                tokio::time::sleep(delay * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder_testing_utils::RecordingLogger;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_surfaces_error_after_retries() {
        let logger = RecordingLogger::new("e1");
        let calls = AtomicU32::new(0);
        let result: BuilderResult<()> = with_retries(2, Duration::ZERO, "拉取镜像", &logger, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BuilderError::ImageNotFound("a:1".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(BuilderError::ImageNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(logger.lines().len(), 2);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let logger = RecordingLogger::new("e1");
        let calls = AtomicU32::new(0);
        let value = with_retries(2, Duration::ZERO, "推送镜像", &logger, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(BuilderError::Network("reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let logger = RecordingLogger::new("e1");
        let calls = AtomicU32::new(0);
        let result: BuilderResult<()> = with_retries(2, Duration::ZERO, "拉取镜像", &logger, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BuilderError::ImageAuthRequired("private/app".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
