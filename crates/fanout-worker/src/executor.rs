use fanout_core::{Processor, Task, TaskResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Runs a [`Processor`] on the blocking pool and turns every outcome into a
/// [`TaskResult`]: errors, panics and timeouts all become `Failure`.
pub struct TaskExecutor {
    processor: Arc<dyn Processor>,
    timeout: Duration,
}

impl TaskExecutor {
    pub fn new(processor: Arc<dyn Processor>, timeout: Duration) -> Self {
        TaskExecutor { processor, timeout }
    }

    pub async fn execute(&self, task: &Task) -> TaskResult {
        let processor = self.processor.clone();
        let owned = task.clone();
        let locator = task.locator.clone();

        debug!("Processing {} with timeout {:?}", locator, self.timeout);

        // A timed-out computation keeps its blocking thread until it returns
        let handle = tokio::task::spawn_blocking(move || processor.process(&owned));

        match timeout(self.timeout, handle).await {
            Ok(Ok(Ok(payload))) => match TaskResult::success(locator.clone(), payload) {
                Ok(result) => result,
                Err(e) => {
                    error!("Result for {} rejected: {}", locator, e);
                    TaskResult::failure(locator, e.to_string())
                }
            },
            Ok(Ok(Err(reason))) => {
                error!("Processing {} failed: {}", locator, reason);
                TaskResult::failure(locator, reason)
            }
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    error!("Processing {} panicked", locator);
                    TaskResult::failure(locator, "Task panicked during processing")
                } else {
                    TaskResult::failure(locator, "Task was cancelled")
                }
            }
            Err(_) => {
                error!("Processing {} timed out after {:?}", locator, self.timeout);
                TaskResult::failure(
                    locator,
                    format!("Processing timed out after {:?}", self.timeout),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Processor for Echo {
        fn process(&self, task: &Task) -> Result<Vec<u8>, String> {
            Ok(task.locator.as_bytes().to_vec())
        }
    }

    struct Failing(&'static str);

    impl Processor for Failing {
        fn process(&self, _task: &Task) -> Result<Vec<u8>, String> {
            Err(self.0.to_string())
        }
    }

    struct Panicking;

    impl Processor for Panicking {
        fn process(&self, _task: &Task) -> Result<Vec<u8>, String> {
            panic!("corrupt input")
        }
    }

    struct Slow;

    impl Processor for Slow {
        fn process(&self, _task: &Task) -> Result<Vec<u8>, String> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }
    }

    fn executor(processor: impl Processor) -> TaskExecutor {
        TaskExecutor::new(Arc::new(processor), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_success() {
        let task = Task::whole("a.dat").unwrap();
        let result = executor(Echo).execute(&task).await;
        assert_eq!(
            result,
            TaskResult::Success {
                locator: "a.dat".to_string(),
                payload: b"a.dat".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_error_becomes_failure() {
        let task = Task::whole("a.dat").unwrap();
        match executor(Failing("File not found")).execute(&task).await {
            TaskResult::Failure { locator, reason } => {
                assert_eq!(locator, "a.dat");
                assert_eq!(reason, "File not found");
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_reason_is_filled_in() {
        let task = Task::whole("a.dat").unwrap();
        match executor(Failing("")).execute(&task).await {
            TaskResult::Failure { reason, .. } => assert!(!reason.is_empty()),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let task = Task::whole("a.dat").unwrap();
        match executor(Panicking).execute(&task).await {
            TaskResult::Failure { reason, .. } => assert!(reason.contains("panicked")),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let task = Task::whole("a.dat").unwrap();
        let executor = TaskExecutor::new(Arc::new(Slow), Duration::from_millis(50));
        match executor.execute(&task).await {
            TaskResult::Failure { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("Expected failure, got {:?}", other),
        }
    }
}
