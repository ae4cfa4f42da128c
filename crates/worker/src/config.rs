use fitline_core::env_config;
use fitline_core::error::CoreError;

/// Queue consumer and watchdog settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity written to `tasks.locked_by`.
    pub worker_id: String,
    /// Concurrent consumer loops in this process.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// A locked task older than this is considered abandoned and reclaimed.
    pub lock_timeout_secs: i64,
    /// Deliveries before a failing task is dropped.
    pub max_task_attempts: i32,
    pub retry_base_delay_secs: i64,
    /// Idle time after which a non-terminal job is re-dispatched.
    pub stall_threshold_secs: u64,
    pub watchdog_interval_secs: u64,
    pub watchdog_batch_size: usize,
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default              |
    /// |--------------------------|----------------------|
    /// | `WORKER_ID`              | `worker-<uuid>`      |
    /// | `WORKER_CONCURRENCY`     | `4`                  |
    /// | `TASK_POLL_INTERVAL_MS`  | `500`                |
    /// | `TASK_LOCK_TIMEOUT_SECS` | `900`                |
    /// | `MAX_TASK_ATTEMPTS`      | `8`                  |
    /// | `TASK_RETRY_DELAY_SECS`  | `5`                  |
    /// | `STALL_THRESHOLD_SECS`   | `600`                |
    /// | `WATCHDOG_INTERVAL_SECS` | `60`                 |
    /// | `WATCHDOG_BATCH_SIZE`    | `50`                 |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`                 |
    pub fn from_env() -> Result<Self, CoreError> {
        let worker_id = env_config::optional("WORKER_ID")
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        let config = Self {
            worker_id,
            concurrency: env_config::var_or("WORKER_CONCURRENCY", 4)?,
            poll_interval_ms: env_config::var_or("TASK_POLL_INTERVAL_MS", 500)?,
            lock_timeout_secs: env_config::var_or("TASK_LOCK_TIMEOUT_SECS", 900)?,
            max_task_attempts: env_config::var_or("MAX_TASK_ATTEMPTS", 8)?,
            retry_base_delay_secs: env_config::var_or("TASK_RETRY_DELAY_SECS", 5)?,
            stall_threshold_secs: env_config::var_or("STALL_THRESHOLD_SECS", 600)?,
            watchdog_interval_secs: env_config::var_or("WATCHDOG_INTERVAL_SECS", 60)?,
            watchdog_batch_size: env_config::var_or("WATCHDOG_BATCH_SIZE", 50)?,
            shutdown_timeout_secs: env_config::var_or("SHUTDOWN_TIMEOUT_SECS", 30)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        let positive = [
            ("WORKER_CONCURRENCY", self.concurrency as i64),
            ("TASK_POLL_INTERVAL_MS", self.poll_interval_ms as i64),
            ("TASK_LOCK_TIMEOUT_SECS", self.lock_timeout_secs),
            ("MAX_TASK_ATTEMPTS", self.max_task_attempts as i64),
            ("STALL_THRESHOLD_SECS", self.stall_threshold_secs as i64),
            ("WATCHDOG_INTERVAL_SECS", self.watchdog_interval_secs as i64),
            ("WATCHDOG_BATCH_SIZE", self.watchdog_batch_size as i64),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(CoreError::Validation(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}
