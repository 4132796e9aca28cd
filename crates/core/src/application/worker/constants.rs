// Engine defaults and limits
use std::time::Duration;

/// Objects per execution block
pub const DEFAULT_BLOCK_SIZE: usize = 100;

/// Jobs allowed to dispatch blocks at the same time
pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 4;

/// Blocks executing at the same time, across all jobs
pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

/// How long a synchronous submission blocks the caller (10 minutes)
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(600);

/// Grace period for in-flight blocks on engine shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Upper bound for `worker_pool_size`, permits are counted in u32
pub const MAX_WORKER_POOL_SIZE: usize = 4096;
