//! Two-phase execution: read counting, placement, recycling, caching and parallel writes.

pub mod buffer_manager;
pub mod cache;
pub mod engine;
pub mod execution;
pub mod reads;
pub mod recycler;
pub mod work;

pub use buffer_manager::{BufferManager, runs_on_device};
pub use cache::{CACHE_EVICT_STEP_BYTES, CacheBuffer, CacheManager, CacheStats};
pub use engine::{Engine, EngineOpts, ExecutionReport, ExecutionRequest};
pub use execution::{BreakFlag, ExecStats, ExecutionContext, ExecutionManager, PassMode, WriteOutcome};
pub use reads::{OpReads, ReaderReads, ReadsOptimizer};
pub use recycler::{
    AuditReport, BufferRecycler, RecycleClass, Recyclable, RecyclerOpts, RecyclerStats,
};
pub use work::{WorkPackage, WorkScheduler, WorkState, WriteJob};
