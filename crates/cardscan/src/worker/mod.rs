pub mod job;
pub mod processor;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod tasks;

pub use job::{
    ConfirmOutcome, ImportItem, ImportJob, ItemSelection, ItemStatus, JobDetail, JobStatus,
};
pub use processor::{CleanupSummary, JobProcessor, ProcessSummary, ProcessorConfig};
pub use scheduler::{SchedulerConfig, WorkerService};
pub use service::{
    ConfiguredServices, ImportService, JobPage, JobQuery, LeaseInfo, ServiceStatus,
};
pub use sink::{CollectionSink, ConfirmedCard, LoggingSink};
pub use tasks::{TaskKind, TaskQueue, TaskRecord, TaskStatus};

/// Name of the lease that marks the job being processed.
pub const PROCESSOR_LEASE: &str = "import-processor";
