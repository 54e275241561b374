pub mod dispatcher;
pub mod selector;

pub use dispatcher::{
    Assignment, BatchReport, DispatchReport, DispatchScheduler, FAILED_DISPATCH_BACKOFF,
    SPECULATIVE_WORKLOAD,
};
pub use selector::least_loaded;
