pub mod config;
pub mod context;
pub mod options;

pub use config::SchedulerConfig;
pub use context::RequestContext;
pub use options::SchedulerOptions;
