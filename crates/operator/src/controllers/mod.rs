pub mod job;

pub use job::{reconcile_job, Context, JobController};
