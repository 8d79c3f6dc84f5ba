pub mod jobs;
pub mod scheduler;
