pub mod auto_scheduler;
pub mod lifecycle;
pub mod ranking;
pub mod scheduler;
pub mod scoring;
pub mod trips;
pub mod verification;
