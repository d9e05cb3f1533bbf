pub mod api;
pub mod auth;
pub mod cache;
pub mod job_progress;
pub mod job_watch;
pub mod realtime;
pub mod reorder;
