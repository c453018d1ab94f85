//! Queue-driven activity sync: a Postgres-backed FIFO job queue, a bounded
//! worker pool with first-match processor dispatch, and the manual sync
//! processor that fans out to the fitness tracker and spreadsheet services.

pub mod api;
pub mod config;
pub mod db;
pub mod jobs;
pub mod sync;
pub mod telemetry;
