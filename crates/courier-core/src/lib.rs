pub mod batch;
pub mod classify;
pub mod config;
pub mod digest;
pub mod frame;
pub mod ledger;
pub mod notify;
pub mod partition;
pub mod pdf;
pub mod pipeline;
pub mod reports;
pub mod schedule;
pub mod snapshot;
