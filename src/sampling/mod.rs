//! CSV sample logging: the durable store plus the periodic sampling loop
//! that feeds it.

pub mod controller;
pub mod loop_worker;
pub mod store;

pub use controller::{LogReport, LogTarget, SampleLogger};
pub use store::{header, latest_records, read_records, LogStore};
