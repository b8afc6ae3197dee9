pub mod sample;
pub mod session;

pub use sample::{CommentOutcome, SampleRecord, TIMESTAMP_FORMAT};
pub use session::{Session, SessionParams, SessionSummary};
