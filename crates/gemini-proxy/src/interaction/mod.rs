//! Interaction records and the logger that persists them

pub mod logger;
pub mod types;

pub use logger::InteractionLogger;
pub use types::{
    HeaderSnapshot, InteractionError, InteractionRecord, InteractionStart, LoggedBody,
    RequestSnapshot, ResponseSnapshot, content_type, is_json_content_type, snapshot_headers,
};
