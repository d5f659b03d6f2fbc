//! Fixed-layout records updated in place.

pub mod processing_info;
pub mod value_record;

pub use processing_info::{now_ms, ProcessingInfo, ProcessingState};
pub use value_record::ValueRecordRef;
