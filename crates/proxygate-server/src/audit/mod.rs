//! Request log capture and persistence.

pub mod sink;
pub mod writer;

pub use sink::AuditSink;
pub use writer::AuditWriter;
