//! Request logging and audit capture.

pub mod layer;

pub use layer::{RequestLogLayer, RequestLogMiddleware};
