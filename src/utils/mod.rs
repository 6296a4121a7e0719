//! Small standalone helpers: numeric conversions and transfer-trace capture.
pub mod devlog;
pub mod num;
