//! Capture side: reads frames from a webcam or a directory of JPEGs and ships
//! them to the gender server.
pub mod sensors;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
