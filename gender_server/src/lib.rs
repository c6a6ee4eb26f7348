//! Webcam gender recognition: face analysis on camera streams, a thresholded
//! label overlay and a debounced CSV log of readings.
pub mod analysis;
pub mod config;
pub mod csv_log;
pub mod data_socket;
pub mod decision;
pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod overlay;
pub mod processor;
pub mod pubsub;
pub mod utils;

use bytes::Bytes;

/// Wrap a JPEG as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
