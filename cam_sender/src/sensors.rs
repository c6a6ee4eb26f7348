//! Sensors module.
//!
use std::path::{Path, PathBuf};

use simple_error::simple_error;

use crate::Error;

/// Produces the next JPEG-encoded frame, `None` if capturing failed.
pub type CaptureFn = Box<dyn FnMut() -> Option<Vec<u8>> + Send>;

/// Get a capture function that replays the JPEG files of a directory.
///
/// Files are played in name order and the sequence starts over after the last
/// one, so a handful of images behaves like an endless camera.
pub fn get_replay_capture_fn(dir: impl AsRef<Path>) -> Result<CaptureFn, Error> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_jpeg(path))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(simple_error!("no JPEG files in {}", dir.display()).into());
    }
    log::info!("Replaying {} frames from {}", files.len(), dir.display());

    let mut next = 0;
    let callback = move || {
        let path = &files[next];
        next = (next + 1) % files.len();
        match std::fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                log::error!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    };
    Ok(Box::new(callback))
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Open a webcam with MJPG at its highest resolution and frame rate.
#[cfg(feature = "camera")]
pub fn get_camera_capture_fn(device_name: &str) -> Result<CaptureFn, Error> {
    camera::get_capture_fn_linux(device_name, "MJPG", None, None)
}

#[cfg(not(feature = "camera"))]
pub fn get_camera_capture_fn(device_name: &str) -> Result<CaptureFn, Error> {
    Err(simple_error!(
        "cannot open {}: built without the `camera` feature, use a replay directory",
        device_name
    )
    .into())
}

#[cfg(feature = "camera")]
pub mod camera {
    use rscam::{Camera, Config};
    use simple_error::simple_error;

    use super::CaptureFn;
    use crate::Error;

    /// Get a capture function to a video device on a Linux machine.
    pub fn get_capture_fn_linux(
        device_name: &str,
        format: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<CaptureFn, Error> {
        let mut cam = Camera::new(device_name)?;
        log_supported_formats(&cam, format);
        let format = format.as_bytes();

        log::info!("Using camera {}", device_name);

        let resolution = resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let frame_rate = frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        let callback = move || cam.capture().ok().map(|frame| frame[..].to_vec());
        Ok(Box::new(callback))
    }

    /// Get the maximum supported resolution for the given format.
    fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
        let resolution_info = cam.resolutions(format)?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => resolutions
                .iter()
                // Highest resolution in terms of number of pixels
                .max_by_key(|res| res.0 * res.1)
                .copied(),
            rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
        }
        .ok_or_else(|| simple_error!("No resolution found").into())
    }

    /// Get the maximum supported frame rate for the given format and resolution.
    fn get_max_frame_rate(
        cam: &Camera,
        format: &[u8],
        resolution: (u32, u32),
    ) -> Result<(u32, u32), Error> {
        let interval_info = cam.intervals(format, resolution)?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            // Intervals are (numerator, denominator) seconds per frame
            rscam::IntervalInfo::Discretes(intervals) => intervals
                .iter()
                .max_by_key(|(numerator, denominator)| denominator / numerator.max(&1))
                .copied(),
            rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
        }
        .ok_or_else(|| simple_error!("No frame rate found").into())
    }

    fn log_supported_formats(cam: &Camera, format: &str) {
        let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
        log::debug!(
            "Supported formats: {:?}, using format {:?}",
            formats,
            format
        );
    }
}
