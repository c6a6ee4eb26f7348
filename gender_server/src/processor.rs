//! Per-stream gender processing.
//!
//! A [`GenderProcessor`] sees every frame of one camera stream, one frame at
//! a time. It only runs the analyzer on every n-th frame and keeps showing the
//! last reading in between.
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use serde::Serialize;

use crate::{
    analysis::{FaceAnalysis, FaceAnalyzer, FaceRegion, GenderScores},
    csv_log::{GenderLog, Observation},
    decision::{Decision, DecisionPolicy},
    meter::METER,
    overlay::Overlay,
};

/// Analyse one frame out of this many by default, about once a second at 30 fps.
pub const DEFAULT_ANALYZE_EVERY: u64 = 30;

/// Everything processors of all streams share.
#[derive(Clone)]
pub struct ProcessorContext {
    pub analyzer: Arc<dyn FaceAnalyzer>,
    pub policy: Arc<DecisionPolicy>,
    pub log: Arc<GenderLog>,
    pub overlay: Arc<Overlay>,
    pub analyze_every: u64,
}

/// Result of analysing a single photo.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhotoReport {
    pub faces: usize,
    pub label: &'static str,
    pub confidence: f32,
    pub scores: GenderScores,
    pub region: FaceRegion,
    pub logged: bool,
}

/// Why a photo produced no reading.
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error("No face detected, try a clearer, well-lit photo")]
    NoFace,

    #[error("Face analysis failed: {0}")]
    Analysis(anyhow::Error),
}

pub struct GenderProcessor {
    ctx: ProcessorContext,
    frame_count: u64,
    current: Option<Decision>,
    face: Option<FaceRegion>,
    last_log: Option<NaiveDateTime>,
}

impl GenderProcessor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self {
            ctx,
            frame_count: 0,
            current: None,
            face: None,
            last_log: None,
        }
    }

    /// Last reading shown on frames, if any.
    pub fn current(&self) -> Option<&Decision> {
        self.current.as_ref()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn last_log(&self) -> Option<NaiveDateTime> {
        self.last_log
    }

    pub fn process_frame(&mut self, frame: RgbImage) -> RgbImage {
        self.process_frame_at(frame, Local::now().naive_local())
    }

    /// Process one live frame and return it with the overlay drawn on it.
    pub fn process_frame_at(&mut self, mut frame: RgbImage, now: NaiveDateTime) -> RgbImage {
        if self.frame_count % self.ctx.analyze_every.max(1) == 0 {
            METER.tick_analyzed();
            match self.ctx.analyzer.analyze(&frame) {
                Ok(faces) => match faces.first() {
                    Some(face) => {
                        self.apply(face, now);
                    }
                    None => log::trace!("No face in frame {}", self.frame_count),
                },
                // No face found or model failure, keep the previous reading
                Err(e) => log::debug!("Skipping frame {}: {e:#}", self.frame_count),
            }
        }

        self.frame_count += 1;

        self.ctx
            .overlay
            .draw(&mut frame, self.current.as_ref(), self.face.as_ref());
        frame
    }

    /// Analyse a single captured photo.
    ///
    /// Every photo is analysed; logging follows the same confidence floor and
    /// cooldown as live frames.
    pub fn analyze_photo_at(
        &mut self,
        image: &RgbImage,
        now: NaiveDateTime,
    ) -> Result<PhotoReport, PhotoError> {
        let faces = self.ctx.analyzer.analyze(image).map_err(PhotoError::Analysis)?;
        let face = faces.first().ok_or(PhotoError::NoFace)?;
        let (decision, logged) = self.apply(face, now);

        Ok(PhotoReport {
            faces: faces.len(),
            label: decision.label,
            confidence: decision.confidence,
            scores: face.gender,
            region: face.region,
            logged,
        })
    }

    /// Draw the current reading onto an image.
    pub fn annotate(&self, image: &mut RgbImage) {
        self.ctx
            .overlay
            .draw(image, self.current.as_ref(), self.face.as_ref());
    }

    /// Update the reading from one face and log it if the policy says so.
    fn apply(&mut self, face: &FaceAnalysis, now: NaiveDateTime) -> (Decision, bool) {
        let decision = self.ctx.policy.decide(&face.gender, self.last_log, now);
        self.current = Some(decision);
        self.face = Some(face.region);

        if !decision.should_log {
            return (decision, false);
        }

        let observation = Observation::new(now, decision.label, decision.confidence);
        match self.ctx.log.append(&observation) {
            Ok(()) => {
                METER.tick_logged();
                self.last_log = Some(now);
                (decision, true)
            }
            Err(e) => {
                log::warn!("Failed to log observation: {e:#}");
                (decision, false)
            }
        }
    }
}
