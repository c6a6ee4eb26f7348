//! Pretrained ONNX models run with `tract`.
//!
//! Faces are found with Ultraface, each face crop is then scored by a
//! two-class gender classifier. By default that is the GoogLeNet gender model
//! of the ONNX model zoo, which takes mean-subtracted BGR input and answers
//! `[Male, Female]`.
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use image::{imageops, RgbImage};
use ndarray::s;
use tract_onnx::prelude::*;

use crate::analysis::{FaceAnalysis, FaceAnalyzer, FaceRegion, GenderScores};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Normalized `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
pub type Bbox = [f32; 4];

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Share of the face size added around a detection before classifying it.
const CROP_MARGIN: f32 = 0.2;

const ULTRAFACE_BASE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models";

/// File name of the default gender classifier.
pub const GENDER_MODEL_FILE: &str = "gender_googlenet.onnx";

/// Where the default gender classifier is downloaded from.
pub const GENDER_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/age_gender/models/gender_googlenet.onnx";

pub trait InferModel {
    type Output;

    fn run(&self, input: &RgbImage) -> Result<Self::Output>;
}

/// Face detector variant, trading speed for accuracy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum DetectorBackend {
    /// Ultraface RFB-320, 320x240 input
    Fast,
    /// Ultraface RFB-640, 640x480 input
    #[default]
    Accurate,
}

impl DetectorBackend {
    /// Network input as `(width, height)`.
    pub fn input_size(self) -> (u32, u32) {
        match self {
            DetectorBackend::Fast => (320, 240),
            DetectorBackend::Accurate => (640, 480),
        }
    }

    pub fn model_file(self) -> &'static str {
        match self {
            DetectorBackend::Fast => "version-RFB-320.onnx",
            DetectorBackend::Accurate => "version-RFB-640.onnx",
        }
    }

    pub fn model_url(self) -> String {
        format!("{}/{}", ULTRAFACE_BASE_URL, self.model_file())
    }
}

pub struct UltrafaceModel {
    model: NnModel,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl UltrafaceModel {
    pub fn new(
        path: impl AsRef<Path>,
        backend: DetectorBackend,
        max_iou: f32,
        min_confidence: f32,
    ) -> Result<Self> {
        let (width, height) = backend.input_size();
        let model = load_plan(path.as_ref(), width, height)?;
        log::info!("Loaded {:?} face detector", backend);

        Ok(Self {
            model,
            width,
            height,
            max_iou,
            min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = imageops::resize(
            input,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| {
                // Mean/std are from MobileNet, not from Ultraface, but work well
                let mean = [0.485, 0.456, 0.406][c];
                let std = [0.229, 0.224, 0.225][c];
                (resized[(x as _, y as _)][c] as f32 / 255.0 - mean) / std
            },
        )
        .into()
    }

    /// Select boxes from the raw scores (`[1, N, 2]`) and boxes (`[1, N, 4]`).
    fn postproc(&self, confidences: Vec<f32>, bboxes: Vec<f32>) -> Vec<(Bbox, f32)> {
        let mut candidates: Vec<(Bbox, f32)> = bboxes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .zip(confidences)
            .filter(|(_, confidence)| *confidence > self.min_confidence)
            .collect();

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        non_maximum_suppression(candidates, self.max_iou)
    }
}

impl InferModel for UltrafaceModel {
    type Output = Vec<(Bbox, f32)>;

    fn run(&self, input: &RgbImage) -> Result<Self::Output> {
        let outputs = self.model.run(tvec!(self.preproc(input).into()))?;

        let confidences = outputs[0]
            .to_array_view::<f32>()?
            .slice(s![0, .., 1])
            .to_vec();
        let bboxes: Vec<f32> = outputs[1].to_array_view::<f32>()?.iter().cloned().collect();

        Ok(self.postproc(confidences, bboxes))
    }
}

/// Order of the two classifier outputs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ClassOrder {
    /// `[Man, Woman]`
    #[default]
    ManWoman,
    /// `[Woman, Man]`
    WomanMan,
}

impl ClassOrder {
    /// Scores from raw classifier output in this order.
    pub fn scores(self, raw: &[f32]) -> Result<GenderScores> {
        match (self, raw) {
            (ClassOrder::ManWoman, [man, woman]) => {
                GenderScores::from_probabilities(&[*woman, *man])
            }
            _ => GenderScores::from_probabilities(raw),
        }
    }
}

/// Channel order the classifier expects.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ChannelOrder {
    Rgb,
    #[default]
    Bgr,
}

/// Per-channel normalization of classifier input, `(pixel - mean) / std`
/// with pixels in `0..=255`. Mean and std are given in network channel order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenderPreproc {
    pub channels: ChannelOrder,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for GenderPreproc {
    fn default() -> Self {
        Self {
            channels: ChannelOrder::Bgr,
            mean: [104.0, 117.0, 123.0],
            std: [1.0, 1.0, 1.0],
        }
    }
}

impl GenderPreproc {
    /// Network input value of channel `c` for one pixel.
    pub fn normalize(&self, pixel: &image::Rgb<u8>, c: usize) -> f32 {
        let source = match self.channels {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => 2 - c,
        };
        (pixel[source] as f32 - self.mean[c]) / self.std[c]
    }
}

/// Two-class gender classifier.
pub struct GenderModel {
    model: NnModel,
    input_size: u32,
    preproc: GenderPreproc,
    order: ClassOrder,
}

impl GenderModel {
    pub fn new(
        path: impl AsRef<Path>,
        input_size: u32,
        preproc: GenderPreproc,
        order: ClassOrder,
    ) -> Result<Self> {
        let model = load_plan(path.as_ref(), input_size, input_size)?;
        log::info!("Loaded gender classifier from {}", path.as_ref().display());
        Ok(Self {
            model,
            input_size,
            preproc,
            order,
        })
    }

    fn preproc(&self, face: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(face, size, size, imageops::FilterType::Triangle);

        tract_ndarray::Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
            self.preproc.normalize(&resized[(x as _, y as _)], c)
        })
        .into()
    }
}

impl InferModel for GenderModel {
    type Output = GenderScores;

    fn run(&self, input: &RgbImage) -> Result<Self::Output> {
        let outputs = self.model.run(tvec!(self.preproc(input).into()))?;
        let raw: Vec<f32> = outputs[0].to_array_view::<f32>()?.iter().cloned().collect();
        self.order.scores(&raw)
    }
}

/// Detector and classifier combined behind the analysis boundary.
pub struct OnnxAnalyzer {
    detector: UltrafaceModel,
    classifier: GenderModel,
}

impl OnnxAnalyzer {
    pub fn new(detector: UltrafaceModel, classifier: GenderModel) -> Self {
        Self {
            detector,
            classifier,
        }
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<FaceAnalysis>> {
        let (width, height) = image.dimensions();
        let detections = self.detector.run(image)?;
        log::debug!("Found {} faces in image", detections.len());

        let mut faces = Vec::with_capacity(detections.len());
        for (bbox, detection_confidence) in detections {
            let Some(region) = bbox_to_region(&bbox, width, height, CROP_MARGIN) else {
                continue;
            };
            let crop =
                imageops::crop_imm(image, region.x, region.y, region.width, region.height)
                    .to_image();
            let gender = self.classifier.run(&crop)?;

            faces.push(FaceAnalysis {
                region,
                detection_confidence,
                gender,
            });
        }

        faces.sort_by(|a, b| b.detection_confidence.total_cmp(&a.detection_confidence));
        Ok(faces)
    }
}

fn load_plan(path: &Path, width: u32, height: u32) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, height as usize, width as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to read model {}", path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Convert a normalized bbox into a pixel region grown by `margin` on every
/// side and clamped to the image. Degenerate boxes give `None`.
pub fn bbox_to_region(bbox: &Bbox, width: u32, height: u32, margin: f32) -> Option<FaceRegion> {
    let (w, h) = (width as f32, height as f32);
    let (x_tl, y_tl) = (bbox[0] * w, bbox[1] * h);
    let (x_br, y_br) = (bbox[2] * w, bbox[3] * h);
    let (pad_x, pad_y) = ((x_br - x_tl) * margin, (y_br - y_tl) * margin);

    let x0 = (x_tl - pad_x).clamp(0.0, w) as u32;
    let y0 = (y_tl - pad_y).clamp(0.0, h) as u32;
    let x1 = (x_br + pad_x).clamp(0.0, w) as u32;
    let y1 = (y_br + pad_y).clamp(0.0, h) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(FaceRegion {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Candidates must be sorted by ascending confidence. Starting with the most
/// confident one, a box is selected unless its IoU with an already selected
/// box exceeds `max_iou`.
fn non_maximum_suppression(mut sorted_candidates: Vec<(Bbox, f32)>, max_iou: f32) -> Vec<(Bbox, f32)> {
    let mut selected: Vec<(Bbox, f32)> = vec![];

    // Most confident boxes sit at the back
    while let Some((bbox, confidence)) = sorted_candidates.pop() {
        if selected
            .iter()
            .all(|(selected_bbox, _)| iou(&bbox, selected_bbox) <= max_iou)
        {
            selected.push((bbox, confidence));
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // Non-overlapping boxes give an ill-defined overlap box with zero area
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by a bounding box, zero if the corners are swapped.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = [0.1, 0.1, 0.5, 0.5];
        let b = [0.6, 0.6, 0.9, 0.9];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-4);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping_boxes() {
        let candidates = vec![
            ([0.62, 0.6, 0.92, 0.9], 0.6),
            ([0.1, 0.1, 0.5, 0.5], 0.7),
            ([0.6, 0.6, 0.9, 0.9], 0.8),
            ([0.11, 0.1, 0.5, 0.51], 0.95),
        ];
        let selected = non_maximum_suppression(candidates, 0.5);

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].1, 0.95);
        assert_eq!(selected[1].1, 0.8);
    }

    #[test]
    fn region_is_padded_and_clamped() {
        let region = bbox_to_region(&[0.0, 0.25, 0.5, 0.75], 200, 100, 0.2).unwrap();
        assert_eq!(region.x, 0);
        assert_eq!(region.y, 15);
        assert_eq!(region.width, 120);
        assert_eq!(region.height, 70);

        assert!(bbox_to_region(&[0.5, 0.5, 0.4, 0.6], 200, 100, 0.0).is_none());
    }

    #[test]
    fn class_order_maps_outputs() -> Result<()> {
        let scores = ClassOrder::ManWoman.scores(&[0.7, 0.3])?;
        assert!((scores.man - 70.0).abs() < 1e-3);
        assert!((scores.woman - 30.0).abs() < 1e-3);

        let scores = ClassOrder::WomanMan.scores(&[0.7, 0.3])?;
        assert!((scores.woman - 70.0).abs() < 1e-3);

        assert!(ClassOrder::ManWoman.scores(&[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn preproc_swaps_channels_and_subtracts_mean() {
        let pixel = image::Rgb([200, 100, 50]);

        let bgr = GenderPreproc::default();
        assert_eq!(bgr.normalize(&pixel, 0), 50.0 - 104.0);
        assert_eq!(bgr.normalize(&pixel, 2), 200.0 - 123.0);

        let rgb = GenderPreproc {
            channels: ChannelOrder::Rgb,
            mean: [0.0; 3],
            std: [255.0; 3],
        };
        assert!((rgb.normalize(&pixel, 0) - 200.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn backends_pick_matching_inputs() {
        assert_eq!(DetectorBackend::Fast.input_size(), (320, 240));
        assert!(DetectorBackend::Accurate.model_url().ends_with("version-RFB-640.onnx"));
    }
}
