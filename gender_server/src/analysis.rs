//! Boundary to the face-analysis models.
//!
//! The server never looks inside a model: it hands an image to a
//! [`FaceAnalyzer`] and gets back one [`FaceAnalysis`] per detected face, each
//! with a probability for both gender classes.
use anyhow::Result;
use clap::ValueEnum;
use image::RgbImage;
use serde::Serialize;

/// Gender classes as keyed by the classifier output.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, ValueEnum)]
pub enum GenderClass {
    Woman,
    Man,
}

impl GenderClass {
    /// The other class of the binary pair.
    pub fn other(self) -> Self {
        match self {
            GenderClass::Woman => GenderClass::Man,
            GenderClass::Man => GenderClass::Woman,
        }
    }
}

/// Per-class probabilities in percent (0-100).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GenderScores {
    pub woman: f32,
    pub man: f32,
}

impl GenderScores {
    pub fn new(woman: f32, man: f32) -> Self {
        Self { woman, man }
    }

    /// Build scores from the raw `[woman, man]` classifier output.
    ///
    /// Outputs that already form a probability distribution are taken as is,
    /// anything else is treated as logits and passed through a softmax.
    pub fn from_probabilities(raw: &[f32]) -> Result<Self> {
        let [woman, man] = match raw {
            [woman, man] => [*woman, *man],
            _ => anyhow::bail!("expected 2 class outputs, got {}", raw.len()),
        };

        let is_distribution =
            woman >= 0.0 && man >= 0.0 && ((woman + man) - 1.0).abs() < PROBABILITY_TOLERANCE;
        let (woman, man) = if is_distribution {
            (woman, man)
        } else {
            softmax_pair(woman, man)
        };

        Ok(Self::new(woman * 100.0, man * 100.0))
    }

    /// Score of a single class.
    pub fn get(&self, class: GenderClass) -> f32 {
        match class {
            GenderClass::Woman => self.woman,
            GenderClass::Man => self.man,
        }
    }

    /// The class with the highest score. An exact tie goes to `Man`.
    pub fn dominant(&self) -> GenderClass {
        if self.woman > self.man {
            GenderClass::Woman
        } else {
            GenderClass::Man
        }
    }
}

/// Tolerance for deciding whether an output pair already sums to one.
const PROBABILITY_TOLERANCE: f32 = 1.0e-3;

fn softmax_pair(a: f32, b: f32) -> (f32, f32) {
    // Shift by the max for numerical stability
    let max = a.max(b);
    let (ea, eb) = ((a - max).exp(), (b - max).exp());
    let sum = ea + eb;
    (ea / sum, eb / sum)
}

/// Face location in pixel coordinates, origin at the top left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Analysis result for one face.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceAnalysis {
    pub region: FaceRegion,
    /// Detector confidence in [0, 1].
    pub detection_confidence: f32,
    pub gender: GenderScores,
}

impl FaceAnalysis {
    /// The class the classifier itself considers most likely.
    pub fn dominant_gender(&self) -> GenderClass {
        self.gender.dominant()
    }
}

/// Anything that finds faces in an image and scores their gender.
///
/// Implementations return faces ordered by detection confidence, most
/// confident first. An image without faces yields an empty vector; errors are
/// reserved for failures of the model itself.
pub trait FaceAnalyzer: Send + Sync {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<FaceAnalysis>>;
}
