//! Command line configuration.
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::{
    analysis::GenderClass,
    decision::{cooldown_from_secs, DecisionPolicy, LabelSet, ThresholdRule},
    nn::{
        ChannelOrder, ClassOrder, DetectorBackend, GenderPreproc, GENDER_MODEL_FILE,
        GENDER_MODEL_URL,
    },
    processor::DEFAULT_ANALYZE_EVERY,
    utils::model_cache_dir,
};

/// How the label is chosen from the two class scores.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ThresholdMode {
    /// The favored class wins once its score exceeds the cutoff
    Favor,
    /// The classifier's dominant class wins
    Dominant,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Webcam gender recognition server")]
pub struct Args {
    /// Address of the HTTP server
    #[clap(long, default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Address of the socket receiving camera streams
    #[clap(long, default_value = "127.0.0.1:3001")]
    pub socket_address: String,

    /// Face detector variant
    #[clap(long, value_enum, default_value_t = DetectorBackend::Accurate)]
    pub detector: DetectorBackend,

    /// Face detector model, downloaded to the cache directory if not given
    #[clap(long)]
    pub detector_model: Option<PathBuf>,

    /// Minimum detector confidence for a face
    #[clap(long, default_value_t = 0.7)]
    pub min_face_confidence: f32,

    /// Maximum overlap (IoU) between two reported faces
    #[clap(long, default_value_t = 0.5)]
    pub max_iou: f32,

    /// Gender classifier model, downloaded to the cache directory if not given
    #[clap(long)]
    pub gender_model: Option<PathBuf>,

    /// Where to fetch the gender classifier from if the file is missing
    #[clap(long, default_value = GENDER_MODEL_URL)]
    pub gender_model_url: String,

    /// Square input size of the gender classifier
    #[clap(long, default_value_t = 224)]
    pub gender_input_size: u32,

    /// Order of the two gender classifier outputs
    #[clap(long, value_enum, default_value_t = ClassOrder::ManWoman)]
    pub gender_output: ClassOrder,

    /// Channel order of the gender classifier input
    #[clap(long, value_enum, default_value_t = ChannelOrder::Bgr)]
    pub gender_channels: ChannelOrder,

    /// Per-channel mean subtracted from 0-255 pixels, in input channel order
    #[clap(long, default_value = "104,117,123", value_parser = parse_triplet)]
    pub gender_mean: [f32; 3],

    /// Per-channel divisor applied after the mean, in input channel order
    #[clap(long, default_value = "1,1,1", value_parser = parse_std)]
    pub gender_std: [f32; 3],

    /// Label selection rule
    #[clap(long, value_enum, default_value_t = ThresholdMode::Favor)]
    pub threshold_mode: ThresholdMode,

    /// Class favored by the cutoff
    #[clap(long, value_enum, default_value_t = GenderClass::Woman)]
    pub favor: GenderClass,

    /// Score in percent the favored class has to exceed
    #[clap(long, default_value_t = 40.0)]
    pub cutoff: f32,

    /// Label vocabulary
    #[clap(long, value_enum, default_value_t = LabelSet::MaleFemale)]
    pub labels: LabelSet,

    /// Readings are only logged above this confidence in percent
    #[clap(long, default_value_t = 40.0)]
    pub min_log_confidence: f32,

    /// Minimum seconds between two log records
    #[clap(long, default_value_t = 2.0, value_parser = parse_cooldown_secs)]
    pub cooldown_secs: f64,

    /// Analyse one frame out of this many
    #[clap(long, default_value_t = DEFAULT_ANALYZE_EVERY)]
    pub analyze_every: u64,

    /// CSV file observations are appended to
    #[clap(long, default_value = "gender_log.csv")]
    pub log_file: PathBuf,

    /// TrueType font for the overlay text instead of the built-in one
    #[clap(long)]
    pub font: Option<PathBuf>,
}

/// Accept only finite, non-negative cooldowns.
fn parse_cooldown_secs(arg: &str) -> Result<f64, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{e}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("{arg} is not a finite, non-negative number of seconds"));
    }
    Ok(secs)
}

/// Parse three comma-separated numbers such as `104,117,123`.
fn parse_triplet(arg: &str) -> Result<[f32; 3], String> {
    let values = arg
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values[..] {
        [a, b, c] if values.iter().all(|v| v.is_finite()) => Ok([a, b, c]),
        _ => Err(format!("expected three finite numbers, got {arg:?}")),
    }
}

fn parse_std(arg: &str) -> Result<[f32; 3], String> {
    let std = parse_triplet(arg)?;
    if std.contains(&0.0) {
        return Err(format!("divisors must not be zero, got {arg:?}"));
    }
    Ok(std)
}

impl Args {
    pub fn policy(&self) -> DecisionPolicy {
        let rule = match self.threshold_mode {
            ThresholdMode::Favor => ThresholdRule::Favor {
                class: self.favor,
                cutoff: self.cutoff,
            },
            ThresholdMode::Dominant => ThresholdRule::Dominant,
        };

        DecisionPolicy {
            rule,
            labels: self.labels,
            min_log_confidence: self.min_log_confidence,
            cooldown: cooldown_from_secs(self.cooldown_secs),
        }
    }

    pub fn gender_preproc(&self) -> GenderPreproc {
        GenderPreproc {
            channels: self.gender_channels,
            mean: self.gender_mean,
            std: self.gender_std,
        }
    }

    /// Gender classifier path, the cache location unless given explicitly.
    pub fn gender_model_path(&self) -> PathBuf {
        self.gender_model
            .clone()
            .unwrap_or_else(|| model_cache_dir().join(GENDER_MODEL_FILE))
    }

    /// Detector model path, the cache location unless given explicitly.
    pub fn detector_model_path(&self) -> PathBuf {
        self.detector_model
            .clone()
            .unwrap_or_else(|| model_cache_dir().join(self.detector.model_file()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    #[test]
    fn defaults_match_default_policy() {
        let args = Args::parse_from(["gender_server"]);
        assert_eq!(args.policy(), DecisionPolicy::default());
        assert_eq!(args.analyze_every, 30);
        assert_eq!(args.detector, DetectorBackend::Accurate);
        assert!(args
            .detector_model_path()
            .ends_with("gendercam/version-RFB-640.onnx"));
        assert!(args.font.is_none());
    }

    #[test]
    fn default_classifier_is_downloadable() {
        let args = Args::parse_from(["gender_server"]);
        assert!(args
            .gender_model_path()
            .ends_with("gendercam/gender_googlenet.onnx"));
        assert!(args.gender_model_url.starts_with("https://"));
        assert!(args.gender_model_url.ends_with("/gender_googlenet.onnx"));
        assert_eq!(args.gender_output, ClassOrder::ManWoman);
        assert_eq!(args.gender_preproc(), GenderPreproc::default());
    }

    #[test]
    fn classifier_knobs() {
        let args = Args::parse_from([
            "gender_server",
            "--gender-model",
            "models/gender.onnx",
            "--gender-output",
            "woman-man",
            "--gender-channels",
            "rgb",
            "--gender-mean",
            "0,0,0",
            "--gender-std",
            "255, 255, 255",
        ]);
        assert_eq!(args.gender_model_path(), PathBuf::from("models/gender.onnx"));
        assert_eq!(args.gender_output, ClassOrder::WomanMan);
        assert_eq!(
            args.gender_preproc(),
            GenderPreproc {
                channels: ChannelOrder::Rgb,
                mean: [0.0; 3],
                std: [255.0; 3],
            }
        );

        assert!(Args::try_parse_from(["gender_server", "--gender-mean", "1,2"]).is_err());
        assert!(Args::try_parse_from(["gender_server", "--gender-std", "1,0,1"]).is_err());
    }

    #[test]
    fn cooldown_must_be_finite_and_non_negative() {
        for bad in ["-1", "-1e300", "NaN", "inf", "soon"] {
            let parsed = Args::try_parse_from(["gender_server", "--cooldown-secs", bad]);
            assert!(parsed.is_err(), "{bad} was accepted");
        }
        let args = Args::parse_from(["gender_server", "--cooldown-secs", "0"]);
        assert_eq!(args.policy().cooldown, Duration::zero());
    }

    #[test]
    fn variant_flags() {
        let args = Args::parse_from([
            "gender_server",
            "--detector",
            "fast",
            "--labels",
            "man-woman",
            "--favor",
            "man",
            "--cutoff",
            "60",
            "--min-log-confidence",
            "50",
            "--cooldown-secs",
            "1.5",
        ]);
        let policy = args.policy();
        assert_eq!(
            policy.rule,
            ThresholdRule::Favor {
                class: GenderClass::Man,
                cutoff: 60.0
            }
        );
        assert_eq!(policy.labels, LabelSet::ManWoman);
        assert_eq!(policy.min_log_confidence, 50.0);
        assert_eq!(policy.cooldown, Duration::milliseconds(1500));
        assert_eq!(args.detector, DetectorBackend::Fast);

        let args = Args::parse_from(["gender_server", "--threshold-mode", "dominant"]);
        assert_eq!(args.policy().rule, ThresholdRule::Dominant);
    }
}
