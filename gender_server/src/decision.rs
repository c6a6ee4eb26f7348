//! Threshold-and-debounce decision.
//!
//! Turns the two class scores of one face into a display label and decides
//! whether the reading goes into the CSV log. The decision is a pure function
//! of the scores, the time of the last written record and the current time.
use chrono::{Duration, NaiveDateTime};
use clap::ValueEnum;

use crate::analysis::{GenderClass, GenderScores};

/// Vocabulary used to present a class.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LabelSet {
    /// "Male" / "Female"
    #[default]
    MaleFemale,
    /// "Man" / "Woman", the classifier's own terms
    ManWoman,
}

/// Every label any vocabulary can produce.
pub const KNOWN_LABELS: [&str; 4] = ["Male", "Female", "Man", "Woman"];

impl LabelSet {
    pub fn label(self, class: GenderClass) -> &'static str {
        match (self, class) {
            (LabelSet::MaleFemale, GenderClass::Man) => "Male",
            (LabelSet::MaleFemale, GenderClass::Woman) => "Female",
            (LabelSet::ManWoman, GenderClass::Man) => "Man",
            (LabelSet::ManWoman, GenderClass::Woman) => "Woman",
        }
    }

    /// Map a label of any vocabulary back to its class.
    pub fn parse(label: &str) -> Option<GenderClass> {
        match label {
            "Male" | "Man" => Some(GenderClass::Man),
            "Female" | "Woman" => Some(GenderClass::Woman),
            _ => None,
        }
    }
}

/// How the winning class is picked from the two scores.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThresholdRule {
    /// `class` wins as soon as its score is strictly above `cutoff`,
    /// whatever the other score is.
    Favor { class: GenderClass, cutoff: f32 },
    /// Take the classifier's dominant label unchanged.
    Dominant,
}

impl ThresholdRule {
    pub fn pick(&self, scores: &GenderScores) -> GenderClass {
        match *self {
            ThresholdRule::Favor { class, cutoff } => {
                if scores.get(class) > cutoff {
                    class
                } else {
                    class.other()
                }
            }
            ThresholdRule::Dominant => scores.dominant(),
        }
    }
}

impl Default for ThresholdRule {
    fn default() -> Self {
        ThresholdRule::Favor {
            class: GenderClass::Woman,
            cutoff: 40.0,
        }
    }
}

/// Outcome of one decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    pub class: GenderClass,
    pub label: &'static str,
    /// Score of the winning class, in percent.
    pub confidence: f32,
    pub should_log: bool,
}

/// Thresholds and vocabulary for turning scores into log records.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionPolicy {
    pub rule: ThresholdRule,
    pub labels: LabelSet,
    /// A reading is only logged when its confidence is strictly above this.
    pub min_log_confidence: f32,
    /// Two written records are always more than this far apart.
    pub cooldown: Duration,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            rule: ThresholdRule::default(),
            labels: LabelSet::default(),
            min_log_confidence: 40.0,
            cooldown: Duration::milliseconds(2000),
        }
    }
}

impl DecisionPolicy {
    pub fn decide(
        &self,
        scores: &GenderScores,
        last_log: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Decision {
        let class = self.rule.pick(scores);
        // Looked up by class, so the display vocabulary cannot skew the score
        let confidence = scores.get(class);

        let cooled_down = match last_log {
            None => true,
            Some(last) => now - last > self.cooldown,
        };

        Decision {
            class,
            label: self.labels.label(class),
            confidence,
            should_log: confidence > self.min_log_confidence && cooled_down,
        }
    }
}

/// Convert a cooldown given in (fractional) seconds.
///
/// Negative and NaN inputs give no cooldown, huge ones saturate.
pub fn cooldown_from_secs(secs: f64) -> Duration {
    let millis = (secs * 1000.0).round().max(0.0);
    Duration::milliseconds(millis as i64)
}
