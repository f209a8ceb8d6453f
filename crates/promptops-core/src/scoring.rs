use promptops_types::EvaluationScores;
use serde::{Deserialize, Serialize};

/// Weights of the composite score.
///
/// `overall = accuracy*w_a + clarity*w_c + (100 - hallucination_risk)*w_h`,
/// rounded to one decimal. The defaults (0.5 / 0.3 / 0.2) are the ones all
/// stored scores were computed with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
	#[serde(default = "default_accuracy")]
	pub accuracy: f64,
	#[serde(default = "default_clarity")]
	pub clarity: f64,
	#[serde(default = "default_hallucination")]
	pub hallucination: f64,
	/// Clamp each input to [0, 100] before weighting. Off by default, which
	/// lets out-of-range provider values flow through unchanged.
	#[serde(default)]
	pub clamp_inputs: bool,
}

fn default_accuracy() -> f64 {
	0.5
}

fn default_clarity() -> f64 {
	0.3
}

fn default_hallucination() -> f64 {
	0.2
}

impl Default for ScoreWeights {
	fn default() -> Self {
		Self {
			accuracy: default_accuracy(),
			clarity: default_clarity(),
			hallucination: default_hallucination(),
			clamp_inputs: false,
		}
	}
}

impl ScoreWeights {
	pub fn overall(&self, scores: &EvaluationScores) -> f64 {
		let prep = |v: f64| if self.clamp_inputs { v.clamp(0.0, 100.0) } else { v };
		let raw = prep(scores.accuracy) * self.accuracy
			+ prep(scores.clarity) * self.clarity
			+ (100.0 - prep(scores.hallucination_risk)) * self.hallucination;
		round_one_decimal(raw)
	}
}

/// Composite score with the default weights. Never rejects input.
pub fn score(accuracy: f64, clarity: f64, hallucination_risk: f64) -> f64 {
	ScoreWeights::default().overall(&EvaluationScores {
		accuracy,
		clarity,
		hallucination_risk,
	})
}

/// Round to one decimal place, ties away from zero.
pub fn round_one_decimal(value: f64) -> f64 {
	(value * 10.0).round() / 10.0
}
