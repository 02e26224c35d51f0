//! Loss and accuracy bookkeeping for training steps and validation runs.

use std::fmt;

use crate::error::{Error, Result};
use crate::labels::argmax;

/// Result of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    /// Task loss plus the L2 penalty.
    pub loss: f32,
    /// Fraction of query examples classified correctly.
    pub accuracy: f32,
}

/// Aggregate of a validation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationMetrics {
    /// Mean episode loss.
    pub loss: f32,
    /// `correct / total` over every query example of every episode.
    pub accuracy: f32,
    pub episodes: usize,
    pub correct: usize,
    pub total: usize,
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss {:.4}, accuracy {:.2}% ({}/{}) over {} episodes",
            self.loss,
            self.accuracy * 100.0,
            self.correct,
            self.total,
            self.episodes
        )
    }
}

/// Predicted class of one score row. A NaN score wins over every number,
/// so a row holding NaNs predicts its first NaN column.
pub fn predicted_class(row: &[f32]) -> Option<usize> {
    row.iter().position(|v| v.is_nan()).or_else(|| argmax(row))
}

/// Counts rows of the row-major `(rows, classes)` score buffer whose
/// [predicted_class] equals the label.
pub fn count_correct(scores: &[f32], classes: usize, labels: &[usize]) -> Result<usize> {
    if classes == 0 {
        return Err(Error::EmptySet { what: "score columns" });
    }
    if scores.len() != labels.len() * classes {
        return Err(Error::ShapeMismatch {
            what: "score buffer length",
            expected: labels.len() * classes,
            actual: scores.len(),
        });
    }
    Ok(scores
        .chunks(classes)
        .zip(labels)
        .filter(|(row, label)| predicted_class(row) == Some(**label))
        .count())
}

/// `correct / total`, or `0` for an empty set.
pub fn accuracy(correct: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        correct as f32 / total as f32
    }
}

/// Running totals over validation episodes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Accumulator {
    total_loss: f64,
    episodes: usize,
    correct: usize,
    total: usize,
}

impl Accumulator {
    pub fn push(&mut self, loss: f32, correct: usize, total: usize) {
        self.total_loss += loss as f64;
        self.episodes += 1;
        self.correct += correct;
        self.total += total;
    }

    pub fn mean_loss(&self) -> f32 {
        if self.episodes == 0 {
            0.0
        } else {
            (self.total_loss / self.episodes as f64) as f32
        }
    }

    pub fn accuracy(&self) -> f32 {
        accuracy(self.correct, self.total)
    }

    pub fn finish(self) -> Result<ValidationMetrics> {
        if self.episodes == 0 {
            return Err(Error::NoEpisodes);
        }
        Ok(ValidationMetrics {
            loss: self.mean_loss(),
            accuracy: self.accuracy(),
            episodes: self.episodes,
            correct: self.correct,
            total: self.total,
        })
    }
}
