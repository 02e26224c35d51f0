//! Task losses over query scores and class-index labels.

use dfdx::prelude::*;

use crate::error::{Error, Result};
use crate::head::Scores;
use crate::labels::one_hot_rows;

/// A classification loss, generic over the tape so the same criterion is
/// used for training and validation.
pub trait Criterion<D: Device<f32>> {
    fn try_loss<T: Tape<f32, D>>(
        &self,
        dev: &D,
        scores: Scores<D, T>,
        labels: &[usize],
    ) -> Result<Tensor<Rank0, f32, D, T>>;
}

/// Mean cross entropy over the query set.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CrossEntropy;

impl<D: Device<f32>> Criterion<D> for CrossEntropy {
    fn try_loss<T: Tape<f32, D>>(
        &self,
        dev: &D,
        scores: Scores<D, T>,
        labels: &[usize],
    ) -> Result<Tensor<Rank0, f32, D, T>> {
        let shape = check_rows(&scores, labels)?;
        let targets = dev.tensor_from_vec(one_hot_rows(labels, shape.1)?, shape);
        Ok(cross_entropy_with_logits_loss(scores, targets))
    }
}

/// Cross entropy against smoothed targets: the true class gets
/// `1 - epsilon`, every other class `epsilon / (n_way - 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedCrossEntropy {
    pub epsilon: f32,
}

impl<D: Device<f32>> Criterion<D> for SmoothedCrossEntropy {
    fn try_loss<T: Tape<f32, D>>(
        &self,
        dev: &D,
        scores: Scores<D, T>,
        labels: &[usize],
    ) -> Result<Tensor<Rank0, f32, D, T>> {
        let shape = check_rows(&scores, labels)?;
        let classes = shape.1;
        let mut targets = one_hot_rows(labels, classes)?;
        if classes > 1 {
            let off = self.epsilon / (classes - 1) as f32;
            for t in targets.iter_mut() {
                *t = if *t == 1.0 { 1.0 - self.epsilon } else { off };
            }
        }
        let targets = dev.tensor_from_vec(targets, shape);
        Ok(cross_entropy_with_logits_loss(scores, targets))
    }
}

fn check_rows<D: Device<f32>, T>(scores: &Scores<D, T>, labels: &[usize]) -> Result<(usize, usize)> {
    let shape = *scores.shape();
    if shape.0 != labels.len() {
        return Err(Error::ShapeMismatch {
            what: "query labels",
            expected: shape.0,
            actual: labels.len(),
        });
    }
    if shape.0 == 0 {
        return Err(Error::EmptySet { what: "query set" });
    }
    Ok(shape)
}
