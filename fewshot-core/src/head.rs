//! Classification heads: turn support and query embeddings into per-class
//! scores for the query set.
//!
//! Heads score one task at a time, so their output is already
//! `(queries, n_way)`. Every head is generic over the tape, which lets the
//! same code run during training ([OwnedTape]) and validation ([NoneTape]).

use dfdx::nn::tensor_collection::{ModuleVisitor, TensorCollection, TensorOptions};
use dfdx::prelude::*;

use crate::episode::TaskShape;
use crate::error::{Error, Result};
use crate::labels::{check_range, one_hot_rows};

/// A batch of embeddings, shape `(rows, F)`.
pub type Features<F, D, T = NoneTape> = Tensor<(usize, F), f32, D, T>;

/// Per-query, per-class logits, shape `(queries, n_way)`.
pub type Scores<D, T = NoneTape> = Tensor<(usize, usize), f32, D, T>;

/// Computes class scores from query embeddings, support embeddings and
/// support labels.
pub trait ClassificationHead<D: Device<f32>>: TensorCollection<f32, D> {
    fn try_scores<F: Dim, T: Tape<f32, D>>(
        &self,
        dev: &D,
        query: Features<F, D, T>,
        support: Features<F, D, T>,
        support_labels: &[usize],
        task: TaskShape,
    ) -> Result<Scores<D, T>>;
}

/// Class prototypes (per-class mean of the support embeddings), stored
/// transposed as `(F, n_way)`.
///
/// Every class must have exactly `task.n_shot` support examples.
pub fn prototypes<F: Dim, D: Device<f32>, T: Tape<f32, D>>(
    dev: &D,
    support: Features<F, D, T>,
    labels: &[usize],
    task: TaskShape,
) -> Result<Tensor<(F, usize), f32, D, T>> {
    let rows = support.shape().0;
    if labels.len() != rows {
        return Err(Error::ShapeMismatch {
            what: "support labels",
            expected: rows,
            actual: labels.len(),
        });
    }
    if rows != task.support_len() {
        return Err(Error::ShapeMismatch {
            what: "support rows (n_way * n_shot)",
            expected: task.support_len(),
            actual: rows,
        });
    }
    check_range(labels, task.n_way)?;

    let mut counts = vec![0usize; task.n_way];
    for &label in labels {
        counts[label] += 1;
    }
    if let Some((class, n)) = counts.iter().enumerate().find(|(_, n)| **n != task.n_shot) {
        return Err(Error::InvalidTask(format!(
            "class {class} has {n} support examples, expected {}",
            task.n_shot
        )));
    }

    let one_hot: Tensor<(usize, usize), f32, D> =
        dev.tensor_from_vec(one_hot_rows(labels, task.n_way)?, (rows, task.n_way));
    // (F, S) x (S, W): sums of support embeddings per class
    let sums = support
        .permute::<(F, usize), Axes2<1, 0>>()
        .matmul(one_hot);
    Ok(sums * (1.0 / task.n_shot as f32))
}

/// Prototypical head: logits are negative squared Euclidean distances from
/// each query to each class prototype, divided by the embedding width.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHead;

impl<E: Dtype, D: Device<E>> TensorCollection<E, D> for ProtoHead {
    type To<E2: Dtype, D2: Device<E2>> = ProtoHead;

    fn iter_tensors<V: ModuleVisitor<Self, E, D>>(
        _: &mut V,
    ) -> std::result::Result<Option<Self::To<V::E2, V::D2>>, V::Err> {
        Ok(Some(ProtoHead))
    }
}

impl<D: Device<f32>> ClassificationHead<D> for ProtoHead {
    fn try_scores<F: Dim, T: Tape<f32, D>>(
        &self,
        dev: &D,
        query: Features<F, D, T>,
        support: Features<F, D, T>,
        support_labels: &[usize],
        task: TaskShape,
    ) -> Result<Scores<D, T>> {
        let (n_query, width) = (query.shape().0, query.shape().1.size());
        let protos = prototypes(dev, support, support_labels, task)?;
        let shape = (n_query, task.n_way);

        // |q - p|^2 = |q|^2 + |p|^2 - 2 q.p
        let q_sq = query
            .with_empty_tape()
            .square()
            .sum::<(usize,), Axis<1>>()
            .broadcast_like::<(usize, usize), Axis<1>>(&shape);
        let p_sq = protos
            .with_empty_tape()
            .square()
            .sum::<(usize,), Axis<0>>()
            .broadcast_like::<(usize, usize), Axis<0>>(&shape);
        let cross = query.matmul(protos);
        let dist = q_sq + p_sq - cross * 2.0;
        Ok(dist * (-1.0 / width as f32))
    }
}

/// Cosine head: cosine similarity between each query and each prototype,
/// multiplied by a learnable temperature `scale`.
#[derive(Debug, Clone)]
pub struct CosineHead<E: Dtype, D: Device<E>> {
    pub scale: Tensor<Rank0, E, D>,
}

impl<D: Device<f32>> CosineHead<f32, D> {
    /// Builds the head with an initial temperature.
    pub fn new(dev: &D, scale: f32) -> Self {
        Self {
            scale: dev.tensor_from_vec(vec![scale], ()),
        }
    }
}

impl<E: Dtype, D: Device<E>> TensorCollection<E, D> for CosineHead<E, D> {
    type To<E2: Dtype, D2: Device<E2>> = CosineHead<E2, D2>;

    fn iter_tensors<V: ModuleVisitor<Self, E, D>>(
        visitor: &mut V,
    ) -> std::result::Result<Option<Self::To<V::E2, V::D2>>, V::Err> {
        visitor.visit_fields(
            Self::tensor(
                "scale",
                |s| &s.scale,
                |s| &mut s.scale,
                TensorOptions::reset_to_ones(),
            ),
            |scale| CosineHead { scale },
        )
    }
}

const NORM_EPS: f32 = 1e-8;

impl<D: Device<f32>> ClassificationHead<D> for CosineHead<f32, D> {
    fn try_scores<F: Dim, T: Tape<f32, D>>(
        &self,
        dev: &D,
        query: Features<F, D, T>,
        support: Features<F, D, T>,
        support_labels: &[usize],
        task: TaskShape,
    ) -> Result<Scores<D, T>> {
        let q_shape = *query.shape();
        let protos = prototypes(dev, support, support_labels, task)?;
        let p_shape = *protos.shape();

        let q_norm = (query.with_empty_tape().square().sum::<(usize,), Axis<1>>() + NORM_EPS)
            .sqrt()
            .broadcast_like::<(usize, F), Axis<1>>(&q_shape);
        let p_norm = (protos.with_empty_tape().square().sum::<(usize,), Axis<0>>() + NORM_EPS)
            .sqrt()
            .broadcast_like::<(F, usize), Axis<0>>(&p_shape);

        let shape = (q_shape.0, task.n_way);
        let cosine = (query / q_norm).matmul(protos / p_norm);
        let scale = self
            .scale
            .retaped::<T>()
            .broadcast_like::<(usize, usize), Axes2<0, 1>>(&shape);
        Ok(cosine * scale)
    }
}
