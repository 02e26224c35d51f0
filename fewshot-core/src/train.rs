//! One optimizer step per sampled episode.
//!
//! Both steps sample from [ClassSplit::Train], record the forward pass on an
//! [OwnedTape] that starts at the support images, add the traced L2 penalty,
//! then run one backward pass and one [Optimizer::update].

use dfdx::nn::tensor_collection::TensorCollection;
use dfdx::prelude::*;
use tracing::{debug, warn};

use crate::criterion::Criterion;
use crate::episode::{ClassSplit, EpisodeSource, Images, LabeledImages};
use crate::error::{Error, Result};
use crate::head::{ClassificationHead, Scores};
use crate::metrics::{accuracy, count_correct, StepMetrics};
use crate::model::{EmbeddingNet, FewShotModel, TrainTape};
use crate::regularize::with_l2_penalty;

/// Trains a unified model on one episode.
///
/// The support labels are handed to the model as the source produced them;
/// only the query labels are stripped to class indices here.
pub fn train_step<const IMG: usize, S, M, O, C, D>(
    source: &mut S,
    model: &mut M,
    opt: &mut O,
    criterion: &C,
    dev: &D,
) -> Result<StepMetrics>
where
    S: EpisodeSource<IMG>,
    M: FewShotModel<IMG, D>,
    O: Optimizer<M, D, f32>,
    C: Criterion<D>,
    D: Device<f32>,
{
    let task = source.task()?;
    let episode = source.sample(ClassSplit::Train)?;
    episode.check()?;
    let query_labels = episode.query.labels.to_indices()?;

    let (support, query) = traced_inputs(model, dev, &episode.support, &episode.query)?;
    let scores = model.try_scores_mut(dev, support, &episode.support.labels, query, task)?;
    step(model, opt, criterion, dev, scores, &query_labels)
}

/// Trains an `(embedding, head)` pair on one episode.
///
/// Support and query labels are both stripped. The embedding runs on the
/// support and query images separately, and the head sees the task's
/// `n_way`/`n_shot`. The penalty and the update cover both networks.
pub fn train_two_stage_step<const IMG: usize, S, Emb, H, O, C, D>(
    source: &mut S,
    model: &mut (Emb, H),
    opt: &mut O,
    criterion: &C,
    dev: &D,
) -> Result<StepMetrics>
where
    S: EpisodeSource<IMG>,
    Emb: EmbeddingNet<IMG, D>,
    H: ClassificationHead<D>,
    O: Optimizer<(Emb, H), D, f32>,
    C: Criterion<D>,
    D: Device<f32>,
{
    let task = source.task()?;
    let episode = source.sample(ClassSplit::Train)?;
    episode.check()?;
    let support_labels = episode.support.labels.to_indices()?;
    let query_labels = episode.query.labels.to_indices()?;

    let (support, query) = traced_inputs(model, dev, &episode.support, &episode.query)?;
    let support = model.0.try_embed_mut(support)?;
    let query = model.0.try_embed_mut(query)?;
    let scores = model
        .1
        .try_scores(dev, query, support, &support_labels, task)?;
    step(model, opt, criterion, dev, scores, &query_labels)
}

/// Support images carry the freshly allocated gradients, query images an
/// empty tape that merges into the support tape.
#[allow(clippy::type_complexity)]
fn traced_inputs<const IMG: usize, M, D>(
    model: &M,
    dev: &D,
    support: &LabeledImages<IMG>,
    query: &LabeledImages<IMG>,
) -> Result<(Images<IMG, D, TrainTape<D>>, Images<IMG, D, TrainTape<D>>)>
where
    M: TensorCollection<f32, D>,
    D: Device<f32>,
{
    let grads = model.try_alloc_grads().map_err(Error::backend)?;
    Ok((
        support.to_device(dev).traced(grads),
        query.to_device(dev).retaped::<TrainTape<D>>(),
    ))
}

fn step<M, O, C, D>(
    model: &mut M,
    opt: &mut O,
    criterion: &C,
    dev: &D,
    scores: Scores<D, TrainTape<D>>,
    query_labels: &[usize],
) -> Result<StepMetrics>
where
    M: TensorCollection<f32, D>,
    O: Optimizer<M, D, f32>,
    C: Criterion<D>,
    D: Device<f32>,
{
    let classes = scores.shape().1;
    let correct = count_correct(&scores.as_vec(), classes, query_labels)?;

    let loss = criterion.try_loss(dev, scores, query_labels)?;
    let loss = with_l2_penalty(loss, model)?;
    let loss_value = loss.as_vec()[0];
    if !loss_value.is_finite() {
        warn!(loss = loss_value, "non-finite training loss");
    }

    let grads = loss.try_backward().map_err(Error::backend)?;
    opt.update(model, &grads)
        .map_err(|e| Error::Optimizer(format!("{e:?}")))?;

    let metrics = StepMetrics {
        loss: loss_value,
        accuracy: accuracy(correct, query_labels.len()),
    };
    debug!(loss = metrics.loss, accuracy = metrics.accuracy, "train step");
    Ok(metrics)
}
