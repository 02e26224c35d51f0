//! Evaluation over many held-out episodes.
//!
//! Nothing here records a tape: inputs are [NoneTape] tensors and models
//! run through [Module::forward], so no gradients are tracked at any point
//! of the loop.

use dfdx::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::criterion::Criterion;
use crate::episode::{ClassSplit, Episode, EpisodeSource, TaskShape};
use crate::error::{Error, Result};
use crate::head::{ClassificationHead, Scores};
use crate::metrics::{count_correct, Accumulator, ValidationMetrics};
use crate::model::{EmbeddingNet, FewShotModel};
use crate::regularize::l2_penalty;

/// How long a validation run is, and whether it draws a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    pub episodes: usize,
    pub progress: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            episodes: 400,
            progress: true,
        }
    }
}

impl ValidationOptions {
    pub fn episodes(episodes: usize) -> Self {
        Self {
            episodes,
            ..Default::default()
        }
    }

    pub fn quiet(mut self) -> Self {
        self.progress = false;
        self
    }
}

/// Validates a unified model on `opts.episodes` held-out episodes.
///
/// Returns the mean episode loss (task loss plus the L2 penalty) and the
/// accuracy over every query example seen.
pub fn validate<const IMG: usize, S, M, C, D>(
    source: &mut S,
    model: &M,
    criterion: &C,
    dev: &D,
    opts: &ValidationOptions,
) -> Result<ValidationMetrics>
where
    S: EpisodeSource<IMG>,
    M: FewShotModel<IMG, D>,
    C: Criterion<D>,
    D: Device<f32>,
{
    let penalty = l2_penalty(model)?;
    run(source, criterion, dev, opts, penalty, |episode, task| {
        model.try_scores(
            dev,
            episode.support.to_device(dev),
            &episode.support.labels,
            episode.query.to_device(dev),
            task,
        )
    })
}

/// Validates an `(embedding, head)` pair on `opts.episodes` held-out
/// episodes, stripping both support and query labels.
pub fn validate_two_stage<const IMG: usize, S, Emb, H, C, D>(
    source: &mut S,
    model: &(Emb, H),
    criterion: &C,
    dev: &D,
    opts: &ValidationOptions,
) -> Result<ValidationMetrics>
where
    S: EpisodeSource<IMG>,
    Emb: EmbeddingNet<IMG, D>,
    H: ClassificationHead<D>,
    C: Criterion<D>,
    D: Device<f32>,
{
    let penalty = l2_penalty(model)?;
    let (embedding, head) = model;
    run(source, criterion, dev, opts, penalty, |episode, task| {
        let support_labels = episode.support.labels.to_indices()?;
        let support = embedding.try_embed(episode.support.to_device(dev))?;
        let query = embedding.try_embed(episode.query.to_device(dev))?;
        head.try_scores(dev, query, support, &support_labels, task)
    })
}

fn run<const IMG: usize, S, C, D, F>(
    source: &mut S,
    criterion: &C,
    dev: &D,
    opts: &ValidationOptions,
    penalty: f32,
    mut scores_of: F,
) -> Result<ValidationMetrics>
where
    S: EpisodeSource<IMG>,
    C: Criterion<D>,
    D: Device<f32>,
    F: FnMut(&Episode<IMG>, TaskShape) -> Result<Scores<D>>,
{
    if opts.episodes == 0 {
        return Err(Error::NoEpisodes);
    }
    let task = source.task()?;
    let bar = progress_bar(opts);

    let mut acc = Accumulator::default();
    for _ in 0..opts.episodes {
        let episode = source.sample(ClassSplit::HeldOut)?;
        episode.check()?;
        let query_labels = episode.query.labels.to_indices()?;

        let scores = scores_of(&episode, task)?;
        let classes = scores.shape().1;
        let correct = count_correct(&scores.as_vec(), classes, &query_labels)?;
        let loss = criterion.try_loss(dev, scores, &query_labels)?.as_vec()[0] + penalty;

        acc.push(loss, correct, query_labels.len());
        bar.set_message(format!(
            "loss {:.4} acc {:.2}%",
            acc.mean_loss(),
            100.0 * acc.accuracy()
        ));
        bar.inc(1);
    }
    bar.finish_and_clear();

    let metrics = acc.finish()?;
    info!(
        episodes = metrics.episodes,
        loss = metrics.loss,
        accuracy = metrics.accuracy,
        "validation"
    );
    Ok(metrics)
}

fn progress_bar(opts: &ValidationOptions) -> ProgressBar {
    if !opts.progress {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(opts.episodes as u64);
    if let Ok(style) = ProgressStyle::with_template("validate {pos}/{len} {bar:30} {msg}") {
        bar.set_style(style);
    }
    bar
}
