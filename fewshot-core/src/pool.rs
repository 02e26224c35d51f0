//! An in-memory [EpisodeSource] over a labeled dataset.
//!
//! Classes are split once into a training partition and a held-out
//! partition. Each episode picks `n_way` classes from one partition and
//! draws `n_shot + n_query` distinct examples per class.

use std::collections::BTreeMap;

use rand::prelude::*;
use tracing::debug;

use crate::episode::{ClassSplit, Episode, EpisodeSource, LabeledImages, TaskShape};
use crate::error::{Error, Result};
use crate::labels::Labels;

/// Episode geometry for a [ClassPool].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub n_way: usize,
    pub n_shot: usize,
    /// Query examples per class.
    pub n_query: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            n_way: 5,
            n_shot: 5,
            n_query: 15,
        }
    }
}

/// Labeled examples grouped by class, partitioned into train and held-out
/// classes.
#[derive(Debug, Clone)]
pub struct ClassPool<const IMG: usize> {
    config: PoolConfig,
    task: TaskShape,
    classes: BTreeMap<usize, Vec<Vec<f32>>>,
    train: Vec<usize>,
    held_out: Vec<usize>,
    rng: StdRng,
}

impl<const IMG: usize> ClassPool<IMG> {
    /// Builds a pool from `(image, class)` pairs. `held_out` lists the
    /// classes reserved for validation; every other class is used for
    /// training.
    pub fn new<I>(
        config: PoolConfig,
        examples: I,
        held_out_classes: &[usize],
        seed: u64,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<f32>, usize)>,
    {
        let task = TaskShape::new(config.n_way, config.n_shot)?;
        if config.n_query == 0 {
            return Err(Error::InvalidTask("n_query must be positive".into()));
        }

        let mut classes: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
        for (image, class) in examples {
            if image.len() != IMG {
                return Err(Error::ShapeMismatch {
                    what: "image size",
                    expected: IMG,
                    actual: image.len(),
                });
            }
            classes.entry(class).or_default().push(image);
        }

        let (held_out, train): (Vec<usize>, Vec<usize>) = classes
            .keys()
            .copied()
            .partition(|c| held_out_classes.contains(c));

        let pool = Self {
            config,
            task,
            classes,
            train,
            held_out,
            rng: StdRng::seed_from_u64(seed),
        };
        pool.check_split(ClassSplit::Train)?;
        pool.check_split(ClassSplit::HeldOut)?;
        debug!(
            train = pool.train.len(),
            held_out = pool.held_out.len(),
            "built class pool"
        );
        Ok(pool)
    }

    /// Class ids in `split`, in ascending order.
    pub fn classes(&self, split: ClassSplit) -> &[usize] {
        match split {
            ClassSplit::Train => &self.train,
            ClassSplit::HeldOut => &self.held_out,
        }
    }

    fn check_split(&self, split: ClassSplit) -> Result<()> {
        let ids = self.classes(split);
        if ids.len() < self.config.n_way {
            return Err(Error::NotEnoughData(format!(
                "{split:?} partition has {} classes, episodes need {}",
                ids.len(),
                self.config.n_way
            )));
        }
        let per_class = self.config.n_shot + self.config.n_query;
        for id in ids {
            let n = self.classes[id].len();
            if n < per_class {
                return Err(Error::NotEnoughData(format!(
                    "class {id} has {n} examples, episodes need {per_class}"
                )));
            }
        }
        Ok(())
    }
}

impl<const IMG: usize> EpisodeSource<IMG> for ClassPool<IMG> {
    fn n_ways(&self) -> usize {
        self.task.n_way
    }

    fn n_shots(&self) -> usize {
        self.task.n_shot
    }

    fn sample(&mut self, split: ClassSplit) -> Result<Episode<IMG>> {
        let PoolConfig {
            n_way,
            n_shot,
            n_query,
        } = self.config;
        let ids = match split {
            ClassSplit::Train => &self.train,
            ClassSplit::HeldOut => &self.held_out,
        };
        let picked: Vec<usize> = ids.choose_multiple(&mut self.rng, n_way).copied().collect();

        let mut support = Vec::with_capacity(n_way * n_shot);
        let mut query = Vec::with_capacity(n_way * n_query);
        for (label, class) in picked.iter().enumerate() {
            let examples = &self.classes[class];
            let mut drawn = examples.choose_multiple(&mut self.rng, n_shot + n_query);
            support.extend(drawn.by_ref().take(n_shot).map(|x| (x, label)));
            query.extend(drawn.map(|x| (x, label)));
        }
        support.shuffle(&mut self.rng);
        query.shuffle(&mut self.rng);

        Ok(Episode {
            support: collate(&support, n_way)?,
            query: collate(&query, n_way)?,
        })
    }
}

fn collate<const IMG: usize>(
    rows: &[(&Vec<f32>, usize)],
    n_way: usize,
) -> Result<LabeledImages<IMG>> {
    let mut images = Vec::with_capacity(rows.len() * IMG);
    let mut labels = Vec::with_capacity(rows.len());
    for (image, label) in rows {
        images.extend_from_slice(image);
        labels.push(*label);
    }
    Ok(LabeledImages::new(images, Labels::one_hot(&labels, n_way)?))
}
