//! # fewshot-core
//!
//! Episodic training and validation loops for few-shot image classifiers,
//! built on [dfdx].
//!
//! A few-shot task (an *episode*) has a support set of `n_way * n_shot`
//! labeled images and a query set to classify. The loops in this crate
//! sample episodes from an [EpisodeSource], score the query set with a
//! model conditioned on the support set, and add a fixed-weight L2 penalty
//! to the task loss:
//!
//! ```text
//! loss = criterion(scores, query_labels) + 1e-4 * sum_p ||p||_2
//! ```
//!
//! # Models
//!
//! Two model shapes are supported:
//! - a unified [FewShotModel] taking support images, support labels and
//!   query images, driven by [train::train_step] and [validate::validate];
//! - an embedding network plus a [ClassificationHead], driven by
//!   [train::train_two_stage_step] and [validate::validate_two_stage].
//!
//! Any dfdx module mapping `(usize, Const<IMG>)` images to `(usize, F)`
//! features is an [EmbeddingNet], and every `(embedding, head)` tuple is a
//! [FewShotModel], so the unified loops also accept the pair.
//!
//! # Training
//!
//! ```rust,no_run
//! use dfdx::optim::Adam;
//! use dfdx::prelude::*;
//! use fewshot_core::prelude::*;
//!
//! let dev: Cpu = Default::default();
//! let examples = fewshot_core::synthetic::gaussian_classes::<16>(10, 40, 1.0, 0).unwrap();
//! let mut pool = ClassPool::<16>::new(PoolConfig::default(), examples, &[5, 6, 7, 8, 9], 0).unwrap();
//!
//! let mut model = (
//!     dev.build_module::<(Linear<16, 32>, ReLU, Linear<32, 8>), f32>(),
//!     ProtoHead,
//! );
//! let mut opt = Adam::new(&model, Default::default());
//! let step = train::train_step(&mut pool, &mut model, &mut opt, &CrossEntropy, &dev).unwrap();
//! assert!((0.0..=1.0).contains(&step.accuracy));
//! ```

pub mod config;
pub mod criterion;
pub mod episode;
pub mod error;
pub mod fit;
pub mod head;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod regularize;
pub mod synthetic;
pub mod train;
pub mod validate;

pub use config::{ExperimentConfig, FitConfig, OptimizerKind};
pub use criterion::{Criterion, CrossEntropy, SmoothedCrossEntropy};
pub use episode::{ClassSplit, Episode, EpisodeSource, Images, LabeledImages, TaskShape};
pub use error::{Error, Result};
pub use fit::{fit, FitReport};
pub use head::{ClassificationHead, CosineHead, Features, ProtoHead, Scores};
pub use labels::Labels;
pub use metrics::{StepMetrics, ValidationMetrics};
pub use model::{EmbeddingNet, FewShotModel, TrainTape};
pub use pool::{ClassPool, PoolConfig};
pub use validate::ValidationOptions;

/// Contains everything needed to sample episodes and run the loops.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::criterion::*;
    pub use crate::episode::*;
    pub use crate::error::{Error as FewShotError, Result as FewShotResult};
    pub use crate::fit::*;
    pub use crate::head::*;
    pub use crate::labels::Labels;
    pub use crate::metrics::*;
    pub use crate::model::*;
    pub use crate::pool::*;
    pub use crate::regularize::L2_WEIGHT;
    pub use crate::validate::ValidationOptions;
    pub use crate::{train, validate};
}
