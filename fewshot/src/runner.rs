//! Builds a synthetic experiment from an [ExperimentConfig] and trains it.

use dfdx::optim::{Adam, AdamConfig, Momentum, Sgd, SgdConfig};
use dfdx::prelude::*;
use tracing::info;

use fewshot_core::prelude::*;
use fewshot_core::synthetic::gaussian_classes;

/// Flattened image size of the synthetic pool.
pub const IMG: usize = 64;

/// Reference embedding network.
pub type Embedding = (Linear<IMG, 128>, ReLU, Linear<128, 64>);

/// Either task loss, picked from `label_smoothing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskLoss {
    Plain(CrossEntropy),
    Smoothed(SmoothedCrossEntropy),
}

impl TaskLoss {
    pub fn new(label_smoothing: f32) -> Self {
        if label_smoothing > 0.0 {
            Self::Smoothed(SmoothedCrossEntropy {
                epsilon: label_smoothing,
            })
        } else {
            Self::Plain(CrossEntropy)
        }
    }
}

impl<D: Device<f32>> Criterion<D> for TaskLoss {
    fn try_loss<T: Tape<f32, D>>(
        &self,
        dev: &D,
        scores: Scores<D, T>,
        labels: &[usize],
    ) -> FewShotResult<Tensor<Rank0, f32, D, T>> {
        match self {
            Self::Plain(c) => c.try_loss(dev, scores, labels),
            Self::Smoothed(c) => c.try_loss(dev, scores, labels),
        }
    }
}

/// Class pool described by `config.pool`, seeded with `config.seed`.
pub fn build_pool(config: &ExperimentConfig) -> FewShotResult<ClassPool<IMG>> {
    let pool = &config.pool;
    let examples = gaussian_classes::<IMG>(
        pool.classes,
        pool.examples_per_class,
        pool.noise,
        config.seed,
    )?;
    ClassPool::new(pool.pool_config(), examples, &pool.held_out(), config.seed)
}

/// Trains the reference `(Embedding, ProtoHead)` model with the configured
/// optimizer and loss.
pub fn run<D: Device<f32> + DeviceBuildExt>(
    config: &ExperimentConfig,
    dev: &D,
) -> FewShotResult<FitReport> {
    config.validate()?;
    let mut pool = build_pool(config)?;
    let mut model = (dev.build_module::<Embedding, f32>(), ProtoHead);
    let criterion = TaskLoss::new(config.label_smoothing);
    info!(
        params = model.num_trainable_params(),
        n_way = config.pool.n_way,
        n_shot = config.pool.n_shot,
        "starting run"
    );

    let opt = &config.optimizer;
    match opt.kind {
        OptimizerKind::Adam => {
            let mut adam = Adam::new(
                &model,
                AdamConfig {
                    lr: opt.lr,
                    ..Default::default()
                },
            );
            fit(&mut pool, &mut model, &mut adam, &criterion, dev, &config.fit)
        }
        OptimizerKind::Sgd => {
            let mut sgd = Sgd::new(
                &model,
                SgdConfig {
                    lr: opt.lr,
                    momentum: opt.momentum.map(Momentum::Classic),
                    weight_decay: None,
                },
            );
            fit(&mut pool, &mut model, &mut sgd, &criterion, dev, &config.fit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.pool = PoolSettings {
            n_way: 3,
            n_shot: 2,
            n_query: 3,
            classes: 8,
            held_out_classes: 3,
            examples_per_class: 6,
            noise: 0.5,
        };
        config.fit = FitConfig {
            train_episodes: 4,
            log_interval: 2,
            val_interval: 2,
            val_episodes: 2,
            progress: false,
        };
        config
    }

    #[test]
    fn test_pool_follows_config() {
        let pool = build_pool(&small()).unwrap();
        assert_eq!(pool.classes(ClassSplit::HeldOut), &[5, 6, 7]);
        assert_eq!(pool.n_ways(), 3);
        assert_eq!(pool.n_shots(), 2);
    }

    #[test]
    fn test_run_with_both_optimizers() {
        let dev: Cpu = Default::default();
        let mut config = small();
        let report = run(&config, &dev).unwrap();
        assert_eq!(report.steps.len(), 4);
        assert_eq!(report.validations.len(), 2);

        config.optimizer = OptimizerConfig {
            kind: OptimizerKind::Sgd,
            lr: 1e-2,
            momentum: Some(0.9),
        };
        config.label_smoothing = 0.1;
        let report = run(&config, &dev).unwrap();
        assert!(report.steps.iter().all(|s| s.loss.is_finite()));
    }

    #[test]
    fn test_task_loss_choice() {
        assert_eq!(TaskLoss::new(0.0), TaskLoss::Plain(CrossEntropy));
        assert!(matches!(TaskLoss::new(0.2), TaskLoss::Smoothed(_)));
    }
}
