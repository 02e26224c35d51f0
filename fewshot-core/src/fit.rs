//! Multi-episode driver: repeated [train_step]s with periodic validation.

use dfdx::prelude::*;
use tracing::info;

use crate::config::FitConfig;
use crate::criterion::Criterion;
use crate::episode::EpisodeSource;
use crate::error::Result;
use crate::metrics::{StepMetrics, ValidationMetrics};
use crate::model::FewShotModel;
use crate::train::train_step;
use crate::validate::validate;

/// History of a [fit] run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitReport {
    /// One entry per training episode.
    pub steps: Vec<StepMetrics>,
    /// `(step, metrics)` for every validation run.
    pub validations: Vec<(usize, ValidationMetrics)>,
    /// Index into `validations` of the highest accuracy seen.
    pub best: Option<usize>,
}

impl FitReport {
    pub fn best_validation(&self) -> Option<&(usize, ValidationMetrics)> {
        self.best.map(|i| &self.validations[i])
    }

    pub fn last_validation(&self) -> Option<&(usize, ValidationMetrics)> {
        self.validations.last()
    }

    fn push_validation(&mut self, step: usize, metrics: ValidationMetrics) {
        let better = self
            .best_validation()
            .map_or(true, |(_, best)| metrics.accuracy > best.accuracy);
        self.validations.push((step, metrics));
        if better {
            self.best = Some(self.validations.len() - 1);
        }
    }
}

/// Runs `config.train_episodes` training steps, validating every
/// `config.val_interval` steps and after the last one.
pub fn fit<const IMG: usize, S, M, O, C, D>(
    source: &mut S,
    model: &mut M,
    opt: &mut O,
    criterion: &C,
    dev: &D,
    config: &FitConfig,
) -> Result<FitReport>
where
    S: EpisodeSource<IMG>,
    M: FewShotModel<IMG, D>,
    O: Optimizer<M, D, f32>,
    C: Criterion<D>,
    D: Device<f32>,
{
    config.validate()?;
    let opts = config.validation();
    let mut report = FitReport::default();

    for i in 1..=config.train_episodes {
        report
            .steps
            .push(train_step(source, model, opt, criterion, dev)?);

        if i % config.log_interval == 0 {
            let window = &report.steps[report.steps.len() - config.log_interval..];
            let n = window.len() as f32;
            info!(
                step = i,
                loss = window.iter().map(|m| m.loss).sum::<f32>() / n,
                accuracy = window.iter().map(|m| m.accuracy).sum::<f32>() / n,
                "train"
            );
        }

        if i % config.val_interval == 0 || i == config.train_episodes {
            let metrics = validate(source, model, criterion, dev, &opts)?;
            info!(step = i, "{metrics}");
            report.push_validation(i, metrics);
        }
    }
    Ok(report)
}
