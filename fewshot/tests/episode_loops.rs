use dfdx::optim::*;
use dfdx::prelude::*;
use fewshot::prelude::*;
use fewshot::synthetic::gaussian_classes;

const IMG: usize = 8;

type Embedding = (Linear<IMG, 16>, ReLU, Linear<16, 8>);

fn pool(seed: u64) -> ClassPool<IMG> {
    let config = PoolConfig {
        n_way: 3,
        n_shot: 2,
        n_query: 4,
    };
    let examples = gaussian_classes::<IMG>(9, 12, 0.3, seed).unwrap();
    ClassPool::new(config, examples, &[6, 7, 8], seed).unwrap()
}

/// Replays the first training episode of a pool.
struct Replay(Episode<IMG>);

impl EpisodeSource<IMG> for Replay {
    fn n_ways(&self) -> usize {
        3
    }
    fn n_shots(&self) -> usize {
        2
    }
    fn sample(&mut self, _: ClassSplit) -> FewShotResult<Episode<IMG>> {
        Ok(self.0.clone())
    }
}

#[test]
fn test_repeated_episode_loss_decreases() {
    let dev = Cpu::seed_from_u64(0);
    let mut source = Replay(pool(0).sample(ClassSplit::Train).unwrap());
    let mut model = (dev.build_module::<Embedding, f32>(), ProtoHead);
    let mut opt = Adam::new(
        &model,
        AdamConfig {
            lr: 1e-2,
            ..Default::default()
        },
    );

    let losses: Vec<f32> = (0..30)
        .map(|_| {
            train::train_step(&mut source, &mut model, &mut opt, &CrossEntropy, &dev)
                .unwrap()
                .loss
        })
        .collect();
    assert!(losses[29] < losses[0], "{losses:?}");
}

#[test]
fn test_two_stage_training_with_cosine_head() {
    let dev = Cpu::seed_from_u64(1);
    let mut source = Replay(pool(1).sample(ClassSplit::Train).unwrap());
    let mut model = (
        dev.build_module::<Embedding, f32>(),
        CosineHead::new(&dev, 10.0),
    );
    let mut opt = Adam::new(
        &model,
        AdamConfig {
            lr: 1e-2,
            ..Default::default()
        },
    );

    let first = train::train_two_stage_step(&mut source, &mut model, &mut opt, &CrossEntropy, &dev)
        .unwrap();
    let mut last = first;
    for _ in 0..30 {
        last = train::train_two_stage_step(&mut source, &mut model, &mut opt, &CrossEntropy, &dev)
            .unwrap();
    }
    assert!(last.loss < first.loss);
    assert!((0.0..=1.0).contains(&last.accuracy));
}

#[test]
fn test_validate_single_episode_matches_manual_pass() {
    let dev = Cpu::seed_from_u64(2);
    let model = (dev.build_module::<Embedding, f32>(), ProtoHead);
    let opts = ValidationOptions {
        episodes: 1,
        progress: false,
    };

    let metrics = validate::validate_two_stage(&mut pool(3), &model, &CrossEntropy, &dev, &opts)
        .unwrap();

    let episode = pool(3).sample(ClassSplit::HeldOut).unwrap();
    let support_labels = episode.support.labels.to_indices().unwrap();
    let query_labels = episode.query.labels.to_indices().unwrap();
    let support = model.0.forward(episode.support.to_device(&dev));
    let query = model.0.forward(episode.query.to_device(&dev));
    let scores = ProtoHead
        .try_scores(
            &dev,
            query,
            support,
            &support_labels,
            TaskShape::new(3, 2).unwrap(),
        )
        .unwrap();
    let correct = fewshot::metrics::count_correct(&scores.as_vec(), 3, &query_labels).unwrap();
    let loss = CrossEntropy
        .try_loss(&dev, scores, &query_labels)
        .unwrap()
        .array()
        + fewshot::regularize::l2_penalty(&model).unwrap();

    assert_eq!(metrics.total, 12);
    assert_eq!(metrics.correct, correct);
    assert!((metrics.loss - loss).abs() < 1e-5);
    assert_eq!(metrics.accuracy, correct as f32 / 12.0);
}

#[test]
fn test_validation_accuracy_in_range() {
    let dev = Cpu::seed_from_u64(4);
    let model = (dev.build_module::<Embedding, f32>(), ProtoHead);
    for episodes in [1, 3, 10] {
        let opts = ValidationOptions {
            episodes,
            progress: false,
        };
        let m = validate::validate(&mut pool(episodes as u64), &model, &CrossEntropy, &dev, &opts)
            .unwrap();
        assert_eq!(m.episodes, episodes);
        assert_eq!(m.total, episodes * 12);
        assert!((0.0..=1.0).contains(&m.accuracy));
        assert!(m.loss > 0.0);
    }
}

#[test]
fn test_training_beats_chance_on_separable_classes() {
    let dev = Cpu::seed_from_u64(5);
    let mut source = pool(5);
    let mut model = (dev.build_module::<Embedding, f32>(), ProtoHead);
    let mut opt = Adam::new(
        &model,
        AdamConfig {
            lr: 5e-3,
            ..Default::default()
        },
    );
    let config = FitConfig {
        train_episodes: 40,
        log_interval: 10,
        val_interval: 20,
        val_episodes: 20,
        progress: false,
    };
    let report = fit(&mut source, &mut model, &mut opt, &CrossEntropy, &dev, &config).unwrap();
    let (_, best) = report.best_validation().unwrap();
    // three-way chance is 1/3
    assert!(best.accuracy > 0.5, "{best}");
}
