//! Synthetic class clusters for demos and tests.

use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// Spread of the class centers.
const CENTER_STD: f32 = 2.0;

/// `per_class` examples for each of `classes` classes. Every class is a
/// cloud of points around its own random center, with per-pixel Gaussian
/// noise of standard deviation `noise`.
///
/// Examples come out grouped by class, in class order.
pub fn gaussian_classes<const IMG: usize>(
    classes: usize,
    per_class: usize,
    noise: f32,
    seed: u64,
) -> Result<Vec<(Vec<f32>, usize)>> {
    // rand_distr accepts a negative std and silently mirrors the samples
    if !(noise.is_finite() && noise >= 0.0) {
        return Err(Error::Config(format!(
            "noise must be a finite, non-negative std, got {noise}"
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = Normal::new(0.0f32, CENTER_STD).map_err(|e| Error::Config(e.to_string()))?;
    let noise = Normal::new(0.0f32, noise).map_err(|e| Error::Config(e.to_string()))?;

    let mut out = Vec::with_capacity(classes * per_class);
    for class in 0..classes {
        let center: Vec<f32> = (0..IMG).map(|_| centers.sample(&mut rng)).collect();
        for _ in 0..per_class {
            let image = center.iter().map(|c| c + noise.sample(&mut rng)).collect();
            out.push((image, class));
        }
    }
    Ok(out)
}
