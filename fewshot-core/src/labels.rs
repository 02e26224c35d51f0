//! Label representations and the one-hot stripping every loop performs
//! before computing a loss or an accuracy.

use num_traits::Float;

use crate::error::{Error, Result};

/// Labels for one side of an episode.
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    /// One class index per example.
    Indices(Vec<usize>),
    /// Row-major one-hot matrix with `classes` columns.
    OneHot { classes: usize, rows: Vec<f32> },
}

impl Labels {
    /// Builds one-hot labels from class indices.
    pub fn one_hot(indices: &[usize], classes: usize) -> Result<Self> {
        Ok(Self::OneHot {
            classes,
            rows: one_hot_rows(indices, classes)?,
        })
    }

    /// Number of labeled examples.
    pub fn len(&self) -> usize {
        match self {
            Self::Indices(idx) => idx.len(),
            Self::OneHot { classes: 0, .. } => 0,
            Self::OneHot { classes, rows } => rows.len() / classes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strips the one-hot encoding, returning one class index per example.
    ///
    /// ```rust
    /// # use fewshot_core::labels::Labels;
    /// let labels = Labels::OneHot { classes: 4, rows: vec![0.0, 0.0, 1.0, 0.0] };
    /// assert_eq!(labels.to_indices().unwrap(), vec![2]);
    /// ```
    pub fn to_indices(&self) -> Result<Vec<usize>> {
        match self {
            Self::Indices(idx) => Ok(idx.clone()),
            Self::OneHot { classes, rows } => {
                if *classes == 0 {
                    return Err(Error::EmptySet {
                        what: "one-hot label width",
                    });
                }
                if rows.len() % classes != 0 {
                    return Err(Error::ShapeMismatch {
                        what: "one-hot buffer length (multiple of classes)",
                        expected: (rows.len() / classes + 1) * classes,
                        actual: rows.len(),
                    });
                }
                rows.chunks(*classes)
                    .enumerate()
                    .map(|(i, row)| argmax(row).ok_or(Error::DegenerateOneHot { row: i }))
                    .collect()
            }
        }
    }
}

/// Index of the first maximum in `row`, skipping NaNs.
pub fn argmax<F: Float>(row: &[F]) -> Option<usize> {
    let mut best: Option<(usize, F)> = None;
    for (i, &v) in row.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Row-major one-hot matrix for `indices`.
pub fn one_hot_rows(indices: &[usize], classes: usize) -> Result<Vec<f32>> {
    let mut rows = vec![0.0; indices.len() * classes];
    for (i, &label) in indices.iter().enumerate() {
        if label >= classes {
            return Err(Error::LabelOutOfRange { label, classes });
        }
        rows[i * classes + label] = 1.0;
    }
    Ok(rows)
}

/// Checks that every label is a valid class index for a `classes`-way task.
pub fn check_range(indices: &[usize], classes: usize) -> Result<()> {
    match indices.iter().find(|&&l| l >= classes) {
        Some(&label) => Err(Error::LabelOutOfRange { label, classes }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_one_hot() {
        let labels = Labels::OneHot {
            classes: 4,
            rows: vec![0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        };
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.to_indices().unwrap(), vec![2, 0]);
    }

    #[test]
    fn test_indices_pass_through() {
        let labels = Labels::Indices(vec![3, 1, 4]);
        assert_eq!(labels.to_indices().unwrap(), vec![3, 1, 4]);
    }

    #[test]
    fn test_argmax_ties_and_nans() {
        assert_eq!(argmax(&[0.5f32, 0.9, 0.9]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.1, 0.0]), Some(1));
        assert_eq!(argmax::<f32>(&[f32::NAN, f32::NAN]), None);
        assert_eq!(argmax::<f64>(&[]), None);
    }

    #[test]
    fn test_bad_one_hot_width() {
        let labels = Labels::OneHot {
            classes: 3,
            rows: vec![1.0, 0.0, 0.0, 0.0],
        };
        assert!(matches!(
            labels.to_indices(),
            Err(Error::ShapeMismatch { .. })
        ));

        let labels = Labels::OneHot {
            classes: 2,
            rows: vec![f32::NAN, f32::NAN],
        };
        assert!(matches!(
            labels.to_indices(),
            Err(Error::DegenerateOneHot { row: 0 })
        ));
    }

    #[test]
    fn test_one_hot_out_of_range() {
        assert!(matches!(
            one_hot_rows(&[0, 5], 3),
            Err(Error::LabelOutOfRange {
                label: 5,
                classes: 3
            })
        ));
        assert!(check_range(&[0, 1, 2], 3).is_ok());
        assert!(check_range(&[3], 3).is_err());
    }

    proptest! {
        #[test]
        fn one_hot_then_strip_recovers_indices(
            (classes, indices) in (1usize..12).prop_flat_map(|c| {
                (Just(c), proptest::collection::vec(0..c, 0..40))
            })
        ) {
            let labels = Labels::one_hot(&indices, classes).unwrap();
            prop_assert_eq!(labels.len(), indices.len());
            prop_assert_eq!(labels.to_indices().unwrap(), indices);
        }

        #[test]
        fn argmax_points_at_a_maximum(row in proptest::collection::vec(-1e3f32..1e3, 1..32)) {
            let i = argmax(&row).unwrap();
            prop_assert!(row.iter().all(|&v| v <= row[i]));
            prop_assert!(row[..i].iter().all(|&v| v < row[i]));
        }
    }
}
