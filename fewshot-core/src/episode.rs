//! Episodes and the source contract the loops sample them from.
//!
//! An [Episode] is host-side data: flattened images plus [Labels] for the
//! support and query sets. [LabeledImages::to_device()] is the only place
//! data crosses onto a dfdx device.

use dfdx::prelude::*;

use crate::error::{Error, Result};
use crate::labels::Labels;

/// A batch of flattened images, shape `(rows, Const<IMG>)`.
pub type Images<const IMG: usize, D, T = NoneTape> = Tensor<(usize, Const<IMG>), f32, D, T>;

/// Which class partition an episode is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassSplit {
    /// Classes the model is trained on.
    Train,
    /// Classes kept out of training, used for validation.
    HeldOut,
}

/// Ways and shots of a task, as announced by the episode source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskShape {
    pub n_way: usize,
    pub n_shot: usize,
}

impl TaskShape {
    pub fn new(n_way: usize, n_shot: usize) -> Result<Self> {
        if n_way == 0 || n_shot == 0 {
            return Err(Error::InvalidTask(format!(
                "n_way ({n_way}) and n_shot ({n_shot}) must be positive"
            )));
        }
        Ok(Self { n_way, n_shot })
    }

    /// Number of support examples the task expects.
    pub fn support_len(&self) -> usize {
        self.n_way * self.n_shot
    }
}

/// Flattened images with one label row per image.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImages<const IMG: usize> {
    /// Row-major pixels, `rows * IMG` values.
    pub images: Vec<f32>,
    pub labels: Labels,
}

impl<const IMG: usize> LabeledImages<IMG> {
    pub fn new(images: Vec<f32>, labels: Labels) -> Self {
        Self { images, labels }
    }

    /// Number of images in the batch.
    pub fn rows(&self) -> usize {
        self.images.len() / IMG
    }

    /// Checks the buffer and labels describe the same, non-empty batch.
    pub fn check(&self, what: &'static str) -> Result<()> {
        if self.images.is_empty() {
            return Err(Error::EmptySet { what });
        }
        if self.images.len() % IMG != 0 {
            return Err(Error::ShapeMismatch {
                what: "image buffer length (multiple of image size)",
                expected: (self.rows() + 1) * IMG,
                actual: self.images.len(),
            });
        }
        if self.labels.len() != self.rows() {
            return Err(Error::ShapeMismatch {
                what: "label rows",
                expected: self.rows(),
                actual: self.labels.len(),
            });
        }
        Ok(())
    }

    /// Copies the images onto `dev`.
    pub fn to_device<D: Device<f32>>(&self, dev: &D) -> Images<IMG, D> {
        dev.tensor_from_vec(self.images.clone(), (self.rows(), Const::<IMG>))
    }
}

/// One sampled few-shot task.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode<const IMG: usize> {
    pub support: LabeledImages<IMG>,
    pub query: LabeledImages<IMG>,
}

impl<const IMG: usize> Episode<IMG> {
    /// Shape checks run before anything touches the device.
    pub fn check(&self) -> Result<()> {
        self.support.check("support set")?;
        self.query.check("query set")
    }
}

/// Produces episodes on demand. The loops never look inside a source beyond
/// this contract.
pub trait EpisodeSource<const IMG: usize> {
    /// Classes per episode.
    fn n_ways(&self) -> usize;
    /// Support examples per class.
    fn n_shots(&self) -> usize;
    /// Samples a fresh episode from `split`.
    fn sample(&mut self, split: ClassSplit) -> Result<Episode<IMG>>;

    fn task(&self) -> Result<TaskShape> {
        TaskShape::new(self.n_ways(), self.n_shots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    fn batch(rows: usize, labels: Labels) -> LabeledImages<3> {
        LabeledImages::new((0..rows * 3).map(|i| i as f32).collect(), labels)
    }

    #[test]
    fn test_task_shape() {
        let task = TaskShape::new(5, 2).unwrap();
        assert_eq!(task.support_len(), 10);
        assert!(TaskShape::new(0, 1).is_err());
        assert!(TaskShape::new(3, 0).is_err());
    }

    #[test]
    fn test_check_rejects_mismatches() {
        assert!(batch(2, Labels::Indices(vec![0, 1])).check("support").is_ok());
        assert!(matches!(
            batch(0, Labels::Indices(vec![])).check("support"),
            Err(Error::EmptySet { what: "support" })
        ));
        assert!(matches!(
            batch(2, Labels::Indices(vec![0])).check("query"),
            Err(Error::ShapeMismatch { expected: 2, actual: 1, .. })
        ));

        let ragged = LabeledImages::<3>::new(vec![0.0; 7], Labels::Indices(vec![0, 1]));
        assert!(ragged.check("support").is_err());
    }

    #[test]
    fn test_to_device() {
        let dev: TestDevice = Default::default();
        let b = batch(2, Labels::Indices(vec![0, 1]));
        let t = b.to_device(&dev);
        assert_eq!(t.shape().0, 2);
        assert_eq!(t.as_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
