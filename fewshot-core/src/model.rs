//! Model contracts used by the loops.
//!
//! - [EmbeddingNet] is implemented for any dfdx module that maps image
//!   batches to feature batches, with and without a tape.
//! - [FewShotModel] is the unified contract: support images, support labels
//!   and query images in, scores out. Every `(embedding, head)` pair is one.

use dfdx::nn::tensor_collection::TensorCollection;
use dfdx::prelude::*;

use crate::episode::{Images, TaskShape};
use crate::error::{Error, Result};
use crate::head::{ClassificationHead, Features, Scores};
use crate::labels::Labels;

/// Tape used while training.
pub type TrainTape<D> = OwnedTape<f32, D>;

/// Maps a batch of flattened images to a batch of feature vectors.
///
/// [EmbeddingNet::try_embed] is the evaluation path ([Module::forward]),
/// [EmbeddingNet::try_embed_mut] the training path ([ModuleMut::forward_mut]).
pub trait EmbeddingNet<const IMG: usize, D: Device<f32>>: TensorCollection<f32, D> {
    type Width: Dim;

    fn try_embed(&self, images: Images<IMG, D>) -> Result<Features<Self::Width, D>>;

    fn try_embed_mut(
        &mut self,
        images: Images<IMG, D, TrainTape<D>>,
    ) -> Result<Features<Self::Width, D, TrainTape<D>>>;
}

impl<const IMG: usize, D, F, M> EmbeddingNet<IMG, D> for M
where
    D: Device<f32>,
    F: Dim,
    M: TensorCollection<f32, D>
        + Module<Images<IMG, D>, Output = Features<F, D>, Error = D::Err>
        + ModuleMut<
            Images<IMG, D, TrainTape<D>>,
            Output = Features<F, D, TrainTape<D>>,
            Error = D::Err,
        >,
{
    type Width = F;

    fn try_embed(&self, images: Images<IMG, D>) -> Result<Features<F, D>> {
        self.try_forward(images).map_err(Error::backend)
    }

    fn try_embed_mut(
        &mut self,
        images: Images<IMG, D, TrainTape<D>>,
    ) -> Result<Features<F, D, TrainTape<D>>> {
        self.try_forward_mut(images).map_err(Error::backend)
    }
}

/// A model that scores query images given a labeled support set.
pub trait FewShotModel<const IMG: usize, D: Device<f32>>: TensorCollection<f32, D> {
    /// Evaluation-mode forward pass, no gradient tracking.
    fn try_scores(
        &self,
        dev: &D,
        support: Images<IMG, D>,
        support_labels: &Labels,
        query: Images<IMG, D>,
        task: TaskShape,
    ) -> Result<Scores<D>>;

    /// Training-mode forward pass. The support and query images carry the
    /// tapes that gradients are recorded on.
    fn try_scores_mut(
        &mut self,
        dev: &D,
        support: Images<IMG, D, TrainTape<D>>,
        support_labels: &Labels,
        query: Images<IMG, D, TrainTape<D>>,
        task: TaskShape,
    ) -> Result<Scores<D, TrainTape<D>>>;
}

impl<const IMG: usize, D, M, H> FewShotModel<IMG, D> for (M, H)
where
    D: Device<f32>,
    M: EmbeddingNet<IMG, D>,
    H: ClassificationHead<D>,
{
    fn try_scores(
        &self,
        dev: &D,
        support: Images<IMG, D>,
        support_labels: &Labels,
        query: Images<IMG, D>,
        task: TaskShape,
    ) -> Result<Scores<D>> {
        let labels = support_labels.to_indices()?;
        let support = self.0.try_embed(support)?;
        let query = self.0.try_embed(query)?;
        self.1.try_scores(dev, query, support, &labels, task)
    }

    fn try_scores_mut(
        &mut self,
        dev: &D,
        support: Images<IMG, D, TrainTape<D>>,
        support_labels: &Labels,
        query: Images<IMG, D, TrainTape<D>>,
        task: TaskShape,
    ) -> Result<Scores<D, TrainTape<D>>> {
        let labels = support_labels.to_indices()?;
        let support = self.0.try_embed_mut(support)?;
        let query = self.0.try_embed_mut(query)?;
        self.1.try_scores(dev, query, support, &labels, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::head::ProtoHead;
    use crate::tests::*;

    #[test]
    fn test_linear_embedding_is_an_embedding_net() {
        let dev: TestDevice = Default::default();
        let net = dev.build_module::<(Linear<4, 8>, ReLU, Linear<8, 3>), f32>();
        let images: Images<4, TestDevice> = dev.sample_normal_like(&(5, Const::<4>));
        let features = EmbeddingNet::<4, _>::try_embed(&net, images).unwrap();
        assert_eq!(features.shape().0, 5);
    }

    #[test]
    fn test_pair_scores_match_manual_pipeline() {
        let dev: TestDevice = Default::default();
        let model = (dev.build_module::<Linear<4, 3>, f32>(), ProtoHead);
        let task = TaskShape::new(2, 2).unwrap();
        let support: Images<4, TestDevice> = dev.sample_normal_like(&(4, Const::<4>));
        let query: Images<4, TestDevice> = dev.sample_normal_like(&(3, Const::<4>));
        let labels = Labels::one_hot(&[0, 1, 1, 0], 2).unwrap();

        let scores = model
            .try_scores(&dev, support.clone(), &labels, query.clone(), task)
            .unwrap();

        let manual = ProtoHead
            .try_scores(
                &dev,
                model.0.forward(query),
                model.0.forward(support),
                &[0, 1, 1, 0],
                task,
            )
            .unwrap();
        assert_close_vec(&scores.as_vec(), &manual.as_vec(), 1e-6);
    }
}
