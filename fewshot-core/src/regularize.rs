//! The L2 penalty added to every task loss: `L2_WEIGHT * sum_p ||p||_2`,
//! where `p` ranges over each trainable tensor of the model.
//!
//! The norm is the unsquared Euclidean norm of each parameter tensor taken
//! as a flat vector.

use dfdx::nn::tensor_collection::{
    RecursiveWalker, TensorCollection, TensorOptions, TensorVisitor, ViewTensorRef,
};
use dfdx::prelude::*;

use crate::error::{Error, Result};

/// Weight of the L2 penalty.
pub const L2_WEIGHT: f32 = 1e-4;

struct NormSum(f32);

impl<D: Device<f32>> TensorVisitor<f32, D> for NormSum {
    type Viewer = ViewTensorRef;
    type Err = D::Err;
    type E2 = f32;
    type D2 = D;

    fn visit<S: Shape>(
        &mut self,
        opts: TensorOptions<S, f32, D>,
        t: &Tensor<S, f32, D>,
    ) -> std::result::Result<Option<Tensor<S, f32, D>>, Self::Err> {
        if opts.do_gradient_update {
            self.0 += sum_of_squares(t).sqrt();
        }
        Ok(None)
    }
}

struct TracedNormSum<D: Device<f32>>(Option<Tensor<Rank0, f32, D, OwnedTape<f32, D>>>);

impl<D: Device<f32>> TensorVisitor<f32, D> for TracedNormSum<D> {
    type Viewer = ViewTensorRef;
    type Err = D::Err;
    type E2 = f32;
    type D2 = D;

    fn visit<S: Shape>(
        &mut self,
        opts: TensorOptions<S, f32, D>,
        t: &Tensor<S, f32, D>,
    ) -> std::result::Result<Option<Tensor<S, f32, D>>, Self::Err> {
        // the norm is not differentiable at zero; its subgradient there is 0
        if !opts.do_gradient_update || sum_of_squares(t) == 0.0 {
            return Ok(None);
        }
        let norm = t
            .retaped::<OwnedTape<f32, D>>()
            .try_square()?
            .try_sum::<Rank0, _>()?
            .try_sqrt()?;
        self.0 = Some(match self.0.take() {
            Some(acc) => acc.try_add(norm)?,
            None => norm,
        });
        Ok(None)
    }
}

fn sum_of_squares<S: Shape, D: Device<f32>>(t: &Tensor<S, f32, D>) -> f32 {
    t.as_vec().iter().map(|x| x * x).sum()
}

/// Sum of the L2 norms of every trainable tensor in `model`.
///
/// Always `>= 0`, and `0` only when every trainable parameter is zero.
///
/// ```rust
/// # use dfdx::prelude::*;
/// # use fewshot_core::regularize::l2_norm_sum;
/// let dev: Cpu = Default::default();
/// let mut model = dev.build_module::<Linear<2, 1>, f32>();
/// model.weight = dev.tensor([[3.0, 4.0]]);
/// model.bias = dev.zeros();
/// assert_eq!(l2_norm_sum(&model).unwrap(), 5.0);
/// ```
pub fn l2_norm_sum<D: Device<f32>, M: TensorCollection<f32, D>>(model: &M) -> Result<f32> {
    let mut op = NormSum(0.0);
    M::iter_tensors(&mut RecursiveWalker {
        m: model,
        f: &mut op,
    })
    .map_err(Error::backend)?;
    Ok(op.0)
}

/// Same sum as [l2_norm_sum], recorded on a fresh [OwnedTape] so its
/// gradient reaches the parameters.
///
/// Returns `None` when there is nothing to differentiate (no trainable
/// tensors, or all of them are zero).
pub fn traced_l2_norm_sum<D: Device<f32>, M: TensorCollection<f32, D>>(
    model: &M,
) -> Result<Option<Tensor<Rank0, f32, D, OwnedTape<f32, D>>>> {
    let mut op = TracedNormSum(None);
    M::iter_tensors(&mut RecursiveWalker {
        m: model,
        f: &mut op,
    })
    .map_err(Error::backend)?;
    Ok(op.0)
}

/// Adds the weighted, traced penalty to a training loss.
pub fn with_l2_penalty<D: Device<f32>, M: TensorCollection<f32, D>>(
    loss: Tensor<Rank0, f32, D, OwnedTape<f32, D>>,
    model: &M,
) -> Result<Tensor<Rank0, f32, D, OwnedTape<f32, D>>> {
    match traced_l2_norm_sum(model)? {
        Some(norms) => loss.try_add(norms * L2_WEIGHT).map_err(Error::backend),
        None => Ok(loss),
    }
}

/// Value of the weighted penalty, for evaluation.
pub fn l2_penalty<D: Device<f32>, M: TensorCollection<f32, D>>(model: &M) -> Result<f32> {
    Ok(L2_WEIGHT * l2_norm_sum(model)?)
}
