//! Small tensor helpers shared by the graph, the fit loop and the
//! diagnostics.

use crate::error::Result;

use candle_core::{DType, Device, Tensor};
use ndarray::{ArrayD, IxDyn};

/// Random signs in {-1, +1}
pub fn rademacher(dims: &[usize], dtype: DType, device: &Device) -> candle_core::Result<Tensor> {
    Tensor::rand(0f32, 1f32, dims, device)?
        .ge(0.5)?
        .to_dtype(dtype)?
        .affine(2.0, -1.0)
}

/// Reduce element-wise terms of an array parameter to a scalar.
///
/// With a leading batch axis (`t.rank() > param_rank`) sum each row and
/// average over rows, otherwise sum everything.
pub fn reduce_rows(t: &Tensor, param_rank: usize) -> candle_core::Result<Tensor> {
    if t.rank() > param_rank && t.rank() > 0 {
        t.flatten_from(1)?.sum(1)?.mean(0)
    } else {
        t.sum_all()
    }
}

/// Per-row totals `[N]` of a `[N, ...]` tensor
pub fn row_sums(t: &Tensor) -> candle_core::Result<Tensor> {
    match t.rank() {
        0 => t.reshape(1),
        1 => Ok(t.clone()),
        _ => t.flatten_from(1)?.sum(1),
    }
}

/// Mean over rows of the per-row totals
pub fn mean_row_sum(t: &Tensor) -> candle_core::Result<Tensor> {
    row_sums(t)?.mean(0)
}

pub fn to_array(t: &Tensor) -> Result<ArrayD<f32>> {
    let dims = t.dims().to_vec();
    let data = t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), data)?)
}

pub fn from_array(arr: &ArrayD<f32>, dtype: DType, device: &Device) -> Result<Tensor> {
    let data = arr.iter().copied().collect::<Vec<f32>>();
    Ok(Tensor::from_vec(data, arr.shape(), device)?.to_dtype(dtype)?)
}
