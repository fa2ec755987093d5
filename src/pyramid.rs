//! Spatial coarsening over the trailing (Y, X) axes.

use ndarray::{Array3, ArrayD, ArrayView3, IxDyn, s};
use serde::{Deserialize, Serialize};

use crate::volume::Voxel;

/// How a block of pixels is reduced to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Max,
    /// Take the top-left pixel of each block; keeps label ids intact.
    Nearest,
}

fn reduce<T: Voxel>(block: ArrayView3<T>, aggregation: Aggregation) -> T {
    match aggregation {
        Aggregation::Nearest => block[[0, 0, 0]],
        Aggregation::Max => block
            .iter()
            .copied()
            .fold(block[[0, 0, 0]], |acc, v| if v > acc { v } else { acc }),
        Aggregation::Mean => {
            let sum: f64 = block.iter().map(|v| v.to_f64()).sum();
            T::from_f64(sum / block.len() as f64)
        }
    }
}

/// Shape after shrinking the last two axes by `factor` (never below 1).
pub fn coarsened_shape(shape: &[usize], factor: usize) -> Vec<usize> {
    let n = shape.len();
    shape
        .iter()
        .enumerate()
        .map(|(i, &d)| if i + 2 >= n { (d / factor).max(1) } else { d })
        .collect()
}

/// Shrink the last two axes of `array` by `factor`.
///
/// Output extents are `floor(n / factor)`, at least 1; trailing pixels that do
/// not fill a whole block are dropped.
pub fn coarsen<T: Voxel>(
    array: &ArrayD<T>,
    factor: usize,
    aggregation: Aggregation,
) -> crate::Result<ArrayD<T>> {
    let shape = array.shape();
    if shape.len() < 2 {
        return Err(crate::Error::invalid(format!(
            "cannot coarsen array of shape {shape:?}"
        )));
    }
    if factor <= 1 || shape.contains(&0) {
        return Ok(array.clone());
    }
    let n = shape.len();
    let (ny, nx) = (shape[n - 2], shape[n - 1]);
    let lead: usize = shape[..n - 2].iter().product();
    let out_shape = coarsened_shape(shape, factor);
    let (oy, ox) = (out_shape[n - 2], out_shape[n - 1]);

    let standard = array.as_standard_layout();
    let src = standard.view().into_shape_with_order((lead, ny, nx))?;
    let mut out = Array3::<T>::default((lead, oy, ox));
    for ((l, i, j), v) in out.indexed_iter_mut() {
        let y0 = i * factor;
        let x0 = j * factor;
        let y1 = (y0 + factor).min(ny);
        let x1 = (x0 + factor).min(nx);
        *v = reduce(src.slice(s![l..l + 1, y0..y1, x0..x1]), aggregation);
    }
    Ok(out.into_shape_with_order(IxDyn(&out_shape))?)
}

/// Nearest-neighbour resampling of a (Z, Y, X) volume to `shape`.
pub fn resample_nearest<T: Voxel>(array: ArrayView3<T>, shape: [usize; 3]) -> Array3<T> {
    let src = array.dim();
    let map = |dst: usize, dst_len: usize, src_len: usize| (dst * src_len / dst_len).min(src_len - 1);
    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(z, y, x)| {
        array[[
            map(z, shape[0], src.0),
            map(y, shape[1], src.1),
            map(x, shape[2], src.2),
        ]]
    })
}
