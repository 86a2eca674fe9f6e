//! 空间重叠度量: Dice 系数与 Hausdorff 距离.

use ndarray::{ArrayView3, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::{GridAttr, Idx3d, Mask};

/// Dice 系数 `2 |A ∩ B| / (|A| + |B|)`.
///
/// 两个掩码都为空时定义为 `1.0`. 形状不一致时返回 `Err`.
pub fn dice(a: ArrayView3<bool>, b: ArrayView3<bool>) -> Result<f64> {
    Error::check_shape(a.dim(), b.dim())?;
    let (mut both, mut total) = (0usize, 0usize);
    Zip::from(&a).and(&b).for_each(|&x, &y| {
        both += (x && y) as usize;
        total += x as usize + y as usize;
    });
    Ok(if total == 0 {
        1.0
    } else {
        2.0 * both as f64 / total as f64
    })
}

#[inline]
fn squared_distance(&(z0, h0, w0): &Idx3d, &(z1, h1, w1): &Idx3d) -> f64 {
    let dz = z0 as f64 - z1 as f64;
    let dh = h0 as f64 - h1 as f64;
    let dw = w0 as f64 - w1 as f64;
    dz * dz + dh * dh + dw * dw
}

/// 从 `from` 到 `to` 的有向 Hausdorff 距离, 以体素下标为单位.
///
/// 两个点集会被随机打乱, 内层循环一旦找到比当前最大值更近的点就提前退出.
/// 打乱只影响耗时, 不影响结果. 任一点集为空时返回 `None`.
pub fn directed_hausdorff(from: &[Idx3d], to: &[Idx3d], seed: u64) -> Option<f64> {
    if from.is_empty() || to.is_empty() {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut from = from.to_vec();
    let mut to = to.to_vec();
    from.shuffle(&mut rng);
    to.shuffle(&mut rng);

    let mut cmax = 0.0f64;
    for p in &from {
        let mut cmin = f64::INFINITY;
        let mut early = false;
        for q in &to {
            let d = squared_distance(p, q);
            if d < cmax {
                early = true;
                break;
            }
            cmin = cmin.min(d);
        }
        if !early && cmin > cmax {
            cmax = cmin;
        }
    }
    Some(cmax.sqrt())
}

/// 两个掩码前景之间的 (对称) Hausdorff 距离, 以毫米为单位.
///
/// 取两个方向有向距离的较大者, 再乘以 `mask1` 的最小体素间距.
/// 任一掩码为空时距离无定义, 返回 `Ok(None)`. 形状不一致时返回 `Err`.
pub fn hausdorff_distance(mask1: &Mask, mask2: &Mask, seed: u64) -> Result<Option<f64>> {
    Error::check_shape(mask1.shape(), mask2.shape())?;
    let a = mask1.positions();
    let b = mask2.positions();
    let forward = directed_hausdorff(&a, &b, seed);
    let backward = directed_hausdorff(&b, &a, seed.wrapping_add(1));
    Ok(forward
        .zip(backward)
        .map(|(f, b)| f.max(b) * mask1.min_pix_dim()))
}
