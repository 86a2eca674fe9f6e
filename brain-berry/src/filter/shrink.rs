//! 按整数倍缩小体数据, 用于构建配准金字塔.

use ndarray::Array3;

use crate::error::{Error, Result};
use crate::{Geometry, GridAttr, VolumeGrid};

/// 把 `grid` 在每个方向上缩小 `factor` 倍.
///
/// 输出第 `i` 个体素取自输入第 `i * factor + (factor - 1) / 2` 个体素,
/// 即每个 `factor` 块的中间位置. 输出间距为输入的 `factor` 倍, 原点移动到首个采样点,
/// 因此输出体素与其来源体素的物理位置完全一致. 某轴长度不足 `factor` 时该轴保留 1 个体素.
///
/// `factor` 为 0 时返回 `Err`. `factor` 为 1 时返回一份拷贝.
pub fn shrink(grid: &VolumeGrid, factor: usize) -> Result<VolumeGrid> {
    if factor == 0 {
        return Err(Error::config("shrink factor", "缩小倍数至少为 1"));
    }
    if factor == 1 {
        return Ok(grid.clone());
    }

    let (z, h, w) = grid.shape();
    let dim = (
        (z / factor).max(1),
        (h / factor).max(1),
        (w / factor).max(1),
    );
    let offset = (factor - 1) / 2;
    let offsets = [offset.min(z - 1), offset.min(h - 1), offset.min(w - 1)];

    let src = grid.data();
    let data = Array3::from_shape_fn(dim, |(a, b, c)| {
        src[(
            a * factor + offsets[0],
            b * factor + offsets[1],
            c * factor + offsets[2],
        )]
    });

    let g = grid.geometry();
    let origin = g.index_to_physical(&offsets.map(|o| o as f64));
    let geometry = Geometry::new(g.spacing().map(|s| s * factor as f64), origin, g.direction())?;
    VolumeGrid::new(data, geometry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dim: (usize, usize, usize)) -> VolumeGrid {
        let data = Array3::from_shape_fn(dim, |(z, h, w)| (z * 100 + h * 10 + w) as f32);
        VolumeGrid::with_spacing(data, [1.0, 2.0, 0.5]).unwrap()
    }

    /// 缩小后的每个体素与其来源体素位于同一物理位置.
    #[test]
    fn test_shrink_positions() {
        let v = ramp((8, 8, 9));
        let s = shrink(&v, 4).unwrap();
        assert_eq!(s.shape(), (2, 2, 2));
        assert_eq!(s.pix_dim(), [4.0, 8.0, 2.0]);
        // offset = 1
        assert_eq!(s[(0, 0, 0)], 111.0);
        assert_eq!(s[(1, 1, 1)], 555.0);

        let src = v.geometry().index_to_physical(&[5.0, 5.0, 5.0]);
        let dst = s.geometry().index_to_physical(&[1.0, 1.0, 1.0]);
        assert_eq!(src, dst);
    }

    /// 轴长不足时保留一个体素.
    #[test]
    fn test_shrink_small_axis() {
        let v = ramp((1, 3, 8));
        let s = shrink(&v, 4).unwrap();
        assert_eq!(s.shape(), (1, 1, 2));
        assert_eq!(s[(0, 0, 0)], 11.0);
    }

    #[test]
    fn test_shrink_trivial() {
        let v = ramp((3, 3, 3));
        assert!(shrink(&v, 0).is_err());
        let s = shrink(&v, 1).unwrap();
        assert_eq!(s.data(), v.data());
        assert!(s.same_grid(&v));
    }
}
