//! 三线性插值与重采样.

use ndarray::{Array3, ArrayView3, Zip};

use super::RigidTransform;
use crate::error::Result;
use crate::{GridAttr, Vec3, VolumeGrid};

/// 一个轴上的插值位置: 左右两个整数下标与右侧权重.
///
/// 有效范围是 `[-0.5, n - 0.5)`, 即每个体素占据的整个半开区间.
/// 边缘之外的半个体素取最近的边缘值.
#[inline]
fn locate(x: f64, n: usize) -> Option<(usize, usize, f64)> {
    if !(x >= -0.5 && x < n as f64 - 0.5) {
        return None;
    }
    let last = (n - 1) as f64;
    let x = x.clamp(0.0, last);
    let base = (x.floor() as usize).min(n.saturating_sub(2));
    let next = (base + 1).min(n - 1);
    Some((base, next, x - base as f64))
}

/// 体数据上的三线性插值器. 采样点位于 `[-0.5, n - 0.5)` 之外时视为无效.
#[derive(Clone, Copy)]
pub(crate) struct LinearInterpolator<'a> {
    data: ArrayView3<'a, f32>,
}

impl<'a> LinearInterpolator<'a> {
    pub(crate) fn new(data: ArrayView3<'a, f32>) -> Self {
        Self { data }
    }

    /// 8 个角点的值, 按 `c[a][b][c]` 排列, 以及三个轴的右侧权重.
    #[inline]
    fn corners(&self, index: &Vec3) -> Option<([[[f64; 2]; 2]; 2], Vec3)> {
        let (z, h, w) = self.data.dim();
        let (z0, z1, tz) = locate(index[0], z)?;
        let (h0, h1, th) = locate(index[1], h)?;
        let (w0, w1, tw) = locate(index[2], w)?;
        let mut c = [[[0.0; 2]; 2]; 2];
        for (a, zz) in [z0, z1].into_iter().enumerate() {
            for (b, hh) in [h0, h1].into_iter().enumerate() {
                for (d, ww) in [w0, w1].into_iter().enumerate() {
                    c[a][b][d] = self.data[(zz, hh, ww)] as f64;
                }
            }
        }
        Some((c, [tz, th, tw]))
    }

    /// 连续索引处的插值.
    pub(crate) fn value_at(&self, index: &Vec3) -> Option<f64> {
        self.value_and_gradient(index).map(|(v, _)| v)
    }

    /// 连续索引处的插值, 以及关于连续索引的梯度.
    pub(crate) fn value_and_gradient(&self, index: &Vec3) -> Option<(f64, Vec3)> {
        let (c, [tz, th, tw]) = self.corners(index)?;
        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

        // 先沿 w 插值
        let e = [
            [lerp(c[0][0][0], c[0][0][1], tw), lerp(c[0][1][0], c[0][1][1], tw)],
            [lerp(c[1][0][0], c[1][0][1], tw), lerp(c[1][1][0], c[1][1][1], tw)],
        ];
        // 再沿 h
        let f = [lerp(e[0][0], e[0][1], th), lerp(e[1][0], e[1][1], th)];
        let value = lerp(f[0], f[1], tz);

        let dz = f[1] - f[0];
        let dh = lerp(e[0][1] - e[0][0], e[1][1] - e[1][0], tz);
        let dw_edge = |a: usize, b: usize| c[a][b][1] - c[a][b][0];
        let dw = lerp(
            lerp(dw_edge(0, 0), dw_edge(0, 1), th),
            lerp(dw_edge(1, 0), dw_edge(1, 1), th),
            tz,
        );
        Some((value, [dz, dh, dw]))
    }
}

/// 把 `moving` 按 `transform` 重采样到 `reference` 的网格上.
///
/// 对参考网格中每个体素的物理坐标 `x`, 取 `moving` 在 `transform(x)` 处的三线性插值;
/// 落在 `moving` 之外的体素填 0.
pub fn apply_transform<G: GridAttr + ?Sized>(
    moving: &VolumeGrid,
    reference: &G,
    transform: &RigidTransform,
) -> Result<VolumeGrid> {
    let mut out = Array3::<f32>::zeros(reference.shape());
    let rotation = transform.rotation_matrix();
    let interp = LinearInterpolator::new(moving.data());
    let (fixed, moved) = (reference.geometry(), moving.geometry());

    let op = |(z, h, w): (usize, usize, usize), v: &mut f32| {
        let x = fixed.index_to_physical(&[z as f64, h as f64, w as f64]);
        let y = transform.transform_with(&rotation, &x);
        *v = interp
            .value_at(&moved.physical_to_index(&y))
            .map_or(0.0, |s| s as f32);
    };
    let zip = Zip::indexed(&mut out);
    #[cfg(feature = "rayon")]
    zip.par_for_each(op);
    #[cfg(not(feature = "rayon"))]
    zip.for_each(op);

    VolumeGrid::new(out, fixed.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_volume() -> VolumeGrid {
        // f = 2z + 3h - w
        let data = Array3::from_shape_fn((4, 5, 6), |(z, h, w)| {
            (2 * z + 3 * h) as f32 - w as f32
        });
        VolumeGrid::with_spacing(data, [1.0, 1.0, 1.0]).unwrap()
    }

    /// 线性函数被精确插值, 梯度为常数.
    #[test]
    fn test_linear_exact() {
        let v = linear_volume();
        let it = LinearInterpolator::new(v.data());
        let (val, grad) = it.value_and_gradient(&[1.5, 2.25, 3.75]).unwrap();
        assert!((val - (3.0 + 6.75 - 3.75)).abs() < 1e-9);
        assert!((grad[0] - 2.0).abs() < 1e-9);
        assert!((grad[1] - 3.0).abs() < 1e-9);
        assert!((grad[2] + 1.0).abs() < 1e-9);

        // 恰好在最后一个体素上
        assert_eq!(it.value_at(&[3.0, 4.0, 5.0]), Some(13.0));
    }

    #[test]
    fn test_out_of_bounds() {
        let v = linear_volume();
        let it = LinearInterpolator::new(v.data());
        assert!(it.value_at(&[-0.51, 0.0, 0.0]).is_none());
        assert!(it.value_at(&[0.0, 4.5, 0.0]).is_none());
        assert!(it.value_at(&[0.0, 0.0, 5.5]).is_none());
        assert!(it.value_at(&[f64::NAN, 0.0, 0.0]).is_none());
    }

    /// 边缘外半个体素以内取边缘值.
    #[test]
    fn test_edge_half_voxel() {
        let v = linear_volume();
        let it = LinearInterpolator::new(v.data());
        assert_eq!(it.value_at(&[-0.5, 0.0, 0.0]), Some(0.0));
        assert_eq!(it.value_at(&[-0.2, 2.0, 1.0]), it.value_at(&[0.0, 2.0, 1.0]));
        assert_eq!(it.value_at(&[3.0, 4.49, 5.3]), Some(13.0));
        assert!(it.value_and_gradient(&[3.4, 4.0, -0.3]).is_some());
    }

    /// 亚体素旋转后外层体素不被清零.
    #[test]
    fn test_small_rotation_keeps_shell() {
        let data = Array3::from_elem((10, 10, 10), 50.0f32);
        let v = VolumeGrid::with_spacing(data, [1.0, 1.0, 1.0]).unwrap();
        let t = RigidTransform::from_parameters(&[0.005, -0.002, 0.002, 0.017, 0.003, -0.01], v.geometric_center());
        let r = apply_transform(&v, &v, &t).unwrap();
        assert_eq!(r.data().iter().filter(|&&x| x == 0.0).count(), 0);
        assert!(r.data().iter().all(|&x| (x - 50.0).abs() < 1e-4));
    }

    /// 长度为 1 的轴上梯度为 0.
    #[test]
    fn test_single_slice() {
        let data = Array3::from_shape_fn((1, 2, 2), |(_, h, w)| (h + w) as f32);
        let it = LinearInterpolator::new(data.view());
        let (val, grad) = it.value_and_gradient(&[0.0, 0.5, 0.5]).unwrap();
        assert!((val - 1.0).abs() < 1e-12);
        assert_eq!(grad[0], 0.0);
        assert!(it.value_at(&[0.5, 0.0, 0.0]).is_none());
    }

    /// 平移 1mm 后的重采样等价于整体移动一格, 移出的部分填 0.
    #[test]
    fn test_apply_translation() {
        let v = linear_volume();
        let t = RigidTransform::from_parameters(&[0.0, 0.0, 0.0, 0.0, 0.0, 1.0], [0.0; 3]);
        let r = apply_transform(&v, &v, &t).unwrap();
        assert!(r.same_grid(&v));
        assert_eq!(r[(1, 1, 0)], v[(1, 1, 1)]);
        assert_eq!(r[(2, 3, 4)], v[(2, 3, 5)]);
        assert_eq!(r[(2, 3, 5)], 0.0);

        let same = apply_transform(&v, &v, &RigidTransform::identity([1.0; 3])).unwrap();
        assert_eq!(same.data(), v.data());
    }
}
