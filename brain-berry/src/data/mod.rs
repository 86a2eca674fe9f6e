use crate::error::{Error, Result};
use crate::linalg::{self, IDENTITY};
use crate::{Idx3d, Mat3, Vec3};

pub mod morph_3d;

mod mask;
mod volume;

pub use mask::Mask;
pub use volume::VolumeGrid;

/// 体数据的空间几何信息: 体素间距, 原点与方向矩阵.
///
/// 物理坐标与连续索引的关系为 `p = origin + direction * (spacing ⊙ index)`,
/// 所有向量都按 `(z, h, w)` 顺序排列.
///
/// # 注意
///
/// 构造时会检查: 间距为正有限值, 原点为有限值, 方向矩阵可逆.
/// 因此任何已存在的 `Geometry` 都满足这些不变量.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    spacing: Vec3,
    origin: Vec3,
    direction: Mat3,
    inverse: Mat3,
}

impl Geometry {
    /// 创建几何信息. 参数不合法时返回 `Err`.
    pub fn new(spacing: Vec3, origin: Vec3, direction: Mat3) -> Result<Self> {
        for (axis, &value) in spacing.iter().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidSpacing { axis, value });
            }
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(Error::InvalidOrigin(origin));
        }
        let inverse = linalg::inverse(&direction).ok_or(Error::InvalidDirection(direction))?;
        Ok(Self {
            spacing,
            origin,
            direction,
            inverse,
        })
    }

    /// 原点为零, 方向为单位阵的几何信息.
    #[inline]
    pub fn with_spacing(spacing: Vec3) -> Result<Self> {
        Self::new(spacing, [0.0; 3], IDENTITY)
    }

    /// 体素间距, 以毫米为单位.
    #[inline]
    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    /// 体素 `(0, 0, 0)` 的物理坐标.
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// 方向矩阵. 第 `k` 列是第 `k` 个数组轴在物理空间中的方向.
    #[inline]
    pub fn direction(&self) -> Mat3 {
        self.direction
    }

    /// 连续索引 -> 物理坐标.
    #[inline]
    pub fn index_to_physical(&self, index: &Vec3) -> Vec3 {
        let scaled = [
            index[0] * self.spacing[0],
            index[1] * self.spacing[1],
            index[2] * self.spacing[2],
        ];
        linalg::add(&self.origin, &linalg::mat_vec(&self.direction, &scaled))
    }

    /// 物理坐标 -> 连续索引.
    #[inline]
    pub fn physical_to_index(&self, point: &Vec3) -> Vec3 {
        let local = linalg::mat_vec(&self.inverse, &linalg::sub(point, &self.origin));
        [
            local[0] / self.spacing[0],
            local[1] / self.spacing[1],
            local[2] / self.spacing[2],
        ]
    }

    /// 把关于连续索引的梯度转换成关于物理坐标的梯度.
    #[inline]
    pub fn index_gradient_to_physical(&self, gradient: &Vec3) -> Vec3 {
        let scaled = [
            gradient[0] / self.spacing[0],
            gradient[1] / self.spacing[1],
            gradient[2] / self.spacing[2],
        ];
        linalg::mat_vec(&linalg::transpose(&self.inverse), &scaled)
    }

    /// 在相对误差 `1e-6` 内比较两个几何信息.
    pub fn approx_eq(&self, other: &Self) -> bool {
        fn close(a: f64, b: f64) -> bool {
            (a - b).abs() <= 1e-6 * (1.0 + a.abs().max(b.abs()))
        }
        self.spacing
            .iter()
            .zip(other.spacing.iter())
            .chain(self.origin.iter().zip(other.origin.iter()))
            .chain(self.direction.iter().flatten().zip(other.direction.iter().flatten()))
            .all(|(a, b)| close(*a, *b))
    }
}

/// 体数据与掩码共享的网格属性和部分通用操作.
pub trait GridAttr {
    /// 获取几何信息.
    fn geometry(&self) -> &Geometry;

    /// 获取数据形状大小, 按 `(z, h, w)` 顺序.
    fn shape(&self) -> Idx3d;

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率, 以毫米为单位, 按 `(z, h, w)` 顺序.
    #[inline]
    fn pix_dim(&self) -> Vec3 {
        self.geometry().spacing()
    }

    /// 最小的体素分辨率.
    #[inline]
    fn min_pix_dim(&self) -> f64 {
        self.pix_dim().into_iter().fold(f64::INFINITY, f64::min)
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 网格的几何中心: `origin + direction * (spacing ⊙ shape / 2)`.
    fn geometric_center(&self) -> Vec3 {
        let (z, h, w) = self.shape();
        self.geometry()
            .index_to_physical(&[z as f64 / 2.0, h as f64 / 2.0, w as f64 / 2.0])
    }

    /// 检查两者是否位于同一网格上 (形状一致, 几何信息近似相等).
    ///
    /// 形状不同时返回 `Error::ShapeMismatch`, 几何不同时返回 `Error::GeometryMismatch`.
    fn check_same_grid<G: GridAttr + ?Sized>(&self, other: &G) -> Result<()> {
        Error::check_shape(self.shape(), other.shape())?;
        if self.geometry().approx_eq(other.geometry()) {
            Ok(())
        } else {
            Err(Error::GeometryMismatch("两个网格的间距, 原点或方向不同"))
        }
    }

    /// 两者是否位于同一网格上.
    #[inline]
    fn same_grid<G: GridAttr + ?Sized>(&self, other: &G) -> bool {
        self.check_same_grid(other).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_eq(a: &Vec3, b: &Vec3) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    /// 测试几何信息的合法性检查.
    #[test]
    fn test_geometry_validation() {
        assert!(matches!(
            Geometry::with_spacing([1.0, 0.0, 1.0]),
            Err(Error::InvalidSpacing { axis: 1, .. })
        ));
        assert!(matches!(
            Geometry::with_spacing([1.0, 1.0, -2.0]),
            Err(Error::InvalidSpacing { axis: 2, .. })
        ));
        assert!(matches!(
            Geometry::new([1.0; 3], [0.0, f64::NAN, 0.0], IDENTITY),
            Err(Error::InvalidOrigin(_))
        ));
        assert!(matches!(
            Geometry::new([1.0; 3], [0.0; 3], [[0.0; 3]; 3]),
            Err(Error::InvalidDirection(_))
        ));
    }

    /// 索引与物理坐标互相转换.
    #[test]
    fn test_index_physical_round_trip() {
        // 交换 h, w 两轴的方向矩阵
        let direction = [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]];
        let g = Geometry::new([2.0, 0.5, 1.5], [10.0, -3.0, 4.0], direction).unwrap();
        let idx = [1.0, 2.0, 3.0];
        let p = g.index_to_physical(&idx);
        assert!(vec_eq(&p, &[12.0, -3.0 + 4.5, 4.0 + 1.0]));
        assert!(vec_eq(&g.physical_to_index(&p), &idx));
    }

    /// 索引梯度到物理梯度的换算.
    #[test]
    fn test_gradient_conversion() {
        let g = Geometry::with_spacing([2.0, 1.0, 4.0]).unwrap();
        // f(p) = p0 + p1 + p2 在索引空间中的梯度为 spacing.
        let grad = g.index_gradient_to_physical(&[2.0, 1.0, 4.0]);
        assert!(vec_eq(&grad, &[1.0, 1.0, 1.0]));
    }

    #[test]
    fn test_approx_eq() {
        let a = Geometry::with_spacing([1.0, 1.0, 1.0]).unwrap();
        let b = Geometry::with_spacing([1.0 + 1e-9, 1.0, 1.0]).unwrap();
        let c = Geometry::with_spacing([1.1, 1.0, 1.0]).unwrap();
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&c));
    }
}
