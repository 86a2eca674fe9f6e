//! 三维刚性变换.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::linalg;
use crate::{Mat3, Vec3};

/// 绕第 `axis` 个数组轴旋转 `theta` 弧度的旋转矩阵及其对 `theta` 的导数.
fn axis_rotation(axis: usize, theta: f64) -> (Mat3, Mat3) {
    let (s, c) = theta.sin_cos();
    match axis {
        0 => (
            [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]],
            [[0.0, 0.0, 0.0], [0.0, -s, -c], [0.0, c, -s]],
        ),
        1 => (
            [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]],
            [[-s, 0.0, c], [0.0, 0.0, 0.0], [-c, 0.0, -s]],
        ),
        2 => (
            [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
            [[-s, -c, 0.0], [c, -s, 0.0], [0.0, 0.0, 0.0]],
        ),
        _ => unreachable!("三维空间只有三个轴"),
    }
}

/// 六自由度刚性变换, 带有显式的旋转中心.
///
/// 变换把固定图像空间中的物理点 `x` 映射到浮动图像空间:
/// `T(x) = R (x - c) + c + t`, 其中 `R = R2 * R1 * R0`, `Rk` 为绕第 `k` 个数组轴的旋转.
///
/// 优化参数依次为 `[θ0, θ1, θ2, t0, t1, t2]`, 角度以弧度计, 平移以毫米计.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RigidTransform {
    angles: Vec3,
    translation: Vec3,
    center: Vec3,
}

impl RigidTransform {
    /// 以 `center` 为旋转中心的恒等变换.
    pub fn identity(center: Vec3) -> Self {
        Self {
            angles: [0.0; 3],
            translation: [0.0; 3],
            center,
        }
    }

    /// 由优化参数 `[θ0, θ1, θ2, t0, t1, t2]` 和旋转中心创建.
    pub fn from_parameters(params: &[f64; 6], center: Vec3) -> Self {
        Self {
            angles: [params[0], params[1], params[2]],
            translation: [params[3], params[4], params[5]],
            center,
        }
    }

    /// 优化参数 `[θ0, θ1, θ2, t0, t1, t2]`.
    pub fn parameters(&self) -> [f64; 6] {
        let [a, b, c] = self.angles;
        let [x, y, z] = self.translation;
        [a, b, c, x, y, z]
    }

    /// 三个旋转角, 以弧度计.
    #[inline]
    pub fn angles(&self) -> Vec3 {
        self.angles
    }

    /// 平移量, 以毫米计.
    #[inline]
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// 旋转中心 (物理坐标).
    #[inline]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// 是否为恒等变换.
    pub fn is_identity(&self) -> bool {
        self.parameters().iter().all(|p| *p == 0.0)
    }

    /// 旋转矩阵 `R = R2 * R1 * R0`.
    pub fn rotation_matrix(&self) -> Mat3 {
        let [r0, r1, r2] = [0, 1, 2].map(|k| axis_rotation(k, self.angles[k]).0);
        linalg::mat_mul(&r2, &linalg::mat_mul(&r1, &r0))
    }

    /// 旋转矩阵对三个角度的偏导数 `∂R/∂θk`.
    pub fn rotation_jacobians(&self) -> [Mat3; 3] {
        let [(r0, d0), (r1, d1), (r2, d2)] = [0, 1, 2].map(|k| axis_rotation(k, self.angles[k]));
        [
            linalg::mat_mul(&r2, &linalg::mat_mul(&r1, &d0)),
            linalg::mat_mul(&r2, &linalg::mat_mul(&d1, &r0)),
            linalg::mat_mul(&d2, &linalg::mat_mul(&r1, &r0)),
        ]
    }

    /// 变换单个物理点.
    #[inline]
    pub fn transform_point(&self, point: &Vec3) -> Vec3 {
        self.transform_with(&self.rotation_matrix(), point)
    }

    /// 使用预先计算好的旋转矩阵变换物理点. 批量变换时避免重复计算三角函数.
    #[inline]
    pub(crate) fn transform_with(&self, rotation: &Mat3, point: &Vec3) -> Vec3 {
        let local = linalg::sub(point, &self.center);
        let rotated = linalg::mat_vec(rotation, &local);
        linalg::add(&linalg::add(&rotated, &self.center), &self.translation)
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity([0.0; 3])
    }
}
