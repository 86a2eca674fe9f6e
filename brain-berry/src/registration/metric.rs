//! 互信息相似性度量.
//!
//! 配准时使用 Mattes 风格的互信息: 固定图像强度直接分箱, 浮动图像强度以三角核
//! (一阶 B 样条) 分摊到相邻两个 bin 上, 从而联合直方图对变换参数分段可导.
//! 采样点为固定图像体素的一个随机子集, 每层金字塔只抽取一次.

use ndarray::ArrayView3;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::resample::LinearInterpolator;
use super::{RegistrationFailure, RigidTransform};
use crate::{linalg, GridAttr, Vec3, VolumeGrid};

/// 把 `value` 映射到 `[0, bins)` 的整数 bin. `range` 为零时全部落入第 0 个 bin.
#[inline]
fn hard_bin(value: f64, lo: f64, range: f64, bins: usize) -> usize {
    if range <= 0.0 {
        return 0;
    }
    let b = ((value - lo) / range * bins as f64).floor();
    num::clamp(b, 0.0, (bins - 1) as f64) as usize
}

/// 强度范围. 范围为零或非有限时视为退化.
fn checked_range(grid: &VolumeGrid) -> Result<(f64, f64), RegistrationFailure> {
    let (lo, hi) = grid.intensity_range();
    let (lo, hi) = (lo as f64, hi as f64);
    if !(lo.is_finite() && hi.is_finite()) || hi - lo <= 0.0 {
        return Err(RegistrationFailure::DegenerateIntensityRange);
    }
    Ok((lo, hi))
}

/// 一个固定图像采样点: 物理坐标与其强度所在的 bin.
#[derive(Debug, Clone, Copy)]
struct Sample {
    point: Vec3,
    bin: usize,
}

/// 单个有效采样点对联合直方图的贡献及其对参数的导数.
struct Contribution {
    fixed_bin: usize,
    moving_bin: usize,
    /// 浮动 bin 坐标 `u` 对六个参数的导数.
    du: [f64; 6],
}

/// 一层金字塔上的 Mattes 互信息.
pub(crate) struct MattesMutualInformation<'a> {
    moving: &'a VolumeGrid,
    samples: Vec<Sample>,
    bins: usize,
    moving_lo: f64,
    moving_scale: f64,
    min_valid: usize,
}

impl<'a> MattesMutualInformation<'a> {
    /// 在 `fixed` 上以 `fraction` 的比例抽取采样点.
    ///
    /// 任一图像强度范围为零时返回 `RegistrationFailure::DegenerateIntensityRange`.
    pub(crate) fn new(
        fixed: &VolumeGrid,
        moving: &'a VolumeGrid,
        bins: usize,
        fraction: f64,
        seed: u64,
        min_valid: usize,
    ) -> Result<Self, RegistrationFailure> {
        debug_assert!(bins >= 2);
        let (fixed_lo, fixed_hi) = checked_range(fixed)?;
        let (moving_lo, moving_hi) = checked_range(moving)?;

        let n = fixed.size();
        let amount = ((n as f64 * fraction).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(seed);
        let (_, h, w) = fixed.shape();
        let geometry = fixed.geometry();
        let samples = rand::seq::index::sample(&mut rng, n, amount)
            .into_iter()
            .map(|i| {
                let pos = (i / (h * w), (i / w) % h, i % w);
                Sample {
                    point: geometry.index_to_physical(&[pos.0 as f64, pos.1 as f64, pos.2 as f64]),
                    bin: hard_bin(fixed[pos] as f64, fixed_lo, fixed_hi - fixed_lo, bins),
                }
            })
            .collect();

        Ok(Self {
            moving,
            samples,
            bins,
            moving_lo,
            moving_scale: (bins - 1) as f64 / (moving_hi - moving_lo),
            min_valid,
        })
    }

    /// 采样点个数.
    #[inline]
    pub(crate) fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// 计算度量值 `-MI` 及其对参数 `[θ0, θ1, θ2, t0, t1, t2]` 的梯度.
    pub(crate) fn evaluate(
        &self,
        transform: &RigidTransform,
    ) -> Result<(f64, [f64; 6]), RegistrationFailure> {
        let bins = self.bins;
        let rotation = transform.rotation_matrix();
        let jacobians = transform.rotation_jacobians();
        let center = transform.center();
        let geometry = self.moving.geometry();
        let interp = LinearInterpolator::new(self.moving.data());

        let mut joint = vec![0.0f64; bins * bins];
        let mut contributions = Vec::with_capacity(self.samples.len());
        for s in &self.samples {
            let y = transform.transform_with(&rotation, &s.point);
            let Some((m, grad)) = interp.value_and_gradient(&geometry.physical_to_index(&y)) else {
                continue;
            };
            let u = ((m - self.moving_lo) * self.moving_scale).clamp(0.0, (bins - 1) as f64);
            let b0 = (u.floor() as usize).min(bins - 2);
            let t = u - b0 as f64;
            joint[s.bin * bins + b0] += 1.0 - t;
            joint[s.bin * bins + b0 + 1] += t;

            let g = geometry.index_gradient_to_physical(&grad);
            let local = linalg::sub(&s.point, &center);
            let mut du = [0.0; 6];
            for (k, jac) in jacobians.iter().enumerate() {
                du[k] = linalg::dot(&g, &linalg::mat_vec(jac, &local));
            }
            du[3..].copy_from_slice(&g);
            du.iter_mut().for_each(|d| *d *= self.moving_scale);
            contributions.push(Contribution {
                fixed_bin: s.bin,
                moving_bin: b0,
                du,
            });
        }

        let valid = contributions.len();
        if valid < self.min_valid {
            return Err(RegistrationFailure::TooFewValidSamples {
                valid,
                required: self.min_valid,
            });
        }

        let norm = valid as f64;
        joint.iter_mut().for_each(|p| *p /= norm);
        let mut pf = vec![0.0; bins];
        let mut pm = vec![0.0; bins];
        for a in 0..bins {
            for b in 0..bins {
                let p = joint[a * bins + b];
                pf[a] += p;
                pm[b] += p;
            }
        }

        // log(p / (pf * pm)), 空 bin 记为 0
        let log_ratio = joint
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                if p > 0.0 {
                    (p / (pf[i / bins] * pm[i % bins])).ln()
                } else {
                    0.0
                }
            })
            .collect::<Vec<_>>();
        let mi: f64 = joint.iter().zip(&log_ratio).map(|(p, l)| p * l).sum();

        // dp(a, b0) = -du / N, dp(a, b0 + 1) = du / N; 边缘分布的变化项相互抵消
        let mut gradient = [0.0; 6];
        for c in &contributions {
            let row = c.fixed_bin * bins;
            let diff = log_ratio[row + c.moving_bin + 1] - log_ratio[row + c.moving_bin];
            for (g, d) in gradient.iter_mut().zip(c.du) {
                *g += diff * d;
            }
        }
        gradient.iter_mut().for_each(|g| *g = -*g / norm);

        if !mi.is_finite() {
            return Err(RegistrationFailure::NonFiniteMetric);
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(RegistrationFailure::NonFiniteGradient);
        }
        Ok((-mi, gradient))
    }
}

/// 两幅同形状图像之间的互信息 (自然对数), 基于 `bins x bins` 联合直方图, 使用全部体素.
///
/// 仅作诊断用途. 调用者需保证两者形状一致.
pub fn mutual_information(a: ArrayView3<f32>, b: ArrayView3<f32>, bins: usize) -> f64 {
    debug_assert_eq!(a.dim(), b.dim());
    let range = |v: &ArrayView3<f32>| {
        let lo = v.iter().copied().fold(f32::INFINITY, f32::min) as f64;
        let hi = v.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        (lo, hi - lo)
    };
    let (a_lo, a_range) = range(&a);
    let (b_lo, b_range) = range(&b);

    let mut joint = vec![0.0f64; bins * bins];
    for (&x, &y) in a.iter().zip(b.iter()) {
        let i = hard_bin(x as f64, a_lo, a_range, bins);
        let j = hard_bin(y as f64, b_lo, b_range, bins);
        joint[i * bins + j] += 1.0;
    }
    let n = a.len() as f64;
    let mut pa = vec![0.0; bins];
    let mut pb = vec![0.0; bins];
    for (k, c) in joint.iter_mut().enumerate() {
        *c /= n;
        pa[k / bins] += *c;
        pb[k % bins] += *c;
    }
    joint
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > 0.0)
        .map(|(k, p)| p * (p / (pa[k / bins] * pb[k % bins])).ln())
        .sum()
}

/// 两幅同形状图像之间的 Pearson 归一化互相关. 任一图像方差为零时返回 0.
pub fn normalized_cross_correlation(a: ArrayView3<f32>, b: ArrayView3<f32>) -> f64 {
    debug_assert_eq!(a.dim(), b.dim());
    let n = a.len() as f64;
    let mean_a = a.iter().map(|v| *v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|v| *v as f64).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x as f64 - mean_a, y as f64 - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 平滑的椭球体模体.
    fn phantom(shift_w: f64) -> VolumeGrid {
        let data = Array3::from_shape_fn((20, 20, 20), |(z, h, w)| {
            let dz = (z as f64 - 10.0) / 6.0;
            let dh = (h as f64 - 10.0) / 5.0;
            let dw = (w as f64 - 10.0 - shift_w) / 4.0;
            (200.0 * (-(dz * dz + dh * dh + dw * dw)).exp()) as f32
        });
        VolumeGrid::with_spacing(data, [1.0; 3]).unwrap()
    }

    #[test]
    fn test_hard_bin() {
        assert_eq!(hard_bin(0.0, 0.0, 10.0, 5), 0);
        assert_eq!(hard_bin(10.0, 0.0, 10.0, 5), 4);
        assert_eq!(hard_bin(4.0, 0.0, 10.0, 5), 2);
        assert_eq!(hard_bin(4.0, 4.0, 0.0, 5), 0);
    }

    /// 常数图像的强度范围退化.
    #[test]
    fn test_degenerate_range() {
        let flat = VolumeGrid::with_spacing(Array3::from_elem((4, 4, 4), 7.0), [1.0; 3]).unwrap();
        let ok = phantom(0.0);
        assert!(matches!(
            MattesMutualInformation::new(&flat, &ok, 50, 0.15, 1, 16),
            Err(RegistrationFailure::DegenerateIntensityRange)
        ));
        assert!(matches!(
            MattesMutualInformation::new(&ok, &flat, 50, 0.15, 1, 16),
            Err(RegistrationFailure::DegenerateIntensityRange)
        ));
    }

    /// 采样数为体素数的指定比例, 且同一种子结果相同.
    #[test]
    fn test_sampling_deterministic() {
        let v = phantom(0.0);
        let a = MattesMutualInformation::new(&v, &v, 50, 0.15, 7, 16).unwrap();
        let b = MattesMutualInformation::new(&v, &v, 50, 0.15, 7, 16).unwrap();
        assert_eq!(a.sample_count(), 1200);
        let t = RigidTransform::identity([10.0; 3]);
        assert_eq!(a.evaluate(&t).unwrap(), b.evaluate(&t).unwrap());
    }

    /// 所有采样点都移出浮动图像时报告有效采样不足.
    #[test]
    fn test_too_few_samples() {
        let v = phantom(0.0);
        let m = MattesMutualInformation::new(&v, &v, 50, 0.15, 7, 16).unwrap();
        let far = RigidTransform::from_parameters(&[0.0, 0.0, 0.0, 100.0, 0.0, 0.0], [0.0; 3]);
        assert!(matches!(
            m.evaluate(&far),
            Err(RegistrationFailure::TooFewValidSamples { valid: 0, required: 16 })
        ));
    }

    /// 解析梯度与度量值的中心差分方向一致.
    #[test]
    fn test_gradient_direction() {
        let fixed = phantom(0.0);
        let moving = phantom(2.0);
        let m = MattesMutualInformation::new(&fixed, &moving, 32, 0.5, 3, 16).unwrap();
        let t = RigidTransform::identity([10.0; 3]);
        let (value, grad) = m.evaluate(&t).unwrap();
        assert!(value < 0.0);
        // 浮动图像向 w 正方向偏移, 度量值应随 t2 增大而减小.
        assert!(grad[5] < 0.0);

        let aligned = RigidTransform::from_parameters(&[0.0, 0.0, 0.0, 0.0, 0.0, 2.0], [10.0; 3]);
        let (better, _) = m.evaluate(&aligned).unwrap();
        assert!(better < value);
    }

    /// 图像与自身的互信息等于其熵, 且大于与常数图像的互信息.
    #[test]
    fn test_diagnostics() {
        let v = phantom(0.0);
        let flat = Array3::from_elem((20, 20, 20), 1.0f32);
        let self_mi = mutual_information(v.data(), v.data(), 50);
        assert!(self_mi > 0.0);
        assert!(mutual_information(v.data(), flat.view(), 50).abs() < 1e-12);

        assert!((normalized_cross_correlation(v.data(), v.data()) - 1.0).abs() < 1e-9);
        assert_eq!(normalized_cross_correlation(v.data(), flat.view()), 0.0);
        let neg = v.data().mapv(|x| -x);
        assert!((normalized_cross_correlation(v.data(), neg.view()) + 1.0).abs() < 1e-9);
    }
}
