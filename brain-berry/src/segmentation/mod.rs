//! 无监督肿瘤分割.
//!
//! 五个阶段, 对同一输入完全确定:
//!
//! 1. 高斯平滑 (sigma = 1.5 体素);
//! 2. 脑组织提取: 前景 → 去颅骨 → 中间强度带 → 开/闭/填洞 → 最大 26-连通域;
//! 3. 深度腐蚀得到脑内部区域, 腐蚀核按 9 → 5 → 3 回退;
//! 4. 统计离群检测: 阈值取 `mean + 3 std` 与第 99.5 百分位中的较大者;
//! 5. 连通域的大小, 形状与位置过滤, 合并后做轻微的闭/开运算.
//!
//! 任何阶段出现空区域时都返回全零掩码并记录 `warn!`, 从不返回错误.

use log::{info, warn};
use ndarray::{Array3, ArrayView3, Zip};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::segmentation::*;
use crate::data::morph_3d::{self, connected_components, paint, Connectivity};
use crate::error::{Error, Result};
use crate::filter::{gaussian_smooth, stats};
use crate::{GridAttr, Idx3d, Mask, VolumeGrid};

mod brain;
mod candidates;
mod region_grow;

pub use candidates::Rejection;

use brain::BrainRegion;

/// 分割参数. 默认值见 [`crate::consts::segmentation`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentationConfig {
    /// 预平滑 sigma, 以体素为单位.
    pub gaussian_sigma: f64,
    /// 预平滑核截断位置, 以 sigma 的倍数计.
    pub gaussian_truncate: f64,
    /// 前景阈值百分位 (在正强度上计算).
    pub foreground_percentile: f64,
    /// 颅骨阈值百分位 (在前景强度上计算).
    pub skull_percentile: f64,
    /// 候选脑组织强度带 `[低, 高]` 百分位.
    pub brain_band: (f64, f64),
    /// 开运算核边长.
    pub opening_kernel: usize,
    /// 闭运算核边长.
    pub closing_kernel: usize,
    /// 深度腐蚀核边长, 按回退顺序排列.
    pub erosion_kernels: Vec<usize>,
    /// 腐蚀后至少保留的脑组织比例.
    pub erosion_min_keep: f64,
    /// 离群阈值中标准差的倍数.
    pub outlier_sigmas: f64,
    /// 离群阈值中的百分位.
    pub outlier_percentile: f64,
    /// 连通域最小体素数.
    pub min_voxels: usize,
    /// 连通域最大体素数.
    pub max_voxels: usize,
    /// 包围盒长宽比下限.
    pub min_aspect_ratio: f64,
    /// 紧致度下限.
    pub min_compactness: f64,
    /// 到脑质心的归一化距离上限.
    pub max_center_distance: f64,
    /// 脑半径 = 包围盒跨度均值 / 该值.
    pub brain_radius_divisor: f64,
    /// 最终平滑核边长.
    pub final_smoothing_kernel: usize,
    /// 精化闭运算核边长.
    pub refine_closing_kernel: usize,
    /// 区域生长强度区间的标准差倍数.
    pub region_grow_sigmas: f64,
    /// 没有合法种子时的区域生长强度区间.
    pub region_grow_fallback: (f64, f64),
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            gaussian_sigma: GAUSSIAN_SIGMA,
            gaussian_truncate: GAUSSIAN_TRUNCATE,
            foreground_percentile: FOREGROUND_PERCENTILE,
            skull_percentile: SKULL_PERCENTILE,
            brain_band: (BRAIN_BAND_LOW, BRAIN_BAND_HIGH),
            opening_kernel: OPENING_KERNEL,
            closing_kernel: CLOSING_KERNEL,
            erosion_kernels: EROSION_KERNELS.to_vec(),
            erosion_min_keep: EROSION_MIN_KEEP,
            outlier_sigmas: OUTLIER_SIGMAS,
            outlier_percentile: OUTLIER_PERCENTILE,
            min_voxels: MIN_TUMOR_VOXELS,
            max_voxels: MAX_TUMOR_VOXELS,
            min_aspect_ratio: MIN_ASPECT_RATIO,
            min_compactness: MIN_COMPACTNESS,
            max_center_distance: MAX_CENTER_DISTANCE,
            brain_radius_divisor: BRAIN_RADIUS_DIVISOR,
            final_smoothing_kernel: FINAL_SMOOTHING_KERNEL,
            refine_closing_kernel: REFINE_CLOSING_KERNEL,
            region_grow_sigmas: REGION_GROW_SIGMAS,
            region_grow_fallback: REGION_GROW_FALLBACK,
        }
    }
}

impl SegmentationConfig {
    /// 检查参数合法性.
    pub fn validate(&self) -> Result<()> {
        let percentile = |name, q: f64| {
            if (0.0..=100.0).contains(&q) {
                Ok(())
            } else {
                Err(Error::config(name, format!("百分位必须位于 [0, 100], 实际为 {q}")))
            }
        };
        let non_negative = |name, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(Error::config(name, format!("必须为非负有限值, 实际为 {v}")))
            }
        };
        let kernel = |name, k: usize| {
            if k >= 1 {
                Ok(())
            } else {
                Err(Error::config(name, "核边长至少为 1"))
            }
        };

        non_negative("gaussian_sigma", self.gaussian_sigma)?;
        non_negative("gaussian_truncate", self.gaussian_truncate)?;
        percentile("foreground_percentile", self.foreground_percentile)?;
        percentile("skull_percentile", self.skull_percentile)?;
        percentile("brain_band", self.brain_band.0)?;
        percentile("brain_band", self.brain_band.1)?;
        if self.brain_band.0 > self.brain_band.1 {
            return Err(Error::config("brain_band", "下界不能大于上界"));
        }
        percentile("outlier_percentile", self.outlier_percentile)?;
        kernel("opening_kernel", self.opening_kernel)?;
        kernel("closing_kernel", self.closing_kernel)?;
        kernel("final_smoothing_kernel", self.final_smoothing_kernel)?;
        kernel("refine_closing_kernel", self.refine_closing_kernel)?;
        if self.erosion_kernels.is_empty() {
            return Err(Error::config("erosion_kernels", "至少需要一档腐蚀核"));
        }
        for &k in &self.erosion_kernels {
            kernel("erosion_kernels", k)?;
        }
        if !(0.0..=1.0).contains(&self.erosion_min_keep) {
            return Err(Error::config("erosion_min_keep", "必须位于 [0, 1]"));
        }
        non_negative("outlier_sigmas", self.outlier_sigmas)?;
        if self.min_voxels > self.max_voxels {
            return Err(Error::config("min_voxels", "不能大于 max_voxels"));
        }
        non_negative("min_aspect_ratio", self.min_aspect_ratio)?;
        non_negative("min_compactness", self.min_compactness)?;
        non_negative("max_center_distance", self.max_center_distance)?;
        if !(self.brain_radius_divisor.is_finite() && self.brain_radius_divisor > 0.0) {
            return Err(Error::config("brain_radius_divisor", "必须为正有限值"));
        }
        non_negative("region_grow_sigmas", self.region_grow_sigmas)?;
        Ok(())
    }
}

/// 分割结果为空的原因.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EmptyReason {
    /// 没有高于前景阈值的体素.
    NoForeground,
    /// 清理后没有候选脑组织.
    NoBrainRegion,
    /// 所有腐蚀档位都得到空的脑内部区域.
    EmptyInterior,
    /// 没有体素超过离群阈值.
    NoCandidates,
    /// 所有候选连通域都被过滤掉.
    AllRejected,
}

impl EmptyReason {
    /// 是否属于分割降级 (而不是 "确实没有发现肿瘤").
    #[inline]
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            Self::NoForeground | Self::NoBrainRegion | Self::EmptyInterior
        )
    }
}

/// 一次分割的诊断信息.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentationReport {
    /// 脑区域体素数.
    pub brain_voxels: usize,
    /// 脑内部区域体素数.
    pub interior_voxels: usize,
    /// 最终采用的腐蚀核边长.
    pub erosion_kernel: Option<usize>,
    /// 腐蚀回退的次数.
    pub erosion_fallbacks: usize,
    /// 脑内部强度均值.
    pub interior_mean: Option<f64>,
    /// 脑内部强度标准差.
    pub interior_std: Option<f64>,
    /// 离群阈值.
    pub threshold: Option<f64>,
    /// 候选连通域个数.
    pub candidate_components: usize,
    /// 通过过滤的连通域个数.
    pub accepted_components: usize,
    /// 每个被拒绝连通域的拒绝原因, 按发现顺序.
    pub rejections: Vec<Rejection>,
    /// 结果为空时的原因.
    pub empty_reason: Option<EmptyReason>,
    /// 最终掩码的体素数.
    pub tumor_voxels: usize,
}

impl SegmentationReport {
    /// 分割是否降级为全零掩码.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.empty_reason.is_some_and(EmptyReason::is_degraded)
    }

    /// 因 `reason` 被拒绝的连通域个数.
    pub fn rejected_by(&self, reason: Rejection) -> usize {
        self.rejections.iter().filter(|r| **r == reason).count()
    }
}

/// 肿瘤分割器.
#[derive(Debug, Clone)]
pub struct TumorSegmenter {
    config: SegmentationConfig,
}

impl Default for TumorSegmenter {
    fn default() -> Self {
        Self {
            config: SegmentationConfig::default(),
        }
    }
}

impl TumorSegmenter {
    /// 以给定参数创建分割器. 参数非法时返回 `Err`.
    pub fn new(config: SegmentationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 分割参数.
    #[inline]
    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// 分割 `image` 中的肿瘤. 结果与 `image` 共享网格.
    #[inline]
    pub fn segment(&self, image: &VolumeGrid) -> Mask {
        self.segment_with_report(image).0
    }

    /// 分割 `image` 中的肿瘤, 并返回各阶段的诊断信息.
    pub fn segment_with_report(&self, image: &VolumeGrid) -> (Mask, SegmentationReport) {
        let cfg = &self.config;
        let smoothed = gaussian_smooth(image.data(), [cfg.gaussian_sigma; 3], cfg.gaussian_truncate);
        let mut report = SegmentationReport::default();

        let data = match self.detect(smoothed.view(), &mut report) {
            Ok(data) => data,
            Err(reason) => {
                warn!("分割降级为空掩码: {reason:?}");
                report.empty_reason = Some(reason);
                Array3::from_elem(image.shape(), false)
            }
        };
        report.tumor_voxels = data.iter().filter(|b| **b).count();
        if report.tumor_voxels == 0 && report.empty_reason.is_none() {
            report.empty_reason = Some(EmptyReason::AllRejected);
        }
        info!(
            "分割完成: {} 个候选连通域, 接受 {} 个, 共 {} 个体素",
            report.candidate_components, report.accepted_components, report.tumor_voxels
        );
        (Mask::from_parts(data, image.geometry().clone()), report)
    }

    /// 阶段 2 ~ 5. 降级时返回 `Err`.
    fn detect(
        &self,
        smoothed: ArrayView3<f32>,
        report: &mut SegmentationReport,
    ) -> std::result::Result<Array3<bool>, EmptyReason> {
        let cfg = &self.config;
        let brain = BrainRegion::extract(smoothed, cfg)?;
        report.brain_voxels = brain.voxels();

        let interior = brain.deep_erosion(cfg, report)?;
        let mut values = Zip::from(&smoothed)
            .and(&interior)
            .fold(vec![], |mut acc, &v, &inside| {
                if inside {
                    acc.push(v);
                }
                acc
            });
        report.interior_voxels = values.len();

        // 非空由 deep_erosion 保证
        let (mean, std) = stats::mean_std(values.iter().copied()).ok_or(EmptyReason::EmptyInterior)?;
        let upper = stats::percentile(&mut values, cfg.outlier_percentile).ok_or(EmptyReason::EmptyInterior)?;
        let threshold = (mean + cfg.outlier_sigmas * std).max(upper);
        report.interior_mean = Some(mean);
        report.interior_std = Some(std);
        report.threshold = Some(threshold);
        info!("脑内部强度均值 {mean:.1}, 标准差 {std:.1}, 离群阈值 {threshold:.1}");

        let candidates = Zip::from(&smoothed)
            .and(&interior)
            .map_collect(|&v, &inside| inside && v as f64 > threshold);
        let components = connected_components(candidates.view(), Connectivity::Full);
        report.candidate_components = components.len();
        if components.is_empty() {
            report.empty_reason = Some(EmptyReason::NoCandidates);
            return Ok(candidates);
        }

        let shape = brain.shape(cfg.brain_radius_divisor);
        let mut accepted = vec![];
        for c in &components {
            match candidates::judge(c, &shape, cfg) {
                Ok(()) => accepted.push(c),
                Err(r) => report.rejections.push(r),
            }
        }
        report.accepted_components = accepted.len();
        if accepted.is_empty() {
            report.empty_reason = Some(EmptyReason::AllRejected);
            return Ok(Array3::from_elem(smoothed.dim(), false));
        }

        let union = paint(accepted, smoothed.dim());
        let k = cfg.final_smoothing_kernel;
        Ok(morph_3d::opening(morph_3d::closing(union.view(), k).view(), k))
    }

    /// 精化已有分割: 闭运算后填充空洞.
    pub fn refine(&self, mask: &Mask) -> Mask {
        let closed = morph_3d::closing(mask.data(), self.config.refine_closing_kernel);
        Mask::from_parts(morph_3d::fill_holes(closed.view()), mask.geometry().clone())
    }

    /// 从 `seeds` 出发的区域生长分割 (6-连通).
    ///
    /// 强度区间为合法种子强度的 `mean ± k std`; 没有合法种子时使用回退区间.
    /// 越界的种子被忽略.
    pub fn segment_region_growing(&self, image: &VolumeGrid, seeds: &[Idx3d]) -> Mask {
        let cfg = &self.config;
        let band = region_grow::seed_band(
            image.data(),
            seeds,
            cfg.region_grow_sigmas,
            cfg.region_grow_fallback,
        );
        info!("区域生长强度区间 [{:.1}, {:.1}]", band.0, band.1);
        let data = region_grow::grow(image.data(), seeds, band);
        Mask::from_parts(data, image.geometry().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    /// 球形 "脑" (强度 `brain`) 加上背景 0. 返回数组与球心.
    fn sphere(n: usize, radius: f64, brain: impl Fn(Idx3d) -> f32) -> Array3<f32> {
        let c = (n / 2) as f64;
        Array3::from_shape_fn((n, n, n), |(z, h, w)| {
            let d2 = (z as f64 - c).powi(2) + (h as f64 - c).powi(2) + (w as f64 - c).powi(2);
            if d2 <= radius * radius {
                brain((z, h, w))
            } else {
                0.0
            }
        })
    }

    fn grid(data: Array3<f32>) -> VolumeGrid {
        VolumeGrid::with_spacing(data, [1.0; 3]).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(SegmentationConfig::default().validate().is_ok());
        let bad = SegmentationConfig {
            brain_band: (90.0, 10.0),
            ..Default::default()
        };
        assert!(TumorSegmenter::new(bad).is_err());
        let bad = SegmentationConfig {
            erosion_kernels: vec![],
            ..Default::default()
        };
        assert!(TumorSegmenter::new(bad).is_err());
        let bad = SegmentationConfig {
            outlier_percentile: 101.0,
            ..Default::default()
        };
        assert!(TumorSegmenter::new(bad).is_err());
    }

    #[test]
    fn test_rejected_by() {
        let report = SegmentationReport {
            candidate_components: 4,
            accepted_components: 1,
            rejections: vec![Rejection::TooSmall, Rejection::Peripheral, Rejection::TooSmall],
            ..Default::default()
        };
        assert_eq!(report.rejected_by(Rejection::TooSmall), 2);
        assert_eq!(report.rejected_by(Rejection::Peripheral), 1);
        assert_eq!(report.rejected_by(Rejection::Elongated), 0);
        assert!(!report.is_degraded());
    }

    /// 均匀强度的体数据没有任何肿瘤.
    #[test]
    fn test_uniform_volume() {
        let v = grid(Array3::from_elem((24, 24, 24), 100.0));
        let (mask, report) = TumorSegmenter::default().segment_with_report(&v);
        assert!(mask.is_empty());
        assert!(mask.same_grid(&v));
        assert!(report.empty_reason.is_some());
    }

    /// 全零体数据没有前景.
    #[test]
    fn test_no_foreground() {
        let v = grid(Array3::zeros((12, 12, 12)));
        let (mask, report) = TumorSegmenter::default().segment_with_report(&v);
        assert!(mask.is_empty());
        assert_eq!(report.empty_reason, Some(EmptyReason::NoForeground));
        assert!(report.is_degraded());
    }

    /// 均匀的脑组织中没有离群体素时, 结果为空且不算降级.
    #[test]
    fn test_uniform_brain() {
        let v = grid(sphere(40, 17.0, |_| 300.0));
        let (mask, report) = TumorSegmenter::default().segment_with_report(&v);
        assert!(mask.is_empty());
        assert!(report.brain_voxels > 0);
        assert!(!report.is_degraded(), "{report:?}");
    }

    /// 脑中心的高亮紧致团块被检出.
    #[test]
    fn test_blob_recovered() {
        let mut data = sphere(48, 21.0, |_| 300.0);
        data.slice_mut(s![22..27, 22..27, 22..26]).fill(1000.0);
        let v = grid(data);
        let (mask, report) = TumorSegmenter::default().segment_with_report(&v);

        assert_eq!(report.accepted_components, 1, "{report:?}");
        assert_eq!(report.erosion_kernel, Some(9));
        let detected = mask.count();
        assert!((50..=250).contains(&detected), "detected = {detected}");

        let overlap = mask
            .positions()
            .into_iter()
            .filter(|&(z, h, w)| (22..27).contains(&z) && (22..27).contains(&h) && (22..26).contains(&w))
            .count();
        assert!(overlap >= 60, "overlap = {overlap}");

        let [cz, ch, cw] = mask.centroid().unwrap();
        assert!((cz - 24.0).abs() < 1.0 && (ch - 24.0).abs() < 1.0 && (cw - 23.5).abs() < 1.0);
    }

    /// 精化填充内部空洞.
    #[test]
    fn test_refine() {
        let mut data = Array3::from_elem((9, 9, 9), false);
        data.slice_mut(s![2..7, 2..7, 2..7]).fill(true);
        data[(4, 4, 4)] = false;
        let geometry = crate::Geometry::with_spacing([1.0; 3]).unwrap();
        let mask = Mask::new(data, geometry).unwrap();
        let refined = TumorSegmenter::default().refine(&mask);
        assert!(refined[(4, 4, 4)]);
        assert_eq!(refined.count(), 125);
    }

    /// 区域生长只覆盖与种子强度相近且连通的区域.
    #[test]
    fn test_region_growing() {
        let mut data = Array3::from_elem((10, 10, 10), 50.0f32);
        data.slice_mut(s![2..5, 2..5, 2..5]).fill(500.0);
        data.slice_mut(s![7..9, 7..9, 7..9]).fill(500.0);
        let v = grid(data);
        let seg = TumorSegmenter::default();

        let mask = seg.segment_region_growing(&v, &[(3, 3, 3), (100, 0, 0)]);
        assert_eq!(mask.count(), 27);
        assert!(!mask[(8, 8, 8)]);

        // 没有合法种子: 使用回退区间 [100, 1000], 但没有种子就不会生长
        let mask = seg.segment_region_growing(&v, &[(10, 10, 10)]);
        assert!(mask.is_empty());
    }
}
