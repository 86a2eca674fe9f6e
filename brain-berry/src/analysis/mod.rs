//! 两次扫描之间的定量变化分析.
//!
//! 输入为两对 "图像 + 掩码", 输出一个不可变的 [`ComparisonResult`]:
//! 每次扫描的体积与掩码内强度统计, 以及体积变化, Dice 系数, Hausdorff 距离与强度变化.
//! 所有除零情形都有显式定义的哨兵值, 分析本身从不因数值原因失败.

use log::debug;
use ndarray::{ArrayView3, Zip};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::stats;
use crate::{GridAttr, Mask, VolumeGrid};

mod interpret;
mod overlap;
mod report;

pub use interpret::{GrowthStatus, OverlapAgreement};
pub use overlap::{dice, directed_hausdorff, hausdorff_distance};
pub use report::{ReportMap, ReportValue};

pub(crate) use report::put;

/// Hausdorff 距离计算中打乱点集的默认种子.
pub const HAUSDORFF_SEED: u64 = 0;

/// 掩码内的强度统计. 掩码为空时全部为 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntensityStats {
    /// 均值.
    pub mean: f64,
    /// 总体标准差.
    pub std: f64,
    /// 最小值.
    pub min: f64,
    /// 最大值.
    pub max: f64,
    /// 中位数.
    pub median: f64,
}

impl IntensityStats {
    /// 统计 `image` 在 `mask` 前景处的强度. 二者形状必须一致.
    pub fn of(image: ArrayView3<f32>, mask: ArrayView3<bool>) -> Result<Self> {
        Error::check_shape(image.dim(), mask.dim())?;
        let mut values = Vec::new();
        Zip::from(&image).and(&mask).for_each(|&v, &m| {
            if m {
                values.push(v);
            }
        });
        let Some((mean, std)) = stats::mean_std(values.iter().copied()) else {
            return Ok(Self::default());
        };
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let median = stats::median(&mut values).unwrap_or_default();
        Ok(Self {
            mean,
            std,
            min: min as f64,
            max: max as f64,
            median,
        })
    }
}

/// 单次扫描的肿瘤测量.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TumorMeasurement {
    /// 前景体素个数.
    pub voxel_count: usize,
    /// 体积, 立方毫米.
    pub volume_mm3: f64,
    /// 掩码内强度统计.
    pub stats: IntensityStats,
}

impl TumorMeasurement {
    /// 测量 `mask` 标出的肿瘤. `image` 与 `mask` 必须位于同一网格上.
    pub fn measure(image: &VolumeGrid, mask: &Mask) -> Result<Self> {
        image.check_same_grid(mask)?;
        let voxel_count = mask.count();
        Ok(Self {
            voxel_count,
            volume_mm3: voxel_count as f64 * mask.voxel(),
            stats: IntensityStats::of(image.data(), mask.data())?,
        })
    }

    /// 体积, 立方厘米.
    #[inline]
    pub fn volume_cm3(&self) -> f64 {
        self.volume_mm3 / 1000.0
    }
}

/// 两次扫描的对比结果. 每次分析只创建一次.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComparisonResult {
    /// 第一次扫描.
    pub tumor1: TumorMeasurement,
    /// 第二次扫描.
    pub tumor2: TumorMeasurement,
    /// `volume2 - volume1`, 立方毫米.
    pub volume_change_mm3: f64,
    /// 体积变化百分比. 第一次体积为 0 时定义为 0.
    pub volume_change_percent: f64,
    /// Dice 系数. 两个掩码都为空时为 1.
    pub dice: f64,
    /// Hausdorff 距离, 毫米. 任一掩码为空时无定义.
    pub hausdorff_mm: Option<f64>,
    /// 掩码内强度均值之差.
    pub mean_change: f64,
    /// 掩码内强度标准差之差.
    pub std_change: f64,
    /// 掩码内强度均值的变化百分比. 第一次均值为 0 时定义为 0.
    pub mean_change_percent: f64,
    /// 体积变化的定性解读.
    pub growth: GrowthStatus,
    /// 空间重叠的定性解读.
    pub overlap: OverlapAgreement,
}

/// `(new - old) / old * 100`, `old` 为 0 时返回 0.
#[inline]
fn percent_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        0.0
    } else {
        (new - old) / old * 100.0
    }
}

/// 变化分析器.
#[derive(Debug, Clone, Copy)]
pub struct ChangeAnalyzer {
    seed: u64,
}

impl Default for ChangeAnalyzer {
    fn default() -> Self {
        Self::new(HAUSDORFF_SEED)
    }
}

impl ChangeAnalyzer {
    /// `seed` 仅用于 Hausdorff 距离计算中的点集打乱, 不影响结果.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// 对比两次扫描.
    ///
    /// 每对图像与掩码必须位于同一网格上, 两个掩码的形状必须一致, 否则返回 `Err`.
    /// 体积按各自掩码的体素体积计算, Hausdorff 距离按 `mask1` 的最小间距换算.
    pub fn compare(
        &self,
        image1: &VolumeGrid,
        mask1: &Mask,
        image2: &VolumeGrid,
        mask2: &Mask,
    ) -> Result<ComparisonResult> {
        Error::check_shape(mask1.shape(), mask2.shape())?;
        let tumor1 = TumorMeasurement::measure(image1, mask1)?;
        let tumor2 = TumorMeasurement::measure(image2, mask2)?;

        let dice = dice(mask1.data(), mask2.data())?;
        let hausdorff_mm = hausdorff_distance(mask1, mask2, self.seed)?;

        let volume_change_percent = percent_change(tumor1.volume_mm3, tumor2.volume_mm3);
        debug!(
            "体积 {:.1} -> {:.1} mm^3 ({volume_change_percent:+.1}%), dice = {dice:.3}",
            tumor1.volume_mm3, tumor2.volume_mm3
        );
        Ok(ComparisonResult {
            tumor1,
            tumor2,
            volume_change_mm3: tumor2.volume_mm3 - tumor1.volume_mm3,
            volume_change_percent,
            dice,
            hausdorff_mm,
            mean_change: tumor2.stats.mean - tumor1.stats.mean,
            std_change: tumor2.stats.std - tumor1.stats.std,
            mean_change_percent: percent_change(tumor1.stats.mean, tumor2.stats.mean),
            growth: GrowthStatus::from_percent(volume_change_percent),
            overlap: OverlapAgreement::from_dice(dice),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    fn image() -> VolumeGrid {
        let data = Array3::from_shape_fn((10, 10, 10), |(z, h, w)| (z + h + w) as f32);
        VolumeGrid::with_spacing(data, [1.0, 2.0, 0.5]).unwrap()
    }

    fn mask_of(image: &VolumeGrid, f: impl FnOnce(&mut Array3<bool>)) -> Mask {
        let mut data = Array3::from_elem(image.shape(), false);
        f(&mut data);
        Mask::on_grid_of(image, data).unwrap()
    }

    #[test]
    fn test_intensity_stats() {
        let img = image();
        let m = mask_of(&img, |d| d.slice_mut(s![0, 0, 0..4]).fill(true));
        let st = IntensityStats::of(img.data(), m.data()).unwrap();
        assert!((st.mean - 1.5).abs() < 1e-9);
        assert!((st.std - 1.25f64.sqrt()).abs() < 1e-9);
        assert_eq!((st.min, st.max), (0.0, 3.0));
        assert!((st.median - 1.5).abs() < 1e-9);

        let empty = Mask::empty_like(&img);
        let st = IntensityStats::of(img.data(), empty.data()).unwrap();
        assert_eq!(st, IntensityStats::default());
    }

    #[test]
    fn test_compare_with_self() {
        let img = image();
        let m = mask_of(&img, |d| d.slice_mut(s![2..5, 3..6, 4..8]).fill(true));
        let r = ChangeAnalyzer::default().compare(&img, &m, &img, &m).unwrap();
        assert_eq!(r.volume_change_percent, 0.0);
        assert_eq!(r.volume_change_mm3, 0.0);
        assert_eq!(r.dice, 1.0);
        assert_eq!(r.hausdorff_mm, Some(0.0));
        assert_eq!(r.mean_change, 0.0);
        assert_eq!(r.growth, GrowthStatus::Stable);
        assert_eq!(r.overlap, OverlapAgreement::High);
        // 36 个体素, 每个 1 mm^3
        assert_eq!(r.tumor1.voxel_count, 36);
        assert!((r.tumor1.volume_mm3 - 36.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_masks() {
        let img = image();
        let empty = Mask::empty_like(&img);
        let r = ChangeAnalyzer::default()
            .compare(&img, &empty, &img, &empty)
            .unwrap();
        assert_eq!(r.volume_change_percent, 0.0);
        assert_eq!(r.dice, 1.0);
        assert_eq!(r.hausdorff_mm, None);
        assert_eq!(r.mean_change_percent, 0.0);

        let map = r.to_map();
        assert!(!map.contains_key("comparison.hausdorff_distance_mm"));
        assert_eq!(
            map["comparison.interpretation"],
            ReportValue::Text("stable".into())
        );
    }

    /// 从无到有时百分比定义为 0, 体积差仍然如实给出.
    #[test]
    fn test_appearing_tumor() {
        let img = image();
        let empty = Mask::empty_like(&img);
        let m = mask_of(&img, |d| d[(1, 1, 1)] = true);
        let r = ChangeAnalyzer::default().compare(&img, &empty, &img, &m).unwrap();
        assert_eq!(r.volume_change_percent, 0.0);
        assert!((r.volume_change_mm3 - 1.0).abs() < 1e-12);
        assert_eq!(r.dice, 0.0);
        assert_eq!(r.overlap, OverlapAgreement::Low);
    }

    #[test]
    fn test_reduction() {
        let img = image();
        let m1 = mask_of(&img, |d| d.slice_mut(s![2..4, 2..4, 2..4]).fill(true));
        let m2 = mask_of(&img, |d| d.slice_mut(s![2..4, 2..4, 2..3]).fill(true));
        let r = ChangeAnalyzer::default().compare(&img, &m1, &img, &m2).unwrap();
        assert!((r.volume_change_percent + 50.0).abs() < 1e-9);
        assert_eq!(r.growth, GrowthStatus::ModerateReduction);
        assert!((r.dice - 8.0 / 12.0).abs() < 1e-12);
        // 最远点 (z, h, 3) 到 (z, h, 2) 的距离为 1 个体素, 乘以最小间距 0.5
        assert_eq!(r.hausdorff_mm, Some(0.5));

        let map = r.to_map();
        assert_eq!(map["tumor1.voxel_count"].as_number(), Some(8.0));
        assert_eq!(map["tumor2.volume_cm3"].as_number(), Some(0.004));
        assert_eq!(
            map["comparison.interpretation"].as_text(),
            Some("moderate reduction")
        );
        assert!(map.contains_key("comparison.hausdorff_distance_mm"));
    }

    #[test]
    fn test_shape_mismatch() {
        let img = image();
        let m = Mask::empty_like(&img);
        let small = VolumeGrid::with_spacing(Array3::zeros((4, 4, 4)), [1.0; 3]).unwrap();
        let ms = Mask::empty_like(&small);
        let analyzer = ChangeAnalyzer::default();
        assert!(analyzer.compare(&img, &m, &small, &ms).is_err());
        assert!(analyzer.compare(&img, &ms, &img, &m).is_err());
    }
}
