//! 脑组织提取与深度腐蚀.

use log::{debug, warn};
use ndarray::{Array3, ArrayView3};

use super::candidates::BrainShape;
use super::{EmptyReason, SegmentationConfig, SegmentationReport};
use crate::data::morph_3d::{
    bounding_box, centroid, closing, erode, fill_holes, largest_component, opening, Connectivity,
};
use crate::filter::stats::percentile;
use crate::Idx3d;

/// 清理后的脑区域: 最大的 26-连通域.
pub(crate) struct BrainRegion {
    mask: Array3<bool>,
    voxels: Vec<Idx3d>,
}

impl BrainRegion {
    /// 从平滑后的体数据中提取脑区域.
    pub(crate) fn extract(
        smoothed: ArrayView3<f32>,
        cfg: &SegmentationConfig,
    ) -> Result<Self, EmptyReason> {
        let mut positive = smoothed.iter().copied().filter(|v| *v > 0.0).collect::<Vec<_>>();
        let background =
            percentile(&mut positive, cfg.foreground_percentile).ok_or(EmptyReason::NoForeground)?;

        let mut foreground = smoothed
            .iter()
            .copied()
            .filter(|v| *v as f64 > background)
            .collect::<Vec<_>>();
        let skull =
            percentile(&mut foreground, cfg.skull_percentile).ok_or(EmptyReason::NoForeground)?;
        let (lo, hi) = cfg.brain_band;
        let low = percentile(&mut foreground, lo).ok_or(EmptyReason::NoForeground)?;
        let high = percentile(&mut foreground, hi).ok_or(EmptyReason::NoForeground)?;
        debug!(
            "前景阈值 {background:.2}, 颅骨阈值 {skull:.2}, 脑组织强度带 [{low:.2}, {high:.2}]"
        );

        let potential = smoothed.mapv(|v| {
            let v = v as f64;
            low <= v && v <= high && v <= skull
        });
        let cleaned = opening(potential.view(), cfg.opening_kernel);
        let cleaned = closing(cleaned.view(), cfg.closing_kernel);
        let cleaned = fill_holes(cleaned.view());

        let mask = largest_component(cleaned.view(), Connectivity::Full);
        let voxels = mask
            .indexed_iter()
            .filter_map(|(pos, b)| b.then_some(pos))
            .collect::<Vec<_>>();
        if voxels.is_empty() {
            return Err(EmptyReason::NoBrainRegion);
        }
        Ok(Self { mask, voxels })
    }

    /// 体素个数.
    #[inline]
    pub(crate) fn voxels(&self) -> usize {
        self.voxels.len()
    }

    /// 质心与半径估计. 半径为包围盒三个方向跨度 (`max - min`) 的均值除以 `divisor`.
    pub(crate) fn shape(&self, divisor: f64) -> BrainShape {
        let ((z0, h0, w0), (z1, h1, w1)) = bounding_box(&self.voxels);
        let span = ((z1 - z0) + (h1 - h0) + (w1 - w0)) as f64 / 3.0;
        BrainShape {
            centroid: centroid(&self.voxels),
            radius: span / divisor,
        }
    }

    /// 依次尝试各档腐蚀核. 第一档须保留不少于 `erosion_min_keep` 比例的脑组织,
    /// 之后各档只要非空即采用; 最后一档无条件接受.
    ///
    /// 每次回退都记录 `warn!`. 最后一档仍为空时返回 `EmptyReason::EmptyInterior`.
    pub(crate) fn deep_erosion(
        &self,
        cfg: &SegmentationConfig,
        report: &mut SegmentationReport,
    ) -> Result<Array3<bool>, EmptyReason> {
        let total = self.voxels() as f64;
        let last = cfg.erosion_kernels.len() - 1;
        for (tier, &k) in cfg.erosion_kernels.iter().enumerate() {
            let interior = erode(self.mask.view(), k);
            let kept = interior.iter().filter(|b| **b).count();
            let enough = match tier {
                0 => kept > 0 && kept as f64 >= cfg.erosion_min_keep * total,
                _ => kept > 0,
            };
            if tier == last || enough {
                if kept == 0 {
                    return Err(EmptyReason::EmptyInterior);
                }
                report.erosion_kernel = Some(k);
                return Ok(interior);
            }
            warn!(
                "{k}^3 腐蚀只保留了 {kept}/{} 个脑组织体素, 回退到更小的腐蚀核",
                self.voxels()
            );
            report.erosion_fallbacks += 1;
        }
        unreachable!("腐蚀核列表非空由参数检查保证")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    /// 由掩码直接构造脑区域.
    fn region(mask: Array3<bool>) -> BrainRegion {
        let voxels = mask
            .indexed_iter()
            .filter_map(|(pos, b)| b.then_some(pos))
            .collect();
        BrainRegion { mask, voxels }
    }

    /// 大区域直接使用 9^3 腐蚀.
    #[test]
    fn test_erosion_first_tier() {
        let mut m = Array3::from_elem((30, 30, 30), false);
        m.slice_mut(s![2..28, 2..28, 2..28]).fill(true);
        let mut report = SegmentationReport::default();
        let interior = region(m)
            .deep_erosion(&SegmentationConfig::default(), &mut report)
            .unwrap();
        assert_eq!(report.erosion_kernel, Some(9));
        assert_eq!(report.erosion_fallbacks, 0);
        assert_eq!(interior.iter().filter(|b| **b).count(), 18 * 18 * 18);
    }

    /// 小区域回退到 5^3, 再小则回退到 3^3.
    #[test]
    fn test_erosion_fallback() {
        let mut m = Array3::from_elem((20, 20, 20), false);
        m.slice_mut(s![5..14, 5..14, 5..14]).fill(true);
        let mut report = SegmentationReport::default();
        region(m)
            .deep_erosion(&SegmentationConfig::default(), &mut report)
            .unwrap();
        // 9^3 -> 1 个体素, 5^3 -> 125 个体素
        assert_eq!(report.erosion_kernel, Some(5));
        assert_eq!(report.erosion_fallbacks, 1);

        // 5^3 非空即采用, 即使只占 9^3 立方体加薄板的很小一部分
        let mut m = Array3::from_elem((48, 48, 48), false);
        m.slice_mut(s![2..11, 2..11, 2..11]).fill(true);
        m.slice_mut(s![20..24, 4..44, 4..44]).fill(true);
        let mut report = SegmentationReport::default();
        let interior = region(m)
            .deep_erosion(&SegmentationConfig::default(), &mut report)
            .unwrap();
        assert_eq!(report.erosion_kernel, Some(5));
        assert_eq!(report.erosion_fallbacks, 1);
        assert_eq!(interior.iter().filter(|b| **b).count(), 125);
        assert!(!interior[(22, 20, 20)]);

        // 5^3 为空时才回退到 3^3
        let mut m = Array3::from_elem((10, 10, 10), false);
        m.slice_mut(s![2..6, 2..6, 2..6]).fill(true);
        let mut report = SegmentationReport::default();
        let interior = region(m)
            .deep_erosion(&SegmentationConfig::default(), &mut report)
            .unwrap();
        assert_eq!(report.erosion_kernel, Some(3));
        assert_eq!(report.erosion_fallbacks, 2);
        assert_eq!(interior.iter().filter(|b| **b).count(), 8);
    }

    /// 所有档位都腐蚀为空.
    #[test]
    fn test_erosion_empty() {
        let mut m = Array3::from_elem((8, 8, 8), false);
        m.slice_mut(s![3..5, 3..5, 3..5]).fill(true);
        let mut report = SegmentationReport::default();
        let r = region(m).deep_erosion(&SegmentationConfig::default(), &mut report);
        assert_eq!(r.unwrap_err(), EmptyReason::EmptyInterior);
    }

    /// 半径估计不含 +1.
    #[test]
    fn test_shape() {
        let mut m = Array3::from_elem((10, 10, 10), false);
        m.slice_mut(s![1..8, 1..8, 1..8]).fill(true);
        let shape = region(m).shape(3.0);
        assert_eq!(shape.centroid, [4.0, 4.0, 4.0]);
        assert!((shape.radius - 2.0).abs() < 1e-12);
    }
}
