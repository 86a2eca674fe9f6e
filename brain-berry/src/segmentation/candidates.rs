//! 候选连通域的大小, 形状与位置过滤.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::SegmentationConfig;
use crate::data::morph_3d::Component;
use crate::{linalg, Vec3};

/// 候选连通域被拒绝的原因. 按检查顺序排列, 只记录第一个不满足的条件.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Rejection {
    /// 体素数小于下限.
    TooSmall,
    /// 体素数大于上限.
    TooLarge,
    /// 包围盒过于细长 (血管等).
    Elongated,
    /// 体素数相对包围盒体积过少.
    Sparse,
    /// 离脑中心太远 (边缘伪影).
    Peripheral,
}

/// 脑区域的质心 (连续索引) 与半径估计 (体素).
#[derive(Debug, Clone, Copy)]
pub(crate) struct BrainShape {
    pub centroid: Vec3,
    pub radius: f64,
}

/// 检查单个候选连通域.
pub(crate) fn judge(
    component: &Component,
    brain: &BrainShape,
    cfg: &SegmentationConfig,
) -> Result<(), Rejection> {
    let n = component.len();
    if n < cfg.min_voxels {
        return Err(Rejection::TooSmall);
    }
    if n > cfg.max_voxels {
        return Err(Rejection::TooLarge);
    }

    let extents = component.extents();
    let longest = extents.iter().copied().max().unwrap_or(1);
    let shortest = extents.iter().copied().min().unwrap_or(1);
    if (shortest as f64 / longest as f64) < cfg.min_aspect_ratio {
        return Err(Rejection::Elongated);
    }

    let bounding: usize = extents.iter().product();
    if (n as f64 / bounding as f64) < cfg.min_compactness {
        return Err(Rejection::Sparse);
    }

    let distance = linalg::distance(&component.centroid(), &brain.centroid);
    if distance > cfg.max_center_distance * brain.radius {
        return Err(Rejection::Peripheral);
    }
    Ok(())
}
