//! 定性解读. 分档阈值见 [`crate::consts::interpretation`].

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::interpretation::*;

/// 按体积变化百分比划分的肿瘤变化档位.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GrowthStatus {
    /// `|change| < 5%`.
    Stable,
    /// `change > 50%`.
    SignificantGrowth,
    /// `change > 10%`.
    ModerateGrowth,
    /// `change < -50%`.
    SignificantReduction,
    /// `change < -10%`.
    ModerateReduction,
    /// 其余情况.
    MinimalChange,
}

impl GrowthStatus {
    /// 按顺序逐档判断, 命中即返回.
    pub fn from_percent(change: f64) -> Self {
        if change.abs() < STABLE_PERCENT {
            Self::Stable
        } else if change > SIGNIFICANT_PERCENT {
            Self::SignificantGrowth
        } else if change > MODERATE_PERCENT {
            Self::ModerateGrowth
        } else if change < -SIGNIFICANT_PERCENT {
            Self::SignificantReduction
        } else if change < -MODERATE_PERCENT {
            Self::ModerateReduction
        } else {
            Self::MinimalChange
        }
    }

    /// 文字标签.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::SignificantGrowth => "significant growth",
            Self::ModerateGrowth => "moderate growth",
            Self::SignificantReduction => "significant reduction",
            Self::ModerateReduction => "moderate reduction",
            Self::MinimalChange => "minimal change",
        }
    }

    /// 是否属于缩小.
    #[inline]
    pub fn is_reduction(self) -> bool {
        matches!(self, Self::SignificantReduction | Self::ModerateReduction)
    }
}

impl fmt::Display for GrowthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 按 Dice 系数划分的重叠程度.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OverlapAgreement {
    /// `dice < 0.1`: 两次检测到的区域基本不同.
    Low,
    /// 部分重叠.
    Moderate,
    /// `dice > 0.7`: 位置一致, 配准良好.
    High,
}

impl OverlapAgreement {
    /// 按 Dice 系数分档.
    pub fn from_dice(dice: f64) -> Self {
        if dice < LOW_OVERLAP_DICE {
            Self::Low
        } else if dice > HIGH_OVERLAP_DICE {
            Self::High
        } else {
            Self::Moderate
        }
    }

    /// 文字标签.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low overlap",
            Self::Moderate => "moderate overlap",
            Self::High => "high overlap",
        }
    }
}

impl fmt::Display for OverlapAgreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
