//! 扁平报告映射. 下游的报告与可视化组件只依赖这里的键名.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{ComparisonResult, IntensityStats, TumorMeasurement};

/// 报告中的一个值.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ReportValue {
    /// 数值.
    Number(f64),
    /// 文本, 例如定性解读.
    Text(String),
    /// 布尔标志, 例如某阶段是否降级.
    Flag(bool),
}

impl ReportValue {
    /// 数值. 其他类型返回 `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// 文本. 其他类型返回 `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 布尔标志. 其他类型返回 `None`.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for ReportValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<usize> for ReportValue {
    fn from(v: usize) -> Self {
        Self::Number(v as f64)
    }
}

impl From<bool> for ReportValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<String> for ReportValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ReportValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v:.3}"),
            Self::Text(s) => f.write_str(s),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

/// 扁平报告: 键按字典序排列.
pub type ReportMap = BTreeMap<String, ReportValue>;

/// 以 `prefix.key` 的形式插入.
pub(crate) fn put<V: Into<ReportValue>>(map: &mut ReportMap, prefix: &str, key: &str, value: V) {
    map.insert(format!("{prefix}.{key}"), value.into());
}

impl IntensityStats {
    fn write_into(&self, map: &mut ReportMap, prefix: &str) {
        put(map, prefix, "intensity_mean", self.mean);
        put(map, prefix, "intensity_std", self.std);
        put(map, prefix, "intensity_min", self.min);
        put(map, prefix, "intensity_max", self.max);
        put(map, prefix, "intensity_median", self.median);
    }
}

impl TumorMeasurement {
    fn write_into(&self, map: &mut ReportMap, prefix: &str) {
        put(map, prefix, "voxel_count", self.voxel_count);
        put(map, prefix, "volume_mm3", self.volume_mm3);
        put(map, prefix, "volume_cm3", self.volume_cm3());
        self.stats.write_into(map, prefix);
    }
}

impl ComparisonResult {
    /// 转为扁平映射.
    ///
    /// 键分为 `tumor1.*`, `tumor2.*` 与 `comparison.*` 三组.
    /// Hausdorff 距离无定义时, `comparison.hausdorff_distance_mm` 不出现在结果中.
    pub fn to_map(&self) -> ReportMap {
        let mut map = ReportMap::new();
        self.write_into(&mut map);
        map
    }

    pub(crate) fn write_into(&self, map: &mut ReportMap) {
        self.tumor1.write_into(map, "tumor1");
        self.tumor2.write_into(map, "tumor2");

        let c = "comparison";
        put(map, c, "volume_change_mm3", self.volume_change_mm3);
        put(map, c, "volume_change_percent", self.volume_change_percent);
        put(map, c, "dice_coefficient", self.dice);
        if let Some(h) = self.hausdorff_mm {
            put(map, c, "hausdorff_distance_mm", h);
        }
        put(map, c, "mean_intensity_change", self.mean_change);
        put(map, c, "std_intensity_change", self.std_change);
        put(map, c, "mean_intensity_change_percent", self.mean_change_percent);
        put(map, c, "interpretation", self.growth.label());
        put(map, c, "overlap", self.overlap.label());
    }
}
