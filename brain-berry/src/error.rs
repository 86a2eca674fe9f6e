//! 非法输入错误.
//!
//! 算法层面的退化 (配准失败, 空分割) 不在此列, 它们以回退值的形式返回.

use crate::Idx3d;
use thiserror::Error;

/// 非法输入. 每个变体都指明了被违反的前置条件.
#[derive(Debug, Error)]
pub enum Error {
    /// 体数据中没有任何体素.
    #[error("体数据为空, 形状为 {0:?}")]
    EmptyVolume(Idx3d),

    /// 体素间距不是正的有限值.
    #[error("第 {axis} 轴的体素间距必须为正有限值, 实际为 {value}")]
    InvalidSpacing {
        /// 出错的轴, 按 `(z, h, w)` 计.
        axis: usize,
        /// 实际间距.
        value: f64,
    },

    /// 原点坐标含非有限值.
    #[error("原点坐标必须为有限值, 实际为 {0:?}")]
    InvalidOrigin([f64; 3]),

    /// 方向矩阵奇异或含非有限值.
    #[error("方向矩阵不可逆或含非有限值: {0:?}")]
    InvalidDirection([[f64; 3]; 3]),

    /// 数组形状不一致.
    #[error("数组形状不一致: 期望 {expected:?}, 实际 {actual:?}")]
    ShapeMismatch {
        /// 期望的形状.
        expected: Idx3d,
        /// 实际的形状.
        actual: Idx3d,
    },

    /// 形状一致但几何信息 (间距, 原点, 方向) 不一致.
    #[error("几何信息不一致: {0}")]
    GeometryMismatch(&'static str),

    /// 配置项非法.
    #[error("配置项 `{name}` 非法: {reason}")]
    InvalidConfig {
        /// 配置项名称.
        name: &'static str,
        /// 具体原因.
        reason: String,
    },

    /// nii 文件中的数据不是三维的.
    #[error("仅支持三维体数据, 实际维数为 {0}")]
    NotThreeDimensional(usize),

    /// 读取 nii 文件失败.
    #[error("读取 NIfTI 文件失败: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

impl Error {
    /// 创建配置错误.
    pub fn config(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name,
            reason: reason.into(),
        }
    }

    /// 若 `expected != actual` 则返回形状错误.
    pub fn check_shape(expected: Idx3d, actual: Idx3d) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::ShapeMismatch { expected, actual })
        }
    }
}

/// 本 crate 的 `Result` 类型.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    /// 错误信息中应包含具体的违例值.
    #[test]
    fn test_display() {
        let e = Error::InvalidSpacing {
            axis: 1,
            value: -0.5,
        };
        let s = e.to_string();
        assert!(s.contains('1') && s.contains("-0.5"));

        let e = Error::config("bins", "至少需要 2 个");
        assert!(e.to_string().contains("bins"));
    }

    #[test]
    fn test_check_shape() {
        assert!(Error::check_shape((1, 2, 3), (1, 2, 3)).is_ok());
        assert!(matches!(
            Error::check_shape((1, 2, 3), (3, 2, 1)),
            Err(Error::ShapeMismatch {
                expected: (1, 2, 3),
                actual: (3, 2, 1)
            })
        ));
    }
}
