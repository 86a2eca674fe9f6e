#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 对同一病人的两次三维脑部扫描进行纵向对比, 量化肿瘤随时间的变化.
//!
//! 主流程为 "配准 → 分割 → 定量对比":
//!
//! 1. [`registration`]: 多分辨率刚性配准, 把第二次扫描对齐到第一次扫描的网格上;
//! 2. [`segmentation`]: 在每次扫描上独立地进行脑组织提取与统计离群肿瘤检测;
//! 3. [`analysis`]: 计算两个分割结果之间的体积, 强度与空间重叠 (Dice, Hausdorff) 变化.
//!
//! [`pipeline`] 把三者串联起来, 并记录哪些阶段发生了降级.
//!
//! # 注意
//!
//! 1. 所有三维数组均按 `(z, h, w)` 顺序存储与访问. 与之对应的间距, 原点,
//!   物理坐标等三维向量也一律按该顺序排列.
//! 2. 非法输入 (形状不一致, 非正间距, 空体数据) 会立即返回 [`Error`].
//!   算法层面的退化 (配准数值失败, 分割为空) 不会返回错误,
//!   而是给出定义良好的回退值并记录 `warn!` 日志.
//!
//! # 开发计划
//!
//! ### 体数据与几何信息 ✅
//!
//! `VolumeGrid`, `Mask` 以及共享的 `Geometry`. 支持从 nii 文件加载.
//!
//! 实现位于 `brain-berry/src/data`.
//!
//! ### 三维二值形态学与连通域 ✅
//!
//! 立方体结构元的腐蚀/膨胀/开/闭运算, 空洞填充, 6-/26-连通域标记.
//!
//! 实现位于 `brain-berry/src/data/morph_3d`.
//!
//! ### 刚性配准 ✅
//!
//! Mattes 风格互信息, 规则步长梯度下降, 三层金字塔, 进度回调与协作式取消.
//!
//! 实现位于 `brain-berry/src/registration`.
//!
//! ### 肿瘤分割 ✅
//!
//! 五阶段启发式流程, 以及区域生长分割与分割精化.
//!
//! 实现位于 `brain-berry/src/segmentation`.
//!
//! ### 变化分析与报告映射 ✅
//!
//! 实现位于 `brain-berry/src/analysis`.
//!
//! ### 批量并行处理 ✅
//!
//! 开启 `rayon` feature 后, 多个病人的扫描对可以并行处理.

/// 三维索引, 按 `(z, h, w)` 顺序.
pub type Idx3d = (usize, usize, usize);

/// 三维物理坐标或连续索引, 按 `(z, h, w)` 顺序.
pub type Vec3 = [f64; 3];

/// 3x3 矩阵, 行优先.
pub type Mat3 = [[f64; 3]; 3];

mod linalg;

mod data;

pub use data::{morph_3d, GridAttr, Geometry, Mask, VolumeGrid};

pub mod consts;

mod error;

pub use error::{Error, Result};

pub mod filter;

pub mod registration;

pub mod segmentation;

pub mod analysis;

pub mod pipeline;

pub mod dataset;

pub mod prelude;
