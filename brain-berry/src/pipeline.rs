//! 纵向对比流水线: 配准 → 两次独立分割 → 定量对比.
//!
//! 任何一个阶段降级都不会中断流水线. 报告中会逐条记录发生了哪些回退,
//! 读者据此判断结果的可靠程度. 只有非法输入 (形状, 间距, 配置) 会返回 `Err`.

use std::fmt;
use std::sync::Arc;

use log::{info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::analysis::{put, ChangeAnalyzer, ComparisonResult, ReportMap};
use crate::error::Result;
use crate::registration::{
    apply_transform, CancellationToken, ProgressCallback, Registrar, RegistrationConfig,
    RegistrationOutcome, RegistrationQuality, RigidTransform,
};
use crate::segmentation::{EmptyReason, SegmentationConfig, SegmentationReport, TumorSegmenter};
use crate::{GridAttr, Mask, VolumeGrid};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 流水线参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// 是否进行配准. 输入已经配准好时可以关闭.
    pub register: bool,
    /// 配准参数.
    pub registration: RegistrationConfig,
    /// 分割参数.
    pub segmentation: SegmentationConfig,
    /// 是否在配准后计算质量诊断.
    pub evaluate_quality: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            register: true,
            registration: RegistrationConfig::default(),
            segmentation: SegmentationConfig::default(),
            evaluate_quality: true,
        }
    }
}

impl PipelineConfig {
    /// 检查各阶段参数.
    pub fn validate(&self) -> Result<()> {
        self.registration.validate()?;
        self.segmentation.validate()
    }
}

/// 配准阶段的状态.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RegistrationStatus {
    /// 未进行配准.
    Skipped,
    /// 配准成功.
    Success {
        /// 最终变换.
        transform: RigidTransform,
        /// 最终度量值.
        metric: f64,
    },
    /// 配准失败, 使用了未配准的图像.
    Degraded {
        /// 失败原因.
        reason: String,
    },
}

impl RegistrationStatus {
    /// 文字标签.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Success { .. } => "success",
            Self::Degraded { .. } => "degraded",
        }
    }
}

/// 某个阶段发生的回退.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Fallback {
    /// 配准失败, 以原始第二次扫描继续.
    Registration {
        /// 失败原因.
        reason: String,
    },
    /// 第二次扫描不在第一次扫描的网格上, 以恒等变换重采样.
    IdentityResampling,
    /// 第 `scan` 次扫描的分割降级为空掩码.
    Segmentation {
        /// 扫描序号, 从 1 开始.
        scan: usize,
        /// 降级原因.
        reason: EmptyReason,
    },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration { reason } => write!(f, "registration degraded: {reason}"),
            Self::IdentityResampling => f.write_str("scan 2 resampled with identity transform"),
            Self::Segmentation { scan, reason } => {
                write!(f, "segmentation of scan {scan} degraded: {reason:?}")
            }
        }
    }
}

/// 一次流水线运行的完整报告. 即使有阶段降级也总会生成.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisReport {
    /// 配准状态.
    pub registration: RegistrationStatus,
    /// 配准质量诊断.
    pub quality: Option<RegistrationQuality>,
    /// 第一次扫描的分割诊断.
    pub segmentation1: SegmentationReport,
    /// 第二次扫描的分割诊断.
    pub segmentation2: SegmentationReport,
    /// 定量对比结果.
    pub comparison: ComparisonResult,
    /// 按发生顺序排列的回退.
    pub fallbacks: Vec<Fallback>,
}

impl AnalysisReport {
    /// 是否有任何阶段发生回退.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        !self.fallbacks.is_empty()
    }

    /// 转为扁平映射: [`ComparisonResult::to_map`] 的全部键, 外加 `pipeline.*` 一组.
    pub fn to_map(&self) -> ReportMap {
        let mut map = self.comparison.to_map();
        let p = "pipeline";
        put(&mut map, p, "registration", self.registration.label());
        if let RegistrationStatus::Success { metric, .. } = &self.registration {
            put(&mut map, p, "registration_metric", *metric);
        }
        if let Some(q) = &self.quality {
            put(&mut map, p, "mutual_information", q.mutual_information);
            put(&mut map, p, "cross_correlation", q.correlation);
        }
        put(
            &mut map,
            p,
            "registration_degraded",
            matches!(self.registration, RegistrationStatus::Degraded { .. }),
        );
        put(
            &mut map,
            p,
            "identity_resampling",
            self.fallbacks.contains(&Fallback::IdentityResampling),
        );
        put(&mut map, p, "segmentation1_degraded", self.segmentation1.is_degraded());
        put(&mut map, p, "segmentation2_degraded", self.segmentation2.is_degraded());
        put(&mut map, p, "fallback_count", self.fallbacks.len());
        map
    }
}

/// 流水线输出.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// 位于第一次扫描网格上的第二次扫描.
    pub registered: VolumeGrid,
    /// 第一次扫描的肿瘤掩码.
    pub mask1: Mask,
    /// 第二次扫描 (配准后) 的肿瘤掩码.
    pub mask2: Mask,
    /// 报告.
    pub report: AnalysisReport,
}

/// 纵向对比流水线. 每次运行只读取输入, 不同的运行之间没有共享的可变状态.
#[derive(Debug, Clone)]
pub struct LongitudinalPipeline {
    config: PipelineConfig,
    registrar: Registrar,
    segmenter: TumorSegmenter,
    analyzer: ChangeAnalyzer,
}

impl LongitudinalPipeline {
    /// 以给定参数创建流水线. 参数非法时返回 `Err`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let registrar = Registrar::new(config.registration.clone())?;
        let segmenter = TumorSegmenter::new(config.segmentation.clone())?;
        Ok(Self {
            config,
            registrar,
            segmenter,
            analyzer: ChangeAnalyzer::default(),
        })
    }

    /// 设置配准的进度回调.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.registrar = self.registrar.with_progress(progress);
        self
    }

    /// 设置配准的取消标志.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.registrar = self.registrar.with_cancellation(token);
        self
    }

    /// 流水线参数.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 把 `scan2` 对齐到 `scan1` 上. 返回对齐后的图像与配准状态.
    fn align(
        &self,
        scan1: &VolumeGrid,
        scan2: &VolumeGrid,
        fallbacks: &mut Vec<Fallback>,
    ) -> Result<(VolumeGrid, RegistrationStatus)> {
        let (volume, status) = if self.config.register {
            match self.registrar.register(scan1, scan2) {
                RegistrationOutcome::Success {
                    registered,
                    transform,
                    metric,
                } => (registered, RegistrationStatus::Success { transform, metric }),
                RegistrationOutcome::Degraded { original, reason } => {
                    let reason = reason.to_string();
                    fallbacks.push(Fallback::Registration {
                        reason: reason.clone(),
                    });
                    (original, RegistrationStatus::Degraded { reason })
                }
            }
        } else {
            (scan2.clone(), RegistrationStatus::Skipped)
        };

        if volume.same_grid(scan1) {
            return Ok((volume, status));
        }
        warn!(
            "第二次扫描 {:?} 与第一次扫描 {:?} 不在同一网格上, 以恒等变换重采样",
            volume.shape(),
            scan1.shape()
        );
        fallbacks.push(Fallback::IdentityResampling);
        let identity = RigidTransform::identity(scan1.geometric_center());
        Ok((apply_transform(&volume, scan1, &identity)?, status))
    }

    /// 对比同一病人的两次扫描.
    pub fn run(&self, scan1: &VolumeGrid, scan2: &VolumeGrid) -> Result<PipelineOutput> {
        let mut fallbacks = Vec::new();
        let (registered, registration) = self.align(scan1, scan2, &mut fallbacks)?;

        let quality = match (&registration, self.config.evaluate_quality) {
            (RegistrationStatus::Skipped, _) | (_, false) => None,
            _ => Some(self.registrar.evaluate_quality(scan1, &registered)?),
        };

        let (mask1, segmentation1) = self.segmenter.segment_with_report(scan1);
        let (mask2, segmentation2) = self.segmenter.segment_with_report(&registered);
        for (scan, report) in [(1, &segmentation1), (2, &segmentation2)] {
            if let Some(reason) = report.empty_reason.filter(|r| r.is_degraded()) {
                fallbacks.push(Fallback::Segmentation { scan, reason });
            }
        }

        let comparison = self.analyzer.compare(scan1, &mask1, &registered, &mask2)?;
        info!(
            "对比完成: 体积变化 {:+.1}% ({}), dice = {:.3}, {} 处回退",
            comparison.volume_change_percent,
            comparison.growth,
            comparison.dice,
            fallbacks.len()
        );
        for f in &fallbacks {
            warn!("回退: {f}");
        }

        Ok(PipelineOutput {
            registered,
            mask1,
            mask2,
            report: AnalysisReport {
                registration,
                quality,
                segmentation1,
                segmentation2,
                comparison,
                fallbacks,
            },
        })
    }

    /// 依次处理多对扫描. 每对的结果相互独立.
    #[cfg(not(feature = "rayon"))]
    pub fn run_batch(&self, pairs: &[(VolumeGrid, VolumeGrid)]) -> Vec<Result<PipelineOutput>> {
        pairs.iter().map(|(a, b)| self.run(a, b)).collect()
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl LongitudinalPipeline {
    /// 借助 `rayon`, 并行地处理多对扫描. 结果顺序与输入一致, 每对的结果相互独立.
    pub fn run_batch(&self, pairs: &[(VolumeGrid, VolumeGrid)]) -> Vec<Result<PipelineOutput>> {
        pairs.par_iter().map(|(a, b)| self.run(a, b)).collect()
    }
}
