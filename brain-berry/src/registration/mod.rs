//! 多分辨率刚性配准.
//!
//! 把浮动图像 (第二次扫描) 对齐到固定图像 (第一次扫描) 的网格上. 流程:
//!
//! 1. 旋转中心取固定图像的几何中心或强度质心, 变换初始化为恒等变换;
//! 2. 由粗到细的三层金字塔, 每层先按物理 sigma 平滑再按整数倍缩小;
//! 3. 每层在固定图像的随机采样点上, 以规则步长梯度下降最小化 `-MI`;
//! 4. 用最终变换和三线性插值把浮动图像重采样到固定图像的网格上, 图像外填 0.
//!
//! 任何数值失败都不会返回 `Err`, 而是得到 [`RegistrationOutcome::Degraded`],
//! 其中携带原始浮动图像与失败原因.

use std::ops::ControlFlow;
use std::sync::Arc;

use log::{info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::registration::*;
use crate::error::{Error, Result};
use crate::filter::{shrink, smooth_physical};
use crate::{GridAttr, Vec3, VolumeGrid};

mod metric;
mod optimizer;
mod progress;
mod resample;
mod transform;

pub use metric::{mutual_information, normalized_cross_correlation};
pub use optimizer::StopReason;
pub use progress::{CancellationToken, HistoryRecorder, LoggingProgress, ProgressCallback, ProgressInfo};
pub use resample::apply_transform;
pub use transform::RigidTransform;

use metric::MattesMutualInformation;
use optimizer::RegularStepGradientDescent;

/// 旋转中心的初始化方式.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CenterInit {
    /// 固定图像的几何中心.
    #[default]
    Geometry,

    /// 固定图像的强度质心. 总强度不为正时退回几何中心.
    Moments,
}

/// 配准降级的原因.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationFailure {
    /// 某幅图像 (或其某层金字塔) 的强度范围为零, 无法构建直方图.
    #[error("图像强度范围退化, 无法计算互信息")]
    DegenerateIntensityRange,

    /// 落在浮动图像内部的采样点太少.
    #[error("有效采样点不足: {valid} < {required}")]
    TooFewValidSamples {
        /// 有效采样点个数.
        valid: usize,
        /// 要求的最少个数.
        required: usize,
    },

    /// 度量值不是有限值.
    #[error("互信息度量值非有限")]
    NonFiniteMetric,

    /// 梯度含非有限值.
    #[error("互信息梯度非有限")]
    NonFiniteGradient,

    /// 调用者请求了取消.
    #[error("配准被取消")]
    Cancelled,

    /// 构建金字塔或重采样时出错.
    #[error("配准预处理失败: {0}")]
    Preprocessing(#[from] Error),
}

/// 配准参数. 默认值见 [`crate::consts::registration`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegistrationConfig {
    /// 联合直方图 bin 数.
    pub bins: usize,
    /// 采样比例, `(0, 1]`.
    pub sampling_fraction: f64,
    /// 采样随机种子.
    pub seed: u64,
    /// 每层的初始步长.
    pub learning_rate: f64,
    /// 最小步长.
    pub min_step_length: f64,
    /// 梯度反向时的步长缩放因子, `(0, 1)`.
    pub relaxation_factor: f64,
    /// 缩放后梯度模长的停止容差.
    pub gradient_tolerance: f64,
    /// 每层最大迭代次数.
    pub iterations_per_level: usize,
    /// 各层缩小倍数, 由粗到细.
    pub shrink_factors: Vec<usize>,
    /// 各层平滑 sigma (毫米), 与 `shrink_factors` 一一对应.
    pub smoothing_sigmas: Vec<f64>,
    /// 旋转参数尺度.
    pub rotation_scale: f64,
    /// 平移参数尺度.
    pub translation_scale: f64,
    /// 旋转中心初始化方式.
    pub center_init: CenterInit,
    /// 每次求值要求的最少有效采样点数.
    pub min_valid_samples: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            bins: HISTOGRAM_BINS,
            sampling_fraction: SAMPLING_FRACTION,
            seed: SAMPLING_SEED,
            learning_rate: LEARNING_RATE,
            min_step_length: MIN_STEP_LENGTH,
            relaxation_factor: RELAXATION_FACTOR,
            gradient_tolerance: GRADIENT_TOLERANCE,
            iterations_per_level: ITERATIONS_PER_LEVEL,
            shrink_factors: SHRINK_FACTORS.to_vec(),
            smoothing_sigmas: SMOOTHING_SIGMAS.to_vec(),
            rotation_scale: ROTATION_SCALE,
            translation_scale: TRANSLATION_SCALE,
            center_init: CenterInit::Geometry,
            min_valid_samples: MIN_VALID_SAMPLES,
        }
    }
}

impl RegistrationConfig {
    /// 检查参数合法性.
    pub fn validate(&self) -> Result<()> {
        let positive = |name, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(Error::config(name, format!("必须为正有限值, 实际为 {v}")))
            }
        };
        if self.bins < 2 {
            return Err(Error::config("bins", "至少需要 2 个 bin"));
        }
        if !(self.sampling_fraction > 0.0 && self.sampling_fraction <= 1.0) {
            return Err(Error::config("sampling_fraction", "必须位于 (0, 1]"));
        }
        positive("learning_rate", self.learning_rate)?;
        positive("min_step_length", self.min_step_length)?;
        positive("rotation_scale", self.rotation_scale)?;
        positive("translation_scale", self.translation_scale)?;
        if !(self.relaxation_factor > 0.0 && self.relaxation_factor < 1.0) {
            return Err(Error::config("relaxation_factor", "必须位于 (0, 1)"));
        }
        if !(self.gradient_tolerance >= 0.0) {
            return Err(Error::config("gradient_tolerance", "不能为负"));
        }
        if self.iterations_per_level == 0 {
            return Err(Error::config("iterations_per_level", "至少迭代 1 次"));
        }
        if self.min_valid_samples == 0 {
            return Err(Error::config("min_valid_samples", "至少需要 1 个"));
        }
        if self.shrink_factors.is_empty() || self.shrink_factors.len() != self.smoothing_sigmas.len() {
            return Err(Error::config(
                "shrink_factors",
                "金字塔层数必须非零, 且与 smoothing_sigmas 等长",
            ));
        }
        if self.shrink_factors.contains(&0) {
            return Err(Error::config("shrink_factors", "缩小倍数至少为 1"));
        }
        if self.smoothing_sigmas.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
            return Err(Error::config("smoothing_sigmas", "必须为非负有限值"));
        }
        Ok(())
    }

    /// 金字塔层数.
    #[inline]
    pub fn levels(&self) -> usize {
        self.shrink_factors.len()
    }
}

/// 配准结果.
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// 配准成功.
    Success {
        /// 重采样到固定图像网格上的浮动图像.
        registered: VolumeGrid,
        /// 最终变换.
        transform: RigidTransform,
        /// 最终度量值 (`-MI`).
        metric: f64,
    },

    /// 配准失败, 退回原始浮动图像.
    Degraded {
        /// 未经配准的浮动图像.
        original: VolumeGrid,
        /// 失败原因.
        reason: RegistrationFailure,
    },
}

impl RegistrationOutcome {
    /// 是否配准成功.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// 配准后的图像. 降级时为原始浮动图像.
    pub fn volume(&self) -> &VolumeGrid {
        match self {
            Self::Success { registered, .. } => registered,
            Self::Degraded { original, .. } => original,
        }
    }

    /// 消费自我, 获得配准后的图像.
    pub fn into_volume(self) -> VolumeGrid {
        match self {
            Self::Success { registered, .. } => registered,
            Self::Degraded { original, .. } => original,
        }
    }

    /// 最终变换. 降级时为 `None`.
    pub fn transform(&self) -> Option<&RigidTransform> {
        match self {
            Self::Success { transform, .. } => Some(transform),
            Self::Degraded { .. } => None,
        }
    }

    /// 最终度量值. 降级时为 `None`.
    pub fn metric(&self) -> Option<f64> {
        match self {
            Self::Success { metric, .. } => Some(*metric),
            Self::Degraded { .. } => None,
        }
    }

    /// 降级原因. 成功时为 `None`.
    pub fn failure(&self) -> Option<&RegistrationFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }
}

/// 配准质量诊断.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegistrationQuality {
    /// 全体素互信息.
    pub mutual_information: f64,
    /// Pearson 归一化互相关.
    pub correlation: f64,
}

/// 刚性配准器.
#[derive(Clone)]
pub struct Registrar {
    config: RegistrationConfig,
    progress: Option<Arc<dyn ProgressCallback>>,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Registrar {
    /// 以给定参数创建配准器. 参数非法时返回 `Err`.
    pub fn new(config: RegistrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: None,
            cancel: None,
        })
    }

    /// 设置进度回调.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 设置取消标志.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// 配准参数.
    #[inline]
    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// 初始旋转中心.
    fn initial_center(&self, fixed: &VolumeGrid) -> Vec3 {
        match self.config.center_init {
            CenterInit::Geometry => fixed.geometric_center(),
            CenterInit::Moments => fixed.moments_center().unwrap_or_else(|| {
                warn!("固定图像总强度不为正, 旋转中心退回几何中心");
                fixed.geometric_center()
            }),
        }
    }

    /// 把 `moving` 配准到 `fixed` 上.
    ///
    /// 失败时记录 `warn!` 并返回携带原始 `moving` 的 [`RegistrationOutcome::Degraded`].
    pub fn register(&self, fixed: &VolumeGrid, moving: &VolumeGrid) -> RegistrationOutcome {
        match self.try_register(fixed, moving) {
            Ok((registered, transform, metric)) => RegistrationOutcome::Success {
                registered,
                transform,
                metric,
            },
            Err(reason) => {
                warn!("配准失败, 使用未配准的浮动图像继续: {reason}");
                RegistrationOutcome::Degraded {
                    original: moving.clone(),
                    reason,
                }
            }
        }
    }

    fn try_register(
        &self,
        fixed: &VolumeGrid,
        moving: &VolumeGrid,
    ) -> std::result::Result<(VolumeGrid, RigidTransform, f64), RegistrationFailure> {
        let cfg = &self.config;
        let levels = cfg.levels();
        let center = self.initial_center(fixed);
        let [rs, ts] = [cfg.rotation_scale, cfg.translation_scale];
        let optimizer = RegularStepGradientDescent {
            learning_rate: cfg.learning_rate,
            min_step: cfg.min_step_length,
            relaxation: cfg.relaxation_factor,
            gradient_tolerance: cfg.gradient_tolerance,
            max_iterations: cfg.iterations_per_level,
            scales: [rs, rs, rs, ts, ts, ts],
        };

        let mut params = [0.0; 6];
        let mut metric = f64::NAN;
        let schedule = cfg.shrink_factors.iter().zip(cfg.smoothing_sigmas.iter());
        for (level, (&factor, &sigma)) in schedule.enumerate() {
            if self.is_cancelled() {
                return Err(RegistrationFailure::Cancelled);
            }
            if let Some(p) = &self.progress {
                p.on_level_start(level, levels, factor);
            }

            let f = shrink(&smooth_physical(fixed, sigma, SMOOTHING_TRUNCATE)?, factor)?;
            let m = shrink(&smooth_physical(moving, sigma, SMOOTHING_TRUNCATE)?, factor)?;
            let mi = MattesMutualInformation::new(
                &f,
                &m,
                cfg.bins,
                cfg.sampling_fraction,
                cfg.seed.wrapping_add(level as u64),
                cfg.min_valid_samples,
            )?;

            let report = optimizer.minimize(
                params,
                |p| mi.evaluate(&RigidTransform::from_parameters(p, center)),
                |iteration, value, step_length| {
                    if let Some(p) = &self.progress {
                        p.on_iteration(&ProgressInfo {
                            level,
                            levels,
                            iteration,
                            max_iterations: cfg.iterations_per_level,
                            metric: value,
                            step_length,
                        });
                    }
                    if self.is_cancelled() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )?;
            info!(
                "配准第 {}/{levels} 层 (缩小 {factor} 倍, {} 个采样点): {} 次迭代, 度量 {:.6}, 停止原因 {:?}",
                level + 1,
                mi.sample_count(),
                report.iterations,
                report.value,
                report.stop
            );
            params = report.params;
            metric = report.value;
        }

        let transform = RigidTransform::from_parameters(&params, center);
        let registered = apply_transform(moving, fixed, &transform)?;
        Ok((registered, transform, metric))
    }

    /// 配准质量诊断: `fixed` 与 `registered` 之间的互信息与归一化互相关.
    ///
    /// 两者不在同一网格上时返回 `Err`.
    pub fn evaluate_quality(&self, fixed: &VolumeGrid, registered: &VolumeGrid) -> Result<RegistrationQuality> {
        fixed.check_same_grid(registered)?;
        Ok(RegistrationQuality {
            mutual_information: mutual_information(fixed.data(), registered.data(), self.config.bins),
            correlation: normalized_cross_correlation(fixed.data(), registered.data()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 光滑的各向异性高斯团, 沿 w 方向平移 `shift_w` 毫米.
    fn blob(shift_w: f64) -> VolumeGrid {
        let data = Array3::from_shape_fn((32, 32, 32), |(z, h, w)| {
            let dz = (z as f64 - 16.0) / 7.0;
            let dh = (h as f64 - 15.0) / 5.0;
            let dw = (w as f64 - 16.0 - shift_w) / 4.0;
            (50.0 + 900.0 * (-(dz * dz + dh * dh + dw * dw)).exp()) as f32
        });
        VolumeGrid::with_spacing(data, [1.0; 3]).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(RegistrationConfig::default().validate().is_ok());
        let bad = [
            RegistrationConfig {
                bins: 1,
                ..Default::default()
            },
            RegistrationConfig {
                sampling_fraction: 0.0,
                ..Default::default()
            },
            RegistrationConfig {
                relaxation_factor: 1.0,
                ..Default::default()
            },
            RegistrationConfig {
                translation_scale: 0.0,
                ..Default::default()
            },
            RegistrationConfig {
                shrink_factors: vec![2, 1],
                ..Default::default()
            },
            RegistrationConfig {
                smoothing_sigmas: vec![2.0, -1.0, 0.0],
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(Registrar::new(cfg), Err(Error::InvalidConfig { .. })));
        }
    }

    /// 两幅相同图像配准后接近恒等变换.
    #[test]
    fn test_identical_volumes() {
        let v = blob(0.0);
        let history = HistoryRecorder::new();
        let registrar = Registrar::new(RegistrationConfig::default())
            .unwrap()
            .with_progress(Arc::new(history.clone()));
        let outcome = registrar.register(&v, &v);
        assert!(outcome.is_success(), "{:?}", outcome.failure());

        let t = outcome.transform().unwrap();
        assert!(t.angles().iter().all(|a| a.abs() < 0.05), "{t:?}");
        assert!(t.translation().iter().all(|d| d.abs() < 0.5), "{t:?}");
        assert!(outcome.metric().unwrap() < 0.0);

        let registered = outcome.volume();
        assert!(registered.same_grid(&v));
        let quality = registrar.evaluate_quality(&v, registered).unwrap();
        assert!(quality.correlation > 0.99);

        let h = history.history();
        assert!(!h.is_empty());
        assert!(h.iter().any(|i| i.level == 2));
        assert!(h.iter().all(|i| i.levels == 3 && i.metric.is_finite()));
    }

    /// 恢复沿 w 方向 3 毫米的平移.
    #[test]
    fn test_recover_translation() {
        let fixed = blob(0.0);
        let moving = blob(3.0);
        let registrar = Registrar::new(RegistrationConfig::default()).unwrap();
        let outcome = registrar.register(&fixed, &moving);
        let t = outcome.transform().expect("配准应当成功");
        let [tz, th, tw] = t.translation();
        assert!((tw - 3.0).abs() < 1.0, "{t:?}");
        assert!(tz.abs() < 1.0 && th.abs() < 1.0, "{t:?}");

        let before = normalized_cross_correlation(fixed.data(), moving.data());
        let after = registrar.evaluate_quality(&fixed, outcome.volume()).unwrap();
        assert!(after.correlation > before);
    }

    /// 常数图像无法配准, 退回原始图像.
    #[test]
    fn test_degenerate_falls_back() {
        let fixed = blob(0.0);
        let flat = VolumeGrid::with_spacing(Array3::from_elem((16, 16, 16), 3.0), [1.0; 3]).unwrap();
        let outcome = Registrar::new(RegistrationConfig::default())
            .unwrap()
            .register(&fixed, &flat);
        assert!(matches!(
            outcome.failure(),
            Some(RegistrationFailure::DegenerateIntensityRange)
        ));
        assert!(outcome.transform().is_none() && outcome.metric().is_none());
        assert_eq!(outcome.volume().data(), flat.data());
    }

    /// 已取消的配准立即降级.
    #[test]
    fn test_cancelled() {
        let v = blob(0.0);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = Registrar::new(RegistrationConfig::default())
            .unwrap()
            .with_cancellation(token)
            .register(&v, &v);
        assert!(matches!(outcome.failure(), Some(RegistrationFailure::Cancelled)));
    }

    /// 强度质心初始化.
    #[test]
    fn test_center_init() {
        let mut data = Array3::zeros((8, 8, 8));
        data[(1, 1, 1)] = 5.0;
        let v = VolumeGrid::with_spacing(data, [1.0; 3]).unwrap();
        let geometry = Registrar::new(RegistrationConfig::default()).unwrap();
        assert_eq!(geometry.initial_center(&v), [4.0, 4.0, 4.0]);
        let moments = Registrar::new(RegistrationConfig {
            center_init: CenterInit::Moments,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(moments.initial_center(&v), [1.0, 1.0, 1.0]);
    }
}
