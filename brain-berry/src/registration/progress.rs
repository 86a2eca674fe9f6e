//! 配准进度回调与协作式取消.
//!
//! 优化循环在每次迭代后调用 [`ProgressCallback::on_iteration`], 并检查
//! [`CancellationToken`]. 两者都可以在线程之间共享.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::info;

/// 单次迭代的进度信息.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// 当前金字塔层, 从 0 开始, 由粗到细.
    pub level: usize,
    /// 金字塔总层数.
    pub levels: usize,
    /// 当前层内的迭代序号, 从 0 开始.
    pub iteration: usize,
    /// 每层最大迭代次数.
    pub max_iterations: usize,
    /// 当前度量值 (`-MI`, 越小越好).
    pub metric: f64,
    /// 当前步长.
    pub step_length: f64,
}

impl ProgressInfo {
    /// 总体进度百分比, 按层与层内迭代线性估计.
    pub fn percent(&self) -> f64 {
        let per_level = 100.0 / self.levels.max(1) as f64;
        let within = (self.iteration + 1) as f64 / self.max_iterations.max(1) as f64;
        per_level * (self.level as f64 + within.min(1.0))
    }
}

/// 配准进度回调.
pub trait ProgressCallback: Send + Sync {
    /// 每次迭代后调用.
    fn on_iteration(&self, info: &ProgressInfo);

    /// 每层开始时调用. 默认什么都不做.
    fn on_level_start(&self, _level: usize, _levels: usize, _shrink_factor: usize) {}
}

/// 把进度写入 `info!` 日志. 每 `every` 次迭代记录一次.
#[derive(Debug, Clone)]
pub struct LoggingProgress {
    every: usize,
}

impl LoggingProgress {
    /// 每 `every` 次迭代记录一次. `every` 为 0 时按 1 处理.
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LoggingProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressCallback for LoggingProgress {
    fn on_iteration(&self, info: &ProgressInfo) {
        if info.iteration % self.every == 0 {
            info!(
                "配准 [{}/{}] 迭代 {:>3}: 度量 = {:.6}, 步长 = {:.4} ({:.1}%)",
                info.level + 1,
                info.levels,
                info.iteration,
                info.metric,
                info.step_length,
                info.percent()
            );
        }
    }

    fn on_level_start(&self, level: usize, levels: usize, shrink_factor: usize) {
        info!("配准第 {}/{} 层开始, 缩小倍数 {shrink_factor}", level + 1, levels);
    }
}

/// 记录全部进度信息. 克隆体共享同一份记录.
#[derive(Debug, Clone, Default)]
pub struct HistoryRecorder {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryRecorder {
    /// 创建空记录.
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录的一份拷贝.
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressCallback for HistoryRecorder {
    fn on_iteration(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }
}

/// 协作式取消标志. 克隆体共享同一个标志.
///
/// 配准在每次迭代后检查该标志, 一旦被置位即以 `RegistrationFailure::Cancelled` 降级返回.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// 创建未取消的标志.
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// 是否已请求取消.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
