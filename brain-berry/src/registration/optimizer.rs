//! 规则步长梯度下降.
//!
//! 每次迭代沿缩放后梯度的反方向前进固定长度的一步. 当梯度方向与上一次相反
//! (内积为负) 时, 步长乘以松弛因子. 步长低于下限或梯度模长低于容差时停止.

use std::ops::ControlFlow;

use log::debug;

use super::RegistrationFailure;

/// 参数个数: 三个角度, 三个平移.
pub(crate) const DIM: usize = 6;

/// 参数向量.
pub(crate) type Params = [f64; DIM];

/// 优化停止的原因.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StopReason {
    /// 步长低于下限.
    StepTooSmall,
    /// 缩放后的梯度模长低于容差.
    GradientTooSmall,
    /// 达到最大迭代次数.
    MaxIterations,
}

/// 一次优化的结果.
#[derive(Debug, Clone)]
pub(crate) struct OptimizerReport {
    pub params: Params,
    /// 最后一次求值得到的度量值.
    pub value: f64,
    pub iterations: usize,
    pub step_length: f64,
    pub stop: StopReason,
}

/// 规则步长梯度下降优化器.
#[derive(Debug, Clone)]
pub(crate) struct RegularStepGradientDescent {
    pub learning_rate: f64,
    pub min_step: f64,
    pub relaxation: f64,
    pub gradient_tolerance: f64,
    pub max_iterations: usize,
    /// 参数尺度. 梯度在使用前按分量除以尺度.
    pub scales: Params,
}

impl RegularStepGradientDescent {
    /// 从 `init` 出发最小化 `evaluate`.
    ///
    /// 每次求值后以 `(迭代序号, 度量值, 当前步长)` 调用 `on_iteration`,
    /// 返回 `ControlFlow::Break` 时以 `RegistrationFailure::Cancelled` 终止.
    /// 求值失败时立即返回该错误.
    pub(crate) fn minimize<F, C>(
        &self,
        init: Params,
        mut evaluate: F,
        mut on_iteration: C,
    ) -> Result<OptimizerReport, RegistrationFailure>
    where
        F: FnMut(&Params) -> Result<(f64, Params), RegistrationFailure>,
        C: FnMut(usize, f64, f64) -> ControlFlow<()>,
    {
        let mut params = init;
        let mut step = self.learning_rate;
        let mut previous: Option<Params> = None;
        let mut value = f64::NAN;

        for iteration in 0..self.max_iterations {
            let (v, gradient) = evaluate(&params)?;
            value = v;
            if on_iteration(iteration, value, step).is_break() {
                return Err(RegistrationFailure::Cancelled);
            }

            let mut scaled = [0.0; DIM];
            for k in 0..DIM {
                scaled[k] = gradient[k] / self.scales[k];
            }
            let norm = scaled.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm < self.gradient_tolerance {
                return Ok(self.report(params, value, iteration + 1, step, StopReason::GradientTooSmall));
            }

            if let Some(prev) = previous {
                let dot: f64 = scaled.iter().zip(prev.iter()).map(|(a, b)| a * b).sum();
                if dot < 0.0 {
                    step *= self.relaxation;
                    debug!("梯度方向反转, 步长缩小为 {step:.6}");
                }
            }
            if step < self.min_step {
                return Ok(self.report(params, value, iteration + 1, step, StopReason::StepTooSmall));
            }

            let factor = step / norm;
            for k in 0..DIM {
                params[k] -= factor * scaled[k];
            }
            previous = Some(scaled);
        }
        Ok(self.report(params, value, self.max_iterations, step, StopReason::MaxIterations))
    }

    #[inline]
    fn report(
        &self,
        params: Params,
        value: f64,
        iterations: usize,
        step_length: f64,
        stop: StopReason,
    ) -> OptimizerReport {
        OptimizerReport {
            params,
            value,
            iterations,
            step_length,
            stop,
        }
    }
}
