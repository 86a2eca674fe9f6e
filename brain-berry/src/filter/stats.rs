//! 强度统计: 百分位数, 均值与标准差.
//!
//! 百分位数采用线性插值: 第 `q` 百分位位于排序后下标 `q / 100 * (n - 1)` 处,
//! 非整数下标在相邻两个值之间线性插值.

use num::Float;
use ordered_float::{FloatCore, OrderedFloat};

/// 计算 `values` 的第 `q` 百分位数. `q` 会被截断到 `[0, 100]`.
///
/// 为了在线性时间内完成, `values` 会被原地重排. `values` 为空时返回 `None`.
pub fn percentile<T: Float + FloatCore>(values: &mut [T], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let pos = q.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;

    let (_, nth, right) = values.select_nth_unstable_by_key(lo, |v| OrderedFloat(*v));
    let low = nth.to_f64()?;
    if frac == 0.0 || right.is_empty() {
        return Some(low);
    }
    let high = right.iter().map(|v| OrderedFloat(*v)).min()?.0.to_f64()?;
    Some(low + (high - low) * frac)
}

/// 中位数, 即第 50 百分位数.
#[inline]
pub fn median<T: Float + FloatCore>(values: &mut [T]) -> Option<f64> {
    percentile(values, 50.0)
}

/// 总体均值与总体标准差 (除以 `n`). 以 `f64` 累加. 没有元素时返回 `None`.
pub fn mean_std<T: Float, I: IntoIterator<Item = T>>(values: I) -> Option<(f64, f64)> {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        let v = v.to_f64()?;
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    Some((mean, var.sqrt()))
}
