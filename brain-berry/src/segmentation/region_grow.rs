//! 基于强度区间的区域生长.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3};

use crate::data::morph_3d::{check, diamond_neighbours};
use crate::filter::stats::mean_std;
use crate::Idx3d;

/// 由合法种子强度估计生长区间 `[mean - k std, mean + k std]`.
/// 没有合法种子时返回 `fallback`.
pub(crate) fn seed_band(
    image: ArrayView3<f32>,
    seeds: &[Idx3d],
    k: f64,
    fallback: (f64, f64),
) -> (f64, f64) {
    let dim = image.dim();
    let values = seeds.iter().filter(|s| check(s, dim)).map(|&s| image[s]);
    match mean_std(values) {
        Some((mean, std)) => (mean - k * std, mean + k * std),
        None => fallback,
    }
}

/// 从种子出发, 把强度位于 `[lo, hi]` 内的 6-连通体素标记为前景.
///
/// 越界的种子, 以及强度不在区间内的种子都不会生长.
pub(crate) fn grow(image: ArrayView3<f32>, seeds: &[Idx3d], (lo, hi): (f64, f64)) -> Array3<bool> {
    let dim = image.dim();
    let inside = |p: Idx3d| {
        let v = image[p] as f64;
        lo <= v && v <= hi
    };
    let mut region = Array3::from_elem(dim, false);
    let mut queue = VecDeque::new();
    for &seed in seeds {
        if check(&seed, dim) && !region[seed] && inside(seed) {
            region[seed] = true;
            queue.push_back(seed);
        }
    }
    while let Some(pos) = queue.pop_front() {
        for next in diamond_neighbours(pos, dim) {
            if !region[next] && inside(next) {
                region[next] = true;
                queue.push_back(next);
            }
        }
    }
    region
}
