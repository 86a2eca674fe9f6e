//! 3D 二值形态学操作.
//!
//! 结构元均为边长为 `size` 的立方体, 原点位于第 `size / 2` 个元素处.
//! 立方体结构元可以分解为三个轴向的一维窗口, 因此腐蚀与膨胀都按轴分离计算.
//! 数组之外的体素一律视为背景.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::Idx3d;

mod label;

pub use label::{connected_components, largest_component, paint, Component, Connectivity};
pub(crate) use label::{bounding_box, centroid};

/// 获取 `pos` 前后上下左右六个点的坐标.
///
/// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
#[inline]
pub(crate) fn diamond_neighbours((z, h, w): Idx3d, dim: Idx3d) -> impl Iterator<Item = Idx3d> {
    [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ]
    .into_iter()
    .filter(move |p| check(p, dim))
}

/// 检查索引是否合法.
#[inline]
pub(crate) fn check(&(z0, h0, w0): &Idx3d, (z, h, w): Idx3d) -> bool {
    z0 < z && h0 < h && w0 < w
}

/// 边长为 `size` 的结构元在一个轴上覆盖的相对偏移 `[lo, hi]`.
#[inline]
fn window(size: usize) -> (isize, isize) {
    assert!(size >= 1, "结构元边长至少为 1");
    let lo = -((size / 2) as isize);
    (lo, lo + size as isize - 1)
}

/// 沿 `axis` 做一维滤波. `all` 为 `true` 时取窗口内的合取 (腐蚀),
/// 否则取析取 (膨胀). 窗口为 `[i + lo, i + hi]`.
fn pass_1d(input: ArrayView3<bool>, axis: usize, (lo, hi): (isize, isize), all: bool) -> Array3<bool> {
    let mut out = Array3::from_elem(input.dim(), false);
    let n = input.len_of(Axis(axis)) as isize;

    let op = |mut o: ndarray::ArrayViewMut1<bool>, i: ndarray::ArrayView1<bool>| {
        for p in 0..n {
            let (a, b) = (p + lo, p + hi);
            o[p as usize] = if all {
                a >= 0 && b < n && (a..=b).all(|q| i[q as usize])
            } else {
                (a.max(0)..=b.min(n - 1)).any(|q| i[q as usize])
            };
        }
    };

    let zip = Zip::from(out.lanes_mut(Axis(axis))).and(input.lanes(Axis(axis)));
    #[cfg(feature = "rayon")]
    zip.par_for_each(op);
    #[cfg(not(feature = "rayon"))]
    zip.for_each(op);
    out
}

/// 以边长为 `size` 的立方体结构元进行腐蚀.
pub fn erode(mask: ArrayView3<bool>, size: usize) -> Array3<bool> {
    let win = window(size);
    let once = pass_1d(mask, 0, win, true);
    let twice = pass_1d(once.view(), 1, win, true);
    pass_1d(twice.view(), 2, win, true)
}

/// 以边长为 `size` 的立方体结构元进行膨胀.
///
/// 膨胀使用反射后的结构元, 因此偶数边长时窗口方向与腐蚀相反,
/// 这保证了开闭运算的对偶性.
pub fn dilate(mask: ArrayView3<bool>, size: usize) -> Array3<bool> {
    let (lo, hi) = window(size);
    let win = (-hi, -lo);
    let once = pass_1d(mask, 0, win, false);
    let twice = pass_1d(once.view(), 1, win, false);
    pass_1d(twice.view(), 2, win, false)
}

/// 开运算: 先腐蚀后膨胀.
#[inline]
pub fn opening(mask: ArrayView3<bool>, size: usize) -> Array3<bool> {
    dilate(erode(mask, size).view(), size)
}

/// 闭运算: 先膨胀后腐蚀.
#[inline]
pub fn closing(mask: ArrayView3<bool>, size: usize) -> Array3<bool> {
    erode(dilate(mask, size).view(), size)
}

/// 将三维掩码中的背景空洞 (即不与六个表面 6-连通的背景区域) 填充为前景.
pub fn fill_holes(mask: ArrayView3<bool>) -> Array3<bool> {
    let dim = mask.dim();
    let (z, h, w) = dim;
    let on_surface =
        |(a, b, c): Idx3d| a == 0 || b == 0 || c == 0 || a + 1 == z || b + 1 == h || c + 1 == w;

    let mut outside = Array3::from_elem(dim, false);
    let mut queue = VecDeque::new();
    for (pos, &fg) in mask.indexed_iter() {
        if !fg && on_surface(pos) {
            outside[pos] = true;
            queue.push_back(pos);
        }
    }
    while let Some(pos) = queue.pop_front() {
        for next in diamond_neighbours(pos, dim) {
            if !mask[next] && !outside[next] {
                outside[next] = true;
                queue.push_back(next);
            }
        }
    }
    outside.mapv(|o| !o)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn cube(dim: Idx3d, from: usize, to: usize) -> Array3<bool> {
        let mut a = Array3::from_elem(dim, false);
        a.slice_mut(s![from..to, from..to, from..to]).fill(true);
        a
    }

    fn count(a: &Array3<bool>) -> usize {
        a.iter().filter(|b| **b).count()
    }

    /// 3x3x3 腐蚀把 5^3 立方体缩成 3^3, 膨胀则扩成 7^3.
    #[test]
    fn test_erode_dilate_odd() {
        let a = cube((9, 9, 9), 2, 7);
        let e = erode(a.view(), 3);
        assert_eq!(e, cube((9, 9, 9), 3, 6));
        let d = dilate(a.view(), 3);
        assert_eq!(d, cube((9, 9, 9), 1, 8));
        assert_eq!(erode(a.view(), 1), a);
    }

    /// 数组外视为背景: 贴边的前景会被腐蚀.
    #[test]
    fn test_border_is_background() {
        let a = Array3::from_elem((4, 4, 4), true);
        let e = erode(a.view(), 3);
        assert_eq!(e, cube((4, 4, 4), 1, 3));
    }

    /// 偶数边长结构元: 腐蚀读取 `[i - 1, i]`, 膨胀读取 `[i, i + 1]`.
    #[test]
    fn test_even_kernel() {
        let mut a = Array3::from_elem((4, 4, 4), false);
        a[(1, 1, 1)] = true;
        let d = dilate(a.view(), 2);
        assert_eq!(count(&d), 8);
        assert!(d[(0, 0, 0)] && d[(1, 1, 1)] && !d[(2, 2, 2)]);
        // 闭运算保持单点不变, 开运算去掉单点
        assert_eq!(closing(a.view(), 2), a);
        assert_eq!(count(&opening(a.view(), 2)), 0);
    }

    /// 开运算去掉细小突起, 闭运算填上细小凹陷.
    #[test]
    fn test_opening_closing() {
        let mut a = cube((11, 11, 11), 2, 9);
        a[(5, 5, 9)] = true;
        let o = opening(a.view(), 3);
        assert!(!o[(5, 5, 9)]);
        assert_eq!(count(&o), 7 * 7 * 7);

        let mut b = cube((11, 11, 11), 2, 9);
        b[(5, 5, 5)] = false;
        assert_eq!(closing(b.view(), 3), cube((11, 11, 11), 2, 9));
    }

    /// 封闭空洞被填充, 与表面连通的凹陷保持不变.
    #[test]
    fn test_fill_holes() {
        let mut a = cube((7, 7, 7), 1, 6);
        a.slice_mut(s![2..5, 2..5, 2..5]).fill(false);
        let filled = fill_holes(a.view());
        assert_eq!(filled, cube((7, 7, 7), 1, 6));

        // 打通到表面的通道
        let mut b = a.clone();
        b.slice_mut(s![3, 3, 0..3]).fill(false);
        let filled = fill_holes(b.view());
        assert!(!filled[(3, 3, 3)]);
        assert_eq!(filled, b);
    }
}
