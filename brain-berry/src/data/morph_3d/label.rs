//! 三维连通域标记.

use std::collections::VecDeque;

use itertools::iproduct;
use ndarray::{Array3, ArrayView3};

use super::check;
use crate::{Idx3d, Vec3};

/// 邻接规则.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Connectivity {
    /// 共面邻接, 6-连通.
    Face,

    /// 共面, 共棱或共点邻接, 26-连通.
    Full,
}

impl Connectivity {
    /// 获取 `pos` 的全部邻居. 越界坐标被过滤.
    fn neighbours(self, (z, h, w): Idx3d, dim: Idx3d) -> impl Iterator<Item = Idx3d> {
        iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
            .filter(move |&(a, b, c)| {
                let manhattan = a.abs() + b.abs() + c.abs();
                match self {
                    Connectivity::Face => manhattan == 1,
                    Connectivity::Full => manhattan != 0,
                }
            })
            .map(move |(a, b, c)| {
                (
                    z.wrapping_add_signed(a),
                    h.wrapping_add_signed(b),
                    w.wrapping_add_signed(c),
                )
            })
            .filter(move |p| check(p, dim))
    }
}

/// 一个连通域. 体素按 BFS 发现顺序存储.
#[derive(Clone, Debug)]
pub struct Component {
    voxels: Vec<Idx3d>,
}

impl Component {
    /// 体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    /// 是否为空. 由 [`connected_components`] 产生的连通域永不为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// 全部体素.
    #[inline]
    pub fn voxels(&self) -> &[Idx3d] {
        &self.voxels
    }

    /// 包围盒的最小与最大索引 (均为闭区间端点).
    pub fn bounding_box(&self) -> (Idx3d, Idx3d) {
        bounding_box(&self.voxels)
    }

    /// 包围盒在三个方向上的体素跨度 (`max - min + 1`).
    pub fn extents(&self) -> [usize; 3] {
        let ((z0, h0, w0), (z1, h1, w1)) = self.bounding_box();
        [z1 - z0 + 1, h1 - h0 + 1, w1 - w0 + 1]
    }

    /// 质心 (连续索引).
    pub fn centroid(&self) -> Vec3 {
        centroid(&self.voxels)
    }
}

/// 索引集合的包围盒. `voxels` 为空时 panic.
pub(crate) fn bounding_box(voxels: &[Idx3d]) -> (Idx3d, Idx3d) {
    assert!(!voxels.is_empty());
    let first = voxels[0];
    voxels.iter().fold((first, first), |(lo, hi), &(z, h, w)| {
        (
            (lo.0.min(z), lo.1.min(h), lo.2.min(w)),
            (hi.0.max(z), hi.1.max(h), hi.2.max(w)),
        )
    })
}

/// 索引集合的质心. `voxels` 为空时 panic.
pub(crate) fn centroid(voxels: &[Idx3d]) -> Vec3 {
    assert!(!voxels.is_empty());
    let n = voxels.len() as f64;
    let sum = voxels.iter().fold([0.0; 3], |acc, &(z, h, w)| {
        [acc[0] + z as f64, acc[1] + h as f64, acc[2] + w as f64]
    });
    sum.map(|s| s / n)
}

/// 标记 `mask` 中的所有连通域.
///
/// # 返回值
///
/// 按行优先扫描时首个体素出现的顺序排列的连通域. 若不存在前景, 则返回空 `Vec`.
pub fn connected_components(mask: ArrayView3<bool>, connectivity: Connectivity) -> Vec<Component> {
    let dim = mask.dim();
    let mut visited = Array3::from_elem(dim, false);
    let mut queue = VecDeque::new();
    let mut ans = vec![];

    for (seed, &fg) in mask.indexed_iter() {
        if !fg || visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.push_back(seed);
        let mut voxels = vec![];
        while let Some(pos) = queue.pop_front() {
            voxels.push(pos);
            for next in connectivity.neighbours(pos, dim) {
                if mask[next] && !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        ans.push(Component { voxels });
    }
    ans
}

/// 只保留 `mask` 中体素最多的连通域. 若存在多个并列最大者, 保留最先出现的那个.
/// 若不存在前景, 返回全零数组.
pub fn largest_component(mask: ArrayView3<bool>, connectivity: Connectivity) -> Array3<bool> {
    let components = connected_components(mask, connectivity);
    let largest = components
        .iter()
        .fold(None::<&Component>, |best, c| match best {
            Some(b) if b.len() >= c.len() => Some(b),
            _ => Some(c),
        });
    paint(largest, mask.dim())
}

/// 把若干连通域绘制到形状为 `dim` 的全零数组上.
pub fn paint<'a, I: IntoIterator<Item = &'a Component>>(components: I, dim: Idx3d) -> Array3<bool> {
    let mut ans = Array3::from_elem(dim, false);
    for c in components {
        for &pos in c.voxels() {
            ans[pos] = true;
        }
    }
    ans
}
