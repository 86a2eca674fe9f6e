use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use super::volume::{geometry_from_header, reorder_nifti_array};
use super::{Geometry, GridAttr};
use crate::consts::gray::*;
use crate::error::{Error, Result};
use crate::{Idx3d, Vec3};

/// 与源图像共享几何信息的三维二值掩码.
///
/// 由分割产生, 被变化分析消费. 创建后不再修改, 重新分割时整体替换.
#[derive(Debug, Clone)]
pub struct Mask {
    data: Array3<bool>,
    geometry: Geometry,
}

impl GridAttr for Mask {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for Mask {
    type Output = bool;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Mask {
    /// 由二值数组和几何信息创建掩码. 数组为空时返回 `Err`.
    pub fn new(data: Array3<bool>, geometry: Geometry) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyVolume(data.dim()));
        }
        Ok(Self { data, geometry })
    }

    /// 库内部使用: 调用者保证 `data` 非空且与 `geometry` 对应的网格一致.
    #[inline]
    pub(crate) fn from_parts(data: Array3<bool>, geometry: Geometry) -> Self {
        debug_assert!(!data.is_empty());
        Self { data, geometry }
    }

    /// 在 `grid` 的网格上创建全零掩码.
    pub fn empty_like<G: GridAttr + ?Sized>(grid: &G) -> Self {
        Self {
            data: Array3::from_elem(grid.shape(), false),
            geometry: grid.geometry().clone(),
        }
    }

    /// 在 `grid` 的网格上, 用 `data` 创建掩码. 形状不一致时返回 `Err`.
    pub fn on_grid_of<G: GridAttr + ?Sized>(grid: &G, data: Array3<bool>) -> Result<Self> {
        Error::check_shape(grid.shape(), data.dim())?;
        Ok(Self {
            data,
            geometry: grid.geometry().clone(),
        })
    }

    /// 由标签数组创建掩码. 任何非零标签都视为前景.
    pub fn from_labels(labels: ArrayView3<u8>, geometry: Geometry) -> Result<Self> {
        Self::new(labels.mapv(is_foreground), geometry)
    }

    /// 打开 nii 文件格式的三维标注. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let geometry = geometry_from_header(obj.header())?;
        let labels = reorder_nifti_array(obj.into_volume().into_ndarray::<u8>()?)?;
        Self::from_labels(labels.view(), geometry)
    }

    /// 转换成 `MASK_BACKGROUND` / `MASK_FOREGROUND` 标签数组.
    pub fn to_labels(&self) -> Array3<u8> {
        self.data
            .mapv(|b| if b { MASK_FOREGROUND } else { MASK_BACKGROUND })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, bool> {
        self.data.view()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<bool> {
        self.data
    }

    /// 前景体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|b| **b).count()
    }

    /// 是否没有任何前景体素.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|b| *b)
    }

    /// 收集所有前景体素对应的下标. 结果按行优先存储.
    pub fn positions(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, b)| b.then_some(pos))
            .collect()
    }

    /// 前景的实际体积, 以立方毫米为单位.
    #[inline]
    pub fn volume_mm3(&self) -> f64 {
        self.count() as f64 * self.voxel()
    }

    /// 前景体素的质心 (连续索引). 掩码为空时返回 `None`.
    pub fn centroid(&self) -> Option<Vec3> {
        let mut n = 0usize;
        let mut acc = [0.0; 3];
        for (z, h, w) in self.positions() {
            n += 1;
            acc[0] += z as f64;
            acc[1] += h as f64;
            acc[2] += w as f64;
        }
        (n > 0).then(|| acc.map(|a| a / n as f64))
    }
}
