use std::ops::Index;
use std::path::Path;

use itertools::{Itertools, MinMaxResult};
use ndarray::{Array3, ArrayD, ArrayView3, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::{Geometry, GridAttr};
use crate::error::{Error, Result};
use crate::linalg::IDENTITY;
use crate::{Idx3d, Vec3};

/// 三维标量体数据及其几何信息. 强度以 `f32` 保存.
///
/// 一经创建即不可变. 平滑, 重采样, 配准等操作都会产生新的 `VolumeGrid`.
#[derive(Debug, Clone)]
pub struct VolumeGrid {
    data: Array3<f32>,
    geometry: Geometry,
}

impl GridAttr for VolumeGrid {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for VolumeGrid {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

/// 从 nii header 中读取几何信息. `pixdim` 与偏移量均从 `[W, H, z]` 转换成 `(z, H, W)`.
///
/// 方向矩阵取单位阵: 本库的配准与分割只依赖网格内部的一致性.
pub(crate) fn geometry_from_header(h: &NiftiHeader) -> Result<Geometry> {
    let [_, pw, ph, pz, ..] = h.pixdim;
    let (ox, oy, oz) = if h.sform_code > 0 {
        (h.srow_x[3], h.srow_y[3], h.srow_z[3])
    } else {
        (h.quatern_x, h.quatern_y, h.quatern_z)
    };
    Geometry::new(
        [pz as f64, ph as f64, pw as f64],
        [oz as f64, oy as f64, ox as f64],
        IDENTITY,
    )
}

/// 把 nifti 数组从 `[W, H, z]` 转换成 `(z, H, W)`.
pub(crate) fn reorder_nifti_array<T: Clone>(data: ArrayD<T>) -> Result<Array3<T>> {
    if data.ndim() != 3 {
        return Err(Error::NotThreeDimensional(data.ndim()));
    }
    // hint: 原第一维向下增长, 原第二维向右增长.
    let data = data.permuted_axes([2, 1, 0].as_slice());

    // The nature of nifti data field layout.
    debug_assert!(data.is_standard_layout());

    data.into_dimensionality::<Ix3>()
        .map(|a| a.as_standard_layout().into_owned())
        .map_err(|_| Error::NotThreeDimensional(3))
}

impl VolumeGrid {
    /// 由数据和几何信息创建体数据. 数据为空时返回 `Err`.
    pub fn new(data: Array3<f32>, geometry: Geometry) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyVolume(data.dim()));
        }
        Ok(Self { data, geometry })
    }

    /// 由数据和体素间距创建体数据. 原点为零, 方向为单位阵.
    #[inline]
    pub fn with_spacing(data: Array3<f32>, spacing: Vec3) -> Result<Self> {
        Self::new(data, Geometry::with_spacing(spacing)?)
    }

    /// 打开 nii 文件格式的三维扫描. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let geometry = geometry_from_header(obj.header())?;
        let data = reorder_nifti_array(obj.into_volume().into_ndarray::<f32>()?)?;
        Self::new(data, geometry)
    }

    /// 在相同几何信息上创建新的体数据. 形状不同时返回 `Err`.
    pub fn with_data(&self, data: Array3<f32>) -> Result<Self> {
        Error::check_shape(self.shape(), data.dim())?;
        Ok(Self {
            data,
            geometry: self.geometry.clone(),
        })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    /// 强度的最小值与最大值.
    pub fn intensity_range(&self) -> (f32, f32) {
        match self.data.iter().copied().minmax_by(f32::total_cmp) {
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
            MinMaxResult::OneElement(v) => (v, v),
            // 构造时保证非空
            MinMaxResult::NoElements => unreachable!(),
        }
    }

    /// 以强度为质量的质心, 即一阶矩中心 (物理坐标).
    ///
    /// 总质量不为正时返回 `None`.
    pub fn moments_center(&self) -> Option<Vec3> {
        let mut mass = 0.0f64;
        let mut acc = [0.0f64; 3];
        for ((z, h, w), &v) in self.data.indexed_iter() {
            let v = v as f64;
            mass += v;
            acc[0] += v * z as f64;
            acc[1] += v * h as f64;
            acc[2] += v * w as f64;
        }
        (mass > 0.0 && mass.is_finite())
            .then(|| self.geometry.index_to_physical(&acc.map(|a| a / mass)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 空数据非法.
    #[test]
    fn test_empty_volume() {
        let e = VolumeGrid::with_spacing(Array3::zeros((0, 3, 3)), [1.0; 3]).unwrap_err();
        assert!(matches!(e, Error::EmptyVolume((0, 3, 3))));
    }

    /// 几何中心与体素体积.
    #[test]
    fn test_attr() {
        let v = VolumeGrid::with_spacing(Array3::zeros((4, 6, 8)), [2.0, 1.0, 0.5]).unwrap();
        assert_eq!(v.size(), 4 * 6 * 8);
        assert_eq!(v.voxel(), 1.0);
        assert_eq!(v.min_pix_dim(), 0.5);
        assert!(!v.is_isotropic());
        assert_eq!(v.geometric_center(), [4.0, 3.0, 2.0]);
        assert!(v.check(&(3, 5, 7)));
        assert!(!v.check(&(4, 0, 0)));
    }

    /// 单个亮点的矩中心就是该点.
    #[test]
    fn test_moments_center() {
        let mut data = Array3::zeros((5, 5, 5));
        data[(1, 2, 3)] = 10.0;
        let v = VolumeGrid::with_spacing(data, [1.0, 2.0, 3.0]).unwrap();
        assert_eq!(v.moments_center(), Some([1.0, 4.0, 9.0]));

        let v = VolumeGrid::with_spacing(Array3::zeros((2, 2, 2)), [1.0; 3]).unwrap();
        assert_eq!(v.moments_center(), None);
    }

    /// header 中的间距与偏移量按 `(z, H, W)` 读出; 有 sform 时优先使用 sform.
    #[test]
    fn test_geometry_from_header() {
        let mut h = NiftiHeader {
            pixdim: [1.0, 0.5, 0.75, 2.0, 0.0, 0.0, 0.0, 0.0],
            quatern_x: 10.0,
            quatern_y: 20.0,
            quatern_z: 30.0,
            sform_code: 0,
            ..Default::default()
        };
        let g = geometry_from_header(&h).unwrap();
        assert_eq!(g.spacing(), [2.0, 0.75, 0.5]);
        assert_eq!(g.origin(), [30.0, 20.0, 10.0]);

        h.sform_code = 1;
        h.srow_x = [0.5, 0.0, 0.0, -1.0];
        h.srow_y = [0.0, 0.75, 0.0, -2.0];
        h.srow_z = [0.0, 0.0, 2.0, -3.0];
        let g = geometry_from_header(&h).unwrap();
        assert_eq!(g.origin(), [-3.0, -2.0, -1.0]);
    }

    #[test]
    fn test_with_data() {
        let v = VolumeGrid::with_spacing(Array3::zeros((2, 2, 2)), [1.0; 3]).unwrap();
        assert!(v.with_data(Array3::ones((2, 2, 2))).is_ok());
        assert!(v.with_data(Array3::ones((2, 2, 3))).is_err());
        assert_eq!(
            v.with_data(Array3::from_elem((2, 2, 2), 3.0))
                .unwrap()
                .intensity_range(),
            (3.0, 3.0)
        );
    }
}
