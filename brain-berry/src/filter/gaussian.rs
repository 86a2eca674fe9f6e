//! 可分离高斯平滑.
//!
//! 卷积核在 `truncate * sigma` 处截断并归一化. 边界采用镜像延拓
//! (`d c b a | a b c d | d c b a`), 因此常数图像平滑后保持不变.

use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::{GridAttr, Result, VolumeGrid};

/// 生成一维高斯核. 核长度为 `2 * radius + 1`, 其中 `radius = round(truncate * sigma)`.
///
/// `sigma <= 0` 时返回 `[1.0]`.
pub fn gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (truncate * sigma + 0.5).floor() as isize;
    let two_var = 2.0 * sigma * sigma;
    let mut kernel = (-radius..=radius)
        .map(|x| (-((x * x) as f64) / two_var).exp())
        .collect::<Vec<_>>();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// 镜像延拓下的合法索引.
#[inline]
fn reflect(i: isize, n: isize) -> usize {
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m >= n { period - 1 - m } else { m }) as usize
}

/// 沿 `axis` 做一维卷积.
fn convolve_axis(input: ArrayView3<f32>, axis: usize, kernel: &[f64]) -> Array3<f32> {
    let mut out = Array3::zeros(input.dim());
    let n = input.len_of(Axis(axis)) as isize;
    let radius = (kernel.len() / 2) as isize;

    let op = |mut o: ndarray::ArrayViewMut1<f32>, i: ndarray::ArrayView1<f32>| {
        for p in 0..n {
            let acc: f64 = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * i[reflect(p + k as isize - radius, n)] as f64)
                .sum();
            o[p as usize] = acc as f32;
        }
    };

    let zip = Zip::from(out.lanes_mut(Axis(axis))).and(input.lanes(Axis(axis)));
    #[cfg(feature = "rayon")]
    zip.par_for_each(op);
    #[cfg(not(feature = "rayon"))]
    zip.for_each(op);
    out
}

/// 以体素为单位的各轴 `sigmas` 对数组进行高斯平滑. 某轴 sigma 为 0 时跳过该轴.
pub fn gaussian_smooth(data: ArrayView3<f32>, sigmas: [f64; 3], truncate: f64) -> Array3<f32> {
    let mut out = data.to_owned();
    for (axis, &sigma) in sigmas.iter().enumerate() {
        if sigma > 0.0 {
            out = convolve_axis(out.view(), axis, &gaussian_kernel(sigma, truncate));
        }
    }
    out
}

/// 以毫米为单位的 `sigma` 平滑体数据. 各轴 sigma 按体素间距换算.
pub fn smooth_physical(grid: &VolumeGrid, sigma_mm: f64, truncate: f64) -> Result<VolumeGrid> {
    if sigma_mm <= 0.0 {
        return Ok(grid.clone());
    }
    let sigmas = grid.pix_dim().map(|s| sigma_mm / s);
    grid.with_data(gaussian_smooth(grid.data(), sigmas, truncate))
}
