//! 体数据滤波与强度统计.

mod gaussian;
mod shrink;
pub mod stats;

pub use gaussian::{gaussian_kernel, gaussian_smooth, smooth_physical};
pub use shrink::shrink;
