//! 通用常量.
//!
//! 分割与配准中的阈值, 核大小等均为经过校准的策略常量, 不是从数据中学到的参数.
//! 它们在这里集中命名, 并作为各配置结构的默认值.

/// 单通道标签值.
pub mod gray {
    /// 掩码中背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩码中前景 (肿瘤) 的体素值.
    pub const MASK_FOREGROUND: u8 = 1;

    /// 体素是否是前景? nii 标签文件中任何非零值都视为前景.
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        p != MASK_BACKGROUND
    }
}

/// 刚性配准默认参数.
pub mod registration {
    /// 互信息联合直方图的 bin 数.
    pub const HISTOGRAM_BINS: usize = 50;

    /// 度量采样比例.
    pub const SAMPLING_FRACTION: f64 = 0.15;

    /// 随机采样种子.
    pub const SAMPLING_SEED: u64 = 0x5eed_b0a7;

    /// 初始学习率 (即初始步长).
    pub const LEARNING_RATE: f64 = 1.0;

    /// 最小步长. 步长低于该值时停止.
    pub const MIN_STEP_LENGTH: f64 = 0.001;

    /// 梯度方向反转时步长的缩放因子.
    pub const RELAXATION_FACTOR: f64 = 0.5;

    /// 缩放后梯度模长低于该值时停止.
    pub const GRADIENT_TOLERANCE: f64 = 1e-4;

    /// 每层最大迭代次数.
    pub const ITERATIONS_PER_LEVEL: usize = 100;

    /// 金字塔各层的缩小倍数, 由粗到细.
    pub const SHRINK_FACTORS: [usize; 3] = [4, 2, 1];

    /// 金字塔各层的高斯平滑 sigma, 以毫米为单位.
    pub const SMOOTHING_SIGMAS: [f64; 3] = [2.0, 1.0, 0.0];

    /// 金字塔平滑核的截断位置, 以 sigma 的倍数计.
    pub const SMOOTHING_TRUNCATE: f64 = 4.0;

    /// 旋转参数的尺度.
    pub const ROTATION_SCALE: f64 = 1.0;

    /// 平移参数的尺度.
    pub const TRANSLATION_SCALE: f64 = 1.0 / 1000.0;

    /// 有效采样点 (落在浮动图像内部的采样点) 的最少个数.
    pub const MIN_VALID_SAMPLES: usize = 16;
}

/// 肿瘤分割默认参数.
pub mod segmentation {
    /// 预平滑高斯核 sigma, 以体素为单位.
    pub const GAUSSIAN_SIGMA: f64 = 1.5;

    /// 高斯核截断位置, 以 sigma 的倍数计.
    pub const GAUSSIAN_TRUNCATE: f64 = 4.0;

    /// 前景阈值: 正强度的第 5 百分位.
    pub const FOREGROUND_PERCENTILE: f64 = 5.0;

    /// 颅骨阈值: 前景强度的第 99 百分位.
    pub const SKULL_PERCENTILE: f64 = 99.0;

    /// 候选脑组织强度带下界百分位.
    pub const BRAIN_BAND_LOW: f64 = 15.0;

    /// 候选脑组织强度带上界百分位.
    pub const BRAIN_BAND_HIGH: f64 = 85.0;

    /// 清理候选脑组织的开运算核边长.
    pub const OPENING_KERNEL: usize = 3;

    /// 清理候选脑组织的闭运算核边长.
    pub const CLOSING_KERNEL: usize = 7;

    /// 深度腐蚀的核边长, 按回退顺序排列.
    pub const EROSION_KERNELS: [usize; 3] = [9, 5, 3];

    /// 腐蚀后至少保留的脑组织比例, 否则回退到下一档核.
    pub const EROSION_MIN_KEEP: f64 = 0.1;

    /// 离群阈值中标准差的倍数.
    pub const OUTLIER_SIGMAS: f64 = 3.0;

    /// 离群阈值中的百分位.
    pub const OUTLIER_PERCENTILE: f64 = 99.5;

    /// 肿瘤连通域最小体素数.
    pub const MIN_TUMOR_VOXELS: usize = 20;

    /// 肿瘤连通域最大体素数.
    pub const MAX_TUMOR_VOXELS: usize = 2000;

    /// 包围盒最短边与最长边之比的下限.
    pub const MIN_ASPECT_RATIO: f64 = 0.4;

    /// 体素数与包围盒体积之比的下限.
    pub const MIN_COMPACTNESS: f64 = 0.1;

    /// 连通域质心到脑质心的距离, 与脑半径之比的上限.
    pub const MAX_CENTER_DISTANCE: f64 = 0.7;

    /// 脑半径估计 = 三个方向跨度的均值 / 该值.
    pub const BRAIN_RADIUS_DIVISOR: f64 = 3.0;

    /// 最终平滑 (先闭后开) 的核边长.
    pub const FINAL_SMOOTHING_KERNEL: usize = 2;

    /// 分割精化中闭运算的核边长.
    pub const REFINE_CLOSING_KERNEL: usize = 3;

    /// 区域生长强度区间 = 种子均值 ± 该倍数的种子标准差.
    pub const REGION_GROW_SIGMAS: f64 = 2.0;

    /// 没有合法种子时区域生长使用的强度区间.
    pub const REGION_GROW_FALLBACK: (f64, f64) = (100.0, 1000.0);
}

/// 定性解读的分档阈值.
pub mod interpretation {
    /// 体积变化绝对值低于该百分比视为稳定.
    pub const STABLE_PERCENT: f64 = 5.0;

    /// 体积变化超过该百分比视为中度变化.
    pub const MODERATE_PERCENT: f64 = 10.0;

    /// 体积变化超过该百分比视为显著变化.
    pub const SIGNIFICANT_PERCENT: f64 = 50.0;

    /// Dice 低于该值视为低重叠.
    pub const LOW_OVERLAP_DICE: f64 = 0.1;

    /// Dice 高于该值视为高重叠.
    pub const HIGH_OVERLAP_DICE: f64 = 0.7;
}
