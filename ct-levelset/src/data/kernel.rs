//! 3D 高斯平滑核.

use std::f64::consts::TAU;

use itertools::iproduct;
use ndarray::Array3;
use once_cell::sync::Lazy;

/// 进程级共享的默认核 (边长 5, sigma 1.0).
static DEFAULT_KERNEL: Lazy<GaussKernel> = Lazy::new(|| GaussKernel::new(5, 1.0));

/// 预计算的 3D 高斯核, 用于 phi 界面的周期性平滑.
///
/// 核函数为
///
/// ```text
///                       1                    x^2 + y^2 + z^2
/// G_sigma(x,y,z) = ----------------- * exp(- ---------------)
///                  (2pi)^1.5 sigma^3           2 sigma^2
/// ```
///
/// 该结构在构造后只读. 若要修改核参数, 你应该创建新的实例.
#[derive(Clone, Debug)]
pub struct GaussKernel {
    size: usize,
    half: usize,
    data: Array3<f64>,
}

impl GaussKernel {
    /// 构建边长为 `size`, 标准差为 `sigma` 的 3D 高斯核.
    ///
    /// `size` 必须是不小于 3 的奇数, `sigma` 必须为正, 否则程序 panic.
    pub fn new(size: usize, sigma: f64) -> Self {
        assert!(size >= 3 && size % 2 == 1);
        assert!(sigma > 0.0 && sigma.is_finite());

        let half = size / 2;
        let norm = 1.0 / (TAU.powf(1.5) * sigma.powi(3));
        let exp_scale = -0.5 / (sigma * sigma);

        let mut data = Array3::zeros((size, size, size));
        for (z, h, w) in iproduct!(0..size, 0..size, 0..size) {
            let dz = z as f64 - half as f64;
            let dh = h as f64 - half as f64;
            let dw = w as f64 - half as f64;
            data[(z, h, w)] = norm * (exp_scale * (dz * dz + dh * dh + dw * dw)).exp();
        }

        Self { size, half, data }
    }

    /// 获取进程级共享的默认核.
    #[inline]
    pub fn shared() -> &'static GaussKernel {
        &DEFAULT_KERNEL
    }

    /// 核边长.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// 核边长的一半 (向下取整), 即核中心到边缘的偏移.
    #[inline]
    pub fn half(&self) -> usize {
        self.half
    }

    /// 获取核内 `offset` 处的权重. `offset` 分量取值范围为 `0..size`.
    ///
    /// 越界时程序 panic.
    #[inline]
    pub fn value_at(&self, offset: (usize, usize, usize)) -> f64 {
        self.data[offset]
    }
}

impl Default for GaussKernel {
    #[inline]
    fn default() -> Self {
        DEFAULT_KERNEL.clone()
    }
}
