//! 速度场计算.
//!
//! 四种策略统一为 [`VelocitySource`] 枚举: 均值阈值, 均值+方差
//! (Chan-Vese 风格能量), 区域掩码复制, 以及用户自定义逐体素分类函数.
//! 任一策略运行结束后, 体数据范围内每个体素都有确定的速度场值;
//! 自定义函数有意保留的 `UNKNOWN_VF` 除外, 演化引擎在该类体素处
//! 保持前沿不动.

use std::fmt;

use log::debug;
use ndarray::{ArrayViewMut, Axis, Ix2, Zip};

use crate::consts::phi;
use crate::consts::vf::{BACKGROUND_VF, FOREGROUND_VF};
use crate::consts::VoxelClass;
use crate::data::LabelVolume;
use crate::evolve::{EvolveError, LevelSet3D, Progress};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 自定义逐体素速度分类函数.
///
/// 每个体素恰好被调用一次, 调用之间相互独立且不得修改共享状态,
/// 因此 `rayon` feature 开启时扫描可以并行执行.
pub type ClassifyFn<'a> = Box<dyn Fn(Idx3d) -> VoxelClass + Send + Sync + 'a>;

/// 速度场来源: 统一的逐体素 "速度分类器" 能力.
///
/// 三种内置策略与用户回调是该能力的四个变体,
/// 由 [`LevelSet3D::compute_velocity_field`] 解析执行.
pub enum VelocitySource<'a> {
    /// 均值阈值: 按到前景/背景运行均值的加权平方距离分类.
    ///
    /// 体素为前景当且仅当
    /// `background_weight * (v - mean_bg)^2 >= foreground_weight * (v - mean_fg)^2`.
    /// 运行均值在扫描前由当前 phi 符号重新计算.
    Mean {
        /// 前景权重, 非负. 增大该值会抑制区域生长.
        foreground_weight: f64,

        /// 背景权重, 非负. 增大该值会促进区域生长.
        background_weight: f64,
    },

    /// 均值+方差: 按前景/背景高斯分布的负对数似然分类.
    ///
    /// 体素为前景当且仅当其背景负对数似然不小于前景负对数似然.
    /// 运行均值在扫描前由当前 phi 符号重新计算, 方差由调用方给定.
    MeanVariance {
        /// 前景标准差, 必须为正.
        sigma_foreground: f64,

        /// 背景标准差, 必须为正.
        sigma_background: f64,
    },

    /// 区域掩码复制: 按 `rule` 将外部标签体数据直接翻译为前景/背景.
    RegionMask {
        /// 外部标签体数据, 形状必须与源密度体一致.
        mask: &'a LabelVolume,

        /// 目标区域选择规则.
        rule: MaskRule,
    },

    /// 用户自定义逐体素分类函数.
    Custom(ClassifyFn<'a>),
}

impl VelocitySource<'_> {
    /// 策略名称, 用于日志.
    pub fn kind(&self) -> &'static str {
        match self {
            VelocitySource::Mean { .. } => "mean",
            VelocitySource::MeanVariance { .. } => "mean-variance",
            VelocitySource::RegionMask { .. } => "region-mask",
            VelocitySource::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for VelocitySource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VelocitySource::Mean {
                foreground_weight,
                background_weight,
            } => f
                .debug_struct("Mean")
                .field("foreground_weight", foreground_weight)
                .field("background_weight", background_weight)
                .finish(),
            VelocitySource::MeanVariance {
                sigma_foreground,
                sigma_background,
            } => f
                .debug_struct("MeanVariance")
                .field("sigma_foreground", sigma_foreground)
                .field("sigma_background", sigma_background)
                .finish(),
            VelocitySource::RegionMask { rule, .. } => {
                f.debug_struct("RegionMask").field("rule", rule).finish()
            }
            VelocitySource::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// 标签体数据的目标区域选择规则.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MaskRule {
    /// 全部非零标签体素构成目标区域.
    NonZero {
        /// 为 `true` 时取补集 (零标签体素构成目标区域).
        inverted: bool,
    },

    /// 仅指定标签编号的体素构成目标区域.
    Label(u8),
}

impl MaskRule {
    /// 判断标签值 `voxel` 是否属于目标区域.
    #[inline]
    pub fn matches(&self, voxel: u8) -> bool {
        match *self {
            MaskRule::NonZero { inverted } => (voxel != 0) != inverted,
            MaskRule::Label(id) => voxel == id,
        }
    }
}

/// 当前分割区域内外的强度统计.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionMeans {
    /// 前景 (phi < 0 体素) 强度均值. 前景为空时为 0.
    pub foreground: f64,

    /// 背景 (phi >= 0 体素) 强度均值. 背景为空时为 0.
    pub background: f64,

    /// 前景体素个数.
    pub foreground_count: usize,

    /// 背景体素个数.
    pub background_count: usize,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

        /// 以行为单位并行填充单个水平切片.
        fn fill_slice<F: Fn(Idx3d) -> u8 + Sync>(
            z: usize,
            mut slice: ArrayViewMut<'_, u8, Ix2>,
            classify: &F,
        ) {
            slice
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(h, mut row)| {
                    for (w, cell) in row.iter_mut().enumerate() {
                        *cell = classify((z, h, w));
                    }
                });
        }
    } else {
        /// 逐行填充单个水平切片.
        fn fill_slice<F: Fn(Idx3d) -> u8 + Sync>(
            z: usize,
            mut slice: ArrayViewMut<'_, u8, Ix2>,
            classify: &F,
        ) {
            for (h, mut row) in slice.axis_iter_mut(Axis(0)).enumerate() {
                for (w, cell) in row.iter_mut().enumerate() {
                    *cell = classify((z, h, w));
                }
            }
        }
    }
}

/// 速度场计算实现块.
impl LevelSet3D<'_> {
    /// 按当前 phi 符号重新计算前景/背景强度均值.
    ///
    /// phi 为负的体素计入前景, 其余计入背景. 结果缓存在引擎内,
    /// 可由 [`Self::region_means`] 读取.
    pub fn compute_region_means(&mut self) -> RegionMeans {
        let mut sum_foreground = 0.0f64;
        let mut sum_background = 0.0f64;
        let mut foreground_count = 0usize;
        let mut background_count = 0usize;

        Zip::from(self.phi.data())
            .and(self.volume.data())
            .for_each(|&p, &v| {
                if phi::is_inside(p) {
                    foreground_count += 1;
                    sum_foreground += f64::from(v);
                } else {
                    background_count += 1;
                    sum_background += f64::from(v);
                }
            });

        let mean_of = |sum: f64, count: usize| if count == 0 { 0.0 } else { sum / count as f64 };
        self.means = RegionMeans {
            foreground: mean_of(sum_foreground, foreground_count),
            background: mean_of(sum_background, background_count),
            foreground_count,
            background_count,
        };
        self.means
    }

    /// 按 `source` 策略重新计算整个速度场.
    ///
    /// 扫描按切片序进行, 每个水平切片开始前上报一次进度;
    /// 回调请求取消时返回 `Ok(false)`, 此时速度场可能只被部分改写,
    /// 重新调用本方法即可完整重算. 正常完成时返回 `Ok(true)`.
    ///
    /// # 错误
    ///
    /// `RegionMask` 策略下掩码形状与源密度体不一致时返回
    /// [`EvolveError::ShapeMismatch`], 速度场不被修改.
    ///
    /// # Panic
    ///
    /// `Mean` 权重为负或 `MeanVariance` 标准差非正时程序 panic.
    pub fn compute_velocity_field<P: Progress>(
        &mut self,
        source: &VelocitySource<'_>,
        progress: &mut P,
    ) -> Result<bool, EvolveError> {
        match source {
            VelocitySource::RegionMask { mask, .. } => {
                if mask.shape() != self.volume.shape() {
                    return Err(EvolveError::ShapeMismatch {
                        expected: self.volume.shape(),
                        found: mask.shape(),
                    });
                }
            }
            VelocitySource::Mean {
                foreground_weight,
                background_weight,
            } => {
                assert!(*foreground_weight >= 0.0 && *background_weight >= 0.0);
                self.compute_region_means();
            }
            VelocitySource::MeanVariance {
                sigma_foreground,
                sigma_background,
            } => {
                assert!(*sigma_foreground > 0.0 && *sigma_background > 0.0);
                self.compute_region_means();
            }
            VelocitySource::Custom(_) => {}
        }

        let means = self.means;
        let volume = self.volume;
        let classify = move |pos: Idx3d| -> u8 {
            match source {
                VelocitySource::Mean {
                    foreground_weight,
                    background_weight,
                } => {
                    let v = f64::from(volume[pos]);
                    let df = v - means.foreground;
                    let db = v - means.background;
                    if *background_weight * db * db >= *foreground_weight * df * df {
                        FOREGROUND_VF
                    } else {
                        BACKGROUND_VF
                    }
                }
                VelocitySource::MeanVariance {
                    sigma_foreground,
                    sigma_background,
                } => {
                    let v = f64::from(volume[pos]);
                    let sf2 = sigma_foreground * sigma_foreground;
                    let sb2 = sigma_background * sigma_background;
                    let nll_foreground = (v - means.foreground).powi(2) / sf2 + sf2.ln();
                    let nll_background = (v - means.background).powi(2) / sb2 + sb2.ln();
                    if nll_background >= nll_foreground {
                        FOREGROUND_VF
                    } else {
                        BACKGROUND_VF
                    }
                }
                VelocitySource::RegionMask { mask, rule } => {
                    if rule.matches(mask[pos]) {
                        FOREGROUND_VF
                    } else {
                        BACKGROUND_VF
                    }
                }
                VelocitySource::Custom(f) => f(pos).to_code(),
            }
        };

        let len_z = self.vf.len_z();
        for z in 0..len_z {
            if !progress.report(z, len_z) {
                debug!("velocity field computation cancelled at slice {z}");
                return Ok(false);
            }
            fill_slice(z, self.vf.slice_at_mut(z), &classify);
        }
        debug!(
            "velocity field computed: strategy = {}, means = {:?}",
            source.kind(),
            self.means
        );
        Ok(true)
    }
}
