#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 3D 医学体数据 (CT/MR 密度体) 的窄带 (narrow band)
//! 水平集分割引擎及配套基础数据结构.
//!
//! 算法以两个稀疏边界点列表 `L_in` / `L_out` 表达当前演化前沿 (front),
//! 单次迭代的开销正比于前沿表面积而非整个体数据体积.
//!
//! # 注意
//!
//! 1. 该 crate 目前仅提供 `safe` 接口. 将来可能为部分高性能场景关键路径提供
//!   `unsafe` 接口.
//! 2. 源密度体数据在一次分割运行的生命周期内只读且形状固定,
//!   由引擎在构造时借用.
//! 3. 在非期望情况下 (如越界索引, 不变式被破坏), 程序会直接 panic,
//!   而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### 通用稠密 3D 体数据结构 ✅
//!
//! phi 符号场, 速度场和源密度体共用同一个 `Volume<T>` 抽象.
//!
//! 实现位于 `ct-levelset/src/data`.
//!
//! ### phi 初始化 (均匀填充 / 立方体种子 / 球形种子 / 区域掩码导入) ✅
//!
//! 所有初始化路径共用同一个谓词驱动的重建扫描,
//! 扫描结束后窄带不变式严格成立.
//!
//! 实现位于 `ct-levelset/src/evolve`.
//!
//! ### 速度场计算 (均值 / 均值+方差 / 区域掩码 / 自定义函数) ✅
//!
//! 四种策略统一为一个 "速度分类器" 枚举, 共用同一个切片序扫描.
//! `rayon` feature 开启时扫描在切片内按行并行.
//!
//! 实现位于 `ct-levelset/src/evolve/velocity.rs`.
//!
//! ### 演化引擎 (外向/内向演化, 冗余点移除, switch-in/switch-out) ✅
//!
//! ### 高斯核平滑 ✅
//!
//! 实现位于 `ct-levelset/src/data/kernel.rs` 与 `ct-levelset/src/evolve`.
//!
//! ### 手动/自动演化驱动, 停止判据与取消 ✅
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private API 提供文档.

/// 三维索引, 按 `(z, h, w)` 组织, 同时也可一定程度上用作非负整数向量.
///
/// `w` 方向在内存中变化最快 (行优先存储).
pub type Idx3d = (usize, usize, usize);

/// 3D 体数据基础数据结构.
mod data;

pub use data::{DensityVolume, GaussKernel, LabelVolume, PhiVolume, VfVolume, Volume};

pub mod consts;

pub use consts::VoxelClass;

pub mod evolve;

pub use evolve::{
    silent, EvolutionConfig, EvolveError, LevelSet3D, MaskRule, Progress, RegionMeans,
    VelocitySource,
};

pub mod prelude;
