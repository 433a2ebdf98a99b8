//! 窄带水平集演化引擎.
//!
//! 引擎以两个稀疏边界点列表表达当前前沿: `L_in` 持有全部内边界体素
//! (phi 值 `INNER_BOUNDARY_PHI`), `L_out` 持有全部外边界体素
//! (phi 值 `OUTER_BOUNDARY_PHI`). 单次迭代只遍历这两个列表,
//! 通过 switch-in / switch-out 操作将前沿整体推进一层,
//! 不触碰区域内外的大块体素.
//!
//! # 不变式
//!
//! 1. 体素 phi 值为 `INNER_BOUNDARY_PHI` 当且仅当它是 `L_in` 成员,
//!   `OUTER_BOUNDARY_PHI` 当且仅当它是 `L_out` 成员;
//! 2. 任何体素至多属于一个列表, 列表内无重复坐标;
//! 3. 区域内部体素收敛到 `INNER_PHI`, 外部体素收敛到 `OUTER_PHI`.
//!
//! 每个公开操作在进入和退出时均保持上述不变式. 不变式被破坏属于程序
//! bug, debug 构建下驱动函数会直接 assert 失败, 不会静默继续.

use std::collections::HashSet;

use itertools::iproduct;
use log::debug;

use crate::consts::phi::*;
use crate::consts::vf::{BACKGROUND_VF, FOREGROUND_VF, UNKNOWN_VF};
use crate::data::{DensityVolume, GaussKernel, LabelVolume, PhiVolume, VfVolume};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod boundary;
mod error;
mod progress;
mod velocity;

pub use error::EvolveError;
pub use progress::{silent, Progress};
pub use velocity::{MaskRule, RegionMeans, VelocitySource};

use boundary::{BoundaryList, TOMBSTONE};

/// 3D 体素的 6-邻域大小.
const NEIGHBOR_MAX_3D: usize = 6;

/// 停止判据的稳定比例常数: 仍可移动的边界点占比低于该值时认为该侧前沿稳定.
const STABLE_FRACTION: f64 = 0.001;

/// 演化参数. 由调用方在运行前设置, 引擎实例独占持有.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EvolutionConfig {
    /// 是否执行外向演化 (区域生长). 与内向演化同时开启时, 单次迭代内
    /// 外向总是先执行.
    pub outward: bool,

    /// 是否执行内向演化 (区域收缩).
    pub inward: bool,

    /// 是否启用周期性高斯平滑.
    pub smoothing_enabled: bool,

    /// 每多少次迭代执行一次平滑. 仅在 `smoothing_enabled` 时有意义.
    pub smoothing_steps: usize,

    /// 自动演化中每多少次迭代检查一次停止判据. 为 0 时自动演化立即返回.
    pub stop_iterations: usize,
}

impl Default for EvolutionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            outward: true,
            inward: true,
            smoothing_enabled: false,
            smoothing_steps: 4,
            stop_iterations: 1,
        }
    }
}

/// 窄带水平集分割引擎.
///
/// 引擎在构造时借用源密度体, 并分配与之同形状的 phi 符号场和速度场.
/// phi 场与两个边界列表只能经由引擎自身的操作修改.
///
/// 典型用法: 初始化种子 (立方体/球体/区域掩码), 计算速度场,
/// 然后运行手动或自动演化驱动, 最后读取 phi 场或前景掩码.
#[derive(Clone, Debug)]
pub struct LevelSet3D<'a> {
    /// 源密度体. 在一次分割运行的生命周期内只读.
    volume: &'a DensityVolume,

    /// phi 符号场, 与源密度体同形状.
    phi: PhiVolume,

    /// 速度场, 与源密度体同形状.
    vf: VfVolume,

    /// 内边界列表 L_in.
    l_in: BoundaryList,

    /// 外边界列表 L_out.
    l_out: BoundaryList,

    /// 平滑核.
    kernel: GaussKernel,

    /// 最近一次计算的区域强度统计.
    means: RegionMeans,

    config: EvolutionConfig,
}

/// 构造与访问实现块.
impl<'a> LevelSet3D<'a> {
    /// 为 `volume` 创建分割引擎. phi 场初始化为全 `OUTER_PHI`,
    /// 速度场初始化为全 `UNKNOWN_VF`, 平滑核为进程级默认核.
    pub fn new(volume: &'a DensityVolume) -> Self {
        let shape = volume.shape();
        Self {
            volume,
            phi: PhiVolume::from_elem(shape, OUTER_PHI),
            vf: VfVolume::from_elem(shape, UNKNOWN_VF),
            l_in: BoundaryList::default(),
            l_out: BoundaryList::default(),
            kernel: GaussKernel::shared().clone(),
            means: RegionMeans::default(),
            config: EvolutionConfig::default(),
        }
    }

    /// 获取源密度体.
    #[inline]
    pub fn volume(&self) -> &DensityVolume {
        self.volume
    }

    /// 获取 phi 符号场.
    #[inline]
    pub fn phi(&self) -> &PhiVolume {
        &self.phi
    }

    /// 获取速度场.
    #[inline]
    pub fn velocity_field(&self) -> &VfVolume {
        &self.vf
    }

    /// 获取内边界列表 L_in 的全部坐标.
    #[inline]
    pub fn l_in(&self) -> &[Idx3d] {
        self.l_in.as_slice()
    }

    /// 获取外边界列表 L_out 的全部坐标.
    #[inline]
    pub fn l_out(&self) -> &[Idx3d] {
        self.l_out.as_slice()
    }

    /// 获取外边界点个数.
    #[inline]
    pub fn boundary_points_count(&self) -> usize {
        self.l_out.len()
    }

    /// 获取演化参数.
    #[inline]
    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// 获取演化参数的可变引用.
    #[inline]
    pub fn config_mut(&mut self) -> &mut EvolutionConfig {
        &mut self.config
    }

    /// 获取平滑核.
    #[inline]
    pub fn kernel(&self) -> &GaussKernel {
        &self.kernel
    }

    /// 替换平滑核.
    #[inline]
    pub fn set_kernel(&mut self, kernel: GaussKernel) {
        self.kernel = kernel;
    }

    /// 获取最近一次计算的区域强度统计.
    #[inline]
    pub fn region_means(&self) -> RegionMeans {
        self.means
    }
}

/// 初始化实现块.
impl LevelSet3D<'_> {
    /// 将 phi 场均匀填充为 `value`, 并清空两个边界列表.
    ///
    /// `value` 必须是合法 phi 值, 否则程序 panic.
    pub fn initialize_phi(&mut self, value: i8) {
        assert!(is_legal(value));
        self.phi.fill(value);
        self.l_in.clear();
        self.l_out.clear();
    }

    /// 以轴对齐立方体为种子初始化 phi 场和边界列表.
    ///
    /// `corner` 为立方体的最小角点, `size` 为 h/w 方向边长, `height`
    /// 为 z 方向边长. 越出体数据范围的部分会被裁剪 (而不是报错).
    /// 裁剪后任一边长小于 3 时种子退化, 两个列表为空, 引擎成为 no-op.
    pub fn initialize_cube(&mut self, corner: Idx3d, size: usize, height: usize) {
        let (zs, hs, ws) = self.phi.shape();
        let (cz, ch, cw) = corner;

        // 裁剪到体数据范围内.
        let height = height.min(zs.saturating_sub(cz));
        let size = size.min(hs.saturating_sub(ch)).min(ws.saturating_sub(cw));

        let inside = move |(z, h, w): Idx3d| {
            size >= 3
                && height >= 3
                && z > cz
                && z + 1 < cz + height
                && h > ch
                && h + 1 < ch + size
                && w > cw
                && w + 1 < cw + size
        };
        self.rebuild_from_predicate(inside);
        debug!(
            "cube seed initialized: l_in = {}, l_out = {}",
            self.l_in.len(),
            self.l_out.len()
        );
    }

    /// 以球体为种子初始化 phi 场和边界列表.
    ///
    /// 种子区域为与 `center` 欧氏距离平方小于 `radius^2` 的全部体素,
    /// 越出体数据范围的部分会被裁剪. `radius` 为 0 时种子退化,
    /// 两个列表为空, 引擎成为 no-op.
    pub fn initialize_sphere(&mut self, center: Idx3d, radius: usize) {
        let r2 = (radius * radius) as i64;
        let inside = move |(z, h, w): Idx3d| {
            let dz = z as i64 - center.0 as i64;
            let dh = h as i64 - center.1 as i64;
            let dw = w as i64 - center.2 as i64;
            dz * dz + dh * dh + dw * dw < r2
        };
        self.rebuild_from_predicate(inside);
        debug!(
            "sphere seed initialized: l_in = {}, l_out = {}",
            self.l_in.len(),
            self.l_out.len()
        );
    }

    /// 从外部区域/标签体数据导入初始分割.
    ///
    /// `rule` 决定掩码中哪些体素构成种子区域. 若 `mask` 形状与源密度体
    /// 不一致则返回 [`EvolveError::ShapeMismatch`], 此时引擎状态
    /// (包括既有 phi 场) 不发生任何修改.
    pub fn initialize_from_mask(
        &mut self,
        mask: &LabelVolume,
        rule: MaskRule,
    ) -> Result<(), EvolveError> {
        if mask.shape() != self.phi.shape() {
            return Err(EvolveError::ShapeMismatch {
                expected: self.phi.shape(),
                found: mask.shape(),
            });
        }
        self.rebuild_from_predicate(|pos| rule.matches(mask[pos]));
        debug!(
            "mask seed initialized: l_in = {}, l_out = {}",
            self.l_in.len(),
            self.l_out.len()
        );
        Ok(())
    }

    /// 谓词驱动的统一重建: 扫描整个体数据, 由 `inside` 谓词给出目标区域,
    /// 按 6-邻接状态变化推导两个边界列表.
    ///
    /// 区域体素若存在 (不越界的) 区域外邻居, 或位于体数据表面,
    /// 则成为内边界; 否则为内部. 区域外体素若存在区域内邻居,
    /// 则成为外边界; 否则为外部. 扫描结束后窄带不变式严格成立.
    fn rebuild_from_predicate<F: Fn(Idx3d) -> bool>(&mut self, inside: F) {
        self.initialize_phi(OUTER_PHI);

        let (zs, hs, ws) = self.phi.shape();
        for pos in iproduct!(0..zs, 0..hs, 0..ws) {
            let neigh = self.phi.diamond_neighbours(pos);
            if inside(pos) {
                if neigh.len() < NEIGHBOR_MAX_3D || neigh.iter().any(|&n| !inside(n)) {
                    self.add_to_lin(pos);
                } else {
                    self.update_phi(pos, INNER_PHI);
                }
            } else if neigh.iter().any(|&n| inside(n)) {
                self.add_to_lout(pos);
            }
        }
        debug_assert!(self.check_narrow_band());
    }

    /// 解散当前前沿: 将 L_in 成员降级为 `INNER_PHI`, L_out 成员降级为
    /// `OUTER_PHI`, 然后清空两个列表. 区域本身 (phi 符号) 不变.
    pub fn clear_boundary(&mut self) {
        for i in 0..self.l_in.len() {
            let pos = self.l_in.at(i);
            self.phi[pos] = INNER_PHI;
        }
        for i in 0..self.l_out.len() {
            let pos = self.l_out.at(i);
            self.phi[pos] = OUTER_PHI;
        }
        self.l_in.clear();
        self.l_out.clear();
    }
}

/// 状态转移实现块. 列表增删仅发生在这里.
impl LevelSet3D<'_> {
    /// 将 `pos` 处 phi 值更新为 `value`, 返回原值. 越界时返回 `None`
    /// 且不做任何修改.
    #[inline]
    fn update_phi(&mut self, pos: Idx3d, value: i8) -> Option<i8> {
        if !self.phi.check(&pos) {
            return None;
        }
        let prev = self.phi[pos];
        if prev != value {
            self.phi[pos] = value;
        }
        Some(prev)
    }

    /// 将 `pos` 加入 L_in 并更新其 phi 值. 越界或已是内边界时不做任何事,
    /// 因此单轮遍历内一个体素至多入队一次.
    #[inline]
    fn add_to_lin(&mut self, pos: Idx3d) {
        if self
            .update_phi(pos, INNER_BOUNDARY_PHI)
            .is_some_and(|prev| prev != INNER_BOUNDARY_PHI)
        {
            self.l_in.push(pos);
        }
    }

    /// 将 `pos` 加入 L_out 并更新其 phi 值. 越界或已是外边界时不做任何事.
    #[inline]
    fn add_to_lout(&mut self, pos: Idx3d) {
        if self
            .update_phi(pos, OUTER_BOUNDARY_PHI)
            .is_some_and(|prev| prev != OUTER_BOUNDARY_PHI)
        {
            self.l_out.push(pos);
        }
    }

    /// switch-in: 前沿穿过 L_out 第 `index` 个体素, 区域生长一格.
    ///
    /// 该体素转入 L_in; 其 `OUTER_PHI` 邻居成为新的外边界.
    fn switch_in(&mut self, index: usize) {
        let pos = self.l_out.at(index);
        debug_assert_ne!(pos, TOMBSTONE);

        self.add_to_lin(pos);
        for n in self.phi.diamond_neighbours(pos) {
            if self.phi[n] == OUTER_PHI {
                self.add_to_lout(n);
            }
        }
        self.l_out.mark_removed(index);
    }

    /// switch-out: 前沿退出 L_in 第 `index` 个体素, 区域收缩一格.
    ///
    /// 该体素转入 L_out; 其 `INNER_PHI` 邻居成为新的内边界.
    fn switch_out(&mut self, index: usize) {
        let pos = self.l_in.at(index);
        debug_assert_ne!(pos, TOMBSTONE);

        self.add_to_lout(pos);
        for n in self.phi.diamond_neighbours(pos) {
            if self.phi[n] == INNER_PHI {
                self.add_to_lin(n);
            }
        }
        self.l_in.mark_removed(index);
    }

    /// `pos` 的全部 (不越界的) 6-邻居 phi 符号是否都为 `sign`?
    #[inline]
    fn uniform_neighbour_sign(&self, pos: Idx3d, sign: i8) -> bool {
        self.phi
            .diamond_neighbours(pos)
            .into_iter()
            .all(|n| self.phi[n].signum() == sign)
    }
}

/// 演化实现块.
impl LevelSet3D<'_> {
    /// 外向演化: 对 L_out 中速度场为前景的体素执行 switch-in.
    ///
    /// 仅遍历调用时刻已有的列表前缀; 本轮新产生的外边界点
    /// 等到下一次迭代才会被考察, 因此前沿每次迭代至多推进一层.
    pub fn outward_evolution(&mut self) {
        let size = self.l_out.len();
        for i in 0..size {
            let pos = self.l_out.at(i);
            debug_assert_ne!(pos, TOMBSTONE);
            if self.vf[pos] == FOREGROUND_VF {
                self.switch_in(i);
            }
        }
        self.l_out.sweep();
    }

    /// 内向演化: 对 L_in 中速度场为背景的体素执行 switch-out.
    pub fn inward_evolution(&mut self) {
        let size = self.l_in.len();
        for i in 0..size {
            let pos = self.l_in.at(i);
            debug_assert_ne!(pos, TOMBSTONE);
            if self.vf[pos] == BACKGROUND_VF {
                self.switch_out(i);
            }
        }
        self.l_in.sweep();
    }

    /// 从 L_in 中清除冗余点: 6-邻域符号已全为负的体素不再是真边界,
    /// 降级为 `INNER_PHI` 并移出列表.
    ///
    /// 该操作使列表大小保持正比于前沿表面积而非区域体积.
    pub fn remove_redundant_lin(&mut self) {
        let size = self.l_in.len();
        for i in 0..size {
            let pos = self.l_in.at(i);
            if self.uniform_neighbour_sign(pos, -1) {
                self.update_phi(pos, INNER_PHI);
                self.l_in.mark_removed(i);
            }
        }
        self.l_in.sweep();
    }

    /// 从 L_out 中清除冗余点: 6-邻域符号已全为正的体素降级为
    /// `OUTER_PHI` 并移出列表.
    pub fn remove_redundant_lout(&mut self) {
        let size = self.l_out.len();
        for i in 0..size {
            let pos = self.l_out.at(i);
            if self.uniform_neighbour_sign(pos, 1) {
                self.update_phi(pos, OUTER_PHI);
                self.l_out.mark_removed(i);
            }
        }
        self.l_out.sweep();
    }

    /// 按配置执行单次完整迭代: 外向演化 (及 L_in 冗余清除) 先于
    /// 内向演化 (及 L_out 冗余清除).
    fn evolve_once(&mut self) {
        if self.config.outward {
            self.outward_evolution();
            self.remove_redundant_lin();
        }
        if self.config.inward {
            self.inward_evolution();
            self.remove_redundant_lout();
        }
    }
}

/// 平滑实现块.
impl LevelSet3D<'_> {
    /// 以平滑核为权重, 计算 `pos` 邻域内 phi 值的加权和.
    /// 核窗口越出体数据范围的部分被忽略.
    fn smooth_point(&self, (z, h, w): Idx3d) -> f64 {
        let size = self.kernel.size();
        let half = self.kernel.half() as isize;
        let (zs, hs, ws) = self.phi.shape();

        let mut acc = 0.0;
        for (kz, kh, kw) in iproduct!(0..size, 0..size, 0..size) {
            let pz = z as isize + kz as isize - half;
            let ph = h as isize + kh as isize - half;
            let pw = w as isize + kw as isize - half;
            if pz < 0 || ph < 0 || pw < 0 {
                continue;
            }
            let (pz, ph, pw) = (pz as usize, ph as usize, pw as usize);
            if pz >= zs || ph >= hs || pw >= ws {
                continue;
            }
            acc += self.kernel.value_at((kz, kh, kw)) * f64::from(self.phi[(pz, ph, pw)]);
        }
        acc
    }

    /// 平滑相邻体素 phi 值与当前符号不一致的体素的符号 (平滑值与体素
    /// phi 符号冲突时翻转该体素), 以降低隐式表面的锯齿.
    ///
    /// 处理顺序: 先对 L_in 执行冲突 switch-out 并清除 L_out 冗余点,
    /// 再对 L_out 执行冲突 switch-in 并清除 L_in 冗余点.
    /// 每次调用中任何体素的移动不超过一个格点.
    pub fn smooth_step(&mut self) {
        #[inline]
        fn sign_mismatch(smoothed: f64, phi_value: i8) -> bool {
            (smoothed < 0.0 && phi_value > 0) || (smoothed > 0.0 && phi_value < 0)
        }

        let size = self.l_in.len();
        for i in 0..size {
            let pos = self.l_in.at(i);
            let smoothed = self.smooth_point(pos);
            if sign_mismatch(smoothed, self.phi[pos]) {
                self.switch_out(i);
            }
        }
        self.l_in.sweep();
        self.remove_redundant_lout();

        let size = self.l_out.len();
        for i in 0..size {
            let pos = self.l_out.at(i);
            let smoothed = self.smooth_point(pos);
            if sign_mismatch(smoothed, self.phi[pos]) {
                self.switch_in(i);
            }
        }
        self.l_out.sweep();
        self.remove_redundant_lin();
    }
}

/// 驱动与停止判据实现块.
impl LevelSet3D<'_> {
    /// 停止判据: 两侧前沿均已稳定时返回 `true`.
    ///
    /// 一侧前沿稳定, 指其仍可移动的边界点 (L_out 中速度场为前景的点,
    /// 或 L_in 中速度场为背景的点) 占比低于 0.1%. 空列表视为稳定.
    pub fn stopping_criterion(&self) -> bool {
        let stable = |list: &BoundaryList, movable_code: u8| {
            if list.is_empty() {
                return true;
            }
            let movable = list.iter().filter(|&p| self.vf[p] == movable_code).count();
            (movable as f64) < list.len() as f64 * STABLE_FRACTION
        };
        stable(&self.l_out, FOREGROUND_VF) && stable(&self.l_in, BACKGROUND_VF)
    }

    /// 手动演化: 执行固定 `iterations` 次迭代.
    ///
    /// 每次迭代开始前调用一次进度回调; 回调返回 `false` 时立即停止并
    /// 返回已完成的迭代数, 此时不变式仍然成立 (不存在半完成的迭代).
    /// 未被取消时返回值等于 `iterations`.
    pub fn manual_evolution<P: Progress>(&mut self, iterations: usize, progress: &mut P) -> usize {
        let period = self.config.smoothing_steps.max(1);

        for completed in 0..iterations {
            if !progress.report(completed, iterations) {
                debug!("manual evolution cancelled at iteration {completed}");
                debug_assert!(self.check_narrow_band());
                return completed;
            }
            self.evolve_once();
            if self.config.smoothing_enabled && completed % period == 0 {
                self.smooth_step();
            }
        }
        debug_assert!(self.check_narrow_band());
        iterations
    }

    /// 自动演化: 迭代直到达到 `max_iterations` 或停止判据满足.
    ///
    /// 停止判据每 `stop_iterations` 次迭代检查一次以分摊其开销.
    /// 取消语义与 [`Self::manual_evolution`] 相同. 结束时若最近一次
    /// 平滑已落后停止点超过半个平滑周期, 则额外执行一次平滑,
    /// 保证结果不会停留在锯齿状态.
    ///
    /// 返回实际完成的迭代数, 不超过 `max_iterations`.
    pub fn automatic_evolution<P: Progress>(
        &mut self,
        max_iterations: usize,
        progress: &mut P,
    ) -> usize {
        let batch = self.config.stop_iterations;
        if batch == 0 {
            return 0;
        }
        let period = self.config.smoothing_steps.max(1);

        let mut completed = 0usize;
        let mut last_smooth = 0usize;
        'evolution: while completed < max_iterations {
            for _ in 0..batch {
                if completed >= max_iterations {
                    break;
                }
                if !progress.report(completed, max_iterations) {
                    debug!("automatic evolution cancelled at iteration {completed}");
                    debug_assert!(self.check_narrow_band());
                    return completed;
                }
                self.evolve_once();
                if self.config.smoothing_enabled && completed % period == 0 {
                    self.smooth_step();
                    last_smooth = completed;
                }
                completed += 1;
            }
            if self.stopping_criterion() {
                break 'evolution;
            }
        }

        if self.config.smoothing_enabled && completed - last_smooth > period / 2 {
            self.smooth_step();
        }
        debug!(
            "automatic evolution finished: {completed} iterations, l_in = {}, l_out = {}",
            self.l_in.len(),
            self.l_out.len()
        );
        debug_assert!(self.check_narrow_band());
        completed
    }
}

/// 结果导出与一致性检查实现块.
impl LevelSet3D<'_> {
    /// 获取当前分割的前景体素个数 (phi < 0 的体素数).
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.phi.data().iter().filter(|p| **p < 0).count()
    }

    /// 导出二值前景掩码: 前景体素为 1, 其余为 0.
    pub fn foreground_mask(&self) -> LabelVolume {
        LabelVolume::from_array(self.phi.data().mapv(|p| u8::from(p < 0)))
    }

    /// 完整检查窄带不变式. 全部满足时返回 `true`:
    ///
    /// 1. L_in 成员的 phi 值均为 `INNER_BOUNDARY_PHI`, L_out 成员均为
    ///   `OUTER_BOUNDARY_PHI`;
    /// 2. 两个列表内部无重复坐标, 且互不相交;
    /// 3. 全部 phi 值合法, 且边界值体素数与对应列表长度一致.
    ///
    /// 该检查的开销为 O(体素数), 主要用于测试和 debug 断言.
    pub fn check_narrow_band(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.l_in.len() + self.l_out.len());
        for pos in self.l_in.iter() {
            if self.phi.get(pos).copied() != Some(INNER_BOUNDARY_PHI) || !seen.insert(pos) {
                return false;
            }
        }
        for pos in self.l_out.iter() {
            if self.phi.get(pos).copied() != Some(OUTER_BOUNDARY_PHI) || !seen.insert(pos) {
                return false;
            }
        }

        let mut inner_boundary = 0usize;
        let mut outer_boundary = 0usize;
        for &p in self.phi.data().iter() {
            if !is_legal(p) {
                return false;
            }
            match p {
                INNER_BOUNDARY_PHI => inner_boundary += 1,
                OUTER_BOUNDARY_PHI => outer_boundary += 1,
                _ => (),
            }
        }
        inner_boundary == self.l_in.len() && outer_boundary == self.l_out.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{silent, EvolveError, LevelSet3D, MaskRule, VelocitySource};
    use crate::consts::phi::{INNER_PHI, OUTER_PHI};
    use crate::consts::VoxelClass;
    use crate::data::{DensityVolume, LabelVolume};
    use crate::Idx3d;
    use itertools::iproduct;

    fn dist2((z, h, w): Idx3d, (cz, ch, cw): Idx3d) -> i64 {
        let dz = z as i64 - cz as i64;
        let dh = h as i64 - ch as i64;
        let dw = w as i64 - cw as i64;
        dz * dz + dh * dh + dw * dw
    }

    /// 构建球形前景密度体: 球内强度 `fg`, 球外强度 `bg`.
    fn ball_volume(shape: Idx3d, center: Idx3d, radius: usize, fg: f32, bg: f32) -> DensityVolume {
        let mut v = DensityVolume::from_elem(shape, bg);
        let r2 = (radius * radius) as i64;
        let (zs, hs, ws) = shape;
        for pos in iproduct!(0..zs, 0..hs, 0..ws) {
            if dist2(pos, center) < r2 {
                v[pos] = fg;
            }
        }
        v
    }

    /// 球内体素个数.
    fn ball_count(shape: Idx3d, center: Idx3d, radius: usize) -> usize {
        let r2 = (radius * radius) as i64;
        let (zs, hs, ws) = shape;
        iproduct!(0..zs, 0..hs, 0..ws)
            .filter(|&pos| dist2(pos, center) < r2)
            .count()
    }

    #[test]
    fn test_sphere_seed_invariant() {
        let vol = DensityVolume::from_elem((32, 32, 32), 0.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere((16, 16, 16), 8);

        assert!(ls.check_narrow_band());
        assert!(!ls.l_in().is_empty());
        assert!(!ls.l_out().is_empty());
        assert_eq!(ls.foreground_count(), ball_count((32, 32, 32), (16, 16, 16), 8));
    }

    #[test]
    fn test_cube_seed_invariant() {
        let vol = DensityVolume::from_elem((16, 16, 16), 0.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_cube((2, 2, 2), 6, 5);

        assert!(ls.check_narrow_band());
        // 种子区域为各方向内缩一格的长方体.
        assert_eq!(ls.foreground_count(), 3 * 4 * 4);
    }

    #[test]
    fn test_cube_seed_clamped_to_extent() {
        let vol = DensityVolume::from_elem((10, 10, 10), 0.0);
        let mut ls = LevelSet3D::new(&vol);
        // 立方体越界, 应被裁剪而不是 panic.
        ls.initialize_cube((6, 6, 6), 8, 8);

        assert!(ls.check_narrow_band());
        assert_eq!(ls.foreground_count(), 2 * 2 * 2);
    }

    #[test]
    fn test_degenerate_seed_is_noop() {
        let vol = DensityVolume::from_elem((8, 8, 8), 0.0);
        let mut ls = LevelSet3D::new(&vol);

        ls.initialize_sphere((4, 4, 4), 0);
        assert!(ls.l_in().is_empty());
        assert!(ls.l_out().is_empty());
        assert_eq!(ls.foreground_count(), 0);

        ls.initialize_cube((0, 0, 0), 2, 2);
        assert!(ls.l_in().is_empty());
        assert!(ls.l_out().is_empty());

        // 空前沿上演化是 no-op.
        assert_eq!(ls.manual_evolution(3, &mut silent()), 3);
        assert_eq!(ls.foreground_count(), 0);
        assert!(ls.check_narrow_band());
    }

    #[test]
    fn test_mask_seed_round_trip() {
        let shape = (20, 20, 20);
        let center = (10, 10, 10);
        let vol = DensityVolume::from_elem(shape, 0.0);

        let mut mask = LabelVolume::zeros(shape);
        let (zs, hs, ws) = shape;
        for pos in iproduct!(0..zs, 0..hs, 0..ws) {
            if dist2(pos, center) < 36 {
                mask[pos] = 1;
            }
        }

        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_from_mask(&mask, MaskRule::NonZero { inverted: false })
            .unwrap();

        assert!(ls.check_narrow_band());
        assert_eq!(ls.foreground_count(), ball_count(shape, center, 6));
    }

    #[test]
    fn test_mask_label_rule() {
        let shape = (6, 6, 6);
        let vol = DensityVolume::from_elem(shape, 0.0);
        let mut mask = LabelVolume::zeros(shape);
        mask[(2, 2, 2)] = 1;
        mask[(3, 3, 3)] = 2;
        mask[(3, 3, 4)] = 2;

        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_from_mask(&mask, MaskRule::Label(2)).unwrap();
        assert!(ls.check_narrow_band());
        assert_eq!(ls.foreground_count(), 2);
    }

    #[test]
    fn test_mask_shape_mismatch_rejected() {
        let vol = DensityVolume::from_elem((10, 10, 10), 0.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere((5, 5, 5), 3);
        let phi_before = ls.phi().clone();
        let l_in_before = ls.l_in().to_vec();

        let mask = LabelVolume::zeros((8, 8, 8));
        let err = ls
            .initialize_from_mask(&mask, MaskRule::NonZero { inverted: false })
            .unwrap_err();
        assert_eq!(
            err,
            EvolveError::ShapeMismatch {
                expected: (10, 10, 10),
                found: (8, 8, 8),
            }
        );

        // 既有状态未被修改.
        assert_eq!(ls.phi().data(), phi_before.data());
        assert_eq!(ls.l_in(), l_in_before.as_slice());
        assert!(ls.check_narrow_band());
    }

    #[test]
    fn test_clear_boundary_dissolves_front() {
        let vol = DensityVolume::from_elem((12, 12, 12), 0.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere((6, 6, 6), 4);
        let fg = ls.foreground_count();

        ls.clear_boundary();
        assert!(ls.l_in().is_empty());
        assert!(ls.l_out().is_empty());
        assert!(ls.check_narrow_band());
        // 区域本身不变, 只是前沿被解散.
        assert_eq!(ls.foreground_count(), fg);
        assert!(ls.phi().data().iter().all(|&p| p == INNER_PHI || p == OUTER_PHI));
    }

    /// 以强度阈值构建自定义速度分类器并填充速度场.
    fn fill_vf_by_threshold(ls: &mut LevelSet3D<'_>, vol: &DensityVolume, threshold: f32) {
        let source = VelocitySource::Custom(Box::new(move |pos| {
            if vol[pos] > threshold {
                VoxelClass::Foreground
            } else {
                VoxelClass::Background
            }
        }));
        assert!(ls.compute_velocity_field(&source, &mut silent()).unwrap());
    }

    #[test]
    fn test_outward_pass_monotonic() {
        let shape = (32, 32, 32);
        let center = (16, 16, 16);
        let vol = ball_volume(shape, center, 10, 200.0, 50.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 4);
        fill_vf_by_threshold(&mut ls, &vol, 125.0);

        for _ in 0..6 {
            let outer_before = ls.phi().data().iter().filter(|p| **p > 0).count();
            ls.outward_evolution();
            ls.remove_redundant_lin();
            let outer_after = ls.phi().data().iter().filter(|p| **p > 0).count();
            assert!(outer_after <= outer_before);
            assert!(ls.check_narrow_band());
        }
    }

    #[test]
    fn test_inward_pass_monotonic() {
        let shape = (24, 24, 24);
        let center = (12, 12, 12);
        // 全背景密度体: 前沿只收缩.
        let vol = DensityVolume::from_elem(shape, 50.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 6);
        fill_vf_by_threshold(&mut ls, &vol, 125.0);

        for _ in 0..6 {
            let inner_before = ls.foreground_count();
            ls.inward_evolution();
            ls.remove_redundant_lout();
            let inner_after = ls.foreground_count();
            assert!(inner_after <= inner_before);
            assert!(ls.check_narrow_band());
        }
    }

    #[test]
    fn test_shrink_to_nothing_stops() {
        let shape = (20, 20, 20);
        let vol = DensityVolume::from_elem(shape, 50.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere((10, 10, 10), 5);
        fill_vf_by_threshold(&mut ls, &vol, 125.0);
        ls.config_mut().stop_iterations = 2;

        let done = ls.automatic_evolution(100, &mut silent());
        assert!(done < 100, "criterion should fire, ran {done} iterations");
        assert_eq!(ls.foreground_count(), 0);
        assert!(ls.l_in().is_empty());
        assert!(ls.l_out().is_empty());
        assert!(ls.check_narrow_band());
    }

    /// 列表大小随种子半径按表面积 (r^2) 而非体积 (r^3) 增长.
    #[test]
    fn test_list_size_scales_with_surface() {
        let vol = DensityVolume::from_elem((48, 48, 48), 0.0);

        let mut small = LevelSet3D::new(&vol);
        small.initialize_sphere((24, 24, 24), 6);
        let small_len = (small.l_in().len() + small.l_out().len()) as f64;

        let mut large = LevelSet3D::new(&vol);
        large.initialize_sphere((24, 24, 24), 12);
        let large_len = (large.l_in().len() + large.l_out().len()) as f64;

        let ratio = large_len / small_len;
        // 半径翻倍: 表面积比 4, 体积比 8.
        assert!(ratio < 6.0, "list growth ratio = {ratio}");
    }

    #[test]
    fn test_redundant_removal_idempotent() {
        let shape = (32, 32, 32);
        let center = (16, 16, 16);
        let vol = ball_volume(shape, center, 10, 200.0, 50.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 4);
        fill_vf_by_threshold(&mut ls, &vol, 125.0);

        ls.outward_evolution();
        ls.remove_redundant_lin();
        let len_first = ls.l_in().len();
        ls.remove_redundant_lin();
        assert_eq!(ls.l_in().len(), len_first);

        // 清除后每个 L_in 成员都仍是真边界: 存在符号非负的邻居.
        for &pos in ls.l_in() {
            let has_outside_neighbour = ls
                .phi()
                .diamond_neighbours(pos)
                .into_iter()
                .any(|n| ls.phi()[n] > 0);
            assert!(has_outside_neighbour, "redundant point {pos:?} kept");
        }
    }

    /// 收敛场景: 均匀前景球从小种子出发自动演化, 终态体素数与真值一致.
    #[test]
    fn test_convergence_to_foreground_ball() {
        let _ = simple_logger::SimpleLogger::new().init();

        let shape = (40, 40, 40);
        let center = (20, 20, 20);
        let vol = ball_volume(shape, center, 10, 200.0, 50.0);

        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 4);
        let source = VelocitySource::Mean {
            foreground_weight: 1.0,
            background_weight: 1.0,
        };
        assert!(ls.compute_velocity_field(&source, &mut silent()).unwrap());
        ls.config_mut().stop_iterations = 5;

        let done = ls.automatic_evolution(100, &mut silent());
        assert!(done < 100, "criterion should fire, ran {done} iterations");
        assert!(done <= 30, "converged too slowly: {done} iterations");
        assert_eq!(ls.foreground_count(), ball_count(shape, center, 10));
        assert!(ls.check_narrow_band());

        // 前景掩码与 phi 符号一致.
        let mask = ls.foreground_mask();
        let mask_count = mask.data().iter().filter(|p| **p == 1).count();
        assert_eq!(mask_count, ls.foreground_count());
    }

    /// 取消场景: 回调在第 5 次迭代后返回 false, 恰好完成 5 次迭代.
    #[test]
    fn test_cancellation_after_five_iterations() {
        let shape = (40, 40, 40);
        let center = (20, 20, 20);
        let vol = ball_volume(shape, center, 10, 200.0, 50.0);

        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 4);
        fill_vf_by_threshold(&mut ls, &vol, 125.0);
        ls.config_mut().stop_iterations = 3;

        let mut cancel_after_five = |step: usize, _max: usize| step < 5;
        let done = ls.automatic_evolution(100, &mut cancel_after_five);
        assert_eq!(done, 5);
        assert!(ls.check_narrow_band());

        // 手动驱动的取消语义一致.
        let mut ls2 = LevelSet3D::new(&vol);
        ls2.initialize_sphere(center, 4);
        fill_vf_by_threshold(&mut ls2, &vol, 125.0);
        let mut cancel_after_five = |step: usize, _max: usize| step < 5;
        assert_eq!(ls2.manual_evolution(20, &mut cancel_after_five), 5);
        assert!(ls2.check_narrow_band());
    }

    #[test]
    fn test_manual_evolution_full_count() {
        let shape = (32, 32, 32);
        let center = (16, 16, 16);
        let vol = ball_volume(shape, center, 9, 200.0, 50.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 3);
        fill_vf_by_threshold(&mut ls, &vol, 125.0);

        assert_eq!(ls.manual_evolution(4, &mut silent()), 4);
        assert!(ls.check_narrow_band());
        // 4 次迭代后区域仍在生长途中.
        let fg = ls.foreground_count();
        assert!(fg > ball_count(shape, center, 3));
        assert!(fg < ball_count(shape, center, 9));
    }

    /// 平面前沿上平滑是 (平凡的) 不动点: 两次应用都不改变 phi.
    #[test]
    fn test_smoothing_idempotent_on_plane() {
        let shape = (16, 16, 16);
        let vol = DensityVolume::from_elem(shape, 0.0);
        let mut mask = LabelVolume::zeros(shape);
        let (zs, hs, ws) = shape;
        for pos in iproduct!(0..zs, 0..hs, 0..ws) {
            if pos.1 < 8 {
                mask[pos] = 1;
            }
        }

        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_from_mask(&mask, MaskRule::NonZero { inverted: false })
            .unwrap();

        let phi_before = ls.phi().clone();
        ls.smooth_step();
        assert_eq!(ls.phi().data(), phi_before.data());
        ls.smooth_step();
        assert_eq!(ls.phi().data(), phi_before.data());
        assert!(ls.check_narrow_band());
    }

    /// 单次平滑只影响原前沿一格以内的体素.
    #[test]
    fn test_smoothing_moves_at_most_one_cell() {
        let shape = (24, 24, 24);
        let center = (12, 12, 12);
        let vol = DensityVolume::from_elem(shape, 0.0);
        let mut ls = LevelSet3D::new(&vol);
        ls.initialize_sphere(center, 6);

        let boundary_before: Vec<Idx3d> =
            ls.l_in().iter().chain(ls.l_out().iter()).copied().collect();
        let phi_before = ls.phi().clone();

        ls.smooth_step();
        assert!(ls.check_narrow_band());

        let manhattan_to_front = |pos: Idx3d| {
            boundary_before
                .iter()
                .map(|&(bz, bh, bw)| {
                    pos.0.abs_diff(bz) + pos.1.abs_diff(bh) + pos.2.abs_diff(bw)
                })
                .min()
                .unwrap()
        };

        let (zs, hs, ws) = shape;
        for pos in iproduct!(0..zs, 0..hs, 0..ws) {
            let (before, after) = (phi_before[pos], ls.phi()[pos]);
            if before == after {
                continue;
            }
            // 符号翻转是前沿移动, 至多一格; 其余仅是窄带升降级记账.
            let limit = if before.signum() != after.signum() { 1 } else { 2 };
            let dist = manhattan_to_front(pos);
            assert!(dist <= limit, "voxel {pos:?} changed {dist} cells from the front");
        }
    }
}
