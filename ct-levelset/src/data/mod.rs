//! 3D 体数据基础数据结构.

use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView, ArrayViewMut, Axis, Ix2, Ix3};

use crate::Idx3d;

mod kernel;

pub use kernel::GaussKernel;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 通用稠密 3D 体数据. 按 `(z, h, w)` 行优先组织, `w` 方向变化最快.
///
/// phi 符号场, 速度场, 源密度体和外部区域掩码共用该抽象,
/// 仅元素类型不同.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Volume<T> {
    data: Array3<T>,
}

/// 源密度体数据. 体素值以 `f32` 保存 (如 CT HU 值).
pub type DensityVolume = Volume<f32>;

/// phi 符号场. 合法取值见 [`crate::consts::phi`].
pub type PhiVolume = Volume<i8>;

/// 速度场. 合法取值见 [`crate::consts::vf`].
pub type VfVolume = Volume<u8>;

/// 外部区域/标签体数据. 体素值为标签编号, `0` 代表无标签.
pub type LabelVolume = Volume<u8>;

impl<T> Volume<T> {
    /// 从裸 `Array3` 直接创建. 输入必须是行优先标准布局,
    /// 否则程序 panic.
    pub fn from_array(data: Array3<T>) -> Self {
        assert!(data.is_standard_layout());
        Self { data }
    }

    /// 获取数据形状大小.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取 `pos` 处体素的引用. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx3d) -> Option<&T> {
        self.data.get(pos)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, T, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, T, Ix3> {
        self.data.view_mut()
    }

    /// 获取 z 空间的第 `z_index` 层不可变切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView<'_, T, Ix2> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取 z 空间的第 `z_index` 层可变切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at_mut(&mut self, z_index: usize) -> ArrayViewMut<'_, T, Ix2> {
        self.data.index_axis_mut(Axis(0), z_index)
    }

    /// 获取 `pos` 前后上下左右六个点的坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    pub fn diamond_neighbours(&self, (z, h, w): Idx3d) -> Vec<Idx3d> {
        self.check_collect([
            (z.wrapping_sub(1), h, w),
            (z.saturating_add(1), h, w),
            (z, h.wrapping_sub(1), w),
            (z, h.saturating_add(1), w),
            (z, h, w.wrapping_sub(1)),
            (z, h, w.saturating_add(1)),
        ])
    }

    /// 收集 `data` 中不越界的索引.
    #[inline]
    fn check_collect<B: FromIterator<Idx3d>, const N: usize>(&self, data: [Idx3d; N]) -> B {
        data.into_iter().filter(|p| self.check(p)).collect()
    }
}

impl<T: Clone> Volume<T> {
    /// 创建以 `elem` 均匀填充的体数据.
    #[inline]
    pub fn from_elem(shape: Idx3d, elem: T) -> Self {
        Self {
            data: Array3::from_elem(shape, elem),
        }
    }

    /// 将全部体素填充为 `value`.
    #[inline]
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T: Clone + num::Zero> Volume<T> {
    /// 创建零填充的体数据.
    #[inline]
    pub fn zeros(shape: Idx3d) -> Self {
        Self {
            data: Array3::zeros(shape),
        }
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}
