//! 窄带边界点列表.

use crate::Idx3d;

/// 单轮遍历中被移除点的墓碑标记.
pub(crate) const TOMBSTONE: Idx3d = (usize::MAX, usize::MAX, usize::MAX);

/// 边界点列表 (`L_in` / `L_out`).
///
/// 插入序存储, 顺序本身没有语义. 单轮遍历中的移除以墓碑标记完成,
/// 遍历结束后由 [`Self::sweep`] 统一压缩, 避免遍历途中的元素搬移.
///
/// 列表的增删只能经由引擎的 add/switch 操作发生,
/// 以保证列表成员与 phi 边界值的一一对应关系在单一调用点得到维护.
#[derive(Clone, Debug, Default)]
pub(crate) struct BoundaryList {
    points: Vec<Idx3d>,
}

impl BoundaryList {
    /// 元素个数 (含未清扫的墓碑).
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 判断是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 获取第 `index` 个点.
    #[inline]
    pub fn at(&self, index: usize) -> Idx3d {
        self.points[index]
    }

    /// 追加一个点.
    #[inline]
    pub fn push(&mut self, pos: Idx3d) {
        debug_assert_ne!(pos, TOMBSTONE);
        self.points.push(pos);
    }

    /// 将第 `index` 个点标记为已移除.
    #[inline]
    pub fn mark_removed(&mut self, index: usize) {
        self.points[index] = TOMBSTONE;
    }

    /// 清扫全部墓碑标记, 保留剩余点的相对顺序.
    #[inline]
    pub fn sweep(&mut self) {
        self.points.retain(|p| *p != TOMBSTONE);
    }

    /// 清空列表, 保留已分配容量.
    #[inline]
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// 获取能迭代全部点的迭代器.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = Idx3d> + '_ {
        self.points.iter().copied()
    }

    /// 以切片形式获取全部点.
    #[inline]
    pub fn as_slice(&self) -> &[Idx3d] {
        &self.points
    }
}
