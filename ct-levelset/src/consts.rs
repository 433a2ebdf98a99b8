//! 通用常量.

/// phi 符号场的合法取值.
///
/// phi 值的符号代表体素相对当前分割区域的位置: 负值在区域内, 正值在区域外.
/// 绝对值为 1 的体素位于窄带边界上, 分别对应 `L_in` / `L_out` 列表成员.
pub mod phi {
    /// 区域内部体素 (不属于任何边界列表).
    pub const INNER_PHI: i8 = -3;

    /// 内边界体素. 当且仅当体素属于 `L_in` 时取该值.
    pub const INNER_BOUNDARY_PHI: i8 = -1;

    /// 外边界体素. 当且仅当体素属于 `L_out` 时取该值.
    pub const OUTER_BOUNDARY_PHI: i8 = 1;

    /// 区域外部体素 (不属于任何边界列表).
    pub const OUTER_PHI: i8 = 3;

    /// 体素是否位于区域内侧 (内部或内边界)?
    #[inline]
    pub const fn is_inside(p: i8) -> bool {
        p < 0
    }

    /// 体素是否位于区域外侧 (外部或外边界)?
    #[inline]
    pub const fn is_outside(p: i8) -> bool {
        p > 0
    }

    /// 体素是否位于窄带边界上?
    #[inline]
    pub const fn is_boundary(p: i8) -> bool {
        matches!(p, INNER_BOUNDARY_PHI | OUTER_BOUNDARY_PHI)
    }

    /// 是否是合法 phi 值?
    #[inline]
    pub const fn is_legal(p: i8) -> bool {
        matches!(
            p,
            INNER_PHI | INNER_BOUNDARY_PHI | OUTER_BOUNDARY_PHI | OUTER_PHI
        )
    }
}

/// 速度场的合法取值.
pub mod vf {
    /// 前景体素. 外向演化允许前沿推进到该类体素.
    pub const FOREGROUND_VF: u8 = 1;

    /// 背景体素. 内向演化允许前沿从该类体素退出.
    pub const BACKGROUND_VF: u8 = 100;

    /// 未知体素. 前沿在该类体素处保持不动.
    pub const UNKNOWN_VF: u8 = 0;

    /// 是否为前景?
    #[inline]
    pub const fn is_foreground(v: u8) -> bool {
        matches!(v, FOREGROUND_VF)
    }

    /// 是否为背景?
    #[inline]
    pub const fn is_background(v: u8) -> bool {
        matches!(v, BACKGROUND_VF)
    }

    /// 是否未知?
    #[inline]
    pub const fn is_unknown(v: u8) -> bool {
        matches!(v, UNKNOWN_VF)
    }
}

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 体素速度分类.
///
/// 是速度场字节编码的符号化表示, 自定义速度分类函数以该类型为返回值.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VoxelClass {
    /// 前景, 编码为 [`vf::FOREGROUND_VF`].
    Foreground,

    /// 背景, 编码为 [`vf::BACKGROUND_VF`].
    Background,

    /// 未知, 编码为 [`vf::UNKNOWN_VF`]. 演化引擎在此处不移动前沿.
    Unknown,
}

impl VoxelClass {
    /// 转换为速度场字节编码.
    #[inline]
    pub const fn to_code(self) -> u8 {
        match self {
            VoxelClass::Foreground => vf::FOREGROUND_VF,
            VoxelClass::Background => vf::BACKGROUND_VF,
            VoxelClass::Unknown => vf::UNKNOWN_VF,
        }
    }

    /// 从速度场字节编码转换. 非法编码返回 `None`.
    #[inline]
    pub const fn from_code(code: u8) -> Option<VoxelClass> {
        match code {
            vf::FOREGROUND_VF => Some(VoxelClass::Foreground),
            vf::BACKGROUND_VF => Some(VoxelClass::Background),
            vf::UNKNOWN_VF => Some(VoxelClass::Unknown),
            _ => None,
        }
    }

    /// 是否为前景?
    #[inline]
    pub fn is_foreground(&self) -> bool {
        matches!(self, Self::Foreground)
    }

    /// 是否为背景?
    #[inline]
    pub fn is_background(&self) -> bool {
        matches!(self, Self::Background)
    }

    /// 是否未知?
    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}
