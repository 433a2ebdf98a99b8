//! 运行时错误.

use crate::Idx3d;
use std::fmt;

/// 分割引擎的配置错误.
///
/// 此类错误在操作开始前被检测到, 返回时引擎状态未发生任何修改.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolveError {
    /// 输入体数据的形状与源密度体不一致.
    ShapeMismatch {
        /// 引擎期望的形状, 即源密度体的形状.
        expected: Idx3d,
        /// 实际传入的形状.
        found: Idx3d,
    },
}

impl fmt::Display for EvolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvolveError::ShapeMismatch { expected, found } => {
                write!(f, "volume shape mismatch: expected {expected:?}, found {found:?}")
            }
        }
    }
}

impl std::error::Error for EvolveError {}
