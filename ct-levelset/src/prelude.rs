//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{DensityVolume, GaussKernel, LabelVolume, PhiVolume, VfVolume, Volume};

pub use crate::evolve::{
    silent, EvolutionConfig, EvolveError, LevelSet3D, MaskRule, Progress, RegionMeans,
    VelocitySource,
};

pub use crate::consts::phi::{
    INNER_BOUNDARY_PHI, INNER_PHI, OUTER_BOUNDARY_PHI, OUTER_PHI,
};
pub use crate::consts::vf::{BACKGROUND_VF, FOREGROUND_VF, UNKNOWN_VF};
pub use crate::consts::VoxelClass;
