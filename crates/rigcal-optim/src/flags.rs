//! Optimization flags.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Switches that enable optional parameter groups in the flat vector.
///
/// Camera poses, board poses, and the motion model's base block are always
/// optimized; these flags add intrinsics, board point corrections, and the
/// motion model's rolling-shutter block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeFlags {
    pub intrinsics: bool,
    pub board: bool,
    pub rolling: bool,
}

impl OptimizeFlags {
    pub const NAMES: [&'static str; 3] = ["intrinsics", "board", "rolling"];

    /// Set a flag by name. Unknown names are a usage error.
    pub fn set(&self, name: &str, on: bool) -> Result<Self> {
        let mut out = *self;
        match name {
            "intrinsics" => out.intrinsics = on,
            "board" => out.board = on,
            "rolling" => out.rolling = on,
            other => bail!(
                "unknown optimization flag {:?}, valid flags are {:?}",
                other,
                Self::NAMES
            ),
        }
        Ok(out)
    }
}
