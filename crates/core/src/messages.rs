use std::fmt;

use crate::tile::{Raster, TileKey};

/// Generation counter for the audio source. Every request and response is
/// tagged with it so results computed for a superseded source can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceVersion(pub u64);

impl SourceVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Everything the worker needs to render one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub key: TileKey,
    pub start_time_seconds: f64,
    pub end_time_seconds: f64,
    pub gain: f32,
    /// Never more than [`crate::tile::MAX_RENDER_WIDTH_PX`].
    pub render_width_px: u32,
    pub raster_height_px: u32,
}

/// Requests sent from the scheduler to the worker
#[derive(Debug)]
pub enum WorkerRequest {
    /// Hand a new source to the worker. The sample buffer is moved; the
    /// scheduler keeps no copy of it.
    Init {
        version: SourceVersion,
        samples: Vec<f32>,
        sample_rate: u32,
    },
    GetTile {
        version: SourceVersion,
        spec: TileRequest,
    },
    Shutdown,
}

impl WorkerRequest {
    pub fn version(&self) -> Option<SourceVersion> {
        match self {
            WorkerRequest::Init { version, .. } | WorkerRequest::GetTile { version, .. } => {
                Some(*version)
            }
            WorkerRequest::Shutdown => None,
        }
    }
}

/// Why a tile could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileFailure {
    /// The worker has no samples for this version (yet).
    NotInitialized,
    Compute(String),
}

impl fmt::Display for TileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileFailure::NotInitialized => write!(f, "worker not initialized"),
            TileFailure::Compute(msg) => write!(f, "tile computation failed: {}", msg),
        }
    }
}

/// Responses sent from the worker back to the scheduler
#[derive(Debug)]
pub enum WorkerResponse {
    InitComplete {
        version: SourceVersion,
        /// A tile that became ready as a side effect of initialization.
        tile: Option<(TileKey, Raster)>,
    },
    /// Initialization failed. The worker returns the sample buffer when it
    /// still has it so the scheduler can retry without re-reading the source.
    InitFailed {
        version: SourceVersion,
        reason: String,
        samples: Option<Vec<f32>>,
    },
    TileReady {
        version: SourceVersion,
        key: TileKey,
        raster: Raster,
    },
    TileFailed {
        version: SourceVersion,
        key: TileKey,
        failure: TileFailure,
    },
}

impl WorkerResponse {
    pub fn version(&self) -> SourceVersion {
        match self {
            WorkerResponse::InitComplete { version, .. }
            | WorkerResponse::InitFailed { version, .. }
            | WorkerResponse::TileReady { version, .. }
            | WorkerResponse::TileFailed { version, .. } => *version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_tagged() {
        let v = SourceVersion(3);
        let request = WorkerRequest::GetTile {
            version: v,
            spec: TileRequest {
                key: TileKey::new(0, 9.0),
                start_time_seconds: 0.0,
                end_time_seconds: 5.0,
                gain: 9.0,
                render_width_px: 2500,
                raster_height_px: 256,
            },
        };
        assert_eq!(request.version(), Some(v));
        assert_eq!(WorkerRequest::Shutdown.version(), None);

        let response = WorkerResponse::TileFailed {
            version: v,
            key: TileKey::new(0, 9.0),
            failure: TileFailure::NotInitialized,
        };
        assert_eq!(response.version(), v);
        assert_eq!(v.next(), SourceVersion(4));
        assert_eq!(v.to_string(), "v3");
    }
}
