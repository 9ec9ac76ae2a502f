//! cubeplan - query scheduling for fragmented seismic volumes
//!
//! Large seismic cubes are stored as a regular grid of fixed-size sub-cubes
//! ("fragments") on blob storage. Clients issue high-level queries - "give
//! me inline 742", "extract a curtain through these (x, y) positions" - and
//! a fleet of workers each fetch one or more fragments and stream partial
//! results back.
//!
//! This crate is the planning core in the middle: it turns one JSON query
//! document plus the survey manifest into a taskset - the exact set of
//! fragments to read, what to extract from each, bundled into units of work
//! and prefixed by a process header the client uses to pre-allocate buffers
//! and reassemble out-of-order responses.
//!
//! Planning is synchronous and pure: no I/O, no shared state, one complete
//! taskset (or one typed error) per call.
//!
//! # Example
//!
//! ```rust
//! use cubeplan::mkschedule;
//!
//! # fn main() -> Result<(), cubeplan::PlanError> {
//! let doc = serde_json::json!({
//!     "pid": "request-1",
//!     "function": "slice",
//!     "manifest": {
//!         "format-version": 1,
//!         "line-labels": ["Inline", "Crossline", "Depth"],
//!         "line-numbers": [[100, 101], [200, 201], [0, 4]],
//!         "fragment-xs": 2,
//!         "fragment-ys": 2,
//!         "fragment-zs": 2
//!     },
//!     "attributes": [],
//!     "dim": 0,
//!     "idx": 1
//! });
//!
//! let taskset = mkschedule(&serde_json::to_vec(&doc)?, 10)?;
//! assert_eq!(taskset.count(), 2); // one bundle + the header envelope
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod geometry;
pub mod messages;
pub mod plan;

// Re-exports
pub use error::{PlanError, Result};
pub use geometry::{CubePoint, FragmentId, FragmentShape, Geometry};
pub use messages::{
    AttributeDesc, CurtainQuery, CurtainTask, Function, Manifest, Pack, ProcessHeader, Single,
    SliceQuery, SliceTask,
};
pub use plan::{mkschedule, partition, Schedule, TaskPartition, Taskset};

/// Version of the planner
pub const CUBEPLAN_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!CUBEPLAN_VERSION.is_empty());
    }
}
