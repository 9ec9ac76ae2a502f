//! Query, task, and header messages
//!
//! The JSON query document decodes into a `*Query`, planners turn queries
//! into `*Task` fragment-jobs, and the partitioner packs those jobs to
//! MessagePack for worker dispatch. The `ProcessHeader` closes the loop: it
//! tells the client what shape the reassembled result has before any worker
//! output arrives.

use crate::error::{PlanError, Result};
use crate::geometry::{FragmentId, FragmentShape, Geometry};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Query shape tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Function {
    Slice,
    Curtain,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Slice => write!(f, "slice"),
            Function::Curtain => write!(f, "curtain"),
        }
    }
}

/// Descriptor for an auxiliary attribute surface, e.g. CDP coordinates
///
/// Attributes are 2-D surfaces stored as depth-1 volumes, and may be
/// partitioned differently from the data cube, so each carries its own line
/// numbers and fragment shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDesc {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "line-numbers")]
    pub line_numbers: Vec<Vec<i64>>,

    #[serde(rename = "fragment-xs")]
    pub fragment_xs: usize,

    #[serde(rename = "fragment-ys")]
    pub fragment_ys: usize,

    #[serde(rename = "fragment-zs")]
    pub fragment_zs: usize,
}

impl AttributeDesc {
    /// Samples per axis of the attribute volume
    pub fn cube_shape(&self) -> [usize; 3] {
        [
            self.line_numbers[0].len(),
            self.line_numbers[1].len(),
            self.line_numbers[2].len(),
        ]
    }

    /// The attribute's fragment shape
    pub fn fragment_shape(&self) -> FragmentShape {
        FragmentShape::new([self.fragment_xs, self.fragment_ys, self.fragment_zs])
    }

    /// Geometry for this attribute's partitioning
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.cube_shape(), self.fragment_shape())
    }
}

/// Decoded survey manifest
///
/// Line-number lists are dense indexings: the i-th entry is the line number
/// at cube-index i along that axis, so the cube shape falls out of the list
/// lengths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "format-version")]
    pub format_version: i64,

    #[serde(rename = "line-labels")]
    pub line_labels: Vec<String>,

    #[serde(rename = "line-numbers")]
    pub line_numbers: Vec<Vec<i64>>,

    #[serde(rename = "fragment-xs")]
    pub fragment_xs: usize,

    #[serde(rename = "fragment-ys")]
    pub fragment_ys: usize,

    #[serde(rename = "fragment-zs")]
    pub fragment_zs: usize,

    #[serde(default)]
    pub attr: Vec<AttributeDesc>,
}

impl Manifest {
    /// The only manifest revision this planner understands
    pub const FORMAT_VERSION: i64 = 1;

    /// Check structural invariants the serde layer cannot express
    ///
    /// Planning assumes three axes and positive fragment extents; a manifest
    /// violating either is a bad document, not a planner bug.
    pub fn validate(&self) -> Result<()> {
        if self.line_labels.len() != 3 || self.line_numbers.len() != 3 {
            return Err(PlanError::BadDocument(
                "manifest must describe exactly three axes".to_string(),
            ));
        }

        let fragment_dims = [self.fragment_xs, self.fragment_ys, self.fragment_zs];
        if fragment_dims.iter().any(|&d| d == 0) {
            return Err(PlanError::BadDocument(
                "manifest fragment dimensions must be positive".to_string(),
            ));
        }

        for attr in &self.attr {
            if attr.line_numbers.len() != 3 {
                return Err(PlanError::BadDocument(format!(
                    "attribute {} must describe exactly three axes",
                    attr.kind
                )));
            }
            if attr.fragment_xs == 0 || attr.fragment_ys == 0 || attr.fragment_zs == 0 {
                return Err(PlanError::BadDocument(format!(
                    "attribute {} fragment dimensions must be positive",
                    attr.kind
                )));
            }
        }

        Ok(())
    }

    /// Samples per axis of the data cube
    pub fn cube_shape(&self) -> [usize; 3] {
        [
            self.line_numbers[0].len(),
            self.line_numbers[1].len(),
            self.line_numbers[2].len(),
        ]
    }

    /// The data cube's fragment shape
    pub fn fragment_shape(&self) -> FragmentShape {
        FragmentShape::new([self.fragment_xs, self.fragment_ys, self.fragment_zs])
    }

    /// Geometry for the data cube's partitioning
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.cube_shape(), self.fragment_shape())
    }

    /// Look up an attribute descriptor by type
    pub fn attribute(&self, kind: &str) -> Option<&AttributeDesc> {
        self.attr.iter().find(|desc| desc.kind == kind)
    }
}

/// A slice request: one full 2-D face of the cube, orthogonal to `dim`
#[derive(Debug, Clone, Deserialize)]
pub struct SliceQuery {
    pub pid: String,

    #[serde(default)]
    pub guid: String,

    #[serde(rename = "storage-endpoint", default)]
    pub storage_endpoint: String,

    pub manifest: Manifest,

    #[serde(default)]
    pub attributes: Vec<String>,

    /// The axis the slice is orthogonal to
    pub dim: usize,

    /// Index along that axis, in cube coordinates
    pub idx: usize,
}

/// A curtain request: a vertical sheet through the cube, one column per
/// `(dim0s[i], dim1s[i])` pair
#[derive(Debug, Clone, Deserialize)]
pub struct CurtainQuery {
    pub pid: String,

    #[serde(default)]
    pub guid: String,

    #[serde(rename = "storage-endpoint", default)]
    pub storage_endpoint: String,

    pub manifest: Manifest,

    #[serde(default)]
    pub attributes: Vec<String>,

    pub dim0s: Vec<usize>,
    pub dim1s: Vec<usize>,
}

/// Messages with a packed binary form
///
/// Bundles and headers are packed as MessagePack maps of named fields, so a
/// worker or client can decode them without out-of-band schema knowledge.
pub trait Pack: Serialize {
    fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut serializer = rmp_serde::Serializer::new(&mut buf).with_struct_map();
        self.serialize(&mut serializer)?;
        Ok(buf)
    }
}

/// One slice fragment-job: every fragment on the queried face of a single
/// volume (the data cube, or one attribute surface)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceTask {
    pub pid: String,
    pub guid: String,

    #[serde(rename = "storage-endpoint")]
    pub storage_endpoint: String,

    pub function: Function,

    /// `"data"` for the main cube, else the attribute type
    pub attribute: String,

    #[serde(rename = "cube-shape")]
    pub cube_shape: [usize; 3],

    /// Fragment shape of the target volume
    pub shape: [usize; 3],

    pub dim: usize,

    /// Fragment-local index along `dim`
    pub idx: usize,

    pub ids: Vec<FragmentId>,
}

impl SliceTask {
    /// Start a job against the data cube. Geometry fields (`idx`, `ids`) are
    /// filled in by the planner
    pub fn new(query: &SliceQuery) -> Self {
        Self {
            pid: query.pid.clone(),
            guid: query.guid.clone(),
            storage_endpoint: query.storage_endpoint.clone(),
            function: Function::Slice,
            attribute: "data".to_string(),
            cube_shape: query.manifest.cube_shape(),
            shape: *query.manifest.fragment_shape().dims(),
            dim: query.dim,
            idx: 0,
            ids: Vec::new(),
        }
    }

    /// Start a job against an attribute surface
    pub fn for_attribute(query: &SliceQuery, desc: &AttributeDesc) -> Self {
        Self {
            pid: query.pid.clone(),
            guid: query.guid.clone(),
            storage_endpoint: query.storage_endpoint.clone(),
            function: Function::Slice,
            attribute: desc.kind.clone(),
            cube_shape: desc.cube_shape(),
            shape: *desc.fragment_shape().dims(),
            dim: query.dim,
            idx: 0,
            ids: Vec::new(),
        }
    }
}

impl Pack for SliceTask {}

/// The per-fragment unit of a curtain job
///
/// `coordinates` are fragment-local x/y pairs, one per input trace that
/// falls in this fragment's footprint. `offset` is the input-array index at
/// which the fragment was first touched; assembly uses it to place the
/// fragment's traces in the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Single {
    pub id: FragmentId,
    pub coordinates: Vec<[usize; 2]>,
    pub offset: usize,
}

/// One curtain fragment-job against a single volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurtainTask {
    pub pid: String,
    pub guid: String,

    #[serde(rename = "storage-endpoint")]
    pub storage_endpoint: String,

    pub function: Function,
    pub attribute: String,

    #[serde(rename = "cube-shape")]
    pub cube_shape: [usize; 3],

    pub shape: [usize; 3],

    pub singles: Vec<Single>,
}

impl CurtainTask {
    /// Start a job against the data cube
    pub fn new(query: &CurtainQuery) -> Self {
        Self {
            pid: query.pid.clone(),
            guid: query.guid.clone(),
            storage_endpoint: query.storage_endpoint.clone(),
            function: Function::Curtain,
            attribute: "data".to_string(),
            cube_shape: query.manifest.cube_shape(),
            shape: *query.manifest.fragment_shape().dims(),
            singles: Vec::new(),
        }
    }

    /// Start a job against an attribute surface
    pub fn for_attribute(query: &CurtainQuery, desc: &AttributeDesc) -> Self {
        Self {
            pid: query.pid.clone(),
            guid: query.guid.clone(),
            storage_endpoint: query.storage_endpoint.clone(),
            function: Function::Curtain,
            attribute: desc.kind.clone(),
            cube_shape: desc.cube_shape(),
            shape: *desc.fragment_shape().dims(),
            singles: Vec::new(),
        }
    }
}

impl Pack for CurtainTask {}

/// Metadata record describing the overall output shape for client assembly
///
/// The index is laid out linearly: the first `ndims` entries are the
/// per-axis sizes, followed by the per-axis index values (line numbers)
/// flattened in axis order. `shapes` concatenates `[rank, dims...]` per
/// entry in `attributes`, whose first element is always `"data"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHeader {
    pub pid: String,
    pub function: Function,
    pub nbundles: usize,
    pub ndims: usize,
    pub labels: Vec<String>,
    pub attributes: Vec<String>,
    pub index: Vec<i64>,
    pub shapes: Vec<i64>,
}

impl Pack for ProcessHeader {}
