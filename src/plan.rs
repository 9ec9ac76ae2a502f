//! Query scheduling - plan, partition, and pack fragment jobs
//!
//! Scheduling here means turning one incoming query document into a
//! complete set of work descriptions:
//!
//! 1. decode the request and its manifest
//! 2. build all fragment-jobs (fragment ID + what to extract from it)
//! 3. split the jobs into fixed-size units of work
//! 4. describe the output shape in a process header for client assembly
//!
//! Sending the work to worker nodes is outside this scope. The high-level
//! algorithm is independent of the query shape, so the driver is generic
//! over the [`Schedule`] capability set and each shape (slice, curtain)
//! implements only planning and header building.

use crate::error::{PlanError, Result};
use crate::geometry::FragmentId;
use crate::messages::{
    CurtainQuery, CurtainTask, Function, Manifest, Pack, ProcessHeader, Single, SliceQuery,
    SliceTask,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// The scheduler's output blob
///
/// The layout is `bundle_0 \0 bundle_1 \0 ... bundle_{N-1} \0 envelope \0`:
/// every record is followed by a single null byte, the last record being
/// the header envelope. Packed records may themselves contain null bytes,
/// so the record count is tracked alongside the bytes rather than recovered
/// by scanning for delimiters.
#[derive(Debug, Default)]
pub struct Taskset {
    packed: Vec<u8>,
    tasks: usize,
}

impl Taskset {
    /// Append one packed record and its terminating null byte
    pub fn append(&mut self, record: &[u8]) {
        self.packed.extend_from_slice(record);
        self.packed.push(0);
        self.tasks += 1;
    }

    /// Number of records appended so far
    pub fn count(&self) -> usize {
        self.tasks
    }

    /// Size of the blob in bytes
    pub fn len(&self) -> usize {
        self.packed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    /// Borrow the packed blob
    pub fn as_bytes(&self) -> &[u8] {
        &self.packed
    }

    /// Take ownership of the packed blob
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.packed)
    }
}

/// Fragment-jobs that can be split into fixed-size bundles
///
/// The partitioner windows the job's primary list in place and packs the
/// whole job once per window, so every bundle is self-contained.
pub trait TaskPartition: Pack {
    type Unit: Clone;

    fn units(&mut self) -> &mut Vec<Self::Unit>;
}

impl TaskPartition for SliceTask {
    type Unit = FragmentId;

    fn units(&mut self) -> &mut Vec<FragmentId> {
        &mut self.ids
    }
}

impl TaskPartition for CurtainTask {
    type Unit = Single;

    fn units(&mut self) -> &mut Vec<Single> {
        &mut self.singles
    }
}

/// The capability set a query shape implements to drive the shared
/// scheduler: decode (via serde), plan, and header building
pub trait Schedule: DeserializeOwned {
    type Job: TaskPartition;

    fn manifest(&self) -> &Manifest;
    fn attributes(&self) -> &[String];
    fn set_attributes(&mut self, attributes: Vec<String>);

    /// Build the fragment-jobs for this query: the data job first, then one
    /// job per requested attribute the manifest declares
    fn build(&self) -> Vec<Self::Job>;

    /// Build the process header, given the number of bundles the plan was
    /// partitioned into
    fn header(&self, nbundles: usize) -> ProcessHeader;
}

/// Expand shorthand attribute names and make the list sorted-unique
///
/// `cdp` means the pair `cdpx`, `cdpy`. Names the manifest does not declare
/// survive normalization; planners drop them later.
fn normalized_attributes(attributes: &[String]) -> Vec<String> {
    let mut attrs = Vec::with_capacity(attributes.len() * 2);
    for attr in attributes {
        if attr == "cdp" {
            attrs.push("cdpx".to_string());
            attrs.push("cdpy".to_string());
        } else {
            attrs.push(attr.clone());
        }
    }

    attrs.sort();
    attrs.dedup();
    attrs
}

/// Number of task-size'd bundles needed to process `jobs` units
fn task_count(jobs: usize, task_size: usize) -> Result<usize> {
    let count = jobs
        .checked_add(task_size - 1)
        .map(|padded| padded / task_size)
        .unwrap_or(0);

    if count == 0 {
        return Err(PlanError::Logic(
            "task-count <= 0; probably integer overflow".to_string(),
        ));
    }

    Ok(count)
}

/// Partition jobs in place into bundles of at most `task_size` units each
///
/// Bundles are appended to the taskset in job order, each terminated by a
/// null byte. Concatenating the unit windows of one job's bundles
/// reproduces the job's original unit list.
pub fn partition<T: TaskPartition>(jobs: &mut [T], task_size: i64) -> Result<Taskset> {
    if task_size < 1 {
        return Err(PlanError::Logic(format!("task_size (= {}) < 1", task_size)));
    }
    let task_size = task_size as usize;

    let mut partitioned = Taskset::default();
    for job in jobs.iter_mut() {
        let units = std::mem::take(job.units());
        task_count(units.len(), task_size)?;

        for window in units.chunks(task_size) {
            *job.units() = window.to_vec();
            partitioned.append(&job.pack()?);
        }
    }

    Ok(partitioned)
}

/// Wrap a packed header in the response envelope
///
/// The response message as a whole must be one valid MessagePack value, not
/// a by-convention concatenation, so that clients can either buffer and
/// parse it in one go or stream it:
///
/// ```text
/// [header, [bundle_1, bundle_2, ...]]
/// ```
///
/// which in bytes is `array(2) header array(n) bundle_1 bundle_2 ...`.
/// Only the array tags around the header are produced here; the trailing
/// `array(n)` tag carries no elements, and streaming readers allocate
/// exactly `n` slots from the tag alone, filling them as bundles arrive.
fn pack_with_envelope(head: &ProcessHeader) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2)?;
    buf.extend_from_slice(&head.pack()?);
    rmp::encode::write_array_len(&mut buf, head.nbundles as u32)?;
    Ok(buf)
}

impl Schedule for SliceQuery {
    type Job = SliceTask;

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }

    fn set_attributes(&mut self, attributes: Vec<String>) {
        self.attributes = attributes;
    }

    fn build(&self) -> Vec<SliceTask> {
        let mut tasks = Vec::with_capacity(self.attributes.len() + 1);

        let gvt = self.manifest.geometry();
        let mut task = SliceTask::new(self);
        task.idx = gvt.fragment_shape().index(self.dim, self.idx);
        task.ids = gvt.slice(self.dim, self.idx);
        tasks.push(task);

        for attr in &self.attributes {
            // Queries commonly request attributes that aren't recorded for
            // a survey - silently drop them
            let Some(desc) = self.manifest.attribute(attr) else {
                continue;
            };

            let mut task = SliceTask::for_attribute(self, desc);
            let gvt = desc.geometry();
            // Attributes are 2D surfaces (depth = 1) stored as 3D volumes.
            // A z-slice index is almost never 0, the only valid z-index on
            // the surface; the modulus folds it back onto the grid and is a
            // no-op along any in-range dimension.
            let idx = self.idx % gvt.cube_shape()[self.dim];
            task.idx = gvt.fragment_shape().index(self.dim, idx);
            task.ids = gvt.slice(self.dim, idx);
            tasks.push(task);
        }

        tasks
    }

    fn header(&self, nbundles: usize) -> ProcessHeader {
        let mdims = &self.manifest.line_numbers;
        let ndims = mdims.len();

        // The queried direction is included in the index, collapsed to a
        // single entry, so clients can infer what line was queried and the
        // direction of the output.
        let mut index = Vec::with_capacity(ndims + mdims.iter().map(Vec::len).sum::<usize>());
        for (i, lines) in mdims.iter().enumerate() {
            index.push(if i == self.dim { 1 } else { lines.len() as i64 });
        }
        for (i, lines) in mdims.iter().enumerate() {
            if i == self.dim {
                index.push(lines[self.idx]);
            } else {
                index.extend_from_slice(lines);
            }
        }

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        attributes.push("data".to_string());
        attributes.extend(self.attributes.iter().cloned());

        // The 'data' shape matches the index sizes, with a 1 along the
        // queried direction; squeezing that axis is left to clients.
        let mut shapes = Vec::with_capacity((ndims + 1) * attributes.len());
        shapes.push(ndims as i64);
        shapes.extend_from_slice(&index[..ndims]);

        for _ in &self.attributes {
            // Vertical queries make attributes one value per trace; depth
            // slices make them a field. Both collapse the last axis:
            //
            // dim0: [1, N, M] -> [1, N, 1]
            // dim1: [N, 1, M] -> [N, 1, 1]
            // dim2: [N, M, 1] -> [N, M, 1]
            shapes.push(ndims as i64);
            shapes.extend_from_slice(&index[..ndims - 1]);
            shapes.push(1);
        }

        ProcessHeader {
            pid: self.pid.clone(),
            function: Function::Slice,
            nbundles,
            ndims,
            index,
            labels: self.manifest.line_labels.clone(),
            attributes,
            shapes,
        }
    }
}

impl CurtainQuery {
    /// The cube point at the top of column `i`
    ///
    /// The query carries the curtain intersections as parallel arrays
    /// `dim0s`/`dim1s`; element i denotes the column through
    /// `(dim0s[i], dim1s[i], 0)`. The top point identifies the containing
    /// fragment and its z-axis column.
    fn top_cubepoint(&self, i: usize) -> [usize; 3] {
        [self.dim0s[i], self.dim1s[i], 0]
    }
}

impl Schedule for CurtainQuery {
    type Job = CurtainTask;

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }

    fn set_attributes(&mut self, attributes: Vec<String>) {
        self.attributes = attributes;
    }

    fn build(&self) -> Vec<CurtainTask> {
        let mut tasks = Vec::with_capacity(self.attributes.len() + 1);

        let gvt = self.manifest.geometry();
        let zfrags = gvt.fragment_count(2);

        // Guess the number of coordinates per fragment: a plane going
        // through it, with a little margin. The buffers are short-lived, so
        // overshooting slightly is fine.
        let fragment_shape = gvt.fragment_shape();
        let approx_coordinates_per_fragment =
            (fragment_shape.get(0).max(fragment_shape.get(1)) as f64 * 1.2) as usize;

        let mut task = CurtainTask::new(self);

        // Pre-allocate the bins by scanning the input once. Every fragment
        // in the z-column is generated from the x-y pair, so this is
        //
        //   ids = set(frag_id(x, y, z) for z in zheight for (x, y) in input)
        //
        // without the intermediate structures. The bin list stays sorted
        // lexicographically by fragment ID throughout.
        for i in 0..self.dim0s.len() {
            let top = self.top_cubepoint(i);
            let fid = gvt.frag_id(top);

            if let Err(pos) = task.singles.binary_search_by(|s| s.id.cmp(&fid)) {
                for z in 0..zfrags {
                    task.singles.insert(
                        pos + z,
                        Single {
                            id: FragmentId::new(fid.get(0), fid.get(1), z),
                            coordinates: Vec::with_capacity(approx_coordinates_per_fragment),
                            offset: i,
                        },
                    );
                }
            }
        }

        // Traverse the x/y pairs again and put the fragment-local
        // coordinates in the right bins. Every fragment in the z-column
        // extracts the same x/y position.
        for i in 0..self.dim0s.len() {
            let top = self.top_cubepoint(i);
            let fid = gvt.frag_id(top);
            let local = gvt.to_local(top);

            let pos = task
                .singles
                .binary_search_by(|s| s.id.cmp(&fid))
                .unwrap_or_else(|pos| pos);
            for single in &mut task.singles[pos..pos + zfrags] {
                single.coordinates.push([local[0], local[1]]);
            }
        }

        tasks.push(task);

        for attr in &self.attributes {
            // Queries commonly request attributes that aren't recorded for
            // a survey - silently drop them
            let Some(desc) = self.manifest.attribute(attr) else {
                continue;
            };

            // Attributes may be partitioned differently, so each needs a
            // fresh geometry. They are depth-1, which collapses the
            // z-column to a single bin per x-y fragment.
            let gvt = desc.geometry();
            let mut task = CurtainTask::for_attribute(self, desc);

            for i in 0..self.dim0s.len() {
                let top = self.top_cubepoint(i);
                let fid = gvt.frag_id(top);
                let local = gvt.to_local(top);

                let pos = match task.singles.binary_search_by(|s| s.id.cmp(&fid)) {
                    Ok(pos) => pos,
                    Err(pos) => {
                        task.singles.insert(
                            pos,
                            Single {
                                id: fid,
                                coordinates: Vec::new(),
                                offset: i,
                            },
                        );
                        pos
                    }
                };
                task.singles[pos].coordinates.push([local[0], local[1]]);
            }

            tasks.push(task);
        }

        tasks
    }

    fn header(&self, nbundles: usize) -> ProcessHeader {
        let mdims = &self.manifest.line_numbers;
        let zlines = &mdims[2];

        let mut index = Vec::with_capacity(3 + self.dim0s.len() + self.dim1s.len() + zlines.len());
        index.push(self.dim0s.len() as i64);
        index.push(self.dim1s.len() as i64);
        index.push(zlines.len() as i64);

        for &x in &self.dim0s {
            index.push(mdims[0][x]);
        }
        for &y in &self.dim1s {
            index.push(mdims[1][y]);
        }
        index.extend_from_slice(zlines);

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        attributes.push("data".to_string());
        attributes.extend(self.attributes.iter().cloned());

        // The curtain only queries vertically, which constrains the output
        // shapes: data is a (traces, depth) field and attributes are always
        // one value per trace
        let mut shapes = vec![2, index[1], index[2]];
        for _ in &self.attributes {
            shapes.push(1);
            shapes.push(index[0]);
        }

        ProcessHeader {
            pid: self.pid.clone(),
            function: Function::Curtain,
            nbundles,
            ndims: mdims.len(),
            index,
            labels: self.manifest.line_labels.clone(),
            attributes,
            shapes,
        }
    }
}

/// Run the full pipeline for one decoded query shape
fn schedule<Q: Schedule>(doc: &[u8], task_size: i64) -> Result<Taskset> {
    let mut query: Q = serde_json::from_slice(doc)?;
    query.manifest().validate()?;
    let attributes = normalized_attributes(query.attributes());
    query.set_attributes(attributes);

    let mut jobs = query.build();
    let njobs = jobs.len();
    let mut sched = partition(&mut jobs, task_size)?;

    let nbundles = sched.count();
    tracing::debug!(jobs = njobs, bundles = nbundles, "partitioned query");

    let head = query.header(nbundles);
    sched.append(&pack_with_envelope(&head)?);
    Ok(sched)
}

/// Plan one query document into a taskset
///
/// This is the driver: parse the document, gate on the manifest
/// format-version, dispatch on the `function` tag, and run the matching
/// pipeline. Either a complete taskset comes back or a typed error;
/// partial output is never observable.
pub fn mkschedule(doc: &[u8], task_size: i64) -> Result<Taskset> {
    let document: serde_json::Value = serde_json::from_slice(doc)?;

    // Only format-version 1 exists so far. Checking it here leaves room to
    // dispatch to different query-builder routines per version as storage
    // migrates between representations.
    let version = document
        .get("manifest")
        .and_then(|manifest| manifest.get("format-version"))
        .ok_or_else(|| PlanError::BadDocument("missing manifest.format-version".to_string()))?;
    if version.as_i64() != Some(Manifest::FORMAT_VERSION) {
        return Err(PlanError::BadDocument(format!(
            "unsupported format-version; expected {}, was {}",
            Manifest::FORMAT_VERSION,
            version
        )));
    }

    let function = document
        .get("function")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| PlanError::BadDocument("missing function".to_string()))?;

    tracing::debug!(function, task_size, "scheduling query");
    match function {
        "slice" => schedule::<SliceQuery>(doc, task_size),
        "curtain" => schedule::<CurtainQuery>(doc, task_size),
        other => Err(PlanError::UnknownFunction(format!(
            "no handler for function {}",
            other
        ))),
    }
}
