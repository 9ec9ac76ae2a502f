//! End-to-end tests for the scheduling driver
//!
//! These run full query documents through `mkschedule` and decode the
//! resulting taskset the way a dispatcher and client would: records in
//! order, each null-terminated, with the header envelope last.

use cubeplan::{mkschedule, CurtainTask, FragmentId, PlanError, ProcessHeader, SliceTask};
use serde_json::json;
use std::io::{Cursor, Read};

fn slice_doc() -> serde_json::Value {
    json!({
        "pid": "req-slice",
        "guid": "survey-0",
        "storage-endpoint": "https://acc.blob.example",
        "function": "slice",
        "manifest": {
            "format-version": 1,
            "line-labels": ["Inline", "Crossline", "Depth"],
            "line-numbers": [[0, 1, 2, 3], [10, 11, 12, 13], [0, 4, 8, 12]],
            "fragment-xs": 2,
            "fragment-ys": 2,
            "fragment-zs": 2
        },
        "attributes": [],
        "dim": 0,
        "idx": 3
    })
}

fn curtain_doc() -> serde_json::Value {
    json!({
        "pid": "req-curtain",
        "function": "curtain",
        "manifest": {
            "format-version": 1,
            "line-labels": ["Inline", "Crossline", "Depth"],
            "line-numbers": [
                [0, 1, 2, 3, 4, 5, 6, 7],
                [10, 11, 12, 13, 14, 15, 16, 17],
                [0, 4, 8, 12]
            ],
            "fragment-xs": 4,
            "fragment-ys": 4,
            "fragment-zs": 2
        },
        "attributes": [],
        "dim0s": [1, 5],
        "dim1s": [1, 1]
    })
}

fn plan(doc: &serde_json::Value, task_size: i64) -> cubeplan::Taskset {
    mkschedule(&serde_json::to_vec(doc).unwrap(), task_size).unwrap()
}

fn read_delimiter(cursor: &mut Cursor<&[u8]>) {
    let mut byte = [0u8; 1];
    cursor.read_exact(&mut byte).unwrap();
    assert_eq!(byte[0], 0, "record must be null-terminated");
}

/// Decode the envelope record and check the taskset is fully consumed
fn read_envelope(cursor: &mut Cursor<&[u8]>, blob_len: usize) -> (ProcessHeader, u32) {
    assert_eq!(rmp::decode::read_array_len(cursor).unwrap(), 2);
    let head: ProcessHeader = rmp_serde::decode::from_read(&mut *cursor).unwrap();
    // the trailing array tag is sized but carries no elements; bundles
    // stream in behind it on the wire
    let slots = rmp::decode::read_array_len(cursor).unwrap();
    read_delimiter(cursor);
    assert_eq!(cursor.position() as usize, blob_len);
    (head, slots)
}

#[test]
fn test_slice_taskset_roundtrip() {
    let taskset = plan(&slice_doc(), 10);
    // one bundle plus the header envelope
    assert_eq!(taskset.count(), 2);

    let bytes = taskset.as_bytes();
    let mut cursor = Cursor::new(bytes);

    let task: SliceTask = rmp_serde::decode::from_read(&mut cursor).unwrap();
    read_delimiter(&mut cursor);
    assert_eq!(task.pid, "req-slice");
    assert_eq!(task.guid, "survey-0");
    assert_eq!(task.storage_endpoint, "https://acc.blob.example");
    assert_eq!(task.attribute, "data");
    assert_eq!(task.cube_shape, [4, 4, 4]);
    assert_eq!(task.shape, [2, 2, 2]);
    assert_eq!(task.dim, 0);
    assert_eq!(task.idx, 1);
    assert_eq!(
        task.ids,
        vec![
            FragmentId::new(1, 0, 0),
            FragmentId::new(1, 0, 1),
            FragmentId::new(1, 1, 0),
            FragmentId::new(1, 1, 1),
        ]
    );

    let (head, slots) = read_envelope(&mut cursor, bytes.len());
    assert_eq!(head.pid, "req-slice");
    assert_eq!(head.nbundles, 1);
    assert_eq!(slots, 1);
    assert_eq!(head.attributes, vec!["data"]);
    assert_eq!(head.index, vec![1, 4, 4, 3, 10, 11, 12, 13, 0, 4, 8, 12]);
    assert_eq!(head.shapes, vec![3, 1, 4, 4]);
}

#[test]
fn test_slice_partitioning_windows() {
    // the dim-0 face of a (4, 2, 10) cube in 2-cubed fragments has
    // 1 * 5 = 5 fragments; task_size 2 splits them 2/2/1
    let doc = json!({
        "pid": "req-windows",
        "function": "slice",
        "manifest": {
            "format-version": 1,
            "line-labels": ["Inline", "Crossline", "Depth"],
            "line-numbers": [
                [0, 1, 2, 3],
                [10, 11],
                [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]
            ],
            "fragment-xs": 2,
            "fragment-ys": 2,
            "fragment-zs": 2
        },
        "attributes": [],
        "dim": 0,
        "idx": 0
    });

    let taskset = plan(&doc, 2);
    assert_eq!(taskset.count(), 4); // 3 bundles + envelope

    let bytes = taskset.as_bytes();
    let mut cursor = Cursor::new(bytes);

    let mut ids = Vec::new();
    let mut window_sizes = Vec::new();
    for _ in 0..3 {
        let task: SliceTask = rmp_serde::decode::from_read(&mut cursor).unwrap();
        read_delimiter(&mut cursor);
        window_sizes.push(task.ids.len());
        ids.extend(task.ids);
    }
    assert_eq!(window_sizes, vec![2, 2, 1]);

    // concatenated windows reproduce the full face in order
    let expected: Vec<_> = (0..5).map(|k| FragmentId::new(0, 0, k)).collect();
    assert_eq!(ids, expected);

    let (head, slots) = read_envelope(&mut cursor, bytes.len());
    assert_eq!(head.nbundles, 3);
    assert_eq!(slots, 3);
}

#[test]
fn test_slice_with_cdp_expansion() {
    let mut doc = slice_doc();
    doc["manifest"]["attr"] = json!([
        {
            "type": "cdpx",
            "line-numbers": [[0, 1, 2, 3], [10, 11, 12, 13], [0]],
            "fragment-xs": 2,
            "fragment-ys": 2,
            "fragment-zs": 1
        },
        {
            "type": "cdpy",
            "line-numbers": [[0, 1, 2, 3], [10, 11, 12, 13], [0]],
            "fragment-xs": 2,
            "fragment-ys": 2,
            "fragment-zs": 1
        }
    ]);
    doc["attributes"] = json!(["cdp"]);

    let taskset = plan(&doc, 10);
    let bytes = taskset.as_bytes();
    let mut cursor = Cursor::new(bytes);

    let mut attributes = Vec::new();
    for _ in 0..taskset.count() - 1 {
        let task: SliceTask = rmp_serde::decode::from_read(&mut cursor).unwrap();
        read_delimiter(&mut cursor);
        attributes.push(task.attribute);
    }
    assert_eq!(attributes, vec!["data", "cdpx", "cdpy"]);

    let (head, _) = read_envelope(&mut cursor, bytes.len());
    assert_eq!(head.nbundles, 3);
    assert_eq!(head.attributes, vec!["data", "cdpx", "cdpy"]);
}

#[test]
fn test_curtain_taskset_roundtrip() {
    let taskset = plan(&curtain_doc(), 3);
    // 4 singles split 3/1, plus the envelope
    assert_eq!(taskset.count(), 3);

    let bytes = taskset.as_bytes();
    let mut cursor = Cursor::new(bytes);

    let mut singles = Vec::new();
    for _ in 0..2 {
        let task: CurtainTask = rmp_serde::decode::from_read(&mut cursor).unwrap();
        read_delimiter(&mut cursor);
        assert_eq!(task.pid, "req-curtain");
        assert_eq!(task.attribute, "data");
        singles.extend(task.singles);
    }

    let ids: Vec<_> = singles.iter().map(|s| s.id).collect();
    assert_eq!(
        ids,
        vec![
            FragmentId::new(0, 0, 0),
            FragmentId::new(0, 0, 1),
            FragmentId::new(1, 0, 0),
            FragmentId::new(1, 0, 1),
        ]
    );
    for single in &singles {
        assert_eq!(single.coordinates, vec![[1, 1]]);
    }
    assert_eq!(singles[0].offset, 0);
    assert_eq!(singles[2].offset, 1);

    let (head, slots) = read_envelope(&mut cursor, bytes.len());
    assert_eq!(head.nbundles, 2);
    assert_eq!(slots, 2);
    assert_eq!(head.index, vec![2, 2, 4, 1, 5, 11, 11, 0, 4, 8, 12]);
    assert_eq!(head.shapes, vec![2, 2, 4]);
}

#[test]
fn test_zero_task_size_is_a_logic_error() {
    let doc = serde_json::to_vec(&slice_doc()).unwrap();
    assert!(matches!(mkschedule(&doc, 0), Err(PlanError::Logic(_))));
}

#[test]
fn test_unsupported_format_version() {
    let mut doc = slice_doc();
    doc["manifest"]["format-version"] = json!(2);
    let doc = serde_json::to_vec(&doc).unwrap();
    assert!(matches!(
        mkschedule(&doc, 10),
        Err(PlanError::BadDocument(_))
    ));
}

#[test]
fn test_unknown_function() {
    let mut doc = slice_doc();
    doc["function"] = json!("horizon");
    let doc = serde_json::to_vec(&doc).unwrap();
    assert!(matches!(
        mkschedule(&doc, 10),
        Err(PlanError::UnknownFunction(_))
    ));
}

#[test]
fn test_unparsable_document() {
    assert!(matches!(
        mkschedule(b"not json at all", 10),
        Err(PlanError::BadDocument(_))
    ));
}

#[test]
fn test_missing_shape_fields() {
    let mut doc = slice_doc();
    doc.as_object_mut().unwrap().remove("idx");
    let doc = serde_json::to_vec(&doc).unwrap();
    assert!(matches!(
        mkschedule(&doc, 10),
        Err(PlanError::BadDocument(_))
    ));
}
