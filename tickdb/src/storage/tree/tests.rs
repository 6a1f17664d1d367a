use std::collections::BTreeMap;
use std::path::Path;

use chrono::DateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{TempDir, tempdir};

use super::*;
use crate::storage::chunk::META_REGION_SIZE;
use crate::storage::point::Fields;
use crate::storage::rollup::summarize_points;

const SECOND: i64 = 1_000_000_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

fn ts(s: &str) -> i64 {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .timestamp_nanos_opt()
        .expect("in range")
}

fn open_fresh(path: &Path) -> Tree {
    Tree::create(ChunkFile::open(path).expect("open file")).expect("create tree")
}

fn reopen(path: &Path, root_position: u64) -> Tree {
    Tree::open(ChunkFile::open(path).expect("open file"), root_position).expect("open tree")
}

fn new_tree() -> (TempDir, Tree) {
    let dir = tempdir().expect("create temp dir");
    let tree = open_fresh(&dir.path().join("tree.tick"));
    (dir, tree)
}

fn point(timestamp: i64, value: f64) -> Point {
    Point::new(timestamp, Fields::from([("v".to_string(), value)]))
}

fn collect(tree: &Tree, node: &Node, out: &mut Vec<Point>) {
    match &node.body {
        NodeBody::Leaf(points) => out.extend(points.iter().cloned()),
        NodeBody::Interior(pointers) => {
            for pointer in pointers {
                let child = tree.child(pointer).expect("resolve child");
                collect(tree, &child, out);
            }
        }
    }
}

fn all_points(tree: &Tree) -> Vec<Point> {
    let mut out = Vec::new();
    let root = tree.root().expect("root");
    collect(tree, &root, &mut out);
    out
}

/// Check structural invariants below `node` and return its points.
fn verify(tree: &Tree, node: &Node) -> Vec<Point> {
    match &node.body {
        NodeBody::Leaf(points) => {
            assert!(node.dirty.is_none());
            assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            for p in points {
                assert!(node.can_hold(p.timestamp), "{} in {} leaf", p.timestamp, node.level);
            }
            points.clone()
        }
        NodeBody::Interior(pointers) => {
            assert!(!pointers.is_empty(), "empty interior at {}", node.level);
            assert!(pointers.windows(2).all(|w| w[0].key < w[1].key));

            let mut all = Vec::new();
            for (index, pointer) in pointers.iter().enumerate() {
                assert_eq!(truncate(pointer.key, node.level.child()), pointer.key);
                if node.dirty == Some(index) {
                    assert!(pointer.child.is_some());
                    assert_eq!(pointer.position, 0);
                } else {
                    assert!(pointer.position >= META_REGION_SIZE);
                }

                let child = tree.child(pointer).expect("resolve child");
                assert_eq!(child.level, node.level.child());
                let points = verify(tree, &child);
                assert!(!points.is_empty());
                for p in &points {
                    assert_eq!(truncate(p.timestamp, child.level), pointer.key);
                }
                assert_eq!(pointer.summary, summarize_points(&points));
                all.extend(points);
            }
            all
        }
    }
}

fn verify_tree(tree: &Tree) -> Vec<Point> {
    let root = tree.root().expect("root");
    let points = verify(tree, &root);
    assert_eq!(tree.summary(), &summarize_points(&points));
    points
}

#[test]
fn test_fresh_tree_is_empty_root_leaf() {
    let (_dir, tree) = new_tree();
    let root = tree.root().expect("root");
    assert!(root.is_leaf());
    assert!(root.is_empty());
    assert_eq!(root.level, Level::Root);
    assert_eq!(tree.root_position(), META_REGION_SIZE);
    assert!(!tree.is_modified());
}

#[test]
fn test_insert_builds_calendar_path() {
    let (_dir, mut tree) = new_tree();
    tree.insert(point(ts("2016-05-31T08:00:00Z"), 10.0)).expect("insert");
    tree.insert(point(ts("2016-05-31T08:03:00Z"), 12.0)).expect("insert");
    tree.insert(point(ts("2016-05-31T08:06:00Z"), 9.0)).expect("insert");

    // Root -> Year -> Month -> Day -> Hour leaf holding minute-exact points.
    let mut node = tree.root().expect("root");
    let mut levels = vec![node.level];
    while !node.is_leaf() {
        assert_eq!(node.len(), 1);
        let child = tree.child(&node.pointers()[0]).expect("child");
        node = child;
        levels.push(node.level);
    }
    assert_eq!(
        levels,
        vec![Level::Root, Level::Year, Level::Month, Level::Day, Level::Hour]
    );
    assert_eq!(node.len(), 3);

    let points = verify_tree(&tree);
    assert_eq!(points.len(), 3);
    assert_eq!(tree.summary()["v"].count, 3);
    assert!((tree.summary()["v"].sum - 31.0).abs() < f64::EPSILON);
}

#[test]
fn test_overwrite_replaces_point() {
    let (_dir, mut tree) = new_tree();
    let t = ts("2020-02-02T02:02:02Z");
    tree.insert(point(t, 1.0)).expect("insert");
    tree.insert(point(t, 7.0)).expect("overwrite");

    let points = verify_tree(&tree);
    assert_eq!(points, vec![point(t, 7.0)]);
    assert_eq!(tree.summary()["v"].count, 1);
}

#[test]
fn test_single_dirty_branch() {
    let (_dir, mut tree) = new_tree();
    tree.insert(point(ts("2016-05-30T10:00:00Z"), 1.0)).expect("insert");
    tree.insert(point(ts("2016-05-31T10:00:00Z"), 2.0)).expect("insert");

    // The month node has two day children; only the later one is dirty.
    let root = tree.root().expect("root");
    let year = tree.child(&root.pointers()[0]).expect("year");
    let month = tree.child(&year.pointers()[0]).expect("month");
    assert_eq!(month.len(), 2);
    assert_eq!(month.dirty, Some(1));
    assert!(month.pointers()[0].position >= META_REGION_SIZE);
    assert_eq!(month.pointers()[1].position, 0);

    verify_tree(&tree);
}

#[test]
fn test_rollup_extremes_across_children() {
    let (_dir, mut tree) = new_tree();
    let base = ts("2016-05-31T00:00:00Z");
    for (hour, value) in [(1, 5.0), (2, 9.0), (3, -4.0), (4, 12.0), (5, 0.0)] {
        tree.insert(point(base + hour * HOUR + MINUTE, value)).expect("insert");
    }

    let v = tree.summary()["v"];
    assert!((v.min + 4.0).abs() < f64::EPSILON);
    assert!((v.max - 12.0).abs() < f64::EPSILON);
    assert!((v.first - 5.0).abs() < f64::EPSILON);
    assert!((v.last - 0.0).abs() < f64::EPSILON);
    assert_eq!(v.count, 5);
    verify_tree(&tree);
}

#[test]
fn test_out_of_order_inserts_keep_first_and_last() {
    let (_dir, mut tree) = new_tree();
    let base = ts("2016-05-31T00:00:00Z");
    tree.insert(point(base + 3 * DAY + SECOND, 3.0)).expect("insert");
    tree.insert(point(base + SECOND, 1.0)).expect("insert");
    tree.insert(point(base + DAY + SECOND, 2.0)).expect("insert");

    let v = tree.summary()["v"];
    assert!((v.first - 1.0).abs() < f64::EPSILON);
    assert!((v.last - 3.0).abs() < f64::EPSILON);
    verify_tree(&tree);
}

#[test]
fn test_delete_is_half_open() {
    let (_dir, mut tree) = new_tree();
    let base = ts("2016-05-31T08:00:00Z");
    for minute in 0..10 {
        tree.insert(point(base + minute * MINUTE, 1.0)).expect("insert");
    }

    tree.delete(base + 3 * MINUTE, base + 7 * MINUTE).expect("delete");

    let remaining: Vec<i64> = verify_tree(&tree)
        .iter()
        .map(|p| (p.timestamp - base) / MINUTE)
        .collect();
    assert_eq!(remaining, vec![0, 1, 2, 7, 8, 9]);
}

#[test]
fn test_delete_across_days_trims_boundary_children() {
    let (_dir, mut tree) = new_tree();
    let base = ts("2016-05-01T00:00:00Z");
    let mut expected = Vec::new();
    for day in 0..5 {
        for hour in [1, 6, 12, 18] {
            let t = base + day * DAY + hour * HOUR + 30 * MINUTE;
            tree.insert(point(t, 1.0)).expect("insert");
            expected.push(t);
        }
    }

    // From the middle of day 1 to the middle of day 3.
    let from = base + DAY + 12 * HOUR + 30 * MINUTE;
    let to = base + 3 * DAY + 6 * HOUR + 30 * MINUTE;
    tree.delete(from, to).expect("delete");
    expected.retain(|t| *t < from || *t >= to);

    let remaining: Vec<i64> = verify_tree(&tree).iter().map(|p| p.timestamp).collect();
    assert_eq!(remaining, expected);
    assert_eq!(tree.summary()["v"].count, u16::try_from(expected.len()).expect("fits"));
}

#[test]
fn test_delete_on_bucket_boundaries_drops_whole_children() {
    let (_dir, mut tree) = new_tree();
    let base = ts("2016-05-01T00:00:00Z");
    for day in 0..4 {
        tree.insert(point(base + day * DAY + HOUR + SECOND, 1.0)).expect("insert");
    }

    tree.delete(base + DAY, base + 3 * DAY).expect("delete");

    let remaining: Vec<i64> = verify_tree(&tree)
        .iter()
        .map(|p| (p.timestamp - base) / DAY)
        .collect();
    assert_eq!(remaining, vec![0, 3]);
}

#[test]
fn test_delete_everything_resets_root() {
    let (_dir, mut tree) = new_tree();
    let t = ts("2016-05-31T08:03:00Z");
    tree.insert(point(t, 1.0)).expect("insert");
    let before = tree.resident_count();
    assert!(before > 1);

    tree.delete(t, t + 1).expect("delete");

    let root = tree.root().expect("root");
    assert!(root.is_leaf());
    assert!(root.is_empty());
    assert_eq!(root.level, Level::Root);
    assert!(tree.summary().is_empty());
    assert_eq!(tree.resident_count(), 1);
}

#[test]
fn test_delete_empty_or_inverted_range_is_noop() {
    let (_dir, mut tree) = new_tree();
    let t = ts("2016-05-31T08:03:00Z");
    tree.insert(point(t, 1.0)).expect("insert");
    tree.flush().expect("flush");

    tree.delete(t, t).expect("delete");
    tree.delete(t + 1, t).expect("delete");
    assert!(!tree.is_modified());
    assert_eq!(verify_tree(&tree).len(), 1);
}

#[test]
fn test_flush_and_reopen() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("tree.tick");
    let base = ts("2016-05-31T08:00:00Z");

    let root_position = {
        let mut tree = open_fresh(&path);
        for i in 0..50u32 {
            let offset = i64::from(i);
            tree.insert(point(base + offset * 7 * MINUTE + offset * SECOND, f64::from(i)))
                .expect("insert");
        }
        let position = tree.flush().expect("flush");
        assert!(!tree.is_modified());
        assert_eq!(tree.flush().expect("second flush"), position);
        position
    };

    let tree = reopen(&path, root_position);
    assert_eq!(tree.resident_count(), 1);
    let points = verify_tree(&tree);
    assert_eq!(points.len(), 50);
    assert!((points[49].fields["v"] - 49.0).abs() < f64::EPSILON);
}

#[test]
fn test_reader_pages_are_adopted_by_writer() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("tree.tick");
    let t = ts("2016-05-31T08:00:00Z");

    let root_position = {
        let mut tree = open_fresh(&path);
        tree.insert(point(t, 1.0)).expect("insert");
        tree.insert(point(t + MINUTE, 2.0)).expect("insert");
        tree.flush().expect("flush")
    };

    let mut tree = reopen(&path, root_position);
    {
        let root = tree.root().expect("root");
        let year = tree.child(&root.pointers()[0]).expect("year");
        assert!(matches!(year, NodeRef::Paged(_)));
    }
    assert_eq!(tree.resident_count(), 1);

    tree.insert(point(t + 2 * MINUTE, 3.0)).expect("insert");
    assert!(tree.resident_count() > 1);
    assert_eq!(verify_tree(&tree).len(), 3);
}

#[test]
fn test_corrupt_child_chunk_is_reported() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("tree.tick");
    let t = ts("2016-05-31T08:00:00Z");

    let (root_position, child_position) = {
        let mut tree = open_fresh(&path);
        tree.insert(point(t, 1.0)).expect("insert");
        let root_position = tree.flush().expect("flush");
        let child_position = tree.root().expect("root").pointers()[0].position;
        (root_position, child_position)
    };

    let mut raw = std::fs::read(&path).expect("read raw");
    let index = usize::try_from(child_position).expect("fits") + 10;
    raw[index] ^= 0xFF;
    std::fs::write(&path, raw).expect("write raw");

    let tree = reopen(&path, root_position);
    let root = tree.root().expect("root");
    let err = tree.child(&root.pointers()[0]).expect_err("corrupt child");
    assert!(err.is_corruption());
}

fn random_ts(rng: &mut StdRng) -> i64 {
    let base = ts("2015-11-01T00:00:00Z");
    let mut t = base + rng.random_range(0..500) * DAY;
    let depth = rng.random_range(0..7);
    if depth >= 1 {
        t += rng.random_range(0..3) * HOUR;
    }
    if depth >= 2 {
        t += rng.random_range(0..3) * MINUTE;
    }
    if depth >= 3 {
        t += rng.random_range(0..3) * SECOND;
    }
    if depth >= 4 {
        t += rng.random_range(0..3) * 1_000_000;
    }
    if depth >= 5 {
        t += rng.random_range(0..3) * 1_000;
    }
    if depth >= 6 {
        t += rng.random_range(0..3);
    }
    t
}

#[test]
fn test_random_operations_match_model() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("tree.tick");
    let mut rng = StdRng::seed_from_u64(0x71c4);
    let mut tree = open_fresh(&path);
    let mut model: BTreeMap<i64, f64> = BTreeMap::new();

    for step in 0..1500 {
        match rng.random_range(0..100) {
            0..70 => {
                let t = if !model.is_empty() && rng.random_bool(0.2) {
                    let index = rng.random_range(0..model.len());
                    *model.keys().nth(index).expect("key exists")
                } else {
                    random_ts(&mut rng)
                };
                let value = f64::from(rng.random_range(-50_i32..50));
                tree.insert(point(t, value)).expect("insert");
                model.insert(t, value);
            }
            70..85 => {
                let from = random_ts(&mut rng);
                let span = [0, 1, SECOND, MINUTE, HOUR, DAY, 40 * DAY, 400 * DAY]
                    [rng.random_range(0..8)];
                let to = if rng.random_bool(0.1) { from - span } else { from + span };
                tree.delete(from, to).expect("delete");
                model.retain(|t, _| *t < from || *t >= to);
            }
            85..95 => {
                tree.flush().expect("flush");
            }
            _ => {
                let root_position = tree.flush().expect("flush");
                drop(tree);
                tree = reopen(&path, root_position);
            }
        }

        if step % 25 == 0 {
            let points = verify_tree(&tree);
            let actual: Vec<(i64, f64)> =
                points.iter().map(|p| (p.timestamp, p.fields["v"])).collect();
            let expected: Vec<(i64, f64)> = model.iter().map(|(t, v)| (*t, *v)).collect();
            assert_eq!(actual, expected, "diverged at step {step}");
        }
    }

    let actual: Vec<i64> = all_points(&tree).iter().map(|p| p.timestamp).collect();
    let expected: Vec<i64> = model.keys().copied().collect();
    assert_eq!(actual, expected);
}
