//! End-to-end tests for the pagedex engine: worked scenarios through the
//! query stream, session round-trips, and randomized comparison against
//! brute force.

use pagedex::{workload, Config, Tree};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::io::Write;
use tempfile::tempdir;

// 144-byte pages derive the worked example's bounds, L = 2 and U = 4.
const SMALL_PAGE: usize = 144;

fn payloads(records: &[pagedex::Record]) -> Vec<String> {
    records.iter().map(|r| r.payload.clone()).collect()
}

#[test]
fn config_file_drives_the_tree() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("btree.config");
    let mut f = std::fs::File::create(&config_path).unwrap();
    writeln!(f, "{}", SMALL_PAGE).unwrap();

    let config = Config::from_path(&config_path).unwrap();
    let mut tree = Tree::open(dir.path(), config.page_size).unwrap();
    for key in [10.0, 20.0, 30.0, 40.0, 50.0] {
        tree.insert(key, &format!("r{}", key)).unwrap();
    }
    // U + 1 inserts into a fresh tree: the root leaf split once, so the
    // store holds the old root, its sibling, and the new internal root.
    assert_eq!(tree.node_count(), 3);
    tree.verify().unwrap();
}

#[test]
fn query_stream_end_to_end() {
    let dir = tempdir().unwrap();
    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();

    let stream = "\
        0 10 r10  0 20 r20  0 30 r30  0 40 r40  0 50 r50\n\
        0 25 r25  0 26 r26  0 27 r27\n\
        1 25\n\
        4 20 30\n\
        3 28 3\n";
    let mut out = Vec::new();
    let count = workload::run_queries(&mut tree, stream, &mut out).unwrap();
    assert_eq!(count, 11);

    let text = String::from_utf8(out).unwrap();
    let result_lines: Vec<&str> = text.lines().filter(|l| l.starts_with('r')).collect();
    assert_eq!(
        result_lines,
        vec!["r25", "r20", "r25", "r26", "r27", "r30", "r27", "r30", "r26"]
    );
    tree.verify().unwrap();
}

#[test]
fn session_reopen_answers_identically() {
    let dir = tempdir().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let mut keys: Vec<f64> = (0..200).map(|i| i as f64).collect();
    keys.shuffle(&mut rng);

    let before = {
        let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
        for (i, &key) in keys.iter().enumerate() {
            tree.insert(key, &format!("p{}", i)).unwrap();
        }
        let answers = (
            tree.point_query(77.0).unwrap(),
            tree.window_query(13.0, 41.0).unwrap(),
            tree.range_query(5.0, 30.0).unwrap(),
            tree.knn_query(99.5, 7).unwrap(),
        );
        tree.checkpoint().unwrap();
        answers
    };

    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
    assert!(tree.resumed());
    assert_eq!(tree.record_count(), 200);
    tree.verify().unwrap();
    assert_eq!(tree.point_query(77.0).unwrap(), before.0);
    assert_eq!(tree.window_query(13.0, 41.0).unwrap(), before.1);
    assert_eq!(tree.range_query(5.0, 30.0).unwrap(), before.2);
    assert_eq!(tree.knn_query(99.5, 7).unwrap(), before.3);
}

#[test]
fn randomized_queries_match_brute_force() {
    let dir = tempdir().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    // distinct keys in shuffled order
    let mut keys: Vec<f64> = (0..500).map(|i| i as f64 * 0.5).collect();
    keys.shuffle(&mut rng);

    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
    for &key in &keys {
        tree.insert(key, &format!("k{}", key)).unwrap();
    }
    tree.verify().unwrap();

    let mut sorted = keys.clone();
    sorted.sort_by(f64::total_cmp);

    for _ in 0..50 {
        let lo = rng.gen_range(-10.0..260.0);
        let hi = lo + rng.gen_range(0.0..40.0);
        let got: Vec<f64> = tree
            .window_query(lo, hi)
            .unwrap()
            .iter()
            .map(|r| r.key)
            .collect();
        let want: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|&k| k >= lo && k <= hi)
            .collect();
        assert_eq!(got, want, "window [{}, {}]", lo, hi);
    }

    for _ in 0..50 {
        let center = rng.gen_range(-5.0..255.0);
        let k = rng.gen_range(1..20usize);
        let got: Vec<f64> = tree
            .knn_query(center, k)
            .unwrap()
            .iter()
            .map(|r| (r.key - center).abs())
            .collect();
        let mut distances: Vec<f64> = sorted.iter().map(|&key| (key - center).abs()).collect();
        distances.sort_by(f64::total_cmp);
        distances.truncate(k);
        // distances must be the k smallest, reported nearest first
        let mut got_sorted = got.clone();
        got_sorted.sort_by(f64::total_cmp);
        assert_eq!(got, got_sorted, "knn({}, {}) not nearest-first", center, k);
        assert_eq!(got_sorted, distances, "knn({}, {})", center, k);
    }

    for &key in keys.iter().take(25) {
        let hits = tree.point_query(key).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, key);
    }

    // a window spanning everything enumerates every record
    let all = tree.window_query(f64::NEG_INFINITY, f64::INFINITY).unwrap();
    assert_eq!(all.len() as u64, tree.record_count());
}

#[test]
fn duplicate_multiset_survives_splits_and_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
        for i in 0..9 {
            tree.insert(7.0, &format!("dup{}", i)).unwrap();
        }
        for i in 0..5 {
            tree.insert(3.0, &format!("low{}", i)).unwrap();
        }
        let window = tree.window_query(7.0, 7.0).unwrap();
        assert_eq!(window.len(), 9);
        tree.checkpoint().unwrap();
    }
    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
    let window = tree.window_query(7.0, 7.0).unwrap();
    assert_eq!(window.len(), 9);
    let mut seen = payloads(&window);
    seen.sort();
    let want: Vec<String> = (0..9).map(|i| format!("dup{}", i)).collect();
    assert_eq!(seen, want);
    assert_eq!(tree.point_query(3.0).unwrap().len(), 5);
}

#[test]
fn inserting_the_same_record_twice_keeps_both() {
    let dir = tempdir().unwrap();
    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
    let a = tree.insert(1.5, "twin").unwrap();
    let b = tree.insert(1.5, "twin").unwrap();
    assert_ne!(a, b);
    let hits = tree.point_query(1.5).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|r| r.payload == "twin"));
}

#[test]
fn knn_beyond_population_returns_all_records() {
    let dir = tempdir().unwrap();
    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
    for i in 0..12 {
        tree.insert(i as f64, &format!("r{}", i)).unwrap();
    }
    let all = tree.knn_query(6.0, 1000).unwrap();
    assert_eq!(all.len(), 12);
}

#[test]
fn range_query_never_reaches_below_zero() {
    let dir = tempdir().unwrap();
    let mut tree = Tree::open(dir.path(), SMALL_PAGE).unwrap();
    for i in 0..10 {
        tree.insert(i as f64, &format!("r{}", i)).unwrap();
    }
    let hits = tree.range_query(0.0, 4.0).unwrap();
    let keys: Vec<f64> = hits.iter().map(|r| r.key).collect();
    assert_eq!(keys, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}
