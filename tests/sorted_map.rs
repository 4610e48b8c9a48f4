use reef::{AddOptions, AddResult, Backend, LexBound, LexRange, ScoreRange, SortedMap};

fn abc(backend: Backend) -> SortedMap {
    let mut map = SortedMap::with_backend(backend);
    for (score, member) in [(1.0, "a"), (2.0, "b"), (3.0, "c")] {
        assert!(matches!(
            map.add(score, member.as_bytes(), AddOptions::default()),
            AddResult::Added(_)
        ));
    }
    map
}

fn contents(map: &SortedMap) -> Vec<(Vec<u8>, f64)> {
    let mut out = Vec::new();
    map.iterate(0, usize::MAX, false, |m, s| {
        out.push((m.to_vec(), s));
        true
    });
    out
}

#[test]
fn ranks_and_counts() {
    for backend in [Backend::Skiplist, Backend::Tree] {
        let map = abc(backend);
        assert_eq!(map.rank(b"b", false), Some(1));
        assert_eq!(map.rank(b"b", true), Some(1));
        assert_eq!(
            map.count(&ScoreRange {
                min: 1.5,
                max: 3.0,
                min_exclusive: false,
                max_exclusive: false
            }),
            2
        );
    }
}

#[test]
fn incr_moves_rank() {
    for backend in [Backend::Skiplist, Backend::Tree] {
        let mut map = abc(backend);
        let incr = AddOptions { incr: true, ..Default::default() };
        assert_eq!(map.add(5.0, b"b", incr), AddResult::Updated(7.0));
        assert_eq!(map.rank(b"b", false), Some(2));
    }
}

#[test]
fn conditional_add_flags() {
    for backend in [Backend::Skiplist, Backend::Tree] {
        let mut map = abc(backend);

        let nx = AddOptions { nx: true, ..Default::default() };
        assert_eq!(map.add(9.0, b"b", nx), AddResult::Nop);
        assert_eq!(map.score(b"b"), Some(2.0));

        let gt_incr = AddOptions { gt: true, incr: true, ..Default::default() };
        assert_eq!(map.add(-5.0, b"b", gt_incr), AddResult::Nop);
        assert_eq!(map.score(b"b"), Some(2.0));

        let incr = AddOptions { incr: true, ..Default::default() };
        map.add(f64::INFINITY, b"b", AddOptions::default());
        assert_eq!(map.add(f64::NEG_INFINITY, b"b", incr), AddResult::Nan);
        assert_eq!(map.score(b"b"), Some(f64::INFINITY));
        assert_eq!(map.len(), 3);
    }
}

#[test]
fn pop_from_both_ends() {
    for backend in [Backend::Skiplist, Backend::Tree] {
        let mut map = abc(backend);
        assert_eq!(
            map.pop_top(2, true),
            vec![(b"c".to_vec(), 3.0), (b"b".to_vec(), 2.0)]
        );
        assert_eq!(contents(&map), vec![(b"a".to_vec(), 1.0)]);
    }
}

#[test]
fn count_equals_full_range_iteration() {
    let mut map = SortedMap::new();
    for i in 0..200 {
        map.add(((i * 7) % 50) as f64, format!("m{i:03}").as_bytes(), AddOptions::default());
    }

    for range in [
        ScoreRange::inclusive(10.0, 30.0),
        ScoreRange { min: 10.0, max: 30.0, min_exclusive: true, max_exclusive: true },
        ScoreRange::all(),
        ScoreRange::inclusive(49.0, 10.0),
    ] {
        let iterated = map.range_by_score(&range, 0, usize::MAX, false).unwrap().len();
        assert_eq!(map.count(&range), iterated);
    }
}

#[test]
fn tree_count_over_full_range_equals_size() {
    let mut map = SortedMap::with_backend(Backend::Tree);
    for i in 0..100 {
        map.add((i % 13) as f64, format!("m{i:03}").as_bytes(), AddOptions::default());
    }
    assert_eq!(map.count(&ScoreRange::all()), map.len());
    for _ in 0..40 {
        map.pop_top(1, false);
    }
    assert_eq!(map.count(&ScoreRange::all()), map.len());
}

#[test]
fn lex_queries_on_skiplist() {
    let mut map = SortedMap::new();
    for member in ["apple", "banana", "cherry", "date"] {
        map.add(0.0, member.as_bytes(), AddOptions::default());
    }

    let range = LexRange {
        min: LexBound::Inclusive(b"banana".to_vec()),
        max: LexBound::Exclusive(b"date".to_vec()),
    };
    assert_eq!(map.lex_count(&range).unwrap(), 2);
    assert_eq!(
        map.range_by_lex(&range, 0, usize::MAX, false).unwrap(),
        vec![(b"banana".to_vec(), 0.0), (b"cherry".to_vec(), 0.0)]
    );
}

#[test]
fn tree_backend_refuses_unimplemented_reads() {
    let map = abc(Backend::Tree);
    assert!(map.range_by_score(&ScoreRange::all(), 0, 10, false).is_err());
    assert!(map.range_by_lex(&LexRange::all(), 0, 10, false).is_err());
    assert!(map.lex_count(&LexRange::all()).is_err());
}

#[test]
fn listpack_roundtrip_across_backends() {
    let mut map = SortedMap::new();
    for (score, member) in [(3.5, "x"), (1.0, "a"), (1.0, "b"), (-2.0, "neg")] {
        map.add(score, member.as_bytes(), AddOptions::default());
    }
    let buf = map.to_listpack();

    // A serialized skiplist map rebuilds identically on either backend.
    for backend in [Backend::Skiplist, Backend::Tree] {
        let rebuilt = SortedMap::from_listpack(backend, &buf).unwrap();
        assert_eq!(contents(&rebuilt), contents(&map));
    }
}

#[test]
fn backend_parity_under_scripted_mutations() {
    let mut skip = SortedMap::with_backend(Backend::Skiplist);
    let mut tree = SortedMap::with_backend(Backend::Tree);

    let script: Vec<(f64, String)> =
        (0..300).map(|i| (((i * 31) % 97) as f64, format!("k{:03}", (i * 17) % 120))).collect();

    for (score, member) in &script {
        let a = skip.add(*score, member.as_bytes(), AddOptions::default());
        let b = tree.add(*score, member.as_bytes(), AddOptions::default());
        assert_eq!(a, b, "add({score}, {member})");
    }
    assert_eq!(skip.len(), tree.len());
    assert_eq!(contents(&skip), contents(&tree));

    for (_, member) in script.iter().step_by(3) {
        assert_eq!(skip.delete(member.as_bytes()), tree.delete(member.as_bytes()));
    }
    assert_eq!(skip.len(), tree.len());
    assert_eq!(contents(&skip), contents(&tree));

    for member in ["k000", "k031", "k119", "missing"] {
        assert_eq!(skip.score(member.as_bytes()), tree.score(member.as_bytes()));
        assert_eq!(skip.rank(member.as_bytes(), false), tree.rank(member.as_bytes(), false));
        assert_eq!(skip.rank(member.as_bytes(), true), tree.rank(member.as_bytes(), true));
    }

    for range in [ScoreRange::inclusive(10.0, 60.0), ScoreRange::all()] {
        assert_eq!(skip.count(&range), tree.count(&range));
    }

    assert_eq!(skip.pop_top(7, true), tree.pop_top(7, true));
    assert_eq!(skip.pop_top(7, false), tree.pop_top(7, false));
    assert_eq!(contents(&skip), contents(&tree));
}
