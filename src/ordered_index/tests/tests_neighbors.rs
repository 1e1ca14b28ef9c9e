use crate::ordered_index::OrderedIndex;

fn sample() -> OrderedIndex {
    let mut idx = OrderedIndex::new();
    for k in ["b", "d", "f", "h"] {
        idx.insert(k.as_bytes().to_vec(), k.as_bytes().to_vec());
    }
    idx
}

#[test]
fn lower_neighbor_exact_match() {
    let idx = sample();
    assert_eq!(idx.lower_neighbor(b"d").unwrap().key, b"d");
}

#[test]
fn lower_neighbor_between_keys() {
    let idx = sample();
    assert_eq!(idx.lower_neighbor(b"e").unwrap().key, b"d");
}

#[test]
fn lower_neighbor_below_all_keys_is_none() {
    let idx = sample();
    assert!(idx.lower_neighbor(b"a").is_none());
}

#[test]
fn lower_neighbor_above_all_keys() {
    let idx = sample();
    assert_eq!(idx.lower_neighbor(b"z").unwrap().key, b"h");
}

#[test]
fn upper_neighbor_exact_match_skips_to_next() {
    let idx = sample();
    assert_eq!(idx.upper_neighbor(b"d").unwrap().key, b"f");
}

#[test]
fn upper_neighbor_between_keys() {
    let idx = sample();
    assert_eq!(idx.upper_neighbor(b"e").unwrap().key, b"f");
}

#[test]
fn upper_neighbor_above_all_keys_is_none() {
    let idx = sample();
    assert!(idx.upper_neighbor(b"z").is_none());
}

#[test]
fn upper_neighbor_below_all_keys() {
    let idx = sample();
    assert_eq!(idx.upper_neighbor(b"a").unwrap().key, b"b");
}
