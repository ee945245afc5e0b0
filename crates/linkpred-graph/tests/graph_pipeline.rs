//! End-to-end checks for the graph-side collaborators: load triples from
//! disk, build the dictionary, link graph and fact index, then derive
//! neighborhoods and masks from them.

use std::io::Write;

use linkpred_graph::{
    load_examples, EntityDict, Example, InMemoryLinkGraph, LinkGraph, LinkGraphConfig,
    NegativeMaskBuilder, TripletDict, TripletMasker,
};

const TRAIN_JSON: &str = r#"[
    {"head_id": "dog", "head": "dog", "relation": "hypernym", "tail_id": "canine", "tail": "canine"},
    {"head_id": "canine", "relation": "hypernym", "tail_id": "carnivore"},
    {"head_id": "cat", "relation": "hypernym", "tail_id": "feline"},
    {"head_id": "feline", "relation": "hypernym", "tail_id": "carnivore"},
    {"head_id": "dog", "relation": "hypernym", "tail_id": "pet"}
]"#;

fn load_train() -> Vec<Example> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TRAIN_JSON.as_bytes()).unwrap();
    load_examples(file.path()).unwrap()
}

#[test]
fn test_loaded_examples_drive_graph_and_masks() {
    let train = load_train();
    assert_eq!(train.len(), 5);
    assert_eq!(train[0].head, "dog");
    assert_eq!(train[1].head, "");

    let dict = EntityDict::from_examples(&train);
    assert_eq!(dict.len(), 6);

    let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
    let one_hop = graph.n_hop_entity_indices("dog", &dict, 1).unwrap();
    let two_hop = graph.n_hop_entity_indices("dog", &dict, 2).unwrap();
    let three_hop = graph.n_hop_entity_indices("dog", &dict, 3).unwrap();

    assert!(one_hop.is_subset(&two_hop));
    assert!(two_hop.is_subset(&three_hop));
    assert!(one_hop.contains(&dict.entity_to_idx("pet").unwrap()));
    assert!(two_hop.contains(&dict.entity_to_idx("carnivore").unwrap()));
    assert!(three_hop.contains(&dict.entity_to_idx("feline").unwrap()));
    assert!(!three_hop.contains(&dict.entity_to_idx("cat").unwrap()));

    let triplets = TripletDict::from_examples(&train);
    let masker = TripletMasker::new(&triplets);

    let batch = vec![train[0].clone(), train[4].clone(), train[2].clone()];
    let in_batch = masker.construct_batch_mask(&batch);
    // dog has two hypernyms in the batch: each must not be a negative for the other
    assert!(!in_batch.get(0, 1));
    assert!(!in_batch.get(1, 0));
    assert!(in_batch.get(0, 2));

    let cached = vec![train[3].clone(), train[4].clone()];
    let cross = masker.construct_mask(&batch, &cached);
    assert_eq!((cross.rows(), cross.cols()), (3, 2));
    assert!(cross.get(0, 0));
    assert!(!cross.get(0, 1));
    assert!(!cross.get(1, 1));

    let self_neg = masker.construct_self_negative_mask(&batch);
    assert_eq!(self_neg, vec![true, true, true]);
}

#[test]
fn test_malformed_file_is_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"not\": \"an array\"}").unwrap();
    let err = load_examples(file.path()).unwrap_err();
    assert!(matches!(err, linkpred_graph::GraphError::Parse(_)));
}
