//! Graph-side collaborators for knowledge-graph link prediction.
//!
//! # Architecture
//!
//! - **types**: `Example` triples and JSON loading
//! - **entity**: `EntityDict`, the id ↔ score-column mapping
//! - **link_graph**: undirected `InMemoryLinkGraph` with BFS n-hop lookup
//! - **triplet**: `TripletDict` of known true facts
//! - **mask**: triplet-validity and self-negative masks
//! - **error**: `GraphError` / `GraphResult`
//!
//! # Example
//!
//! ```
//! use linkpred_graph::{EntityDict, Example, InMemoryLinkGraph, LinkGraph, LinkGraphConfig};
//!
//! let train = vec![Example::new("a", "r", "b"), Example::new("b", "r", "c")];
//! let dict = EntityDict::from_examples(&train);
//! let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
//!
//! let two_hop = graph.n_hop_entity_indices("a", &dict, 2).unwrap();
//! assert_eq!(two_hop.len(), 3);
//! ```

pub mod entity;
pub mod error;
pub mod link_graph;
pub mod mask;
pub mod triplet;
pub mod types;

pub use entity::EntityDict;
pub use error::{GraphError, GraphResult};
pub use link_graph::{InMemoryLinkGraph, LinkGraph, LinkGraphConfig};
pub use mask::{
    construct_mask, construct_self_negative_mask, NegativeMaskBuilder, TripletMask,
    TripletMasker,
};
pub use triplet::TripletDict;
pub use types::{load_examples, Example, INVERSE_RELATION_PREFIX};
