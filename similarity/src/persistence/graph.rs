//! Binary export of HNSW graphs.

use crate::error::{Artifact, IndexError, Result};
use crate::graph::Graph;
use crate::types::IndexKey;

pub(crate) fn encode_graph<K: IndexKey>(graph: &Graph<K>) -> Result<Vec<u8>> {
    postcard::to_stdvec(graph).map_err(|e| IndexError::serialization(Artifact::Graph, e))
}

pub(crate) fn decode_graph<K: IndexKey>(bytes: &[u8]) -> Result<Graph<K>> {
    postcard::from_bytes(bytes).map_err(|e| IndexError::serialization(Artifact::Graph, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphParams;
    use crate::distance::EmbeddingPoint;
    use crate::graph::build_graph;
    use instant_distance::Search;

    #[test]
    fn decoded_graph_answers_like_the_original() {
        let params = GraphParams {
            seed: Some(3),
            ..GraphParams::default()
        };
        let nodes = vec![
            ("a".to_string(), EmbeddingPoint::new(&[1.0, 0.0])),
            ("b".to_string(), EmbeddingPoint::new(&[0.0, 1.0])),
            ("c".to_string(), EmbeddingPoint::new(&[-1.0, 0.1])),
        ];
        let graph = build_graph(&params, nodes).unwrap();

        let decoded: Graph<String> = decode_graph(&encode_graph(&graph).unwrap()).unwrap();

        let query = EmbeddingPoint::new(&[0.1, 1.0]);
        let mut search = Search::default();
        let nearest = decoded.search(&query, &mut search).next().unwrap();
        assert_eq!(nearest.value, "b");
        assert_eq!(decoded.values.len(), 3);
    }

    #[test]
    fn truncated_graph_is_rejected() {
        let err = decode_graph::<i64>(&[0xff]).err().unwrap();
        assert!(matches!(
            err,
            IndexError::Serialization {
                artifact: Artifact::Graph,
                ..
            }
        ));
    }
}
