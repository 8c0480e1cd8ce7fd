use std::cmp::Ordering;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::codec::IdCodec;
use crate::embedding::EmbeddingMatrix;
use crate::error::{RecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    #[default]
    MostSimilar,
    LeastSimilar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: i64,
    pub index: usize,
    pub score: f32,
}

/// Exhaustive cosine ranking over one embedding matrix.
///
/// Scores every row against the query row, so a call costs O(rows * dims).
#[derive(Debug, Clone, Copy)]
pub struct SimilarityRanker<'a> {
    matrix: &'a EmbeddingMatrix,
    codec: &'a IdCodec<i64>,
}

impl<'a> SimilarityRanker<'a> {
    pub fn new(matrix: &'a EmbeddingMatrix, codec: &'a IdCodec<i64>) -> Result<Self> {
        if matrix.rows() != codec.len() {
            return Err(RecError::DimensionMismatch(format!(
                "{} matrix has {} rows but the codec holds {} ids",
                codec.kind(),
                matrix.rows(),
                codec.len()
            )));
        }
        Ok(Self { matrix, codec })
    }

    /// Similarity of every row to `query_id`, indexed by encoded row.
    pub fn scores(&self, query_id: i64) -> Result<Vec<f32>> {
        let index = self.codec.encode(&query_id)?;
        scores_for_index(self.matrix, index, self.codec)
    }

    /// The `k` nearest (or farthest) entities to `query_id`, never including
    /// the query itself, ordered by descending score.
    pub fn rank(&self, query_id: i64, k: usize, order: RankOrder) -> Result<Vec<Neighbor>> {
        let query_index = self.codec.encode(&query_id)?;
        let scores = scores_for_index(self.matrix, query_index, self.codec)?;
        select_neighbors(&scores, query_index, k, order)
            .into_iter()
            .map(|(index, score)| {
                Ok(Neighbor {
                    id: *self.codec.decode(index)?,
                    index,
                    score,
                })
            })
            .collect()
    }
}

fn scores_for_index(
    matrix: &EmbeddingMatrix,
    index: usize,
    codec: &IdCodec<i64>,
) -> Result<Vec<f32>> {
    let query = matrix.row(index).ok_or(RecError::UnknownIndex {
        kind: codec.kind(),
        index,
        len: matrix.rows(),
    })?;
    Ok(matrix.dot_all(query))
}

/// Picks `k` entries from a score vector, skipping `query_index`.
///
/// Candidates are taken from the requested end of a stable sort, so equal
/// scores keep row order. The result is always ordered by descending score.
pub fn select_neighbors(
    scores: &[f32],
    query_index: usize,
    k: usize,
    order: RankOrder,
) -> Vec<(usize, f32)> {
    let by_score = |a: &usize, b: &usize| -> Ordering {
        match order {
            RankOrder::MostSimilar => scores[*b].total_cmp(&scores[*a]),
            RankOrder::LeastSimilar => scores[*a].total_cmp(&scores[*b]),
        }
    };
    let mut picked = (0..scores.len())
        .sorted_by(by_score)
        .take(k.saturating_add(1))
        .filter(|&index| index != query_index)
        .take(k)
        .map(|index| (index, scores[index]))
        .collect_vec();
    picked.sort_by(|a, b| b.1.total_cmp(&a.1));
    picked
}
