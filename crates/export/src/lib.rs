use std::io::Write;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use anirec_core::{Neighbor, Recommendation, SimilarItem};

/// One ranked item of a user's hybrid recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecommendationRecord {
    pub user_id: i64,
    pub rank: usize,
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub from_similar_users: bool,
}

impl RecommendationRecord {
    pub fn from_recommendation(rec: &Recommendation) -> Vec<Self> {
        rec.items
            .iter()
            .enumerate()
            .map(|(idx, item)| Self {
                user_id: rec.user_id,
                rank: idx + 1,
                name: item.name.clone(),
                score: item.score,
                from_similar_users: rec.user_based.iter().any(|c| c.name == item.name),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NeighborRecord {
    pub query: String,
    pub rank: usize,
    pub id: i64,
    pub name: Option<String>,
    pub score: f32,
}

impl NeighborRecord {
    pub fn from_users(query: i64, neighbors: &[Neighbor]) -> Vec<Self> {
        neighbors
            .iter()
            .enumerate()
            .map(|(idx, n)| Self {
                query: query.to_string(),
                rank: idx + 1,
                id: n.id,
                name: None,
                score: n.score,
            })
            .collect()
    }

    pub fn from_items(query: &str, items: &[SimilarItem]) -> Vec<Self> {
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| Self {
                query: query.to_string(),
                rank: idx + 1,
                id: item.anime_id,
                name: Some(item.name.clone()),
                score: item.score,
            })
            .collect()
    }
}

/// A batch entry whose recommendation failed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FailureRecord {
    pub user_id: i64,
    pub error: String,
}

pub struct JsonlWriter<W> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_records<'r, T, I>(&mut self, records: I) -> Result<()>
    where
        T: Serialize + 'r,
        I: IntoIterator<Item = &'r T>,
    {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
