use indexmap::IndexMap;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EntityKind, RecError, Result};
use crate::preference::{PreferenceExtractor, PreferredItem, DEFAULT_PERCENTILE};
use crate::similarity::{Neighbor, RankOrder, SimilarityRanker};
use crate::store::EmbeddingStore;
use crate::table::{ItemQuery, ItemTable, RatingTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub user_weight: f64,
    pub content_weight: f64,
    pub top_n: usize,
    pub similar_users: usize,
    pub similar_items: usize,
    pub percentile: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            user_weight: 0.7,
            content_weight: 0.3,
            top_n: 10,
            similar_users: 10,
            similar_items: 5,
            percentile: DEFAULT_PERCENTILE,
        }
    }
}

impl HybridConfig {
    pub fn validate(&self) -> Result<()> {
        for (label, weight) in [
            ("user_weight", self.user_weight),
            ("content_weight", self.content_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RecError::InvalidConfig(format!(
                    "{label} must be a non-negative number, got {weight}"
                )));
            }
        }
        if self.top_n == 0 {
            return Err(RecError::InvalidConfig("top_n must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(RecError::InvalidConfig(format!(
                "percentile must be within [0, 100], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarItem {
    pub anime_id: i64,
    pub name: String,
    pub genres: Option<String>,
    pub score: f32,
}

/// An item favoured by similar users, with how many of them favour it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserBasedCandidate {
    pub anime_id: i64,
    pub name: String,
    pub count: usize,
    pub genres: Option<String>,
    pub synopsis: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub user_id: i64,
    pub items: Vec<ScoredItem>,
    pub similar_users: Vec<Neighbor>,
    pub user_based: Vec<UserBasedCandidate>,
    pub content_based: Vec<String>,
}

impl Recommendation {
    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }
}

/// Merges collaborative and content-based candidates for a user.
///
/// All inputs are borrowed read-only, so one recommender can serve any number
/// of requests, including from several threads.
#[derive(Debug, Clone)]
pub struct HybridRecommender<'a> {
    store: &'a EmbeddingStore,
    ratings: &'a RatingTable,
    items: &'a ItemTable,
    config: HybridConfig,
}

impl<'a> HybridRecommender<'a> {
    pub fn new(
        store: &'a EmbeddingStore,
        ratings: &'a RatingTable,
        items: &'a ItemTable,
        config: HybridConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            ratings,
            items,
            config,
        })
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    fn ranker(&self, kind: EntityKind) -> Result<SimilarityRanker<'a>> {
        SimilarityRanker::new(self.store.matrix(kind), self.store.codec(kind))
    }

    fn extractor(&self) -> Result<PreferenceExtractor<'a>> {
        PreferenceExtractor::new(self.ratings, self.items).with_percentile(self.config.percentile)
    }

    pub fn similar_users(
        &self,
        user_id: i64,
        k: usize,
        order: RankOrder,
    ) -> Result<Vec<Neighbor>> {
        self.ranker(EntityKind::User)?.rank(user_id, k, order)
    }

    pub fn similar_items(
        &self,
        query: &ItemQuery,
        k: usize,
        order: RankOrder,
    ) -> Result<Vec<SimilarItem>> {
        let anime_id = self.items.resolve(query)?.anime_id;
        self.ranker(EntityKind::Item)?
            .rank(anime_id, k, order)?
            .into_iter()
            .map(|neighbor| {
                let item = self.items.get(neighbor.id)?;
                Ok(SimilarItem {
                    anime_id: item.anime_id,
                    name: item.name.clone(),
                    genres: item.genres.clone(),
                    score: neighbor.score,
                })
            })
            .collect()
    }

    pub fn preferences(&self, user_id: i64) -> Result<Vec<PreferredItem>> {
        self.extractor()?.top_preferences(user_id)
    }

    pub fn recommend(&self, user_id: i64) -> Result<Vec<String>> {
        Ok(self.recommend_detailed(user_id)?.names())
    }

    pub fn recommend_detailed(&self, user_id: i64) -> Result<Recommendation> {
        let similar_users =
            self.similar_users(user_id, self.config.similar_users, RankOrder::MostSimilar)?;
        let own = self.preferences(user_id)?;
        let user_based = self.user_based_candidates(&own, &similar_users)?;
        let user_names: Vec<String> = user_based.iter().map(|c| c.name.clone()).collect();
        let content_based = self.content_based_candidates(&user_based)?;
        let mut items = combine_scores(
            &user_names,
            &content_based,
            self.config.user_weight,
            self.config.content_weight,
        );
        items.truncate(self.config.top_n);
        info!(
            user_id,
            neighbors = similar_users.len(),
            user_based = user_based.len(),
            content_based = content_based.len(),
            returned = items.len(),
            "hybrid recommendation"
        );
        Ok(Recommendation {
            user_id,
            items,
            similar_users,
            user_based,
            content_based,
        })
    }

    /// Scores every user independently on the rayon pool; results keep input order.
    pub fn recommend_batch(&self, user_ids: &[i64]) -> Vec<(i64, Result<Recommendation>)> {
        user_ids
            .par_iter()
            .map(|&user_id| (user_id, self.recommend_detailed(user_id)))
            .collect()
    }

    /// Items that neighbors favour and `own` does not contain, counted across
    /// neighbors and cut to `top_n`. Neighbors with too few ratings add nothing.
    ///
    /// Candidates are keyed by display name, so an item is skipped whenever its
    /// name is already among `own`, even under a different anime id.
    pub fn user_based_candidates(
        &self,
        own: &[PreferredItem],
        neighbors: &[Neighbor],
    ) -> Result<Vec<UserBasedCandidate>> {
        let extractor = self.extractor()?;
        let known: FxHashSet<&str> = own.iter().map(|pref| pref.name.as_str()).collect();
        let mut counts: IndexMap<String, UserBasedCandidate> = IndexMap::new();
        for neighbor in neighbors {
            let prefs = match extractor.top_preferences(neighbor.id) {
                Ok(prefs) => prefs,
                Err(RecError::InsufficientData { user, ratings }) => {
                    debug!(user, ratings, "skipping neighbor with too few ratings");
                    continue;
                }
                Err(err) => return Err(err),
            };
            for pref in prefs {
                if known.contains(pref.name.as_str()) {
                    continue;
                }
                counts
                    .entry(pref.name.clone())
                    .or_insert_with(|| UserBasedCandidate {
                        anime_id: pref.anime_id,
                        name: pref.name.clone(),
                        count: 0,
                        genres: pref.genres.clone(),
                        synopsis: None,
                    })
                    .count += 1;
            }
        }
        let mut candidates: Vec<UserBasedCandidate> = counts.into_values().collect();
        candidates.sort_by(|a, b| b.count.cmp(&a.count));
        candidates.truncate(self.config.top_n);
        for candidate in &mut candidates {
            candidate.synopsis = self.items.get(candidate.anime_id)?.synopsis.clone();
        }
        Ok(candidates)
    }

    /// Nearest items of every user-based candidate, flattened in order.
    pub fn content_based_candidates(
        &self,
        user_based: &[UserBasedCandidate],
    ) -> Result<Vec<String>> {
        let ranker = self.ranker(EntityKind::Item)?;
        let mut names = Vec::new();
        for candidate in user_based {
            let neighbors = ranker.rank(
                candidate.anime_id,
                self.config.similar_items,
                RankOrder::MostSimilar,
            )?;
            for neighbor in neighbors {
                names.push(self.items.get(neighbor.id)?.name.clone());
            }
        }
        Ok(names)
    }
}

/// Weighted, additive merge of the two candidate lists.
///
/// Every occurrence adds its list's weight. Output is ordered by descending
/// score with ties in first-seen order (user-based entries first).
pub fn combine_scores(
    user_based: &[String],
    content_based: &[String],
    user_weight: f64,
    content_weight: f64,
) -> Vec<ScoredItem> {
    let mut scores: IndexMap<&str, f64> = IndexMap::new();
    let weighted = user_based
        .iter()
        .map(|name| (name, user_weight))
        .chain(content_based.iter().map(|name| (name, content_weight)));
    for (name, weight) in weighted {
        *scores.entry(name.as_str()).or_insert(0.0) += weight;
    }
    let mut ranked: Vec<ScoredItem> = scores
        .into_iter()
        .map(|(name, score)| ScoredItem {
            name: name.to_string(),
            score,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}
