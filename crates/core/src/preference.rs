use serde::Serialize;
use tracing::debug;

use crate::error::{RecError, Result};
use crate::table::{ItemTable, RatingTable};

pub const DEFAULT_PERCENTILE: f64 = 75.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferredItem {
    pub anime_id: i64,
    pub name: String,
    pub genres: Option<String>,
    pub rating: f64,
}

/// Derives a user's favourite items from their own rating distribution.
#[derive(Debug, Clone, Copy)]
pub struct PreferenceExtractor<'a> {
    ratings: &'a RatingTable,
    items: &'a ItemTable,
    percentile: f64,
}

impl<'a> PreferenceExtractor<'a> {
    pub fn new(ratings: &'a RatingTable, items: &'a ItemTable) -> Self {
        Self {
            ratings,
            items,
            percentile: DEFAULT_PERCENTILE,
        }
    }

    pub fn with_percentile(mut self, percentile: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(RecError::InvalidConfig(format!(
                "percentile must be within [0, 100], got {percentile}"
            )));
        }
        self.percentile = percentile;
        Ok(self)
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    /// Items `user_id` rated at or above their own percentile threshold, highest
    /// rating first. Rated items missing from the item table are left out.
    pub fn top_preferences(&self, user_id: i64) -> Result<Vec<PreferredItem>> {
        let rated: Vec<_> = self.ratings.for_user(user_id).collect();
        if rated.len() < 2 {
            return Err(RecError::InsufficientData {
                user: user_id,
                ratings: rated.len(),
            });
        }
        let values: Vec<f64> = rated.iter().map(|r| r.rating).collect();
        let threshold = percentile(&values, self.percentile)?;
        let mut kept: Vec<_> = rated.into_iter().filter(|r| r.rating >= threshold).collect();
        kept.sort_by(|a, b| b.rating.total_cmp(&a.rating));

        let mut preferred = Vec::with_capacity(kept.len());
        for rating in kept {
            match self.items.get(rating.anime_id) {
                Ok(item) => preferred.push(PreferredItem {
                    anime_id: item.anime_id,
                    name: item.name.clone(),
                    genres: item.genres.clone(),
                    rating: rating.rating,
                }),
                Err(_) => debug!(
                    user_id,
                    anime_id = rating.anime_id,
                    "rated item has no metadata"
                ),
            }
        }
        debug!(user_id, threshold, kept = preferred.len(), "extracted preferences");
        Ok(preferred)
    }
}

/// Percentile with linear interpolation between the two closest ranks.
///
/// `p` is in percent and must lie within [0, 100].
pub fn percentile(values: &[f64], p: f64) -> Result<f64> {
    if !(0.0..=100.0).contains(&p) {
        return Err(RecError::InvalidConfig(format!(
            "percentile must be within [0, 100], got {p}"
        )));
    }
    if values.is_empty() {
        return Err(RecError::DegenerateRatings(
            "cannot take a percentile of no values".into(),
        ));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Ok(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}
