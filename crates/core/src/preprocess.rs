use std::fs::File;
use std::io::BufWriter;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::{save_codec, ArtifactPaths};
use crate::codec::IdCodec;
use crate::error::{EntityKind, RecError, Result};
use crate::table::{ItemTable, Rating, RatingTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Users with fewer ratings than this are dropped before encoding.
    pub min_ratings: usize,
    pub scale_ratings: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_ratings: 400,
            scale_ratings: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub ratings: RatingTable,
    pub user_codec: IdCodec<i64>,
    pub item_codec: IdCodec<i64>,
}

impl Preprocessed {
    /// Writes the codecs and the processed tables into the artifact directory.
    pub fn save(&self, paths: &ArtifactPaths, items: &ItemTable) -> Result<()> {
        paths.ensure_root()?;
        save_codec(&paths.codec(EntityKind::User), &self.user_codec)?;
        save_codec(&paths.codec(EntityKind::Item), &self.item_codec)?;
        self.ratings
            .write_csv(BufWriter::new(File::create(paths.ratings())?))?;
        items.write_csv(BufWriter::new(File::create(paths.items())?))?;
        info!(
            root = %paths.root().display(),
            ratings = self.ratings.len(),
            items = items.len(),
            "saved preprocessing artifacts"
        );
        Ok(())
    }
}

/// Filters sparse users, rescales ratings and builds the id codecs.
pub fn preprocess(ratings: RatingTable, config: &PreprocessConfig) -> Result<Preprocessed> {
    let total = ratings.len();
    let mut counts: FxHashMap<i64, usize> = FxHashMap::default();
    for row in ratings.rows() {
        *counts.entry(row.user_id).or_default() += 1;
    }
    let mut rows: Vec<Rating> = ratings
        .into_rows()
        .into_iter()
        .filter(|row| counts.get(&row.user_id).copied().unwrap_or(0) >= config.min_ratings)
        .collect();
    info!(
        before = total,
        after = rows.len(),
        min_ratings = config.min_ratings,
        "filtered sparse users"
    );
    if config.scale_ratings {
        scale_min_max(&mut rows)?;
    }
    let user_codec = IdCodec::from_ids(EntityKind::User, rows.iter().map(|r| r.user_id));
    let item_codec = IdCodec::from_ids(EntityKind::Item, rows.iter().map(|r| r.anime_id));
    info!(
        users = user_codec.len(),
        items = item_codec.len(),
        "encoded users and items"
    );
    Ok(Preprocessed {
        ratings: RatingTable::new(rows),
        user_codec,
        item_codec,
    })
}

/// Rescales ratings to `[0, 1]` in place.
pub fn scale_min_max(rows: &mut [Rating]) -> Result<()> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let (min, max) = rows.iter().fold((first.rating, first.rating), |(lo, hi), r| {
        (lo.min(r.rating), hi.max(r.rating))
    });
    let span = max - min;
    if !(span > 0.0) {
        return Err(RecError::DegenerateRatings(format!(
            "all ratings equal {min}, cannot rescale"
        )));
    }
    for row in rows.iter_mut() {
        row.rating = (row.rating - min) / span;
    }
    Ok(())
}
