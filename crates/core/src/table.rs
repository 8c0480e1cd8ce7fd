use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use csv::{ReaderBuilder, WriterBuilder};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, RecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: i64,
    pub anime_id: i64,
    pub rating: f64,
}

/// User-item ratings with a per-user row index.
#[derive(Debug, Clone, Default)]
pub struct RatingTable {
    rows: Vec<Rating>,
    by_user: FxHashMap<i64, Vec<usize>>,
}

impl RatingTable {
    pub fn new(rows: Vec<Rating>) -> Self {
        let mut by_user: FxHashMap<i64, Vec<usize>> = FxHashMap::default();
        for (idx, row) in rows.iter().enumerate() {
            by_user.entry(row.user_id).or_default().push(idx);
        }
        Self { rows, by_user }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Reads `user_id,anime_id,rating`; other columns are ignored.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut rows = Vec::new();
        for record in reader.deserialize::<Rating>() {
            rows.push(record?);
        }
        Ok(Self::new(rows))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> &[Rating] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A user's ratings in table order.
    pub fn for_user(&self, user_id: i64) -> impl Iterator<Item = &Rating> + '_ {
        self.by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.rows[idx])
    }

    pub fn user_count(&self, user_id: i64) -> usize {
        self.by_user.get(&user_id).map(Vec::len).unwrap_or(0)
    }

    pub fn into_rows(self) -> Vec<Rating> {
        self.rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(rename = "MAL_ID")]
    pub anime_id: i64,
    #[serde(rename = "eng_version")]
    pub name: String,
    #[serde(rename = "Genres", default)]
    pub genres: Option<String>,
    #[serde(rename = "Score", default)]
    pub score: Option<f64>,
    #[serde(rename = "sypnopsis", default)]
    pub synopsis: Option<String>,
}

/// Item metadata as found in either the raw anime export or a processed table.
#[derive(Debug, Deserialize)]
struct RawItemRow {
    #[serde(rename = "MAL_ID")]
    anime_id: i64,
    #[serde(default)]
    eng_version: Option<String>,
    #[serde(rename = "English name", default)]
    english_name: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Genres", default)]
    genres: Option<String>,
    #[serde(rename = "Score", default)]
    score: Option<String>,
    #[serde(default)]
    sypnopsis: Option<String>,
}

impl RawItemRow {
    fn into_record(self) -> Option<ItemRecord> {
        let name = known(self.eng_version)
            .or_else(|| known(self.english_name))
            .or_else(|| known(self.name))?;
        Some(ItemRecord {
            anime_id: self.anime_id,
            name,
            genres: known(self.genres),
            score: known(self.score).and_then(|s| s.parse().ok()),
            synopsis: known(self.sypnopsis),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SynopsisRow {
    #[serde(rename = "MAL_ID")]
    anime_id: i64,
    #[serde(default)]
    sypnopsis: Option<String>,
}

fn known(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "Unknown")
}

/// Item metadata keyed by anime id, with a display-name lookup.
#[derive(Debug, Clone, Default)]
pub struct ItemTable {
    records: Vec<ItemRecord>,
    by_id: FxHashMap<i64, usize>,
    by_name: FxHashMap<String, usize>,
}

impl ItemTable {
    /// Later duplicates of an id or a display name are ignored.
    pub fn new(records: Vec<ItemRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            if table.by_id.contains_key(&record.anime_id) {
                continue;
            }
            let idx = table.records.len();
            table.by_id.insert(record.anime_id, idx);
            table.by_name.entry(record.name.clone()).or_insert(idx);
            table.records.push(record);
        }
        table
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Accepts the raw anime export (`Name`, `English name`) as well as a processed
    /// table (`eng_version`). Rows without any usable name are skipped.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut records = Vec::new();
        for row in reader.deserialize::<RawItemRow>() {
            if let Some(record) = row?.into_record() {
                records.push(record);
            }
        }
        Ok(Self::new(records))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Fills in synopses from a `MAL_ID,...,sypnopsis` table; returns how many matched.
    pub fn attach_synopses<R: Read>(&mut self, reader: R) -> Result<usize> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut attached = 0;
        for row in reader.deserialize::<SynopsisRow>() {
            let row = row?;
            let Some(synopsis) = known(row.sypnopsis) else {
                continue;
            };
            if let Some(&idx) = self.by_id.get(&row.anime_id) {
                self.records[idx].synopsis = Some(synopsis);
                attached += 1;
            }
        }
        Ok(attached)
    }

    pub fn get(&self, anime_id: i64) -> Result<&ItemRecord> {
        self.by_id
            .get(&anime_id)
            .map(|&idx| &self.records[idx])
            .ok_or_else(|| RecError::unknown(EntityKind::Item, anime_id))
    }

    pub fn find_by_name(&self, name: &str) -> Result<&ItemRecord> {
        self.by_name
            .get(name)
            .map(|&idx| &self.records[idx])
            .ok_or_else(|| RecError::unknown(EntityKind::Item, format!("{name:?}")))
    }

    pub fn resolve(&self, query: &ItemQuery) -> Result<&ItemRecord> {
        match query {
            ItemQuery::Id(id) => self.get(*id),
            ItemQuery::Name(name) => self.find_by_name(name),
        }
    }

    pub fn contains(&self, anime_id: i64) -> bool {
        self.by_id.contains_key(&anime_id)
    }

    pub fn records(&self) -> &[ItemRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An item referenced by anime id or by display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemQuery {
    Id(i64),
    Name(String),
}

impl FromStr for ItemQuery {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<i64>() {
            Ok(id) => ItemQuery::Id(id),
            Err(_) => ItemQuery::Name(trimmed.to_string()),
        })
    }
}

impl fmt::Display for ItemQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemQuery::Id(id) => write!(f, "{id}"),
            ItemQuery::Name(name) => f.write_str(name),
        }
    }
}
