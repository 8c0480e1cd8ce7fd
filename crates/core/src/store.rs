use tracing::{info, warn};

use crate::artifact::{load_codec, load_matrix, ArtifactPaths};
use crate::codec::IdCodec;
use crate::embedding::EmbeddingMatrix;
use crate::error::{EntityKind, RecError, Result};

/// Read-only user and item embeddings with the codecs that index them.
///
/// Every non-zero row is unit length once the store is built, so dot products
/// between rows are cosine similarities.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    users: EmbeddingMatrix,
    items: EmbeddingMatrix,
    user_codec: IdCodec<i64>,
    item_codec: IdCodec<i64>,
}

impl EmbeddingStore {
    pub fn new(
        mut users: EmbeddingMatrix,
        mut items: EmbeddingMatrix,
        user_codec: IdCodec<i64>,
        item_codec: IdCodec<i64>,
    ) -> Result<Self> {
        check_shape(EntityKind::User, &users, &user_codec)?;
        check_shape(EntityKind::Item, &items, &item_codec)?;
        for (kind, matrix) in [
            (EntityKind::User, &mut users),
            (EntityKind::Item, &mut items),
        ] {
            let touched = matrix.normalize_rows();
            if touched > 0 {
                warn!(%kind, rows = touched, "renormalized embedding rows");
            }
        }
        Ok(Self {
            users,
            items,
            user_codec,
            item_codec,
        })
    }

    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let user_codec = load_codec(&paths.codec(EntityKind::User), EntityKind::User)?;
        let item_codec = load_codec(&paths.codec(EntityKind::Item), EntityKind::Item)?;
        let users = load_matrix(&paths.weights(EntityKind::User))?;
        let items = load_matrix(&paths.weights(EntityKind::Item))?;
        let store = Self::new(users, items, user_codec, item_codec)?;
        info!(
            root = %paths.root().display(),
            users = store.users.rows(),
            items = store.items.rows(),
            dims = store.users.dims(),
            "loaded embedding store"
        );
        Ok(store)
    }

    pub fn matrix(&self, kind: EntityKind) -> &EmbeddingMatrix {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Item => &self.items,
        }
    }

    pub fn codec(&self, kind: EntityKind) -> &IdCodec<i64> {
        match kind {
            EntityKind::User => &self.user_codec,
            EntityKind::Item => &self.item_codec,
        }
    }

    pub fn row_for(&self, kind: EntityKind, index: usize) -> Result<&[f32]> {
        let matrix = self.matrix(kind);
        matrix.row(index).ok_or(RecError::UnknownIndex {
            kind,
            index,
            len: matrix.rows(),
        })
    }

    pub fn embedding_of(&self, kind: EntityKind, id: i64) -> Result<&[f32]> {
        let index = self.codec(kind).encode(&id)?;
        self.row_for(kind, index)
    }
}

fn check_shape(kind: EntityKind, matrix: &EmbeddingMatrix, codec: &IdCodec<i64>) -> Result<()> {
    if matrix.rows() != codec.len() {
        return Err(RecError::DimensionMismatch(format!(
            "{kind} matrix has {} rows but the codec holds {} ids",
            matrix.rows(),
            codec.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EmbeddingStore {
        EmbeddingStore::new(
            EmbeddingMatrix::from_rows(vec![vec![2.0, 0.0], vec![0.0, 3.0]]).unwrap(),
            EmbeddingMatrix::from_rows(vec![vec![1.0, 1.0]]).unwrap(),
            IdCodec::from_ids(EntityKind::User, vec![100i64, 200]),
            IdCodec::from_ids(EntityKind::Item, vec![7i64]),
        )
        .unwrap()
    }

    #[test]
    fn rows_are_normalized_on_build() {
        let store = store();
        assert!(store.matrix(EntityKind::User).is_normalized());
        assert!(store.matrix(EntityKind::Item).is_normalized());
        assert_eq!(store.row_for(EntityKind::User, 1).unwrap(), &[0.0, 1.0]);
        assert_eq!(store.embedding_of(EntityKind::User, 100).unwrap(), &[1.0, 0.0]);
    }

    #[test]
    fn lookups_outside_the_codec_fail() {
        let store = store();
        assert!(store.row_for(EntityKind::Item, 1).unwrap_err().is_unknown_entity());
        assert!(store
            .embedding_of(EntityKind::User, 300)
            .unwrap_err()
            .is_unknown_entity());
    }

    #[test]
    fn row_count_must_match_codec() {
        let err = EmbeddingStore::new(
            EmbeddingMatrix::from_rows(vec![vec![1.0]]).unwrap(),
            EmbeddingMatrix::from_rows(vec![vec![1.0]]).unwrap(),
            IdCodec::from_ids(EntityKind::User, vec![1i64, 2]),
            IdCodec::from_ids(EntityKind::Item, vec![1i64]),
        )
        .unwrap_err();
        assert!(matches!(err, RecError::DimensionMismatch(_)));
    }
}
