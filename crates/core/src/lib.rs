mod artifact;
mod codec;
mod embedding;
mod error;
mod hybrid;
mod preference;
mod preprocess;
mod similarity;
mod store;
mod table;

pub use artifact::{
    load_codec, load_matrix, read_matrix, save_codec, save_matrix, write_matrix, ArtifactPaths,
};
pub use codec::IdCodec;
pub use embedding::{dot, l2_norm, EmbeddingMatrix, NORM_TOLERANCE};
pub use error::{EntityKind, RecError, Result};
pub use hybrid::{
    combine_scores, HybridConfig, HybridRecommender, Recommendation, ScoredItem, SimilarItem,
    UserBasedCandidate,
};
pub use preference::{percentile, PreferenceExtractor, PreferredItem, DEFAULT_PERCENTILE};
pub use preprocess::{preprocess, scale_min_max, PreprocessConfig, Preprocessed};
pub use similarity::{select_neighbors, Neighbor, RankOrder, SimilarityRanker};
pub use store::EmbeddingStore;
pub use table::{ItemQuery, ItemRecord, ItemTable, Rating, RatingTable};
