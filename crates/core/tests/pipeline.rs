use std::collections::HashMap;

use anirec_core::{
    preprocess, save_matrix, ArtifactPaths, EmbeddingMatrix, EmbeddingStore, EntityKind,
    HybridConfig, HybridRecommender, IdCodec, ItemQuery, ItemRecord, ItemTable, PreprocessConfig,
    RankOrder, Rating, RatingTable, RecError,
};

const A: i64 = 1;
const B: i64 = 2;
const C: i64 = 3;
const D: i64 = 4;
const X: i64 = 5;
const Y: i64 = 6;

fn ratings() -> RatingTable {
    let raw = [
        // query user: favours X and Y
        (1, X, 10.0),
        (1, Y, 10.0),
        (1, A, 1.0),
        (1, B, 1.0),
        (2, A, 10.0),
        (2, B, 10.0),
        (2, X, 10.0),
        (2, D, 2.0),
        (3, B, 9.0),
        (3, A, 9.0),
        (3, C, 3.0),
        (3, D, 1.0),
        (4, C, 8.0),
        (4, D, 2.0),
        (4, Y, 8.0),
        (4, A, 1.0),
        (5, D, 10.0),
        (5, C, 10.0),
        (6, D, 7.0),
    ];
    RatingTable::new(
        raw.iter()
            .map(|&(user_id, anime_id, rating)| Rating {
                user_id,
                anime_id,
                rating,
            })
            .collect(),
    )
}

fn items() -> ItemTable {
    let names = [(A, "A"), (B, "B"), (C, "C"), (D, "D"), (X, "X"), (Y, "Y")];
    ItemTable::new(
        names
            .iter()
            .map(|&(anime_id, name)| ItemRecord {
                anime_id,
                name: name.to_string(),
                genres: Some("Action".to_string()),
                score: None,
                synopsis: Some(format!("About {name}.")),
            })
            .collect(),
    )
}

fn matrix_for(codec: &IdCodec<i64>, vectors: &HashMap<i64, Vec<f32>>) -> EmbeddingMatrix {
    let rows = codec.ids().iter().map(|id| vectors[id].clone()).collect();
    EmbeddingMatrix::from_rows(rows).unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    paths: ArtifactPaths,
}

fn persist(
    ratings: RatingTable,
    items: &ItemTable,
    users: &[(i64, Vec<f32>)],
    vectors: &[(i64, Vec<f32>)],
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let paths = ArtifactPaths::new(dir.path().join("artifacts"));
    let config = PreprocessConfig {
        min_ratings: 1,
        scale_ratings: false,
    };
    let processed = preprocess(ratings, &config).unwrap();
    processed.save(&paths, items).unwrap();

    let users: HashMap<i64, Vec<f32>> = users.iter().cloned().collect();
    let vectors: HashMap<i64, Vec<f32>> = vectors.iter().cloned().collect();
    save_matrix(
        &paths.weights(EntityKind::User),
        &matrix_for(&processed.user_codec, &users),
    )
    .unwrap();
    save_matrix(
        &paths.weights(EntityKind::Item),
        &matrix_for(&processed.item_codec, &vectors),
    )
    .unwrap();
    Fixture { _dir: dir, paths }
}

fn write_artifacts() -> Fixture {
    let users = [
        (1, vec![1.0, 0.0]),
        (2, vec![0.9, 0.1]),
        (3, vec![0.8, 0.2]),
        (4, vec![0.7, 0.3]),
        (5, vec![-1.0, 0.0]),
        (6, vec![-0.9, -0.1]),
    ];
    // stored unnormalized on purpose; the store rescales on load
    let vectors = [
        (A, vec![2.0, 0.0, 0.0]),
        (B, vec![0.9, 0.1, 0.0]),
        (C, vec![0.0, 0.0, 1.0]),
        (D, vec![0.0, 0.1, 0.9]),
        (X, vec![0.0, 1.0, 0.0]),
        (Y, vec![0.0, 0.7, -0.7]),
    ];
    persist(ratings(), &items(), &users, &vectors)
}

fn open(fixture: &Fixture) -> (EmbeddingStore, RatingTable, ItemTable) {
    let store = EmbeddingStore::load(&fixture.paths).unwrap();
    let ratings = RatingTable::from_csv_path(&fixture.paths.ratings()).unwrap();
    let items = ItemTable::from_csv_path(&fixture.paths.items()).unwrap();
    (store, ratings, items)
}

fn config() -> HybridConfig {
    HybridConfig {
        similar_users: 3,
        similar_items: 1,
        ..HybridConfig::default()
    }
}

#[test]
fn recommends_through_persisted_artifacts() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    assert!(store.matrix(EntityKind::Item).is_normalized());

    let recommender = HybridRecommender::new(&store, &ratings, &items, config()).unwrap();
    let detailed = recommender.recommend_detailed(1).unwrap();

    let neighbors: Vec<i64> = detailed.similar_users.iter().map(|n| n.id).collect();
    assert_eq!(neighbors, vec![2, 3, 4]);

    let user_based: Vec<(&str, usize)> = detailed
        .user_based
        .iter()
        .map(|c| (c.name.as_str(), c.count))
        .collect();
    assert_eq!(user_based, vec![("A", 2), ("B", 2), ("C", 1)]);
    assert_eq!(detailed.user_based[0].synopsis.as_deref(), Some("About A."));

    assert_eq!(detailed.content_based, vec!["B", "A", "D"]);
    // A and B tie at 1.0; A was seen first
    assert_eq!(detailed.names(), vec!["A", "B", "C", "D"]);
    assert!((detailed.items[0].score - 1.0).abs() < 1e-9);
    assert!((detailed.items[2].score - 0.7).abs() < 1e-9);
    assert!((detailed.items[3].score - 0.3).abs() < 1e-9);

    assert_eq!(recommender.recommend(1).unwrap(), detailed.names());
}

#[test]
fn top_n_caps_the_final_list() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    let config = HybridConfig {
        top_n: 2,
        ..config()
    };
    let recommender = HybridRecommender::new(&store, &ratings, &items, config).unwrap();
    assert_eq!(recommender.recommend(1).unwrap(), vec!["A", "B"]);
}

#[test]
fn unknown_user_is_an_error_not_an_empty_list() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    let recommender = HybridRecommender::new(&store, &ratings, &items, config()).unwrap();
    match recommender.recommend(404) {
        Err(RecError::UnknownEntity { kind, id }) => {
            assert_eq!(kind, EntityKind::User);
            assert_eq!(id, "404");
        }
        other => panic!("expected unknown entity, got {other:?}"),
    }
}

#[test]
fn single_rating_user_has_insufficient_data() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    let recommender = HybridRecommender::new(&store, &ratings, &items, config()).unwrap();
    assert!(matches!(
        recommender.recommend(6),
        Err(RecError::InsufficientData { user: 6, ratings: 1 })
    ));
}

#[test]
fn neighbors_with_too_few_ratings_are_skipped() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    let recommender = HybridRecommender::new(&store, &ratings, &items, config()).unwrap();
    let detailed = recommender.recommend_detailed(5).unwrap();
    assert_eq!(detailed.similar_users[0].id, 6);
    let names: Vec<&str> = detailed.user_based.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Y", "B", "A"]);
    assert!(!detailed.names().iter().any(|n| n == "C" || n == "D"));
}

#[test]
fn similar_items_resolve_by_name_or_id() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    let recommender = HybridRecommender::new(&store, &ratings, &items, config()).unwrap();

    let by_name = recommender
        .similar_items(&ItemQuery::Name("C".into()), 2, RankOrder::MostSimilar)
        .unwrap();
    let by_id = recommender
        .similar_items(&ItemQuery::Id(C), 2, RankOrder::MostSimilar)
        .unwrap();
    assert_eq!(by_name, by_id);
    assert_eq!(by_name[0].name, "D");
    assert!(by_name.iter().all(|item| item.anime_id != C));

    let farthest = recommender
        .similar_items(&ItemQuery::Id(C), 1, RankOrder::LeastSimilar)
        .unwrap();
    assert_eq!(farthest[0].name, "Y");
}

#[test]
fn batch_results_keep_input_order() {
    let fixture = write_artifacts();
    let (store, ratings, items) = open(&fixture);
    let recommender = HybridRecommender::new(&store, &ratings, &items, config()).unwrap();
    let results = recommender.recommend_batch(&[1, 404, 6]);
    let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 404, 6]);
    assert_eq!(
        results[0].1.as_ref().unwrap().names(),
        vec!["A", "B", "C", "D"]
    );
    assert!(results[1].1.is_err());
    assert!(results[2].1.is_err());
}

#[test]
fn shared_candidate_outranks_single_signal_ties() {
    let raw = [
        // query user only loves X
        (1, X, 10.0),
        (1, A, 1.0),
        (2, A, 10.0),
        (2, B, 10.0),
        (2, D, 1.0),
        (3, C, 10.0),
        (3, D, 1.0),
    ];
    let ratings = RatingTable::new(
        raw.iter()
            .map(|&(user_id, anime_id, rating)| Rating {
                user_id,
                anime_id,
                rating,
            })
            .collect(),
    );
    let users = [
        (1, vec![1.0, 0.0]),
        (2, vec![0.9, 0.1]),
        (3, vec![0.8, 0.2]),
    ];
    // nearest: A -> B, B -> D, C -> B
    let vectors = [
        (X, vec![-1.0, 0.0, 0.0]),
        (A, vec![1.0, 0.0, 0.0]),
        (B, vec![0.6, 0.8, 0.0]),
        (D, vec![0.0, 0.8, 0.6]),
        (C, vec![0.0, 0.6, -0.8]),
    ];
    let fixture = persist(ratings, &items(), &users, &vectors);
    let (store, ratings, items) = open(&fixture);
    let config = HybridConfig {
        similar_users: 2,
        similar_items: 1,
        ..HybridConfig::default()
    };
    let recommender = HybridRecommender::new(&store, &ratings, &items, config).unwrap();
    let detailed = recommender.recommend_detailed(1).unwrap();

    let user_based: Vec<&str> = detailed.user_based.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(user_based, vec!["A", "B", "C"]);
    assert_eq!(detailed.content_based, vec!["B", "D", "B"]);
    // B collects both signals; A and C tie at 0.7 and keep first-seen order
    assert_eq!(recommender.recommend(1).unwrap(), vec!["B", "A", "C", "D"]);
    assert!((detailed.items[1].score - detailed.items[2].score).abs() < 1e-12);
    assert!((detailed.items[3].score - 0.3).abs() < 1e-9);
}
