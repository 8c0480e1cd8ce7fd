use std::fs::{self, File};
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use anirec_core::{
    preprocess, save_matrix, ArtifactPaths, EmbeddingMatrix, EmbeddingStore, EntityKind,
    HybridConfig, HybridRecommender, ItemQuery, ItemTable, PreprocessConfig, RankOrder,
    RatingTable,
};
use anirec_export::{FailureRecord, JsonlWriter, NeighborRecord, RecommendationRecord};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_CONFIG: &str = "anirec.toml";
const DEFAULT_ARTIFACTS: &str = "artifacts";

#[derive(Parser, Debug)]
#[command(name = "anirec", version = VERSION, about = "Hybrid anime recommendations from trained embeddings")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Filter and encode a rating export into an artifact directory.
    Preprocess {
        #[arg(long)]
        ratings: PathBuf,
        #[arg(long)]
        anime: PathBuf,
        #[arg(long)]
        synopsis: Option<PathBuf>,
        #[arg(long = "min-ratings")]
        min_ratings: Option<usize>,
        #[arg(long = "no-scale", action = ArgAction::SetTrue)]
        no_scale: bool,
    },
    /// Normalize exported embedding weights (one CSV row per encoded index).
    ImportWeights {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        input: PathBuf,
    },
    SimilarItems {
        item: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        n: usize,
        #[arg(long, action = ArgAction::SetTrue)]
        least: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    SimilarUsers {
        user: i64,
        #[arg(short = 'n', long, default_value_t = 10)]
        n: usize,
        #[arg(long, action = ArgAction::SetTrue)]
        least: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    Preferences {
        user: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    Recommend {
        user: i64,
        #[command(flatten)]
        weights: WeightArgs,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    RecommendBatch {
        #[arg(required = true, value_delimiter = ',')]
        users: Vec<i64>,
        #[command(flatten)]
        weights: WeightArgs,
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct WeightArgs {
    #[arg(long = "user-weight")]
    user_weight: Option<f64>,
    #[arg(long = "content-weight")]
    content_weight: Option<f64>,
    #[arg(long = "top-n")]
    top_n: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
    User,
    Item,
}

impl From<KindArg> for EntityKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::User => EntityKind::User,
            KindArg::Item => EntityKind::Item,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    artifacts: ArtifactsSection,
    #[serde(default)]
    hybrid: HybridConfig,
    #[serde(default)]
    preprocess: PreprocessConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ArtifactsSection {
    root: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let file_config = load_config(&config_path)?;
    let paths = ArtifactPaths::new(
        cli.artifacts
            .clone()
            .or_else(|| file_config.artifacts.root.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS)),
    );

    match cli.command {
        Commands::Preprocess {
            ratings,
            anime,
            synopsis,
            min_ratings,
            no_scale,
        } => {
            let mut config = file_config.preprocess.clone();
            if let Some(min) = min_ratings {
                config.min_ratings = min;
            }
            if no_scale {
                config.scale_ratings = false;
            }
            run_preprocess(&paths, &ratings, &anime, synopsis.as_deref(), &config)
        }
        Commands::ImportWeights { kind, input } => import_weights(&paths, kind.into(), &input),
        Commands::SimilarItems {
            item,
            n,
            least,
            json,
        } => {
            let ctx = LoadedArtifacts::open(&paths)?;
            let recommender = ctx.recommender(file_config.hybrid.clone())?;
            let query = item.parse::<ItemQuery>()?;
            let similar = recommender.similar_items(&query, n, rank_order(least))?;
            if json {
                print_json(&NeighborRecord::from_items(&query.to_string(), &similar))?;
            } else {
                println!("anime closest to {query}:");
                for (idx, item) in similar.iter().enumerate() {
                    println!(
                        "{:>3}. {} [{}] {:.4}",
                        idx + 1,
                        item.name,
                        item.genres.as_deref().unwrap_or("-"),
                        item.score
                    );
                }
            }
            Ok(())
        }
        Commands::SimilarUsers {
            user,
            n,
            least,
            json,
        } => {
            let ctx = LoadedArtifacts::open(&paths)?;
            let recommender = ctx.recommender(file_config.hybrid.clone())?;
            let neighbors = recommender.similar_users(user, n, rank_order(least))?;
            if json {
                print_json(&NeighborRecord::from_users(user, &neighbors))?;
            } else {
                println!("users closest to {user}:");
                for (idx, neighbor) in neighbors.iter().enumerate() {
                    println!("{:>3}. user {} {:.4}", idx + 1, neighbor.id, neighbor.score);
                }
            }
            Ok(())
        }
        Commands::Preferences { user, json } => {
            let ctx = LoadedArtifacts::open(&paths)?;
            let recommender = ctx.recommender(file_config.hybrid.clone())?;
            let prefs = recommender.preferences(user)?;
            if json {
                print_json(&prefs)?;
            } else {
                for pref in &prefs {
                    println!(
                        "{:.3}  {} [{}]",
                        pref.rating,
                        pref.name,
                        pref.genres.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }
        Commands::Recommend {
            user,
            weights,
            json,
        } => {
            let ctx = LoadedArtifacts::open(&paths)?;
            let config = resolve_hybrid_config(&file_config.hybrid, &weights)?;
            let recommender = ctx.recommender(config)?;
            let rec = recommender.recommend_detailed(user)?;
            if json {
                print_json(&rec)?;
            } else {
                for (idx, item) in rec.items.iter().enumerate() {
                    println!("{:>3}. {} ({:.2})", idx + 1, item.name, item.score);
                }
                if rec.items.is_empty() {
                    println!("no recommendations for user {user}");
                }
            }
            Ok(())
        }
        Commands::RecommendBatch {
            users,
            weights,
            out,
        } => {
            let ctx = LoadedArtifacts::open(&paths)?;
            let config = resolve_hybrid_config(&file_config.hybrid, &weights)?;
            let recommender = ctx.recommender(config)?;
            run_batch(&recommender, &users, &out)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

fn resolve_hybrid_config(base: &HybridConfig, args: &WeightArgs) -> Result<HybridConfig> {
    let mut config = base.clone();
    if let Some(weight) = args.user_weight {
        config.user_weight = weight;
    }
    if let Some(weight) = args.content_weight {
        config.content_weight = weight;
    }
    if let Some(top_n) = args.top_n {
        config.top_n = top_n;
    }
    config.validate()?;
    Ok(config)
}

fn rank_order(least: bool) -> RankOrder {
    if least {
        RankOrder::LeastSimilar
    } else {
        RankOrder::MostSimilar
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Everything a recommendation command reads from the artifact directory.
struct LoadedArtifacts {
    store: EmbeddingStore,
    ratings: RatingTable,
    items: ItemTable,
}

impl LoadedArtifacts {
    fn open(paths: &ArtifactPaths) -> Result<Self> {
        let store = EmbeddingStore::load(paths).with_context(|| {
            format!(
                "failed to load embeddings from {}",
                paths.root().display()
            )
        })?;
        let ratings = RatingTable::from_csv_path(&paths.ratings())
            .with_context(|| format!("failed to read {}", paths.ratings().display()))?;
        let items = ItemTable::from_csv_path(&paths.items())
            .with_context(|| format!("failed to read {}", paths.items().display()))?;
        Ok(Self {
            store,
            ratings,
            items,
        })
    }

    fn recommender(&self, config: HybridConfig) -> Result<HybridRecommender<'_>> {
        Ok(HybridRecommender::new(
            &self.store,
            &self.ratings,
            &self.items,
            config,
        )?)
    }
}

fn run_preprocess(
    paths: &ArtifactPaths,
    ratings: &Path,
    anime: &Path,
    synopsis: Option<&Path>,
    config: &PreprocessConfig,
) -> Result<()> {
    let table = RatingTable::from_csv_path(ratings)
        .with_context(|| format!("failed to read ratings {}", ratings.display()))?;
    let mut items = ItemTable::from_csv_path(anime)
        .with_context(|| format!("failed to read anime table {}", anime.display()))?;
    if let Some(path) = synopsis {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let attached = items.attach_synopses(file)?;
        info!(attached, "attached synopses");
    }
    let processed = preprocess(table, config)?;
    processed.save(paths, &items)?;
    println!(
        "preprocessed {} ratings: {} users, {} items -> {}",
        processed.ratings.len(),
        processed.user_codec.len(),
        processed.item_codec.len(),
        paths.root().display()
    );
    Ok(())
}

fn import_weights(paths: &ArtifactPaths, kind: EntityKind, input: &Path) -> Result<()> {
    let file = File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut matrix = parse_weights_csv(file)?;
    let codec = anirec_core::load_codec(&paths.codec(kind), kind)
        .with_context(|| format!("run preprocess before importing {kind} weights"))?;
    if matrix.rows() != codec.len() {
        bail!(
            "{kind} weights have {} rows but the codec holds {} ids",
            matrix.rows(),
            codec.len()
        );
    }
    let touched = matrix.normalize_rows();
    if touched > 0 {
        warn!(%kind, rows = touched, "normalized imported weights");
    }
    save_matrix(&paths.weights(kind), &matrix)?;
    println!(
        "imported {}x{} {kind} embeddings -> {}",
        matrix.rows(),
        matrix.dims(),
        paths.weights(kind).display()
    );
    Ok(())
}

fn parse_weights_csv<R: Read>(reader: R) -> Result<EmbeddingMatrix> {
    let mut reader = ReaderBuilder::new().has_headers(false).from_reader(reader);
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("invalid weights row {}", line + 1))?;
        let row = record
            .iter()
            .map(|cell| cell.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("non-numeric value in weights row {}", line + 1))?;
        rows.push(row);
    }
    Ok(EmbeddingMatrix::from_rows(rows)?)
}

fn run_batch(recommender: &HybridRecommender<'_>, users: &[i64], out: &Path) -> Result<()> {
    let file = File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut writer = JsonlWriter::new(BufWriter::new(file));
    let mut failures = 0;
    for (user_id, result) in recommender.recommend_batch(users) {
        match result {
            Ok(rec) => writer.write_records(&RecommendationRecord::from_recommendation(&rec))?,
            Err(err) => {
                failures += 1;
                warn!(user_id, error = %err, "recommendation failed");
                writer.write_record(&FailureRecord {
                    user_id,
                    error: err.to_string(),
                })?;
            }
        }
    }
    let written = writer.written();
    writer.into_inner()?;
    println!(
        "wrote {written} records for {} users ({failures} failed) -> {}",
        users.len(),
        out.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_sections_are_optional() {
        let config: AppConfig = toml::from_str(
            r#"
            [artifacts]
            root = "/data/anirec"

            [hybrid]
            user_weight = 0.6
            top_n = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.artifacts.root, Some(PathBuf::from("/data/anirec")));
        assert_eq!(config.hybrid.user_weight, 0.6);
        assert_eq!(config.hybrid.content_weight, 0.3);
        assert_eq!(config.hybrid.top_n, 5);
        assert_eq!(config.preprocess.min_ratings, 400);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.artifacts.root.is_none());
        assert_eq!(config.hybrid, HybridConfig::default());
    }

    #[test]
    fn flags_override_file_values() {
        let base = HybridConfig {
            top_n: 5,
            ..HybridConfig::default()
        };
        let args = WeightArgs {
            user_weight: Some(0.5),
            content_weight: None,
            top_n: Some(20),
        };
        let config = resolve_hybrid_config(&base, &args).unwrap();
        assert_eq!(config.user_weight, 0.5);
        assert_eq!(config.content_weight, 0.3);
        assert_eq!(config.top_n, 20);

        let invalid = WeightArgs {
            top_n: Some(0),
            ..WeightArgs::default()
        };
        assert!(resolve_hybrid_config(&base, &invalid).is_err());
    }

    #[test]
    fn weights_csv_parses_rows() {
        let matrix = parse_weights_csv("0.5,1.5\n-2,0\n".as_bytes()).unwrap();
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.dims(), 2);
        assert_eq!(matrix.row(1).unwrap(), &[-2.0, 0.0]);
        assert!(parse_weights_csv("0.5,abc\n".as_bytes()).is_err());
    }

    #[test]
    fn import_requires_matching_codec() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        let codec = anirec_core::IdCodec::from_ids(EntityKind::Item, vec![10i64, 20]);
        anirec_core::save_codec(&paths.codec(EntityKind::Item), &codec).unwrap();

        let input = dir.path().join("weights.csv");
        fs::write(&input, "3,4\n0,2\n").unwrap();
        import_weights(&paths, EntityKind::Item, &input).unwrap();
        let matrix = anirec_core::load_matrix(&paths.weights(EntityKind::Item)).unwrap();
        assert!(matrix.is_normalized());

        fs::write(&input, "3,4\n").unwrap();
        assert!(import_weights(&paths, EntityKind::Item, &input).is_err());
    }
}
