//! CLI for training SchNet on 2-D symmetry groups.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use schnet_symmetry::{
    data::{buffered_shuffle, load_archive, DatasetClient, DatasetSplit},
    graph::GraphBuilder,
    nn::softmax,
    plot,
    schnet::SchNetModel,
    training::{evaluate, predict_labels, History, Trainer},
    utils::Config,
};

#[derive(Parser)]
#[command(name = "schnet-symmetry")]
#[command(about = "SchNet graph neural network for 2-D symmetry group classification")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the trajectory archive
    Fetch {
        /// Download again even if the archive is cached
        #[arg(short, long)]
        force: bool,

        /// Archive URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Plot sample point clouds and their neighbor graphs
    Explore,

    /// Build graphs, train the model and plot its accuracy
    Train {
        /// Number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        lr: Option<f64>,

        /// Graphs per optimizer step
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Node feature width
        #[arg(long)]
        channels: Option<usize>,

        /// Number of interaction blocks
        #[arg(long)]
        blocks: Option<usize>,
    },

    /// Evaluate a saved model on the test split and plot predictions
    Predict {
        /// Path to trained model
        #[arg(short, long)]
        model_path: Option<PathBuf>,
    },

    /// Run the whole walkthrough: fetch, explore, train, predict
    Run {
        /// Number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Fetch { force, url } => {
            if let Some(url) = url {
                config.data.url = url;
            }
            fetch(&config, force).await?;
        }

        Commands::Explore => {
            let archive = fetch(&config, false).await?;
            explore(&config, &archive)?;
        }

        Commands::Train {
            epochs,
            lr,
            batch_size,
            channels,
            blocks,
        } => {
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(lr) = lr {
                config.training.learning_rate = lr;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(channels) = channels {
                config.model.channels = channels;
            }
            if let Some(blocks) = blocks {
                config.model.gnn_blocks = blocks;
            }
            let archive = fetch(&config, false).await?;
            train(&config, &archive)?;
        }

        Commands::Predict { model_path } => {
            let archive = fetch(&config, false).await?;
            let model_path = model_path.unwrap_or_else(|| config.data.model_path());
            predict(&config, &archive, &model_path)?;
        }

        Commands::Run { epochs } => {
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            let archive = fetch(&config, false).await?;
            explore(&config, &archive)?;
            let model_path = train(&config, &archive)?;
            predict(&config, &archive, &model_path)?;
        }
    }

    Ok(())
}

/// Download the archive unless it is already cached
async fn fetch(config: &Config, force: bool) -> Result<PathBuf> {
    let client = DatasetClient::new();
    let path = client
        .download(&config.data.url, &config.data.archive_path, force)
        .await
        .with_context(|| format!("Failed to download {}", config.data.url))?;
    Ok(path)
}

/// Trajectories, group names and the shuffled split
fn load_split(config: &Config, archive: &Path) -> Result<(Vec<String>, DatasetSplit)> {
    let trajectories = load_archive(archive)
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    let labels = trajectories.label_names();
    info!(
        "Loaded {} trajectories, {} samples, {} groups",
        trajectories.len(),
        trajectories.num_samples(),
        labels.len()
    );

    let split = DatasetSplit::shuffle_and_split(trajectories.samples(), &config.data.split)
        .context("Failed to split dataset")?;
    Ok((labels, split))
}

fn plot_path(config: &Config, name: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(&config.plot.output_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join(name))
}

fn explore(config: &Config, archive: &Path) -> Result<()> {
    let trajectories = load_archive(archive)
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    let labels = trajectories.label_names();

    let mut rng = StdRng::seed_from_u64(config.data.split.seed);
    let samples = buffered_shuffle(
        trajectories.samples(),
        config.data.split.shuffle_buffer,
        &mut rng,
    );

    println!("\nDataset");
    println!("=======");
    println!("Trajectories: {}", trajectories.len());
    println!("Samples:      {}", samples.len());
    println!("Groups:       {}", labels.join(", "));
    if let Some(first) = samples.first() {
        println!("Atoms per sample: {}", first.num_atoms());
    }

    plot::plot_samples(
        plot_path(config, "samples.svg")?,
        &config.plot,
        &samples,
        &labels,
    )?;
    plot::plot_neighbors(
        plot_path(config, "neighbors.svg")?,
        &config.plot,
        &samples,
        &labels,
    )?;
    Ok(())
}

/// Train a model and return where it was saved
fn train(config: &Config, archive: &Path) -> Result<PathBuf> {
    let mut config = config.clone();
    config.sync_model();

    let (labels, split) = load_split(&config, archive)?;
    let builder = GraphBuilder::from_config(&config.graph);
    let train_graphs = builder.build_all(&split.train);
    let val_graphs = builder.build_all(&split.val);

    config.model.label_dim = labels.len();
    let mut model = SchNetModel::new(config.model.clone()).context("Invalid model config")?;
    println!("\n{}\n", model.summary());

    let trainer = Trainer::new(config.training.clone());
    let history = trainer.fit(&mut model, &train_graphs, &val_graphs)?;

    let output_dir = PathBuf::from(&config.data.output_dir);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let model_path = config.data.model_path();
    model
        .save(&model_path)
        .with_context(|| format!("Failed to save model to {}", model_path.display()))?;
    history.save(config.data.history_path())?;
    info!("Saved model to {}", model_path.display());

    print_history(&history);
    plot::plot_history(
        plot_path(&config, "accuracy.svg")?,
        &config.plot,
        &history,
        labels.len(),
    )?;
    Ok(model_path)
}

fn predict(config: &Config, archive: &Path, model_path: &Path) -> Result<()> {
    let model = SchNetModel::load(model_path)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    let (labels, split) = load_split(config, archive)?;
    if model.config.label_dim != labels.len() {
        bail!(
            "Model predicts {} groups but the dataset has {}",
            model.config.label_dim,
            labels.len()
        );
    }

    let mut graph_config = config.graph.clone();
    if graph_config.edge_features != model.config.edge_features {
        warn!(
            "Using {} edge features from the saved model",
            model.config.edge_features
        );
        graph_config.edge_features = model.config.edge_features;
    }
    let builder = GraphBuilder::from_config(&graph_config);
    let test_graphs = builder.build_all(&split.test);

    let (loss, accuracy) = evaluate(&model, &test_graphs)?;
    println!("\nTest loss: {:.4}", loss);
    println!("Test accuracy: {:.2}%", accuracy * 100.0);

    if let Some(first) = test_graphs.first() {
        let proba = softmax(&model.predict_logits(&first.graph)?);
        println!("\nClass probabilities of the first test sample:");
        for (name, p) in labels.iter().zip(proba.iter()) {
            println!("  {:>6}: {:.4}", name, p);
        }
    }

    let predicted = predict_labels(&model, &test_graphs)?;
    plot::plot_predictions(
        plot_path(config, "predictions.svg")?,
        &config.plot,
        &split.test,
        &predicted,
        &labels,
    )?;
    Ok(())
}

fn print_history(history: &History) {
    println!("\nTraining History");
    println!("================");
    for m in &history.epochs {
        println!("{}", m);
    }
    if let Some(best) = history.best_epoch() {
        println!(
            "Best validation accuracy: {:.2}% (epoch {})",
            best.val_accuracy.unwrap_or_default() * 100.0,
            best.epoch
        );
    }
}
