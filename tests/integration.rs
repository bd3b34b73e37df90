//! Integration tests for the full pipeline

use ndarray::Array3;
use schnet_symmetry::{
    data::{DatasetSplit, SplitConfig, TrajectorySet},
    graph::{GraphBuilder, GraphConfig},
    plot::{self, PlotConfig},
    schnet::{SchNetConfig, SchNetModel},
    training::{evaluate, predict_labels, Trainer, TrainingConfig},
    utils::Config,
};
use tempfile::tempdir;

const SIDE: usize = 5;
const FRAMES: usize = 12;

/// Lattice points, `skew` shifts every other row (0.5 gives a hexagonal net)
fn lattice_trajectory(skew: f64, row_height: f64) -> Array3<f64> {
    Array3::from_shape_fn((FRAMES, SIDE * SIDE, 2), |(f, a, c)| {
        let (col, row) = ((a % SIDE) as f64, (a / SIDE) as f64);
        let jitter = 0.02 * (((f * 31 + a * 17 + c * 7) % 11) as f64 - 5.0) / 5.0;
        if c == 0 {
            col + skew * (row % 2.0) + jitter
        } else {
            row * row_height + jitter
        }
    })
}

fn toy_set() -> TrajectorySet {
    TrajectorySet::from_entries(vec![
        ("p4m-square".to_string(), lattice_trajectory(0.0, 1.0)),
        ("p6m-hexagonal".to_string(), lattice_trajectory(0.5, 0.866)),
    ])
    .unwrap()
}

fn split_config() -> SplitConfig {
    SplitConfig {
        shuffle_buffer: 100,
        seed: 3,
        val_size: 4,
        test_size: 4,
    }
}

fn graph_config() -> GraphConfig {
    GraphConfig {
        max_degree: 6,
        edge_features: 6,
        max_r: 3.0,
        gamma: 2.0,
    }
}

fn quiet_training(epochs: usize, learning_rate: f64) -> TrainingConfig {
    TrainingConfig {
        epochs,
        learning_rate,
        show_progress: false,
        ..Default::default()
    }
}

#[test]
fn test_labels_and_split() {
    let set = toy_set();
    assert_eq!(set.label_names(), vec!["p4m".to_string(), "p6m".to_string()]);
    assert_eq!(set.num_samples(), 2 * FRAMES);

    let split = DatasetSplit::shuffle_and_split(set.samples(), &split_config()).unwrap();
    assert_eq!(split.val.len(), 4);
    assert_eq!(split.test.len(), 4);
    assert_eq!(split.train.len(), 2 * FRAMES - 8);
}

#[test]
fn test_training_reduces_loss() {
    let set = toy_set();
    let labels = set.label_names();
    let split = DatasetSplit::shuffle_and_split(set.samples(), &split_config()).unwrap();

    let builder = GraphBuilder::from_config(&graph_config());
    let train = builder.build_all(&split.train);
    let val = builder.build_all(&split.val);
    assert_eq!(train[0].graph.degree(), 6);

    let config = SchNetConfig::new(2, 8, labels.len()).with_edge_features(6).with_seed(1);
    let mut model = SchNetModel::new(config).unwrap();
    let history = Trainer::new(quiet_training(12, 5e-3))
        .fit(&mut model, &train, &val)
        .unwrap();

    let losses = history.train_loss();
    assert_eq!(losses.len(), 12);
    assert!(
        losses[losses.len() - 1] < losses[0],
        "loss did not decrease: {:?}",
        losses
    );
}

#[test]
fn test_saved_model_predicts_the_same() {
    let dir = tempdir().unwrap();
    let set = toy_set();
    let split = DatasetSplit::shuffle_and_split(set.samples(), &split_config()).unwrap();
    let builder = GraphBuilder::from_config(&graph_config());
    let train = builder.build_all(&split.train);
    let test = builder.build_all(&split.test);

    let mut model =
        SchNetModel::new(SchNetConfig::new(1, 6, 2).with_edge_features(6)).unwrap();
    Trainer::new(quiet_training(2, 1e-3))
        .fit(&mut model, &train, &[])
        .unwrap();

    let path = dir.path().join("model.json");
    model.save(&path).unwrap();
    let loaded = SchNetModel::load(&path).unwrap();

    assert_eq!(
        predict_labels(&model, &test).unwrap(),
        predict_labels(&loaded, &test).unwrap()
    );
    let (loss_a, acc_a) = evaluate(&model, &test).unwrap();
    let (loss_b, acc_b) = evaluate(&loaded, &test).unwrap();
    assert!((loss_a - loss_b).abs() < 1e-9);
    assert_eq!(acc_a, acc_b);
}

#[test]
fn test_figures() {
    let dir = tempdir().unwrap();
    let set = toy_set();
    let labels = set.label_names();
    let samples = set.samples();
    let plot_config = PlotConfig {
        neighbor_stride: 5,
        ..Default::default()
    };

    plot::plot_samples(dir.path().join("samples.svg"), &plot_config, &samples, &labels).unwrap();
    plot::plot_neighbors(dir.path().join("neighbors.svg"), &plot_config, &samples, &labels)
        .unwrap();

    let builder = GraphBuilder::from_config(&graph_config());
    let graphs = builder.build_all(&samples);
    let mut model =
        SchNetModel::new(SchNetConfig::new(1, 4, 2).with_edge_features(6)).unwrap();
    let history = Trainer::new(quiet_training(1, 1e-3))
        .fit(&mut model, &graphs, &graphs[..4])
        .unwrap();
    plot::plot_history(dir.path().join("accuracy.svg"), &plot_config, &history, 2).unwrap();

    let predicted = predict_labels(&model, &graphs).unwrap();
    plot::plot_predictions(
        dir.path().join("predictions.svg"),
        &plot_config,
        &samples,
        &predicted,
        &labels,
    )
    .unwrap();

    for name in ["samples.svg", "neighbors.svg", "accuracy.svg", "predictions.svg"] {
        let svg = std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert!(svg.contains("<svg"), "{} is not an SVG", name);
    }
}

#[test]
fn test_config_file_drives_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [data.split]
        val_size = 2
        test_size = 2

        [graph]
        max_degree = 4
        edge_features = 5

        [model]
        gnn_blocks = 1
        channels = 6
        "#,
    )
    .unwrap();

    let mut config = Config::from_file(&path).unwrap();
    config.sync_model();
    config.model.label_dim = 2;

    let split = DatasetSplit::shuffle_and_split(toy_set().samples(), &config.data.split).unwrap();
    assert_eq!(split.train.len(), 2 * FRAMES - 4);

    let graphs = GraphBuilder::from_config(&config.graph).build_all(&split.train);
    assert_eq!(graphs[0].graph.num_edge_features(), 5);

    let model = SchNetModel::new(config.model.clone()).unwrap();
    let proba = model.predict_proba(&graphs[0].graph).unwrap();
    assert!((proba.sum() - 1.0).abs() < 1e-12);
}
