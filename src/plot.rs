//! SVG figures for the walkthrough
//!
//! - Sample point clouds with their group names
//! - Neighbor lines drawn from a subset of atoms
//! - Training and validation accuracy per epoch
//! - Test-set predictions next to the true group

use ndarray::Array2;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use tracing::info;

use crate::data::Sample;
use crate::error::{Error, Result};
use crate::graph::get_edges;
use crate::training::History;

/// Rows and columns of the sample and prediction grids
pub const SAMPLE_GRID: (usize, usize) = (4, 5);
/// Rows and columns of the neighbor grid
pub const NEIGHBOR_GRID: (usize, usize) = (2, 3);

/// Plot output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Directory the SVG files are written to
    pub output_dir: String,
    /// Pixel size of one grid cell
    pub cell_size: u32,
    /// Draw neighbors for every n-th atom
    pub neighbor_stride: usize,
    /// Neighbors drawn per atom
    pub neighbor_count: usize,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            output_dir: "plots".to_string(),
            cell_size: 200,
            neighbor_stride: 23,
            neighbor_count: 8,
        }
    }
}

fn plot_err<E: std::fmt::Display>(err: E) -> Error {
    Error::PlotError(err.to_string())
}

/// Axis ranges covering every point with a small margin
fn bounds(positions: &Array2<f64>) -> (Range<f64>, Range<f64>) {
    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for p in positions.outer_iter() {
        for c in 0..2 {
            min[c] = min[c].min(p[c]);
            max[c] = max[c].max(p[c]);
        }
    }
    let range = |c: usize| {
        if !min[c].is_finite() || !max[c].is_finite() {
            return -1.0..1.0;
        }
        let pad = ((max[c] - min[c]) * 0.05).max(0.5);
        (min[c] - pad)..(max[c] + pad)
    };
    (range(0), range(1))
}

fn label_name(names: &[String], label: usize) -> String {
    names
        .get(label)
        .cloned()
        .unwrap_or_else(|| label.to_string())
}

/// Draw point clouds into a grid, one caption per cell
fn draw_cloud_grid(
    path: &Path,
    config: &PlotConfig,
    grid: (usize, usize),
    cells: &[(&Sample, String)],
    neighbors: Option<(usize, usize)>,
) -> Result<()> {
    let (rows, cols) = grid;
    let size = (cols as u32 * config.cell_size, rows as u32 * config.cell_size);
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    for (area, (sample, title)) in root.split_evenly(grid).iter().zip(cells) {
        let (x_range, y_range) = bounds(&sample.positions);
        let mut chart = ChartBuilder::on(area)
            .caption(title.as_str(), ("sans-serif", 14))
            .margin(5)
            .build_cartesian_2d(x_range, y_range)
            .map_err(plot_err)?;

        let point_style = if neighbors.is_some() {
            BLACK.mix(0.3).filled()
        } else {
            BLACK.filled()
        };
        chart
            .draw_series(
                sample
                    .positions
                    .outer_iter()
                    .map(|p| Circle::new((p[0], p[1]), 2, point_style)),
            )
            .map_err(plot_err)?;

        if let Some((stride, count)) = neighbors {
            let (_, index) = get_edges(&sample.positions, count, true);
            for (color, i) in (0..sample.num_atoms()).step_by(stride.max(1)).enumerate() {
                let origin = (sample.positions[[i, 0]], sample.positions[[i, 1]]);
                let style = Palette99::pick(color).stroke_width(1);
                chart
                    .draw_series(index.row(i).iter().map(|&j| {
                        let target = (sample.positions[[j, 0]], sample.positions[[j, 1]]);
                        PathElement::new(vec![origin, target], style)
                    }))
                    .map_err(plot_err)?;
            }
        }
    }

    root.present().map_err(plot_err)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// First 20 samples in a 4x5 grid titled by group
pub fn plot_samples(
    path: impl AsRef<Path>,
    config: &PlotConfig,
    samples: &[Sample],
    label_names: &[String],
) -> Result<()> {
    let n = SAMPLE_GRID.0 * SAMPLE_GRID.1;
    let cells: Vec<(&Sample, String)> = samples
        .iter()
        .take(n)
        .map(|s| (s, label_name(label_names, s.label)))
        .collect();
    draw_cloud_grid(path.as_ref(), config, SAMPLE_GRID, &cells, None)
}

/// First 6 samples with lines from every n-th atom to its nearest neighbors
pub fn plot_neighbors(
    path: impl AsRef<Path>,
    config: &PlotConfig,
    samples: &[Sample],
    label_names: &[String],
) -> Result<()> {
    let n = NEIGHBOR_GRID.0 * NEIGHBOR_GRID.1;
    let cells: Vec<(&Sample, String)> = samples
        .iter()
        .take(n)
        .map(|s| (s, label_name(label_names, s.label)))
        .collect();
    draw_cloud_grid(
        path.as_ref(),
        config,
        NEIGHBOR_GRID,
        &cells,
        Some((config.neighbor_stride, config.neighbor_count)),
    )
}

/// Test samples titled with the true and predicted group
pub fn plot_predictions(
    path: impl AsRef<Path>,
    config: &PlotConfig,
    samples: &[Sample],
    predicted: &[usize],
    label_names: &[String],
) -> Result<()> {
    if predicted.len() < samples.len().min(SAMPLE_GRID.0 * SAMPLE_GRID.1) {
        return Err(Error::ShapeError(format!(
            "{} predictions for {} samples",
            predicted.len(),
            samples.len()
        )));
    }
    let cells: Vec<(&Sample, String)> = samples
        .iter()
        .zip(predicted)
        .take(SAMPLE_GRID.0 * SAMPLE_GRID.1)
        .map(|(s, &p)| {
            let title = format!(
                "True: {} / Predicted: {}",
                label_name(label_names, s.label),
                label_name(label_names, p)
            );
            (s, title)
        })
        .collect();
    draw_cloud_grid(path.as_ref(), config, SAMPLE_GRID, &cells, None)
}

/// Training and validation accuracy with a dashed chance baseline
pub fn plot_history(
    path: impl AsRef<Path>,
    config: &PlotConfig,
    history: &History,
    num_classes: usize,
) -> Result<()> {
    if history.is_empty() {
        return Err(Error::InsufficientData("empty training history".to_string()));
    }
    let path = path.as_ref();
    let size = (config.cell_size * 4, config.cell_size * 3);
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let last_epoch = history.len().max(2) as f64;
    let mut chart = ChartBuilder::on(&root)
        .caption("Accuracy", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(1f64..last_epoch, 0f64..1f64)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc("Accuracy")
        .draw()
        .map_err(plot_err)?;

    let train: Vec<(f64, f64)> = history
        .epochs
        .iter()
        .map(|m| (m.epoch as f64, m.train_accuracy))
        .collect();
    chart
        .draw_series(LineSeries::new(train, BLUE))
        .map_err(plot_err)?
        .label("training")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    let val: Vec<(f64, f64)> = history
        .epochs
        .iter()
        .filter_map(|m| m.val_accuracy.map(|a| (m.epoch as f64, a)))
        .collect();
    if !val.is_empty() {
        chart
            .draw_series(LineSeries::new(val, RED))
            .map_err(plot_err)?
            .label("validation")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    }

    let chance = 1.0 / num_classes.max(1) as f64;
    chart
        .draw_series(DashedLineSeries::new(
            vec![(1.0, chance), (last_epoch, chance)],
            5,
            5,
            BLACK.stroke_width(1),
        ))
        .map_err(plot_err)?
        .label("random")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!("Wrote {}", path.display());
    Ok(())
}
