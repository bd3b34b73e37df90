//! Trajectory Archive
//!
//! A trajectory is a named stack of 2-D point sets, all belonging to one
//! symmetry group. The group is the part of the name before the first `-`
//! (`p4m-w1-n32` belongs to `p4m`).

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{Array2, Array3, Axis, Ix3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::pickle::{self, Value};
use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One configuration of points with its class label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Point coordinates `[atoms, 2]`
    pub positions: Array2<f64>,
    /// Index into the label table
    pub label: usize,
}

impl Sample {
    pub fn new(positions: Array2<f64>, label: usize) -> Self {
        Self { positions, label }
    }

    /// Number of points in the configuration
    pub fn num_atoms(&self) -> usize {
        self.positions.nrows()
    }
}

/// Named trajectories in archive order
#[derive(Debug, Clone, Default)]
pub struct TrajectorySet {
    entries: Vec<(String, Array3<f64>)>,
}

impl TrajectorySet {
    /// Build a set from `(name, [frames, atoms, 2])` entries
    pub fn from_entries(entries: Vec<(String, Array3<f64>)>) -> Result<Self> {
        for (name, traj) in &entries {
            if traj.shape()[2] != 2 {
                return Err(Error::ShapeError(format!(
                    "trajectory '{}' has shape {:?}, expected [frames, atoms, 2]",
                    name,
                    traj.shape()
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Convert a decoded `dict[str, ndarray]` pickle value
    pub fn from_pickle(value: Value) -> Result<Self> {
        let items = match value {
            Value::Dict(items) => items,
            _ => {
                return Err(Error::ShapeError(
                    "archive root is not a dictionary".to_string(),
                ))
            }
        };

        let mut entries = Vec::with_capacity(items.len());
        for (key, value) in items {
            let name = match key {
                Value::Str(name) => name,
                other => {
                    return Err(Error::ShapeError(format!(
                        "archive key is not a string: {:?}",
                        other
                    )))
                }
            };
            let traj = match value {
                Value::Array(array) => array.into_dimensionality::<Ix3>().map_err(|_| {
                    Error::ShapeError(format!("trajectory '{}' is not 3-dimensional", name))
                })?,
                _ => {
                    return Err(Error::ShapeError(format!(
                        "trajectory '{}' is not an array",
                        name
                    )))
                }
            };
            entries.push((name, traj));
        }

        Self::from_entries(entries)
    }

    /// Decode raw archive bytes, gunzipping when needed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut decoded)?;
            debug!("Decompressed {} -> {} bytes", bytes.len(), decoded.len());
            Self::from_bytes(&decoded)
        } else {
            Self::from_pickle(pickle::loads(bytes)?)
        }
    }

    /// Load a (possibly gzipped) pickle archive from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let set = read_trajectories(BufReader::new(File::open(path)?))?;
        info!(
            "Loaded {} trajectories ({} samples, {} classes) from {}",
            set.len(),
            set.num_samples(),
            set.label_names().len(),
            path.display()
        );
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, trajectory)` in archive order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array3<f64>)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Total number of frames over all trajectories
    pub fn num_samples(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.shape()[0]).sum()
    }

    /// Distinct symmetry group names, sorted
    pub fn label_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, _)| group_of(name).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every frame as a labelled sample, trajectory by trajectory
    pub fn samples(&self) -> Vec<Sample> {
        let labels = self.label_names();
        let mut samples = Vec::with_capacity(self.num_samples());

        for (name, traj) in &self.entries {
            let group = group_of(name);
            let label = labels.iter().position(|l| l == group).unwrap_or(0);
            for frame in traj.axis_iter(Axis(0)) {
                samples.push(Sample::new(frame.to_owned(), label));
            }
        }

        samples
    }
}

/// Read a (possibly gzipped) pickled archive from any reader
pub fn read_trajectories<R: Read>(mut reader: R) -> Result<TrajectorySet> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    TrajectorySet::from_bytes(&bytes)
}

/// Open and decode an archive file
pub fn load_archive(path: impl AsRef<Path>) -> Result<TrajectorySet> {
    TrajectorySet::load(path)
}

/// Symmetry group prefix of a trajectory name
pub fn group_of(name: &str) -> &str {
    name.split('-').next().unwrap_or(name)
}
