//! k-Nearest Neighbors edge construction.

use ndarray::Array2;

/// Pairs closer than this are treated as self-interactions.
pub const SELF_DISTANCE_CUTOFF: f64 = 5e-4;

/// Distance assigned to masked pairs so they sort last.
pub const MASKED_DISTANCE: f64 = 1000.0;

/// Find the `nn` nearest neighbors of every point.
///
/// Returns `(distances, indices)`, both of shape `[M, min(nn, M)]`. Pairs
/// closer than [`SELF_DISTANCE_CUTOFF`] (the point itself and exact
/// duplicates) get [`MASKED_DISTANCE`] instead, so they are only picked
/// when a row has no other candidates left.
///
/// With `sorted` the neighbors of a row are in ascending distance; without
/// it the same neighbor set is listed in index order. Equal distances
/// prefer the lower index.
pub fn get_edges(positions: &Array2<f64>, nn: usize, sorted: bool) -> (Array2<f64>, Array2<usize>) {
    let m = positions.nrows();
    let k = nn.min(m);

    let dist = masked_distance_matrix(positions);

    let mut distances = Array2::zeros((m, k));
    let mut indices = Array2::zeros((m, k));

    for i in 0..m {
        let mut row: Vec<(usize, f64)> = dist.row(i).iter().copied().enumerate().collect();
        // stable sort keeps index order among ties
        row.sort_by(|a, b| a.1.total_cmp(&b.1));
        row.truncate(k);

        if !sorted {
            row.sort_by_key(|&(j, _)| j);
        }

        for (slot, (j, d)) in row.into_iter().enumerate() {
            distances[[i, slot]] = d;
            indices[[i, slot]] = j;
        }
    }

    (distances, indices)
}

/// Pairwise Euclidean distances with near-zero entries masked out.
pub fn masked_distance_matrix(positions: &Array2<f64>) -> Array2<f64> {
    let m = positions.nrows();

    Array2::from_shape_fn((m, m), |(i, j)| {
        let d = positions
            .row(i)
            .iter()
            .zip(positions.row(j).iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        if d >= SELF_DISTANCE_CUTOFF {
            d
        } else {
            MASKED_DISTANCE
        }
    })
}
