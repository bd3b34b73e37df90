//! Softmax and sparse categorical cross-entropy on raw logits.

use ndarray::Array1;

use crate::error::{Error, Result};

/// Numerically stable softmax
pub fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

fn check_label(logits: &Array1<f64>, label: usize) -> Result<()> {
    if label >= logits.len() {
        return Err(Error::ShapeError(format!(
            "label {} out of range for {} classes",
            label,
            logits.len()
        )));
    }
    Ok(())
}

/// `-log softmax(logits)[label]`
pub fn sparse_categorical_cross_entropy(logits: &Array1<f64>, label: usize) -> Result<f64> {
    check_label(logits, label)?;
    let max = logits.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let log_sum_exp = max + logits.mapv(|x| (x - max).exp()).sum().ln();
    Ok(log_sum_exp - logits[label])
}

/// Gradient of the loss with respect to the logits: `softmax - onehot`
pub fn sparse_categorical_cross_entropy_gradient(
    logits: &Array1<f64>,
    label: usize,
) -> Result<Array1<f64>> {
    check_label(logits, label)?;
    let mut grad = softmax(logits);
    grad[label] -= 1.0;
    Ok(grad)
}

/// Index of the largest value, first one on ties
pub fn argmax(values: &Array1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}
