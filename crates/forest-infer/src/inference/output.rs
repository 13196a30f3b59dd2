//! Output transforms applied to aggregated rows.

use crate::description::Postprocessing;

/// Apply `postprocessing` to one aggregated row in place.
///
/// For [`Postprocessing::MaxIndex`] the row is left untouched and the index
/// of its largest value (first one on ties) is returned; every other
/// transform returns `None`.
pub fn apply_postprocessing(postprocessing: Postprocessing, row: &mut [f64]) -> Option<usize> {
    match postprocessing {
        Postprocessing::Identity => None,
        Postprocessing::Sigmoid => {
            row.iter_mut().for_each(|x| *x = sigmoid(*x));
            None
        }
        Postprocessing::Exp => {
            row.iter_mut().for_each(|x| *x = x.exp());
            None
        }
        Postprocessing::Softmax => {
            softmax_inplace(row);
            None
        }
        Postprocessing::MaxIndex => Some(argmax(row)),
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax.
fn softmax_inplace(row: &mut [f64]) {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    for x in row.iter_mut() {
        *x /= sum;
    }
}

fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in row.iter().enumerate().skip(1) {
        if x > row[best] {
            best = i;
        }
    }
    best
}
