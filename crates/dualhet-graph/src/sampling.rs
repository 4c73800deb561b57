//! Class-balanced index sampling for the auxiliary and classification losses.
//!
//! Fraud labels are heavily skewed, so every loss term is computed on a
//! subsample in which both classes appear equally often.

use crate::error::{Error, Result};
use rand::prelude::*;

/// Balance two index sets to equal size.
///
/// The smaller class is kept whole; the larger one is sampled with
/// replacement down to the same count. The returned indices are sorted so
/// the loss inputs have a deterministic order for a given draw.
///
/// # Errors
/// [`Error::EmptyClass`] when either class has no members.
///
/// # Complexity
/// O(m log m) where m = 2 * min(|positive|, |negative|).
pub fn balanced_indices<R: Rng>(
    positive: &[usize],
    negative: &[usize],
    what: &'static str,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if positive.is_empty() || negative.is_empty() {
        return Err(Error::EmptyClass(what));
    }
    let (minority, majority) = if positive.len() <= negative.len() {
        (positive, negative)
    } else {
        (negative, positive)
    };

    let mut index = Vec::with_capacity(2 * minority.len());
    index.extend_from_slice(minority);
    index.extend((0..minority.len()).map(|_| majority[rng.random_range(0..majority.len())]));
    index.sort_unstable();
    Ok(index)
}
