//! Delta schedules: how an input is cut into batches.

use clap::ValueEnum;

/// Distribution of rows over delta batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeltaMode {
    /// Equal batches; the first `rows % batches` get one extra row
    #[default]
    Uniform,
    /// Each batch takes half of what remains; the last takes the rest
    Decay,
    /// Sizes follow the binomial coefficients `C(batches - 1, i)`
    Binomial,
}

/// Batch sizes for `rows` rows over `batches` batches.
///
/// The sizes always sum to `rows`. Returns an empty schedule for zero
/// batches.
#[must_use]
pub fn batch_sizes(mode: DeltaMode, rows: usize, batches: usize) -> Vec<usize> {
    if batches == 0 {
        return Vec::new();
    }
    match mode {
        DeltaMode::Uniform => (0..batches)
            .map(|i| rows / batches + usize::from(i < rows % batches))
            .collect(),
        DeltaMode::Decay => {
            let mut remaining = rows;
            (0..batches)
                .map(|i| {
                    let size = if i + 1 == batches {
                        remaining
                    } else {
                        remaining.div_ceil(2)
                    };
                    remaining -= size;
                    size
                })
                .collect()
        }
        DeltaMode::Binomial => binomial_sizes(rows, batches),
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn binomial_sizes(rows: usize, batches: usize) -> Vec<usize> {
    // Pascal row n = batches - 1, in f64 so wide schedules cannot overflow.
    let mut weights = vec![1.0_f64; batches];
    for n in 1..batches {
        for k in (1..n).rev() {
            weights[k] += weights[k - 1];
        }
    }
    let total: f64 = weights.iter().sum();

    // Cut at rounded cumulative boundaries so the sizes sum exactly.
    let mut sizes = Vec::with_capacity(batches);
    let mut cumulative = 0.0;
    let mut previous = 0usize;
    for (i, weight) in weights.iter().enumerate() {
        cumulative += weight;
        let boundary = if i + 1 == batches {
            rows
        } else {
            ((rows as f64) * cumulative / total).round() as usize
        };
        let boundary = boundary.clamp(previous, rows);
        sizes.push(boundary - previous);
        previous = boundary;
    }
    sizes
}

/// Splits `items` into consecutive batches of the given sizes.
#[must_use]
pub fn split<T>(items: Vec<T>, sizes: &[usize]) -> Vec<Vec<T>> {
    let mut items = items.into_iter();
    sizes
        .iter()
        .map(|&size| items.by_ref().take(size).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform() {
        assert_eq!(batch_sizes(DeltaMode::Uniform, 10, 3), vec![4, 3, 3]);
        assert_eq!(batch_sizes(DeltaMode::Uniform, 2, 4), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_decay_halves_the_remainder() {
        assert_eq!(batch_sizes(DeltaMode::Decay, 100, 4), vec![50, 25, 13, 12]);
        assert_eq!(batch_sizes(DeltaMode::Decay, 7, 1), vec![7]);
    }

    #[test]
    fn test_binomial_follows_pascal_row() {
        assert_eq!(batch_sizes(DeltaMode::Binomial, 16, 5), vec![1, 4, 6, 4, 1]);
        assert_eq!(batch_sizes(DeltaMode::Binomial, 9, 1), vec![9]);
        assert_eq!(batch_sizes(DeltaMode::Binomial, 32, 3), vec![8, 16, 8]);
    }

    #[test]
    fn test_sizes_sum_to_rows() {
        for mode in [DeltaMode::Uniform, DeltaMode::Decay, DeltaMode::Binomial] {
            for batches in 1..40 {
                for rows in [0, 1, 17, 1_000] {
                    let sizes = batch_sizes(mode, rows, batches);
                    assert_eq!(sizes.len(), batches);
                    assert_eq!(sizes.iter().sum::<usize>(), rows, "{mode:?} {rows}/{batches}");
                }
            }
        }
        assert!(batch_sizes(DeltaMode::Decay, 5, 0).is_empty());
    }

    #[test]
    fn test_split() {
        let batches = split((1..=6).collect(), &[3, 0, 2, 1]);
        assert_eq!(batches, vec![vec![1, 2, 3], vec![], vec![4, 5], vec![6]]);
    }
}
