use fieldline_concepts::BoundaryError;
use itertools::Itertools;
use nalgebra::SVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// `n` equally spaced points on the line from `start` to `end` (both included).
///
/// A single point is placed at `start`.
///
/// ```
/// # use fieldline_building_blocks::seed_line;
/// let seeds = seed_line([0.0, 0.0].into(), [1.0, 2.0].into(), 3);
/// assert_eq!(seeds[1].as_slice(), &[0.5, 1.0]);
/// ```
pub fn seed_line<const D: usize>(
    start: SVector<f64, D>,
    end: SVector<f64, D>,
    n: usize,
) -> Vec<SVector<f64, D>> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| {
                let q = i as f64 / (n - 1) as f64;
                start * (1.0 - q) + end * q
            })
            .collect(),
    }
}

/// Regular grid with `n_per_axis` points along every axis, placed at the cell centres of the
/// box `[min, max]`.
pub fn seed_grid<const D: usize>(
    min: SVector<f64, D>,
    max: SVector<f64, D>,
    n_per_axis: [usize; D],
) -> Result<Vec<SVector<f64, D>>, BoundaryError> {
    check_box(&min, &max)?;
    Ok(n_per_axis
        .iter()
        .map(|&n| 0..n)
        .multi_cartesian_product()
        .map(|index| {
            SVector::<f64, D>::from_fn(|i, _| {
                let q = (index[i] as f64 + 0.5) / n_per_axis[i] as f64;
                min[i] + q * (max[i] - min[i])
            })
        })
        .collect())
}

/// `n` uniformly distributed points in the box `[min, max)`.
///
/// The same `seed` always yields the same points.
///
/// ```
/// # use fieldline_building_blocks::seed_random_in_box;
/// let a = seed_random_in_box::<2>([0.0; 2].into(), [1.0; 2].into(), 10, 42).unwrap();
/// let b = seed_random_in_box::<2>([0.0; 2].into(), [1.0; 2].into(), 10, 42).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn seed_random_in_box<const D: usize>(
    min: SVector<f64, D>,
    max: SVector<f64, D>,
    n: usize,
    seed: u64,
) -> Result<Vec<SVector<f64, D>>, BoundaryError> {
    check_box(&min, &max)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok((0..n)
        .map(|_| {
            SVector::<f64, D>::from_fn(|i, _| {
                if min[i] == max[i] {
                    min[i]
                } else {
                    rng.gen_range(min[i]..max[i])
                }
            })
        })
        .collect())
}

fn check_box<const D: usize>(
    min: &SVector<f64, D>,
    max: &SVector<f64, D>,
) -> Result<(), BoundaryError> {
    for i in 0..D {
        if !(min[i].is_finite() && max[i].is_finite() && min[i] <= max[i]) {
            return Err(BoundaryError(format!(
                "invalid seed box along axis {}: [{}, {}]",
                i, min[i], max[i]
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_end_points() {
        let start = SVector::from([1.0, -1.0, 0.0]);
        let end = SVector::from([3.0, 1.0, 4.0]);
        let seeds = seed_line(start, end, 5);
        assert_eq!(seeds.len(), 5);
        assert_eq!(seeds[0], start);
        assert_eq!(seeds[4], end);
        assert!(seed_line(start, end, 0).is_empty());
        assert_eq!(seed_line(start, end, 1), vec![start]);
    }

    #[test]
    fn grid_cell_centres() {
        let seeds = seed_grid([0.0, 0.0].into(), [2.0, 1.0].into(), [2, 1]).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0], SVector::from([0.5, 0.5]));
        assert_eq!(seeds[1], SVector::from([1.5, 0.5]));
    }

    #[test]
    fn random_points_in_box() {
        let min = SVector::from([-1.0, 2.0, 5.0]);
        let max = SVector::from([1.0, 3.0, 5.0]);
        let seeds = seed_random_in_box(min, max, 200, 1).unwrap();
        assert_eq!(seeds.len(), 200);
        for p in seeds.iter() {
            for i in 0..3 {
                assert!(min[i] <= p[i] && (p[i] < max[i] || min[i] == max[i]));
            }
        }
        let other = seed_random_in_box(min, max, 200, 2).unwrap();
        assert_ne!(seeds, other);
    }

    #[test]
    fn invalid_box() {
        assert!(seed_random_in_box::<1>([1.0].into(), [0.0].into(), 1, 0).is_err());
        assert!(seed_grid::<1>([f64::NAN].into(), [0.0].into(), [1]).is_err());
    }
}
