// Imports from this crate
use fieldline_concepts::*;

// Imports from other crates
use itertools::Itertools;
use nalgebra::SVector;

use serde::{Deserialize, Serialize};

use crate::fields::SubDomainField;

/// Splits an axis-aligned box into a regular grid of subdomains.
///
/// Every subdomain is a half-open cell $[\text{min}_i, \text{max}_i)$.
/// Cells at the upper end of the box are closed such that the global maximum is owned as
/// well.
/// Subdomains are numbered in row-major order of their multi-index, ie. the last axis
/// changes fastest.
///
/// ```
/// # use fieldline_building_blocks::CartesianDecomposition;
/// # use fieldline_concepts::{DomainId, DomainOwnership};
/// let decomposition = CartesianDecomposition::from_boundaries_and_n_domains(
///     [0.0, 0.0],
///     [4.0, 2.0],
///     [4, 2],
/// )?;
/// assert_eq!(decomposition.domains().len(), 8);
/// assert_eq!(decomposition.owner_of(&[1.5, 0.5].into()), Some(DomainId(2)));
/// assert_eq!(decomposition.owner_of(&[4.0, 2.0].into()), Some(DomainId(7)));
/// assert_eq!(decomposition.owner_of(&[4.1, 2.0].into()), None);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CartesianDecomposition<const D: usize> {
    min: SVector<f64, D>,
    max: SVector<f64, D>,
    dx: SVector<f64, D>,
    n_domains: SVector<usize, D>,
}

impl<const D: usize> CartesianDecomposition<D> {
    fn check_min_max(min: &[f64; D], max: &[f64; D]) -> Result<(), BoundaryError> {
        for i in 0..D {
            if !(min[i].is_finite() && max[i].is_finite()) || min[i] >= max[i] {
                return Err(BoundaryError(format!(
                    "Min {:?} must be smaller than Max {:?} for domain boundaries!",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Builds a new [CartesianDecomposition] from given boundaries and the number of
    /// subdomains per dimension.
    pub fn from_boundaries_and_n_domains(
        min: impl Into<[f64; D]>,
        max: impl Into<[f64; D]>,
        n_domains: impl Into<[usize; D]>,
    ) -> Result<Self, BoundaryError> {
        let min: [f64; D] = min.into();
        let max: [f64; D] = max.into();
        let n_domains: [usize; D] = n_domains.into();
        Self::check_min_max(&min, &max)?;
        if n_domains.iter().any(|n| *n == 0) {
            return Err(BoundaryError(format!(
                "Number of subdomains {:?} must be positive in every dimension",
                n_domains
            )));
        }
        let mut dx = SVector::<f64, D>::zeros();
        for i in 0..D {
            dx[i] = (max[i] - min[i]) / n_domains[i] as f64;
        }
        Ok(Self {
            min: min.into(),
            max: max.into(),
            dx,
            n_domains: n_domains.into(),
        })
    }

    /// Builds a new [CartesianDecomposition] whose subdomains are at least `domain_size` wide
    /// in every dimension.
    ///
    /// ```
    /// # use fieldline_building_blocks::CartesianDecomposition;
    /// let decomposition = CartesianDecomposition::from_boundaries_and_domain_size(
    ///     [2.0, 3.0, 1.0],
    ///     [10.0, 10.0, 20.0],
    ///     2.0,
    /// )?;
    /// assert_eq!(decomposition.n_domains().as_slice(), &[4, 3, 9]);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_boundaries_and_domain_size(
        min: impl Into<[f64; D]>,
        max: impl Into<[f64; D]>,
        domain_size: f64,
    ) -> Result<Self, BoundaryError> {
        let min: [f64; D] = min.into();
        let max: [f64; D] = max.into();
        Self::check_min_max(&min, &max)?;
        if !(domain_size.is_finite() && domain_size > 0.0) {
            return Err(BoundaryError(format!(
                "Size of subdomains {} must be positive",
                domain_size
            )));
        }
        let mut n_domains = [0; D];
        for i in 0..D {
            let n = ((max[i] - min[i]) / domain_size).floor().max(1.0);
            // This conversion should hopefully never fail.
            n_domains[i] = num_to_usize(n).ok_or(BoundaryError(
                fieldline_concepts::format_error_message!(
                    "conversion error during domain setup",
                    format!("Cannot convert float {:?} to usize", n)
                ),
            ))?;
        }
        Self::from_boundaries_and_n_domains(min, max, n_domains)
    }

    /// Get the minimum point of the decomposed box
    pub fn min(&self) -> SVector<f64, D> {
        self.min
    }

    /// Get the maximum point of the decomposed box
    pub fn max(&self) -> SVector<f64, D> {
        self.max
    }

    /// Get the extent of a single subdomain
    pub fn dx(&self) -> SVector<f64, D> {
        self.dx
    }

    /// Get the number of subdomains in each dimension
    pub fn n_domains(&self) -> SVector<usize, D> {
        self.n_domains
    }

    /// Get the total number of subdomains
    pub fn n_domains_total(&self) -> usize {
        self.n_domains.iter().product()
    }

    fn get_all_indices(&self) -> impl Iterator<Item = [usize; D]> + '_ {
        (0..D)
            .map(|i| 0..self.n_domains[i])
            .multi_cartesian_product()
            .map(|x| {
                let mut index = [0; D];
                index.copy_from_slice(&x);
                index
            })
    }

    /// Converts the multi-index of a subdomain into its [DomainId].
    pub fn domain_id(&self, index: &[usize; D]) -> Option<DomainId> {
        let mut id = 0;
        for i in 0..D {
            if index[i] >= self.n_domains[i] {
                return None;
            }
            id = id * self.n_domains[i] + index[i];
        }
        Some(DomainId(id as u64))
    }

    /// Converts a [DomainId] into the multi-index of the subdomain.
    pub fn index_of(&self, domain: &DomainId) -> Option<[usize; D]> {
        let mut id = usize::try_from(domain.0).ok()?;
        if id >= self.n_domains_total() {
            return None;
        }
        let mut index = [0; D];
        for i in (0..D).rev() {
            index[i] = id % self.n_domains[i];
            id /= self.n_domains[i];
        }
        Some(index)
    }

    /// Obtains the multi-index of the subdomain which contains the position.
    pub fn index_of_position(&self, pos: &SVector<f64, D>) -> Option<[usize; D]> {
        let mut index = [0; D];
        for i in 0..D {
            if !(pos[i] >= self.min[i] && pos[i] <= self.max[i]) {
                return None;
            }
            let n = ((pos[i] - self.min[i]) / self.dx[i]).floor();
            // Closed at the global maximum
            index[i] = num_to_usize(n)?.min(self.n_domains[i] - 1);
        }
        Some(index)
    }

    /// Lower and upper corner of the subdomain.
    pub fn bounds(&self, domain: &DomainId) -> Option<(SVector<f64, D>, SVector<f64, D>)> {
        let index = self.index_of(domain)?;
        let mut lower = self.min;
        let mut upper = self.min;
        for i in 0..D {
            lower[i] += index[i] as f64 * self.dx[i];
            upper[i] = if index[i] + 1 == self.n_domains[i] {
                self.max[i]
            } else {
                self.min[i] + (index[i] + 1) as f64 * self.dx[i]
            };
        }
        Some((lower, upper))
    }

    /// Restricts a field to the data which would be available on the given subdomain.
    ///
    /// The subdomain is extended by `ghost_width` in every direction.
    pub fn restrict<F>(
        &self,
        domain: &DomainId,
        field: F,
        ghost_width: f64,
    ) -> Result<SubDomainField<F, D>, BoundaryError> {
        let (lower, upper) = self.bounds(domain).ok_or(BoundaryError(format!(
            "{} is not part of the decomposition",
            domain
        )))?;
        Ok(SubDomainField::new(field, lower, upper).with_ghost_width(ghost_width))
    }
}

fn num_to_usize(value: f64) -> Option<usize> {
    (value.is_finite() && value >= 0.0 && value <= usize::MAX as f64).then_some(value as usize)
}

impl<const D: usize> DomainOwnership<D> for CartesianDecomposition<D> {
    fn contains(&self, domain: &DomainId, pos: &SVector<f64, D>) -> bool {
        self.owner_of(pos).is_some_and(|owner| owner == *domain)
    }

    fn owner_of(&self, pos: &SVector<f64, D>) -> Option<DomainId> {
        self.index_of_position(pos)
            .and_then(|index| self.domain_id(&index))
    }

    fn neighbors(&self, domain: &DomainId) -> Vec<DomainId> {
        let Some(index) = self.index_of(domain) else {
            return Vec::new();
        };
        (0..D)
            .map(|i| {
                let lower = index[i].saturating_sub(1);
                let upper = (index[i] + 1).min(self.n_domains[i] - 1);
                lower..upper + 1
            })
            .multi_cartesian_product()
            .filter_map(|x| {
                let mut other = [0; D];
                other.copy_from_slice(&x);
                self.domain_id(&other)
            })
            .filter(|other| other != domain)
            .collect()
    }

    fn domains(&self) -> Vec<DomainId> {
        self.get_all_indices()
            .filter_map(|index| self.domain_id(&index))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_boundaries() {
        assert!(CartesianDecomposition::from_boundaries_and_n_domains([1.0], [0.0], [2]).is_err());
        assert!(CartesianDecomposition::from_boundaries_and_n_domains([0.0], [1.0], [0]).is_err());
        assert!(
            CartesianDecomposition::from_boundaries_and_domain_size([0.0], [1.0], -1.0).is_err()
        );
        assert!(CartesianDecomposition::from_boundaries_and_n_domains(
            [0.0, f64::NAN],
            [1.0, 1.0],
            [1, 1]
        )
        .is_err());
    }

    #[test]
    fn domain_size_larger_than_box() {
        let decomposition =
            CartesianDecomposition::from_boundaries_and_domain_size([0.0; 2], [1.0; 2], 5.0)
                .unwrap();
        assert_eq!(decomposition.n_domains_total(), 1);
    }

    #[test]
    fn ids_and_indices() {
        let decomposition =
            CartesianDecomposition::from_boundaries_and_n_domains([0.0; 3], [1.0; 3], [2, 3, 4])
                .unwrap();
        let domains = decomposition.domains();
        assert_eq!(domains.len(), 24);
        for (n, domain) in domains.iter().enumerate() {
            assert_eq!(domain.0, n as u64);
            let index = decomposition.index_of(domain).unwrap();
            assert_eq!(decomposition.domain_id(&index), Some(*domain));
        }
        assert_eq!(decomposition.index_of(&DomainId(24)), None);
        assert_eq!(decomposition.domain_id(&[2, 0, 0]), None);
    }

    #[test]
    fn half_open_cells() {
        let decomposition =
            CartesianDecomposition::from_boundaries_and_n_domains([0.0], [1.0], [2]).unwrap();
        assert_eq!(decomposition.owner_of(&[0.0].into()), Some(DomainId(0)));
        assert_eq!(decomposition.owner_of(&[0.5].into()), Some(DomainId(1)));
        assert_eq!(decomposition.owner_of(&[1.0].into()), Some(DomainId(1)));
        assert_eq!(decomposition.owner_of(&[-1e-12].into()), None);
        assert_eq!(decomposition.owner_of(&[f64::NAN].into()), None);
        assert!(decomposition.contains(&DomainId(0), &[0.49].into()));
        assert!(!decomposition.contains(&DomainId(0), &[0.5].into()));
    }

    #[test]
    fn every_position_has_one_owner() {
        let decomposition =
            CartesianDecomposition::from_boundaries_and_n_domains([-1.0, 0.0], [1.0, 3.0], [3, 5])
                .unwrap();
        for i in 0..=20 {
            for j in 0..=30 {
                let pos = SVector::from([-1.0 + 2.0 * (i as f64 / 20.0), 3.0 * (j as f64 / 30.0)]);
                let owners = decomposition
                    .domains()
                    .into_iter()
                    .filter(|domain| decomposition.contains(domain, &pos))
                    .count();
                assert_eq!(owners, 1, "{:?}", pos);
            }
        }
    }

    #[test]
    fn neighbors_in_grid() {
        let decomposition =
            CartesianDecomposition::from_boundaries_and_n_domains([0.0; 2], [3.0; 2], [3, 3])
                .unwrap();
        // Corner
        let mut neighbors = decomposition.neighbors(&DomainId(0));
        neighbors.sort();
        assert_eq!(neighbors, vec![DomainId(1), DomainId(3), DomainId(4)]);
        // Center
        assert_eq!(decomposition.neighbors(&DomainId(4)).len(), 8);
        let map = decomposition.communication_map();
        assert_eq!(map.len(), 9);
        assert!(map.values().all(|connected| connected.len() == 8));
    }

    #[test]
    fn bounds_cover_box() {
        let decomposition =
            CartesianDecomposition::from_boundaries_and_n_domains([0.0, -2.0], [1.0, 2.0], [3, 2])
                .unwrap();
        let (lower, upper) = decomposition.bounds(&DomainId(5)).unwrap();
        approx::assert_abs_diff_eq!(lower, SVector::from([2.0 / 3.0, 0.0]), epsilon = 1e-14);
        assert_eq!(upper, SVector::from([1.0, 2.0]));
        assert!(decomposition.bounds(&DomainId(6)).is_none());
    }
}
