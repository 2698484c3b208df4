use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;

/// Identifier of one spatial subdomain and thus of the process owning it.
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Ord, PartialOrd, Serialize)]
pub struct DomainId(pub u64);

impl core::fmt::Display for DomainId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Domain({})", self.0)
    }
}

impl From<u64> for DomainId {
    fn from(value: u64) -> Self {
        DomainId(value)
    }
}

/// Describes which process owns which region of space.
///
/// The advection engine uses this trait after every successful integration step in order to
/// decide if a curve is still inside the locally owned domain and to which domain it should
/// be handed off otherwise.
/// It also provides the adjacency information from which communicators between domains are
/// constructed.
pub trait DomainOwnership<const D: usize> {
    /// Checks if the position lies inside the region owned by the given domain.
    fn contains(&self, domain: &DomainId, pos: &SVector<f64, D>) -> bool;

    /// Obtains the domain which owns the given position.
    ///
    /// Returns `None` if the position is outside of every domain, for example since it left
    /// the bounding volume of the whole dataset.
    fn owner_of(&self, pos: &SVector<f64, D>) -> Option<DomainId>;

    /// Domains which share a boundary with the given one.
    fn neighbors(&self, domain: &DomainId) -> Vec<DomainId>;

    /// All domains which are known to this ownership structure.
    fn domains(&self) -> Vec<DomainId>;

    /// Constructs the adjacency map of all domains.
    ///
    /// Every domain is treated as reachable from every other domain since curves may skip over
    /// thin domains within one step.
    /// Direct neighbors are listed first.
    fn communication_map(&self) -> HashMap<DomainId, Vec<DomainId>> {
        let all = self.domains();
        all.iter()
            .map(|domain| {
                let mut connected = self.neighbors(domain);
                connected.retain(|other| other != domain);
                for other in all.iter() {
                    if other != domain && !connected.contains(other) {
                        connected.push(*other);
                    }
                }
                (*domain, connected)
            })
            .collect()
    }
}

impl<O, const D: usize> DomainOwnership<D> for &O
where
    O: DomainOwnership<D> + ?Sized,
{
    fn contains(&self, domain: &DomainId, pos: &SVector<f64, D>) -> bool {
        (**self).contains(domain, pos)
    }

    fn owner_of(&self, pos: &SVector<f64, D>) -> Option<DomainId> {
        (**self).owner_of(pos)
    }

    fn neighbors(&self, domain: &DomainId) -> Vec<DomainId> {
        (**self).neighbors(domain)
    }

    fn domains(&self) -> Vec<DomainId> {
        (**self).domains()
    }
}

impl<O, const D: usize> DomainOwnership<D> for std::sync::Arc<O>
where
    O: DomainOwnership<D> + ?Sized,
{
    fn contains(&self, domain: &DomainId, pos: &SVector<f64, D>) -> bool {
        (**self).contains(domain, pos)
    }

    fn owner_of(&self, pos: &SVector<f64, D>) -> Option<DomainId> {
        (**self).owner_of(pos)
    }

    fn neighbors(&self, domain: &DomainId) -> Vec<DomainId> {
        (**self).neighbors(domain)
    }

    fn domains(&self) -> Vec<DomainId> {
        (**self).domains()
    }
}
