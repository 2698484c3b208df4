//! Message passing and synchronization between domains.
//!
//! Curves travel between domains as plain byte messages.
//! The [Communicator] trait abstracts over how these messages are delivered while the
//! [ChannelComm] implementation connects threads of the same process with
//! [crossbeam_channel]s.
use fieldline_concepts::{CommunicationError, IndexError};

use std::collections::{BTreeMap, HashMap};

use crate::errors::AdvectionError;

/// Checks that every link of a communication map can be used in both directions.
///
/// A domain which sends curves to a neighbour must also be able to receive curves from it,
/// otherwise a curve crossing the seam in the opposite direction would get lost.
/// Links to domains which are not keys of the map are rejected as well.
/// The domains do not need to form a single connected component.
///
/// ```
/// use fieldline_concepts::DomainId;
/// use fieldline_core::transport::validate_map;
/// use std::collections::HashMap;
///
/// // Three strips next to each other
/// let mut map = HashMap::from([
///     (DomainId(0), vec![DomainId(1)]),
///     (DomainId(1), vec![DomainId(0), DomainId(2)]),
///     (DomainId(2), vec![DomainId(1)]),
/// ]);
/// assert!(validate_map(&map));
///
/// // The last strip forgets about its neighbour
/// map.insert(DomainId(2), vec![]);
/// assert!(!validate_map(&map));
/// ```
pub fn validate_map<I>(map: &HashMap<I, Vec<I>>) -> bool
where
    I: Eq + core::hash::Hash,
{
    map.iter().all(|(domain, neighbours)| {
        neighbours.iter().all(|neighbour| {
            map.get(neighbour)
                .is_some_and(|reverse| reverse.contains(domain))
        })
    })
}

/// Builds one connected item per domain of a communication map.
pub trait FromMap<I>
where
    Self: Sized,
{
    /// The map assigns every domain the domains it exchanges curves with.
    /// The returned items are keyed by the same domains.
    fn from_map(map: &HashMap<I, Vec<I>>) -> Result<HashMap<I, Self>, IndexError>
    where
        I: Eq + core::hash::Hash + Clone + Ord;
}

/// Lets the workers of all domains wait for each other.
pub trait SyncSubDomains {
    /// Blocks until every connected worker called this method.
    fn sync(&mut self);
}

/// Synchronizes all domains of a run with one shared [hurdles::Barrier].
///
/// Between two calls to [sync](SyncSubDomains::sync) every worker may inspect state which
/// the others updated before the first call.
/// The runner uses this to decide collectively whether curves are still travelling.
/// ```
/// # use fieldline_concepts::DomainId;
/// # use fieldline_core::transport::{BarrierSync, FromMap, SyncSubDomains};
/// # use std::collections::HashMap;
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// let map = HashMap::from([
///     (DomainId(0), vec![DomainId(1)]),
///     (DomainId(1), vec![DomainId(0)]),
/// ]);
/// let syncs = BarrierSync::from_map(&map).unwrap();
///
/// // Both workers finish two curves per round
/// let n_unfinished = AtomicUsize::new(8);
/// std::thread::scope(|s| {
///     for (_, mut sync) in syncs {
///         let n_unfinished = &n_unfinished;
///         s.spawn(move || {
///             let mut n_rounds = 0;
///             loop {
///                 n_unfinished.fetch_sub(2, Ordering::SeqCst);
///                 sync.sync();
///                 let remaining = n_unfinished.load(Ordering::SeqCst);
///                 sync.sync();
///                 n_rounds += 1;
///                 if remaining == 0 {
///                     break;
///                 }
///             }
///             assert_eq!(n_rounds, 2);
///         });
///     }
/// });
/// ```
pub struct BarrierSync {
    barrier: hurdles::Barrier,
}

impl<I> FromMap<I> for BarrierSync {
    fn from_map(map: &HashMap<I, Vec<I>>) -> Result<HashMap<I, Self>, IndexError>
    where
        I: Eq + core::hash::Hash + Clone + Ord,
    {
        let barrier = hurdles::Barrier::new(map.len());
        Ok(map
            .keys()
            .map(|domain| {
                let sync = Self {
                    barrier: barrier.clone(),
                };
                (domain.clone(), sync)
            })
            .collect())
    }
}

impl SyncSubDomains for BarrierSync {
    fn sync(&mut self) {
        self.barrier.wait();
    }
}

/// Delivers serialized curves to other domains.
///
/// Domains are addressed by `I` and messages of type `T` are usually the bytes of a
/// handoff.
/// Implementations may connect threads of one process as [ChannelComm] does, or processes
/// on different machines.
///
/// [send](Communicator::send) must not block the caller.
/// A message sent before a [synchronization](SyncSubDomains::sync) is returned by the next
/// call to [receive](Communicator::receive) of its receiver after it.
pub trait Communicator<I, T>
where
    Self: Sized,
{
    /// Sends a message to the given domain.
    ///
    /// Fails with a [CommunicationError] if the domain is unknown or can not be reached.
    fn send(&mut self, receiver: &I, message: T) -> Result<(), AdvectionError>;

    /// Takes all messages which arrived since the last call.
    ///
    /// Messages must not be returned twice.
    fn receive(&mut self) -> Vec<T>;
}

/// [Communicator] connecting the domains of one process by [crossbeam_channel]s.
///
/// Every domain owns the receiving end of one unbounded channel and a sender for each of
/// its neighbours.
/// ```
/// # use fieldline_concepts::DomainId;
/// # use fieldline_core::transport::{ChannelComm, Communicator, FromMap};
/// # use std::collections::HashMap;
/// let map = HashMap::from([
///     (DomainId(0), vec![DomainId(1)]),
///     (DomainId(1), vec![DomainId(0), DomainId(2)]),
///     (DomainId(2), vec![DomainId(1)]),
/// ]);
/// let mut comms = ChannelComm::<DomainId, Vec<u8>>::from_map(&map).unwrap();
/// let mut left = comms.remove(&DomainId(0)).unwrap();
/// let mut middle = comms.remove(&DomainId(1)).unwrap();
///
/// // Two curves cross the seam between the first and the middle strip
/// left.send(&DomainId(1), b"FLCV first".to_vec()).unwrap();
/// left.send(&DomainId(1), b"FLCV second".to_vec()).unwrap();
/// // The strips on the outside are not connected
/// assert!(left.send(&DomainId(2), b"FLCV".to_vec()).is_err());
///
/// let arrived = middle.receive();
/// assert_eq!(arrived, vec![b"FLCV first".to_vec(), b"FLCV second".to_vec()]);
/// assert!(middle.receive().is_empty());
/// ```
#[derive(Clone)]
pub struct ChannelComm<I, T> {
    senders: BTreeMap<I, crossbeam_channel::Sender<T>>,
    receiver: crossbeam_channel::Receiver<T>,
}

impl<I, T> ChannelComm<I, T> {
    /// Domains this communicator can send to.
    pub fn receivers(&self) -> impl Iterator<Item = &I> {
        self.senders.keys()
    }
}

impl<T, I> FromMap<I> for ChannelComm<I, T>
where
    I: Ord,
{
    fn from_map(map: &HashMap<I, Vec<I>>) -> Result<HashMap<I, Self>, IndexError>
    where
        I: Clone + core::hash::Hash + Eq,
    {
        let mut channels: HashMap<&I, _> = map
            .keys()
            .map(|domain| (domain, crossbeam_channel::unbounded::<T>()))
            .collect();
        let mut senders_of = HashMap::with_capacity(map.len());
        for (domain, neighbours) in map.iter() {
            let mut senders = BTreeMap::new();
            for neighbour in neighbours {
                let (sender, _) = channels.get(neighbour).ok_or_else(|| {
                    IndexError(
                        "communication map links to a domain which is not part of it".into(),
                    )
                })?;
                senders.insert(neighbour.clone(), sender.clone());
            }
            senders_of.insert(domain, senders);
        }
        Ok(senders_of
            .into_iter()
            .filter_map(|(domain, senders)| {
                let (_, receiver) = channels.remove(domain)?;
                Some((domain.clone(), ChannelComm { senders, receiver }))
            })
            .collect())
    }
}

impl<I, T> Communicator<I, T> for ChannelComm<I, T>
where
    I: Ord + core::fmt::Debug,
{
    fn receive(&mut self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    fn send(&mut self, receiver: &I, message: T) -> Result<(), AdvectionError> {
        let sender = self.senders.get(receiver).ok_or_else(|| {
            CommunicationError(format!("{:?} is not a neighbour of this domain", receiver))
        })?;
        sender.send(message)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fieldline_concepts::DomainId;

    /// Domains `0..n` where every domain is linked to the next one and the last to the
    /// first.
    fn ring(n: u64) -> HashMap<DomainId, Vec<DomainId>> {
        (0..n)
            .map(|i| {
                let next = DomainId((i + 1) % n);
                let previous = DomainId((i + n - 1) % n);
                (DomainId(i), vec![previous, next])
            })
            .collect()
    }

    #[test]
    fn every_domain_reaches_its_neighbours() -> Result<(), IndexError> {
        let map = ring(5);
        assert!(validate_map(&map));
        let comms = ChannelComm::<DomainId, Vec<u8>>::from_map(&map)?;
        assert_eq!(comms.len(), 5);
        for (domain, comm) in comms.iter() {
            let mut reachable: Vec<_> = comm.receivers().copied().collect();
            reachable.sort();
            let mut expected = map[domain].clone();
            expected.sort();
            assert_eq!(reachable, expected);
        }
        Ok(())
    }

    #[test]
    fn one_sided_links_are_invalid() {
        let map = HashMap::from([(DomainId(0), vec![DomainId(1)]), (DomainId(1), vec![])]);
        assert!(!validate_map(&map));
        let map = HashMap::from([(DomainId(0), vec![DomainId(7)])]);
        assert!(!validate_map(&map));
        assert!(ChannelComm::<DomainId, Vec<u8>>::from_map(&map).is_err());
    }

    #[test]
    fn payloads_travel_around_a_ring() -> Result<(), Box<dyn std::error::Error>> {
        for n in 3..12 {
            let mut comms = ChannelComm::<DomainId, Vec<u8>>::from_map(&ring(n))?;
            for (domain, comm) in comms.iter_mut() {
                let next = DomainId((domain.0 + 1) % n);
                comm.send(&next, domain.0.to_ne_bytes().to_vec())?;
            }
            for (domain, comm) in comms.iter_mut() {
                let previous = (domain.0 + n - 1) % n;
                assert_eq!(comm.receive(), vec![previous.to_ne_bytes().to_vec()]);
                assert!(comm.receive().is_empty());
            }
        }
        Ok(())
    }

    #[test]
    fn unknown_neighbour() -> Result<(), Box<dyn std::error::Error>> {
        let mut comms = ChannelComm::<DomainId, Vec<u8>>::from_map(&ring(4))?;
        let comm = comms.get_mut(&DomainId(0)).unwrap();
        let result = comm.send(&DomainId(2), vec![1, 2, 3]);
        assert!(matches!(result, Err(AdvectionError::CommunicationError(_))));
        Ok(())
    }

    #[test]
    fn disconnected_neighbour() -> Result<(), Box<dyn std::error::Error>> {
        let mut comms = ChannelComm::<DomainId, Vec<u8>>::from_map(&ring(3))?;
        let mut first = comms.remove(&DomainId(0)).unwrap();
        drop(comms);
        let result = first.send(&DomainId(1), vec![0]);
        assert!(matches!(result, Err(AdvectionError::CommunicationError(_))));
        Ok(())
    }
}
