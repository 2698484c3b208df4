//! Moves curves across the seams of a decomposed domain.
//!
//! After every step the [DomainCrossingCoordinator] checks if the local domain still owns
//! the head of a curve. Curves which left are serialized behind a [HandoffHeader] and sent to
//! the owner of their new position.
use std::cell::Cell;

use fieldline_concepts::{DomainId, DomainOwnership, FieldError, FieldSampler};
use nalgebra::SVector;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::curve::{Curve, CurveId, CurveStatus, HistoryPolicy, StepEvent};
use crate::driver::CancellationToken;
use crate::errors::AdvectionError;
use crate::solvers::StepperRegistry;
use crate::step_record::StepRecord;
use crate::transport::Communicator;
use crate::wire::{WireBuffer, WireError};

/// First bytes of every serialized curve.
pub const HANDOFF_MAGIC: [u8; 4] = *b"FLCV";

/// Version of the binary layout of serialized curves.
pub const HANDOFF_VERSION: u16 = 1;

/// Header which precedes a serialized [Curve].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandoffHeader {
    /// Identifier of the transmitted curve.
    pub curve_id: CurveId,
    /// Domain which should continue the integration.
    pub destination: Option<DomainId>,
}

/// Serializes a curve together with a [HandoffHeader].
pub fn encode_handoff<const D: usize>(
    curve: &Curve<D>,
    destination: Option<DomainId>,
    history: HistoryPolicy,
) -> Result<WireBuffer, WireError> {
    let mut buffer = WireBuffer::with_capacity(256 + 64 * D * curve.records().len());
    buffer.write_raw(&HANDOFF_MAGIC);
    buffer.write(&HANDOFF_VERSION);
    buffer.write(&curve.id());
    buffer.write(&destination);
    curve.write_wire(&mut buffer, history)?;
    Ok(buffer)
}

/// Inverse of [encode_handoff].
///
/// Fails if the header does not match, the stepper tag is unknown to the registry or if
/// bytes are left over after reading the curve.
pub fn decode_handoff<const D: usize>(
    bytes: Vec<u8>,
    registry: &StepperRegistry<D>,
) -> Result<(HandoffHeader, Curve<D>), AdvectionError> {
    let mut buffer = WireBuffer::from_bytes(bytes);
    if buffer.read_array::<4>()? != HANDOFF_MAGIC {
        return Err(WireError::InvalidValue("not a serialized curve".into()).into());
    }
    let version = buffer.read::<u16>()?;
    if version != HANDOFF_VERSION {
        return Err(WireError::InvalidValue(format!(
            "unsupported format version {} (expected {})",
            version, HANDOFF_VERSION
        ))
        .into());
    }
    let header = HandoffHeader {
        curve_id: buffer.read()?,
        destination: buffer.read()?,
    };
    let curve = Curve::read_wire(&mut buffer, registry)?;
    if curve.id() != header.curve_id {
        return Err(WireError::InvalidValue(format!(
            "header announces {} but payload contains {}",
            header.curve_id,
            curve.id()
        ))
        .into());
    }
    if buffer.remaining() != 0 {
        return Err(WireError::InvalidValue(format!(
            "{} trailing bytes after {}",
            buffer.remaining(),
            curve.id()
        ))
        .into());
    }
    Ok((header, curve))
}

/// Remembers the last position at which the wrapped field could not be evaluated.
struct ProbingField<'a, const D: usize> {
    field: &'a dyn FieldSampler<D>,
    failed_at: Cell<Option<SVector<f64, D>>>,
}

impl<'a, const D: usize> ProbingField<'a, D> {
    fn new(field: &'a dyn FieldSampler<D>) -> Self {
        Self {
            field,
            failed_at: Cell::new(None),
        }
    }
}

impl<const D: usize> FieldSampler<D> for ProbingField<'_, D> {
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        self.field
            .evaluate(t, pos)
            .inspect_err(|_| self.failed_at.set(Some(*pos)))
    }

    fn evaluate_with_velocity(
        &self,
        t: f64,
        pos: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        self.field
            .evaluate_with_velocity(t, pos, vel)
            .inspect_err(|_| self.failed_at.set(Some(*pos)))
    }
}

/// Result of [DomainCrossingCoordinator::hand_off].
#[derive(Debug)]
pub enum HandoffOutcome<const D: usize> {
    /// The curve was serialized and sent.
    Sent {
        /// Identifier of the curve.
        id: CurveId,
        /// Receiving domain.
        destination: DomainId,
        /// Size of the transmitted message.
        n_bytes: usize,
        /// Records which were not transmitted due to the [HistoryPolicy].
        retained: Vec<StepRecord<D>>,
    },
    /// The curve was not sent and is returned to the caller.
    ///
    /// Curves whose destination could not be reached are marked as
    /// [CurveStatus::ExitedDomain] without destination.
    Returned(Curve<D>),
}

/// Decides where curves continue and moves them between domains.
///
/// After every successful step the coordinator checks if the head of the curve is still
/// inside the local domain.
/// Once it left, the stepper is notified, the curve is serialized and handed to the
/// [Communicator] for delivery to the owner of the new position.
///
/// Field failures while the head is still inside the local domain mean that one of the
/// stages of the integrator sampled the field outside of the locally available data.
/// The coordinator retries such steps with halved step sizes up to
/// `max_boundary_refinements` times.
/// If this does not help, the curve is handed to the owner of the position which could not
/// be sampled.
/// A curve which would be sent straight back to the domain it just arrived from without
/// having taken a single step there is marked as [CurveStatus::FieldError].
///
/// Curves are only handed over while they still need to be integrated.
/// A curve whose last step ends behind the seam stays on the domain which took this step
/// and keeps its terminal status.
pub struct DomainCrossingCoordinator<O, C, const D: usize> {
    local: DomainId,
    ownership: O,
    communicator: C,
    registry: StepperRegistry<D>,
    history: HistoryPolicy,
    max_boundary_refinements: u32,
}

impl<O, C, const D: usize> DomainCrossingCoordinator<O, C, D>
where
    O: DomainOwnership<D>,
    C: Communicator<DomainId, Vec<u8>>,
{
    /// Coordinator of the domain `local`.
    pub fn new(local: DomainId, ownership: O, communicator: C) -> Self {
        Self {
            local,
            ownership,
            communicator,
            registry: StepperRegistry::default(),
            history: HistoryPolicy::Full,
            max_boundary_refinements: 4,
        }
    }

    /// Uses the given registry to reconstruct received steppers.
    pub fn with_registry(mut self, registry: StepperRegistry<D>) -> Self {
        self.registry = registry;
        self
    }

    /// Number of records which are transmitted with each curve.
    pub fn with_history(mut self, history: HistoryPolicy) -> Self {
        self.history = history;
        self
    }

    /// Maximum number of times a step is halved before a curve is handed over due to a
    /// field failure.
    pub fn with_max_boundary_refinements(mut self, max_boundary_refinements: u32) -> Self {
        self.max_boundary_refinements = max_boundary_refinements;
        self
    }

    /// Domain owned by this coordinator.
    pub fn local(&self) -> DomainId {
        self.local
    }

    /// Ownership structure of the global domain.
    pub fn ownership(&self) -> &O {
        &self.ownership
    }

    /// Registry used to reconstruct received steppers.
    pub fn registry(&self) -> &StepperRegistry<D> {
        &self.registry
    }

    /// History policy for transmitted curves.
    pub fn history(&self) -> HistoryPolicy {
        self.history
    }

    fn exit_towards(&self, curve: &mut Curve<D>, destination: Option<DomainId>) {
        match destination.filter(|destination| *destination != self.local) {
            Some(destination) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(curve = curve.id().0, %destination, "curve leaves domain");
                curve.depart(destination)
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(curve = curve.id().0, "curve leaves global domain");
                curve.stepper_mut().exit_domain();
                curve.set_status(CurveStatus::ExitedDomain { destination: None });
            }
        }
    }

    fn is_bounce(&self, curve: &Curve<D>, destination: DomainId) -> bool {
        curve.previous_domain() == Some(destination) && curve.steps_on_domain() == 0
    }

    /// Advances the curve on the local domain.
    ///
    /// Stops when the curve left the local domain, can not be advanced any further or after
    /// `budget` steps.
    /// The cancellation token is checked between steps.
    /// Returns the status of the curve which is [CurveStatus::Active] only if the budget was
    /// exhausted.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(curve = curve.id().0)))]
    pub fn advance(
        &self,
        curve: &mut Curve<D>,
        field: &dyn FieldSampler<D>,
        t_max: f64,
        budget: Option<u64>,
        cancel: Option<&CancellationToken>,
    ) -> CurveStatus {
        if curve.status() != CurveStatus::Active {
            return curve.status();
        }
        let head = curve.head();
        if !self.ownership.contains(&self.local, &head) {
            let owner = self.ownership.owner_of(&head);
            // Curves handed over after a field failure stay until they took a step
            if !owner.is_some_and(|owner| self.is_bounce(curve, owner)) {
                self.exit_towards(curve, owner);
                return curve.status();
            }
        }

        let mut n_taken = 0;
        let mut n_refinements = 0;
        let mut nominal_h = None;
        while curve.status() == CurveStatus::Active {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                curve.cancel();
                break;
            }
            if budget.is_some_and(|budget| n_taken >= budget) {
                break;
            }
            let probe = ProbingField::new(field);
            match curve.step(&probe, t_max) {
                StepEvent::Advanced => {
                    n_taken += 1;
                    n_refinements = 0;
                    if let Some(h) = nominal_h.take() {
                        if !curve.stepper().is_adaptive() {
                            curve.stepper_mut().rearm(h);
                        }
                    }
                    let head = curve.head();
                    if !self.ownership.contains(&self.local, &head) {
                        let owner = self.ownership.owner_of(&head);
                        self.exit_towards(curve, owner);
                    }
                }
                // Finished curves stay where their last step was taken
                StepEvent::Finished(_) => (),
                StepEvent::FieldFailure(error) => {
                    if error.is_spatial() && n_refinements < self.max_boundary_refinements {
                        let h = curve.stepper().step_size().abs();
                        nominal_h.get_or_insert(h);
                        n_refinements += 1;
                        #[cfg(feature = "tracing")]
                        tracing::trace!(h = h / 2.0, n_refinements, "refining step at boundary");
                        curve.stepper_mut().rearm(h / 2.0);
                        continue;
                    }
                    let destination = error
                        .is_spatial()
                        .then(|| probe.failed_at.get())
                        .flatten()
                        .and_then(|pos| self.ownership.owner_of(&pos))
                        .filter(|owner| *owner != self.local && !self.is_bounce(curve, *owner));
                    match destination {
                        Some(destination) => {
                            if let Some(h) = nominal_h.take() {
                                curve.stepper_mut().rearm(h);
                            }
                            self.exit_towards(curve, Some(destination));
                        }
                        None => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(%error, "field failure without destination");
                            curve.set_status(CurveStatus::FieldError);
                        }
                    }
                }
            }
        }
        curve.status()
    }

    /// Serializes a curve in transit and sends it to its destination.
    ///
    /// Curves which are not in transit are returned unchanged.
    /// If sending fails the curve is returned as [CurveStatus::ExitedDomain] without
    /// destination.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(curve = curve.id().0)))]
    pub fn hand_off(&mut self, mut curve: Curve<D>) -> HandoffOutcome<D> {
        let destination = match curve.status() {
            CurveStatus::ExitedDomain {
                destination: Some(destination),
            } => destination,
            _ => return HandoffOutcome::Returned(curve),
        };
        let sent = encode_handoff(&curve, Some(destination), self.history)
            .map_err(AdvectionError::from)
            .and_then(|buffer| {
                let n_bytes = buffer.len();
                self.communicator
                    .send(&destination, buffer.into_bytes())
                    .map(|_| n_bytes)
            });
        match sent {
            Ok(n_bytes) => HandoffOutcome::Sent {
                id: curve.id(),
                destination,
                n_bytes,
                retained: curve.truncate_history(self.history),
            },
            Err(_error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_error, %destination, "destination unreachable");
                curve.set_status(CurveStatus::ExitedDomain { destination: None });
                HandoffOutcome::Returned(curve)
            }
        }
    }

    /// Receives all curves which were sent to this domain.
    ///
    /// Received curves are [CurveStatus::Active] and ready to be advanced.
    /// Messages which can not be decoded are reported individually.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn receive(&mut self) -> Vec<Result<Curve<D>, AdvectionError>> {
        let local = self.local;
        let registry = &self.registry;
        self.communicator
            .receive()
            .into_iter()
            .map(|bytes| {
                let (_, mut curve) = decode_handoff(bytes, registry)?;
                curve.arrive(local);
                Ok(curve)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::solvers::test_fields::*;
    use crate::solvers::*;
    use crate::transport::{ChannelComm, FromMap};

    /// Two domains split at `x = 0.5`.
    struct HalfSpaces;

    impl DomainOwnership<3> for HalfSpaces {
        fn contains(&self, domain: &DomainId, pos: &SVector<f64, 3>) -> bool {
            self.owner_of(pos) == Some(*domain)
        }

        fn owner_of(&self, pos: &SVector<f64, 3>) -> Option<DomainId> {
            match pos[0] {
                x if (-10.0..0.5).contains(&x) => Some(DomainId(0)),
                x if (0.5..=10.0).contains(&x) => Some(DomainId(1)),
                _ => None,
            }
        }

        fn neighbors(&self, domain: &DomainId) -> Vec<DomainId> {
            vec![DomainId(1 - domain.0)]
        }

        fn domains(&self) -> Vec<DomainId> {
            vec![DomainId(0), DomainId(1)]
        }
    }

    /// Uniform field which only has data for `x < limit`.
    struct Restricted(f64);

    impl FieldSampler<3> for Restricted {
        fn evaluate(&self, _: f64, pos: &SVector<f64, 3>) -> Result<SVector<f64, 3>, FieldError> {
            if pos[0] < self.0 {
                Ok([1.0, 0.0, 0.0].into())
            } else {
                Err(FieldError::OutsideDomain(format!("x={}", pos[0])))
            }
        }
    }

    type Coordinator = DomainCrossingCoordinator<HalfSpaces, ChannelComm<DomainId, Vec<u8>>, 3>;

    fn coordinators() -> (Coordinator, Coordinator) {
        let mut comms = ChannelComm::from_map(&HalfSpaces.communication_map()).unwrap();
        let mut coordinator = |domain| {
            DomainCrossingCoordinator::new(domain, HalfSpaces, comms.remove(&domain).unwrap())
        };
        (coordinator(DomainId(0)), coordinator(DomainId(1)))
    }

    fn curve(stepper: Box<dyn Stepper<3>>) -> Curve<3> {
        Curve::new(CurveId(7), DomainId(0), stepper)
    }

    #[test]
    fn handoff_preserves_final_position() {
        let field = Uniform(SVector::from([1.0, 0.0, 0.0]));
        let (mut c0, mut c1) = coordinators();
        let mut reference = curve(Box::new(RungeKutta4::new(0.0, SVector::zeros(), 0.1)));
        reference.advance(&field, 1.0);

        let mut moving = curve(Box::new(RungeKutta4::new(0.0, SVector::zeros(), 0.1)));
        let status = c0.advance(&mut moving, &field, 1.0, None, None);
        assert_eq!(
            status,
            CurveStatus::ExitedDomain {
                destination: Some(DomainId(1))
            }
        );
        assert_eq!(moving.records().len(), 5);
        assert_eq!(moving.stepper().state(), SolverState::DomainExit);
        match c0.hand_off(moving) {
            HandoffOutcome::Sent {
                n_bytes, retained, ..
            } => {
                assert!(n_bytes > 0);
                assert!(retained.is_empty());
            }
            HandoffOutcome::Returned(_) => panic!("curve was not sent"),
        }

        let mut received = c1.receive();
        assert_eq!(received.len(), 1);
        let mut moving = received.pop().unwrap().unwrap();
        assert_eq!(moving.status(), CurveStatus::Active);
        assert_eq!(moving.domain(), DomainId(1));
        assert_eq!(moving.n_handoffs(), 1);
        assert_eq!(c1.advance(&mut moving, &field, 1.0, None, None), CurveStatus::Terminated);
        assert_eq!(moving.head(), reference.head());
        assert_eq!(moving.records(), reference.records());
        moving.check_continuity().unwrap();
    }

    #[test]
    fn last_step_behind_seam_finishes_locally() {
        let field = Uniform(SVector::from([1.0, 0.0, 0.0]));
        let (mut c0, mut c1) = coordinators();
        // Ten steps of 0.1 end at x = 0.55 on the other side of the seam
        let y0 = SVector::from([-0.45, 0.0, 0.0]);
        let mut finishing = curve(Box::new(Euler::new(0.0, y0, 0.1)));
        assert_eq!(
            c0.advance(&mut finishing, &field, 1.0, None, None),
            CurveStatus::Terminated
        );
        assert_eq!(finishing.records().len(), 10);
        assert!(finishing.head()[0] > 0.5);
        assert_eq!(finishing.domain(), DomainId(0));
        assert_eq!(finishing.n_handoffs(), 0);
        assert!(matches!(c0.hand_off(finishing), HandoffOutcome::Returned(_)));
        assert!(c1.receive().is_empty());
    }

    #[test]
    fn boundary_refinement_then_handoff() {
        // Local data ends slightly behind the domain boundary
        let field = Restricted(0.5 + 1e-3);
        let (c0, _) = coordinators();
        let y0 = SVector::from([0.05, 0.0, 0.0]);
        let mut moving = curve(Box::new(RungeKutta4::new(0.0, y0, 0.1)));
        let status = c0.advance(&mut moving, &field, 1.0, None, None);
        assert_eq!(
            status,
            CurveStatus::ExitedDomain {
                destination: Some(DomainId(1))
            }
        );
        moving.check_continuity().unwrap();
        // The nominal step size is restored after refinement
        assert_eq!(moving.stepper().step_size(), 0.1);
    }

    #[test]
    fn field_failure_without_destination() {
        let (c0, _) = coordinators();
        let mut moving = curve(Box::new(Euler::new(0.0, SVector::zeros(), 0.1)));
        let status = c0.advance(&mut moving, &Failing, 1.0, None, None);
        // The failing query lies in the local domain itself
        assert_eq!(status, CurveStatus::FieldError);
    }

    #[test]
    fn leaving_global_domain() {
        let field = Uniform(SVector::from([-200.0, 0.0, 0.0]));
        let (mut c0, _) = coordinators();
        let mut moving = curve(Box::new(Euler::new(0.0, SVector::zeros(), 0.1)));
        let status = c0.advance(&mut moving, &field, 1.0, None, None);
        assert_eq!(status, CurveStatus::ExitedDomain { destination: None });
        assert!(matches!(c0.hand_off(moving), HandoffOutcome::Returned(_)));
    }

    #[test]
    fn unreachable_destination() {
        let field = Uniform(SVector::from([1.0, 0.0, 0.0]));
        let (mut c0, c1) = coordinators();
        drop(c1);
        let mut moving = curve(Box::new(Euler::new(0.0, SVector::zeros(), 0.1)));
        c0.advance(&mut moving, &field, 1.0, None, None);
        match c0.hand_off(moving) {
            HandoffOutcome::Returned(curve) => assert_eq!(
                curve.status(),
                CurveStatus::ExitedDomain { destination: None }
            ),
            HandoffOutcome::Sent { .. } => panic!("receiver was dropped"),
        }
    }

    #[test]
    fn misplaced_curve_is_forwarded() {
        let field = Uniform(SVector::from([1.0, 0.0, 0.0]));
        let (c0, _) = coordinators();
        let mut moving = curve(Box::new(Euler::new(0.0, SVector::from([0.7, 0.0, 0.0]), 0.1)));
        let status = c0.advance(&mut moving, &field, 1.0, None, None);
        assert_eq!(
            status,
            CurveStatus::ExitedDomain {
                destination: Some(DomainId(1))
            }
        );
        assert!(moving.records().is_empty());
    }

    #[test]
    fn budget_and_cancellation() {
        let field = Uniform(SVector::from([0.1, 0.0, 0.0]));
        let (c0, _) = coordinators();
        let mut moving = curve(Box::new(Euler::new(0.0, SVector::zeros(), 0.1)));
        assert_eq!(
            c0.advance(&mut moving, &field, 1.0, Some(3), None),
            CurveStatus::Active
        );
        assert_eq!(moving.records().len(), 3);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            c0.advance(&mut moving, &field, 1.0, None, Some(&token)),
            CurveStatus::Cancelled
        );
        assert_eq!(moving.records().len(), 3);
    }

    #[test]
    fn tail_history_keeps_records_locally() {
        let field = Uniform(SVector::from([1.0, 0.0, 0.0]));
        let (c0, mut c1) = coordinators();
        let mut c0 = c0.with_history(HistoryPolicy::Tail(2));
        let mut moving = curve(Box::new(Euler::new(0.0, SVector::zeros(), 0.1)));
        c0.advance(&mut moving, &field, 1.0, None, None);
        match c0.hand_off(moving) {
            HandoffOutcome::Sent { retained, .. } => assert_eq!(retained.len(), 3),
            HandoffOutcome::Returned(_) => panic!("curve was not sent"),
        }
        let received = c1.receive().pop().unwrap().unwrap();
        assert_eq!(received.records().len(), 2);
        assert_eq!(received.n_dropped(), 3);
    }

    #[test]
    fn corrupt_messages_are_reported() {
        let registry = StepperRegistry::<3>::default();
        assert!(decode_handoff(vec![], &registry).is_err());
        assert!(decode_handoff(b"XXXX\x01\x00".to_vec(), &registry).is_err());

        let moving = curve(Box::new(Euler::new(0.0, SVector::zeros(), 0.1)));
        let mut bytes = encode_handoff(&moving, None, HistoryPolicy::Full)
            .unwrap()
            .into_bytes();
        bytes.push(0);
        assert!(matches!(
            decode_handoff(bytes, &registry),
            Err(AdvectionError::WireError(WireError::InvalidValue(_)))
        ));
    }
}
