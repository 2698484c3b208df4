//! Numerical integrators which advance a single integral curve.
//!
//! Every integrator implements the [Stepper] trait and shares the bookkeeping of time,
//! position and step size through [IntegratorCore].
//! The step-size policy is identical for all methods:
//! The signed step size points from the current time towards `t_max`.
//! If a step of size $1.01h$ would reach or overshoot `t_max`, the step is shortened such that
//! it ends exactly at `t_max` and is marked as the last one.
//! A step size with $0.1|h| \leq |t|\epsilon$ can no longer change the time value and results
//! in [StepOutcome::StepsizeUnderflow].
//!
//! | Method | Tag | [FieldOrder] | Notes |
//! | --- | --- | --- | --- |
//! | [Euler] | 1 | First | |
//! | [RungeKutta4] | 2 | First | |
//! | [DormandPrince] | 3 | First | adaptive 5(4) with FSAL |
//! | [AdamsBashforth2] | 4 | First | Euler bootstrap |
//! | [Leapfrog] | 5 | Second | kick-drift-kick |

mod adaptive;
mod explicit;
mod multistep;
mod registry;
mod symplectic;

pub use adaptive::*;
pub use explicit::*;
pub use multistep::*;
pub use registry::*;
pub use symplectic::*;

use fieldline_concepts::{FieldError, FieldOrder, FieldSampler};
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use crate::step_record::StepRecord;
use crate::wire::{StateCheckpoint, StateVisitor, WireBuffer, WireError, WireFormat};

/// Persistent type tag of a [Stepper].
///
/// The tag is transmitted together with the checkpoint of the stepper such that the
/// receiving side can select the correct constructor from its [StepperRegistry].
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct StepperTag(pub u32);

impl StepperTag {
    /// Tag of the [Euler] stepper.
    pub const EULER: Self = Self(1);
    /// Tag of the [RungeKutta4] stepper.
    pub const RUNGE_KUTTA_4: Self = Self(2);
    /// Tag of the [DormandPrince] stepper.
    pub const DORMAND_PRINCE: Self = Self(3);
    /// Tag of the [AdamsBashforth2] stepper.
    pub const ADAMS_BASHFORTH_2: Self = Self(4);
    /// Tag of the [Leapfrog] stepper.
    pub const LEAPFROG: Self = Self(5);
}

impl core::fmt::Display for StepperTag {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "StepperTag({})", self.0)
    }
}

impl WireFormat for StepperTag {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&self.0);
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        Ok(Self(buffer.read()?))
    }
}

/// Selects one of the built-in integrators.
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum StepperKind {
    /// See [Euler].
    Euler,
    /// See [RungeKutta4].
    RungeKutta4,
    /// See [DormandPrince].
    DormandPrince,
    /// See [AdamsBashforth2].
    AdamsBashforth2,
    /// See [Leapfrog].
    Leapfrog,
}

impl StepperKind {
    /// Type tag which identifies the stepper on the wire.
    pub fn tag(&self) -> StepperTag {
        match self {
            StepperKind::Euler => StepperTag::EULER,
            StepperKind::RungeKutta4 => StepperTag::RUNGE_KUTTA_4,
            StepperKind::DormandPrince => StepperTag::DORMAND_PRINCE,
            StepperKind::AdamsBashforth2 => StepperTag::ADAMS_BASHFORTH_2,
            StepperKind::Leapfrog => StepperTag::LEAPFROG,
        }
    }

    /// Inverse of [StepperKind::tag] for the built-in integrators.
    pub fn from_tag(tag: StepperTag) -> Option<Self> {
        match tag {
            StepperTag::EULER => Some(StepperKind::Euler),
            StepperTag::RUNGE_KUTTA_4 => Some(StepperKind::RungeKutta4),
            StepperTag::DORMAND_PRINCE => Some(StepperKind::DormandPrince),
            StepperTag::ADAMS_BASHFORTH_2 => Some(StepperKind::AdamsBashforth2),
            StepperTag::LEAPFROG => Some(StepperKind::Leapfrog),
            _ => None,
        }
    }
}

/// Lifecycle of a [Stepper].
///
/// `Ready` is the initial state.
/// All other states are absorbing: [Stepper::step] refuses to advance until the stepper is
/// explicitly [rearmed](Stepper::rearm) or [resumed](Stepper::resume).
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum SolverState {
    /// The stepper can advance.
    Ready,
    /// The position left the locally owned domain.
    DomainExit,
    /// The step size became too small to advance the time.
    StepsizeUnderflow,
    /// The field could not be evaluated.
    FieldFailure,
    /// `t_max` was reached.
    Terminated,
}

impl WireFormat for SolverState {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        let code: u8 = match self {
            SolverState::Ready => 0,
            SolverState::DomainExit => 1,
            SolverState::StepsizeUnderflow => 2,
            SolverState::FieldFailure => 3,
            SolverState::Terminated => 4,
        };
        buffer.write(&code);
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        match buffer.read::<u8>()? {
            0 => Ok(SolverState::Ready),
            1 => Ok(SolverState::DomainExit),
            2 => Ok(SolverState::StepsizeUnderflow),
            3 => Ok(SolverState::FieldFailure),
            4 => Ok(SolverState::Terminated),
            code => Err(WireError::InvalidValue(format!(
                "unknown solver state {}",
                code
            ))),
        }
    }
}

/// Result of a single call to [Stepper::step].
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome<const D: usize> {
    /// The stepper advanced and can continue.
    Advanced(StepRecord<D>),
    /// The stepper advanced exactly to `t_max`.
    Terminated(StepRecord<D>),
    /// The step size can no longer advance the time.
    StepsizeUnderflow,
    /// Sampling the field failed. The stepper did not advance.
    FieldFailure(FieldError),
    /// The stepper was not in the [SolverState::Ready] state.
    NotReady(SolverState),
}

/// Step which was accepted by the step-size policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PlannedStep {
    pub(crate) h: f64,
    pub(crate) last: bool,
}

/// Time, position and step-size bookkeeping which is shared by all integrators.
#[derive(Clone, Debug, PartialEq)]
pub struct IntegratorCore<const D: usize> {
    t: f64,
    y: SVector<f64, D>,
    h: f64,
    h_min: f64,
    h_max: f64,
    first_step: bool,
    state: SolverState,
}

impl<const D: usize> Default for IntegratorCore<D> {
    fn default() -> Self {
        Self::new(0.0, SVector::zeros(), 0.0)
    }
}

impl<const D: usize> IntegratorCore<D> {
    /// Starts at time `t0` in position `y0` with nominal step size `h`.
    ///
    /// Only the magnitude of `h` matters, the direction is determined by `t_max` in each call
    /// to [Stepper::step].
    pub fn new(t0: f64, y0: SVector<f64, D>, h: f64) -> Self {
        Self {
            t: t0,
            y: y0,
            h: h.abs(),
            h_min: 0.0,
            h_max: f64::INFINITY,
            first_step: true,
            state: SolverState::Ready,
        }
    }

    /// Bounds for the magnitude of the step size.
    pub fn with_step_bounds(mut self, h_min: f64, h_max: f64) -> Self {
        self.h_min = h_min.abs();
        self.h_max = h_max.abs();
        self.h = self.h.min(self.h_max);
        self
    }

    /// Current time.
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Current position.
    pub fn position(&self) -> &SVector<f64, D> {
        &self.y
    }

    /// Current signed step size.
    pub fn step_size(&self) -> f64 {
        self.h
    }

    /// Lower bound of the step size.
    pub fn h_min(&self) -> f64 {
        self.h_min
    }

    /// Upper bound of the step size.
    pub fn h_max(&self) -> f64 {
        self.h_max
    }

    /// `true` until the first step was taken.
    pub fn is_first_step(&self) -> bool {
        self.first_step
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SolverState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SolverState) {
        self.state = state;
    }

    /// Sets the magnitude of the step size while keeping its direction.
    pub(crate) fn set_step_size(&mut self, h: f64) {
        let sign = if self.h < 0.0 { -1.0 } else { 1.0 };
        self.h = sign * h.abs().min(self.h_max);
    }

    /// A step size which can no longer change the time value.
    pub(crate) fn is_underflow(&self, h: f64) -> bool {
        0.1 * h.abs() <= self.t.abs() * f64::EPSILON
    }

    /// Applies the step-size policy for the next step towards `t_max`.
    pub(crate) fn plan_step(&mut self, t_max: f64) -> Result<PlannedStep, StepOutcome<D>> {
        if self.state != SolverState::Ready {
            return Err(StepOutcome::NotReady(self.state));
        }
        if !t_max.is_finite() {
            return Err(self.fail(FieldError::Invalid(format!(
                "integration target t_max={} is not finite",
                t_max
            ))));
        }
        if self.t == t_max {
            self.state = SolverState::Terminated;
            return Err(StepOutcome::NotReady(self.state));
        }
        let direction = if t_max > self.t { 1.0 } else { -1.0 };
        let mut h = direction * self.h.abs();
        let mut last = false;
        if (self.t + 1.01 * h) * direction >= t_max * direction {
            h = t_max - self.t;
            last = true;
        }
        if self.is_underflow(h) {
            self.state = SolverState::StepsizeUnderflow;
            return Err(StepOutcome::StepsizeUnderflow);
        }
        Ok(PlannedStep { h, last })
    }

    /// Moves the stepper into the failure state and reports the error.
    pub(crate) fn fail(&mut self, error: FieldError) -> StepOutcome<D> {
        self.state = SolverState::FieldFailure;
        StepOutcome::FieldFailure(error)
    }

    /// Moves the stepper into the underflow state.
    pub(crate) fn underflow(&mut self) -> StepOutcome<D> {
        self.state = SolverState::StepsizeUnderflow;
        StepOutcome::StepsizeUnderflow
    }

    /// Accepts the new position and produces the record of this step.
    ///
    /// The nominal step size is left untouched when the step was shortened to hit `t_max`.
    pub(crate) fn commit(
        &mut self,
        planned: PlannedStep,
        y_new: SVector<f64, D>,
        velocities: Option<(SVector<f64, D>, SVector<f64, D>)>,
        t_max: f64,
    ) -> StepOutcome<D> {
        if y_new.iter().any(|x| !x.is_finite()) {
            return self.fail(FieldError::Invalid(format!(
                "integration produced non-finite position at t={}",
                self.t
            )));
        }
        let t1 = if planned.last {
            t_max
        } else {
            self.t + planned.h
        };
        let mut record = StepRecord::new(self.t, t1, self.y, y_new);
        if let Some((v0, v1)) = velocities {
            record = record.with_velocities(v0, v1);
        }
        self.t = t1;
        self.y = y_new;
        self.h = planned.h.signum() * self.h.abs();
        self.first_step = false;
        if planned.last {
            self.state = SolverState::Terminated;
            StepOutcome::Terminated(record)
        } else {
            StepOutcome::Advanced(record)
        }
    }
}

impl<const D: usize> StateCheckpoint for IntegratorCore<D> {
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
        visitor.accept(&mut self.t)?;
        visitor.accept(&mut self.y)?;
        visitor.accept(&mut self.h)?;
        visitor.accept(&mut self.h_min)?;
        visitor.accept(&mut self.h_max)?;
        visitor.accept(&mut self.first_step)?;
        visitor.accept(&mut self.state)
    }
}

/// Evaluates the field and rejects non-finite values.
pub(crate) fn sample<const D: usize>(
    field: &dyn FieldSampler<D>,
    t: f64,
    y: &SVector<f64, D>,
) -> Result<SVector<f64, D>, FieldError> {
    check_finite(field.evaluate(t, y)?, t)
}

/// Evaluates the second-order form of the field and rejects non-finite values.
pub(crate) fn sample_with_velocity<const D: usize>(
    field: &dyn FieldSampler<D>,
    t: f64,
    y: &SVector<f64, D>,
    v: &SVector<f64, D>,
) -> Result<SVector<f64, D>, FieldError> {
    check_finite(field.evaluate_with_velocity(t, y, v)?, t)
}

fn check_finite<const D: usize>(
    value: SVector<f64, D>,
    t: f64,
) -> Result<SVector<f64, D>, FieldError> {
    if value.iter().all(|x| x.is_finite()) {
        Ok(value)
    } else {
        Err(FieldError::Invalid(format!(
            "field returned non-finite value at t={}",
            t
        )))
    }
}

/// Advances an integral curve by one step at a time.
///
/// Implementors hold an [IntegratorCore] and additional method-specific state.
/// All persistent state is exposed through [StateCheckpoint] such that a stepper can be
/// moved to another process by saving it on one side and restoring a default-constructed
/// instance of the same [StepperTag] on the other side.
///
/// A single call to [Stepper::step] either produces exactly one [StepRecord] or no record at
/// all. Failures of the field sampler are returned unchanged, the stepper never retries.
pub trait Stepper<const D: usize>: StateCheckpoint + Send + core::fmt::Debug {
    /// Persistent type tag.
    fn tag(&self) -> StepperTag;

    /// Which form of the field this stepper evaluates.
    fn order(&self) -> FieldOrder;

    /// Shared bookkeeping.
    fn core(&self) -> &IntegratorCore<D>;

    /// Shared bookkeeping.
    fn core_mut(&mut self) -> &mut IntegratorCore<D>;

    /// Advances by one step towards `t_max`.
    fn step(&mut self, field: &dyn FieldSampler<D>, t_max: f64) -> StepOutcome<D>;

    /// Clones the stepper behind a trait object.
    fn box_clone(&self) -> Box<dyn Stepper<D>>;

    /// Called when the position left the locally owned domain.
    ///
    /// Steppers which cache values derived from local field data discard them here.
    fn on_exit_domain(&mut self) {}

    /// Adaptive steppers control their step size themselves.
    fn is_adaptive(&self) -> bool {
        false
    }

    /// Current velocity of second-order steppers.
    fn velocity(&self) -> Option<SVector<f64, D>> {
        None
    }

    /// Current time.
    fn time(&self) -> f64 {
        self.core().time()
    }

    /// Current position.
    fn position(&self) -> SVector<f64, D> {
        *self.core().position()
    }

    /// Current signed step size.
    fn step_size(&self) -> f64 {
        self.core().step_size()
    }

    /// Current lifecycle state.
    fn state(&self) -> SolverState {
        self.core().state()
    }

    /// Moves into the [SolverState::DomainExit] state and notifies the stepper.
    fn exit_domain(&mut self) {
        self.on_exit_domain();
        self.core_mut().set_state(SolverState::DomainExit);
    }

    /// Returns to the [SolverState::Ready] state with a new step size magnitude.
    fn rearm(&mut self, h: f64) {
        self.core_mut().set_step_size(h);
        self.core_mut().set_state(SolverState::Ready);
    }

    /// Returns to the [SolverState::Ready] state after the curve arrived on a new domain.
    fn resume(&mut self) {
        self.core_mut().set_state(SolverState::Ready);
    }
}

impl<const D: usize> Clone for Box<dyn Stepper<D>> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Binary checkpoint of a stepper.
pub fn checkpoint_bytes<const D: usize>(
    stepper: &dyn Stepper<D>,
) -> Result<Vec<u8>, WireError> {
    let mut copy = stepper.box_clone();
    let mut buffer = WireBuffer::new();
    copy.save(&mut buffer)?;
    Ok(buffer.into_bytes())
}

#[cfg(test)]
pub(crate) mod test_fields {
    use super::*;

    pub struct Uniform<const D: usize>(pub SVector<f64, D>);

    impl<const D: usize> FieldSampler<D> for Uniform<D> {
        fn evaluate(&self, _: f64, _: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
            Ok(self.0)
        }
    }

    /// $\dot{y} = \lambda y$
    pub struct Exponential(pub f64);

    impl FieldSampler<1> for Exponential {
        fn evaluate(&self, _: f64, y: &SVector<f64, 1>) -> Result<SVector<f64, 1>, FieldError> {
            Ok(y * self.0)
        }
    }

    /// Harmonic oscillator as second-order field $\ddot{x} = -x$.
    pub struct Spring;

    impl FieldSampler<1> for Spring {
        fn evaluate(&self, _: f64, _: &SVector<f64, 1>) -> Result<SVector<f64, 1>, FieldError> {
            Ok(SVector::from([0.0]))
        }

        fn evaluate_with_velocity(
            &self,
            _: f64,
            y: &SVector<f64, 1>,
            _: &SVector<f64, 1>,
        ) -> Result<SVector<f64, 1>, FieldError> {
            Ok(-y)
        }
    }

    /// Rotation $\dot{y} = (-y_1, y_0)$ with period $2\pi$.
    pub struct Rotation;

    impl FieldSampler<2> for Rotation {
        fn evaluate(&self, _: f64, y: &SVector<f64, 2>) -> Result<SVector<f64, 2>, FieldError> {
            Ok(SVector::from([-y[1], y[0]]))
        }
    }

    pub struct Failing;

    impl<const D: usize> FieldSampler<D> for Failing {
        fn evaluate(&self, _: f64, _: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
            Err(FieldError::OutsideDomain("no data".into()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_fields::*;
    use super::*;

    #[test]
    fn clamp_last_step_to_t_max() {
        let mut core = IntegratorCore::<1>::new(0.0, SVector::zeros(), 0.3);
        let planned = core.plan_step(1.0).unwrap();
        assert_eq!(planned.h, 0.3);
        assert!(!planned.last);

        // 0.95 + 1.01 * 0.1 >= 1.0
        let mut core = IntegratorCore::<1>::new(0.95, SVector::zeros(), 0.1);
        let planned = core.plan_step(1.0).unwrap();
        assert!(planned.last);
        assert_eq!(planned.h, 1.0 - 0.95);
    }

    #[test]
    fn backward_direction() {
        let mut core = IntegratorCore::<1>::new(1.0, SVector::zeros(), 0.1);
        let planned = core.plan_step(0.0).unwrap();
        assert_eq!(planned.h, -0.1);
    }

    #[test]
    fn underflow_at_large_times() {
        let mut core = IntegratorCore::<1>::new(1e16, SVector::zeros(), 1.0);
        assert_eq!(core.plan_step(2e16), Err(StepOutcome::StepsizeUnderflow));
        assert_eq!(core.state(), SolverState::StepsizeUnderflow);
        // Absorbing state
        assert_eq!(
            core.plan_step(2e16),
            Err(StepOutcome::NotReady(SolverState::StepsizeUnderflow))
        );
    }

    #[test]
    fn zero_step_size_underflows() {
        let mut core = IntegratorCore::<1>::new(0.0, SVector::zeros(), 0.0);
        assert_eq!(core.plan_step(1.0), Err(StepOutcome::StepsizeUnderflow));
    }

    #[test]
    fn non_finite_t_max_is_rejected() {
        for t_max in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut core = IntegratorCore::<1>::new(0.0, SVector::zeros(), 0.1);
            assert!(matches!(
                core.plan_step(t_max),
                Err(StepOutcome::FieldFailure(FieldError::Invalid(_)))
            ));
            assert_eq!(core.state(), SolverState::FieldFailure);
            assert_eq!(core.time(), 0.0);
        }
    }

    #[test]
    fn already_at_t_max() {
        let mut core = IntegratorCore::<1>::new(1.0, SVector::zeros(), 0.1);
        assert_eq!(
            core.plan_step(1.0),
            Err(StepOutcome::NotReady(SolverState::Terminated))
        );
    }

    #[test]
    fn last_step_keeps_nominal_step_size() {
        let mut stepper = Euler::<2>::new(0.0, SVector::zeros(), 0.4);
        let field = Uniform(SVector::from([1.0, 0.0]));
        // 0.4 and 0.8 are regular steps, the third one is clamped to t_max
        assert!(matches!(stepper.step(&field, 1.0), StepOutcome::Advanced(_)));
        assert!(matches!(stepper.step(&field, 1.0), StepOutcome::Advanced(_)));
        assert!(matches!(stepper.step(&field, 1.0), StepOutcome::Terminated(_)));
        assert_eq!(stepper.time(), 1.0);
        assert_eq!(stepper.step_size(), 0.4);
        assert_eq!(stepper.state(), SolverState::Terminated);
        assert_eq!(
            stepper.step(&field, 1.0),
            StepOutcome::NotReady(SolverState::Terminated)
        );
    }

    #[test]
    fn field_failure_is_returned_unchanged() {
        let mut stepper = RungeKutta4::<1>::new(0.0, SVector::zeros(), 0.1);
        assert_eq!(
            stepper.step(&Failing, 1.0),
            StepOutcome::FieldFailure(FieldError::OutsideDomain("no data".into()))
        );
        assert_eq!(stepper.state(), SolverState::FieldFailure);
        assert_eq!(stepper.time(), 0.0);
        stepper.rearm(0.05);
        assert_eq!(stepper.state(), SolverState::Ready);
        assert_eq!(stepper.step_size(), 0.05);
    }

    #[test]
    fn exit_domain_is_absorbing() {
        let mut stepper = Leapfrog::<1>::new(0.0, SVector::zeros(), 0.1);
        stepper.exit_domain();
        assert_eq!(
            stepper.step(&Spring, 1.0),
            StepOutcome::NotReady(SolverState::DomainExit)
        );
        stepper.resume();
        assert!(matches!(stepper.step(&Spring, 1.0), StepOutcome::Advanced(_)));
    }

    #[test]
    fn solver_state_codes() {
        let mut buffer = WireBuffer::new();
        buffer.write(&SolverState::Terminated);
        buffer.write(&9_u8);
        buffer.rewind();
        assert_eq!(buffer.read::<SolverState>().unwrap(), SolverState::Terminated);
        assert!(buffer.read::<SolverState>().is_err());
    }

    #[test]
    fn kind_tags() {
        for kind in [
            StepperKind::Euler,
            StepperKind::RungeKutta4,
            StepperKind::DormandPrince,
            StepperKind::AdamsBashforth2,
            StepperKind::Leapfrog,
        ] {
            assert_eq!(StepperKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(StepperKind::from_tag(StepperTag(99)), None);
    }
}
