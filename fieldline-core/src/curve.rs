use fieldline_concepts::{CalcError, DomainId, FieldError, FieldSampler};
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::errors::AdvectionError;
use crate::solvers::{checkpoint_bytes, SolverState, StepOutcome, Stepper, StepperRegistry};
use crate::step_record::StepRecord;
use crate::wire::{WireBuffer, WireError, WireFormat};

/// Unique identifier of an integral curve.
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CurveId(pub u64);

impl core::fmt::Display for CurveId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Curve({})", self.0)
    }
}

impl From<u64> for CurveId {
    fn from(value: u64) -> Self {
        CurveId(value)
    }
}

impl WireFormat for CurveId {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&self.0);
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        Ok(Self(buffer.read()?))
    }
}

/// Integration status of a [Curve].
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum CurveStatus {
    /// The curve can be advanced further.
    Active,
    /// The curve reached `t_max`.
    Terminated,
    /// The curve left the local domain.
    ///
    /// With a destination the curve is in transit to the owner of that domain.
    /// Without a destination it left the global domain and is terminal.
    ExitedDomain {
        /// Domain which continues the integration.
        destination: Option<DomainId>,
    },
    /// The step size became too small to advance the time.
    StepsizeUnderflow,
    /// The field could not be evaluated and no other domain can take over.
    FieldError,
    /// The per-curve step limit was reached.
    MaxStepsReached,
    /// The integration was cancelled by the user.
    Cancelled,
}

impl CurveStatus {
    /// `true` if the curve will never be advanced again.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            CurveStatus::Active
                | CurveStatus::ExitedDomain {
                    destination: Some(_)
                }
        )
    }
}

impl WireFormat for CurveStatus {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        match self {
            CurveStatus::Active => buffer.write(&0_u8),
            CurveStatus::Terminated => buffer.write(&1_u8),
            CurveStatus::ExitedDomain { destination } => {
                buffer.write(&2_u8);
                buffer.write(destination);
            }
            CurveStatus::StepsizeUnderflow => buffer.write(&3_u8),
            CurveStatus::FieldError => buffer.write(&4_u8),
            CurveStatus::MaxStepsReached => buffer.write(&5_u8),
            CurveStatus::Cancelled => buffer.write(&6_u8),
        }
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        match buffer.read::<u8>()? {
            0 => Ok(CurveStatus::Active),
            1 => Ok(CurveStatus::Terminated),
            2 => Ok(CurveStatus::ExitedDomain {
                destination: buffer.read()?,
            }),
            3 => Ok(CurveStatus::StepsizeUnderflow),
            4 => Ok(CurveStatus::FieldError),
            5 => Ok(CurveStatus::MaxStepsReached),
            6 => Ok(CurveStatus::Cancelled),
            code => Err(WireError::InvalidValue(format!(
                "unknown curve status {}",
                code
            ))),
        }
    }
}

/// Determines how many [StepRecord]s travel with a curve when it is serialized.
#[derive(Clone, Copy, Debug, Default, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum HistoryPolicy {
    /// All records.
    #[default]
    Full,
    /// Only the last `n` records.
    Tail(usize),
    /// No records. The integration state is fully contained in the stepper.
    None,
}

impl HistoryPolicy {
    /// Number of records which are kept out of `n_records`.
    pub fn retained(&self, n_records: usize) -> usize {
        match self {
            HistoryPolicy::Full => n_records,
            HistoryPolicy::Tail(n) => n_records.min(*n),
            HistoryPolicy::None => 0,
        }
    }
}

/// Result of a single step of a [Curve].
#[derive(Clone, Debug, PartialEq)]
pub enum StepEvent {
    /// One record was appended and the curve is still [CurveStatus::Active].
    Advanced,
    /// The curve can not be advanced any further.
    Finished(CurveStatus),
    /// The field could not be evaluated.
    ///
    /// The curve is still [CurveStatus::Active] and the caller decides how to proceed.
    FieldFailure(FieldError),
}

/// A single integral curve together with the state of its integrator.
///
/// Records are appended in integration order and are contiguous in time and space.
/// Besides its records a curve keeps track of how it travelled through the decomposed domain
/// which is needed to detect curves bouncing between two domains without progress.
///
/// ```
/// # use fieldline_core::*;
/// # use fieldline_core::solvers::Euler;
/// # use fieldline_concepts::{DomainId, FieldError, FieldSampler};
/// # use nalgebra::SVector;
/// struct Uniform;
///
/// impl FieldSampler<3> for Uniform {
///     fn evaluate(&self, _: f64, _: &SVector<f64, 3>) -> Result<SVector<f64, 3>, FieldError> {
///         Ok([1.0, 0.0, 0.0].into())
///     }
/// }
///
/// let stepper = Euler::new(0.0, SVector::zeros(), 0.1);
/// let mut curve = Curve::new(CurveId(0), DomainId(0), Box::new(stepper));
/// assert_eq!(curve.advance(&Uniform, 1.0), CurveStatus::Terminated);
/// assert_eq!(curve.records().len(), 10);
/// assert_eq!(curve.head(), SVector::from([1.0, 0.0, 0.0]));
/// ```
#[derive(Clone, Debug)]
pub struct Curve<const D: usize> {
    id: CurveId,
    status: CurveStatus,
    domain: DomainId,
    previous_domain: Option<DomainId>,
    records: Vec<StepRecord<D>>,
    stepper: Box<dyn Stepper<D>>,
    n_steps: u64,
    n_dropped: u64,
    n_handoffs: u64,
    steps_on_domain: u64,
    max_steps: Option<u64>,
}

impl<const D: usize> Curve<D> {
    /// Creates a new active curve owned by `domain`.
    pub fn new(id: CurveId, domain: DomainId, stepper: Box<dyn Stepper<D>>) -> Self {
        Self {
            id,
            status: CurveStatus::Active,
            domain,
            previous_domain: None,
            records: Vec::new(),
            stepper,
            n_steps: 0,
            n_dropped: 0,
            n_handoffs: 0,
            steps_on_domain: 0,
            max_steps: None,
        }
    }

    /// Limits the total number of steps of this curve.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Unique identifier.
    pub fn id(&self) -> CurveId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> CurveStatus {
        self.status
    }

    /// Domain which currently owns the curve.
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Domain from which the curve was received last.
    pub fn previous_domain(&self) -> Option<DomainId> {
        self.previous_domain
    }

    /// Locally stored records.
    pub fn records(&self) -> &[StepRecord<D>] {
        &self.records
    }

    /// Integrator of this curve.
    pub fn stepper(&self) -> &dyn Stepper<D> {
        self.stepper.as_ref()
    }

    pub(crate) fn stepper_mut(&mut self) -> &mut dyn Stepper<D> {
        self.stepper.as_mut()
    }

    /// Current position.
    pub fn head(&self) -> SVector<f64, D> {
        self.stepper.position()
    }

    /// Current time.
    pub fn time(&self) -> f64 {
        self.stepper.time()
    }

    /// Total number of steps taken, including steps whose records were dropped.
    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    /// Number of records which were dropped from the history.
    pub fn n_dropped(&self) -> u64 {
        self.n_dropped
    }

    /// Number of times this curve moved to another domain.
    pub fn n_handoffs(&self) -> u64 {
        self.n_handoffs
    }

    /// Number of steps taken since the curve arrived on its current domain.
    pub fn steps_on_domain(&self) -> u64 {
        self.steps_on_domain
    }

    /// Per-curve step limit.
    pub fn max_steps(&self) -> Option<u64> {
        self.max_steps
    }

    pub(crate) fn set_status(&mut self, status: CurveStatus) {
        self.status = status;
    }

    /// Stops the integration of an active curve.
    pub fn cancel(&mut self) {
        if self.status == CurveStatus::Active {
            self.status = CurveStatus::Cancelled;
        }
    }

    fn push_record(&mut self, record: StepRecord<D>) {
        debug_assert!(self
            .records
            .last()
            .map_or(true, |last| last.is_continued_by(&record)));
        self.records.push(record);
        self.n_steps += 1;
        self.steps_on_domain += 1;
    }

    /// Takes a single step towards `t_max`.
    ///
    /// Field failures are reported to the caller without changing the status of the curve.
    pub fn step(&mut self, field: &dyn FieldSampler<D>, t_max: f64) -> StepEvent {
        if self.status != CurveStatus::Active {
            return StepEvent::Finished(self.status);
        }
        if self.max_steps.is_some_and(|max_steps| self.n_steps >= max_steps) {
            self.status = CurveStatus::MaxStepsReached;
            return StepEvent::Finished(self.status);
        }
        match self.stepper.step(field, t_max) {
            StepOutcome::Advanced(record) => {
                self.push_record(record);
                StepEvent::Advanced
            }
            StepOutcome::Terminated(record) => {
                self.push_record(record);
                self.status = CurveStatus::Terminated;
                StepEvent::Finished(self.status)
            }
            StepOutcome::StepsizeUnderflow => {
                self.status = CurveStatus::StepsizeUnderflow;
                StepEvent::Finished(self.status)
            }
            StepOutcome::FieldFailure(error) => StepEvent::FieldFailure(error),
            StepOutcome::NotReady(state) => {
                self.status = match state {
                    SolverState::Terminated => CurveStatus::Terminated,
                    SolverState::StepsizeUnderflow => CurveStatus::StepsizeUnderflow,
                    SolverState::FieldFailure => CurveStatus::FieldError,
                    SolverState::DomainExit | SolverState::Ready => {
                        CurveStatus::ExitedDomain { destination: None }
                    }
                };
                StepEvent::Finished(self.status)
            }
        }
    }

    /// Advances the curve on a single domain until it can not be advanced any further.
    ///
    /// Field failures are terminal since there is no other domain which could take over.
    /// This includes a non-finite `t_max` which the stepper refuses to integrate towards.
    #[cfg_attr(feature = "tracing", instrument(skip_all, fields(curve = self.id.0)))]
    pub fn advance(&mut self, field: &dyn FieldSampler<D>, t_max: f64) -> CurveStatus {
        loop {
            match self.step(field, t_max) {
                StepEvent::Advanced => (),
                StepEvent::Finished(status) => return status,
                StepEvent::FieldFailure(_error) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %_error, "field failure");
                    self.status = CurveStatus::FieldError;
                    return self.status;
                }
            }
        }
    }

    /// Checks that the stored records are contiguous and ordered in time.
    pub fn check_continuity(&self) -> Result<(), CalcError> {
        for (n, pair) in self.records.windows(2).enumerate() {
            if !pair[0].is_continued_by(&pair[1]) {
                return Err(CalcError(format!(
                    "{}: record {} ends at t={} but record {} starts at t={}",
                    self.id,
                    n,
                    pair[0].t1(),
                    n + 1,
                    pair[1].t0()
                )));
            }
        }
        if let Some(last) = self.records.last() {
            if last.t1() != self.time() || *last.y1() != self.head() {
                return Err(CalcError(format!(
                    "{}: last record does not end at the state of the stepper",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Removes all records which are not retained by the policy and returns them.
    pub fn truncate_history(&mut self, policy: HistoryPolicy) -> Vec<StepRecord<D>> {
        let n_removed = self.records.len() - policy.retained(self.records.len());
        self.n_dropped += n_removed as u64;
        self.records.drain(..n_removed).collect()
    }

    /// Position at time `t` within the stored records.
    pub fn interpolate(&self, t: f64) -> Option<SVector<f64, D>> {
        self.records.iter().find_map(|record| record.interpolate(t))
    }

    /// Length of the polygon through all stored positions.
    pub fn arc_length(&self) -> f64 {
        self.records.iter().map(|record| record.arc_length()).sum()
    }

    /// Bookkeeping when the curve leaves for another domain.
    pub(crate) fn depart(&mut self, destination: DomainId) {
        self.stepper.exit_domain();
        self.previous_domain = Some(self.domain);
        self.domain = destination;
        self.steps_on_domain = 0;
        self.n_handoffs += 1;
        self.status = CurveStatus::ExitedDomain {
            destination: Some(destination),
        };
    }

    /// Bookkeeping when the curve was received by its new owner.
    pub(crate) fn arrive(&mut self, local: DomainId) {
        self.stepper.resume();
        self.domain = local;
        self.status = CurveStatus::Active;
    }

    /// Writes the curve to the buffer keeping only the records retained by the policy.
    ///
    /// The stepper checkpoint is stored as a blob such that its length is known even when
    /// the receiving side does not know the stepper.
    pub fn write_wire(
        &self,
        buffer: &mut WireBuffer,
        history: HistoryPolicy,
    ) -> Result<(), WireError> {
        let n_keep = history.retained(self.records.len());
        let n_skip = self.records.len() - n_keep;
        buffer.write(&self.id);
        buffer.write(&self.stepper.tag());
        buffer.write_blob(&checkpoint_bytes(self.stepper.as_ref())?);
        buffer.write(&self.status);
        buffer.write(&self.domain);
        buffer.write(&self.previous_domain);
        buffer.write(&self.n_steps);
        buffer.write(&(self.n_dropped + n_skip as u64));
        buffer.write(&self.n_handoffs);
        buffer.write(&self.steps_on_domain);
        buffer.write(&self.max_steps);
        buffer.write(&n_keep);
        for record in &self.records[n_skip..] {
            buffer.write(record);
        }
        Ok(())
    }

    /// Reads a curve previously written with [Curve::write_wire].
    pub fn read_wire(
        buffer: &mut WireBuffer,
        registry: &StepperRegistry<D>,
    ) -> Result<Self, AdvectionError> {
        let id = buffer.read()?;
        let tag = buffer.read()?;
        let mut checkpoint = WireBuffer::from_bytes(buffer.read_blob()?);
        let stepper = registry.restore(tag, &mut checkpoint)?;
        if checkpoint.remaining() != 0 {
            return Err(WireError::InvalidValue(format!(
                "{} bytes left over after restoring checkpoint of {}",
                checkpoint.remaining(),
                tag
            ))
            .into());
        }
        Ok(Self {
            id,
            stepper,
            status: buffer.read()?,
            domain: buffer.read()?,
            previous_domain: buffer.read()?,
            n_steps: buffer.read()?,
            n_dropped: buffer.read()?,
            n_handoffs: buffer.read()?,
            steps_on_domain: buffer.read()?,
            max_steps: buffer.read()?,
            records: buffer.read()?,
        })
    }
}

impl<const D: usize> PartialEq for Curve<D> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.status == other.status
            && self.domain == other.domain
            && self.previous_domain == other.previous_domain
            && self.records == other.records
            && self.n_steps == other.n_steps
            && self.n_dropped == other.n_dropped
            && self.n_handoffs == other.n_handoffs
            && self.steps_on_domain == other.steps_on_domain
            && self.max_steps == other.max_steps
            && self.stepper.tag() == other.stepper.tag()
            && checkpoint_bytes(self.stepper.as_ref()).ok()
                == checkpoint_bytes(other.stepper.as_ref()).ok()
    }
}
