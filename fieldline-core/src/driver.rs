//! Advances all curves of a single domain.
//!
//! The [AdvectionDriver] works through its queue in slices of a fixed number of steps and
//! exchanges curves with its neighbours between slices.
//! [advance_curve], [serialize_curve] and [deserialize_curve] cover the simple case of a
//! single curve without any communication.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fieldline_concepts::{DomainId, DomainOwnership, FieldSampler};
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::curve::{Curve, CurveId, CurveStatus, HistoryPolicy};
use crate::domain_crossing::{
    decode_handoff, encode_handoff, DomainCrossingCoordinator, HandoffOutcome,
};
use crate::errors::AdvectionError;
use crate::solvers::StepperRegistry;
use crate::step_record::StepRecord;
use crate::transport::Communicator;
use crate::wire::WireError;

/// Signals running advections to stop.
///
/// Clones share the same flag. Curves which are still active when the token is cancelled
/// are marked as [CurveStatus::Cancelled] before their next step.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// New token which is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests all holders of this token to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// `true` once [CancellationToken::cancel] was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counts what happened during one call to [AdvectionDriver::run_slice].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Curves received from other domains.
    pub n_received: usize,
    /// Curves sent to other domains.
    pub n_sent: usize,
    /// Curves which reached a terminal status.
    pub n_finished: usize,
    /// Messages which could not be decoded.
    pub n_failed: usize,
    /// Curves which are still active on this domain.
    pub n_active: usize,
}

/// Advances all curves of a single domain.
///
/// The driver owns a queue of active curves.
/// Each [slice](AdvectionDriver::run_slice) first collects curves sent by other domains,
/// advances every queued curve by at most `steps_per_slice` steps in parallel and finally
/// sorts the curves into finished ones, ones which are handed to other domains and ones which
/// remain queued.
pub struct AdvectionDriver<O, C, const D: usize> {
    coordinator: DomainCrossingCoordinator<O, C, D>,
    queue: VecDeque<Curve<D>>,
    finished: Vec<Curve<D>>,
    failures: Vec<AdvectionError>,
    fragments: Vec<(CurveId, Vec<StepRecord<D>>)>,
    cancel: CancellationToken,
    steps_per_slice: Option<u64>,
    pool: rayon::ThreadPool,
}

impl<O, C, const D: usize> AdvectionDriver<O, C, D>
where
    O: DomainOwnership<D> + Sync,
    C: Communicator<DomainId, Vec<u8>> + Sync,
{
    /// Creates a driver with a thread pool of `n_threads` threads.
    pub fn new(
        coordinator: DomainCrossingCoordinator<O, C, D>,
        n_threads: usize,
    ) -> Result<Self, AdvectionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()?;
        Ok(Self {
            coordinator,
            queue: VecDeque::new(),
            finished: Vec::new(),
            failures: Vec::new(),
            fragments: Vec::new(),
            cancel: CancellationToken::new(),
            steps_per_slice: None,
            pool,
        })
    }

    /// Limits the number of steps a curve takes before other domains are served.
    pub fn with_steps_per_slice(mut self, steps_per_slice: Option<u64>) -> Self {
        self.steps_per_slice = steps_per_slice;
        self
    }

    /// Shares the given cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token which stops this driver.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The coordinator of this driver.
    pub fn coordinator(&self) -> &DomainCrossingCoordinator<O, C, D> {
        &self.coordinator
    }

    /// Queues a curve for advection on this domain.
    pub fn insert(&mut self, curve: Curve<D>) {
        if curve.status().is_terminal() {
            self.finished.push(curve);
        } else {
            self.queue.push_back(curve);
        }
    }

    /// Number of queued curves.
    pub fn n_active(&self) -> usize {
        self.queue.len()
    }

    /// Curves which reached a terminal status on this domain.
    pub fn finished(&self) -> &[Curve<D>] {
        &self.finished
    }

    /// Errors of messages which could not be decoded.
    pub fn failures(&self) -> &[AdvectionError] {
        &self.failures
    }

    /// Records which stayed on this domain when their curve was handed off.
    pub fn fragments(&self) -> &[(CurveId, Vec<StepRecord<D>>)] {
        &self.fragments
    }

    /// Takes finished curves, failures and fragments out of the driver.
    pub fn drain(
        &mut self,
    ) -> (
        Vec<Curve<D>>,
        Vec<AdvectionError>,
        Vec<(CurveId, Vec<StepRecord<D>>)>,
    ) {
        (
            std::mem::take(&mut self.finished),
            std::mem::take(&mut self.failures),
            std::mem::take(&mut self.fragments),
        )
    }

    /// Collects all curves which were sent to this domain.
    pub fn receive(&mut self) -> SliceReport {
        let mut report = SliceReport::default();
        for received in self.coordinator.receive() {
            match received {
                Ok(curve) => {
                    report.n_received += 1;
                    self.queue.push_back(curve);
                }
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%error, "could not decode received curve");
                    report.n_failed += 1;
                    self.failures.push(error);
                }
            }
        }
        report
    }

    /// Receives, advances and distributes curves once.
    #[cfg_attr(
        feature = "tracing",
        instrument(skip_all, fields(domain = self.coordinator.local().0))
    )]
    pub fn run_slice<F>(&mut self, field: &F, t_max: f64) -> SliceReport
    where
        F: FieldSampler<D> + Sync,
    {
        let mut report = self.receive();

        let mut curves: Vec<_> = self.queue.drain(..).collect();
        let coordinator = &self.coordinator;
        let cancel = &self.cancel;
        let budget = self.steps_per_slice;
        self.pool.install(|| {
            curves.par_iter_mut().for_each(|curve| {
                coordinator.advance(curve, field, t_max, budget, Some(cancel));
            })
        });

        for curve in curves {
            match curve.status() {
                CurveStatus::Active => self.queue.push_back(curve),
                CurveStatus::ExitedDomain {
                    destination: Some(_),
                } => match self.coordinator.hand_off(curve) {
                    HandoffOutcome::Sent {
                        id,
                        retained,
                        ..
                    } => {
                        report.n_sent += 1;
                        if !retained.is_empty() {
                            self.fragments.push((id, retained));
                        }
                    }
                    HandoffOutcome::Returned(curve) => {
                        report.n_finished += 1;
                        self.finished.push(curve);
                    }
                },
                _ => {
                    report.n_finished += 1;
                    self.finished.push(curve);
                }
            }
        }
        report.n_active = self.queue.len();
        #[cfg(feature = "tracing")]
        tracing::debug!(?report, "slice done");
        report
    }

    /// Runs slices until no curve is queued on this domain.
    ///
    /// Curves sent by other domains while this method runs are picked up as well.
    pub fn run_until_idle<F>(&mut self, field: &F, t_max: f64) -> SliceReport
    where
        F: FieldSampler<D> + Sync,
    {
        let mut total = SliceReport::default();
        loop {
            let report = self.run_slice(field, t_max);
            total.n_received += report.n_received;
            total.n_sent += report.n_sent;
            total.n_finished += report.n_finished;
            total.n_failed += report.n_failed;
            total.n_active = report.n_active;
            if report.n_active == 0 {
                return total;
            }
        }
    }
}

/// Advances a single curve on a single domain until it can not be advanced any further.
///
/// Curves are not advanced towards a non-finite `t_max` and end as [CurveStatus::FieldError].
pub fn advance_curve<const D: usize>(
    curve: &mut Curve<D>,
    field: &dyn FieldSampler<D>,
    t_max: f64,
) -> CurveStatus {
    curve.advance(field, t_max)
}

/// Serializes a curve including its complete history.
pub fn serialize_curve<const D: usize>(curve: &Curve<D>) -> Result<Vec<u8>, WireError> {
    Ok(encode_handoff(curve, None, HistoryPolicy::Full)?.into_bytes())
}

/// Inverse of [serialize_curve].
pub fn deserialize_curve<const D: usize>(
    bytes: Vec<u8>,
    registry: &StepperRegistry<D>,
) -> Result<Curve<D>, AdvectionError> {
    let (_, curve) = decode_handoff(bytes, registry)?;
    Ok(curve)
}
