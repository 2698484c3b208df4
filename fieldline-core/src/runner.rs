//! Advection of many curves over a decomposed domain with one worker thread per domain.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fieldline_concepts::{DecomposeError, DomainId, DomainOwnership, FieldSampler, SetupError};
use itertools::Itertools;
use kdam::BarExt;

use crate::config::AdvectionSettings;
use crate::curve::{Curve, CurveId, CurveStatus};
use crate::domain_crossing::DomainCrossingCoordinator;
use crate::driver::{AdvectionDriver, CancellationToken};
use crate::errors::AdvectionError;
use crate::solvers::StepperRegistry;
use crate::step_record::StepRecord;
use crate::transport::{
    validate_map, BarrierSync, ChannelComm, Communicator, FromMap, SyncSubDomains,
};

/// Collected outcome of [run_decomposed].
#[derive(Debug)]
pub struct AdvectionResult<const D: usize> {
    /// All curves in their final state, sorted by their identifier.
    pub curves: Vec<Curve<D>>,
    /// Curves which got lost since their messages could not be decoded.
    pub failures: Vec<AdvectionError>,
    /// Records which stayed on the domains they were computed on.
    pub fragments: Vec<(CurveId, Vec<StepRecord<D>>)>,
}

impl<const D: usize> AdvectionResult<D> {
    /// Obtains the final state of a curve.
    pub fn get(&self, id: CurveId) -> Option<&Curve<D>> {
        self.curves
            .binary_search_by_key(&id, |curve| curve.id())
            .ok()
            .map(|index| &self.curves[index])
    }

    /// Number of curves per final status.
    pub fn status_counts(&self) -> HashMap<CurveStatus, usize> {
        let mut counts = HashMap::new();
        for curve in self.curves.iter() {
            *counts.entry(curve.status()).or_insert(0) += 1;
        }
        counts
    }

    /// Joins the fragments and the records of the final curve in integration order.
    pub fn assemble(&self, id: CurveId) -> Vec<StepRecord<D>> {
        let mut segments: Vec<&[StepRecord<D>]> = self
            .fragments
            .iter()
            .filter(|(fragment_id, _)| *fragment_id == id)
            .map(|(_, records)| records.as_slice())
            .chain(self.get(id).map(|curve| curve.records()))
            .filter(|records| !records.is_empty())
            .collect();
        let direction = segments
            .first()
            .map_or(1.0, |records| records[0].direction());
        segments.sort_by(|a, b| (direction * a[0].t0()).total_cmp(&(direction * b[0].t0())));
        segments.into_iter().flatten().cloned().collect()
    }
}

/// Advances the seeds over all domains of the ownership structure.
///
/// See [run_decomposed_with] for details.
pub fn run_decomposed<O, F, const D: usize>(
    ownership: O,
    fields: HashMap<DomainId, F>,
    seeds: Vec<Curve<D>>,
    t_max: f64,
    settings: &AdvectionSettings,
) -> Result<AdvectionResult<D>, AdvectionError>
where
    O: DomainOwnership<D> + Sync,
    F: FieldSampler<D> + Sync,
{
    run_decomposed_with(
        ownership,
        fields,
        seeds,
        t_max,
        settings,
        &StepperRegistry::default(),
        &CancellationToken::new(),
    )
}

/// Advances the seeds over all domains of the ownership structure.
///
/// Every domain is advanced by its own thread with the field given for it.
/// Seeds are moved to the owner of their initial position first. Seeds outside of every
/// domain are returned as [CurveStatus::ExitedDomain] without destination.
/// Workers repeatedly advance their curves until idle and synchronize afterwards.
/// The run ends once every curve reached a terminal status or got lost in transmission.
/// A non-finite `t_max` is rejected with a [SetupError].
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn run_decomposed_with<O, F, const D: usize>(
    ownership: O,
    fields: HashMap<DomainId, F>,
    seeds: Vec<Curve<D>>,
    t_max: f64,
    settings: &AdvectionSettings,
    registry: &StepperRegistry<D>,
    cancel: &CancellationToken,
) -> Result<AdvectionResult<D>, AdvectionError>
where
    O: DomainOwnership<D> + Sync,
    F: FieldSampler<D> + Sync,
{
    settings.validate()?;
    if !t_max.is_finite() {
        return Err(SetupError(format!("integration target t_max={} is not finite", t_max)).into());
    }
    let map = ownership.communication_map();
    if !validate_map(&map) {
        return Err(DecomposeError("communication map of domains is not symmetric".into()).into());
    }
    let mut comms = ChannelComm::<DomainId, Vec<u8>>::from_map(&map)?;
    let mut syncs = BarrierSync::from_map(&map)?;

    // Distribute seeds
    let mut seeds_per_domain: HashMap<DomainId, Vec<Curve<D>>> = HashMap::new();
    let mut unrouted = Vec::new();
    for mut curve in seeds {
        if curve.status().is_terminal() {
            unrouted.push(curve);
            continue;
        }
        match ownership.owner_of(&curve.head()).filter(|owner| map.contains_key(owner)) {
            Some(owner) => {
                curve.arrive(owner);
                seeds_per_domain.entry(owner).or_default().push(curve);
            }
            None => {
                curve.stepper_mut().exit_domain();
                curve.set_status(CurveStatus::ExitedDomain { destination: None });
                unrouted.push(curve);
            }
        }
    }
    let n_total: usize = seeds_per_domain.values().map(|curves| curves.len()).sum();
    let n_unfinished = AtomicUsize::new(n_total);

    let domains: Vec<_> = map.keys().copied().sorted().collect();
    let mut workers = Vec::with_capacity(domains.len());
    for domain in domains.iter() {
        let field = fields.get(domain).ok_or(SetupError(format!(
            "no field was given for {}",
            domain
        )))?;
        let comm = comms.remove(domain).ok_or(SetupError(format!(
            "no communicator was created for {}",
            domain
        )))?;
        let sync = syncs.remove(domain).ok_or(SetupError(format!(
            "no barrier was created for {}",
            domain
        )))?;
        let coordinator = DomainCrossingCoordinator::new(*domain, &ownership, comm)
            .with_registry(registry.clone())
            .with_history(settings.history)
            .with_max_boundary_refinements(settings.max_boundary_refinements);
        let mut driver = AdvectionDriver::new(coordinator, settings.n_threads.get())?
            .with_steps_per_slice(settings.steps_per_slice)
            .with_cancellation(cancel.clone());
        for curve in seeds_per_domain.remove(domain).unwrap_or_default() {
            driver.insert(curve);
        }
        workers.push((driver, field, sync));
    }

    let aborted = AtomicBool::new(false);
    let progress = Progress {
        n_total,
        n_unfinished: &n_unfinished,
        aborted: &aborted,
        show_progressbar: settings.show_progressbar,
    };
    let mut collected = Vec::with_capacity(workers.len());
    std::thread::scope(|s| -> Result<(), AdvectionError> {
        // Workers only touch the barrier once every thread was spawned
        let (start, gate) = crossbeam_channel::unbounded::<()>();
        let mut handles = Vec::with_capacity(workers.len());
        for (n, (driver, field, sync)) in workers.into_iter().enumerate() {
            let gate = gate.clone();
            let handle = std::thread::Builder::new()
                .name(format!("domain_thread_{:03.0}", n))
                .spawn_scoped(s, move || {
                    if gate.recv().is_err() {
                        return WorkerExit::Aborted;
                    }
                    run_worker(n, driver, field, sync, t_max, progress)
                })?;
            handles.push(handle);
        }
        for _ in 0..handles.len() {
            start.send(())?;
        }
        let mut io_error = None;
        for handle in handles {
            match handle.join() {
                Ok(WorkerExit::Finished(result)) => collected.push(result),
                Ok(WorkerExit::ProgressBarFailed(error)) => io_error = Some(error),
                Ok(WorkerExit::Aborted) => (),
                Ok(WorkerExit::Panicked(payload)) | Err(payload) => {
                    std::panic::resume_unwind(payload)
                }
            }
        }
        match io_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    })?;

    let mut curves = unrouted;
    let mut failures = Vec::new();
    let mut fragments = Vec::new();
    for (finished, failed, retained) in collected {
        curves.extend(finished);
        failures.extend(failed);
        fragments.extend(retained);
    }
    curves.sort_by_key(|curve| curve.id());
    #[cfg(feature = "tracing")]
    tracing::debug!(n_curves = curves.len(), n_failures = failures.len(), "advection done");
    Ok(AdvectionResult {
        curves,
        failures,
        fragments,
    })
}

/// Counters shared by all workers of a run.
#[derive(Clone, Copy)]
struct Progress<'a> {
    n_total: usize,
    n_unfinished: &'a AtomicUsize,
    aborted: &'a AtomicBool,
    show_progressbar: bool,
}

/// Everything a worker returns to the thread which spawned it.
enum WorkerExit<const D: usize> {
    Finished(Drained<D>),
    ProgressBarFailed(std::io::Error),
    Aborted,
    Panicked(Box<dyn std::any::Any + Send>),
}

/// Finished curves, failures and fragments of a single domain.
type Drained<const D: usize> = (
    Vec<Curve<D>>,
    Vec<AdvectionError>,
    Vec<(CurveId, Vec<StepRecord<D>>)>,
);

/// Advances the curves of one domain until no curve is left on any domain.
///
/// A panic while advancing is caught and makes every worker stop after the next
/// synchronization so that no thread waits for a peer which will never arrive.
fn run_worker<O, C, F, const D: usize>(
    n: usize,
    mut driver: AdvectionDriver<O, C, D>,
    field: &F,
    mut sync: BarrierSync,
    t_max: f64,
    progress: Progress<'_>,
) -> WorkerExit<D>
where
    O: DomainOwnership<D> + Sync,
    C: Communicator<DomainId, Vec<u8>> + Sync,
    F: FieldSampler<D> + Sync,
{
    let mut bar = (progress.show_progressbar && n == 0)
        .then(|| kdam::BarBuilder::default().total(progress.n_total).build().ok())
        .flatten();
    let mut bar_error = None;
    let mut panicked = None;
    let mut n_done = 0;
    loop {
        let advanced = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            driver.run_until_idle(field, t_max);
        }));
        match advanced {
            Ok(()) => {
                let n_done_now = driver.finished().len() + driver.failures().len();
                progress
                    .n_unfinished
                    .fetch_sub(n_done_now - n_done, Ordering::SeqCst);
                n_done = n_done_now;
            }
            Err(payload) => {
                progress.aborted.store(true, Ordering::SeqCst);
                panicked = Some(payload);
            }
        }
        sync.sync();
        let remaining = progress.n_unfinished.load(Ordering::SeqCst);
        let aborted = progress.aborted.load(Ordering::SeqCst);
        if let Some(b) = bar.as_mut() {
            if let Err(error) = b.update_to(progress.n_total - remaining) {
                bar = None;
                bar_error = Some(error);
            }
        }
        sync.sync();
        if remaining == 0 || aborted {
            break;
        }
    }
    match (panicked, bar_error) {
        (Some(payload), _) => WorkerExit::Panicked(payload),
        (None, Some(error)) => WorkerExit::ProgressBarFailed(error),
        (None, None) => WorkerExit::Finished(driver.drain()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::HistoryPolicy;
    use crate::solvers::test_fields::*;
    use crate::solvers::*;
    use fieldline_concepts::FieldError;
    use nalgebra::SVector;
    use std::num::NonZeroUsize;

    /// Strips of width one along the first axis.
    struct Strips(u64);

    impl DomainOwnership<2> for Strips {
        fn contains(&self, domain: &DomainId, pos: &SVector<f64, 2>) -> bool {
            self.owner_of(pos) == Some(*domain)
        }

        fn owner_of(&self, pos: &SVector<f64, 2>) -> Option<DomainId> {
            let n = pos[0].floor();
            (n >= 0.0 && n < self.0 as f64).then_some(DomainId(n as u64))
        }

        fn neighbors(&self, domain: &DomainId) -> Vec<DomainId> {
            self.domains()
                .into_iter()
                .filter(|other| other.0.abs_diff(domain.0) == 1)
                .collect()
        }

        fn domains(&self) -> Vec<DomainId> {
            (0..self.0).map(DomainId).collect()
        }
    }

    fn fields(n: u64, velocity: [f64; 2]) -> HashMap<DomainId, Uniform<2>> {
        (0..n)
            .map(|i| (DomainId(i), Uniform(SVector::from(velocity))))
            .collect()
    }

    fn seeds(positions: &[[f64; 2]]) -> Vec<Curve<2>> {
        positions
            .iter()
            .enumerate()
            .map(|(i, pos)| {
                Curve::new(
                    CurveId(i as u64),
                    DomainId(0),
                    Box::new(RungeKutta4::new(0.0, SVector::from(*pos), 0.1)),
                )
            })
            .collect()
    }

    #[test]
    fn curves_cross_all_domains() -> Result<(), AdvectionError> {
        let settings = AdvectionSettings {
            steps_per_slice: Some(3),
            n_threads: NonZeroUsize::new(2).unwrap(),
            ..Default::default()
        };
        let seeds = seeds(&[[0.05, 0.0], [0.55, 0.5], [1.25, 0.3], [2.35, 0.1]]);
        let result = run_decomposed(Strips(4), fields(4, [1.0, 0.0]), seeds, 1.0, &settings)?;
        assert!(result.failures.is_empty());
        assert_eq!(result.curves.len(), 4);
        for (curve, x0) in result.curves.iter().zip([0.05, 0.55, 1.25, 2.35]) {
            assert_eq!(curve.status(), CurveStatus::Terminated);
            assert_eq!(curve.records().len(), 10);
            approx::assert_abs_diff_eq!(curve.head()[0], x0 + 1.0, epsilon = 1e-12);
            curve.check_continuity().unwrap();
        }
        // The last step of the first curve ends behind the seam at x = 1
        assert_eq!(result.get(CurveId(0)).unwrap().n_handoffs(), 0);
        assert_eq!(result.get(CurveId(1)).unwrap().n_handoffs(), 1);
        assert_eq!(result.get(CurveId(2)).unwrap().n_handoffs(), 1);
        assert_eq!(result.status_counts()[&CurveStatus::Terminated], 4);
        Ok(())
    }

    #[test]
    fn curves_leaving_the_global_domain() -> Result<(), AdvectionError> {
        let seeds = seeds(&[[0.5, 0.0], [1.5, 0.0], [-1.0, 0.0]]);
        let result = run_decomposed(
            Strips(2),
            fields(2, [2.0, 0.0]),
            seeds,
            2.0,
            &AdvectionSettings::default(),
        )?;
        assert_eq!(result.curves.len(), 3);
        for curve in result.curves.iter() {
            assert_eq!(
                curve.status(),
                CurveStatus::ExitedDomain { destination: None }
            );
        }
        // Seed outside of all domains was never advanced
        assert!(result.get(CurveId(2)).unwrap().records().is_empty());
        Ok(())
    }

    #[test]
    fn fragments_are_assembled() -> Result<(), AdvectionError> {
        let settings = AdvectionSettings {
            history: HistoryPolicy::Tail(1),
            ..Default::default()
        };
        let seeds = seeds(&[[0.05, 0.0]]);
        let result = run_decomposed(Strips(3), fields(3, [1.0, 0.0]), seeds, 2.5, &settings)?;
        let curve = result.get(CurveId(0)).unwrap();
        assert_eq!(curve.status(), CurveStatus::Terminated);
        assert_eq!(curve.n_handoffs(), 2);
        assert!(curve.records().len() < 25);
        let records = result.assemble(CurveId(0));
        assert_eq!(records.len(), 25);
        assert!(records
            .windows(2)
            .all(|pair| pair[0].is_continued_by(&pair[1])));
        Ok(())
    }

    #[test]
    fn missing_field() {
        let mut fields = fields(2, [1.0, 0.0]);
        fields.remove(&DomainId(1));
        let result = run_decomposed(
            Strips(2),
            fields,
            seeds(&[[0.5, 0.5]]),
            1.0,
            &AdvectionSettings::default(),
        );
        assert!(matches!(result, Err(AdvectionError::SetupError(_))));
    }

    /// Uniform field whose evaluation panics beyond `x = limit`.
    struct PanicsBeyond(f64);

    impl FieldSampler<2> for PanicsBeyond {
        fn evaluate(&self, _: f64, pos: &SVector<f64, 2>) -> Result<SVector<f64, 2>, FieldError> {
            if pos[0] > self.0 {
                panic!("no data beyond x = {}", self.0);
            }
            Ok(SVector::from([1.0, 0.0]))
        }
    }

    #[test]
    #[should_panic(expected = "no data beyond x = 1.5")]
    fn panicking_field_stops_all_workers() {
        let fields = (0..2).map(|i| (DomainId(i), PanicsBeyond(1.5))).collect();
        let settings = AdvectionSettings {
            steps_per_slice: Some(2),
            ..Default::default()
        };
        let seeds = seeds(&[[0.2, 0.5], [0.5, 0.5], [1.2, 0.5]]);
        let _ = run_decomposed(Strips(2), fields, seeds, 1.5, &settings);
    }

    #[test]
    fn non_finite_t_max() {
        for t_max in [f64::NAN, f64::INFINITY] {
            let result = run_decomposed(
                Strips(2),
                fields(2, [1.0, 0.0]),
                seeds(&[[0.5, 0.5]]),
                t_max,
                &AdvectionSettings::default(),
            );
            assert!(matches!(result, Err(AdvectionError::SetupError(_))));
        }
    }

    #[test]
    fn cancelled_run_finishes() -> Result<(), AdvectionError> {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_decomposed_with(
            Strips(2),
            fields(2, [0.1, 0.0]),
            seeds(&[[0.5, 0.5], [1.5, 0.5]]),
            1.0,
            &AdvectionSettings::default(),
            &StepperRegistry::default(),
            &cancel,
        )?;
        assert!(result
            .curves
            .iter()
            .all(|curve| curve.status() == CurveStatus::Cancelled));
        Ok(())
    }
}
