use fieldline_concepts::{FieldError, FieldOrder, FieldSampler};
use nalgebra::SVector;

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::*;

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const A71: f64 = 35.0 / 384.0;
const A73: f64 = 500.0 / 1113.0;
const A74: f64 = 125.0 / 192.0;
const A75: f64 = -2187.0 / 6784.0;
const A76: f64 = 11.0 / 84.0;

// Difference between the fifth and fourth order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Adaptive Runge-Kutta method of order 5(4) by Dormand and Prince.
///
/// The local error is estimated by the embedded fourth-order solution and scaled component
/// wise by `abs_tol + rel_tol * max(|y_i|, |y_new_i|)`.
/// Steps with a scaled RMS error above one are rejected and retried with a smaller step size.
/// After each accepted step the step size is multiplied by
/// $0.9\\,\text{err}^{-1/5}$ clamped to the interval $[0.2, 5]$.
///
/// The derivative at the end of an accepted step is reused as the first stage of the next
/// step (first same as last).
/// It is discarded when the curve leaves the local domain since it was sampled from local
/// field data.
///
/// If the step size falls below `h_min` or can no longer change the time value, the stepper
/// reports [StepOutcome::StepsizeUnderflow].
#[derive(Clone, Debug, PartialEq)]
pub struct DormandPrince<const D: usize> {
    core: IntegratorCore<D>,
    abs_tol: f64,
    rel_tol: f64,
    fsal: Option<SVector<f64, D>>,
    n_rejected: u64,
}

impl<const D: usize> Default for DormandPrince<D> {
    fn default() -> Self {
        Self {
            core: IntegratorCore::default(),
            abs_tol: 1e-8,
            rel_tol: 1e-6,
            fsal: None,
            n_rejected: 0,
        }
    }
}

impl<const D: usize> DormandPrince<D> {
    /// Starts at time `t0` in position `y0` with initial step size `h`.
    pub fn new(t0: f64, y0: SVector<f64, D>, h: f64) -> Self {
        Self {
            core: IntegratorCore::new(t0, y0, h),
            ..Default::default()
        }
    }

    /// Sets absolute and relative tolerance of the local error.
    pub fn with_tolerances(mut self, abs_tol: f64, rel_tol: f64) -> Self {
        self.abs_tol = abs_tol.abs();
        self.rel_tol = rel_tol.abs();
        self
    }

    /// Restricts the magnitude of the step size.
    pub fn with_step_bounds(mut self, h_min: f64, h_max: f64) -> Self {
        self.core = self.core.with_step_bounds(h_min, h_max);
        self
    }

    /// Absolute tolerance.
    pub fn abs_tol(&self) -> f64 {
        self.abs_tol
    }

    /// Relative tolerance.
    pub fn rel_tol(&self) -> f64 {
        self.rel_tol
    }

    /// Total number of rejected step attempts.
    pub fn n_rejected(&self) -> u64 {
        self.n_rejected
    }

    /// Computes the fifth-order solution, the derivative at its end and the scaled error.
    fn attempt(
        &self,
        field: &dyn FieldSampler<D>,
        k1: &SVector<f64, D>,
        h: f64,
    ) -> Result<(SVector<f64, D>, SVector<f64, D>, f64), FieldError> {
        let t = self.core.time();
        let y = self.core.position();
        let k2 = sample(field, t + C2 * h, &(y + k1 * (A21 * h)))?;
        let k3 = sample(field, t + C3 * h, &(y + (k1 * A31 + k2 * A32) * h))?;
        let k4 = sample(
            field,
            t + C4 * h,
            &(y + (k1 * A41 + k2 * A42 + k3 * A43) * h),
        )?;
        let k5 = sample(
            field,
            t + C5 * h,
            &(y + (k1 * A51 + k2 * A52 + k3 * A53 + k4 * A54) * h),
        )?;
        let k6 = sample(
            field,
            t + h,
            &(y + (k1 * A61 + k2 * A62 + k3 * A63 + k4 * A64 + k5 * A65) * h),
        )?;
        let y_new = y + (k1 * A71 + k3 * A73 + k4 * A74 + k5 * A75 + k6 * A76) * h;
        let k7 = sample(field, t + h, &y_new)?;
        let error = (k1 * E1 + k3 * E3 + k4 * E4 + k5 * E5 + k6 * E6 + k7 * E7) * h;
        let sum_squares: f64 = error
            .iter()
            .zip(y.iter().zip(y_new.iter()))
            .map(|(e, (a, b))| {
                let scale = self.abs_tol + self.rel_tol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        let norm = (sum_squares / D.max(1) as f64).sqrt();
        Ok((y_new, k7, norm))
    }

    fn step_factor(error: f64) -> f64 {
        if error == 0.0 {
            MAX_FACTOR
        } else if error.is_finite() {
            (SAFETY * error.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
        } else {
            MIN_FACTOR
        }
    }
}

impl<const D: usize> StateCheckpoint for DormandPrince<D> {
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
        self.core.offer_fields(visitor)?;
        visitor.accept(&mut self.abs_tol)?;
        visitor.accept(&mut self.rel_tol)?;
        visitor.accept(&mut self.fsal)?;
        visitor.accept(&mut self.n_rejected)
    }
}

impl<const D: usize> Stepper<D> for DormandPrince<D> {
    fn tag(&self) -> StepperTag {
        StepperTag::DORMAND_PRINCE
    }

    fn order(&self) -> FieldOrder {
        FieldOrder::First
    }

    fn core(&self) -> &IntegratorCore<D> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IntegratorCore<D> {
        &mut self.core
    }

    fn is_adaptive(&self) -> bool {
        true
    }

    fn on_exit_domain(&mut self) {
        self.fsal = None;
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    fn step(&mut self, field: &dyn FieldSampler<D>, t_max: f64) -> StepOutcome<D> {
        let mut planned = match self.core.plan_step(t_max) {
            Ok(planned) => planned,
            Err(outcome) => return outcome,
        };
        if planned.h.abs() < self.core.h_min() {
            return self.core.underflow();
        }
        let k1 = match self.fsal {
            Some(k1) => k1,
            None => match sample(field, self.core.time(), self.core.position()) {
                Ok(k1) => k1,
                Err(e) => return self.core.fail(e),
            },
        };
        loop {
            let (y_new, k7, error) = match self.attempt(field, &k1, planned.h) {
                Ok(result) => result,
                Err(e) => return self.core.fail(e),
            };
            let factor = Self::step_factor(error);
            if error <= 1.0 {
                if !planned.last {
                    self.core.set_step_size(planned.h.abs() * factor);
                }
                let outcome = self.core.commit(planned, y_new, None, t_max);
                if let StepOutcome::Advanced(_) | StepOutcome::Terminated(_) = outcome {
                    self.fsal = Some(k7);
                }
                return outcome;
            }
            self.n_rejected += 1;
            let h = planned.h * factor;
            if h.abs() < self.core.h_min() || self.core.is_underflow(h) {
                #[cfg(feature = "tracing")]
                tracing::debug!(t = self.core.time(), h, "step size underflow");
                return self.core.underflow();
            }
            self.core.set_step_size(h);
            planned = PlannedStep { h, last: false };
        }
    }

    fn box_clone(&self) -> Box<dyn Stepper<D>> {
        Box::new(self.clone())
    }
}
