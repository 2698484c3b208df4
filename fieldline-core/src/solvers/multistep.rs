use fieldline_concepts::{FieldOrder, FieldSampler};
use nalgebra::SVector;

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::*;

/// Two-step Adams-Bashforth method.
///
/// See also the [Wikipedia](https://en.wikipedia.org/wiki/Linear_multistep_method) article.
/// We track the previous derivative and use it in order to update the next time step.
/// For constant step sizes the update is given by
/// \\begin{equation}
///     y(t_{i+1}) = y(t_i)
///         + h\left(\frac{3}{2}f(t_i, y_i) - \frac{1}{2}f(t_{i-1}, y_{i-1})\right).
/// \\end{equation}
/// When the step size changes (for example when the last step is shortened to hit `t_max`)
/// the weights are adjusted with the ratio $r = h_i / (2h_{i-1})$ to $1 + r$ and $-r$.
/// The first step is taken with the euler method since no previous derivative is known.
#[derive(Clone, Debug, PartialEq)]
pub struct AdamsBashforth2<const D: usize> {
    core: IntegratorCore<D>,
    previous_derivative: SVector<f64, D>,
    previous_h: f64,
}

impl<const D: usize> Default for AdamsBashforth2<D> {
    fn default() -> Self {
        Self {
            core: IntegratorCore::default(),
            previous_derivative: SVector::zeros(),
            previous_h: 0.0,
        }
    }
}

impl<const D: usize> AdamsBashforth2<D> {
    /// Starts at time `t0` in position `y0` with step size `h`.
    pub fn new(t0: f64, y0: SVector<f64, D>, h: f64) -> Self {
        Self {
            core: IntegratorCore::new(t0, y0, h),
            ..Default::default()
        }
    }
}

#[inline]
fn adams_bashforth_2<const D: usize>(
    y: &SVector<f64, D>,
    dy: [&SVector<f64, D>; 2],
    h: f64,
    h_previous: f64,
) -> SVector<f64, D> {
    let [dy0, dy1] = dy;
    let r = h / (2.0 * h_previous);
    y + (dy0 * (1.0 + r) - dy1 * r) * h
}

impl<const D: usize> StateCheckpoint for AdamsBashforth2<D> {
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
        self.core.offer_fields(visitor)?;
        visitor.accept(&mut self.previous_derivative)?;
        visitor.accept(&mut self.previous_h)
    }
}

impl<const D: usize> Stepper<D> for AdamsBashforth2<D> {
    fn tag(&self) -> StepperTag {
        StepperTag::ADAMS_BASHFORTH_2
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

    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    fn step(&mut self, field: &dyn FieldSampler<D>, t_max: f64) -> StepOutcome<D> {
        let planned = match self.core.plan_step(t_max) {
            Ok(planned) => planned,
            Err(outcome) => return outcome,
        };
        let dy = match sample(field, self.core.time(), self.core.position()) {
            Ok(dy) => dy,
            Err(e) => return self.core.fail(e),
        };
        // A reversal of the integration direction invalidates the history
        let bootstrap = self.core.is_first_step() || self.previous_h * planned.h <= 0.0;
        let y_new = if bootstrap {
            self.core.position() + dy * planned.h
        } else {
            adams_bashforth_2(
                self.core.position(),
                [&dy, &self.previous_derivative],
                planned.h,
                self.previous_h,
            )
        };
        let outcome = self.core.commit(planned, y_new, None, t_max);
        if matches!(
            outcome,
            StepOutcome::Advanced(_) | StepOutcome::Terminated(_)
        ) {
            self.previous_derivative = dy;
            self.previous_h = planned.h;
        }
        outcome
    }

    fn box_clone(&self) -> Box<dyn Stepper<D>> {
        Box::new(self.clone())
    }
}
