use fieldline_concepts::{FieldOrder, FieldSampler};
use nalgebra::SVector;

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::*;

#[inline]
fn euler<const D: usize>(y: &SVector<f64, D>, dy: &SVector<f64, D>, h: f64) -> SVector<f64, D> {
    y + dy * h
}

/// Classical euler method.
///
/// The euler method is the most simple method and not stable for many problems.
/// Its usage is discouraged for anything but testing.
///
/// The update step follows
/// \\begin{equation}
///     y(t_{i+1}) = y(t_i) + h f(t_i, y(t_i))
/// \\end{equation}
/// where $h$ is the step size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Euler<const D: usize> {
    core: IntegratorCore<D>,
}

impl<const D: usize> Euler<D> {
    /// Starts at time `t0` in position `y0` with step size `h`.
    pub fn new(t0: f64, y0: SVector<f64, D>, h: f64) -> Self {
        Self {
            core: IntegratorCore::new(t0, y0, h),
        }
    }
}

impl<const D: usize> StateCheckpoint for Euler<D> {
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
        self.core.offer_fields(visitor)
    }
}

impl<const D: usize> Stepper<D> for Euler<D> {
    fn tag(&self) -> StepperTag {
        StepperTag::EULER
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
        let y_new = euler(self.core.position(), &dy, planned.h);
        self.core.commit(planned, y_new, None, t_max)
    }

    fn box_clone(&self) -> Box<dyn Stepper<D>> {
        Box::new(self.clone())
    }
}

/// Classical Runge-Kutta method of fourth order with fixed step size.
///
/// \\begin{align}
///     k_1 &= f(t_i, y_i)\\\\
///     k_2 &= f(t_i + h/2, y_i + h k_1/2)\\\\
///     k_3 &= f(t_i + h/2, y_i + h k_2/2)\\\\
///     k_4 &= f(t_i + h, y_i + h k_3)\\\\
///     y_{i+1} &= y_i + \frac{h}{6}\left(k_1 + 2k_2 + 2k_3 + k_4\right)
/// \\end{align}
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RungeKutta4<const D: usize> {
    core: IntegratorCore<D>,
}

impl<const D: usize> RungeKutta4<D> {
    /// Starts at time `t0` in position `y0` with step size `h`.
    pub fn new(t0: f64, y0: SVector<f64, D>, h: f64) -> Self {
        Self {
            core: IntegratorCore::new(t0, y0, h),
        }
    }

    fn increment(
        &self,
        field: &dyn FieldSampler<D>,
        h: f64,
    ) -> Result<SVector<f64, D>, fieldline_concepts::FieldError> {
        let t = self.core.time();
        let y = self.core.position();
        let k1 = sample(field, t, y)?;
        let k2 = sample(field, t + h / 2.0, &euler(y, &k1, h / 2.0))?;
        let k3 = sample(field, t + h / 2.0, &euler(y, &k2, h / 2.0))?;
        let k4 = sample(field, t + h, &euler(y, &k3, h))?;
        Ok((k1 + (k2 + k3) * 2.0 + k4) / 6.0)
    }
}

impl<const D: usize> StateCheckpoint for RungeKutta4<D> {
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
        self.core.offer_fields(visitor)
    }
}

impl<const D: usize> Stepper<D> for RungeKutta4<D> {
    fn tag(&self) -> StepperTag {
        StepperTag::RUNGE_KUTTA_4
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
        let dy = match self.increment(field, planned.h) {
            Ok(dy) => dy,
            Err(e) => return self.core.fail(e),
        };
        let y_new = euler(self.core.position(), &dy, planned.h);
        self.core.commit(planned, y_new, None, t_max)
    }

    fn box_clone(&self) -> Box<dyn Stepper<D>> {
        Box::new(self.clone())
    }
}
