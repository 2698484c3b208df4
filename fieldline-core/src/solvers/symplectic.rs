use fieldline_concepts::{FieldError, FieldOrder, FieldSampler};
use nalgebra::SVector;

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::*;

/// Leapfrog method for second-order fields in kick-drift-kick (velocity Verlet) form.
///
/// The velocity is stored at full steps
/// \\begin{align}
///     v_{i+1/2} &= v_i + \frac{h}{2} a(t_i, y_i, v_i)\\\\
///     y_{i+1} &= y_i + h v_{i+1/2}\\\\
///     v_{i+1} &= v_{i+1/2} + \frac{h}{2} a(t_{i+1}, y_{i+1}, \tilde{v}_{i+1})
/// \\end{align}
/// where $\tilde{v}_{i+1} = v_{i+1/2} + \frac{h}{2} a(t_{i+1}, y_{i+1}, v_{i+1/2})$ predicts
/// the new velocity. The prediction keeps the method second-order accurate when the
/// acceleration depends on the velocity, as it does for magnetic forces and for first-order
/// fields which are advected through [FieldSampler::evaluate_with_velocity].
///
/// On the first step the initial velocity $v_0$ is taken from
/// [with_initial_velocity](Leapfrog::with_initial_velocity) or, if not given, from the
/// position-only evaluation [FieldSampler::evaluate].
///
/// Records carry the velocities at both ends of the step which enables cubic Hermite
/// interpolation between stored positions.
#[derive(Clone, Debug, PartialEq)]
pub struct Leapfrog<const D: usize> {
    core: IntegratorCore<D>,
    velocity: SVector<f64, D>,
    initial_velocity: Option<SVector<f64, D>>,
}

impl<const D: usize> Default for Leapfrog<D> {
    fn default() -> Self {
        Self {
            core: IntegratorCore::default(),
            velocity: SVector::zeros(),
            initial_velocity: None,
        }
    }
}

impl<const D: usize> Leapfrog<D> {
    /// Starts at time `t0` in position `y0` with step size `h`.
    pub fn new(t0: f64, y0: SVector<f64, D>, h: f64) -> Self {
        Self {
            core: IntegratorCore::new(t0, y0, h),
            ..Default::default()
        }
    }

    /// Uses the given velocity instead of evaluating the field on the first step.
    pub fn with_initial_velocity(mut self, velocity: SVector<f64, D>) -> Self {
        self.initial_velocity = Some(velocity);
        self
    }

    /// Computes the position and velocity after one step of size `h`.
    fn kick_drift_kick(
        field: &dyn FieldSampler<D>,
        t: f64,
        y: &SVector<f64, D>,
        v: &SVector<f64, D>,
        h: f64,
    ) -> Result<(SVector<f64, D>, SVector<f64, D>), FieldError> {
        let a = sample_with_velocity(field, t, y, v)?;
        let v_half = v + a * (h / 2.0);
        let y_new = y + v_half * h;
        let a_predicted = sample_with_velocity(field, t + h, &y_new, &v_half)?;
        let v_predicted = v_half + a_predicted * (h / 2.0);
        let a_new = sample_with_velocity(field, t + h, &y_new, &v_predicted)?;
        Ok((y_new, v_half + a_new * (h / 2.0)))
    }
}

impl<const D: usize> StateCheckpoint for Leapfrog<D> {
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
        self.core.offer_fields(visitor)?;
        visitor.accept(&mut self.velocity)?;
        visitor.accept(&mut self.initial_velocity)
    }
}

impl<const D: usize> Stepper<D> for Leapfrog<D> {
    fn tag(&self) -> StepperTag {
        StepperTag::LEAPFROG
    }

    fn order(&self) -> FieldOrder {
        FieldOrder::Second
    }

    fn core(&self) -> &IntegratorCore<D> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IntegratorCore<D> {
        &mut self.core
    }

    fn velocity(&self) -> Option<SVector<f64, D>> {
        if self.core.is_first_step() {
            self.initial_velocity
        } else {
            Some(self.velocity)
        }
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    fn step(&mut self, field: &dyn FieldSampler<D>, t_max: f64) -> StepOutcome<D> {
        let planned = match self.core.plan_step(t_max) {
            Ok(planned) => planned,
            Err(outcome) => return outcome,
        };
        let h = planned.h;
        let t = self.core.time();
        let y = *self.core.position();

        let v0 = match (self.core.is_first_step(), self.initial_velocity) {
            (true, Some(v0)) => v0,
            (true, None) => match sample(field, t, &y) {
                Ok(v0) => v0,
                Err(e) => return self.core.fail(e),
            },
            (false, _) => self.velocity,
        };
        let (y_new, v1) = match Self::kick_drift_kick(field, t, &y, &v0, h) {
            Ok(state) => state,
            Err(e) => return self.core.fail(e),
        };
        let outcome = self.core.commit(planned, y_new, Some((v0, v1)), t_max);
        if let StepOutcome::Advanced(_) | StepOutcome::Terminated(_) = outcome {
            self.velocity = v1;
        }
        outcome
    }

    fn box_clone(&self) -> Box<dyn Stepper<D>> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::super::test_fields::*;
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn uniform_field_matches_euler() {
        let field = Uniform(SVector::from([1.0, 0.0, 0.0]));
        let mut leapfrog = Leapfrog::new(0.0, SVector::zeros(), 0.1);
        let mut euler = Euler::new(0.0, SVector::zeros(), 0.1);
        loop {
            let a = leapfrog.step(&field, 1.0);
            euler.step(&field, 1.0);
            assert_eq!(leapfrog.position(), euler.position());
            if !matches!(a, StepOutcome::Advanced(_)) {
                break;
            }
        }
        assert_eq!(leapfrog.position(), SVector::from([1.0, 0.0, 0.0]));
        assert_eq!(leapfrog.velocity(), Some(SVector::from([1.0, 0.0, 0.0])));
    }

    #[test]
    fn harmonic_oscillator_energy_is_bounded() {
        let mut stepper = Leapfrog::new(0.0, SVector::from([1.0]), 0.01)
            .with_initial_velocity(SVector::from([0.0]));
        let mut max_deviation: f64 = 0.0;
        loop {
            let outcome = stepper.step(&Spring, 100.0);
            if let Some(v) = stepper.velocity() {
                let energy = stepper.position()[0].powi(2) + v[0].powi(2);
                max_deviation = max_deviation.max((energy - 1.0).abs());
            }
            if !matches!(outcome, StepOutcome::Advanced(_)) {
                break;
            }
        }
        assert!(max_deviation < 0.02);
        assert_abs_diff_eq!(stepper.position()[0], 100f64.cos(), epsilon = 0.05);
    }

    fn rotation_error(h: f64) -> f64 {
        let y0 = SVector::from([1.0, 0.0]);
        let period = 2.0 * std::f64::consts::PI;
        let mut stepper = Leapfrog::new(0.0, y0, h);
        while let StepOutcome::Advanced(_) = stepper.step(&Rotation, period) {}
        (stepper.position() - y0).norm()
    }

    #[test]
    fn second_order_for_velocity_dependent_acceleration() {
        // The material acceleration of a rotation depends on the velocity
        let coarse = rotation_error(0.02);
        let fine = rotation_error(0.01);
        assert!(fine < 1e-3, "error {} too large", fine);
        assert!(
            coarse / fine > 3.5,
            "errors {} and {} do not converge quadratically",
            coarse,
            fine
        );
    }

    #[test]
    fn records_carry_velocities() {
        let mut stepper = Leapfrog::new(0.0, SVector::from([1.0]), 0.1)
            .with_initial_velocity(SVector::from([0.0]));
        match stepper.step(&Spring, 1.0) {
            StepOutcome::Advanced(record) => {
                assert_eq!(record.v0(), Some(&SVector::from([0.0])));
                assert!(record.v1().is_some());
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
    }

    #[test]
    fn restored_stepper_continues_identically() {
        let mut stepper = Leapfrog::new(0.0, SVector::from([1.0]), 0.05);
        stepper.step(&Spring, 10.0);
        stepper.step(&Spring, 10.0);

        let mut buffer = WireBuffer::new();
        stepper.save(&mut buffer).unwrap();
        buffer.rewind();
        let mut restored = Leapfrog::default();
        restored.restore(&mut buffer).unwrap();

        for _ in 0..10 {
            assert_eq!(stepper.step(&Spring, 10.0), restored.step(&Spring, 10.0));
        }
    }
}
