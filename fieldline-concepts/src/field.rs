use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use crate::errors::FieldError;

/// Order of the differential equation an integrator advances.
///
/// First-order integrators solve $\dot{y} = f(t, y)$ and only ever call
/// [FieldSampler::evaluate].
/// Second-order integrators solve $\ddot{y} = a(t, y, \dot{y})$ and use
/// [FieldSampler::evaluate_with_velocity] once their velocity is known.
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum FieldOrder {
    /// Position-only evaluation.
    First,
    /// Position and velocity evaluation.
    Second,
}

impl FieldOrder {
    /// Numerical value of the order (1 or 2).
    pub fn as_u8(&self) -> u8 {
        match self {
            FieldOrder::First => 1,
            FieldOrder::Second => 2,
        }
    }
}

/// Answers the question "what is the field at time `t` and position `y`" within the data
/// which is locally available.
///
/// The advection engine never accesses mesh data directly.
/// All spatial queries are funneled through this trait.
/// Implementors which can not answer a query (for example since the point lies outside of
/// the locally stored mesh) return a [FieldError].
///
/// Samplers are shared between all curves of one process and thus only ever accessed
/// through shared references.
///
/// ```
/// # use fieldline_concepts::{FieldError, FieldSampler};
/// # use nalgebra::SVector;
/// struct Shear;
///
/// impl FieldSampler<2> for Shear {
///     fn evaluate(&self, _t: f64, pos: &SVector<f64, 2>) -> Result<SVector<f64, 2>, FieldError> {
///         Ok([pos[1], 0.0].into())
///     }
/// }
///
/// let v = Shear.evaluate(0.0, &[0.0, 2.0].into()).unwrap();
/// assert_eq!(v, SVector::<f64, 2>::from([2.0, 0.0]));
/// ```
pub trait FieldSampler<const D: usize> {
    /// Evaluates the field at the given time and position.
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError>;

    /// Evaluates the second-order form of the field, ie. the acceleration of a particle at
    /// position `pos` moving with velocity `vel`.
    ///
    /// The default implementation treats [FieldSampler::evaluate] as a velocity field and
    /// returns the acceleration of a massless tracer moving with velocity `vel`, approximated
    /// by a forward difference along the trajectory
    /// \\begin{equation}
    ///     a \approx \frac{v(t + \delta, y + \delta\dot{y}) - v(t, y)}{\delta}.
    /// \\end{equation}
    /// For stationary uniform fields this is exactly zero.
    fn evaluate_with_velocity(
        &self,
        t: f64,
        pos: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        let delta = f64::EPSILON.sqrt() * (1.0 + t.abs());
        let v0 = self.evaluate(t, pos)?;
        let v1 = self.evaluate(t + delta, &(pos + vel * delta))?;
        Ok((v1 - v0) / delta)
    }
}

impl<S, const D: usize> FieldSampler<D> for &S
where
    S: FieldSampler<D> + ?Sized,
{
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        (**self).evaluate(t, pos)
    }

    fn evaluate_with_velocity(
        &self,
        t: f64,
        pos: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        (**self).evaluate_with_velocity(t, pos, vel)
    }
}

impl<S, const D: usize> FieldSampler<D> for std::sync::Arc<S>
where
    S: FieldSampler<D> + ?Sized,
{
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        (**self).evaluate(t, pos)
    }

    fn evaluate_with_velocity(
        &self,
        t: f64,
        pos: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        (**self).evaluate_with_velocity(t, pos, vel)
    }
}

impl<S, const D: usize> FieldSampler<D> for Box<S>
where
    S: FieldSampler<D> + ?Sized,
{
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        (**self).evaluate(t, pos)
    }

    fn evaluate_with_velocity(
        &self,
        t: f64,
        pos: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        (**self).evaluate_with_velocity(t, pos, vel)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Uniform;

    impl FieldSampler<3> for Uniform {
        fn evaluate(&self, _: f64, _: &SVector<f64, 3>) -> Result<SVector<f64, 3>, FieldError> {
            Ok([1.0, 0.0, 0.0].into())
        }
    }

    struct Stretch;

    impl FieldSampler<1> for Stretch {
        fn evaluate(&self, _: f64, pos: &SVector<f64, 1>) -> Result<SVector<f64, 1>, FieldError> {
            Ok(*pos)
        }
    }

    #[test]
    fn uniform_field_has_no_acceleration() {
        let a = Uniform
            .evaluate_with_velocity(3.0, &[1.0, 2.0, 3.0].into(), &[1.0, 0.0, 0.0].into())
            .unwrap();
        assert_eq!(a, SVector::<f64, 3>::zeros());
    }

    #[test]
    fn material_acceleration_of_stretching_flow() {
        // y' = y gives y'' = y' = y
        let pos = SVector::<f64, 1>::from([2.0]);
        let a = Stretch.evaluate_with_velocity(0.0, &pos, &pos).unwrap();
        approx::assert_abs_diff_eq!(a[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn forward_through_references() {
        let field = std::sync::Arc::new(Uniform);
        let boxed: Box<dyn FieldSampler<3>> = Box::new(Uniform);
        let r = &field;
        assert_eq!(
            r.evaluate(0.0, &SVector::zeros()).unwrap(),
            boxed.evaluate(0.0, &SVector::zeros()).unwrap()
        );
    }

    #[test]
    fn order_values() {
        assert_eq!(FieldOrder::First.as_u8(), 1);
        assert_eq!(FieldOrder::Second.as_u8(), 2);
    }
}
