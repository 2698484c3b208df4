use fieldline_concepts::*;
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

/// Same velocity everywhere and at all times.
///
/// ```
/// # use fieldline_building_blocks::UniformField;
/// # use fieldline_concepts::FieldSampler;
/// # use nalgebra::SVector;
/// let field = UniformField::new([1.0, 0.0, 0.0]);
/// let v = field.evaluate(3.0, &SVector::from([4.0, 5.0, 6.0])).unwrap();
/// assert_eq!(v, SVector::from([1.0, 0.0, 0.0]));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UniformField<const D: usize> {
    /// Constant value of the field
    pub velocity: SVector<f64, D>,
}

impl<const D: usize> UniformField<D> {
    /// Constructs a new [UniformField]
    pub fn new(velocity: impl Into<SVector<f64, D>>) -> Self {
        Self {
            velocity: velocity.into(),
        }
    }
}

impl<const D: usize> FieldSampler<D> for UniformField<D> {
    fn evaluate(&self, _: f64, _: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        Ok(self.velocity)
    }

    fn evaluate_with_velocity(
        &self,
        _: f64,
        _: &SVector<f64, D>,
        _: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        Ok(SVector::zeros())
    }
}

/// Affine field $\dot{y} = Ay + b$.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LinearField<const D: usize> {
    /// Linear part
    pub matrix: SMatrix<f64, D, D>,
    /// Constant part
    pub offset: SVector<f64, D>,
}

impl<const D: usize> LinearField<D> {
    /// Constructs a new [LinearField]
    pub fn new(matrix: SMatrix<f64, D, D>, offset: SVector<f64, D>) -> Self {
        Self { matrix, offset }
    }

    /// Pure scaling $\dot{y} = \lambda y$
    pub fn scaling(lambda: f64) -> Self {
        Self::new(SMatrix::identity() * lambda, SVector::zeros())
    }
}

impl<const D: usize> FieldSampler<D> for LinearField<D> {
    fn evaluate(&self, _: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        Ok(self.matrix * pos + self.offset)
    }

    fn evaluate_with_velocity(
        &self,
        _: f64,
        _: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        Ok(self.matrix * vel)
    }
}

/// Rigid rotation around a centre.
///
/// In two dimensions the rotation is described by a single angular velocity.
/// In three dimensions the angular velocity is a vector which also determines the axis
/// of the rotation.
/// Integral curves are circles around the centre (or around the axis) which makes this
/// field a good test for the accuracy of integrators.
///
/// ```
/// # use fieldline_building_blocks::RotationalField;
/// # use fieldline_concepts::FieldSampler;
/// # use nalgebra::SVector;
/// let field = RotationalField::new_2d([0.0, 0.0], 2.0);
/// let v = field.evaluate(0.0, &SVector::from([1.0, 0.0])).unwrap();
/// assert_eq!(v, SVector::from([0.0, 2.0]));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RotationalField<const D: usize> {
    /// Point which is at rest
    pub center: SVector<f64, D>,
    /// Angular velocity vector. Only the last component is used in two dimensions.
    pub angular_velocity: SVector<f64, 3>,
}

impl RotationalField<2> {
    /// Rotation in the plane with angular velocity `omega`
    pub fn new_2d(center: impl Into<SVector<f64, 2>>, omega: f64) -> Self {
        Self {
            center: center.into(),
            angular_velocity: [0.0, 0.0, omega].into(),
        }
    }
}

impl RotationalField<3> {
    /// Rotation around the axis through `center` with direction and magnitude given by
    /// `angular_velocity`
    pub fn new_3d(
        center: impl Into<SVector<f64, 3>>,
        angular_velocity: impl Into<SVector<f64, 3>>,
    ) -> Self {
        Self {
            center: center.into(),
            angular_velocity: angular_velocity.into(),
        }
    }
}

impl FieldSampler<2> for RotationalField<2> {
    fn evaluate(&self, _: f64, pos: &SVector<f64, 2>) -> Result<SVector<f64, 2>, FieldError> {
        let r = pos - self.center;
        let omega = self.angular_velocity[2];
        Ok([-omega * r[1], omega * r[0]].into())
    }
}

impl FieldSampler<3> for RotationalField<3> {
    fn evaluate(&self, _: f64, pos: &SVector<f64, 3>) -> Result<SVector<f64, 3>, FieldError> {
        Ok(self.angular_velocity.cross(&(pos - self.center)))
    }
}

/// Wraps a closure $f(t, y)$ as a field.
///
/// ```
/// # use fieldline_building_blocks::ClosureField;
/// # use fieldline_concepts::FieldSampler;
/// # use nalgebra::SVector;
/// let field = ClosureField::new(|t: f64, y: &SVector<f64, 1>| y * t);
/// assert_eq!(field.evaluate(2.0, &[3.0].into()).unwrap(), SVector::from([6.0]));
/// ```
#[derive(Clone)]
pub struct ClosureField<F> {
    closure: F,
}

impl<F> ClosureField<F> {
    /// Constructs a new [ClosureField]
    pub fn new(closure: F) -> Self {
        Self { closure }
    }
}

impl<F> core::fmt::Debug for ClosureField<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClosureField")
            .field("closure", &core::any::type_name::<F>())
            .finish()
    }
}

impl<F, const D: usize> FieldSampler<D> for ClosureField<F>
where
    F: Fn(f64, &SVector<f64, D>) -> SVector<f64, D>,
{
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        Ok((self.closure)(t, pos))
    }
}
