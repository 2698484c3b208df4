use fieldline_concepts::*;
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// Charged particle in static, homogeneous electric and magnetic fields.
///
/// The acceleration of a particle with charge $q$ and mass $m$ is given by the Lorentz force
/// \\begin{equation}
///     \ddot{y} = \frac{q}{m}\left(E + \dot{y}\times B\right).
/// \\end{equation}
/// When sampled as a first-order field, the guiding-centre drift velocity
/// $E\times B/|B|^2$ is returned.
/// Second-order integrators use this value as initial velocity if none was given.
///
/// ```
/// # use fieldline_building_blocks::LorentzField;
/// # use fieldline_concepts::FieldSampler;
/// # use nalgebra::SVector;
/// let field = LorentzField::new([0.0; 3], [0.0, 0.0, 1.0], 1.0, 1.0);
/// let a = field
///     .evaluate_with_velocity(0.0, &SVector::zeros(), &[1.0, 0.0, 0.0].into())
///     .unwrap();
/// assert_eq!(a, SVector::from([0.0, -1.0, 0.0]));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LorentzField {
    /// Electric field
    pub electric: SVector<f64, 3>,
    /// Magnetic field
    pub magnetic: SVector<f64, 3>,
    /// Charge of the particle
    pub charge: f64,
    /// Mass of the particle
    pub mass: f64,
}

impl LorentzField {
    /// Constructs a new [LorentzField]
    pub fn new(
        electric: impl Into<SVector<f64, 3>>,
        magnetic: impl Into<SVector<f64, 3>>,
        charge: f64,
        mass: f64,
    ) -> Self {
        Self {
            electric: electric.into(),
            magnetic: magnetic.into(),
            charge,
            mass,
        }
    }

    /// Angular frequency $|q||B|/m$ of the gyration around magnetic field lines.
    pub fn gyro_frequency(&self) -> f64 {
        (self.charge * self.magnetic.norm() / self.mass).abs()
    }

    fn charge_to_mass(&self) -> Result<f64, FieldError> {
        let ratio = self.charge / self.mass;
        if ratio.is_finite() {
            Ok(ratio)
        } else {
            Err(FieldError::Invalid(format!(
                "charge to mass ratio {}/{} is not finite",
                self.charge, self.mass
            )))
        }
    }
}

impl FieldSampler<3> for LorentzField {
    fn evaluate(&self, _: f64, _: &SVector<f64, 3>) -> Result<SVector<f64, 3>, FieldError> {
        let b2 = self.magnetic.norm_squared();
        if b2 == 0.0 {
            return Ok(SVector::zeros());
        }
        Ok(self.electric.cross(&self.magnetic) / b2)
    }

    fn evaluate_with_velocity(
        &self,
        _: f64,
        _: &SVector<f64, 3>,
        vel: &SVector<f64, 3>,
    ) -> Result<SVector<f64, 3>, FieldError> {
        Ok(self.charge_to_mass()? * (self.electric + vel.cross(&self.magnetic)))
    }
}
