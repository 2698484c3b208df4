use fieldline_concepts::*;
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// Restricts a field to the data which one subdomain stores locally.
///
/// Queries outside of the box $[\text{lower} - w, \text{upper} + w]$ where $w$ is the
/// ghost width fail with [FieldError::OutsideDomain].
/// Optionally the time range can be restricted as well in which case queries outside of it
/// fail with [FieldError::OutsideTime].
/// This mimics a process which only holds part of the mesh and is mostly useful to test
/// decomposed runs with analytic fields.
///
/// ```
/// # use fieldline_building_blocks::{SubDomainField, UniformField};
/// # use fieldline_concepts::{FieldError, FieldSampler};
/// # use nalgebra::SVector;
/// let field = SubDomainField::new(UniformField::new([1.0, 0.0]), [0.0; 2].into(), [1.0; 2].into())
///     .with_ghost_width(0.1);
/// assert!(field.evaluate(0.0, &[1.05, 0.5].into()).is_ok());
/// assert!(matches!(
///     field.evaluate(0.0, &[1.2, 0.5].into()),
///     Err(FieldError::OutsideDomain(_))
/// ));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SubDomainField<F, const D: usize> {
    field: F,
    lower: SVector<f64, D>,
    upper: SVector<f64, D>,
    ghost_width: f64,
    time_range: Option<(f64, f64)>,
}

impl<F, const D: usize> SubDomainField<F, D> {
    /// Restricts `field` to the box spanned by `lower` and `upper`.
    pub fn new(field: F, lower: SVector<f64, D>, upper: SVector<f64, D>) -> Self {
        Self {
            field,
            lower,
            upper,
            ghost_width: 0.0,
            time_range: None,
        }
    }

    /// Extends the box by `ghost_width` in every direction.
    pub fn with_ghost_width(self, ghost_width: f64) -> Self {
        Self {
            ghost_width: ghost_width.max(0.0),
            ..self
        }
    }

    /// Only answers queries for times in `[t_start, t_end]`.
    pub fn with_time_range(self, t_start: f64, t_end: f64) -> Self {
        Self {
            time_range: Some((t_start, t_end)),
            ..self
        }
    }

    /// The unrestricted field.
    pub fn inner(&self) -> &F {
        &self.field
    }

    /// Checks if a query at `(t, pos)` can be answered.
    pub fn check(&self, t: f64, pos: &SVector<f64, D>) -> Result<(), FieldError> {
        if let Some((t_start, t_end)) = self.time_range {
            if !(t_start..=t_end).contains(&t) {
                return Err(FieldError::OutsideTime(format!(
                    "{} not in [{}, {}]",
                    t, t_start, t_end
                )));
            }
        }
        let inside = pos
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(x, (lo, up))| {
                (lo - self.ghost_width..=up + self.ghost_width).contains(x)
            });
        if inside {
            Ok(())
        } else {
            Err(FieldError::OutsideDomain(format!(
                "{:?} not in [{:?}, {:?}] with ghost width {}",
                pos.as_slice(),
                self.lower.as_slice(),
                self.upper.as_slice(),
                self.ghost_width
            )))
        }
    }
}

impl<F, const D: usize> FieldSampler<D> for SubDomainField<F, D>
where
    F: FieldSampler<D>,
{
    fn evaluate(&self, t: f64, pos: &SVector<f64, D>) -> Result<SVector<f64, D>, FieldError> {
        self.check(t, pos)?;
        self.field.evaluate(t, pos)
    }

    fn evaluate_with_velocity(
        &self,
        t: f64,
        pos: &SVector<f64, D>,
        vel: &SVector<f64, D>,
    ) -> Result<SVector<f64, D>, FieldError> {
        self.check(t, pos)?;
        self.field.evaluate_with_velocity(t, pos, vel)
    }
}
