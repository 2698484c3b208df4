use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use crate::wire::{WireBuffer, WireError, WireFormat};

/// A single advance of an integral curve over the time interval `[t0, t1]`.
///
/// Records are produced by [Stepper](crate::solvers::Stepper)s and are never modified once
/// they were appended to a [Curve](crate::Curve).
/// Second-order integrators additionally store the velocity at both ends of the interval
/// which allows for a cubic Hermite interpolation between the two positions.
///
/// ```
/// # use fieldline_core::StepRecord;
/// # use nalgebra::SVector;
/// let record = StepRecord::new(0.0, 0.5, SVector::from([0.0]), SVector::from([1.0]));
/// assert_eq!(record.dt(), 0.5);
/// assert_eq!(record.interpolate(0.25).unwrap(), SVector::from([0.5]));
/// assert!(record.interpolate(0.75).is_none());
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StepRecord<const D: usize> {
    t0: f64,
    t1: f64,
    y0: SVector<f64, D>,
    y1: SVector<f64, D>,
    velocities: Option<(SVector<f64, D>, SVector<f64, D>)>,
}

impl<const D: usize> StepRecord<D> {
    /// Record of a step from `(t0, y0)` to `(t1, y1)`.
    pub fn new(t0: f64, t1: f64, y0: SVector<f64, D>, y1: SVector<f64, D>) -> Self {
        Self {
            t0,
            t1,
            y0,
            y1,
            velocities: None,
        }
    }

    /// Attaches the velocities at the start and end of the step.
    pub fn with_velocities(mut self, v0: SVector<f64, D>, v1: SVector<f64, D>) -> Self {
        self.velocities = Some((v0, v1));
        self
    }

    /// Time at the start of the step.
    pub fn t0(&self) -> f64 {
        self.t0
    }

    /// Time at the end of the step.
    pub fn t1(&self) -> f64 {
        self.t1
    }

    /// Position at the start of the step.
    pub fn y0(&self) -> &SVector<f64, D> {
        &self.y0
    }

    /// Position at the end of the step.
    pub fn y1(&self) -> &SVector<f64, D> {
        &self.y1
    }

    /// Velocity at the start of the step if known.
    pub fn v0(&self) -> Option<&SVector<f64, D>> {
        self.velocities.as_ref().map(|(v0, _)| v0)
    }

    /// Velocity at the end of the step if known.
    pub fn v1(&self) -> Option<&SVector<f64, D>> {
        self.velocities.as_ref().map(|(_, v1)| v1)
    }

    /// Signed length of the time interval.
    pub fn dt(&self) -> f64 {
        self.t1 - self.t0
    }

    /// `1.0` for forward and `-1.0` for backward integration.
    pub fn direction(&self) -> f64 {
        if self.t1 >= self.t0 {
            1.0
        } else {
            -1.0
        }
    }

    /// Euclidean distance between start and end position.
    pub fn arc_length(&self) -> f64 {
        (self.y1 - self.y0).norm()
    }

    /// Checks if the given time lies inside the closed interval spanned by this record.
    pub fn contains_time(&self, t: f64) -> bool {
        let (a, b) = if self.t0 <= self.t1 {
            (self.t0, self.t1)
        } else {
            (self.t1, self.t0)
        };
        a <= t && t <= b
    }

    /// Checks if `next` starts exactly where this record ends and continues in the same
    /// direction.
    pub fn is_continued_by(&self, next: &Self) -> bool {
        self.t1 == next.t0 && self.y1 == next.y0 && self.direction() == next.direction()
    }

    /// Dense output inside the interval of this record.
    ///
    /// Uses a cubic Hermite polynomial if velocities are present and linear interpolation
    /// otherwise.
    /// Returns `None` if `t` lies outside of the interval.
    pub fn interpolate(&self, t: f64) -> Option<SVector<f64, D>> {
        if !self.contains_time(t) {
            return None;
        }
        let dt = self.dt();
        if dt == 0.0 {
            return Some(self.y0);
        }
        let s = (t - self.t0) / dt;
        match &self.velocities {
            Some((v0, v1)) => {
                let s2 = s * s;
                let s3 = s2 * s;
                let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
                let h10 = s3 - 2.0 * s2 + s;
                let h01 = -2.0 * s3 + 3.0 * s2;
                let h11 = s3 - s2;
                Some(self.y0 * h00 + v0 * (h10 * dt) + self.y1 * h01 + v1 * (h11 * dt))
            }
            None => Some(self.y0 + (self.y1 - self.y0) * s),
        }
    }
}

impl<const D: usize> WireFormat for StepRecord<D> {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&self.t0);
        buffer.write(&self.t1);
        buffer.write(&self.y0);
        buffer.write(&self.y1);
        buffer.write(&self.velocities);
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        Ok(Self {
            t0: buffer.read()?,
            t1: buffer.read()?,
            y0: buffer.read()?,
            y1: buffer.read()?,
            velocities: buffer.read()?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn hermite_reproduces_cubic() {
        // y(t) = t^3 with y'(t) = 3t^2 is represented exactly
        let y = |t: f64| SVector::<f64, 1>::from([t.powi(3)]);
        let v = |t: f64| SVector::<f64, 1>::from([3.0 * t.powi(2)]);
        let record = StepRecord::new(1.0, 2.0, y(1.0), y(2.0)).with_velocities(v(1.0), v(2.0));
        for t in [1.0, 1.1, 1.5, 1.9, 2.0] {
            assert_abs_diff_eq!(record.interpolate(t).unwrap()[0], y(t)[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn backward_record() {
        let record = StepRecord::new(1.0, 0.5, SVector::from([2.0]), SVector::from([1.0]));
        assert_eq!(record.direction(), -1.0);
        assert_eq!(record.dt(), -0.5);
        assert!(record.contains_time(0.75));
        assert!(!record.contains_time(1.25));
        assert_eq!(record.interpolate(0.75).unwrap(), SVector::from([1.5]));
    }

    #[test]
    fn continuity() {
        let a = StepRecord::new(0.0, 0.1, SVector::from([0.0, 0.0]), SVector::from([0.1, 0.0]));
        let b = StepRecord::new(0.1, 0.2, SVector::from([0.1, 0.0]), SVector::from([0.2, 0.0]));
        let c = StepRecord::new(0.1, 0.0, SVector::from([0.1, 0.0]), SVector::from([0.0, 0.0]));
        assert!(a.is_continued_by(&b));
        assert!(!b.is_continued_by(&a));
        assert!(!a.is_continued_by(&c));
        assert_abs_diff_eq!(a.arc_length(), 0.1);
    }

    #[test]
    fn wire_round_trip_keeps_velocities() {
        let record = StepRecord::new(0.0, 0.1, SVector::from([0.0; 3]), SVector::from([0.1; 3]))
            .with_velocities(SVector::from([1.0; 3]), SVector::from([2.0; 3]));
        let mut buffer = WireBuffer::new();
        buffer.write(&vec![record.clone(), StepRecord::new(0.1, 0.2, *record.y1(), *record.y1())]);
        buffer.rewind();
        let records = buffer.read::<Vec<StepRecord<3>>>().unwrap();
        assert_eq!(records[0], record);
        assert!(records[1].v0().is_none());
    }
}
