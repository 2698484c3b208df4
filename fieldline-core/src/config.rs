//! Settings which control how curves are advected.
//!
//! [AdvectionSettings] can be stored next to the results of a run and loaded again from
//! `json` or `ron` files.
//!
//! ```
//! # use fieldline_core::config::AdvectionSettings;
//! # use fieldline_core::solvers::StepperKind;
//! let settings: AdvectionSettings = ron::de::from_str(
//!     "(stepper: DormandPrince, step_size: 0.05, max_steps: Some(1000))",
//! ).unwrap();
//! assert_eq!(settings.stepper, StepperKind::DormandPrince);
//! assert_eq!(settings.step_size, 0.05);
//! // Unspecified values are taken from the defaults
//! assert_eq!(settings.abs_tol, AdvectionSettings::default().abs_tol);
//! ```
use std::num::NonZeroUsize;
use std::path::Path;

use fieldline_concepts::{DomainId, SetupError};
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use crate::curve::{Curve, CurveId, HistoryPolicy};
use crate::errors::AdvectionError;
use crate::solvers::*;

/// Numerical and runtime parameters of an advection.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AdvectionSettings {
    /// Integrator used for new curves.
    pub stepper: StepperKind,
    /// Initial magnitude of the step size.
    pub step_size: f64,
    /// Smallest step size adaptive integrators may use.
    pub h_min: f64,
    /// Largest step size of all integrators.
    pub h_max: f64,
    /// Absolute error tolerance of adaptive integrators.
    pub abs_tol: f64,
    /// Relative error tolerance of adaptive integrators.
    pub rel_tol: f64,
    /// Per-curve step limit.
    pub max_steps: Option<u64>,
    /// Records transmitted with each curve on handoff.
    pub history: HistoryPolicy,
    /// How often a step is halved at a boundary before the curve is handed over.
    pub max_boundary_refinements: u32,
    /// Steps a curve takes before other curves and domains are served.
    pub steps_per_slice: Option<u64>,
    /// Threads per domain.
    pub n_threads: NonZeroUsize,
    /// Show a progress bar over finished curves.
    pub show_progressbar: bool,
}

impl Default for AdvectionSettings {
    fn default() -> Self {
        Self {
            stepper: StepperKind::RungeKutta4,
            step_size: 1e-2,
            h_min: 0.0,
            h_max: f64::MAX,
            abs_tol: 1e-8,
            rel_tol: 1e-6,
            max_steps: None,
            history: HistoryPolicy::Full,
            max_boundary_refinements: 4,
            steps_per_slice: Some(64),
            n_threads: NonZeroUsize::MIN,
            show_progressbar: false,
        }
    }
}

impl AdvectionSettings {
    /// Loads settings from a json file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AdvectionError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Loads settings from a ron file.
    pub fn from_ron_file(path: impl AsRef<Path>) -> Result<Self, AdvectionError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(ron::de::from_str(&contents)?)
    }

    /// Loads settings and chooses the format by the extension of the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AdvectionError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            Some("ron") => Self::from_ron_file(path),
            _ => Err(SetupError(format!(
                "cannot determine format of settings file {}",
                path.display()
            ))
            .into()),
        }
    }

    /// Pretty-printed json representation.
    pub fn to_json(&self) -> Result<String, AdvectionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Pretty-printed ron representation.
    pub fn to_ron(&self) -> Result<String, AdvectionError> {
        let config = ron::ser::PrettyConfig::new()
            .struct_names(true)
            .indentor("  ".to_owned());
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Checks that the numerical parameters can be used.
    pub fn validate(&self) -> Result<(), SetupError> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(SetupError(format!(
                "step size must be positive and finite but is {}",
                self.step_size
            )));
        }
        let bounds_finite = self.h_min.is_finite() && self.h_max.is_finite();
        if !bounds_finite || self.h_min < 0.0 || self.h_max <= 0.0 || self.h_min > self.h_max {
            return Err(SetupError(format!(
                "invalid step size bounds [{}, {}]",
                self.h_min, self.h_max
            )));
        }
        let tolerances_finite = self.abs_tol.is_finite() && self.rel_tol.is_finite();
        if !tolerances_finite || self.abs_tol <= 0.0 || self.rel_tol < 0.0 {
            return Err(SetupError(format!(
                "tolerances must be positive but are abs={} rel={}",
                self.abs_tol, self.rel_tol
            )));
        }
        if self.steps_per_slice == Some(0) {
            return Err(SetupError("steps per slice must not be zero".into()));
        }
        Ok(())
    }

    /// Creates the configured integrator starting at time `t0` in position `y0`.
    pub fn build_stepper<const D: usize>(
        &self,
        t0: f64,
        y0: SVector<f64, D>,
    ) -> Box<dyn Stepper<D>> {
        let h = self.step_size.abs().min(self.h_max);
        match self.stepper {
            StepperKind::Euler => Box::new(Euler::new(t0, y0, h)),
            StepperKind::RungeKutta4 => Box::new(RungeKutta4::new(t0, y0, h)),
            StepperKind::DormandPrince => Box::new(
                DormandPrince::new(t0, y0, h)
                    .with_tolerances(self.abs_tol, self.rel_tol)
                    .with_step_bounds(self.h_min, self.h_max),
            ),
            StepperKind::AdamsBashforth2 => Box::new(AdamsBashforth2::new(t0, y0, h)),
            StepperKind::Leapfrog => Box::new(Leapfrog::new(t0, y0, h)),
        }
    }

    /// Creates a new curve with the configured integrator and step limit.
    pub fn seed_curve<const D: usize>(
        &self,
        id: CurveId,
        domain: DomainId,
        t0: f64,
        y0: SVector<f64, D>,
    ) -> Curve<D> {
        let curve = Curve::new(id, domain, self.build_stepper(t0, y0));
        match self.max_steps {
            Some(max_steps) => curve.with_max_steps(max_steps),
            None => curve,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        let settings = AdvectionSettings {
            stepper: StepperKind::Leapfrog,
            history: HistoryPolicy::Tail(8),
            max_steps: Some(20),
            h_max: 1.0,
            ..Default::default()
        };
        std::fs::write(&path, settings.to_json()?)?;
        assert_eq!(AdvectionSettings::load(&path)?, settings);
        Ok(())
    }

    #[test]
    fn ron_file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.ron");
        let settings = AdvectionSettings {
            stepper: StepperKind::DormandPrince,
            abs_tol: 1e-10,
            steps_per_slice: None,
            n_threads: NonZeroUsize::new(4).unwrap(),
            h_max: 0.5,
            ..Default::default()
        };
        std::fs::write(&path, settings.to_ron()?)?;
        assert_eq!(AdvectionSettings::load(&path)?, settings);
        Ok(())
    }

    #[test]
    fn unknown_extension() {
        assert!(matches!(
            AdvectionSettings::load("settings.toml"),
            Err(AdvectionError::SetupError(_))
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            AdvectionSettings::load("/nonexistent/settings.json"),
            Err(AdvectionError::IoError(_))
        ));
    }

    #[test]
    fn validation() {
        assert!(AdvectionSettings::default().validate().is_ok());
        let settings = AdvectionSettings {
            step_size: -1.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings = AdvectionSettings {
            h_min: 1.0,
            h_max: 0.1,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn not_a_number_is_rejected() {
        let invalid = [
            AdvectionSettings {
                h_min: f64::NAN,
                ..Default::default()
            },
            AdvectionSettings {
                h_max: f64::NAN,
                ..Default::default()
            },
            AdvectionSettings {
                h_max: f64::INFINITY,
                ..Default::default()
            },
            AdvectionSettings {
                abs_tol: f64::NAN,
                ..Default::default()
            },
            AdvectionSettings {
                rel_tol: f64::NAN,
                ..Default::default()
            },
            AdvectionSettings {
                step_size: f64::NAN,
                ..Default::default()
            },
        ];
        for settings in invalid {
            assert!(
                matches!(settings.validate(), Err(SetupError(_))),
                "{:?} was accepted",
                settings
            );
        }
    }

    #[test]
    fn built_steppers_match_kind() {
        for kind in [
            StepperKind::Euler,
            StepperKind::RungeKutta4,
            StepperKind::DormandPrince,
            StepperKind::AdamsBashforth2,
            StepperKind::Leapfrog,
        ] {
            let settings = AdvectionSettings {
                stepper: kind,
                step_size: 0.3,
                h_max: 0.2,
                ..Default::default()
            };
            let stepper = settings.build_stepper(1.0, SVector::<f64, 2>::zeros());
            assert_eq!(stepper.tag(), kind.tag());
            assert_eq!(stepper.time(), 1.0);
            assert_eq!(stepper.step_size(), 0.2);
        }
    }

    #[test]
    fn seeded_curve_has_step_limit() {
        let settings = AdvectionSettings {
            max_steps: Some(5),
            ..Default::default()
        };
        let curve = settings.seed_curve(CurveId(2), DomainId(1), 0.0, SVector::<f64, 3>::zeros());
        assert_eq!(curve.max_steps(), Some(5));
        assert_eq!(curve.domain(), DomainId(1));
    }
}
