use std::collections::BTreeMap;

use super::*;
use crate::errors::AdvectionError;

/// Creates a default-initialized stepper which is subsequently restored from a checkpoint.
pub type StepperConstructor<const D: usize> = fn() -> Box<dyn Stepper<D>>;

fn construct_default<S, const D: usize>() -> Box<dyn Stepper<D>>
where
    S: Stepper<D> + Default + 'static,
{
    Box::new(S::default())
}

/// Maps persistent [StepperTag]s to constructors.
///
/// The [Default] registry knows all built-in integrators.
/// Custom steppers must be registered under the same tag on every process which may receive
/// curves advanced by them.
///
/// ```
/// # use fieldline_core::solvers::*;
/// # use fieldline_core::wire::*;
/// # use nalgebra::SVector;
/// let registry = StepperRegistry::<2>::default();
/// let mut stepper = RungeKutta4::new(0.5, SVector::from([1.0, 2.0]), 0.1);
///
/// let mut buffer = WireBuffer::new();
/// stepper.save(&mut buffer).unwrap();
/// buffer.rewind();
///
/// let restored = registry.restore(StepperTag::RUNGE_KUTTA_4, &mut buffer).unwrap();
/// assert_eq!(restored.time(), 0.5);
/// assert!(registry.construct(StepperTag(42)).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct StepperRegistry<const D: usize> {
    constructors: BTreeMap<StepperTag, StepperConstructor<D>>,
}

impl<const D: usize> Default for StepperRegistry<D> {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(StepperTag::EULER, construct_default::<Euler<D>, D>);
        registry.register(
            StepperTag::RUNGE_KUTTA_4,
            construct_default::<RungeKutta4<D>, D>,
        );
        registry.register(
            StepperTag::DORMAND_PRINCE,
            construct_default::<DormandPrince<D>, D>,
        );
        registry.register(
            StepperTag::ADAMS_BASHFORTH_2,
            construct_default::<AdamsBashforth2<D>, D>,
        );
        registry.register(StepperTag::LEAPFROG, construct_default::<Leapfrog<D>, D>);
        registry
    }
}

impl<const D: usize> StepperRegistry<D> {
    /// Registry without any constructors.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registers a constructor and returns the one previously stored under the same tag.
    pub fn register(
        &mut self,
        tag: StepperTag,
        constructor: StepperConstructor<D>,
    ) -> Option<StepperConstructor<D>> {
        self.constructors.insert(tag, constructor)
    }

    /// Checks if a constructor is registered under this tag.
    pub fn contains(&self, tag: &StepperTag) -> bool {
        self.constructors.contains_key(tag)
    }

    /// All registered tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = &StepperTag> {
        self.constructors.keys()
    }

    /// Creates a default-initialized stepper.
    pub fn construct(&self, tag: StepperTag) -> Result<Box<dyn Stepper<D>>, AdvectionError> {
        let constructor = self
            .constructors
            .get(&tag)
            .ok_or(AdvectionError::UnknownStepperType(tag))?;
        Ok(constructor())
    }

    /// Creates a stepper and restores its state from the buffer.
    pub fn restore(
        &self,
        tag: StepperTag,
        buffer: &mut WireBuffer,
    ) -> Result<Box<dyn Stepper<D>>, AdvectionError> {
        let mut stepper = self.construct(tag)?;
        stepper.restore(buffer)?;
        if stepper.tag() != tag {
            return Err(AdvectionError::UnknownStepperType(tag));
        }
        Ok(stepper)
    }
}
