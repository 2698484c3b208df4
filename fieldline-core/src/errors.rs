use core::any::type_name;
use core::fmt::Display;

use crossbeam_channel::SendError;
use fieldline_concepts::*;

use crate::solvers::StepperTag;
use crate::wire::WireError;

macro_rules! impl_error_variant {
    ($name: ident, $($err_var: ident),+) => {
        // Implement Display for ErrorVariant
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$err_var(message) => write!(f, "{}", message),
                    )+
                }
            }
        }
    }
}

macro_rules! impl_from_error {
    ($name: ident, $(($err_var: ident, $err_type: ty)),+) => {
        $(
            // Implement conversion from error to errorvariant
            impl From<$err_type> for $name {
                fn from(err: $err_type) -> Self {
                    $name::$err_var(err)
                }
            }
        )+
    }
}

/// Covers all errors that can occur while advecting curves.
///
/// The errors are listed from very likely to be a user error to almost certainly an internal
/// error.
/// Errors concerning a single curve (such as [AdvectionError::UnknownStepperType] on receipt)
/// are reported per curve and never abort the advection of other curves.
#[derive(Debug)]
pub enum AdvectionError {
    // Very likely to be user errors
    /// See [SetupError].
    SetupError(SetupError),
    /// See [CalcError].
    CalcError(CalcError),
    /// See [DecomposeError].
    DecomposeError(DecomposeError),
    /// A stepper with this tag is not known to the
    /// [StepperRegistry](crate::solvers::StepperRegistry).
    UnknownStepperType(StepperTag),
    /// Settings could not be parsed from json.
    SerdeJsonError(serde_json::Error),
    /// Settings could not be parsed from ron.
    RonError(ron::error::SpannedError),
    /// Settings could not be written as ron.
    RonSerializeError(ron::Error),

    // Less likely but possible to be user errors
    /// See [WireError].
    WireError(WireError),
    /// A curve could not be delivered to another domain. See [CommunicationError].
    CommunicationError(CommunicationError),

    // Highly unlikely to be user errors
    /// See [IndexError].
    IndexError(IndexError),
    /// Error related to File Io operations.
    IoError(std::io::Error),
    /// Building the thread pool failed.
    ThreadingError(rayon::ThreadPoolBuildError),
}

impl_from_error! {AdvectionError,
    (SetupError, SetupError),
    (CalcError, CalcError),
    (DecomposeError, DecomposeError),
    (SerdeJsonError, serde_json::Error),
    (RonError, ron::error::SpannedError),
    (RonSerializeError, ron::Error),
    (WireError, WireError),
    (CommunicationError, CommunicationError),
    (IndexError, IndexError),
    (IoError, std::io::Error),
    (ThreadingError, rayon::ThreadPoolBuildError)
}

impl_error_variant! {AdvectionError,
    SetupError,
    CalcError,
    DecomposeError,
    UnknownStepperType,
    SerdeJsonError,
    RonError,
    RonSerializeError,
    WireError,
    CommunicationError,
    IndexError,
    IoError,
    ThreadingError
}

// Implement the general error property
impl std::error::Error for AdvectionError {}

// The receiving end of a channel is gone
impl<T> From<SendError<T>> for AdvectionError {
    fn from(_err: SendError<T>) -> Self {
        AdvectionError::CommunicationError(CommunicationError(format!(
            "receiver of {} messages disconnected",
            type_name::<T>()
        )))
    }
}
