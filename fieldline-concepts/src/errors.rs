use core::fmt::Display;
use std::error::Error;

macro_rules! define_errors {
    ($(($err_name: ident, $err_descr: expr)),+) => {
        $(
            #[doc = $err_descr]
            #[derive(Debug,Clone, PartialEq)]
            pub struct $err_name(
                #[doc = "Error message associated with "]
                #[doc = stringify!($err_name)]
                #[doc = " error type."]
                pub String,
            );

            impl Display for $err_name {
                fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl Error for $err_name {}

            impl From<String> for $err_name {
                fn from(value: String) -> Self {
                    $err_name(value)
                }
            }
        )+
    }
}

define_errors!(
    (SetupError, "Occurs during setup of a new advection run"),
    (CalcError, "General Calculation Error"),
    (
        DecomposeError,
        "Error during decomposition of the spatial domain into multiple subdomains"
    ),
    (
        IndexError,
        "Can occur internally when information is not present at expected place"
    ),
    (
        CommunicationError,
        "Error which occurs during sending, receiving or transmitting information between domains"
    ),
    (BoundaryError, "Can occur during boundary calculation")
);

impl From<BoundaryError> for DecomposeError {
    fn from(value: BoundaryError) -> Self {
        DecomposeError(value.0)
    }
}

impl From<CalcError> for SetupError {
    fn from(value: CalcError) -> Self {
        SetupError(format!("{}", value))
    }
}

impl From<DecomposeError> for SetupError {
    fn from(value: DecomposeError) -> Self {
        SetupError(format!("{}", value))
    }
}

/// Signal returned by a [FieldSampler](crate::FieldSampler) which could not evaluate the field.
///
/// Integrators never try to recover from these errors themselves.
/// They are handed to the caller which decides if a handoff to another domain is possible.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldError {
    /// The queried position is not covered by the locally available data.
    OutsideDomain(String),
    /// The queried time is not covered by the locally available data.
    OutsideTime(String),
    /// The field could be sampled but the result is not usable (eg. not finite).
    Invalid(String),
}

impl FieldError {
    /// Returns `true` if another domain might be able to answer the same query.
    pub fn is_spatial(&self) -> bool {
        matches!(self, FieldError::OutsideDomain(_))
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FieldError::OutsideDomain(message) => write!(f, "outside of domain: {}", message),
            FieldError::OutsideTime(message) => write!(f, "outside of time range: {}", message),
            FieldError::Invalid(message) => write!(f, "invalid field value: {}", message),
        }
    }
}

impl Error for FieldError {}

/// For internal use: formats an error message to include a link to the bug tracker.
#[macro_export]
macro_rules! format_error_message(
    (@function) => {
        {
            fn f() {}
            let name = std::any::type_name_of_val(&f);
            name.strip_suffix("::f").unwrap_or(name)
        }
    };
    ($bug_title:expr, $error_msg:expr) => {
        {
            let title = $bug_title.replace(" ", "%20");
            let mut body = String::from($error_msg);
            body = body + &format!("%0A%0AFile: {}", file!());
            body = body + &format!("%0ALine: {}", line!());
            body = body.replace(" ", "%20");
            format!("Internal Error in function {} file {}: +++ {} +++ Please file a bug-report: \
                https://github.com/jonaspleyer/fieldline/issues/new?\
                title={}&body={}",
                $crate::format_error_message!(@function),
                file!(),
                $error_msg,
                title,
                body,
            )
        }
    };
);
