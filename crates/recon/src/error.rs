use std::fmt;

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (threshold out of range, bad window, etc.).
    ConfigValidation(String),
    /// A tier or identity weight names a field outside the known vocabulary.
    UnknownField { section: String, field: String },
    /// Collector payload could not be read at all (not valid JSON / CSV).
    InputParse(String),
    /// IO error (file read, etc.).
    Io(String),
    /// The run was aborted through its cancellation handle.
    Cancelled,
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnknownField { section, field } => {
                write!(f, "{section}: unknown field '{field}'")
            }
            Self::InputParse(msg) => write!(f, "input parse error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Cancelled => write!(f, "reconciliation run cancelled"),
        }
    }
}

impl std::error::Error for ReconError {}
