use miette::Diagnostic;
use thiserror::Error;

/// Faults that abort startup. Per-request faults never take this shape —
/// they are absorbed at the gate boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum GateError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(perihelion::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(perihelion::config))]
    Config(#[from] config::ConfigError),
}
