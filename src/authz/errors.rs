use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to parse {format} rule file: {message}")]
    #[diagnostic(
        code(perihelion::authz::parse),
        help("The rule file must map principal ids to {{roles, permissions}} — see the deployment docs for the format selected by the file suffix")
    )]
    Parse { format: &'static str, message: String },

    #[error("Watch error on `{path}`: {message}")]
    #[diagnostic(code(perihelion::authz::watch))]
    Watch { path: String, message: String },

    #[error("I/O error: {0}")]
    #[diagnostic(code(perihelion::authz::io))]
    Io(#[from] std::io::Error),
}
