//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the dashboard pipeline uses
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("misuse: {0}")]
    Misuse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self { CollaboratorError::Http(e.to_string()) }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(e: serde_json::Error) -> Self { CollaboratorError::Parse(e.to_string()) }
}

impl From<url::ParseError> for CollaboratorError {
    fn from(e: url::ParseError) -> Self { CollaboratorError::Config(e.to_string()) }
}
