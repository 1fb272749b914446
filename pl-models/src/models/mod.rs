//! Entity models.
//!
//! Each model maps one table row and carries its own finders and
//! persistence methods; multi-row reads that the scanner needs live in
//! [`crate::queries`].

pub mod category;
pub mod conversation;
pub mod destruction;
pub mod message;
pub mod user;

/// Convert a rusqlite error into the crate error type.
pub(crate) fn db_err(e: rusqlite::Error) -> pl_core::PlError {
    pl_core::PlError::Database(e.to_string())
}
