//! Convenience result type alias for SpaceLink.

use crate::error::AppError;

/// A specialized `Result` type for SpaceLink application code.
pub type AppResult<T> = Result<T, AppError>;
