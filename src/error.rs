//! Crate-wide error types.
//!
//! Each subsystem (dispatcher, COS, roles, views, notify) owns its own error
//! enum; [`VasError`] aggregates them for callers that cross module
//! boundaries (e.g. the roles cache calling into the dispatcher for a
//! specifier lookup).

use thiserror::Error;

use crate::cos::CosError;
use crate::dispatcher::DispatcherError;
use crate::notify::NotifyError;
use crate::roles::RolesError;
use crate::views::ViewsError;

/// Top-level error type for the virtual attribute subsystem.
#[derive(Error, Debug)]
pub enum VasError {
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    #[error(transparent)]
    Cos(#[from] CosError),

    #[error(transparent)]
    Roles(#[from] RolesError),

    #[error(transparent)]
    Views(#[from] ViewsError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("filter parse error: {0}")]
    FilterParse(String),
}

pub type Result<T> = std::result::Result<T, VasError>;
