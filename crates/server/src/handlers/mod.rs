//! HTTP request handlers.

pub mod api;
pub mod files;

pub use api::*;
pub use files::*;

use crate::error::ApiError;
use serde::Deserialize;

/// Query parameters shared by the file endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct FileParams {
    pub filename: Option<String>,
    pub remove: Option<String>,
    pub redirect: Option<String>,
}

impl FileParams {
    /// The `filename` parameter, if present and non-empty.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref().filter(|f| !f.is_empty())
    }

    /// `redirect=true`: answer a miss with a redirect instead of fetching.
    pub fn wants_redirect(&self) -> bool {
        self.redirect.as_deref() == Some("true")
    }

    /// `remove=true`: delete a misnamed file instead of renaming it.
    pub fn wants_remove(&self) -> bool {
        self.remove.as_deref() == Some("true")
    }
}

/// Fallback for paths outside the internal API.
pub async fn access_deny() -> ApiError {
    ApiError::Forbidden("access deny".to_string())
}
