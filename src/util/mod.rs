//! Utility functions for common operations.
//!
//! - **URL validation**: the remote API base must be HTTPS (loopback excepted)
//! - **Text cleanup**: page-supplied names are normalized before display

mod text;
mod url_validator;

pub use text::clean_display_text;
pub use url_validator::{validate_base_url, UrlValidationError};
