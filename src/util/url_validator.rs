use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating the remote API base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP is only accepted for loopback hosts.
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    Insecure,
    /// The URL cannot serve as a base for relative paths (e.g. `mailto:`).
    #[error("URL cannot be used as a base")]
    CannotBeABase,
}

/// Validates the base URL every remote call is built from.
///
/// The session cookie and anti-forgery token travel with every request, so
/// the base must be HTTPS. Plain HTTP is accepted only for loopback hosts,
/// which is what the mock servers in tests bind to.
///
/// # Examples
///
/// ```
/// use feedblock::util::validate_base_url;
///
/// assert!(validate_base_url("https://www.zhihu.com").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// assert!(validate_base_url("http://www.zhihu.com").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_loopback_host(&url) {
                tracing::error!(base_url = %url, "Rejecting non-HTTPS base URL");
                return Err(UrlValidationError::Insecure);
            }
            tracing::warn!(base_url = %url, "Using non-HTTPS base URL (localhost only)");
        }
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.cannot_be_a_base() {
        return Err(UrlValidationError::CannotBeABase);
    }

    // Endpoints are appended as path segments; a trailing empty segment
    // would otherwise produce `//api/...`.
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
    }

    Ok(url)
}

fn is_loopback_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }

    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
