use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum UrlValidationError {
    #[error("URL is required")]
    Empty,
    #[error("unsupported scheme {0:?}, only http and https are allowed")]
    UnsupportedScheme(String),
    #[error("URL must contain a host")]
    MissingHost,
    #[error("malformed URL: {0}")]
    Malformed(#[from] url::ParseError),
}

/// Checks that `input` is an absolute http(s) URL with a host and returns
/// it trimmed. The returned string is what gets stored, not the
/// normalized form, so resolving yields back what the user typed.
pub fn validate_url(input: &str) -> Result<&str, UrlValidationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = Url::parse(input)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(
            url.scheme().to_string(),
        ));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(input),
        _ => Err(UrlValidationError::MissingHost),
    }
}
