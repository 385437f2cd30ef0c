use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    Client, Response,
};

/// Builds the HTTP client shared by every remote service.
///
/// # Errors
///
/// Returns an error if the client cannot be built, which only happens if the TLS backend fails to
/// initialize.
pub fn reqwest_client() -> Result<Client> {
    let builder = Client::builder().gzip(true);

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("sm-tools version {}", super::VERSION))?,
    );
    Ok(builder.default_headers(headers).build()?)
}

/// A header value which will not show up in debug output.
pub(crate) fn sensitive(value: &str) -> Result<HeaderValue> {
    let mut val = HeaderValue::from_str(value)?;
    val.set_sensitive(true);
    Ok(val)
}

/// Passes a 2xx response through. Anything else becomes an error with the status and body,
/// prefixed by `failure`.
pub(crate) async fn check(resp: Response, failure: &str) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("{failure}: {status}: {}", body.trim()))
}
