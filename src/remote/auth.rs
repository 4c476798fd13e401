//! HTTP authentication helpers for wiring the bearer credential into the
//! underlying `reqwest` client builder.

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

pub(crate) fn build_auth_headers(access_token: &str) -> Result<HeaderMap> {
    let token = access_token.trim();
    if token.is_empty() {
        bail!("access token cannot be empty");
    }

    let mut headers = HeaderMap::new();
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .context("failed to build Authorization header")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
