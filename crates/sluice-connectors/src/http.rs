//! Blocking HTTP plumbing shared by the search and JSON readers.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use sluice_core::{ReaderError, Result, UpstreamExt, Value};

pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .upstream()
}

/// Turn a non-success response into [`ReaderError::Status`].
pub(crate) fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().unwrap_or_default();
    Err(ReaderError::Status {
        url,
        status: status.as_u16(),
        body,
    })
}

/// Check the status and decode the body as JSON.
pub(crate) fn json_body(response: Response) -> Result<Value> {
    check_status(response)?.json::<Value>().upstream()
}
