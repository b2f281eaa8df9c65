//! Plumbing shared by the drivers speaking HTTP

use bytes::Bytes;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use url::Url;

use crate::{Error, Result};

pub(crate) fn base_url(host: &str, port: u16) -> Result<Url> {
    Ok(Url::parse(&format!("http://{host}:{port}"))?)
}

/// Send `request` and collect the full response body
///
/// Non-success statuses are returned as they are, callers decide whether the body carries a
/// structured error.
pub(crate) async fn send(
    request: RequestBuilder,
    method: Method,
    url: &Url,
) -> Result<(StatusCode, Bytes)> {
    let resp = request
        .send()
        .await
        .map_err(|src| Error::request_send(method, url.as_str(), src))?;
    let status = resp.status();
    let body = resp.bytes().await.map_err(Error::Bytes)?;
    Ok((status, body))
}

/// Turn a non-success status into an [`Error::ApiError`]
pub(crate) fn ensure_success(status: StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::ApiError {
            code: status,
            message: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

/// The first cell of `row` that reads as a number, JSON numbers and numeric strings both count
pub(crate) fn first_number<'a>(row: impl IntoIterator<Item = &'a Value>) -> Option<f64> {
    row.into_iter().find_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}
