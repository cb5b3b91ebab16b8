//! HTTP requests proxied on behalf of plugins

use super::BrokerError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use std::collections::BTreeMap;
use unihub_plugin_api::{HttpRequest, HttpResponse};

pub(crate) async fn request(
    client: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, BrokerError> {
    let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| BrokerError::InvalidRequest(format!("invalid method: {}", request.method)))?;

    let url = reqwest::Url::parse(&request.url)
        .map_err(|e| BrokerError::InvalidRequest(format!("invalid url '{}': {}", request.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(BrokerError::InvalidRequest(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }

    let mut builder = client.request(method, url);
    let mut has_content_type = false;
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BrokerError::InvalidRequest(format!("invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| BrokerError::InvalidRequest(format!("invalid value for header {}", name)))?;
        has_content_type |= name == CONTENT_TYPE;
        builder = builder.header(name, value);
    }

    match request.body {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::String(text)) => builder = builder.body(text),
        Some(value) => {
            if !has_content_type {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(serde_json::to_string(&value)?);
        }
    }

    let response = builder.send().await.map_err(describe_error)?;

    let status = response.status();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    let is_image = content_type.starts_with("image/");
    let body = if is_image {
        let bytes = response.bytes().await.map_err(describe_error)?;
        format!("data:{};base64,{}", content_type, BASE64.encode(&bytes))
    } else {
        response.text().await.map_err(describe_error)?
    };

    Ok(HttpResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
        is_image,
    })
}

fn describe_error(e: reqwest::Error) -> BrokerError {
    let kind = if e.is_timeout() {
        "request timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_decode() || e.is_body() {
        "failed to read response body"
    } else {
        "request failed"
    };
    BrokerError::Http(format!("{}: {}", kind, e))
}
