//! Request parameter extraction
//!
//! Fills an [`idp_auth::ParamMap`] from the method-appropriate source:
//! query string for GET/HEAD, form body (urlencoded or multipart) for
//! mutating methods. Consumes the request body in the process.

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{Method, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use idp_auth::{ParamMap, UploadedFile};

/// Maximum accepted request body.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Build the parameter map for a request, consuming its body.
///
/// An unreadable or oversized body is the caller's error and yields a
/// 400 response.
pub async fn extract_params(request: Request) -> Result<ParamMap, Response> {
    if matches!(*request.method(), Method::GET | Method::HEAD) {
        return Ok(ParamMap::from_query(request.uri().query()));
    }

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();

    if content_type.starts_with("multipart/form-data") {
        return extract_multipart(request).await;
    }

    let body = axum::body::to_bytes(request.into_body(), BODY_LIMIT)
        .await
        .map_err(|e| {
            debug!(error = %e, "request body unreadable");
            bad_request("unreadable request body")
        })?;
    Ok(ParamMap::from_urlencoded(&body))
}

async fn extract_multipart(request: Request) -> Result<ParamMap, Response> {
    let mut multipart = Multipart::from_request(request, &()).await.map_err(|e| {
        debug!(error = %e, "multipart body rejected");
        bad_request("malformed multipart body")
    })?;

    let mut map = ParamMap::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        debug!(error = %e, "multipart field unreadable");
        bad_request("malformed multipart field")
    })? {
        let name = match field.name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        if field.file_name().is_some() {
            let filename = field.file_name().map(str::to_owned);
            let content_type = field.content_type().map(str::to_owned);
            let data = field
                .bytes()
                .await
                .map_err(|e| {
                    debug!(error = %e, "multipart file unreadable");
                    bad_request("malformed multipart field")
                })?
                .to_vec();
            map.add_file(
                name,
                UploadedFile {
                    filename,
                    content_type,
                    data,
                },
            );
        } else {
            let text = field.text().await.map_err(|e| {
                debug!(error = %e, "multipart value unreadable");
                bad_request("malformed multipart field")
            })?;
            map.insert(name, text);
        }
    }
    Ok(map)
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}
