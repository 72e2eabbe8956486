//! Request-context middleware: stamps every request with an id that flows
//! into the response envelope and job `_metadata`.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::common::RequestId;

pub async fn request_context(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::generate();
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(header) = HeaderValue::from_str(&request_id.0) {
        response.headers_mut().insert("x-request-id", header);
    }
    response
}
