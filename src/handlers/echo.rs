//! Echo handler

use async_trait::async_trait;
use http::StatusCode;

use crate::error::HandlerError;
use crate::http::{Handler, Request, Response};

/// Answers with the request body unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, request: &Request) -> Result<Response, HandlerError> {
        let body = request.body().cloned().unwrap_or_default();
        let content_type = request
            .headers()
            .get("content-type")
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(Response::new(StatusCode::OK, body).with_header("Content-Type", content_type))
    }
}
