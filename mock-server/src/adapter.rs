//! Serve an axum `Router` as a `ServerHandler`.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`; the
//! descriptor's URL (path and query) becomes the request URI. Response header
//! names come back lowercase from `http`, so they are title-cased
//! (`set-cookie` → `Set-Cookie`) to match what clients look up.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use planner_core::http::{status, RequestDescriptor, ResponseDescriptor};
use planner_core::types::failure_body;
use planner_core::ServerHandler;
use tower::ServiceExt;
use tracing::{debug, warn};

pub struct RouterHandler {
    name: &'static str,
    router: Router,
}

impl RouterHandler {
    pub fn new(name: &'static str, router: Router) -> Self {
        Self { name, router }
    }
}

#[async_trait]
impl ServerHandler for RouterHandler {
    async fn handle_request(&self, request: RequestDescriptor) -> ResponseDescriptor {
        debug!(server = self.name, method = %request.method, url = %request.url, "processing request");
        let http_request = match to_http(&request) {
            Ok(http_request) => http_request,
            Err(e) => {
                warn!(server = self.name, url = %request.url, error = %e, "malformed request");
                return ResponseDescriptor::new(status::BAD_REQUEST, Vec::new(), failure_body("Invalid request data"));
            }
        };

        let response = match self.router.clone().oneshot(http_request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        from_http(self.name, response).await
    }
}

fn to_http(request: &RequestDescriptor) -> Result<Request<String>, axum::http::Error> {
    let mut builder = Request::builder()
        .method(request.method.as_str())
        .uri(request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(request.body.clone().unwrap_or_default())
}

async fn from_http(server: &str, response: Response<Body>) -> ResponseDescriptor {
    let (parts, body) = response.into_parts();
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| Some((title_case(name.as_str()), value.to_str().ok()?.to_string())))
        .collect();
    let body = match body.collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(e) => {
            warn!(server, error = %e, "failed to read response body");
            return ResponseDescriptor::new(status::INTERNAL_ERROR, Vec::new(), failure_body("Internal server error"));
        }
    };
    debug!(server, status = parts.status.as_u16(), "response ready");
    ResponseDescriptor::new(parts.status.as_u16(), headers, body)
}

/// `set-cookie` → `Set-Cookie`.
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use planner_core::HttpMethod;
    use tokio::time::Instant;

    fn descriptor(url: &str) -> RequestDescriptor {
        RequestDescriptor {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: [("UserId".to_string(), "u-1".to_string())].into_iter().collect(),
            body: None,
            issued_at: Instant::now(),
        }
    }

    #[test]
    fn header_names_are_title_cased() {
        assert_eq!(title_case("set-cookie"), "Set-Cookie");
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("x"), "X");
    }

    #[tokio::test]
    async fn path_query_and_headers_reach_the_router() {
        let router = Router::new().route(
            "/api/echo",
            get(|uri: axum::http::Uri, headers: axum::http::HeaderMap| async move {
                let user = headers.get("userid").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                ([("x-seen", "yes")], format!("{}|{user}", uri.query().unwrap_or("")))
            }),
        );
        let handler = RouterHandler::new("echo", router);
        let response = handler.handle_request(descriptor("/api/echo?search=lab")).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.body, "search=lab|u-1");
        assert_eq!(response.header("X-Seen"), Some("yes"));
    }

    #[tokio::test]
    async fn invalid_header_value_is_a_bad_request() {
        let mut request = descriptor("/api/echo");
        request.headers.insert("Bad".into(), "line\nbreak".into());
        let handler = RouterHandler::new("echo", Router::new());
        let response = handler.handle_request(request).await;
        assert_eq!(response.status, 400);
    }
}
