use http::{Request, Response};
use kube::{Client, client::Body};
use std::sync::{Arc, Mutex};
use tower_test::mock::{self, Handle};

use crate::client::ApiClient;

pub type ApiHandle = Handle<Request<Body>, Response<Body>>;

/// A kube client whose API server is the returned handle.
pub fn mock_client() -> (Client, ApiHandle) {
    let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(mock_service, "default"), handle)
}

pub fn api_client(client: Client, max_attempts: u32) -> ApiClient {
    ApiClient::with_client(client, "default", max_attempts)
}

/// Answers every request from `routes` and records what was asked. A route
/// ending in `/` or carrying a `?` matches by prefix, anything else matches
/// the exact path; unrouted requests get a 404 status.
pub fn serve(
    handle: ApiHandle,
    routes: Vec<(String, serde_json::Value)>,
) -> Arc<Mutex<Vec<String>>> {
    serve_with(handle, move |request| {
        routes
            .iter()
            .find(|(route, _)| route_matches(route, request))
            .map(|(_, body)| (200, body.clone()))
            .unwrap_or((404, status_body(404)))
    })
}

fn route_matches(route: &str, request: &str) -> bool {
    if route.ends_with('/') || route.contains('?') {
        request.starts_with(route)
    } else {
        request.trim_end_matches('?') == route
    }
}

/// Fails every request with the given status code.
pub fn serve_error(handle: ApiHandle, code: u16) -> Arc<Mutex<Vec<String>>> {
    serve_with(handle, move |_| (code, status_body(code)))
}

fn serve_with(
    mut handle: ApiHandle,
    respond: impl Fn(&str) -> (u16, serde_json::Value) + Send + 'static,
) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let requests = seen.clone();
    tokio::spawn(async move {
        while let Some((request, send)) = handle.next_request().await {
            let asked = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_default();
            requests.lock().unwrap().push(asked.clone());

            let (code, body) = respond(&asked);
            send.send_response(
                Response::builder()
                    .status(code)
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            );
        }
    });
    seen
}

/// A `Status` answer the kube client maps back to an API error (404 becomes
/// "not found", which `get_opt` turns into `None`).
fn status_body(code: u16) -> serde_json::Value {
    let reason = if code == 404 { "NotFound" } else { "InternalError" };
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "mock answer",
        "reason": reason,
        "code": code,
    })
}

pub fn endpoints_list(items: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "kind": "EndpointsList",
        "apiVersion": "v1",
        "metadata": {},
        "items": items,
    })
}
