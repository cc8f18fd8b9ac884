//! Shared helpers: a mock status aggregator served by axum.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use cachet_gate_core::SourceConfig;

pub const NORMAL: &str = include_str!("../fixtures/components.json");
pub const BREW_OUTAGE: &str = include_str!("../fixtures/components-brew-outage.json");

/// Context path the mock serves under, like a reverse-proxied Cachet.
pub const CONTEXT: &str = "/cachet";
pub const COMPONENTS: &str = "/cachet/api/v1/components";

pub const FIXTURE_NAMES: [&str; 11] = [
    "brew",
    "ci-rhos",
    "covscan",
    "dummy",
    "errata",
    "gerrit.host.prod.eng.bos.redhat.com",
    "polarion",
    "rdo-cloud",
    "rpmdiff",
    "umb",
    "zabbix-sysops",
];

#[derive(Clone)]
pub struct Canned {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
    /// Sent as the `Location` header.
    pub location: Option<String>,
}

impl Canned {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            delay: Duration::ZERO,
            location: None,
        }
    }

    pub fn redirect(to: &str) -> Self {
        Self {
            status: 302,
            body: String::new(),
            delay: Duration::ZERO,
            location: Some(to.to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    routes: HashMap<String, Canned>,
    last_token: Option<String>,
    hits: usize,
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockSource {
    pub base_url: String,
    state: Shared,
}

impl MockSource {
    /// Starts a server answering the component listing with `body`.
    pub async fn start(body: &str) -> Self {
        let state: Shared = Arc::default();
        state
            .lock()
            .unwrap()
            .routes
            .insert(COMPONENTS.to_string(), Canned::ok(body));

        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}{CONTEXT}"),
            state,
        }
    }

    pub fn config(&self) -> SourceConfig {
        SourceConfig::new(self.base_url.clone())
    }

    pub fn url_for(&self, path: &str) -> String {
        let origin = self.base_url.trim_end_matches(CONTEXT);
        format!("{origin}{path}")
    }

    pub fn respond(&self, path: &str, canned: Canned) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), canned);
    }

    /// Swaps the component listing body (200 OK).
    pub fn respond_with(&self, body: &str) {
        self.respond(COMPONENTS, Canned::ok(body));
    }

    pub fn respond_status(&self, status: u16) {
        self.respond(
            COMPONENTS,
            Canned {
                status,
                body: r#"{"message":"error"}"#.to_string(),
                delay: Duration::ZERO,
                location: None,
            },
        );
    }

    pub fn hits(&self) -> usize {
        self.state.lock().unwrap().hits
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.lock().unwrap().last_token.clone()
    }
}

async fn handle(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    let canned = {
        let mut s = state.lock().unwrap();
        s.hits += 1;
        s.last_token = headers
            .get("x-cachet-token")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        s.routes.get(uri.path()).cloned()
    };
    let Some(canned) = canned else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !canned.delay.is_zero() {
        tokio::time::sleep(canned.delay).await;
    }
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().unwrap());
    if let Some(location) = &canned.location {
        headers.insert("location", location.parse().unwrap());
    }
    (
        StatusCode::from_u16(canned.status).unwrap(),
        headers,
        canned.body,
    )
        .into_response()
}

/// Components document with one page of `(name, status_name)` entries.
pub fn components(entries: &[(&str, &str)], next_page: Option<&str>) -> String {
    let data: Vec<_> = entries
        .iter()
        .enumerate()
        .map(|(i, (name, label))| {
            serde_json::json!({ "id": i + 1, "name": name, "status_name": label })
        })
        .collect();
    serde_json::json!({
        "meta": { "pagination": { "links": { "next_page": next_page } } },
        "data": data,
    })
    .to_string()
}
