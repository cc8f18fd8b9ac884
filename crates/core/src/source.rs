//! HTTP client for one Cachet-style status aggregator.

use reqwest::redirect::Policy;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::model::{Resource, StatusKind};

/// Path of the component listing, relative to the source base URL.
pub const COMPONENTS_PATH: &str = "api/v1/components";

/// Upper bound on followed `next_page` links per fetch.
const MAX_PAGES: usize = 50;

const TOKEN_HEADER: &str = "X-Cachet-Token";

const MAX_REDIRECTS: usize = 10;

/// Failure to fetch one source. Non-fatal at registry level.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Base URL or `next_page` link is unusable.
    #[error("invalid source url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// No response within `timeout_ms`.
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL.
        url: String,
    },
    /// Connection or transport failure.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Requested URL.
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx response.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// Body is not a component listing.
    #[error("failed to parse response from {url}: {source}")]
    Parse {
        /// Requested URL.
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    fn from_reqwest(url: &Url, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ComponentsPage {
    #[serde(default)]
    data: Vec<Component>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Component {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status_name: Option<String>,
    /// Numeric code, sometimes encoded as a string.
    #[serde(default)]
    status: Option<Value>,
}

impl Component {
    fn status_kind(&self) -> StatusKind {
        if let Some(label) = &self.status_name {
            let kind = StatusKind::from_label(label);
            if kind != StatusKind::Unknown {
                return kind;
            }
        }
        match &self.status {
            Some(Value::Number(n)) => n.as_i64().map(StatusKind::from_code).unwrap_or_default(),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(StatusKind::from_code)
                .unwrap_or_else(|_| StatusKind::from_label(s)),
            _ => StatusKind::Unknown,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next_page: Option<String>,
}

impl ComponentsPage {
    fn next_page(&self) -> Option<&str> {
        self.meta
            .as_ref()?
            .pagination
            .as_ref()?
            .links
            .as_ref()?
            .next_page
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

/// Parses one page of the component listing into resources.
///
/// Entries without a name are skipped; unknown fields are ignored.
pub fn parse_components(body: &[u8]) -> Result<Vec<Resource>, serde_json::Error> {
    let page: ComponentsPage = serde_json::from_slice(body)?;
    Ok(page_resources(&page))
}

fn page_resources(page: &ComponentsPage) -> Vec<Resource> {
    page.data
        .iter()
        .filter_map(|c| {
            let name = c.name.as_deref()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(Resource::new(name, c.status_kind()))
        })
        .collect()
}

/// Builds `{base_url}/api/v1/components`, tolerating a trailing slash.
pub fn components_url(base_url: &str) -> Result<Url, FetchError> {
    let raw = format!("{}/{COMPONENTS_PATH}", base_url.trim().trim_end_matches('/'));
    let url = Url::parse(&raw).map_err(|e| FetchError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidUrl {
            url: base_url.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

/// Follows redirects only within the origin the request started on, so the
/// token header never reaches another host.
fn same_origin_redirects() -> Policy {
    Policy::custom(|attempt| {
        let Some(first) = attempt.previous().first() else {
            return attempt.follow();
        };
        if attempt.url().origin() != first.origin() {
            attempt.stop()
        } else if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

/// Fetches status snapshots from one configured source.
#[derive(Debug, Clone)]
pub struct SourceClient {
    config: SourceConfig,
    endpoint: Url,
    client: reqwest::Client,
}

impl SourceClient {
    /// Validates the base URL and builds the HTTP client.
    pub fn new(config: SourceConfig) -> Result<Self, FetchError> {
        let endpoint = components_url(&config.base_url)?;
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("cachet-gate/", env!("CARGO_PKG_VERSION")))
            .redirect(same_origin_redirects());
        if config.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// Configured base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Configuration this client was built from.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Fetches every component page and returns the reported resources.
    ///
    /// Any network, timeout, HTTP status or parse failure fails the whole fetch;
    /// the registry decides what to do with the source's previous resources.
    pub async fn fetch_snapshot(&self) -> Result<Vec<Resource>, FetchError> {
        let mut resources = Vec::new();
        let mut url = self.endpoint.clone();

        for page_no in 1..=MAX_PAGES {
            let page = self.fetch_page(&url).await?;
            resources.extend(page_resources(&page));

            let Some(next) = page.next_page() else {
                break;
            };
            let next = url.join(next).map_err(|e| FetchError::InvalidUrl {
                url: next.to_string(),
                reason: e.to_string(),
            })?;
            if next == url {
                break;
            }
            if next.origin() != self.endpoint.origin() {
                warn!(source = %self.endpoint, next = %next, "ignoring off-origin next_page link");
                break;
            }
            if page_no == MAX_PAGES {
                warn!(source = %self.endpoint, max_pages = MAX_PAGES, "pagination truncated");
            }
            url = next;
        }

        debug!(source = %self.endpoint, count = resources.len(), "fetched components");
        Ok(resources)
    }

    async fn fetch_page(&self, url: &Url) -> Result<ComponentsPage, FetchError> {
        let mut req = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = self.config.auth_token.as_deref().filter(|t| !t.is_empty()) {
            req = req.header(TOKEN_HEADER, token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Parse {
            url: url.to_string(),
            source,
        })
    }
}

/// One-shot fetch for callers that do not keep a client around.
pub async fn fetch_snapshot(config: &SourceConfig) -> Result<Vec<Resource>, FetchError> {
    SourceClient::new(config.clone())?.fetch_snapshot().await
}
