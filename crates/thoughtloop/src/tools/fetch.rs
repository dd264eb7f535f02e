use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0";
const TIMEOUT: Duration = Duration::from_secs(10);

/// The error type for [`FetchContext::fetch`].
#[derive(Debug)]
pub enum FetchError {
    /// The URL is not an absolute http(s) URL.
    InvalidUrl(String),
    /// The robots policy of the origin forbids this path.
    Disallowed(String),
    /// The request failed or returned an error status.
    Http(reqwest::Error),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            FetchError::Disallowed(url) => {
                write!(f, "{url} is disallowed by robots.txt")
            }
            FetchError::Http(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Shared state for polite outbound requests.
///
/// All requests share one minimum-interval gate, and each origin's
/// `robots.txt` is fetched once and cached for the lifetime of the context.
/// The last request time and the policy cache are guarded by a single mutex;
/// the page request itself runs outside of it.
///
/// Cloning is cheap, all clones share the same state.
#[derive(Clone)]
pub struct FetchContext {
    client: Client,
    min_interval: Duration,
    state: Arc<Mutex<FetchState>>,
}

#[derive(Default)]
struct FetchState {
    last_request: Option<Instant>,
    policies: HashMap<String, RobotsPolicy>,
}

impl FetchContext {
    /// Creates a context waiting at least `min_interval` between requests.
    pub fn new(min_interval: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self {
            client,
            min_interval,
            state: Default::default(),
        })
    }

    /// Fetches `url` and returns the response body as text.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let url = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_owned()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        {
            let mut state = self.state.lock().await;
            let origin = url.origin().ascii_serialization();
            if !state.policies.contains_key(&origin) {
                self.wait_for_slot(&mut state).await;
                let policy = self.fetch_policy(&url).await;
                state.policies.insert(origin.clone(), policy);
            }
            let allowed = state
                .policies
                .get(&origin)
                .is_none_or(|policy| policy.allows(url.path()));
            if !allowed {
                info!("robots.txt disallows {url}");
                return Err(FetchError::Disallowed(url.to_string()));
            }
            self.wait_for_slot(&mut state).await;
        }

        debug!("fetching {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(FetchError::Http)?;
        resp.text().await.map_err(FetchError::Http)
    }

    /// Waits until the gate opens and records a request.
    async fn wait_for_slot(&self, state: &mut FetchState) {
        if let Some(last_request) = state.last_request {
            let next = last_request + self.min_interval;
            if next > Instant::now() {
                trace!("throttling outbound request");
                sleep_until(next).await;
            }
        }
        state.last_request = Some(Instant::now());
    }

    async fn fetch_policy(&self, url: &Url) -> RobotsPolicy {
        let Ok(robots_url) = url.join("/robots.txt") else {
            return RobotsPolicy::default();
        };
        let resp = match self.client.get(robots_url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                debug!("robots.txt unavailable: {err}");
                return RobotsPolicy::default();
            }
        };
        if resp.status() != StatusCode::OK {
            return RobotsPolicy::default();
        }
        match resp.text().await {
            Ok(text) => RobotsPolicy::parse(&text),
            Err(_) => RobotsPolicy::default(),
        }
    }
}

/// The rules of a `robots.txt` that apply to every user agent (`*`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RobotsPolicy {
    // (allow, path prefix)
    rules: Vec<(bool, String)>,
}

impl RobotsPolicy {
    fn parse(text: &str) -> Self {
        let mut rules = vec![];
        let mut in_group = false;
        let mut group_has_rules = false;
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match field.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if group_has_rules {
                        in_group = false;
                        group_has_rules = false;
                    }
                    in_group |= value == "*";
                }
                "allow" | "disallow" => {
                    group_has_rules = true;
                    if in_group && !value.is_empty() {
                        let allow = field.trim().eq_ignore_ascii_case("allow");
                        rules.push((allow, value.to_owned()));
                    }
                }
                _ => {}
            }
        }
        Self { rules }
    }

    /// The longest matching rule wins, `Allow` wins ties.
    fn allows(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for (allow, prefix) in &self.rules {
            if !path.starts_with(prefix.as_str()) {
                continue;
            }
            let better = match best {
                None => true,
                Some((len, best_allow)) => {
                    prefix.len() > len || (prefix.len() == len && *allow && !best_allow)
                }
            };
            if better {
                best = Some((prefix.len(), *allow));
            }
        }
        best.is_none_or(|(_, allow)| allow)
    }
}
