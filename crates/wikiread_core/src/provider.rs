use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::config::{
    ENV_CLIENT_ID, ENV_CLIENT_SECRET, EnvLookup, ReaderConfig, debug_enabled, process_env,
};
use crate::endpoint::Endpoint;
use crate::error::{ProviderError, reason_phrase};
use crate::store::NewCredential;

pub const DEFAULT_TITLE_LIMIT: u32 = 5;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub auth_url: String,
    pub random_url: String,
    pub user_agent: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub debug: bool,
}

impl ProviderConfig {
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self::from_config_with_env(config, &process_env)
    }

    pub fn from_config_with_env(config: &ReaderConfig, env: EnvLookup) -> Self {
        Self {
            api_url: config.api_url(env),
            auth_url: config.auth_url(env),
            random_url: config.random_url(env),
            user_agent: config.user_agent(env),
            client_id: env(ENV_CLIENT_ID),
            client_secret: env(ENV_CLIENT_SECRET),
            debug: debug_enabled(env),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Decoded OAuth2 token response. `expires_at` is stamped when the body is
/// decoded, not read from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    pub expires_at: i64,
}

impl AccessTokenResponse {
    fn from_payload(payload: TokenPayload, now_unix: i64) -> Self {
        let expires_in = i64::try_from(payload.expires_in).unwrap_or(i64::MAX);
        Self {
            access_token: payload.access_token,
            token_type: payload.token_type,
            expires_in: payload.expires_in,
            refresh_token: payload.refresh_token.unwrap_or_default(),
            expires_at: now_unix.saturating_add(expires_in),
        }
    }

    pub fn is_bearer(&self) -> bool {
        self.token_type.eq_ignore_ascii_case("bearer")
    }

    pub fn into_credential(self) -> NewCredential {
        NewCredential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub search_terms: Vec<String>,
    /// Upstream accepts 1..=100; not validated here.
    pub limit: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            search_terms: Vec::new(),
            limit: DEFAULT_TITLE_LIMIT,
        }
    }
}

impl SearchParams {
    pub fn new(search_terms: &[String], limit: u32) -> Self {
        Self {
            search_terms: search_terms.to_vec(),
            limit,
        }
    }

    /// The `q` value: terms joined by `+` in input order.
    pub fn query(&self) -> String {
        self.search_terms.join("+")
    }

    pub fn as_query(&self) -> [(&'static str, String); 2] {
        [("q", self.query()), ("limit", self.limit.to_string())]
    }
}

/// One search hit. Fields the client does not model are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SearchPage {
    pub id: i64,
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub matched_title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SearchPage {
    /// Excerpt with the `<span class="searchmatch">` highlight markup removed.
    ///
    /// Only the entities search excerpts carry (`&quot;`, `&#039;`, `&lt;`,
    /// `&gt;`, `&amp;`) are decoded; any other entity is left as written.
    pub fn plain_excerpt(&self) -> Option<String> {
        let excerpt = self.excerpt.as_deref()?;
        let mut output = String::with_capacity(excerpt.len());
        let mut in_tag = false;
        for ch in excerpt.chars() {
            match ch {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                _ if !in_tag => output.push(ch),
                _ => {}
            }
        }
        let output = output
            .replace("&quot;", "\"")
            .replace("&#039;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&");
        let trimmed = output.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    pages: Vec<SearchPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub status: u16,
    pub pages: Vec<SearchPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLocation {
    pub status: u16,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageRevision {
    pub id: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageLicense {
    pub url: String,
    pub title: String,
}

/// Page source as returned by `page/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Page {
    pub id: i64,
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub latest: Option<PageRevision>,
    #[serde(default)]
    pub content_model: Option<String>,
    #[serde(default)]
    pub license: Option<PageLicense>,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseBody {
    Token,
    Search,
    Page,
}

pub trait WikipediaApi {
    fn get_access_token(&self) -> Result<AccessTokenResponse, ProviderError>;
    fn search_articles(&self, terms: &[String], limit: u32)
    -> Result<SearchResults, ProviderError>;
    fn search_titles(&self, terms: &[String], limit: u32) -> Result<SearchResults, ProviderError>;
    fn get_random_article(&self) -> Result<ResolvedLocation, ProviderError>;
    fn get_page(&self, key: &str) -> Result<Page, ProviderError>;
    fn get_page_html(&self, key: &str) -> Result<String, ProviderError>;
}

pub struct WikipediaProvider {
    config: ProviderConfig,
    token: Option<String>,
}

impl WikipediaProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Client id and secret from the environment captured in the config.
    pub fn load_credentials(&self) -> Result<ClientCredentials, ProviderError> {
        let client_id = non_empty(self.config.client_id.as_deref());
        let client_secret = non_empty(self.config.client_secret.as_deref());
        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(ClientCredentials {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
            }),
            (None, _) => Err(ProviderError::Configuration(format!(
                "client credentials not found: {ENV_CLIENT_ID} is not set"
            ))),
            (_, None) => Err(ProviderError::Configuration(format!(
                "client credentials not found: {ENV_CLIENT_SECRET} is not set"
            ))),
        }
    }

    fn http_client(&self, follow_redirects: bool) -> Result<Client, ProviderError> {
        let policy = if follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        Client::builder()
            .user_agent(self.config.user_agent.clone())
            .redirect(policy)
            .build()
            .map_err(|error| {
                ProviderError::Configuration(format!("failed to build HTTP client: {error}"))
            })
    }

    fn endpoint_url(&self, endpoint: &Endpoint) -> Result<Url, ProviderError> {
        let segments = endpoint.segments()?;
        let mut url = parse_url(&self.config.api_url, "api_url")?;
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::Configuration(format!(
                    "api_url {} does not support path segments",
                    self.config.api_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Under DEBUG only search bodies are echoed to stderr.
    fn dumps(&self, body: ResponseBody) -> bool {
        self.config.debug && body == ResponseBody::Search
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => {
                warn!("No access token found.");
                request
            }
        }
    }

    fn search(
        &self,
        endpoint: Endpoint,
        terms: &[String],
        limit: u32,
    ) -> Result<SearchResults, ProviderError> {
        let params = SearchParams::new(terms, limit);
        let url = self.endpoint_url(&endpoint)?;
        let client = self.http_client(true)?;

        debug!("Searching Wikipedia for: {}", terms.join(","));
        let request = self
            .authorize(client.get(url.clone()))
            .query(&params.as_query());
        let response = ensure_success(send(request, url.as_str())?, url.as_str())?;
        let status = response.status().as_u16();
        let payload: SearchPayload =
            self.decode_json(response, url.as_str(), ResponseBody::Search)?;
        Ok(SearchResults {
            status,
            pages: payload.pages,
        })
    }

    fn decode_json<T: DeserializeOwned>(
        &self,
        response: Response,
        url: &str,
        body_kind: ResponseBody,
    ) -> Result<T, ProviderError> {
        let body = response.text().map_err(|source| ProviderError::Transport {
            url: url.to_string(),
            source,
        })?;
        let value: Value = serde_json::from_str(&body).map_err(|source| ProviderError::Decode {
            url: url.to_string(),
            source,
        })?;
        if self.dumps(body_kind)
            && let Ok(pretty) = serde_json::to_string_pretty(&value)
        {
            eprintln!("{pretty}");
        }
        serde_json::from_value(value).map_err(|source| ProviderError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl WikipediaApi for WikipediaProvider {
    fn get_access_token(&self) -> Result<AccessTokenResponse, ProviderError> {
        let credentials = self.load_credentials()?;
        let client = self.http_client(true)?;
        let url = self.config.auth_url.as_str();

        debug!("Authenticating client credentials");
        let request = client.post(url).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ]);
        let response = ensure_success(send(request, url)?, url)?;
        let payload: TokenPayload = self.decode_json(response, url, ResponseBody::Token)?;
        Ok(AccessTokenResponse::from_payload(payload, unix_now()))
    }

    fn search_articles(
        &self,
        terms: &[String],
        limit: u32,
    ) -> Result<SearchResults, ProviderError> {
        self.search(Endpoint::SearchPages, terms, limit)
    }

    fn search_titles(&self, terms: &[String], limit: u32) -> Result<SearchResults, ProviderError> {
        self.search(Endpoint::SearchTitles, terms, limit)
    }

    fn get_random_article(&self) -> Result<ResolvedLocation, ProviderError> {
        let base = parse_url(&self.config.random_url, "random_url")?;
        let client = self.http_client(false)?;
        let url = self.config.random_url.as_str();

        debug!("Getting a random page");
        let response = ensure_success(send(client.get(base.clone()), url)?, url)?;
        let status = response.status();
        if !status.is_redirection() {
            error!(
                "Error: {} - {} (expected a redirect)",
                status.as_u16(),
                reason_phrase(status)
            );
            return Err(ProviderError::upstream(status, url));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|value| base.join(value).ok())
            .ok_or_else(|| ProviderError::MissingRedirectTarget {
                status: status.as_u16(),
                url: url.to_string(),
            })?;

        debug!("Random page: {location}");
        Ok(ResolvedLocation {
            status: status.as_u16(),
            location: location.to_string(),
        })
    }

    fn get_page(&self, key: &str) -> Result<Page, ProviderError> {
        let url = self.endpoint_url(&Endpoint::Page {
            key: key.to_string(),
        })?;
        let client = self.http_client(true)?;

        debug!("Fetching page source for: {key}");
        let request = self.authorize(client.get(url.clone()));
        let response = ensure_success(send(request, url.as_str())?, url.as_str())?;
        self.decode_json(response, url.as_str(), ResponseBody::Page)
    }

    fn get_page_html(&self, key: &str) -> Result<String, ProviderError> {
        let url = self.endpoint_url(&Endpoint::PageHtml {
            key: key.to_string(),
        })?;
        let client = self.http_client(true)?;

        debug!("Fetching page HTML for: {key}");
        let request = self.authorize(client.get(url.clone()));
        let response = ensure_success(send(request, url.as_str())?, url.as_str())?;
        response.text().map_err(|source| ProviderError::Transport {
            url: url.to_string(),
            source,
        })
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn send(request: RequestBuilder, url: &str) -> Result<Response, ProviderError> {
    request.send().map_err(|source| ProviderError::Transport {
        url: url.to_string(),
        source,
    })
}

fn ensure_success(response: Response, url: &str) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        error!("Error: {} - {}", status.as_u16(), reason_phrase(status));
        return Err(ProviderError::upstream(status, url));
    }
    Ok(response)
}

fn parse_url(value: &str, field: &str) -> Result<Url, ProviderError> {
    Url::parse(value)
        .map_err(|error| ProviderError::Configuration(format!("invalid {field} {value}: {error}")))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
