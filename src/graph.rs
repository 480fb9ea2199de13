use std::io::Read;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::SharePointConfig;
use crate::error::MirrorError;

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const TOKEN_URL: &str = "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Refresh the cached token this long before it actually expires.
const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// A document library as reported by the Graph drive listing.
#[derive(Clone, Debug)]
pub struct DriveInfo {
    pub id: String,
    pub name: String,
    pub web_url: Option<String>,
}

/// One entry from a delta page: an upsert (file or folder) or a deletion.
#[derive(Clone, Debug, Default)]
pub struct ChangeItem {
    pub id: String,
    pub name: String,
    /// Absolute path within the drive, e.g. "/Reports/q1.pdf".
    pub path: String,
    pub is_folder: bool,
    pub is_deleted: bool,
    pub size: Option<i64>,
    pub mime_type: Option<String>,
    pub web_url: Option<String>,
    pub created_by: Option<String>,
    pub last_modified_by: Option<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub sha256_hash: Option<String>,
    pub quickxor_hash: Option<String>,
    pub download_url: Option<String>,
}

/// A fully materialized delta page. Exactly one of `next_link` /
/// `delta_link` is set on a well-formed Graph response.
#[derive(Clone, Debug, Default)]
pub struct DeltaPage {
    pub items: Vec<ChangeItem>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
}

/// What the orchestrator needs from the remote side. `GraphClient` is the
/// production implementation; tests substitute a scripted fake.
pub trait DriveSource {
    fn list_drives(&self) -> Result<Vec<DriveInfo>, MirrorError>;

    /// Fetch one page. `link` is the previous page's nextLink, a stored
    /// deltaLink, or None to start a full enumeration at the drive root.
    fn next_delta_page(&self, drive_id: &str, link: Option<&str>)
        -> Result<DeltaPage, MirrorError>;

    fn download(&self, drive_id: &str, item: &ChangeItem)
        -> Result<Box<dyn Read>, MirrorError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SiteInfo {
    pub site_id: String,
    pub site_name: Option<String>,
    pub site_url: Option<String>,
    pub drives: Vec<DriveInfo>,
}

/// Authenticated Microsoft Graph client. Tokens are acquired with the
/// client-credentials flow and cached until shortly before expiry; the
/// cache is mutex-guarded so a client can be shared across threads.
pub struct GraphClient {
    http: Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    site_hostname: String,
    site_path: String,
    token: Mutex<Option<CachedToken>>,
    site_id: Mutex<Option<String>>,
}

impl GraphClient {
    pub fn new(config: &SharePointConfig) -> Result<Self, MirrorError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MirrorError::Network(e.to_string()))?;

        Ok(GraphClient {
            http,
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            site_hostname: config.site_hostname.clone(),
            site_path: config.site_path.clone(),
            token: Mutex::new(None),
            site_id: Mutex::new(None),
        })
    }

    fn access_token(&self) -> Result<String, MirrorError> {
        let mut guard = self.token.lock().expect("token cache poisoned");

        if let Some(cached) = guard.as_ref() {
            if Instant::now() + TOKEN_SAFETY_MARGIN < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        debug!("Acquiring Graph access token");
        let url = TOKEN_URL.replace("{tenant_id}", &self.tenant_id);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "https://graph.microsoft.com/.default"),
            ])
            .send()
            .map_err(|e| MirrorError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MirrorError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| MirrorError::Auth(format!("malformed token response: {e}")))?;

        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        *guard = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    /// GET with the shared retry policy: Retry-After is honored on 429/503,
    /// other 5xx and transport errors back off exponentially (1s base, 60s
    /// cap, +/-20% jitter), five attempts total. 410 surfaces as
    /// `CursorGone`, 404 as `NotFound`, 401/403 as `Auth`.
    fn get_with_retry(&self, url: &str, authenticated: bool) -> Result<Response, MirrorError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.http.get(url);
            if authenticated {
                request = request.bearer_auth(self.access_token()?);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    match status {
                        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                            let delay = retry_after(&response)
                                .unwrap_or_else(|| backoff_delay(attempt));
                            warn!(
                                "Graph returned {status}, retrying in {:.1}s (attempt {attempt}/{MAX_ATTEMPTS})",
                                delay.as_secs_f64()
                            );
                            last_error = format!("HTTP {status}");
                            thread::sleep(delay);
                        }
                        StatusCode::GONE => return Err(MirrorError::CursorGone),
                        StatusCode::NOT_FOUND => {
                            return Err(MirrorError::NotFound(url.to_string()))
                        }
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            return Err(MirrorError::Auth(format!(
                                "Graph rejected request with {status}"
                            )))
                        }
                        s if s.is_server_error() => {
                            let delay = backoff_delay(attempt);
                            warn!(
                                "Graph returned {status}, retrying in {:.1}s (attempt {attempt}/{MAX_ATTEMPTS})",
                                delay.as_secs_f64()
                            );
                            last_error = format!("HTTP {status}");
                            thread::sleep(delay);
                        }
                        _ => {
                            let body = response.text().unwrap_or_default();
                            return Err(MirrorError::Network(format!(
                                "HTTP {status}: {body}"
                            )));
                        }
                    }
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "Request failed ({e}), retrying in {:.1}s (attempt {attempt}/{MAX_ATTEMPTS})",
                        delay.as_secs_f64()
                    );
                    last_error = e.to_string();
                    thread::sleep(delay);
                }
            }
        }

        Err(MirrorError::Network(format!(
            "retry budget exhausted for {url}: {last_error}"
        )))
    }

    fn get_json(&self, url: &str) -> Result<Value, MirrorError> {
        let response = self.get_with_retry(url, true)?;
        response
            .json()
            .map_err(|e| MirrorError::Network(format!("malformed response from {url}: {e}")))
    }

    pub fn resolve_site(&self) -> Result<String, MirrorError> {
        {
            let guard = self.site_id.lock().expect("site cache poisoned");
            if let Some(id) = guard.as_ref() {
                return Ok(id.clone());
            }
        }

        let url = format!(
            "{GRAPH_BASE_URL}/sites/{}:{}",
            self.site_hostname, self.site_path
        );
        let body = self.get_json(&url)?;
        let site_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| MirrorError::Network("site response missing id".to_string()))?
            .to_string();

        info!("Resolved site {}{} => {site_id}", self.site_hostname, self.site_path);
        *self.site_id.lock().expect("site cache poisoned") = Some(site_id.clone());
        Ok(site_id)
    }

    /// Resolve the site and list its drives; used by the test-connection
    /// command.
    pub fn test_connection(&self) -> Result<SiteInfo, MirrorError> {
        let site_id = self.resolve_site()?;
        let body = self.get_json(&format!("{GRAPH_BASE_URL}/sites/{site_id}"))?;
        let drives = self.list_drives()?;

        Ok(SiteInfo {
            site_id,
            site_name: body
                .get("displayName")
                .and_then(Value::as_str)
                .map(String::from),
            site_url: body.get("webUrl").and_then(Value::as_str).map(String::from),
            drives,
        })
    }
}

impl DriveSource for GraphClient {
    fn list_drives(&self) -> Result<Vec<DriveInfo>, MirrorError> {
        let site_id = self.resolve_site()?;
        let body = self.get_json(&format!("{GRAPH_BASE_URL}/sites/{site_id}/drives"))?;

        let mut drives = Vec::new();
        for entry in body.get("value").and_then(Value::as_array).into_iter().flatten() {
            let (Some(id), Some(name)) = (
                entry.get("id").and_then(Value::as_str),
                entry.get("name").and_then(Value::as_str),
            ) else {
                continue;
            };
            drives.push(DriveInfo {
                id: id.to_string(),
                name: name.to_string(),
                web_url: entry.get("webUrl").and_then(Value::as_str).map(String::from),
            });
        }
        Ok(drives)
    }

    fn next_delta_page(
        &self,
        drive_id: &str,
        link: Option<&str>,
    ) -> Result<DeltaPage, MirrorError> {
        let url = match link {
            Some(link) => link.to_string(),
            None => format!("{GRAPH_BASE_URL}/drives/{drive_id}/root/delta"),
        };

        let body = self.get_json(&url)?;
        let mut page = DeltaPage {
            items: Vec::new(),
            next_link: body
                .get("@odata.nextLink")
                .and_then(Value::as_str)
                .map(String::from),
            delta_link: body
                .get("@odata.deltaLink")
                .and_then(Value::as_str)
                .map(String::from),
        };

        for entry in body.get("value").and_then(Value::as_array).into_iter().flatten() {
            match parse_change_item(entry) {
                Some(item) => page.items.push(item),
                None => warn!("Skipping malformed delta entry: {entry}"),
            }
        }

        debug!(
            "Delta page for {drive_id}: {} items, terminal={}",
            page.items.len(),
            page.delta_link.is_some()
        );
        Ok(page)
    }

    fn download(&self, drive_id: &str, item: &ChangeItem) -> Result<Box<dyn Read>, MirrorError> {
        // Prefer the pre-authenticated URL carried by the delta entry; it
        // needs no bearer token and skips a redirect hop.
        let response = match &item.download_url {
            Some(url) => self.get_with_retry(url, false)?,
            None => {
                let url = format!(
                    "{GRAPH_BASE_URL}/drives/{drive_id}/items/{}/content",
                    item.id
                );
                self.get_with_retry(&url, true)?
            }
        };
        Ok(Box::new(response))
    }
}

/// Map a raw delta entry into a `ChangeItem`. Returns None when the entry
/// is missing its identity fields.
fn parse_change_item(entry: &Value) -> Option<ChangeItem> {
    let id = entry.get("id").and_then(Value::as_str)?.to_string();
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let is_deleted = entry.get("deleted").is_some();
    if name.is_empty() && !is_deleted {
        return None;
    }

    // parentReference.path looks like "/drives/{id}/root:/sub/dir"; the
    // part after the colon is the path within the drive.
    let parent_path = entry
        .get("parentReference")
        .and_then(|p| p.get("path"))
        .and_then(Value::as_str)
        .map(|p| match p.split_once(':') {
            Some((_, after)) => after.to_string(),
            None => p.to_string(),
        })
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());
    let path = format!("{parent_path}/{name}").replace("//", "/");

    let file = entry.get("file");
    let hashes = file.and_then(|f| f.get("hashes"));

    Some(ChangeItem {
        id,
        name,
        path,
        is_folder: entry.get("folder").is_some() || entry.get("root").is_some(),
        is_deleted,
        size: entry.get("size").and_then(Value::as_i64),
        mime_type: file
            .and_then(|f| f.get("mimeType"))
            .and_then(Value::as_str)
            .map(String::from),
        web_url: entry.get("webUrl").and_then(Value::as_str).map(String::from),
        created_by: display_name(entry.get("createdBy")),
        last_modified_by: display_name(entry.get("lastModifiedBy")),
        created_at: entry
            .get("createdDateTime")
            .and_then(Value::as_str)
            .map(String::from),
        modified_at: entry
            .get("lastModifiedDateTime")
            .and_then(Value::as_str)
            .map(String::from),
        sha256_hash: hashes
            .and_then(|h| h.get("sha256Hash"))
            .and_then(Value::as_str)
            .map(|h| h.to_lowercase()),
        quickxor_hash: hashes
            .and_then(|h| h.get("quickXorHash"))
            .and_then(Value::as_str)
            .map(String::from),
        download_url: entry
            .get("@microsoft.graph.downloadUrl")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

fn display_name(identity_set: Option<&Value>) -> Option<String> {
    identity_set?
        .get("user")?
        .get("displayName")?
        .as_str()
        .map(String::from)
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Exponential backoff with +/-20% jitter. The jitter source is the system
/// clock's subsecond nanos, which is plenty for spreading retries.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE
        .checked_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    // Scale into [-0.2, +0.2]
    let jitter = (nanos % 400_000) as f64 / 1_000_000.0 - 0.2;

    Duration::from_secs_f64((base.as_secs_f64() * (1.0 + jitter)).max(0.05))
}
