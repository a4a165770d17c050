use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::{form_urlencoded, Url};

use super::{SyncError, SYNC_TIMEOUT};

const API_PATH: &str = "/api/greader.php";
const READ_TAG: &str = "user/-/state/com.google/read";

/// Client for a FreshRSS server's Google Reader API.
pub struct FreshRssClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: SecretString,
}

/// Auth token from a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    auth: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub categories: Vec<RemoteCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteCategory {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Deserialize)]
struct SubscriptionList {
    #[serde(default)]
    subscriptions: Vec<RemoteSubscription>,
}

/// One item of the reading-list stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteArticle {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub canonical: Vec<Link>,
    #[serde(default)]
    pub alternate: Vec<Link>,
    #[serde(default)]
    pub summary: Option<Body>,
    /// Unix seconds
    #[serde(default)]
    pub published: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize)]
struct StreamContents {
    #[serde(default)]
    items: Vec<RemoteArticle>,
}

impl RemoteArticle {
    pub fn link(&self) -> Option<&str> {
        self.canonical
            .iter()
            .chain(self.alternate.iter())
            .map(|l| l.href.as_str())
            .find(|href| !href.trim().is_empty())
    }

    pub fn body(&self) -> &str {
        self.summary.as_ref().map_or("", |s| s.content.as_str())
    }
}

impl FreshRssClient {
    /// `server_url` may be the site root or the full `/api/greader.php` endpoint.
    pub fn new(
        client: reqwest::Client,
        server_url: &str,
        username: &str,
        password: SecretString,
    ) -> Self {
        let mut base_url = server_url.trim().trim_end_matches('/').to_string();
        if !base_url.ends_with(API_PATH) {
            base_url.push_str(API_PATH);
        }

        Self {
            client,
            base_url,
            username: username.to_string(),
            password,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log in with the username and API password.
    pub async fn login(&self) -> Result<Session, SyncError> {
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("Email", &self.username)
            .append_pair("Passwd", self.password.expose_secret())
            .finish();

        let request = self
            .client
            .post(format!("{}/accounts/ClientLogin", self.base_url))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(form);

        let body = match send(request).await {
            Ok(body) => body,
            Err(SyncError::HttpStatus(status)) => {
                return Err(SyncError::Login(format!("status {}", status)))
            }
            Err(e) => return Err(e),
        };

        let text = String::from_utf8_lossy(&body);
        let auth = text
            .lines()
            .find_map(|line| line.trim().strip_prefix("Auth="))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SyncError::Login("no Auth token in response".to_string()))?;

        tracing::debug!(user = %self.username, "Logged in to FreshRSS");
        Ok(Session {
            auth: SecretString::from(auth.to_string()),
        })
    }

    /// Short-lived token required by write calls.
    pub async fn token(&self, session: &Session) -> Result<String, SyncError> {
        let request = self.get(session, Url::parse(&self.endpoint("token"))?);
        let body = send(request).await?;
        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }

    pub async fn subscriptions(
        &self,
        session: &Session,
    ) -> Result<Vec<RemoteSubscription>, SyncError> {
        let url = Url::parse_with_params(
            &self.endpoint("subscription/list"),
            &[("output", "json")],
        )?;
        let body = send(self.get(session, url)).await?;
        let list: SubscriptionList = serde_json::from_slice(&body)
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
        Ok(list.subscriptions)
    }

    /// Up to `limit` unread items of the reading list.
    pub async fn unread_articles(
        &self,
        session: &Session,
        limit: usize,
    ) -> Result<Vec<RemoteArticle>, SyncError> {
        let n = limit.to_string();
        let url = Url::parse_with_params(
            &self.endpoint("stream/contents/user/-/state/com.google/reading-list"),
            &[("output", "json"), ("n", n.as_str()), ("xt", READ_TAG)],
        )?;
        let body = send(self.get(session, url)).await?;
        let stream: StreamContents = serde_json::from_slice(&body)
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
        Ok(stream.items)
    }

    /// Mark items read on the server.
    pub async fn mark_as_read(&self, session: &Session, ids: &[String]) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }

        let token = self.token(session).await?;
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("T", &token);
        for id in ids {
            form.append_pair("i", id);
        }
        form.append_pair("a", READ_TAG);

        self.post_form(session, "edit-tag", form.finish()).await
    }

    /// Subscribe the server account to a feed.
    pub async fn subscribe(
        &self,
        session: &Session,
        feed_url: &str,
        title: &str,
    ) -> Result<(), SyncError> {
        let token = self.token(session).await?;
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("T", &token)
            .append_pair("s", &format!("feed/{}", feed_url))
            .append_pair("t", title)
            .append_pair("ac", "subscribe")
            .finish();

        self.post_form(session, "subscription/edit", form).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/reader/api/0/{}", self.base_url, path)
    }

    fn get(&self, session: &Session, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization(session))
    }

    async fn post_form(
        &self,
        session: &Session,
        path: &str,
        form: String,
    ) -> Result<(), SyncError> {
        let request = self
            .client
            .post(self.endpoint(path))
            .header(reqwest::header::AUTHORIZATION, authorization(session))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(form);
        send(request).await.map(|_| ())
    }
}

fn authorization(session: &Session) -> String {
    format!("GoogleLogin auth={}", session.auth.expose_secret())
}

async fn send(request: reqwest::RequestBuilder) -> Result<Vec<u8>, SyncError> {
    let response = tokio::time::timeout(SYNC_TIMEOUT, request.send())
        .await
        .map_err(|_| SyncError::Timeout)??;

    if !response.status().is_success() {
        return Err(SyncError::HttpStatus(response.status().as_u16()));
    }

    let body = tokio::time::timeout(SYNC_TIMEOUT, response.bytes())
        .await
        .map_err(|_| SyncError::Timeout)??;
    Ok(body.to_vec())
}
