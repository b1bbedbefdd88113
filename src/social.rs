use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::data::PostStore;
use crate::error::{ApiError, ErrorBody};
use crate::session::TokenProvider;

pub const DEFAULT_BASE_URL: &str = "https://v2.api.noroff.dev/";
pub const API_KEY_HEADER: &str = "X-Noroff-API-Key";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub i64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PostId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PostId)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub media: Option<Media>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Author,
    #[serde(default, rename = "_count")]
    pub count: PostCounts,
}

impl Post {
    pub fn author_name(&self) -> &str {
        &self.author.name
    }

    /// Case-insensitive substring match over title and body.
    pub fn matches(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle) || self.body.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCounts {
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub reactions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default, rename = "_count")]
    pub count: ProfileCounts,
    #[serde(default)]
    pub followers: Option<Vec<ProfileRef>>,
    #[serde(default)]
    pub following: Option<Vec<ProfileRef>>,
}

impl Profile {
    /// Whether `name` appears in the expanded followers list.
    pub fn has_follower(&self, name: &str) -> bool {
        self.followers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|follower| follower.name == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCounts {
    #[serde(default)]
    pub posts: i64,
    #[serde(default)]
    pub followers: i64,
    #[serde(default)]
    pub following: i64,
}

/// Lookup key for another profile; never the profile itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileRef {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileExpand {
    pub followers: bool,
    pub following: bool,
}

impl Default for ProfileExpand {
    fn default() -> Self {
        Self {
            followers: true,
            following: true,
        }
    }
}

/// Payload for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

impl PostDraft {
    /// Media is attached only when `image_url` is not blank; its alt text is the title.
    pub fn new(title: &str, body: &str, image_url: &str) -> Self {
        let image_url = image_url.trim();
        let media = if image_url.is_empty() {
            None
        } else {
            Some(Media {
                url: image_url.to_string(),
                alt: title.to_string(),
            })
        };
        Self {
            title: title.to_string(),
            body: body.to_string(),
            media,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    token_provider: Arc<dyn TokenProvider>,
    http: HttpClient,
    user_agent: String,
    api_key: String,
    base_url: Url,
}

impl Client {
    pub fn new(
        token_provider: Arc<dyn TokenProvider>,
        config: ClientConfig,
    ) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("social client user agent required");
        }
        let base_url = parse_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            token_provider,
            http,
            user_agent: config.user_agent,
            api_key: config.api_key,
            base_url,
        })
    }

    fn get_data<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(Method::GET, path, params, None)?;
        let envelope: Envelope<T> = resp.json()?;
        Ok(envelope.data)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let token = self.token_provider.token()?;
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| ApiError::Network(format!("invalid request url {path}: {err}")))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        tracing::debug!(method = %method, url = %url, "social api request");
        let mut req = self
            .http
            .request(method.clone(), url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if !self.api_key.is_empty() {
            req = req.header(API_KEY_HEADER, self.api_key.clone());
        }
        if let Some(payload) = body {
            req = req.json(&payload);
        }

        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().unwrap_or_default();
        let err = ApiError::from_status(status, ErrorBody::first_message(&text));
        tracing::warn!(
            method = %method,
            path,
            status = status.as_u16(),
            error = %err,
            "social api request failed"
        );
        Err(err)
    }
}

pub(crate) fn parse_base_url(base: &str) -> anyhow::Result<Url> {
    let mut base = base.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?)
}

pub(crate) fn segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

impl PostStore for Client {
    fn list_posts(&self, limit: usize, author: Option<&str>) -> Result<Vec<Post>, ApiError> {
        let path = match author {
            Some(name) => format!("social/profiles/{}/posts", segment(name)),
            None => "social/posts".to_string(),
        };
        let params = [("_author", "true".to_string()), ("limit", limit.to_string())];
        self.get_data(&path, &params)
    }

    fn search_posts(&self, term: &str) -> Result<Vec<Post>, ApiError> {
        let params = [("q", term.to_string()), ("_author", "true".to_string())];
        self.get_data("social/posts/search", &params)
    }

    fn get_post(&self, id: PostId) -> Result<Post, ApiError> {
        let params = [("_author", "true".to_string())];
        self.get_data(&format!("social/posts/{id}"), &params)
    }

    fn create_post(&self, draft: &PostDraft) -> Result<Post, ApiError> {
        let payload = serde_json::to_value(draft)?;
        let resp = self.request(Method::POST, "social/posts", &[], Some(payload))?;
        let envelope: Envelope<Post> = resp.json()?;
        tracing::info!(id = %envelope.data.id, "created post");
        Ok(envelope.data)
    }

    fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<Post, ApiError> {
        let payload = serde_json::to_value(draft)?;
        let resp = self.request(Method::PUT, &format!("social/posts/{id}"), &[], Some(payload))?;
        let envelope: Envelope<Post> = resp.json()?;
        tracing::info!(%id, "updated post");
        Ok(envelope.data)
    }

    fn delete_post(&self, id: PostId) -> Result<(), ApiError> {
        self.request(Method::DELETE, &format!("social/posts/{id}"), &[], None)?;
        tracing::info!(%id, "deleted post");
        Ok(())
    }

    fn get_profile(&self, name: &str, expand: ProfileExpand) -> Result<Profile, ApiError> {
        let params = [
            ("_followers", expand.followers.to_string()),
            ("_following", expand.following.to_string()),
        ];
        self.get_data(&format!("social/profiles/{}", segment(name)), &params)
    }

    fn follow_profile(&self, name: &str) -> Result<(), ApiError> {
        let path = format!("social/profiles/{}/follow", segment(name));
        self.request(Method::PUT, &path, &[], None)?;
        tracing::info!(profile = name, "followed profile");
        Ok(())
    }

    fn unfollow_profile(&self, name: &str) -> Result<(), ApiError> {
        let path = format!("social/profiles/{}/unfollow", segment(name));
        self.request(Method::PUT, &path, &[], None)?;
        tracing::info!(profile = name, "unfollowed profile");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Identity, Session};
    use std::io::Read;
    use std::thread;

    struct Captured {
        method: String,
        url: String,
        authorization: Option<String>,
        api_key: Option<String>,
        body: String,
    }

    /// Serves one canned response and hands back what the client sent.
    fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<Captured>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}/", server.server_addr().to_ip().unwrap());
        let handle = thread::spawn(move || {
            let mut req = server.recv().unwrap();
            let header = |name: &'static str| {
                req.headers()
                    .iter()
                    .find(|h| h.field.equiv(name))
                    .map(|h| h.value.to_string())
            };
            let authorization = header("Authorization");
            let api_key = header(API_KEY_HEADER);
            let mut sent = String::new();
            req.as_reader().read_to_string(&mut sent).unwrap();
            let captured = Captured {
                method: req.method().to_string(),
                url: req.url().to_string(),
                authorization,
                api_key,
                body: sent,
            };
            let resp = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(
                    "Content-Type: application/json"
                        .parse::<tiny_http::Header>()
                        .unwrap(),
                );
            req.respond(resp).unwrap();
            captured
        });
        (addr, handle)
    }

    fn client(base: &str, identity: Arc<Identity>) -> Client {
        Client::new(
            identity,
            ClientConfig {
                user_agent: "social-feed-test".into(),
                api_key: "key-123".into(),
                base_url: Some(base.into()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn signed_in() -> Arc<Identity> {
        Arc::new(Identity::with_session(Session {
            name: "ada".into(),
            email: "ada@stud.noroff.no".into(),
            access_token: "tok".into(),
        }))
    }

    const POSTS: &str = r#"{"data":[{"id":7,"title":"Hello","body":null,"tags":[],"media":{"url":"https://img.test/a.png","alt":""},"created":"2024-05-01T10:00:00.000Z","updated":"2024-05-01T10:00:00.000Z","author":{"name":"ada","email":"ada@stud.noroff.no","bio":null},"_count":{"comments":1,"reactions":2}}],"meta":{"isFirstPage":true,"isLastPage":true}}"#;

    #[test]
    fn list_posts_sends_credentials_and_decodes() {
        let (base, server) = serve_once(200, POSTS);
        let posts = client(&base, signed_in()).list_posts(100, None).unwrap();
        let captured = server.join().unwrap();

        assert_eq!(captured.method, "GET");
        assert!(captured.url.starts_with("/social/posts?"));
        assert!(captured.url.contains("_author=true"));
        assert!(captured.url.contains("limit=100"));
        assert_eq!(captured.authorization.as_deref(), Some("Bearer tok"));
        assert_eq!(captured.api_key.as_deref(), Some("key-123"));

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, PostId(7));
        assert_eq!(posts[0].body, "");
        assert_eq!(posts[0].author_name(), "ada");
        assert_eq!(posts[0].count.reactions, 2);
    }

    #[test]
    fn author_listing_uses_profile_path() {
        let (base, server) = serve_once(200, r#"{"data":[]}"#);
        let posts = client(&base, signed_in())
            .list_posts(20, Some("bob smith"))
            .unwrap();
        let captured = server.join().unwrap();
        assert!(posts.is_empty());
        assert!(captured.url.starts_with("/social/profiles/bob%20smith/posts?"));
    }

    #[test]
    fn search_uses_query_parameter() {
        let (base, server) = serve_once(200, r#"{"data":[]}"#);
        client(&base, signed_in()).search_posts("rust lang").unwrap();
        let captured = server.join().unwrap();
        assert!(captured.url.starts_with("/social/posts/search?"));
        assert!(captured.url.contains("q=rust+lang"));
    }

    #[test]
    fn update_sends_media_only_when_present() {
        let (base, server) = serve_once(
            200,
            r#"{"data":{"id":7,"title":"New","body":"b","created":"2024-05-01T10:00:00Z"}}"#,
        );
        let draft = PostDraft::new("New", "b", "   ");
        let post = client(&base, signed_in()).update_post(PostId(7), &draft).unwrap();
        let captured = server.join().unwrap();
        assert_eq!(captured.method, "PUT");
        assert_eq!(captured.url, "/social/posts/7");
        let sent: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(sent["title"], "New");
        assert!(sent.get("media").is_none());
        assert_eq!(post.title, "New");
    }

    #[test]
    fn server_validation_message_is_preserved() {
        let (base, server) = serve_once(
            400,
            r#"{"errors":[{"message":"Title must be a string"}],"status":"Bad Request","statusCode":400}"#,
        );
        let draft = PostDraft::new("", "", "");
        let err = client(&base, signed_in()).create_post(&draft).unwrap_err();
        server.join().unwrap();
        assert_eq!(err, ApiError::validation("Title must be a string"));
    }

    #[test]
    fn follow_conflict_maps_to_conflict() {
        let (base, server) = serve_once(
            409,
            r#"{"errors":[{"message":"You are already following this profile"}],"statusCode":409}"#,
        );
        let err = client(&base, signed_in()).follow_profile("bob").unwrap_err();
        let captured = server.join().unwrap();
        assert_eq!(captured.url, "/social/profiles/bob/follow");
        assert!(matches!(err, ApiError::Conflict { .. }));
    }

    #[test]
    fn missing_credential_fails_without_request() {
        let identity = Arc::new(Identity::anonymous());
        let client = client("http://127.0.0.1:9/", identity);
        let err = client.list_posts(10, None).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn profile_decodes_followers() {
        let (base, server) = serve_once(
            200,
            r#"{"data":{"name":"bob","email":"bob@stud.noroff.no","bio":null,"_count":{"posts":3,"followers":1,"following":0},"followers":[{"name":"ada","email":"ada@stud.noroff.no"}],"following":[]}}"#,
        );
        let profile = client(&base, signed_in())
            .get_profile("bob", ProfileExpand::default())
            .unwrap();
        let captured = server.join().unwrap();
        assert!(captured.url.contains("_followers=true"));
        assert!(captured.url.contains("_following=true"));
        assert!(profile.has_follower("ada"));
        assert!(!profile.has_follower("carol"));
        assert_eq!(profile.count.posts, 3);
    }

    #[test]
    fn draft_attaches_media_with_title_alt() {
        let draft = PostDraft::new("Sunset", "", " https://img.test/s.jpg ");
        assert_eq!(
            draft.media,
            Some(Media {
                url: "https://img.test/s.jpg".into(),
                alt: "Sunset".into(),
            })
        );
    }
}
