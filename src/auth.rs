use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ErrorBody;
use crate::session::Session;
use crate::social::{parse_base_url, Envelope, API_KEY_HEADER, DEFAULT_BASE_URL};

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: String::new(),
            user_agent: format!("social-feed/{}", crate::VERSION),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Exchanges account credentials for a bearer token.
pub struct Flow {
    cfg: Config,
    base_url: Url,
    client: Client,
}

impl Flow {
    pub fn new(cfg: Config) -> Result<Self> {
        if cfg.user_agent.trim().is_empty() {
            bail!("auth: user agent is required");
        }
        let base_url = parse_base_url(&cfg.base_url).context("auth: invalid base url")?;
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("auth: build http client")?;

        Ok(Self {
            cfg,
            base_url,
            client,
        })
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Session> {
        let payload = LoginRequest { email, password };
        let profile: LoginResponse = self
            .post("auth/login", &payload)
            .context("Could not login the account")?;
        if profile.access_token.is_empty() {
            bail!("auth: missing access token");
        }
        tracing::info!(user = %profile.name, "logged in");

        Ok(Session {
            name: profile.name,
            email: profile.email,
            access_token: profile.access_token,
        })
    }

    /// Creates the account; the caller logs in afterwards to get a token.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<RegisteredProfile> {
        let payload = RegisterRequest {
            name,
            email,
            password,
        };
        let profile: RegisteredProfile = self
            .post("auth/register", &payload)
            .context("Could not register the account")?;
        tracing::info!(user = %profile.name, "registered");
        Ok(profile)
    }

    fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: for<'de> Deserialize<'de>,
    {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("auth: invalid url for {path}"))?;
        tracing::debug!(url = %url, "auth request");
        let mut req = self
            .client
            .post(url)
            .header(USER_AGENT, self.cfg.user_agent.clone())
            .json(body);
        if !self.cfg.api_key.is_empty() {
            req = req.header(API_KEY_HEADER, self.cfg.api_key.clone());
        }

        let resp = req.send().context("auth: request")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            tracing::warn!(path, status = status.as_u16(), "auth request failed");
            match ErrorBody::first_message(&body) {
                Some(message) => bail!("{message}"),
                None => bail!("auth: request failed with status {}", status.as_u16()),
            }
        }

        let envelope: Envelope<T> = resp.json().context("auth: decode response")?;
        Ok(envelope.data)
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredProfile {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    fn serve_once(
        status: u16,
        body: &'static str,
    ) -> (String, thread::JoinHandle<(String, String)>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr().to_ip().unwrap());
        let handle = thread::spawn(move || {
            let mut req = server.recv().unwrap();
            let mut sent = String::new();
            req.as_reader().read_to_string(&mut sent).unwrap();
            let url = req.url().to_string();
            let resp = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(
                    "Content-Type: application/json"
                        .parse::<tiny_http::Header>()
                        .unwrap(),
                );
            req.respond(resp).unwrap();
            (url, sent)
        });
        (addr, handle)
    }

    fn flow(base_url: String) -> Flow {
        Flow::new(Config {
            base_url,
            api_key: "key-123".into(),
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn login_returns_session() {
        let (addr, handle) = serve_once(
            200,
            r#"{"data":{"name":"ada","email":"ada@stud.noroff.no","accessToken":"tok-1","venueManager":false},"meta":{}}"#,
        );
        let session = flow(addr).login("ada@stud.noroff.no", "hunter22").unwrap();
        assert_eq!(
            session,
            Session {
                name: "ada".into(),
                email: "ada@stud.noroff.no".into(),
                access_token: "tok-1".into(),
            }
        );
        let (url, sent) = handle.join().unwrap();
        assert_eq!(url, "/auth/login");
        let sent: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(sent["email"], "ada@stud.noroff.no");
        assert_eq!(sent["password"], "hunter22");
    }

    #[test]
    fn login_failure_keeps_server_message() {
        let (addr, handle) = serve_once(
            401,
            r#"{"errors":[{"message":"Invalid email or password"}],"status":"Unauthorized","statusCode":401}"#,
        );
        let err = flow(addr).login("ada@stud.noroff.no", "wrong").unwrap_err();
        assert_eq!(err.to_string(), "Could not login the account");
        assert_eq!(err.root_cause().to_string(), "Invalid email or password");
        handle.join().unwrap();
    }

    #[test]
    fn register_posts_account() {
        let (addr, handle) = serve_once(
            201,
            r#"{"data":{"name":"ada","email":"ada@stud.noroff.no","bio":null},"meta":{}}"#,
        );
        let profile = flow(addr)
            .register("ada", "ada@stud.noroff.no", "hunter22")
            .unwrap();
        assert_eq!(profile.name, "ada");
        let (url, sent) = handle.join().unwrap();
        assert_eq!(url, "/auth/register");
        assert!(sent.contains(r#""name":"ada""#));
    }

    #[test]
    fn empty_user_agent_is_rejected() {
        let cfg = Config {
            user_agent: " ".into(),
            ..Config::default()
        };
        assert!(Flow::new(cfg).is_err());
    }
}
