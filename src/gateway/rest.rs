use async_trait::async_trait;
use reqwest::{
    Method, RequestBuilder, StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use super::{
    AuthGateway, AuthUser, ChangeStream, Filter, Gateway, Query, RowPatch, realtime,
};
use crate::config::GatewayConfig;
use crate::error::GatewayError;

const USER_AGENT: &str = concat!("planpilot/", env!("CARGO_PKG_VERSION"));
const BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone)]
struct AuthSession {
    access_token: String,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<UserPayload>,
    // `/signup` answers with the bare user when email confirmation is on
    #[serde(default)]
    id: Option<uuid::Uuid>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: uuid::Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn user(&self, fallback_email: &str) -> Option<AuthUser> {
        let (id, email) = match &self.user {
            Some(user) => (user.id, user.email.clone()),
            None => (self.id?, self.email.clone()),
        };
        Some(AuthUser {
            id,
            email: email.unwrap_or_else(|| fallback_email.to_string()),
        })
    }
}

/// PostgREST + GoTrue client for the hosted backend.
///
/// Every request carries the project `apikey`; once signed in, the user's access
/// token replaces the anon key as bearer.
#[derive(Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    base: Url,
    anon_key: Arc<str>,
    realtime_url: Url,
    realtime_max_retries: usize,
    session: Arc<RwLock<Option<AuthSession>>>,
}

impl RestGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .http2_adaptive_window(true)
            .build()?;
        Ok(Self::with_client(cfg, client))
    }

    pub fn with_client(cfg: &GatewayConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base: cfg.url.clone(),
            anon_key: Arc::from(cfg.anon_key.as_str()),
            realtime_url: cfg.realtime_url(),
            realtime_max_retries: cfg.realtime_max_retries,
            session: Arc::new(RwLock::new(None)),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Ok(self.base.join(path)?)
    }

    async fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.anon_key.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, GatewayError> {
        let url = self.endpoint(path)?;
        Ok(self
            .client
            .request(method, url)
            .headers(self.headers().await))
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let raw = resp.text().await.unwrap_or_default();
        let message = server_message(&raw);
        debug!(
            status = %status,
            body = %format!("{:.len$}", raw, len = BODY_PREVIEW_CHARS),
            "gateway request failed"
        );
        Err(GatewayError::Status { status, message })
    }

    async fn send_json(builder: RequestBuilder) -> Result<Value, GatewayError> {
        let resp = Self::send(builder).await?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_rows(builder: RequestBuilder) -> Result<Vec<Value>, GatewayError> {
        match Self::send_json(builder).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn set_session(&self, session: Option<AuthSession>) {
        *self.session.write().await = session;
    }
}

/// Pulls `message` (PostgREST) or `msg`/`error_description` (GoTrue) out of an error body.
fn server_message(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.parse().ok()
}

#[async_trait]
impl Gateway for RestGateway {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let builder = self
            .request(Method::GET, &format!("rest/v1/{}", query.table))
            .await?
            .query(&query.to_params());
        Self::send_rows(builder).await
    }

    async fn count(&self, query: &Query) -> Result<usize, GatewayError> {
        let builder = self
            .request(Method::HEAD, &format!("rest/v1/{}", query.table))
            .await?
            .header("Prefer", "count=exact")
            .query(&query.to_params());
        let resp = Self::send(builder).await?;
        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| GatewayError::Status {
                status: StatusCode::BAD_GATEWAY,
                message: "missing Content-Range on count".to_string(),
            })
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, GatewayError> {
        let builder = self
            .request(Method::POST, &format!("rest/v1/{table}"))
            .await?
            .header("Prefer", "return=representation")
            .json(&rows);
        Self::send_rows(builder).await
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, GatewayError> {
        let builder = self
            .request(Method::PATCH, &format!("rest/v1/{}", query.table))
            .await?
            .header("Prefer", "return=representation")
            .query(&query.filter_params())
            .json(&patch);
        Self::send_rows(builder).await
    }

    async fn update_many(&self, table: &str, patches: Vec<RowPatch>) -> Result<(), GatewayError> {
        // one server-side transaction
        self.rpc(
            "batch_update",
            json!({ "target_table": table, "rows": patches }),
        )
        .await
        .map(|_| ())
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let builder = self
            .request(Method::DELETE, &format!("rest/v1/{}", query.table))
            .await?
            .header("Prefer", "return=representation")
            .query(&query.filter_params());
        Self::send_rows(builder).await
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError> {
        let builder = self
            .request(Method::POST, &format!("rest/v1/rpc/{function}"))
            .await?
            .json(&args);
        Self::send_json(builder).await
    }

    async fn subscribe(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<ChangeStream, GatewayError> {
        Ok(realtime::subscribe(
            self.client.clone(),
            self.realtime_url.clone(),
            self.headers().await,
            table,
            filter,
            self.realtime_max_retries,
        ))
    }
}

#[async_trait]
impl AuthGateway for RestGateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<AuthUser, GatewayError> {
        let builder = self
            .request(Method::POST, "auth/v1/signup")
            .await?
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "full_name": full_name },
            }));
        let body: TokenResponse = serde_json::from_value(Self::send_json(builder).await?)?;
        let user = body
            .user(email)
            .ok_or_else(|| GatewayError::Rejected("sign-up returned no user".to_string()))?;
        if let Some(access_token) = body.access_token {
            self.set_session(Some(AuthSession {
                access_token,
                user: user.clone(),
            }))
            .await;
        }
        info!(user_id = %user.id, "signed up");
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, GatewayError> {
        let builder = self
            .request(Method::POST, "auth/v1/token?grant_type=password")
            .await?
            .json(&json!({ "email": email, "password": password }));
        let body: TokenResponse = serde_json::from_value(Self::send_json(builder).await?)?;
        let user = body
            .user(email)
            .ok_or_else(|| GatewayError::Rejected("sign-in returned no user".to_string()))?;
        let access_token = body
            .access_token
            .ok_or_else(|| GatewayError::Rejected("sign-in returned no token".to_string()))?;
        self.set_session(Some(AuthSession {
            access_token,
            user: user.clone(),
        }))
        .await;
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        if self.session.read().await.is_none() {
            return Ok(());
        }
        let builder = self.request(Method::POST, "auth/v1/logout").await?;
        let result = Self::send(builder).await.map(|_| ());
        // the local session is dropped even when the server call fails
        self.set_session(None).await;
        result
    }

    async fn update_password(&self, password: &str) -> Result<(), GatewayError> {
        if self.session.read().await.is_none() {
            return Err(GatewayError::Unauthenticated);
        }
        let builder = self
            .request(Method::PUT, "auth/v1/user")
            .await?
            .json(&json!({ "password": password }));
        Self::send(builder).await.map(|_| ())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range_totals() {
        assert_eq!(parse_content_range("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }

    #[test]
    fn extracts_server_messages() {
        assert_eq!(
            server_message(r#"{"code":"23505","message":"duplicate key value"}"#),
            "duplicate key value"
        );
        assert_eq!(
            server_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(server_message(" upstream down "), "upstream down");
    }

    #[test]
    fn token_response_reads_nested_or_bare_user() {
        let nested: TokenResponse = serde_json::from_value(json!({
            "access_token": "t",
            "user": { "id": uuid::Uuid::nil(), "email": "a@b.c" },
        }))
        .unwrap();
        assert_eq!(nested.user("x@y.z").unwrap().email, "a@b.c");

        let bare: TokenResponse =
            serde_json::from_value(json!({ "id": uuid::Uuid::nil() })).unwrap();
        assert_eq!(bare.user("x@y.z").unwrap().email, "x@y.z");
    }

    #[tokio::test]
    async fn anon_key_is_bearer_until_sign_in() {
        let cfg = GatewayConfig {
            anon_key: "anon".to_string(),
            ..GatewayConfig::default()
        };
        let gw = RestGateway::with_client(&cfg, reqwest::Client::new());
        let headers = gw.headers().await;
        assert_eq!(headers["apikey"], "anon");
        assert_eq!(headers[AUTHORIZATION], "Bearer anon");
        assert!(gw.current_user().await.is_none());
    }
}
