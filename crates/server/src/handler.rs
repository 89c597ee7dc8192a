//! Request handlers for the search proxy.
//!
//! `/movie` and `/book` forward to the upstream search API and return its body
//! unchanged. `/subscription` stores push registrations; `/sync` accepts
//! deferred deliveries from the client's background worker.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use shelf_core::{CacheDb, SubscriptionRegistration};
use url::Url;

use crate::error::ProxyError;

/// Number of movie results requested per search.
const MOVIE_PAGE_SIZE: &str = "25";

/// Shared handler state.
#[derive(Clone)]
pub struct ProxyState {
    pub http: reqwest::Client,
    pub upstream_url: String,
    pub cache: CacheDb,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub fields: Option<String>,
}

impl SearchParams {
    fn query(&self) -> Result<&str, ProxyError> {
        self.q.as_deref().ok_or_else(|| ProxyError::InvalidInput("missing query parameter 'q'".into()))
    }
}

impl ProxyState {
    fn upstream(&self, path: &str) -> Result<Url, ProxyError> {
        let base = self.upstream_url.trim_end_matches('/');
        Url::parse(&format!("{base}{path}")).map_err(|e| ProxyError::Upstream(format!("invalid upstream URL: {e}")))
    }

    async fn forward(&self, url: Url) -> Result<Response, ProxyError> {
        tracing::debug!(url = %url, "forwarding search");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Upstream(format!("{url} answered {}", status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(format!("{url}: {e}")))?;

        Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
    }
}

/// `GET /movie?q=` -> `movie/search?q=&start=0&count=25`
pub async fn movie(State(state): State<ProxyState>, Query(params): Query<SearchParams>) -> Result<Response, ProxyError> {
    let q = params.query()?;
    let mut url = state.upstream("/movie/search")?;
    url.query_pairs_mut()
        .append_pair("q", q)
        .append_pair("start", "0")
        .append_pair("count", MOVIE_PAGE_SIZE);
    state.forward(url).await
}

/// `GET /book?q=&fields=` -> `book/search?q=&fields=`
pub async fn book(State(state): State<ProxyState>, Query(params): Query<SearchParams>) -> Result<Response, ProxyError> {
    let q = params.query()?;
    let mut url = state.upstream("/book/search")?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("q", q);
        if let Some(fields) = &params.fields {
            pairs.append_pair("fields", fields);
        }
    }
    state.forward(url).await
}

/// `POST /subscription` with `{subscription, uniqueid}`.
pub async fn subscription(
    State(state): State<ProxyState>, Json(registration): Json<SubscriptionRegistration>,
) -> Result<Json<Value>, ProxyError> {
    state.cache.upsert_subscription(&registration).await?;
    let clients = state.cache.count_subscriptions().await?;
    tracing::info!(
        uniqueid = registration.uniqueid,
        endpoint = %registration.subscription.endpoint,
        clients,
        "push subscription registered"
    );
    Ok(Json(json!({ "status": "ok", "uniqueid": registration.uniqueid })))
}

/// `POST /sync` with a deferred payload; the payload must carry a `tag`.
pub async fn sync(Json(payload): Json<Value>) -> Result<(StatusCode, Json<Value>), ProxyError> {
    let Some(tag) = payload.get("tag").and_then(Value::as_str) else {
        return Err(ProxyError::InvalidInput("sync payload needs a 'tag'".into()));
    };
    tracing::info!(tag, payload = %payload, "sync delivery received");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "ok", "tag": tag }))))
}
