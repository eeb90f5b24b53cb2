//! HTTP API handlers

use crate::protocol::{
    blocking, ReplayError, ReplayRequest, CALLBACK_HEADER, SIM_ENGINE_HEADER, SIM_TARGET_HEADER,
    SIM_TRANSLATE_HEADER,
};
use crate::AppState;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use replay_core::params::{ParamValue, RequestParams};
use replay_core::store::TableInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// Largest url-encoded body read
const MAX_FORM_BYTES: usize = 2 * 1024 * 1024;

/// Encoding of a request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    UrlEncoded,
    Multipart,
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplayQuery {
    pub original_endpoint: Option<String>,
}

#[derive(Serialize)]
pub struct TablesResponse {
    pub tables: Vec<TableInfo>,
    pub active_table: String,
}

/// Replay protocol endpoint
pub async fn replay(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReplayQuery>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let params = match form_params(&headers, request).await {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };

    let request = ReplayRequest {
        endpoint: query.original_endpoint.unwrap_or_default(),
        callback: header_value(&headers, CALLBACK_HEADER),
        sim_target: header_value(&headers, SIM_TARGET_HEADER),
        sim_engine: header_value(&headers, SIM_ENGINE_HEADER),
        sim_translate: header_value(&headers, SIM_TRANSLATE_HEADER),
        params,
    };

    match state.service.handle(request).await {
        Ok(outcome) => outcome.into_response(),
        Err(e) => e.into_response(),
    }
}

/// List tables with their row counts and the active table
pub async fn tables(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TablesResponse>, ReplayError> {
    let store = state.service.store();
    let tables = blocking(move || store.list_tables()).await?;
    let active_table = state.service.active_table().await?;

    Ok(Json(TablesResponse {
        tables,
        active_table,
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return BodyKind::UrlEncoded;
    };

    let content_type = content_type.trim().to_ascii_lowercase();
    if content_type.starts_with(FORM_CONTENT_TYPE) {
        BodyKind::UrlEncoded
    } else if content_type.starts_with(MULTIPART_CONTENT_TYPE) {
        BodyKind::Multipart
    } else {
        BodyKind::Other
    }
}

/// Form parameters of the request body
///
/// Url-encoded and multipart forms are read; other bodies carry no
/// parameters.
async fn form_params(
    headers: &HeaderMap,
    request: Request,
) -> Result<RequestParams, ReplayError> {
    match body_kind(headers) {
        BodyKind::UrlEncoded => {
            let body = axum::body::to_bytes(request.into_body(), MAX_FORM_BYTES)
                .await
                .map_err(|e| ReplayError::InvalidBody(e.to_string()))?;
            Ok(url_encoded_params(&body))
        }
        BodyKind::Multipart => multipart_params(request).await,
        BodyKind::Other => {
            debug!("Ignoring non-form request body");
            Ok(RequestParams::new())
        }
    }
}

fn url_encoded_params(body: &[u8]) -> RequestParams {
    RequestParams::from_form(url::form_urlencoded::parse(body).into_owned())
}

/// Text fields of a multipart form; a repeated name keeps its last value
async fn multipart_params(request: Request) -> Result<RequestParams, ReplayError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ReplayError::InvalidBody(e.to_string()))?;

    let mut params = RequestParams::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ReplayError::InvalidBody(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| ReplayError::InvalidBody(e.to_string()))?;
        params.insert(name, ParamValue::parse(&value));
    }
    Ok(params)
}
