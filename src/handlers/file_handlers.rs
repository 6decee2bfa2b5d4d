//! HTTP handlers for the file API. Bodies are streamed in both directions;
//! validation and storage live in `UploadGateway`.

use crate::{
    auth::Claims,
    errors::AppError,
    models::{
        dto::{BlobEntry, UploadResponse},
        stored_object::StoredObject,
    },
    services::{
        gateway_service::{GatewayError, ListFilter, UploadGateway},
        object_store::ByteStream,
    },
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::io;

/// Multipart part carrying the upload.
pub const FILE_FIELD: &str = "arquivo";

const MAX_LIST_LIMIT: usize = 5000;

/// Optional narrowing accepted by `GET /Listar`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

/// POST `/Carregar` — upload one multipart file.
///
/// Uses the part named `arquivo`, or failing that the first part that
/// carries a file name.
pub async fn upload_file(
    State(gateway): State<UploadGateway>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) && field.file_name().is_none() {
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(GatewayError::MissingFile.into());
        };
        let content_type = field.content_type().map(str::to_string);
        tracing::debug!(
            user = %claims.sub,
            file_name = %file_name,
            content_type = ?content_type,
            "receiving upload"
        );

        let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();
        let response = gateway
            .upload_file(&file_name, content_type.as_deref(), body)
            .await?;
        return Ok(Json(response));
    }

    Err(GatewayError::MissingFile.into())
}

/// GET `/Download/{*nome}` — stream a stored object back.
pub async fn download_file(
    State(gateway): State<UploadGateway>,
    Path(nome): Path<String>,
) -> Result<Response, AppError> {
    let (meta, stream) = gateway.download_file(&nome).await?;

    let mut response = object_response(&meta, stream);
    if let Ok(value) = HeaderValue::from_str(&content_disposition(meta.file_name())) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// GET `/blobs/{container}/{*nome}` — the address handed out as `Uri` in
/// upload and listing responses. Served inline, without an attachment name.
pub async fn read_blob(
    State(gateway): State<UploadGateway>,
    Path((container, nome)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if container != gateway.container() {
        return Err(GatewayError::NotFound(format!("{}/{}", container, nome)).into());
    }
    let (meta, stream) = gateway.download_file(&nome).await?;
    Ok(object_response(&meta, stream))
}

/// DELETE `/Apagar/{*nome}` — idempotent delete.
pub async fn delete_file(
    State(gateway): State<UploadGateway>,
    Path(nome): Path<String>,
) -> Result<StatusCode, AppError> {
    gateway.delete_file(&nome).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/Listar` — every object in the container.
pub async fn list_files(
    State(gateway): State<UploadGateway>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<BlobEntry>>, AppError> {
    let filter = ListFilter {
        prefix: q.prefix,
        limit: q.limit.map(|limit| limit.clamp(1, MAX_LIST_LIMIT)),
    };
    Ok(Json(gateway.list_files(&filter).await?))
}

fn object_response(meta: &StoredObject, stream: ByteStream<'static>) -> Response {
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), meta);
    response
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Ok(value) = HeaderValue::from_str(&meta.quoted_etag()) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment` disposition with an ASCII fallback name plus the RFC 5987
/// UTF-8 form.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(file_name, NON_ALPHANUMERIC)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_escapes_unsafe_names() {
        assert_eq!(
            content_disposition("photo.JPG"),
            "attachment; filename=\"photo.JPG\"; filename*=UTF-8''photo%2EJPG"
        );
        let value = content_disposition("relatório \"final\".pdf");
        assert!(value.starts_with("attachment; filename=\"relat_rio _final_.pdf\""));
        assert!(value.contains("filename*=UTF-8''relat%C3%B3rio%20%22final%22%2Epdf"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }
}
