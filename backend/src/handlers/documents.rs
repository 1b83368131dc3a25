//! Document endpoints

use crate::app::AppState;
use crate::database::{Document, DocumentDetail, DocumentList};
use crate::error::{AppError, Result};
use crate::services::{DocumentUpload, Principal};
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

const SPREADSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Json<DocumentList>> {
    authenticate(&state, &headers)?;
    let list = state.documents.read_list(params.skip, params.limit).await?;
    Ok(Json(list))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<DocumentDetail>> {
    authenticate(&state, &headers)?;
    let detail = state.documents.read_detail(id).await?;
    Ok(Json(detail))
}

pub async fn create_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Document>)> {
    let principal = authenticate(&state, &headers)?;
    let upload = read_upload(multipart).await?;

    let document = state.documents.ingest(&principal, upload).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn replace_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Document>> {
    let principal = authenticate(&state, &headers)?;
    let upload = read_upload(multipart).await?;

    let document = state.documents.replace(&principal, id, upload).await?;
    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let principal = authenticate(&state, &headers)?;
    state.documents.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    authenticate(&state, &headers)?;
    let (bytes, filename) = state.documents.compose(id).await?;
    Ok((attachment_headers(&filename)?, bytes))
}

pub async fn download_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    authenticate(&state, &headers)?;
    let (bytes, filename) = state.documents.read_source(id).await?;
    Ok((attachment_headers(&filename)?, bytes))
}

/// Resolve the `Authorization: Bearer` credential to a principal.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    state.authenticator.authenticate(credential)
}

/// Collect the `file`, `title` and `body` parts of an upload form.
async fn read_upload(mut multipart: Multipart) -> Result<DocumentUpload> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title: Option<String> = None;
    let mut body = String::new();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(form_error)?;
                file = Some((filename, bytes.to_vec()));
            }
            "title" => title = Some(field.text().await.map_err(form_error)?),
            "body" => body = field.text().await.map_err(form_error)?,
            other => tracing::debug!("Ignoring form field {:?}", other),
        }
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::validation("file", "is required"))?;
    let title = title.ok_or_else(|| AppError::validation("title", "is required"))?;

    Ok(DocumentUpload {
        bytes,
        filename,
        title,
        body,
    })
}

fn form_error(e: MultipartError) -> AppError {
    AppError::validation("file", e.body_text())
}

/// Headers for a workbook download. Export filenames are already sanitized
/// to printable ASCII without quotes.
fn attachment_headers(filename: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(SPREADSHEET_CONTENT_TYPE),
    );

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .map_err(|e| AppError::Generic(format!("invalid download filename: {}", e)))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_headers() {
        let headers = attachment_headers("Quarterly_Report_20240102_030405.xlsx").unwrap();
        assert_eq!(
            headers.get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"Quarterly_Report_20240102_030405.xlsx\""
        );
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            SPREADSHEET_CONTENT_TYPE
        );
    }
}
