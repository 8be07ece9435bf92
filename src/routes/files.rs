use std::io::{self, SeekFrom};
use std::path::Path as FsPath;

use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
        StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::files::{Download, UploadRequest};
use crate::middleware::require_admin;
use crate::models::{AppState, FileRecord, UploadResult};
use crate::storage::BlobStream;
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router<AppState> {
    let admin = || middleware::from_fn_with_state(state.clone(), require_admin);

    Router::new()
        .route(
            "/v1/files",
            post(upload_file).get(list_files).route_layer(admin()),
        )
        .route("/v1/files/latest/{tag}", get(latest_by_tag))
        .route(
            "/v1/files/{id}",
            get(signed_download).merge(delete(delete_file).route_layer(admin())),
        )
}

/// A file part copied out of the request body, waiting for the rest of the form.
struct SpooledFile {
    name: String,
    mime_type: String,
    file: fs::File,
}

/// Multipart upload with a `file` field and an optional `tag` text field, in
/// either order. The file part is spooled to an anonymous temp file under the
/// data directory until the whole form has been read.
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResult>)> {
    let mut tag = None;
    let mut spooled = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("tag") => tag = Some(field.text().await?),
            Some("file") => {
                if spooled.is_some() {
                    return Err(AppError::InvalidRequest(
                        "only one \"file\" field is allowed".to_string(),
                    ));
                }
                let name = field.file_name().unwrap_or_default().to_string();
                let mime_type = match field.content_type() {
                    Some(content_type) => content_type.to_string(),
                    None => mime_guess::from_path(&name)
                        .first_or_octet_stream()
                        .to_string(),
                };
                info!(name = %name, "File upload request received");

                let file = spool_field(
                    &state.config.storage.data_dir,
                    state.config.files.max_size,
                    &mut field,
                )
                .await?;
                spooled = Some(SpooledFile {
                    name,
                    mime_type,
                    file,
                });
            }
            _ => continue,
        }
    }

    let SpooledFile {
        name,
        mime_type,
        file,
    } = spooled.ok_or_else(|| {
        AppError::InvalidRequest("multipart field \"file\" is required".to_string())
    })?;

    let content: BlobStream<'static> = Box::pin(ReaderStream::new(file));
    let result = state
        .files
        .upload(UploadRequest {
            name,
            mime_type,
            tag,
            content,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// Copy `field` into an unnamed temp file in `dir` and rewind it. The file is
/// removed by the OS once its handle is dropped.
async fn spool_field(dir: &FsPath, max_size: u64, field: &mut Field<'_>) -> AppResult<fs::File> {
    fs::create_dir_all(dir).await.map_err(spool_error)?;
    let dir = dir.to_path_buf();
    let std_file = tokio::task::spawn_blocking(move || tempfile::tempfile_in(dir))
        .await
        .map_err(|e| AppError::Internal(format!("spool task failed: {}", e)))?
        .map_err(spool_error)?;

    let mut file = fs::File::from_std(std_file);
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > max_size {
            return Err(AppError::PayloadTooLarge(max_size));
        }
        file.write_all(&chunk).await.map_err(spool_error)?;
    }
    file.flush().await.map_err(spool_error)?;
    file.seek(SeekFrom::Start(0)).await.map_err(spool_error)?;

    Ok(file)
}

fn spool_error(e: io::Error) -> AppError {
    AppError::Internal(format!("failed to spool upload: {}", e))
}

async fn list_files(State(state): State<AppState>) -> AppResult<Json<Vec<FileRecord>>> {
    Ok(Json(state.files.list().await?))
}

async fn latest_by_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> AppResult<Response> {
    let url = state.files.resolve_latest_by_tag(&tag).await?;
    // Plain 302; Redirect::to would answer 303
    Ok((StatusCode::FOUND, [(LOCATION, url)]).into_response())
}

async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.files.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    signature: Option<String>,
}

async fn signed_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let signature = query.signature.unwrap_or_default();
    let Download { record, content } = state.files.download(&id, &signature).await?;

    let headers = [
        (CONTENT_TYPE, record.mime_type.clone()),
        (CONTENT_LENGTH, record.size.to_string()),
        (CONTENT_DISPOSITION, attachment_disposition(&record.name)),
    ];
    Ok((headers, Body::from_stream(content)).into_response())
}

/// Header-safe `Content-Disposition` value. Characters that could break out
/// of the quoted filename, and anything outside printable ASCII, become `_`.
fn attachment_disposition(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(
            attachment_disposition("a\"b\\c\r\nd.txt"),
            "attachment; filename=\"a_b_c__d.txt\""
        );
        assert_eq!(
            attachment_disposition("résumé.txt"),
            "attachment; filename=\"r_sum_.txt\""
        );
    }
}
