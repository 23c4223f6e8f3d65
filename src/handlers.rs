use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, Json},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::compress::{compress_image, is_compressible_image};
use crate::config::{CompressionSettings, Lang};
use crate::error::{PersistError, UploadError};
use crate::filename::{
    persist_unique, sanitize_filename, sanitize_filename_bytes, split_extension, write_unique,
};
use crate::models::{UploadRecord, UploadResponse};
use crate::page::render_upload_page;
use crate::spool::{SpoolBody, SpooledPart, Spooler, MAX_UPLOAD_SIZE, MEMORY_THRESHOLD};
use crate::state::AppState;
use crate::utils::display_timestamp;

/// multipart field name the page sends files under
pub const FILES_FIELD: &str = "files";

#[derive(Deserialize, Debug, Default)]
pub struct PageQuery {
    pub lang: Option<String>,
}

// serve the upload page for phones
pub async fn upload_page(Query(query): Query<PageQuery>) -> Html<String> {
    let lang = Lang::parse(query.lang.as_deref().unwrap_or_default());
    tracing::debug!("Serving upload page ({})", lang.as_str());
    Html(render_upload_page(lang))
}

// receive one or more files via multipart form data
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let span = tracing::info_span!("upload", request_id = %Uuid::new_v4());
    handle_upload(state, headers, multipart)
        .instrument(span)
        .await
}

async fn handle_upload(
    state: Arc<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    tracing::debug!("Processing file upload request");

    // settings are read once; later changes apply to the next request
    let settings = state.settings();
    let save_dir = settings
        .save_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or(UploadError::NotConfigured)?;

    tokio::fs::create_dir_all(&save_dir)
        .await
        .map_err(UploadError::SaveDir)?;

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > MAX_UPLOAD_SIZE) {
        return Err(UploadError::TooLarge);
    }

    let mut multipart = multipart.map_err(|e| UploadError::Parse(e.body_text()))?;
    let parts = spool_parts(&mut multipart, &save_dir).await?;
    if parts.is_empty() {
        return Err(UploadError::NoFiles);
    }

    tracing::debug!("Received {} file part(s)", parts.len());
    let files = persist_parts(&state, &save_dir, parts, settings.compression).await;

    tracing::info!("📦 Upload finished: {} file(s) saved", files.len());
    Ok(Json(UploadResponse {
        success: true,
        count: files.len(),
        files,
    }))
}

fn multipart_error(e: MultipartError) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge
    } else {
        UploadError::Parse(e.body_text())
    }
}

/// filename of a `files` part, `None` for any other field.
///
/// Names that are not valid UTF-8 are recovered from the raw header with the
/// offending bytes replaced.
fn file_part_name(field: &Field<'_>) -> Option<String> {
    let disposition = field.headers().get(header::CONTENT_DISPOSITION)?.as_bytes();

    let is_files = match field.name() {
        Some(name) => name == FILES_FIELD,
        None => disposition_param(disposition, "name") == Some(FILES_FIELD.as_bytes().to_vec()),
    };
    if !is_files {
        return None;
    }

    match field.file_name() {
        Some(name) => Some(name.to_string()),
        None => disposition_param(disposition, "filename").map(|raw| sanitize_filename_bytes(&raw)),
    }
}

/// value of `key` in a raw `Content-Disposition` header, unquoted
fn disposition_param(header: &[u8], key: &str) -> Option<Vec<u8>> {
    let mut rest = header;
    loop {
        let semi = rest.iter().position(|&b| b == b';')?;
        rest = rest[semi + 1..].trim_ascii_start();

        let eq = rest.iter().position(|&b| b == b'=')?;
        let name = rest[..eq].trim_ascii_end();
        if name.contains(&b';') {
            // parameter without a value
            continue;
        }

        let after = &rest[eq + 1..];
        let (value, tail) = match after.strip_prefix(b"\"") {
            Some(quoted) => unquote(quoted),
            None => {
                let end = after.iter().position(|&b| b == b';').unwrap_or(after.len());
                (after[..end].trim_ascii().to_vec(), &after[end..])
            }
        };

        if name.eq_ignore_ascii_case(key.as_bytes()) {
            return Some(value);
        }
        rest = tail;
    }
}

// body of a quoted-string up to the closing quote, and what follows it
fn unquote(quoted: &[u8]) -> (Vec<u8>, &[u8]) {
    let mut value = Vec::with_capacity(quoted.len());
    let mut bytes = quoted.iter().enumerate();
    while let Some((i, &b)) = bytes.next() {
        match b {
            b'"' => return (value, &quoted[i + 1..]),
            b'\\' => {
                if let Some((_, &escaped)) = bytes.next() {
                    value.push(escaped);
                }
            }
            _ => value.push(b),
        }
    }
    (value, &[])
}

/// receive every `files` part of the request; nothing is persisted yet.
///
/// On error every part received so far is dropped, which removes its temporary file.
pub async fn spool_parts(
    multipart: &mut Multipart,
    save_dir: &Path,
) -> Result<Vec<SpooledPart>, UploadError> {
    let mut spooler = Spooler::new(save_dir, MEMORY_THRESHOLD);
    let mut parts = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(file_name) = file_part_name(&field) else {
            tracing::trace!("Skipping form field {:?}", field.name());
            while field.chunk().await.map_err(multipart_error)?.is_some() {}
            continue;
        };

        let content_type = field.content_type().map(str::to_string);
        tracing::debug!("Receiving file: {} ({:?})", file_name, content_type);

        let mut writer = spooler.writer();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            writer.push(&chunk).await.map_err(UploadError::Spool)?;
        }
        let spilled = writer.is_spilled();
        let (body, size) = writer.finish().await.map_err(UploadError::Spool)?;
        tracing::trace!(
            "Spooled {} ({} bytes, on disk: {}, memory left: {})",
            file_name,
            size,
            spilled,
            spooler.memory_left()
        );

        parts.push(SpooledPart {
            file_name,
            content_type,
            size,
            body,
        });
    }

    Ok(parts)
}

/// persist each part independently; failures are logged and the part is left out
pub async fn persist_parts(
    state: &AppState,
    save_dir: &Path,
    parts: Vec<SpooledPart>,
    compression: CompressionSettings,
) -> Vec<UploadRecord> {
    let mut saved = Vec::with_capacity(parts.len());

    for part in parts {
        let raw_name = part.file_name.clone();
        match persist_part(save_dir, part, compression).await {
            Ok(record) => {
                state.add_record(record.clone());
                saved.push(record);
            }
            Err(e) => {
                tracing::warn!("❌ Skipping {}: {}", raw_name, e);
            }
        }
    }

    saved
}

async fn persist_part(
    dir: &Path,
    part: SpooledPart,
    compression: CompressionSettings,
) -> Result<UploadRecord, PersistError> {
    let safe_name = sanitize_filename(&part.file_name);
    tracing::trace!(
        "Sanitized filename: {} -> {} ({})",
        part.file_name,
        safe_name,
        part.content_type.as_deref().unwrap_or("unknown type")
    );

    if compression.enabled && is_compressible_image(&safe_name) {
        persist_compressed(dir, part, safe_name, compression).await
    } else {
        let size = part.size;
        let path = store_body(dir, &safe_name, part.body).await?;
        tracing::info!("✅ File saved: {:?} ({} bytes)", path, size);
        Ok(record_for(&path, size, false, 0))
    }
}

async fn persist_compressed(
    dir: &Path,
    part: SpooledPart,
    safe_name: String,
    compression: CompressionSettings,
) -> Result<UploadRecord, PersistError> {
    // decoding needs the whole file in memory anyway
    let original = part.read_all().await.map_err(PersistError::Spool)?;

    let result = {
        let data = original.clone();
        let name = safe_name.clone();
        tokio::task::spawn_blocking(move || compress_image(data, &name, compression.quality))
            .await?
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("Compression failed for {}: {}, saving original", safe_name, e);
            let path = store_body(dir, &safe_name, part.body).await?;
            tracing::info!(
                "✅ File saved (compression failed, original): {:?} ({} bytes)",
                path,
                original.len()
            );
            return Ok(record_for(&path, original.len() as u64, false, 0));
        }
    };

    let (base, ext) = split_extension(&safe_name);

    if compression.keep_original {
        let original_name = format!("{}_original{}", base, ext);
        match store_body(dir, &original_name, part.body).await {
            Ok(path) => tracing::info!("Original copy saved: {:?} ({} bytes)", path, part.size),
            Err(e) => tracing::warn!("Failed to save original copy {}: {}", original_name, e),
        }
    }

    // webp and .jpeg come back as .jpg
    let out_name = if result.did_compress && ext.to_ascii_lowercase() != result.extension {
        format!("{}{}", base, result.extension)
    } else {
        safe_name.clone()
    };

    let size = result.data.len() as u64;
    let path = store_body(dir, &out_name, SpoolBody::Memory(result.data)).await?;

    if result.did_compress {
        tracing::info!(
            "✅ File saved (compressed): {:?} ({} bytes → {} bytes)",
            path,
            result.original_size,
            result.new_size
        );
    } else {
        tracing::info!("✅ File saved (no size reduction): {:?} ({} bytes)", path, size);
    }

    Ok(record_for(&path, size, result.did_compress, result.original_size))
}

// claim a unique name for the body off the async threads
async fn store_body(dir: &Path, name: &str, body: SpoolBody) -> Result<PathBuf, PersistError> {
    let dir = dir.to_path_buf();
    let name = name.to_string();
    let target = dir.join(&name).display().to_string();

    tokio::task::spawn_blocking(move || match body {
        SpoolBody::Memory(data) => write_unique(&dir, &name, &data),
        SpoolBody::Disk(temp) => persist_unique(&dir, &name, temp),
    })
    .await?
    .map_err(|source| PersistError::Write {
        path: target,
        source,
    })
}

fn record_for(path: &Path, size: u64, compressed: bool, original_size: u64) -> UploadRecord {
    UploadRecord {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size,
        timestamp: display_timestamp(),
        save_path: path.to_string_lossy().to_string(),
        compressed,
        original_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_params_are_found_by_exact_name() {
        let header = b"form-data; name=\"files\"; filename=\"caf\xff.txt\"";
        assert_eq!(disposition_param(header, "name"), Some(b"files".to_vec()));
        assert_eq!(
            disposition_param(header, "filename"),
            Some(b"caf\xff.txt".to_vec())
        );
        assert_eq!(disposition_param(header, "size"), None);
    }

    #[test]
    fn disposition_params_handle_escapes_and_bare_values() {
        let header = b"form-data; flag; name=files ; filename=\"a \\\"b\\\" c;d.txt\"";
        assert_eq!(disposition_param(header, "name"), Some(b"files".to_vec()));
        assert_eq!(
            disposition_param(header, "filename"),
            Some(b"a \"b\" c;d.txt".to_vec())
        );
    }
}
