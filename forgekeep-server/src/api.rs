//! v3 API route handlers.
//!
//! Thin plumbing between the HTTP surface and the registry: path/query
//! decoding, slug validation, and the pagination envelope. All real work
//! happens behind the [`Registry`](crate::registry::Registry) trait.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::archive::ARCHIVE_SUFFIX;
use crate::error::{AppError, AppResult};
use crate::registry::{Module, Release};
use crate::slug;
use crate::state::{AppState, SuccessResponse};

const DEFAULT_PAGE_LIMIT: usize = 20;

/// Query parameters accepted by the list endpoints.
#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Filter by owner slug
    pub owner: Option<String>,
    /// Filter by owning module slug (releases only)
    pub module: Option<String>,
}

/// Pagination envelope mirroring the module-distribution protocol.
#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub first: String,
    pub previous: Option<String>,
    pub current: String,
    pub next: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub pagination: Pagination,
    pub results: Vec<T>,
}

/// Slice a filtered result set into one page with navigation links.
fn paginate<T>(base: &str, items: Vec<T>, limit: usize, offset: usize) -> AppResult<Paginated<T>> {
    let total = items.len();
    if offset > 0 && offset >= total {
        return Err(AppError::NotFound(format!(
            "the given offset {} is larger than the total number of results",
            offset
        )));
    }

    let link = |off: usize| format!("{}?limit={}&offset={}", base, limit, off);
    let results: Vec<T> = items.into_iter().skip(offset).take(limit).collect();

    let next_offset = offset + results.len();
    let pagination = Pagination {
        limit,
        offset,
        total,
        first: link(0),
        previous: if offset > 0 {
            offset.checked_sub(limit).map(&link)
        } else {
            None
        },
        current: link(offset),
        next: (next_offset < total).then(|| link(next_offset)),
    };

    Ok(Paginated {
        pagination,
        results,
    })
}

/// `GET /v3/modules`
pub async fn list_modules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Paginated<Module>>> {
    let mut modules = state.registry.get_all_modules().await?;
    if let Some(owner) = &params.owner {
        modules.retain(|m| &m.owner.slug == owner);
    }
    // Map iteration order is arbitrary; pages must be stable
    modules.sort_by(|a, b| a.slug.cmp(&b.slug));

    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = params.offset.unwrap_or(0);
    Ok(Json(paginate("/v3/modules", modules, limit, offset)?))
}

/// `GET /v3/modules/{slug}`
pub async fn get_module(
    State(state): State<Arc<AppState>>,
    Path(module_slug): Path<String>,
) -> AppResult<Json<Module>> {
    if !slug::is_valid_module_slug(&module_slug) {
        return Err(AppError::BadRequest(format!(
            "invalid module slug: {}",
            module_slug
        )));
    }
    let module = state.registry.get_module_by_slug(&module_slug).await?;
    Ok(Json(module))
}

/// `DELETE /v3/modules/{slug}`
pub async fn delete_module(
    State(state): State<Arc<AppState>>,
    Path(module_slug): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    if !slug::is_valid_module_slug(&module_slug) {
        return Err(AppError::BadRequest(format!(
            "invalid module slug: {}",
            module_slug
        )));
    }
    state.registry.delete_module_by_slug(&module_slug).await?;
    Ok(Json(SuccessResponse {
        message: format!("module {} deleted", module_slug),
    }))
}

/// `GET /v3/releases`
pub async fn list_releases(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Paginated<Release>>> {
    let mut releases = state.registry.get_all_releases().await?;
    if let Some(module) = &params.module {
        releases.retain(|r| &r.module.slug == module);
    }
    if let Some(owner) = &params.owner {
        releases.retain(|r| &r.module.owner.slug == owner);
    }
    releases.sort_by(|a, b| a.slug.cmp(&b.slug));

    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = params.offset.unwrap_or(0);
    Ok(Json(paginate("/v3/releases", releases, limit, offset)?))
}

/// `GET /v3/releases/{slug}`
pub async fn get_release(
    State(state): State<Arc<AppState>>,
    Path(release_slug): Path<String>,
) -> AppResult<Json<Release>> {
    if !slug::is_valid_release_slug(&release_slug) {
        return Err(AppError::BadRequest(format!(
            "invalid release slug: {}",
            release_slug
        )));
    }
    let release = state.registry.get_release_by_slug(&release_slug).await?;
    Ok(Json(release))
}

/// `POST /v3/releases`
///
/// Publish a release: the request body is the raw `.tar.gz` archive.
pub async fn publish_release(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Release>)> {
    if body.is_empty() {
        return Err(AppError::BadRequest("empty archive payload".to_string()));
    }
    let release = state.registry.add_release(&body).await?;
    info!(slug = %release.slug, size = body.len(), "Release published");
    Ok((StatusCode::CREATED, Json(release)))
}

/// `DELETE /v3/releases/{slug}`
pub async fn delete_release(
    State(state): State<Arc<AppState>>,
    Path(release_slug): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    if !slug::is_valid_release_slug(&release_slug) {
        return Err(AppError::BadRequest(format!(
            "invalid release slug: {}",
            release_slug
        )));
    }
    state.registry.delete_release_by_slug(&release_slug).await?;
    Ok(Json(SuccessResponse {
        message: format!("release {} deleted", release_slug),
    }))
}

/// `GET /v3/files/{filename}`
///
/// Serve a release archive. The filename is validated against the release
/// slug grammar before it touches the filesystem, which also rules out path
/// traversal.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> AppResult<impl IntoResponse> {
    let release_slug = filename
        .strip_suffix(ARCHIVE_SUFFIX)
        .ok_or_else(|| AppError::BadRequest(format!("not an archive file: {}", filename)))?;
    if !slug::is_valid_release_slug(release_slug) {
        return Err(AppError::BadRequest(format!(
            "invalid release slug: {}",
            release_slug
        )));
    }

    let module_slug = slug::module_slug_of_release(release_slug);
    let path = state
        .config
        .storage
        .modules_dir
        .join(module_slug)
        .join(&filename);

    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound("The file does not exist.".to_string())
        } else {
            AppError::Io(e)
        }
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "application/gzip".parse().unwrap());
    if let Ok(value) = format!("attachment; filename=\"{}\"", filename).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_slices_and_links() {
        let items: Vec<u32> = (0..45).collect();
        let page = paginate("/v3/modules", items, 20, 20).unwrap();

        assert_eq!(page.results.len(), 20);
        assert_eq!(page.results[0], 20);
        assert_eq!(page.pagination.total, 45);
        assert_eq!(page.pagination.first, "/v3/modules?limit=20&offset=0");
        assert_eq!(
            page.pagination.previous.as_deref(),
            Some("/v3/modules?limit=20&offset=0")
        );
        assert_eq!(
            page.pagination.next.as_deref(),
            Some("/v3/modules?limit=20&offset=40")
        );
    }

    #[test]
    fn test_paginate_last_page_has_no_next() {
        let items: Vec<u32> = (0..45).collect();
        let page = paginate("/v3/modules", items, 20, 40).unwrap();
        assert_eq!(page.results.len(), 5);
        assert!(page.pagination.next.is_none());
    }

    #[test]
    fn test_paginate_empty_set_is_ok_at_offset_zero() {
        let page = paginate::<u32>("/v3/modules", Vec::new(), 20, 0).unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.pagination.total, 0);
        assert!(page.pagination.next.is_none());
    }

    #[test]
    fn test_paginate_offset_beyond_total_fails() {
        let items: Vec<u32> = (0..10).collect();
        let err = paginate("/v3/modules", items, 20, 10).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
