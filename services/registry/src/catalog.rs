//! Repository catalog endpoint

use axum::Router;
use axum::extract::State;
use axum::http::{Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Serialize;
use storage::Storage;

use crate::error::RegistryResult;
use crate::pagination::{Page, PageParams};

const CATALOG_PATH: &str = "/v2/_catalog";

/// Catalog response
#[derive(Debug, Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

pub(crate) fn router() -> Router<Storage> {
    Router::new().route(CATALOG_PATH, get(catalog))
}

/// List repositories, one page at a time
async fn catalog(State(storage): State<Storage>, uri: Uri) -> RegistryResult<Response> {
    let params = PageParams::from_uri(&uri);
    let fetched = storage.list_repositories(&params.fetch_options()).await?;
    let page = Page::from_fetched(fetched, params.limit());
    let link = page.next_link(CATALOG_PATH, &params);

    let mut response = Json(Catalog {
        repositories: page.items,
    })
    .into_response();

    if let Some(link) = link {
        response.headers_mut().insert(header::LINK, link);
    }
    Ok(response)
}
