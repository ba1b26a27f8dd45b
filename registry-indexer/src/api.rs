//! The read API: repository listing, tag search, single-image lookup,
//! metrics and static API documentation.

use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use indexer_model::{Image, Index, Reference};
use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;

const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    offset: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct SearchResponse<'a> {
    #[serde(rename = "name")]
    repository: &'a str,
    images: Vec<&'a Image>,
    offset: usize,
    limit: usize,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct RepositoryStatus {
    name: String,
    images: usize,
}

#[derive(Serialize, Deserialize)]
struct ListRepositoriesResponse {
    repositories: Vec<RepositoryStatus>,
}

fn parse_repository(raw: &str) -> Result<Reference, HttpResponse> {
    Reference::parse(raw).map_err(|e| HttpResponse::BadRequest().body(format!("invalid repository name: {e}")))
}

#[get("/repositories")]
async fn list_repositories(index: web::Data<Arc<Index>>) -> HttpResponse {
    let repositories = index
        .read()
        .values()
        .map(|repo| RepositoryStatus {
            name: repo.name.clone(),
            images: repo.len(),
        })
        .collect();
    HttpResponse::Ok().json(ListRepositoriesResponse { repositories })
}

#[get("/repositories/{repository:.*}/tags/{tag}")]
async fn get_image(
    path: web::Path<(String, String)>,
    index: web::Data<Arc<Index>>,
) -> HttpResponse {
    let (repository, tag) = path.into_inner();
    let reference = match parse_repository(&repository) {
        Ok(reference) => reference,
        Err(response) => return response,
    };

    let repos = index.read();
    let Some(repo) = repos.get(reference.name()) else {
        return HttpResponse::NotFound().body("repository not found");
    };
    match repo.get_image(&tag) {
        Some(image) => HttpResponse::Ok().json(image),
        None => HttpResponse::NotFound().body("image not found in repository"),
    }
}

#[get("/repositories/{repository:.*}/tags")]
async fn search_repository_get(
    path: web::Path<String>,
    pagination: web::Query<Pagination>,
    index: web::Data<Arc<Index>>,
) -> HttpResponse {
    search_repository(&path.into_inner(), &pagination, SearchQuery::default(), &index)
}

#[post("/repositories/{repository:.*}/tags")]
async fn search_repository_post(
    path: web::Path<String>,
    pagination: web::Query<Pagination>,
    body: web::Json<SearchQuery>,
    index: web::Data<Arc<Index>>,
) -> HttpResponse {
    search_repository(&path.into_inner(), &pagination, body.into_inner(), &index)
}

fn search_repository(
    repository: &str,
    pagination: &Pagination,
    query: SearchQuery,
    index: &Index,
) -> HttpResponse {
    let reference = match parse_repository(repository) {
        Ok(reference) => reference,
        Err(response) => return response,
    };

    let repos = index.read();
    let Some(repo) = repos.get(reference.name()) else {
        return HttpResponse::NotFound().body("not found");
    };

    let matched: Vec<&Image> = repo
        .images()
        .iter()
        .filter(|image| image.matches(query.created_after, query.created_before, &query.labels))
        .collect();

    let offset = pagination.offset.unwrap_or(0) as usize;
    let limit = pagination.limit.map(|l| l as usize).unwrap_or(DEFAULT_LIMIT);
    let start = offset.min(matched.len());
    let end = (start + limit).min(matched.len());

    HttpResponse::Ok().json(SearchResponse {
        repository: reference.name(),
        images: matched[start..end].to_vec(),
        offset: start,
        limit,
        count: matched.len(),
    })
}

#[get("/metrics")]
async fn metrics(metrics: web::Data<Arc<Metrics>>) -> HttpResponse {
    match metrics.encode() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().body(format!("failed to encode metrics: {e}")),
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_repositories)
        .service(get_image)
        .service(search_repository_get)
        .service(search_repository_post)
        .service(metrics);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use std::collections::BTreeMap as Map;

    fn sample_index() -> Arc<Index> {
        let index = Arc::new(Index::new());
        let reference = Reference::parse("r.example/ns/app:v1").unwrap();
        index.replace_image(&reference, Image::new("v1", Utc::now(), Map::new()));
        index
    }

    #[actix_web::test]
    async fn lists_repositories() {
        let index = sample_index();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(index))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/repositories").to_request();
        let resp: ListRepositoriesResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.repositories.len(), 1);
        assert_eq!(resp.repositories[0].name, "r.example/ns/app");
    }

    #[actix_web::test]
    async fn returns_404_for_missing_image() {
        let index = sample_index();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(index))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/repositories/r.example/ns/app/tags/missing")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }
}
