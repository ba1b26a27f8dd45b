//! Concurrent fetch of images and repositories from a registry.
//!
//! Fan-out is bounded only by the registry client's own connection pool.
//! Unlike the fetch-then-abort shape in the reference implementation, a
//! single tag or repository failing a fetch does not stop its siblings:
//! every fetch in a fan-out always runs to completion, and the first
//! error (if any) is returned to the caller once they all have.

use futures::future::join_all;
use indexer_model::{Error, Repository};

use crate::registry::RegistryClient;

/// Fetches every tag of one repository concurrently and assembles the
/// result into a sorted [`Repository`]. If any tag fails to fetch, the
/// first such error is returned after every other tag has still been
/// attempted.
pub async fn fetch_repository(
    client: &RegistryClient,
    reference: &indexer_model::Reference,
) -> Result<Repository, Error> {
    let tags = client.tags(reference).await?;

    let fetches = tags.into_iter().map(|tag| async move {
        let tagged = reference.with_tag(&tag)?;
        client.image(&tagged).await
    });

    let images = join_all(fetches)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(Repository::from_images(reference.name(), images))
}

/// Fetches every repository in the registry's catalog concurrently.
/// Mirrors [`fetch_repository`]'s error semantics one level up: every
/// repository in the catalog is always attempted, and the first error (if
/// any) surfaces after the whole catalog has been fetched.
pub async fn fetch_repositories(client: &RegistryClient) -> Result<Vec<Repository>, Error> {
    let catalog = client.catalog().await?;

    let fetches = catalog
        .iter()
        .map(|reference| fetch_repository(client, reference));

    join_all(fetches).await.into_iter().collect()
}
