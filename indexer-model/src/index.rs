use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};

use crate::{Error, Image, Reference, Repository};

/// The in-memory catalog of repositories. Created empty, hydrated from a
/// snapshot at startup, mutated exclusively by the Indexing Engine, and
/// read concurrently by the API under the readers-writer lock.
#[derive(Debug, Default)]
pub struct Index {
    repositories: RwLock<HashMap<String, Repository>>,
}

impl Index {
    pub fn new() -> Self {
        Index {
            repositories: RwLock::new(HashMap::new()),
        }
    }

    /// Acquires the read lock for the duration of a read operation.
    /// Callers hold the returned guard while they build their response.
    pub fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Repository>> {
        self.repositories.read().expect("index lock poisoned")
    }

    /// Wholesale substitution of every repository. Used by `IndexAll`.
    pub fn replace_all_repositories(&self, repositories: HashMap<String, Repository>) {
        *self.repositories.write().expect("index lock poisoned") = repositories;
    }

    /// Single-key substitution. Used by `IndexRepository`.
    pub fn replace_repository(&self, repository: Repository) {
        let mut repos = self.repositories.write().expect("index lock poisoned");
        repos.insert(repository.name.clone(), repository);
    }

    /// Upserts a single image. If the repository exists, the image is
    /// updated in place; otherwise a new repository is created containing
    /// only this image.
    pub fn replace_image(&self, reference: &Reference, image: Image) {
        let mut repos = self.repositories.write().expect("index lock poisoned");
        let name = reference.trim_tag().name().to_string();
        repos
            .entry(name.clone())
            .or_insert_with(|| Repository::empty(name))
            .update_image(image);
    }

    /// Removes an image by tag from its repository, if both exist. Never
    /// fails; a missing repository or tag is a no-op.
    pub fn delete_image(&self, reference: &Reference) {
        let Ok(tag) = reference.require_tag() else {
            return;
        };
        let mut repos = self.repositories.write().expect("index lock poisoned");
        if let Some(repo) = repos.get_mut(reference.trim_tag().name()) {
            repo.delete_image(tag);
        }
    }

    /// Snapshots the index into its JSON wire representation.
    pub fn to_snapshot(&self) -> IndexSnapshot {
        let repos = self.repositories.read().expect("index lock poisoned");
        IndexSnapshot(
            repos
                .values()
                .map(|r| (r.name.clone(), r.images().to_vec()))
                .collect(),
        )
    }

    /// Rebuilds the index from a loaded snapshot, re-sorting each
    /// repository's images as it goes.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self, Error> {
        let mut repositories = HashMap::with_capacity(snapshot.0.len());
        for (name, images) in snapshot.0 {
            let reference = Reference::parse(&name)?;
            let canonical = reference.trim_tag().name().to_string();
            repositories.insert(canonical.clone(), Repository::from_images(canonical, images));
        }
        Ok(Index {
            repositories: RwLock::new(repositories),
        })
    }
}

/// The JSON-on-the-wire shape of a persisted snapshot: a mapping from
/// canonical repository name to its array of images. Sort order within
/// arrays is not required by the format; it is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSnapshot(pub HashMap<String, Vec<Image>>);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn image(tag: &str) -> Image {
        Image::new(tag, Utc::now(), BTreeMap::new())
    }

    #[test]
    fn replace_image_creates_repository_when_absent() {
        let index = Index::new();
        let reference = Reference::parse("r.example/ns/app:v1").unwrap();
        index.replace_image(&reference, image("v1"));

        let repos = index.read();
        let repo = repos.get("r.example/ns/app").unwrap();
        assert_eq!(repo.get_image("v1").unwrap().tag, "v1");
    }

    #[test]
    fn delete_image_is_noop_when_missing() {
        let index = Index::new();
        let reference = Reference::parse("r.example/ns/app:v1").unwrap();
        index.delete_image(&reference);
        assert!(index.read().is_empty());
    }

    #[test]
    fn snapshot_roundtrip_preserves_images() {
        let index = Index::new();
        let a = Reference::parse("r.example/ns/app:v1").unwrap();
        let b = Reference::parse("r.example/ns/app:v2").unwrap();
        let c = Reference::parse("r.example/ns/other:v1").unwrap();
        index.replace_image(&a, image("v1"));
        index.replace_image(&b, image("v2"));
        index.replace_image(&c, image("v1"));

        let snapshot = index.to_snapshot();
        let restored = Index::from_snapshot(snapshot).unwrap();

        let original = index.read();
        let loaded = restored.read();
        assert_eq!(original.len(), loaded.len());
        for (name, repo) in original.iter() {
            let loaded_repo = loaded.get(name).unwrap();
            assert_eq!(repo.images(), loaded_repo.images());
        }
    }

    #[test]
    fn every_repository_key_matches_its_name() {
        let index = Index::new();
        let reference = Reference::parse("r.example/ns/app:v1").unwrap();
        index.replace_image(&reference, image("v1"));
        for (key, repo) in index.read().iter() {
            assert_eq!(key, &repo.name);
        }
    }
}
