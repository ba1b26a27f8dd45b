use std::collections::HashMap;

use crate::Image;

/// An ordered set of [`Image`]s sharing a canonical repository name.
///
/// Invariant: `image_by_tag[image.tag] == image` for every image in
/// `images`, and no two images share a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub name: String,
    images: Vec<Image>,
    image_by_tag: HashMap<String, usize>,
}

impl Repository {
    /// Builds a repository from a name and an initial set of images,
    /// establishing the sort and tag-index invariants.
    pub fn from_images(name: impl Into<String>, images: Vec<Image>) -> Self {
        let mut repo = Repository {
            name: name.into(),
            images: Vec::new(),
            image_by_tag: HashMap::new(),
        };
        for image in images {
            repo.update_image(image);
        }
        repo
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Repository::from_images(name, Vec::new())
    }

    /// All images, sorted by `(created desc, tag asc)`.
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Looks up an image by tag.
    pub fn get_image(&self, tag: &str) -> Option<&Image> {
        self.image_by_tag.get(tag).map(|&i| &self.images[i])
    }

    /// Adds or replaces an image in the repository, preserving the sort
    /// invariant. If the tag is already present, the image is replaced
    /// in-place before resorting; otherwise it is appended.
    pub fn update_image(&mut self, image: Image) {
        if let Some(&i) = self.image_by_tag.get(&image.tag) {
            self.images[i] = image;
        } else {
            self.images.push(image);
        }
        self.sort();
    }

    /// Removes an image by tag. No-op if the tag is absent. The repository
    /// itself is retained even when this empties it.
    pub fn delete_image(&mut self, tag: &str) {
        if self.image_by_tag.remove(tag).is_none() {
            return;
        }
        self.images.retain(|img| img.tag != tag);
        self.reindex();
    }

    fn sort(&mut self) {
        self.images
            .sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.tag.cmp(&b.tag)));
        self.reindex();
    }

    fn reindex(&mut self) {
        self.image_by_tag = self
            .images
            .iter()
            .enumerate()
            .map(|(i, img)| (img.tag.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    fn img(tag: &str, offset_secs: i64) -> Image {
        Image::new(tag, t(offset_secs), BTreeMap::new())
    }

    #[test]
    fn sorts_by_created_desc_tag_asc() {
        let repo = Repository::from_images(
            "r.example/ns/app",
            vec![img("v1", 0), img("v2", 10), img("v3", 10)],
        );
        let tags: Vec<_> = repo.images().iter().map(|i| i.tag.as_str()).collect();
        assert_eq!(tags, vec!["v2", "v3", "v1"]);
    }

    #[test]
    fn update_replaces_in_place_and_resorts() {
        let mut repo = Repository::from_images("r.example/ns/app", vec![img("v1", 0), img("v2", 10)]);
        repo.update_image(img("v1", 20));
        let tags: Vec<_> = repo.images().iter().map(|i| i.tag.as_str()).collect();
        assert_eq!(tags, vec!["v1", "v2"]);
    }

    #[test]
    fn delete_removes_and_keeps_repository() {
        let mut repo = Repository::from_images("r.example/ns/app", vec![img("v1", 0), img("v2", 10)]);
        repo.delete_image("v1");
        assert!(repo.get_image("v1").is_none());
        assert_eq!(repo.len(), 1);

        repo.delete_image("v2");
        assert!(repo.is_empty());
        assert_eq!(repo.name, "r.example/ns/app");
    }

    #[test]
    fn tag_index_matches_image_set() {
        let repo = Repository::from_images("r.example/ns/app", vec![img("v1", 0), img("v2", 10)]);
        for image in repo.images() {
            assert_eq!(repo.get_image(&image.tag), Some(image));
        }
    }
}
