use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tag of one repository at one point in time.
///
/// Immutable once constructed; an update is always a whole-value
/// substitution keyed by `tag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub tag: String,
    pub created: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

impl Image {
    pub fn new(tag: impl Into<String>, created: DateTime<Utc>, labels: BTreeMap<String, String>) -> Self {
        Image {
            tag: tag.into(),
            created,
            labels,
        }
    }

    /// Evaluates a label-equality and creation-window filter against this
    /// image, per the search query semantics in the read API.
    pub fn matches(
        &self,
        created_after: Option<DateTime<Utc>>,
        created_before: Option<DateTime<Utc>>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        if let Some(after) = created_after {
            if self.created <= after {
                return false;
            }
        }
        if let Some(before) = created_before {
            if self.created >= before {
                return false;
            }
        }
        labels
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn image(tag: &str, created: DateTime<Utc>, labels: &[(&str, &str)]) -> Image {
        Image::new(
            tag,
            created,
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn filters_on_creation_window() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let img = image("v1", t, &[]);

        assert!(img.matches(None, None, &BTreeMap::new()));
        assert!(!img.matches(Some(t), None, &BTreeMap::new()));
        assert!(!img.matches(None, Some(t), &BTreeMap::new()));
        assert!(img.matches(
            Some(t - chrono::Duration::seconds(1)),
            Some(t + chrono::Duration::seconds(1)),
            &BTreeMap::new()
        ));
    }

    #[test]
    fn filters_on_label_equality() {
        let t = Utc::now();
        let img = image("v1", t, &[("env", "prod")]);
        let mut query = BTreeMap::new();
        query.insert("env".to_string(), "prod".to_string());
        assert!(img.matches(None, None, &query));

        query.insert("env".to_string(), "staging".to_string());
        assert!(!img.matches(None, None, &query));

        query.insert("missing".to_string(), "x".to_string());
        assert!(!img.matches(None, None, &query));
    }
}
