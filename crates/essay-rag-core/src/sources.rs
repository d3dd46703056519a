//! Citation extraction and deduplication.

use std::collections::HashSet;

use crate::models::{Document, Source};

/// Drop later sources whose `title` was already seen.
///
/// First occurrence wins and order is preserved. Equality is by title
/// alone: two different URLs sharing a title collapse into the first.
pub fn dedup_sources<I>(sources: I) -> Vec<Source>
where
    I: IntoIterator<Item = Source>,
{
    let mut seen: HashSet<String> = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.title.clone()))
        .collect()
}

/// The deduplicated citations for a list of retrieved documents.
pub fn sources_for<'a, I>(documents: I) -> Vec<Source>
where
    I: IntoIterator<Item = &'a Document>,
{
    dedup_sources(documents.into_iter().map(Document::source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(title: &str, url: &str) -> Source {
        Source {
            title: title.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_first_occurrence_wins() {
        let out = dedup_sources(vec![
            src("A", "https://a/1"),
            src("B", "https://b"),
            src("A", "https://a/2"),
        ]);
        assert_eq!(out, vec![src("A", "https://a/1"), src("B", "https://b")]);
    }

    #[test]
    fn test_preserves_order() {
        let out = dedup_sources(vec![src("C", "c"), src("A", "a"), src("B", "b"), src("A", "a")]);
        let titles: Vec<&str> = out.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_idempotent() {
        let input = vec![src("A", "1"), src("A", "2"), src("B", "3"), src("B", "3"), src("C", "4")];
        let once = dedup_sources(input);
        let twice = dedup_sources(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_same_url_different_titles_kept() {
        let out = dedup_sources(vec![src("A", "same"), src("B", "same")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty() {
        assert!(dedup_sources(Vec::new()).is_empty());
    }

    #[test]
    fn test_sources_for_documents() {
        let docs = vec![
            Document::new("x", "A", "https://a"),
            Document::new("y", "B", "https://b"),
            Document::new("z", "A", "https://a"),
        ];
        assert_eq!(
            sources_for(&docs),
            vec![src("A", "https://a"), src("B", "https://b")]
        );
    }
}
