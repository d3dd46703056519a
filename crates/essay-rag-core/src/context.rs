//! Context assembly: retrieved passages → one prompt block.

use crate::models::Document;

/// Separator placed between passages: exactly one blank line.
pub const PASSAGE_SEPARATOR: &str = "\n\n";

/// Concatenate document contents in input order, one blank line apart.
///
/// An empty slice yields an empty string.
pub fn assemble<'a, I>(documents: I) -> String
where
    I: IntoIterator<Item = &'a Document>,
{
    documents
        .into_iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}
