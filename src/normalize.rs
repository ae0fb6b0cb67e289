//! Artist/album name normalization.
//!
//! Splits a raw name into a leading article ("The", "Die", ...) and a
//! base name. The base name is what the catalog keys artists on; the
//! article is kept separately so "The Beatles" and "Beatles" resolve to
//! the same artist while browsing can still show the full name.

/// Recognized leading articles, longest first so that "Las" wins over
/// "La" and "The" is never shadowed by "A".
const ARTICLES: &[&str] = &[
    "The", "Los", "Las", "Les", "Die", "Der", "Das", "An", "La", "Le", "El", "A",
];

/// Split a raw name into `(prefix, base)`.
///
/// Matching is case-insensitive and must consume a strict prefix of the
/// string: the article has to be followed by a space and a non-empty
/// remainder, so a band actually named "The" keeps its name intact.
///
/// The prefix is returned exactly as observed in the input, not
/// canonicalized ("THE Artist" yields prefix "THE").
pub fn split_prefix(raw: &str) -> (&str, &str) {
    let trimmed = raw.trim();
    for article in ARTICLES {
        let len = article.len();
        if trimmed.len() <= len + 1 || !trimmed.is_char_boundary(len) {
            continue;
        }
        let (head, rest) = trimmed.split_at(len);
        if head.eq_ignore_ascii_case(article)
            && rest.starts_with(' ')
            && !rest.trim_start().is_empty()
        {
            return (head, rest.trim_start());
        }
    }
    ("", trimmed)
}
