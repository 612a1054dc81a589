use crate::error::{ApiError, Result};
use url::Url;

/// Parse a configured base URL.
pub(crate) fn base(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ApiError::Configuration(format!("invalid base URL '{}': {}", raw, e)))
}

/// Append encoded path segments and query pairs to `base`.
///
/// Each segment is percent-encoded as a whole, so a `/` inside a value never
/// introduces an extra path level. Use [`split_path`] for values that are
/// meant to span several levels.
pub(crate) fn join<'a, I>(base: &Url, segments: I, query: &[(&str, &str)]) -> Result<Url>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Configuration(format!("URL cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().copied());
    }
    Ok(url)
}

/// Split a repository file path into non-empty segments.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
