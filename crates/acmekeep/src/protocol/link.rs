//! `Link` response header parsing (RFC 8288 subset)

use http::header::LINK;
use http::HeaderMap;

/// One `<uri>; rel="..."` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub uri: String,
    pub rel: String,
}

/// Parse a single `Link` header value into its entries
///
/// Entries without a `rel` parameter are skipped.
pub fn parse_link_header(value: &str) -> Vec<Link> {
    let mut links = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        let uri = rest[start + 1..start + end].trim().to_string();
        rest = &rest[start + end + 1..];

        // Parameters run until the next entry
        let params_end = rest.find('<').unwrap_or(rest.len());
        let params = &rest[..params_end];
        rest = &rest[params_end..];

        let rel = params
            .split(';')
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("rel"))
            .map(|(_, value)| {
                value
                    .trim()
                    .trim_end_matches(',')
                    .trim()
                    .trim_matches('"')
                    .to_string()
            });

        if let Some(rel) = rel {
            links.push(Link { uri, rel });
        }
    }

    links
}

/// First link with relation `rel` across all `Link` headers
pub fn find_link(headers: &HeaderMap, rel: &str) -> Option<Link> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_link_header)
        .find(|link| link.rel.split_whitespace().any(|r| r == rel))
}
