// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! Match engine: decides whether a service satisfies a type/scope filter.
//!
//! Scope comparison is dialect-dependent. The default (RFC 3986) rule and
//! its ldap/uuid aliases compare scheme and authority case-insensitively
//! and treat the path as segments, percent-decoding each segment on its
//! own: an encoded `/` inside a segment stays literal and never splits
//! the path. A candidate scope matches when its segments are a prefix of
//! the target's. `strcmp0` is plain case-sensitive equality.

use crate::config::{MATCH_BY_LDAP, MATCH_BY_RFC3986, MATCH_BY_STRCMP, MATCH_BY_UUID};
use crate::protocol::types::{QName, Scope, Service};

/// Namespace + local-name equality.
#[must_use]
pub fn match_type(a: &QName, b: &QName) -> bool {
    a.namespace == b.namespace && a.local_name == b.local_name
}

/// Dialect-dependent scope comparison.
///
/// `candidate` is the requested scope (from a Probe or a callback filter),
/// `target` a scope the service carries. Prefix containment is
/// asymmetric: a shorter candidate matches a deeper target, not the
/// other way around.
#[must_use]
pub fn match_scope(candidate: &str, target: &str, match_by: Option<&str>) -> bool {
    match match_by {
        None | Some(MATCH_BY_RFC3986) | Some(MATCH_BY_LDAP) | Some(MATCH_BY_UUID) => {
            uri_prefix_match(candidate, target)
        }
        Some(MATCH_BY_STRCMP) => candidate == target,
        Some(other) => {
            log::debug!("[matcher] unknown MatchBy dialect, no match: {}", other);
            false
        }
    }
}

/// Does `service` satisfy the requested types and scopes?
///
/// `None` for either filter means "don't filter on this dimension".
/// Both dimensions are universal: every requested type must appear in the
/// service's types, and every requested scope must find at least one
/// service scope it matches.
#[must_use]
pub fn matches_filter(
    service: &Service,
    types: Option<&[QName]>,
    scopes: Option<&[Scope]>,
) -> bool {
    if let Some(types) = types {
        for requested in types {
            if !service.types.iter().any(|t| match_type(requested, t)) {
                return false;
            }
        }
    }
    if let Some(scopes) = scopes {
        for requested in scopes {
            let found = service.scopes.iter().any(|s| {
                match_scope(&requested.value, &s.value, requested.match_by.as_deref())
            });
            if !found {
                return false;
            }
        }
    }
    true
}

fn uri_prefix_match(candidate: &str, target: &str) -> bool {
    let (c_scheme, c_authority, c_path) = split_uri(candidate);
    let (t_scheme, t_authority, t_path) = split_uri(target);
    if !c_scheme.eq_ignore_ascii_case(t_scheme) {
        return false;
    }
    if !c_authority.eq_ignore_ascii_case(t_authority) {
        return false;
    }
    if c_path == t_path {
        return true;
    }
    let c_segments: Vec<String> = c_path.split('/').map(percent_decode).collect();
    let t_segments: Vec<String> = t_path.split('/').map(percent_decode).collect();
    if c_segments.len() > t_segments.len() {
        return false;
    }
    c_segments.iter().zip(&t_segments).all(|(c, t)| c == t)
}

/// Split a URI into (scheme, authority, path). No normalization beyond
/// the split; the segment comparison handles decoding.
fn split_uri(uri: &str) -> (&str, &str, &str) {
    let (scheme, rest) = match uri.split_once(':') {
        Some((scheme, rest)) => (scheme, rest),
        None => ("", uri),
    };
    match rest.strip_prefix("//") {
        Some(after_authority) => match after_authority.find('/') {
            Some(idx) => (scheme, &after_authority[..idx], &after_authority[idx..]),
            None => (scheme, after_authority, ""),
        },
        None => (scheme, "", rest),
    }
}

/// Decode `%XX` escapes in one path segment; invalid escapes are kept
/// literally.
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_requires_both_parts() {
        let a = QName::new("http://example.org/x", "Device");
        assert!(match_type(&a, &QName::new("http://example.org/x", "Device")));
        assert!(!match_type(&a, &QName::new("http://example.org/x", "Sensor")));
        assert!(!match_type(&a, &QName::new("http://example.org/y", "Device")));
    }

    #[test]
    fn test_scope_prefix_is_asymmetric() {
        let shorter = "http://example.org/floor1";
        let deeper = "http://example.org/floor1/room2";
        assert!(match_scope(shorter, deeper, None));
        assert!(!match_scope(deeper, shorter, None));
    }

    #[test]
    fn test_scope_equal_uris_match() {
        let uri = "http://example.org/floor1/room2";
        assert!(match_scope(uri, uri, None));
    }

    #[test]
    fn test_scope_scheme_and_authority_case_insensitive() {
        assert!(match_scope(
            "HTTP://Example.ORG/a/b",
            "http://example.org/a/b",
            None
        ));
        // Path stays case-sensitive.
        assert!(!match_scope(
            "http://example.org/A/b",
            "http://example.org/a/b",
            None
        ));
    }

    #[test]
    fn test_scope_encoded_slash_stays_literal() {
        // "a%2Fb" is one segment containing a literal slash, not two.
        assert!(!match_scope(
            "http://example.org/a/b",
            "http://example.org/a%2Fb",
            None
        ));
        assert!(match_scope(
            "http://example.org/a%2Fb",
            "http://example.org/a%2Fb/c",
            None
        ));
    }

    #[test]
    fn test_scope_percent_decoding_per_segment() {
        assert!(match_scope(
            "http://example.org/ro%6Fm",
            "http://example.org/room/bed2",
            None
        ));
    }

    #[test]
    fn test_scope_different_authority_never_matches() {
        assert!(!match_scope(
            "http://example.org/a",
            "http://example.net/a/b",
            None
        ));
    }

    #[test]
    fn test_strcmp_dialect_is_exact() {
        assert!(match_scope("ldap:///ou=x", "ldap:///ou=x", Some(MATCH_BY_STRCMP)));
        assert!(!match_scope("scope", "SCOPE", Some(MATCH_BY_STRCMP)));
        assert!(!match_scope("scope", "scope/deeper", Some(MATCH_BY_STRCMP)));
    }

    #[test]
    fn test_named_uri_dialects_use_prefix_rule() {
        for dialect in [MATCH_BY_RFC3986, MATCH_BY_LDAP, MATCH_BY_UUID] {
            assert!(match_scope(
                "http://example.org/a",
                "http://example.org/a/b",
                Some(dialect)
            ));
        }
    }

    #[test]
    fn test_unknown_dialect_never_matches() {
        assert!(!match_scope("a", "a", Some("urn:made-up-dialect")));
    }

    fn service(types: Vec<QName>, scopes: Vec<Scope>) -> Service {
        Service::new("urn:uuid:svc", types, scopes, Vec::new(), 1)
    }

    #[test]
    fn test_filter_none_matches_everything() {
        let svc = service(Vec::new(), Vec::new());
        assert!(matches_filter(&svc, None, None));
    }

    #[test]
    fn test_filter_types_universal() {
        let svc = service(
            vec![
                QName::new("http://example.org/x", "A"),
                QName::new("http://example.org/x", "B"),
            ],
            Vec::new(),
        );
        let both = [
            QName::new("http://example.org/x", "A"),
            QName::new("http://example.org/x", "B"),
        ];
        assert!(matches_filter(&svc, Some(&both), None));

        let with_missing = [
            QName::new("http://example.org/x", "A"),
            QName::new("http://example.org/x", "C"),
        ];
        assert!(!matches_filter(&svc, Some(&with_missing), None));
    }

    #[test]
    fn test_filter_scopes_exists_per_requested() {
        let svc = service(
            Vec::new(),
            vec![
                Scope::new("http://example.org/floor1/room2"),
                Scope::new("http://example.org/ward/icu"),
            ],
        );
        let requested = [Scope::new("http://example.org/ward")];
        assert!(matches_filter(&svc, None, Some(&requested)));

        let unmatched = [Scope::new("http://example.org/basement")];
        assert!(!matches_filter(&svc, None, Some(&unmatched)));
    }

    #[test]
    fn test_filter_empty_requested_lists_are_vacuous() {
        let svc = service(Vec::new(), Vec::new());
        assert!(matches_filter(&svc, Some(&[]), Some(&[])));
    }
}
