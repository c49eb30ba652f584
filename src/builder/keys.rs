//! Artifact key extraction and kind inference.
//!
//! Recognised keys are `#123` change numbers and `PROJ-123` tracker keys.
//! Keys are normalised to uppercase so `eng-102` and `ENG-102` resolve to the
//! same node.

use std::sync::LazyLock;

use regex::Regex;

use crate::graph::types::{normalize_foreign_id, NodeKind};

/// Key mention: `#N` or `PREFIX-N`, not preceded by a word char, `/`, `#` or `&`
/// (so URL fragments and `owner/repo#N` are left to the typed-reference rule).
static KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_/#&.-])(#\d+|[A-Za-z][A-Za-z0-9]{1,14}-\d+)\b")
        .expect("key pattern is valid")
});

/// One key occurrence in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMention {
    pub key: String,
    /// Byte offset of the key in the source text.
    pub offset: usize,
    /// Zero-based line number.
    pub line: usize,
}

/// Uppercase and trim a raw key.
pub fn normalize_key(raw: &str) -> String {
    normalize_foreign_id(raw)
}

/// Every key mention in `text`, in order of appearance.
pub fn extract_keys(text: &str) -> Vec<KeyMention> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    KEY_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter(|m| !is_version_like(m.as_str()))
        .map(|m| KeyMention {
            key: normalize_key(m.as_str()),
            offset: m.start(),
            line: line_starts.partition_point(|&s| s <= m.start()) - 1,
        })
        .collect()
}

/// Distinct keys with their mention counts, in order of first appearance.
pub fn key_counts(text: &str) -> Vec<(String, usize)> {
    let mut out: Vec<(String, usize)> = Vec::new();
    for mention in extract_keys(text) {
        match out.iter_mut().find(|(k, _)| *k == mention.key) {
            Some((_, n)) => *n += 1,
            None => out.push((mention.key, 1)),
        }
    }
    out
}

/// Kind a key most likely refers to, used when creating a stub node.
pub fn infer_kind(key: &str) -> NodeKind {
    if key.starts_with('#') {
        return NodeKind::PullRequest;
    }
    let prefix = key.split('-').next().unwrap_or_default().to_uppercase();
    match prefix.as_str() {
        "INC" => NodeKind::Incident,
        "DEPLOY" | "DEP" => NodeKind::Deployment,
        "MTG" => NodeKind::Meeting,
        "DOC" => NodeKind::Doc,
        _ => NodeKind::Issue,
    }
}

/// `UTF-8`, `SHA-256`, `X-1`: prefixes that look like keys but are not.
fn is_version_like(raw: &str) -> bool {
    let prefix = raw.split('-').next().unwrap_or_default().to_uppercase();
    matches!(prefix.as_str(), "UTF" | "SHA" | "ISO" | "RFC" | "HTTP" | "TLS" | "X")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(text: &str) -> Vec<String> {
        extract_keys(text).into_iter().map(|m| m.key).collect()
    }

    #[test]
    fn finds_tracker_and_change_keys() {
        assert_eq!(
            keys("Fixes ENG-102, see #456 and eng-7."),
            vec!["ENG-102", "#456", "ENG-7"]
        );
    }

    #[test]
    fn ignores_urls_and_repo_refs() {
        assert!(keys("https://github.com/acme/web/pull/456#issuecomment-1").is_empty());
        assert!(keys("acme/web#12").is_empty());
        assert!(keys("encoded as UTF-8 with SHA-256").is_empty());
    }

    #[test]
    fn line_numbers_track_newlines() {
        let mentions = extract_keys("intro\nENG-1 here\n\nand #9");
        assert_eq!(mentions[0].line, 1);
        assert_eq!(mentions[1].line, 3);
    }

    #[test]
    fn counts_preserve_first_appearance() {
        assert_eq!(
            key_counts("ENG-2 then #4 then ENG-2"),
            vec![("ENG-2".to_string(), 2), ("#4".to_string(), 1)]
        );
    }

    #[test]
    fn kind_inference() {
        assert_eq!(infer_kind("#456"), NodeKind::PullRequest);
        assert_eq!(infer_kind("INC-789"), NodeKind::Incident);
        assert_eq!(infer_kind("DEPLOY-456"), NodeKind::Deployment);
        assert_eq!(infer_kind("DEP-3"), NodeKind::Deployment);
        assert_eq!(infer_kind("MTG-12"), NodeKind::Meeting);
        assert_eq!(infer_kind("DOC-1"), NodeKind::Doc);
        assert_eq!(infer_kind("ENG-102"), NodeKind::Issue);
    }
}
