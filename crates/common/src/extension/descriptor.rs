// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Descriptor file grammar: UTF-8, line-oriented, `#` starts a comment to
//! end of line. A line is either `name=qualified.impl.Path` or a bare
//! `qualified.impl.Path`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Prefixes probed under each descriptor root, in loading order.
const DIRECTORY_PREFIXES: [&str; 3] = ["internal", "extensions", "services"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct DescriptorLine {
    pub name: Option<String>,
    pub type_path: String,
}

/// Parse one descriptor text into lines, preserving order. Malformed lines
/// yield `Err(message)` entries so the caller can record them per name.
pub(super) fn parse_text(text: &str) -> Vec<Result<DescriptorLine, String>> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let line = match raw.split_once('#') {
            Some((content, _)) => content,
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((name, path)) => {
                let (name, path) = (name.trim(), path.trim());
                if name.is_empty() || path.is_empty() {
                    lines.push(Err(format!("malformed descriptor line: {raw:?}")));
                } else {
                    lines.push(Ok(DescriptorLine {
                        name: Some(name.to_string()),
                        type_path: path.to_string(),
                    }));
                }
            }
            None => lines.push(Ok(DescriptorLine {
                name: None,
                type_path: line.to_string(),
            })),
        }
    }
    lines
}

/// Read the descriptor files for `point_name` under every root, probing the
/// fixed directory prefixes in order. Unreadable files are skipped with a
/// warning; missing files are normal.
pub(super) fn read_roots(roots: &[PathBuf], point_name: &str) -> Vec<String> {
    let mut texts = Vec::new();
    for root in roots {
        for prefix in DIRECTORY_PREFIXES {
            let path: &Path = &root.join(prefix).join(point_name);
            match std::fs::read_to_string(path) {
                Ok(text) => {
                    debug!(path = %path.display(), "loaded extension descriptor");
                    texts.push(text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable extension descriptor");
                }
            }
        }
    }
    texts
}

/// Infer an extension name from a qualified path: the last segment,
/// lowercased.
pub(super) fn derive_name(type_path: &str) -> String {
    type_path
        .rsplit('.')
        .next()
        .unwrap_or(type_path)
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_comments_and_bare_paths() {
        let text = "# header\nblack=com.example.BlackCar # trailing\n\ncom.example.Wrapper\n";
        let lines: Vec<_> = parse_text(text).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            lines,
            vec![
                DescriptorLine {
                    name: Some("black".to_string()),
                    type_path: "com.example.BlackCar".to_string()
                },
                DescriptorLine {
                    name: None,
                    type_path: "com.example.Wrapper".to_string()
                },
            ]
        );
    }

    #[test]
    fn malformed_lines_are_reported_not_dropped() {
        let parsed = parse_text("=com.example.X\n");
        assert!(parsed[0].is_err());
    }

    #[test]
    fn derives_simple_names() {
        assert_eq!(derive_name("relay.cluster.FailoverCluster"), "failovercluster");
        assert_eq!(derive_name("bare"), "bare");
    }
}
