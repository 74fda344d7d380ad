use std::sync::LazyLock;

use regex::Regex;

use crate::model::document::{DocumentSnapshot, ListItem};
use crate::parse::task_serializer::split_line_ending;

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)(?:[-*+]|\d+[.)])(?:[ \t]+|$)").unwrap());
static TASK_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*[-*+][ \t]+\[.\]").unwrap());
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}#{1,6}(?:[ \t]|$)").unwrap());
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(#[\p{L}_/-][\p{L}\p{N}_/-]*)").unwrap());

/// Build the structural index for a markdown document: list items with
/// their parents, headings, and tags (body and frontmatter).
pub fn index_document(path: &str, content: &str) -> DocumentSnapshot {
    let lines: Vec<&str> = content.split('\n').map(|l| split_line_ending(l).0).collect();
    let mut snapshot = DocumentSnapshot {
        path: path.to_string(),
        content: content.to_string(),
        ..Default::default()
    };

    let body_start = match frontmatter_end(&lines) {
        Some(end) => {
            let yaml = lines[1..end].join("\n");
            snapshot.tags.extend(frontmatter_tags(&yaml));
            end + 1
        }
        None => 0,
    };

    // (indent width, line) of the open list items, innermost last
    let mut open: Vec<(usize, usize)> = Vec::new();
    let mut fence: Option<&str> = None;

    for (idx, line) in lines.iter().enumerate().skip(body_start) {
        let trimmed = line.trim_start();

        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            fence = Some(&trimmed[..3]);
            continue;
        }

        for caps in TAG_RE.captures_iter(line) {
            if let Some(tag) = caps.get(1) {
                let tag = tag.as_str().to_string();
                if !snapshot.tags.contains(&tag) {
                    snapshot.tags.push(tag);
                }
            }
        }

        if HEADING_RE.is_match(line) {
            snapshot.headings.push(idx);
            open.clear();
            continue;
        }

        if let Some(caps) = LIST_ITEM_RE.captures(line) {
            let width = indent_width(caps.get(1).map_or("", |m| m.as_str()));
            while open.last().is_some_and(|(w, _)| *w >= width) {
                open.pop();
            }
            snapshot.items.push(ListItem {
                line: idx,
                parent: open.last().map(|(_, l)| *l),
                task: TASK_ITEM_RE.is_match(line),
            });
            open.push((width, idx));
            continue;
        }

        // A paragraph at the margin ends any open list; indented text and
        // blank lines continue it.
        if !trimmed.is_empty() && indent_width(&line[..line.len() - trimmed.len()]) == 0 {
            open.clear();
        }
    }

    snapshot
}

/// Column width of leading whitespace; a tab advances to the next multiple of 4
fn indent_width(ws: &str) -> usize {
    ws.chars().fold(0, |w, c| if c == '\t' { w + 4 - w % 4 } else { w + 1 })
}

/// Index of the closing `---` if the document opens with frontmatter
fn frontmatter_end(lines: &[&str]) -> Option<usize> {
    if lines.first().map(|l| l.trim_end()) != Some("---") {
        return None;
    }
    lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, l)| matches!(l.trim_end(), "---" | "..."))
        .map(|(i, _)| i)
}

/// `tags:` / `tag:` from YAML frontmatter, normalised to `#tag`
fn frontmatter_tags(yaml: &str) -> Vec<String> {
    let value: serde_yaml::Value = match serde_yaml::from_str(yaml) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparsable frontmatter");
            return Vec::new();
        }
    };

    let mut tags = Vec::new();
    for key in ["tags", "tag"] {
        match value.get(key) {
            Some(serde_yaml::Value::String(s)) => {
                tags.extend(
                    s.split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|t| !t.is_empty())
                        .map(normalise_tag),
                );
            }
            Some(serde_yaml::Value::Sequence(seq)) => {
                tags.extend(seq.iter().filter_map(|v| v.as_str()).map(normalise_tag));
            }
            _ => {}
        }
    }
    tags
}

fn normalise_tag(tag: &str) -> String {
    format!("#{}", tag.trim().trim_start_matches('#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn nested_list_items() {
        let doc = "\
# Home

- [ ] Renovate kitchen ^tz1
\t- [ ] Pick tiles ^tz2
\t\t- [ ] Order samples
\t- [ ] Book electrician
- [ ] Unrelated";
        let snapshot = index_document("Home.md", doc);
        assert_eq!(snapshot.headings, vec![0]);
        let items: Vec<(usize, Option<usize>)> =
            snapshot.items.iter().map(|i| (i.line, i.parent)).collect();
        assert_eq!(
            items,
            vec![(2, None), (3, Some(2)), (4, Some(3)), (5, Some(2)), (6, None)]
        );
        assert!(snapshot.items.iter().all(|i| i.task));
    }

    #[test]
    fn spaces_and_plain_bullets() {
        let doc = "\
- Groceries
    - [ ] Eggs
    - [ ] Flour
- [ ] Laundry";
        let snapshot = index_document("List.md", doc);
        assert_eq!(snapshot.items.len(), 4);
        assert!(!snapshot.items[0].task);
        assert_eq!(snapshot.items[1].parent, Some(0));
        assert_eq!(snapshot.items[2].parent, Some(0));
        assert_eq!(snapshot.items[3].parent, None);
    }

    #[test]
    fn crlf_blank_line_keeps_nesting() {
        let doc = "- [ ] Trip\r\n\r\n\t- [ ] Book hotel\r\n";
        let snapshot = index_document("Trip.md", doc);
        let items: Vec<(usize, Option<usize>)> =
            snapshot.items.iter().map(|i| (i.line, i.parent)).collect();
        assert_eq!(items, vec![(0, None), (2, Some(0))]);
        assert_eq!(snapshot.content, doc);
    }

    #[test]
    fn paragraph_breaks_list() {
        let doc = "\
- [ ] One
Some paragraph
  - [ ] Two";
        let snapshot = index_document("p.md", doc);
        assert_eq!(snapshot.items[1].parent, None);
    }

    #[test]
    fn code_fences_are_skipped() {
        let doc = "\
```md
- [ ] Not a task #nope
```
- [ ] Real task";
        let snapshot = index_document("c.md", doc);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].line, 3);
        assert!(!snapshot.has_tag("#nope"));
    }

    #[test]
    fn tags_from_body_and_frontmatter() {
        let doc = "\
---
title: Journal
tags: [private, tz-exclude-note]
---
Thoughts about #travel/2025 and issue #3
- [ ] Pack";
        let snapshot = index_document("j.md", doc);
        assert!(snapshot.has_tag("#private"));
        assert!(snapshot.has_tag("#tz-exclude-note"));
        assert!(snapshot.has_tag("#travel/2025"));
        assert!(!snapshot.has_tag("#3"));
        assert_eq!(snapshot.items[0].line, 5);
    }

    #[test]
    fn frontmatter_tag_list_form() {
        let doc = "---\ntags:\n  - one\n  - '#two'\n---\n";
        let snapshot = index_document("f.md", doc);
        assert_eq!(snapshot.tags, vec!["#one", "#two"]);
    }

    #[test]
    fn nearest_heading_lookup() {
        let doc = "# A\n- [ ] a\n## B\n- [ ] b";
        let snapshot = index_document("h.md", doc);
        assert_eq!(snapshot.nearest_heading(1), Some(0));
        assert_eq!(snapshot.nearest_heading(3), Some(2));
        assert_eq!(snapshot.nearest_heading(0), None);
    }
}
