/// A list item found by the structural indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// Zero-based line of the item
    pub line: usize,
    /// Line of the enclosing list item, if nested
    pub parent: Option<usize>,
    /// Whether the item carries a `[ ]` checkbox
    pub task: bool,
}

/// A document's text together with the structure the reconciler needs.
///
/// `content` is exactly the text the structure was computed from; the
/// reconciler compares it against the live document before writing back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub path: String,
    pub content: String,
    pub items: Vec<ListItem>,
    /// Lines holding a heading
    pub headings: Vec<usize>,
    /// Tags from the body and the frontmatter, with a leading `#`
    pub tags: Vec<String>,
}

impl DocumentSnapshot {
    pub fn lines(&self) -> Vec<&str> {
        self.content.split('\n').collect()
    }

    pub fn task_items(&self) -> impl Iterator<Item = &ListItem> {
        self.items.iter().filter(|item| item.task)
    }

    /// The heading line closest above `line`, if any
    pub fn nearest_heading(&self, line: usize) -> Option<usize> {
        self.headings.iter().copied().filter(|h| *h < line).max()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}
