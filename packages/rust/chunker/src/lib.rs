//! DOM-aware HTML chunking for transformer calls.
//!
//! Transformers enforce a per-call input length, so item content is split
//! into size-bounded chunks before transformation and reassembled after.
//! Splitting only ever happens at DOM node boundaries: sibling nodes are
//! greedily packed into a buffer, and a node too large for one chunk
//! contributes its start tag, its recursively segmented children, and its
//! end tag to the stream. Concatenating all chunks in order therefore
//! reproduces the input exactly (up to the parser's normalization), which
//! is what makes [`combine`] correct without any positional bookkeeping.

use std::sync::LazyLock;

use regex::Regex;
use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node};

/// Leaves matching this never start their own chunk; stray separators glued
/// onto a neighbor would otherwise surface as standalone fragments.
static PUNCTUATION_OR_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[\s()「」\[\]{}.,;:!?'"‘’“”…—-]+$"#).expect("invalid punctuation regex")
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

/// One size-bounded piece of serialized HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Serialized markup, concatenation-safe with its neighbors.
    pub content: String,
    /// DOM depth at which the piece was cut (0 = top-level siblings).
    pub level: usize,
}

/// Split an HTML fragment into chunks of at most `max_len` characters.
///
/// The bound can only be exceeded by an irreducible leaf (a text node or
/// childless element that alone is longer than `max_len`), which is emitted
/// as its own chunk rather than cut mid-text. Chunks that are empty after
/// trimming are dropped.
pub fn chunk(fragment: &str, max_len: usize) -> Vec<Chunk> {
    let doc = Html::parse_fragment(fragment);
    let mut splitter = Splitter::new(max_len);
    splitter.walk_children(*doc.root_element(), 0);
    splitter.flush(0);

    let mut chunks = splitter.chunks;
    chunks.retain(|c| !c.content.trim().is_empty());

    tracing::debug!(
        input_len = fragment.chars().count(),
        max_len,
        chunk_count = chunks.len(),
        "chunked fragment"
    );
    chunks
}

/// Reassemble transformed chunks by concatenating their contents in order.
pub fn combine(chunks: &[Chunk]) -> String {
    chunks.iter().map(|c| c.content.as_str()).collect()
}

/// Strip an HTML fragment down to its visible text.
///
/// Script, style, and noscript subtrees are skipped; whitespace runs are
/// collapsed to single spaces. Used to prepare content for transforms that
/// consume prose rather than markup.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut out = String::new();
    collect_text(*doc.root_element(), &mut out);
    WHITESPACE_RUN.replace_all(&out, " ").trim().to_string()
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Element(el) => {
                if matches!(el.name(), "script" | "style" | "noscript") {
                    continue;
                }
                collect_text(child, out);
                out.push(' ');
            }
            Node::Text(text) => out.push_str(text),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Splitter
// ---------------------------------------------------------------------------

/// Walk state: the buffer of sibling serializations accumulating toward the
/// next chunk. The buffer is shared across recursion levels so a descent
/// into an oversized node continues filling the chunk in progress.
struct Splitter {
    max_len: usize,
    chunks: Vec<Chunk>,
    buf: String,
    buf_len: usize,
}

impl Splitter {
    fn new(max_len: usize) -> Self {
        Self {
            max_len,
            chunks: Vec::new(),
            buf: String::new(),
            buf_len: 0,
        }
    }

    fn walk_children(&mut self, parent: NodeRef<'_, Node>, level: usize) {
        for child in parent.children() {
            match child.value() {
                Node::Element(_) => self.visit_element(child, level),
                Node::Text(text) => self.visit_leaf(text, level),
                Node::Comment(comment) => {
                    let serialized = format!("<!--{}-->", &**comment);
                    self.visit_leaf(&serialized, level);
                }
                _ => {}
            }
        }
    }

    fn visit_element(&mut self, node: NodeRef<'_, Node>, level: usize) {
        let Some(element) = ElementRef::wrap(node) else {
            return;
        };
        let serialized = element.html();
        let len = serialized.chars().count();

        if self.buf_len + len > self.max_len {
            self.flush(level);
        }

        if len <= self.max_len {
            self.append(&serialized, level);
        } else if node.has_children() {
            // Too big for one chunk but divisible: stream the start tag,
            // segment the children one level down, then close the tag.
            self.append(&start_tag(&element), level);
            self.walk_children(node, level + 1);
            self.append(&end_tag(&element), level + 1);
        } else {
            self.chunks.push(Chunk {
                content: serialized,
                level,
            });
        }
    }

    fn visit_leaf(&mut self, serialized: &str, level: usize) {
        let len = serialized.chars().count();

        if self.buf_len + len > self.max_len {
            self.flush(level);
        }

        if len <= self.max_len || PUNCTUATION_OR_WHITESPACE.is_match(serialized) {
            self.append(serialized, level);
        } else {
            // A single run of text longer than the bound has no node
            // boundary to cut at; emit it whole.
            self.chunks.push(Chunk {
                content: serialized.to_string(),
                level,
            });
        }
    }

    /// Append to the buffer, flushing first if the piece would overflow it.
    fn append(&mut self, serialized: &str, level: usize) {
        let len = serialized.chars().count();
        if self.buf_len + len > self.max_len {
            self.flush(level);
        }
        self.buf.push_str(serialized);
        self.buf_len += len;
    }

    fn flush(&mut self, level: usize) {
        if self.buf.is_empty() {
            return;
        }
        self.chunks.push(Chunk {
            content: std::mem::take(&mut self.buf),
            level,
        });
        self.buf_len = 0;
    }
}

fn start_tag(element: &ElementRef<'_>) -> String {
    let value = element.value();
    let mut out = String::from("<");
    out.push_str(value.name());
    for (name, attr_value) in value.attrs() {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&attr_value.replace('&', "&amp;").replace('"', "&quot;"));
        out.push('"');
    }
    out.push('>');
    out
}

fn end_tag(element: &ElementRef<'_>) -> String {
    format!("</{}>", element.value().name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paragraphs_split_at_boundary() {
        let chunks = chunk("<p>A</p><p>B</p>", 8);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "<p>A</p>");
        assert_eq!(chunks[1].content, "<p>B</p>");
        assert_eq!(chunks[0].level, 0);
    }

    #[test]
    fn small_fragment_is_one_chunk() {
        let chunks = chunk("<p>A</p><p>B</p>", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "<p>A</p><p>B</p>");
    }

    #[test]
    fn combine_reproduces_input() {
        let fragment = "<h1>Title</h1><p>First paragraph of the article.</p>\
                        <p>Second paragraph, a bit longer than the first one.</p>\
                        <ul><li>one</li><li>two</li></ul>";
        for max_len in [20, 50, 200] {
            let chunks = chunk(fragment, max_len);
            assert_eq!(combine(&chunks), fragment, "max_len={max_len}");
        }
    }

    #[test]
    fn chunks_respect_the_bound() {
        let fragment = "<p>alpha beta gamma</p><p>delta epsilon</p><p>zeta eta theta</p>";
        let chunks = chunk(fragment, 30);
        for c in &chunks {
            assert!(
                c.content.chars().count() <= 30,
                "chunk over bound: {:?}",
                c.content
            );
        }
    }

    #[test]
    fn oversized_element_recurses_into_children() {
        let fragment = "<div><p>first inner paragraph</p><p>second inner paragraph</p></div>";
        let chunks = chunk(fragment, 40);
        assert!(chunks.len() > 1);
        // inner paragraphs were cut one level down
        assert!(chunks.iter().any(|c| c.level > 0));
        assert_eq!(combine(&chunks), fragment);
    }

    #[test]
    fn irreducible_text_leaf_exceeds_bound_whole() {
        let long_word = "a".repeat(50);
        let fragment = format!("<p>{long_word}</p>");
        let chunks = chunk(&fragment, 10);
        assert!(chunks.iter().any(|c| c.content == long_word));
        assert_eq!(combine(&chunks), fragment);
    }

    #[test]
    fn punctuation_leaf_glues_to_the_preceding_chunk() {
        // "<p>text</p>" is 11 chars; the ", " separator still fits the
        // 13-char bound and rides along instead of splitting off.
        let chunks = chunk("<p>text</p>, <p>more</p>", 13);
        assert_eq!(chunks[0].content, "<p>text</p>, ");
        assert_eq!(chunks[1].content, "<p>more</p>");
        assert_eq!(combine(&chunks), "<p>text</p>, <p>more</p>");
    }

    #[test]
    fn whitespace_only_fragment_yields_no_chunks() {
        assert!(chunk("   \n\t  ", 100).is_empty());
        assert!(chunk("", 100).is_empty());
    }

    #[test]
    fn comments_pass_through() {
        let fragment = "<p>A</p><!-- note --><p>B</p>";
        let chunks = chunk(fragment, 200);
        assert_eq!(combine(&chunks), fragment);
    }

    #[test]
    fn attributes_survive_recursion() {
        let inner = "<p>some inner text that is long enough to force a split</p>".repeat(2);
        let fragment = format!("<div class=\"post\" data-id=\"7\">{inner}</div>");
        let chunks = chunk(&fragment, 60);
        assert_eq!(combine(&chunks), fragment);
        assert!(chunks[0].content.contains("class=\"post\""));
    }

    #[test]
    fn html_to_text_strips_markup() {
        let text = html_to_text("<h1>Title</h1><p>Body <em>text</em> here.</p>");
        assert_eq!(text, "Title Body text here.");
    }

    #[test]
    fn html_to_text_skips_script_and_style() {
        let text = html_to_text(
            "<p>visible</p><script>var x = 1;</script><style>p { color: red }</style>",
        );
        assert_eq!(text, "visible");
    }

    #[test]
    fn html_to_text_collapses_whitespace() {
        let text = html_to_text("<p>  a\n\n  b  </p>\n<p>c</p>");
        assert_eq!(text, "a b c");
    }
}
