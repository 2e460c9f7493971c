//! Netscape bookmark HTML writer
//!
//! Folder names are emitted in code-point order at every level and links are
//! sorted by title (then URL), so the same tree always renders to the same
//! bytes for a given timestamp.

use html_escape::{encode_double_quoted_attribute, encode_text};
use std::collections::BTreeMap;

use crate::bookmarks::BookmarkRecord;
use crate::tree::{CategoryNode, CategoryTree};

/// Name of the synthetic toolbar folder wrapping the category tree
pub const TOOLBAR_FOLDER_NAME: &str = "收藏夹栏";

const HEADER: &str = "<!DOCTYPE NETSCAPE-Bookmark-file-1>
<!-- This is an automatically generated file.
     It contains bookmarks reorganized by AI categorization.
     DO NOT EDIT! -->
<META HTTP-EQUIV=\"Content-Type\" CONTENT=\"text/html; charset=UTF-8\">
<TITLE>Bookmarks</TITLE>
<H1>Bookmarks</H1>
<DL><p>
";

const INDENT: &str = "    ";

/// Render with the current Unix time as folder timestamp
pub fn render_now(tree: &CategoryTree) -> String {
    render(tree, chrono::Utc::now().timestamp())
}

/// Render a complete bookmark document.
///
/// `timestamp` is shared by every synthetic folder in this document.
pub fn render(tree: &CategoryTree, timestamp: i64) -> String {
    let mut html = String::from(HEADER);
    html.push_str(&format!(
        "{}<DT><H3 ADD_DATE=\"{ts}\" LAST_MODIFIED=\"{ts}\" PERSONAL_TOOLBAR_FOLDER=\"true\">{}</H3>\n",
        INDENT,
        TOOLBAR_FOLDER_NAME,
        ts = timestamp
    ));
    html.push_str(&format!("{}<DL><p>\n", INDENT));

    render_folders(&mut html, &tree.children, 2, timestamp);

    html.push_str(&format!("{}</DL><p>\n", INDENT));
    html.push_str("</DL><p>\n");
    html
}

fn render_folders(html: &mut String, children: &BTreeMap<String, CategoryNode>, depth: usize, timestamp: i64) {
    let indent = INDENT.repeat(depth);

    for (name, node) in children {
        html.push_str(&format!(
            "{}<DT><H3 ADD_DATE=\"{ts}\" LAST_MODIFIED=\"{ts}\">{}</H3>\n",
            indent,
            encode_text(name),
            ts = timestamp
        ));
        html.push_str(&format!("{}<DL><p>\n", indent));

        match node {
            CategoryNode::Branch { children, items } => {
                render_folders(html, children, depth + 1, timestamp);
                render_links(html, items, depth + 1);
            }
            CategoryNode::Leaf(items) => render_links(html, items, depth + 1),
        }

        html.push_str(&format!("{}</DL><p>\n", indent));
    }
}

fn render_links(html: &mut String, items: &[BookmarkRecord], depth: usize) {
    let indent = INDENT.repeat(depth);

    let mut sorted: Vec<&BookmarkRecord> = items.iter().collect();
    sorted.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.url.cmp(&b.url)));

    for bookmark in sorted {
        html.push_str(&format!("{}<DT><A HREF=\"{}\"", indent, encode_double_quoted_attribute(&bookmark.url)));
        if let Some(add_date) = bookmark.add_date.as_deref().filter(|d| !d.is_empty()) {
            html.push_str(&format!(" ADD_DATE=\"{}\"", encode_double_quoted_attribute(add_date)));
        }
        if let Some(icon) = bookmark.icon.as_deref().filter(|i| !i.is_empty()) {
            html.push_str(&format!(" ICON=\"{}\"", encode_double_quoted_attribute(icon)));
        }
        html.push_str(&format!(">{}</A>\n", encode_text(&bookmark.title)));
    }
}
