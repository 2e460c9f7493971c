//! Netscape bookmark HTML parser
//!
//! Walks the `<DL>` / `<DT>` folder structure exported by every major browser
//! and flattens it into unique `BookmarkRecord`s with their folder provenance.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::bookmarks::{is_navigable, BookmarkRecord};
use crate::error::ParseError;

struct Selectors {
    list: Selector,
    heading: Selector,
    link: Selector,
}

impl Selectors {
    fn new() -> Result<Self, ParseError> {
        let parse = |css: &str| Selector::parse(css).map_err(|e| ParseError::Selector(e.to_string()));
        Ok(Self {
            list: parse("dl")?,
            heading: parse("h3")?,
            link: parse("a")?,
        })
    }
}

/// Read and parse a bookmark export from disk
pub fn parse_file(path: &Path) -> Result<Vec<BookmarkRecord>, ParseError> {
    let html = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let bookmarks = parse_bookmarks(&html)?;
    info!("✅ Parsed {} bookmarks from {:?}", bookmarks.len(), path);
    Ok(bookmarks)
}

/// Parse a bookmark document.
///
/// Output is in depth-first document order. URLs are deduplicated across the
/// whole document: the first occurrence keeps its folder path, later ones are
/// dropped, as are `javascript:` and `place:` links.
pub fn parse_bookmarks(html: &str) -> Result<Vec<BookmarkRecord>, ParseError> {
    let document = Html::parse_document(html);
    let selectors = Selectors::new()?;

    let root = document
        .select(&selectors.list)
        .next()
        .ok_or(ParseError::NoBookmarkContainer)?;

    let mut bookmarks = Vec::new();
    let mut seen_urls = HashSet::new();
    let mut folder_path = Vec::new();
    parse_folder(root, &selectors, &mut folder_path, &mut seen_urls, &mut bookmarks);

    Ok(bookmarks)
}

fn parse_folder(
    list: ElementRef<'_>,
    selectors: &Selectors,
    folder_path: &mut Vec<String>,
    seen_urls: &mut HashSet<String>,
    bookmarks: &mut Vec<BookmarkRecord>,
) {
    for entry in list.children().filter_map(ElementRef::wrap) {
        if entry.value().name() != "dt" {
            continue;
        }

        if let Some(heading) = entry.select(&selectors.heading).next() {
            let name = heading.text().collect::<String>().trim().to_string();
            match folder_body(entry, selectors) {
                Some(nested) => {
                    folder_path.push(name);
                    parse_folder(nested, selectors, folder_path, seen_urls, bookmarks);
                    folder_path.pop();
                }
                None => debug!("Folder '{}' has no <DL> body", name),
            }
            continue;
        }

        let Some(link) = entry.select(&selectors.link).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href") else {
            continue;
        };

        if !is_navigable(url) {
            debug!("Skipping non-navigable URL: {}", url);
            continue;
        }
        if !seen_urls.insert(url.to_string()) {
            debug!("Skipping duplicate URL: {}", url);
            continue;
        }

        bookmarks.push(BookmarkRecord {
            title: link.text().collect::<String>().trim().to_string(),
            url: url.to_string(),
            folder_path: folder_path.join("/"),
            add_date: link.value().attr("add_date").map(str::to_string),
            icon: link.value().attr("icon").map(str::to_string),
            category: None,
        });
    }
}

/// The `<DL>` holding a folder's entries. Usually nested in the heading's
/// `<DT>`; when a `<DD>` description follows the heading (Firefox exports),
/// the HTML parser closes the `<DT>` and the list ends up inside the `<DD>`.
fn folder_body<'a>(entry: ElementRef<'a>, selectors: &Selectors) -> Option<ElementRef<'a>> {
    if let Some(nested) = entry.select(&selectors.list).next() {
        return Some(nested);
    }

    let next = entry.next_siblings().filter_map(ElementRef::wrap).next()?;
    match next.value().name() {
        "dl" => Some(next),
        "dd" => next.select(&selectors.list).next(),
        _ => None,
    }
}
