use tracing::{debug, warn};

use crate::document::{Destination, DocumentHandle, RawOutlineNode};
use crate::types::PageNumber;

pub const DEFAULT_MAX_OUTLINE_DEPTH: usize = 64;
const FALLBACK_PAGE: PageNumber = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineNode {
    pub title: String,
    pub destination_page: PageNumber,
    pub resolved: bool,
    pub children: Vec<OutlineNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineItem {
    pub title: String,
    pub page: PageNumber,
    pub depth: usize,
}

pub async fn resolve_outline(document: &dyn DocumentHandle, max_depth: usize) -> Vec<OutlineNode> {
    let raw = match document.outline().await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(?err, "document outline unavailable");
            return Vec::new();
        }
    };

    let mut destinations = Vec::new();
    let mut dropped = 0;
    collect_destinations(&raw, 0, max_depth, &mut destinations, &mut dropped);
    if dropped > 0 {
        warn!(dropped, max_depth, "outline nodes beyond depth cap dropped");
    }

    let mut pages = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let page = match destination {
            Some(destination) => resolve_page(document, destination).await,
            None => None,
        };
        pages.push(page);
    }
    debug!(
        nodes = pages.len(),
        unresolved = pages.iter().filter(|page| page.is_none()).count(),
        "outline resolved"
    );

    let mut pages = pages.into_iter();
    build_nodes(&raw, 0, max_depth, &mut pages)
}

fn collect_destinations<'a>(
    nodes: &'a [RawOutlineNode],
    depth: usize,
    max_depth: usize,
    out: &mut Vec<Option<&'a Destination>>,
    dropped: &mut usize,
) {
    for node in nodes {
        if depth >= max_depth {
            *dropped += 1 + count_nodes(&node.children);
            continue;
        }
        out.push(node.destination.as_ref());
        collect_destinations(&node.children, depth + 1, max_depth, out, dropped);
    }
}

fn count_nodes(nodes: &[RawOutlineNode]) -> usize {
    let mut count = 0;
    let mut stack: Vec<&RawOutlineNode> = nodes.iter().collect();
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.children.iter());
    }
    count
}

fn build_nodes<I>(
    nodes: &[RawOutlineNode],
    depth: usize,
    max_depth: usize,
    pages: &mut I,
) -> Vec<OutlineNode>
where
    I: Iterator<Item = Option<PageNumber>>,
{
    if depth >= max_depth {
        return Vec::new();
    }
    let mut built = Vec::with_capacity(nodes.len());
    for node in nodes {
        let page = pages.next().flatten();
        let children = build_nodes(&node.children, depth + 1, max_depth, pages);
        built.push(OutlineNode {
            title: node.title.clone(),
            destination_page: page.unwrap_or(FALLBACK_PAGE),
            resolved: page.is_some(),
            children,
        });
    }
    built
}

async fn resolve_page(
    document: &dyn DocumentHandle,
    destination: &Destination,
) -> Option<PageNumber> {
    let index = match destination {
        Destination::PageIndex(index) => Ok(*index),
        Destination::Explicit(page_ref) => document.page_index(page_ref).await,
        Destination::Named(name) => match document.resolve_destination(name).await {
            Ok(page_ref) => document.page_index(&page_ref).await,
            Err(err) => Err(err),
        },
    };

    match index {
        Ok(index) if index < document.page_count() => Some(index + 1),
        Ok(index) => {
            warn!(index, pages = document.page_count(), "outline destination out of range");
            None
        }
        Err(err) => {
            warn!(?err, ?destination, "failed to resolve outline destination");
            None
        }
    }
}

pub fn flatten(nodes: &[OutlineNode]) -> Vec<OutlineItem> {
    let mut items = Vec::new();
    let mut stack: Vec<(&OutlineNode, usize)> = nodes.iter().rev().map(|node| (node, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        items.push(OutlineItem {
            title: node.title.clone(),
            page: node.destination_page,
            depth,
        });
        stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
    }
    items
}

/// Entry the reader is currently inside: the latest entry starting at or
/// before `page`, preferring the deeper one when several start on the same
/// page.
pub fn section_for_page(items: &[OutlineItem], page: PageNumber) -> Option<&OutlineItem> {
    let mut best: Option<&OutlineItem> = None;
    for item in items.iter().filter(|item| item.page <= page) {
        match best {
            Some(current) if item.page < current.page => {}
            _ => best = Some(item),
        }
    }
    best
}
