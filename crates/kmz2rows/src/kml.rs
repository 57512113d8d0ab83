//! KML text -> engine folder tree.
//!
//! `Document` and `Folder` become folders; `Placemark` keeps its `name`,
//! `description` and the coordinate text of its first `Point` or `LineString`.
//! Inside `MultiGeometry`, line parts are concatenated into one line. Elements are
//! matched by local name, so namespaced and bare KML both work.

use anyhow::{Context, Result};
use geosynth::tree::{GeometryKind, RawGeometry};
use geosynth::{Folder, Node as TreeNode, Placemark};
use roxmltree::{Document, Node};

fn is(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is(n, name))
}

fn child_text(node: Node, name: &str) -> Option<String> {
    child(node, name).map(|n| n.text().unwrap_or("").trim().to_owned())
}

/// Parse a KML document into a folder tree rooted at its outermost container.
pub fn parse_kml(text: &str) -> Result<Folder> {
    let doc = Document::parse(text).context("invalid KML")?;
    let root = doc.root_element();

    // <kml><Document>..</Document></kml> is the usual shape; bare containers are accepted.
    let container = if is(&root, "kml") {
        root.children()
            .find(|n| is(n, "Document") || is(n, "Folder"))
            .unwrap_or(root)
    } else {
        root
    };

    Ok(folder(container))
}

fn folder(node: Node) -> Folder {
    let children = node
        .children()
        .filter(|n| n.is_element())
        .filter_map(|n| match n.tag_name().name() {
            "Folder" | "Document" => Some(TreeNode::Folder(folder(n))),
            "Placemark" => Some(TreeNode::Placemark(placemark(n))),
            _ => None,
        })
        .collect();

    Folder {
        name: child_text(node, "name"),
        children,
    }
}

fn placemark(node: Node) -> Placemark {
    Placemark {
        name: child_text(node, "name"),
        description: child_text(node, "description"),
        geometry: geometry(node),
    }
}

fn coordinates(node: Node) -> Option<String> {
    node.descendants()
        .find(|n| is(n, "coordinates"))
        .and_then(|n| n.text())
        .map(str::to_owned)
}

fn geometry(placemark: Node) -> Option<RawGeometry> {
    for n in placemark.children().filter(|n| n.is_element()) {
        match n.tag_name().name() {
            "Point" => {
                return Some(RawGeometry {
                    kind: GeometryKind::Point,
                    coordinates: coordinates(n).unwrap_or_default(),
                })
            }
            "LineString" => {
                return Some(RawGeometry {
                    kind: GeometryKind::Line,
                    coordinates: coordinates(n).unwrap_or_default(),
                })
            }
            "MultiGeometry" => return multi_geometry(n),
            _ => {}
        }
    }

    None
}

fn multi_geometry(node: Node) -> Option<RawGeometry> {
    let lines: Vec<String> = node
        .descendants()
        .filter(|n| is(n, "LineString"))
        .filter_map(coordinates)
        .collect();

    if !lines.is_empty() {
        return Some(RawGeometry {
            kind: GeometryKind::Line,
            coordinates: lines.join(" "),
        });
    }

    node.descendants().find(|n| is(n, "Point")).map(|p| RawGeometry {
        kind: GeometryKind::Point,
        coordinates: coordinates(p).unwrap_or_default(),
    })
}
