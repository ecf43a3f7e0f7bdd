//! Generic XML element tree.
//!
//! [`Node`] can hold any schema-less XML element: its name, attributes, own
//! character data, and children in document order. It is built in a single
//! recursive decode pass over [`quick_xml`] events, with a balance counter
//! handling the edge case where an element nests a child with the same tag
//! name.
//!
//! Two shaping operations complement the builder: [`Node::to_map`] projects
//! the tree into a flat dotted-key map, and [`Node::split`] restructures one
//! tree into many, pivoting on a dotted label path.
//!
//! # Example
//!
//! ```
//! use longan::Node;
//!
//! let node = Node::parse_str("<album name=\"Black Album\"><band>Metallica</band></album>")?;
//! assert_eq!(node.name, "album");
//! assert_eq!(node.attributes["name"], "Black Album");
//! assert_eq!(node.children[0].text, "Metallica");
//!
//! let map = node.to_map();
//! assert_eq!(map["#nodes.band.#data"], "Metallica");
//! # Ok::<(), longan::Error>(())
//! ```
use std::collections::{HashMap, VecDeque};
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};

/// A generic XML element: name, attributes, own text, and ordered children.
///
/// All fields are plain values; cloning a node deep-copies its whole
/// subtree. `children` reflects exactly the elements nested directly inside
/// this element's open/close pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// The local name of the element
    pub name: String,
    /// The attribute mapping of the element, empty when it has none
    pub attributes: HashMap<String, String>,
    /// The element's own trimmed character data, empty if none
    pub text: String,
    /// The subelements in document order
    pub children: Vec<Node>,
}

impl Node {
    /// Build a tree from the first element found in `input`.
    ///
    /// Anything before the first open tag (XML prolog, comments, processing
    /// instructions) is skipped. A truncated document yields a partially
    /// populated node rather than an error; an input holding no element at
    /// all fails with [`Error::EndOfStream`].
    pub fn from_reader<R: BufRead>(input: R) -> Result<Node> {
        let mut reader = Reader::from_reader(input);
        // The balance counter does its own matching by name, and a truncated
        // document must yield a partial tree instead of a missing-end error.
        reader.config_mut().check_end_names = false;

        let mut buf = Vec::with_capacity(1024);
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = name_of(e);
                    let attributes = attributes_of(e);
                    return Node::build(&mut reader, name, attributes);
                },
                Ok(Event::Empty(ref e)) => {
                    return Ok(Node {
                        name: name_of(e),
                        attributes: attributes_of(e),
                        ..Node::default()
                    });
                },
                Ok(Event::Eof) => return Err(Error::EndOfStream),
                Err(e) => return Err(e.into()),
                _ => {},
            }
            buf.clear();
        }
    }

    /// Build a tree from the first element of an in-memory XML string.
    pub fn parse_str(xml: &str) -> Result<Node> {
        Node::from_reader(xml.as_bytes())
    }

    /// Recursively consume events until this element's own close tag.
    ///
    /// The balance counter starts at 1 for the open tag already consumed by
    /// the caller. An open tag carrying this element's own name only bumps
    /// the balance (no child is created), so a same-named nested element
    /// cannot close its parent early. End-of-stream terminates the loop
    /// silently, leaving a partial node.
    ///
    /// The tokenizer splits character data around entity references, so text
    /// fragments and resolved references accumulate into one run, committed
    /// at the next structural event. The last non-whitespace run wins.
    fn build<R: BufRead>(
        reader: &mut Reader<R>,
        name: String,
        attributes: HashMap<String, String>,
    ) -> Result<Node> {
        let mut node = Node {
            name,
            attributes,
            ..Node::default()
        };
        let mut balance = 1u32;
        let mut pending = String::new();

        let mut buf = Vec::with_capacity(1024);
        while balance != 0 {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Text(ref e)) => {
                    pending.push_str(&String::from_utf8_lossy(e.as_ref()));
                },
                Ok(Event::CData(ref e)) => {
                    pending.push_str(&String::from_utf8_lossy(e.as_ref()));
                },
                Ok(Event::GeneralRef(ref e)) => {
                    // Predefined entities and character references resolve
                    // into the run; anything else stays as written.
                    let name = String::from_utf8_lossy(e.as_ref());
                    let raw = format!("&{name};");
                    match quick_xml::escape::unescape(&raw) {
                        Ok(resolved) => pending.push_str(&resolved),
                        Err(_) => pending.push_str(&raw),
                    }
                },
                Ok(Event::Start(ref e)) => {
                    commit_text(&mut node, &mut pending);
                    if e.local_name().as_ref() == node.name.as_bytes() {
                        balance += 1;
                    } else {
                        let name = name_of(e);
                        let attributes = attributes_of(e);
                        let child = Node::build(reader, name, attributes)?;
                        node.children.push(child);
                    }
                },
                Ok(Event::Empty(ref e)) => {
                    commit_text(&mut node, &mut pending);
                    // A self-closing tag opens and closes in one event; with
                    // this element's own name the balance nets out to zero.
                    if e.local_name().as_ref() != node.name.as_bytes() {
                        node.children.push(Node {
                            name: name_of(e),
                            attributes: attributes_of(e),
                            ..Node::default()
                        });
                    }
                },
                Ok(Event::End(ref e)) => {
                    commit_text(&mut node, &mut pending);
                    if e.local_name().as_ref() == node.name.as_bytes() {
                        balance -= 1;
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(e.into()),
                _ => {
                    commit_text(&mut node, &mut pending);
                },
            }
            buf.clear();
        }

        commit_text(&mut node, &mut pending);
        Ok(node)
    }

    /// Project this node alone into a flat map: `#name`, `#data` when
    /// non-empty, and `#attr.<key>` per attribute. Does not recurse into
    /// children.
    pub fn flatten(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        if !self.name.is_empty() {
            map.insert("#name".to_string(), self.name.clone());
        }
        if !self.text.is_empty() {
            map.insert("#data".to_string(), self.text.clone());
        }
        for (key, value) in &self.attributes {
            map.insert(format!("#attr.{key}"), value.clone());
        }

        map
    }

    /// Project the whole tree into a flat map with dotted-path keys.
    ///
    /// Each child's flatten result is merged under a `#nodes.<name>` prefix
    /// chained from its parent's, breadth first. Children sharing a name
    /// collapse last-write-wins: only the last sibling's keys survive. This
    /// lossy behavior is deliberate and relied upon by callers.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = self.flatten();

        let mut queue: VecDeque<(String, &Node)> = self
            .children
            .iter()
            .map(|child| (format!("#nodes.{}", child.name), child))
            .collect();

        while let Some((prefix, node)) = queue.pop_front() {
            for (key, value) in node.flatten() {
                map.insert(format!("{prefix}.{key}"), value);
            }
            for child in &node.children {
                queue.push_back((format!("{prefix}.#nodes.{}", child.name), child));
            }
        }

        map
    }

    /// Split this node into many along a dotted label path.
    ///
    /// The path names one element per level; the children of the nodes
    /// reached at the final level become the pivots. Each pivot produces one
    /// output: a deep copy of this node with its direct children named after
    /// the first path segment removed, and the pivot appended, renamed to
    /// the last path segment. An empty path returns a single copy unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// use longan::Node;
    ///
    /// let xml = "<music><album><songs>\
    ///     <song><name>One</name></song>\
    ///     <song><name>Two</name></song>\
    /// </songs></album></music>";
    /// let node = Node::parse_str(xml)?;
    ///
    /// let parts = node.split("album.songs");
    /// assert_eq!(parts.len(), 2);
    /// assert_eq!(parts[0].children[0].name, "songs");
    /// assert_eq!(parts[1].children[0].children[0].text, "Two");
    /// # Ok::<(), longan::Error>(())
    /// ```
    pub fn split(&self, path: &str) -> Vec<Node> {
        if path.is_empty() {
            return vec![self.clone()];
        }

        let terms: Vec<&str> = path.split('.').collect();
        let (first, last) = match (terms.first(), terms.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return vec![self.clone()],
        };

        // Walk the levels by name, carrying the children of every match
        // down to the next level.
        let mut level: Vec<&Node> = self.children.iter().collect();
        for term in &terms {
            let mut next = Vec::new();
            for node in level {
                if node.name == *term {
                    next.extend(node.children.iter());
                }
            }
            level = next;
        }

        // One output per collected child: a copy of this node without the
        // split branch, plus the child renamed after the final term.
        let mut nodes = Vec::with_capacity(level.len());
        for child in level {
            let mut root = self.clone();
            root.children.retain(|c| c.name != first);

            let mut child = child.clone();
            child.name = last.to_string();
            root.children.push(child);

            nodes.push(root);
        }

        nodes
    }
}

/// Store the accumulated text run on the node if it trims to something
/// non-empty, then reset the run. A later non-whitespace run overwrites an
/// earlier one.
fn commit_text(node: &mut Node, pending: &mut String) {
    let trimmed = pending.trim();
    if !trimmed.is_empty() {
        node.text = trimmed.to_string();
    }
    pending.clear();
}

fn name_of(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes_of(e: &BytesStart<'_>) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        attributes.insert(key, value);
    }
    attributes
}
