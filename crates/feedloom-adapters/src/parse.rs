//! RSS 2.0, RSS 1.0 (RDF) and Atom documents into [`RawFeedDocument`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedParseError {
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("document ended inside <{0}>")]
    UnexpectedEof(String),
    #[error("empty document")]
    Empty,
    #[error("unrecognized root element <{0}>")]
    UnknownRoot(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEnclosure {
    pub url: Option<String>,
    pub mime_type: Option<String>,
    /// Kept as text; sources disagree on whether this is a number.
    pub length: Option<String>,
}

/// One source item as it appeared in the document, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub guid: Option<String>,
    pub id: Option<String>,
    pub link: Option<String>,
    pub comments: Option<String>,
    pub title: Option<String>,
    pub content_encoded: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub enclosure: Option<RawEnclosure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFeedDocument {
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn open(start: &BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let attrs = start
            .attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                (key, value)
            })
            .collect();
        Self {
            name,
            attrs,
            ..Default::default()
        }
    }

    fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of this node and all descendants, in document order.
    fn deep_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.deep_text());
        }
        out
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(XmlNode::deep_text)
    }

    fn first_child_text(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.child_text(name))
    }
}

fn read_tree(input: &str) -> Result<XmlNode, FeedParseError> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref start) => stack.push(XmlNode::open(start)),
            Event::Empty(ref start) => {
                let node = XmlNode::open(start);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Event::End(_) => {
                let Some(node) = stack.pop() else { continue };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let decoded = text
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    current.text.push_str(&decoded);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(FeedParseError::UnexpectedEof(open.name));
    }
    root.ok_or(FeedParseError::Empty)
}

/// Parse a feed document. Field values are returned verbatim; trimming happens during normalization.
pub fn parse_feed(body: &[u8]) -> Result<RawFeedDocument, FeedParseError> {
    let text = String::from_utf8_lossy(body);
    let root = read_tree(text.trim_start_matches('\u{feff}'))?;

    match root.local_name() {
        "rss" => {
            let channel = root.child("channel").ok_or_else(|| FeedParseError::UnknownRoot(root.name.clone()))?;
            Ok(RawFeedDocument {
                title: channel.child_text("title"),
                link: channel.child_text("link"),
                author: channel.first_child_text(&["managingEditor", "dc:creator", "itunes:author"]),
                items: channel.children_named("item").map(rss_item).collect(),
            })
        }
        "RDF" => {
            let channel = root.child("channel");
            Ok(RawFeedDocument {
                title: channel.and_then(|c| c.child_text("title")),
                link: channel.and_then(|c| c.child_text("link")),
                author: channel.and_then(|c| c.child_text("dc:creator")),
                items: root.children_named("item").map(rss_item).collect(),
            })
        }
        "feed" => Ok(RawFeedDocument {
            title: root.child_text("title"),
            link: atom_link(&root, "alternate"),
            author: atom_author(&root),
            items: root.children_named("entry").map(atom_entry).collect(),
        }),
        _ => Err(FeedParseError::UnknownRoot(root.name.clone())),
    }
}

fn rss_item(node: &XmlNode) -> RawItem {
    let mut categories = node
        .children_named("category")
        .map(XmlNode::deep_text)
        .collect::<Vec<_>>();
    categories.extend(node.children_named("dc:subject").map(XmlNode::deep_text));

    RawItem {
        guid: node.child_text("guid"),
        id: None,
        link: node.child_text("link").or_else(|| node.attr("rdf:about").map(str::to_string)),
        comments: node.child_text("comments"),
        title: node.child_text("title"),
        content_encoded: node.child_text("content:encoded"),
        content: node.child_text("description"),
        summary: node.child_text("itunes:summary"),
        published: node.first_child_text(&["pubDate", "dc:date"]),
        updated: None,
        author: node.first_child_text(&["author", "dc:creator", "itunes:author"]),
        categories,
        enclosure: node.child("enclosure").map(|e| RawEnclosure {
            url: e.attr("url").map(str::to_string),
            mime_type: e.attr("type").map(str::to_string),
            length: e.attr("length").map(str::to_string),
        }),
    }
}

fn atom_link(node: &XmlNode, rel: &str) -> Option<String> {
    node.children_named("link")
        .find(|l| l.attr("rel").unwrap_or("alternate") == rel)
        .and_then(|l| l.attr("href"))
        .map(str::to_string)
}

fn atom_author(node: &XmlNode) -> Option<String> {
    node.child("author").and_then(|a| a.child_text("name"))
}

fn atom_entry(node: &XmlNode) -> RawItem {
    RawItem {
        guid: None,
        id: node.child_text("id"),
        link: atom_link(node, "alternate"),
        comments: atom_link(node, "replies"),
        title: node.child_text("title"),
        content_encoded: None,
        content: node.child_text("content"),
        summary: node.child_text("summary"),
        published: node.child_text("published"),
        updated: node.child_text("updated"),
        author: atom_author(node),
        categories: node
            .children_named("category")
            .filter_map(|c| c.attr("term").map(str::to_string))
            .collect(),
        enclosure: node
            .children_named("link")
            .find(|l| l.attr("rel") == Some("enclosure"))
            .map(|l| RawEnclosure {
                url: l.attr("href").map(str::to_string),
                mime_type: l.attr("type").map(str::to_string),
                length: l.attr("length").map(str::to_string),
            }),
    }
}
