use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use thiserror::Error;

/// How far into the document we look for the XML declaration
const DECLARATION_SCAN_LIMIT: usize = 1024;

/// Errors produced while turning fetched bytes into items.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The declared encoding label is not one we can decode
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    /// Bytes are not valid in the document's encoding
    #[error("Document is not valid {0}")]
    Decode(&'static str),
    /// The XML is malformed or truncated
    #[error("XML error: {0}")]
    Xml(String),
    /// Well-formed XML, but not a syndication format we read
    #[error("Unsupported document root: <{0}>")]
    UnsupportedFormat(String),
}

/// One entry of a fetched feed, exactly as the document states it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Raw publication date text, parsed later during conversion
    pub date: String,
}

impl ParsedItem {
    fn trim(&mut self) {
        for value in [
            &mut self.title,
            &mut self.description,
            &mut self.link,
            &mut self.date,
        ] {
            let trimmed = value.trim();
            if trimmed.len() != value.len() {
                *value = trimmed.to_string();
            }
        }
    }
}

/// All items of one fetched document, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeedDocument {
    pub items: Vec<ParsedItem>,
}

/// Which item element a text node belongs to
#[derive(Debug, Clone, Copy)]
enum ItemField {
    Title,
    Description,
    Link,
    Date,
}

impl ItemField {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"title" => Some(Self::Title),
            b"description" => Some(Self::Description),
            b"link" => Some(Self::Link),
            b"pubDate" | b"dc:date" => Some(Self::Date),
            _ => None,
        }
    }

    fn slot(self, item: &mut ParsedItem) -> &mut String {
        match self {
            Self::Title => &mut item.title,
            Self::Description => &mut item.description,
            Self::Link => &mut item.link,
            Self::Date => &mut item.date,
        }
    }
}

/// Parse a fetched feed document.
///
/// The character encoding comes from a byte-order mark, else from the XML
/// declaration, else UTF-8. RSS 0.9x/2.0 and RSS 1.0 (RDF) are read
/// directly; Atom documents are handed to `feed-rs`.
///
/// # Errors
///
/// - [`ParseError::UnsupportedEncoding`] / [`ParseError::Decode`] when the
///   bytes cannot be decoded
/// - [`ParseError::Xml`] for malformed or truncated XML
/// - [`ParseError::UnsupportedFormat`] when the root is not a feed element
pub fn parse_document(bytes: &[u8]) -> Result<ParsedFeedDocument, ParseError> {
    let text = decode(bytes)?;

    let items = match root_element(&text)?.as_str() {
        "rss" | "rdf:RDF" => parse_rss_items(&text)?,
        "feed" => parse_atom_entries(bytes)?,
        other => return Err(ParseError::UnsupportedFormat(other.to_string())),
    };

    Ok(ParsedFeedDocument { items })
}

/// Decode raw bytes to UTF-8 text, honouring a BOM or declared encoding.
fn decode(bytes: &[u8]) -> Result<Cow<'_, str>, ParseError> {
    let (encoding, bom_len) = match Encoding::for_bom(bytes) {
        Some(found) => found,
        None => match declared_encoding(bytes) {
            Some(label) => {
                let encoding = Encoding::for_label(label.trim().as_bytes())
                    .ok_or_else(|| ParseError::UnsupportedEncoding(label.to_string()))?;
                (encoding, 0)
            }
            None => (UTF_8, 0),
        },
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .ok_or(ParseError::Decode(encoding.name()))
}

/// Extract the `encoding` pseudo-attribute of a leading `<?xml ...?>`.
fn declared_encoding(bytes: &[u8]) -> Option<&str> {
    let head = &bytes[..bytes.len().min(DECLARATION_SCAN_LIMIT)];
    let end = head.windows(2).position(|w| w == b"?>")?;
    let declaration = std::str::from_utf8(&head[..end]).ok()?;
    if !declaration.trim_start().starts_with("<?xml") {
        return None;
    }

    let after_key = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let value = after_key.trim_start().strip_prefix('=')?.trim_start();
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &value[1..];
    value.find(quote).map(|close| &value[..close])
}

/// Qualified name of the first element in the document.
fn root_element(text: &str) -> Result<String, ParseError> {
    let mut reader = Reader::from_str(text);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(ParseError::Xml("document has no root element".into())),
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
    }
}

/// Collect `<item>` entries from an RSS 0.9x/1.0/2.0 document.
///
/// Only direct `title`/`description`/`link`/`pubDate`/`dc:date` children
/// are read; namespaced look-alikes such as `media:title` are ignored.
/// Text inside inline markup of a field (`<b>`, `<a>`, ...) belongs to that
/// field. Field values are trimmed once the item is complete.
fn parse_rss_items(text: &str) -> Result<Vec<ParsedItem>, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; only
    // the five predefined entities and character references are resolved.
    let mut reader = Reader::from_str(text);

    let mut items = Vec::new();
    // Open item and the depth of its element
    let mut current: Option<(ParsedItem, usize)> = None;
    // Open field and the depth of its element
    let mut field: Option<(ItemField, usize)> = None;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = e.name();
                match current.as_ref().map(|(_, item_depth)| *item_depth) {
                    None if name.as_ref() == b"item" => {
                        current = Some((ParsedItem::default(), depth));
                        field = None;
                    }
                    Some(item_depth) if field.is_none() && depth == item_depth + 1 => {
                        field = ItemField::from_tag(name.as_ref()).map(|f| (f, depth));
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if field.is_some_and(|(_, field_depth)| field_depth == depth) {
                    field = None;
                }
                if current.as_ref().is_some_and(|(_, item_depth)| *item_depth == depth) {
                    if let Some((mut item, _)) = current.take() {
                        item.trim();
                        items.push(item);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Text(t)) => {
                if let (Some((item, _)), Some((f, _))) = (current.as_mut(), field) {
                    let text = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    f.slot(item).push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some((item, _)), Some((f, _))) = (current.as_mut(), field) {
                    f.slot(item).push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ParseError::Xml("unexpected end of document".into()));
    }

    Ok(items)
}

/// Map Atom entries onto items; dates are rendered RFC 2822 style so
/// conversion treats every format alike.
fn parse_atom_entries(bytes: &[u8]) -> Result<Vec<ParsedItem>, ParseError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| ParseError::Xml(e.to_string()))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();

            ParsedItem {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                description,
                link,
                date: entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.to_rfc2822())
                    .unwrap_or_default(),
            }
        })
        .collect();

    Ok(items)
}
