use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// SEC-003: Maximum element nesting accepted before the document is rejected.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The XML itself is malformed
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The body contained no element at all
    #[error("document has no root element")]
    NoRoot,

    /// The body ended while elements were still open
    #[error("unexpected end of document ({0} unclosed elements)")]
    Truncated(usize),

    #[error("element nesting exceeds maximum of {0} levels")]
    TooDeep(usize),
}

/// A decoded syndication document. Lives only for the duration of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub channel: Channel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Raw `pubDate` text, parsed later by the ingestor
    pub pub_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    PubDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Channel,
    Item,
}

/// Text being collected for one field element
struct Capture {
    depth: usize,
    owner: Owner,
    field: Field,
    text: String,
}

/// Map an element to the field it fills.
///
/// `link` only counts when it has no namespace prefix: feeds routinely put an
/// `<atom:link rel="self">` next to the real `<link>`, and the prefixed one
/// must not overwrite it.
fn field_for(e: &BytesStart<'_>, owner: Owner) -> Option<Field> {
    let name = e.name();
    match name.local_name().as_ref() {
        b"title" => Some(Field::Title),
        b"link" if name.prefix().is_none() => Some(Field::Link),
        b"description" => Some(Field::Description),
        b"pubDate" if owner == Owner::Item => Some(Field::PubDate),
        _ => None,
    }
}

/// Streaming decoder state. Depth 1 is the root element (any name), depth 2
/// the `channel`, depth 3 channel fields and `item`s, depth 4 item fields.
#[derive(Default)]
struct DocumentBuilder {
    channel: Channel,
    depth: usize,
    saw_root: bool,
    in_channel: bool,
    item: Option<Item>,
    capture: Option<Capture>,
}

impl DocumentBuilder {
    fn open(&mut self, e: &BytesStart<'_>) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }

        match self.depth {
            1 => self.saw_root = true,
            2 => self.in_channel = e.local_name().as_ref() == b"channel",
            3 if self.in_channel => {
                if e.local_name().as_ref() == b"item" {
                    self.item = Some(Item::default());
                } else {
                    self.start_capture(e, Owner::Channel);
                }
            }
            4 if self.item.is_some() => self.start_capture(e, Owner::Item),
            _ => {}
        }
        Ok(())
    }

    fn start_capture(&mut self, e: &BytesStart<'_>, owner: Owner) {
        if let Some(field) = field_for(e, owner) {
            self.capture = Some(Capture {
                depth: self.depth,
                owner,
                field,
                text: String::new(),
            });
        }
    }

    fn close(&mut self) {
        if self.capture.as_ref().is_some_and(|c| c.depth == self.depth) {
            if let Some(capture) = self.capture.take() {
                self.store(capture);
            }
        } else if self.depth == 3 {
            if let Some(item) = self.item.take() {
                self.channel.items.push(item);
            }
        } else if self.depth == 2 {
            self.in_channel = false;
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append character data if it belongs directly to the captured field.
    /// Text inside nested child elements is ignored.
    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            if capture.depth == self.depth {
                capture.text.push_str(text);
            }
        }
    }

    fn store(&mut self, capture: Capture) {
        let Capture {
            owner, field, text, ..
        } = capture;
        match owner {
            Owner::Channel => match field {
                Field::Title => self.channel.title = text,
                Field::Link => self.channel.link = text,
                Field::Description => self.channel.description = text,
                Field::PubDate => {}
            },
            Owner::Item => {
                if let Some(item) = self.item.as_mut() {
                    match field {
                        Field::Title => item.title = text,
                        Field::Link => item.link = text,
                        Field::Description => item.description = text,
                        Field::PubDate => item.pub_date = text,
                    }
                }
            }
        }
    }

    fn finish(self) -> Result<Document, ParseError> {
        if !self.saw_root {
            return Err(ParseError::NoRoot);
        }
        if self.depth != 0 {
            return Err(ParseError::Truncated(self.depth));
        }

        let mut channel = self.channel;
        channel.title = unescape_html(&channel.title);
        channel.description = unescape_html(&channel.description);
        for item in &mut channel.items {
            item.title = unescape_html(&item.title);
            item.description = unescape_html(&item.description);
        }
        Ok(Document { channel })
    }
}

/// Decode an RSS-style XML body.
///
/// Unknown elements are skipped and a repeated field keeps its last value.
/// Human-readable fields (titles and descriptions) get a second, HTML-level
/// entity pass because feeds commonly double-encode them.
pub fn parse_document(bytes: &[u8]) -> Result<Document, ParseError> {
    // SEC-002: quick-xml never expands DOCTYPE entity declarations, only the
    // five XML builtins and character references.
    let mut reader = Reader::from_reader(bytes);
    let mut builder = DocumentBuilder::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => builder.open(&e)?,
            Ok(Event::Empty(e)) => {
                builder.open(&e)?;
                builder.close();
            }
            Ok(Event::End(_)) => builder.close(),
            Ok(Event::Text(e)) => {
                let raw = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| ParseError::Xml(err.to_string()))?;
                // Entities XML doesn't know (&nbsp; etc.) stay as-is for the HTML pass
                match quick_xml::escape::unescape(&raw) {
                    Ok(text) => builder.text(&text),
                    Err(_) => builder.text(&raw),
                }
            }
            Ok(Event::CData(e)) => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| ParseError::Xml(err.to_string()))?;
                builder.text(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}

/// HTML entity decoding; text that doesn't decode cleanly is kept verbatim.
/// Longest entity name looked up, e.g. `&CounterClockwiseContourIntegral;`
const MAX_ENTITY_LEN: usize = 32;

/// Decode HTML entities one reference at a time.
///
/// A bare `&` or an unknown name stays as written without affecting the
/// references around it (`"Q&A &amp; more"` becomes `"Q&A & more"`).
fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = entity_len(tail)
            .and_then(|len| htmlescape::decode_html(&tail[..len]).ok().map(|s| (len, s)));
        match decoded {
            Some((len, s)) => {
                out.push_str(&s);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte length of the `&name;` or `&#...;` reference `s` starts with.
fn entity_len(s: &str) -> Option<usize> {
    let body = s.strip_prefix('&')?;
    let end = body.find(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))?;
    (end > 0 && end <= MAX_ENTITY_LEN && body[end..].starts_with(';')).then_some(end + 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example Blog</title>
    <link>https://blog.example.com/</link>
    <atom:link href="https://blog.example.com/index.xml" rel="self" type="application/rss+xml"/>
    <description>Posts about things</description>
    <item>
      <title>First post</title>
      <link>https://blog.example.com/first</link>
      <description>Hello</description>
      <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate>
    </item>
    <item>
      <title>Second post</title>
      <link>https://blog.example.com/second</link>
      <description>World</description>
      <pubDate>Tue, 03 Jan 2006 10:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_channel_and_items() {
        let doc = parse_document(SAMPLE_RSS.as_bytes()).unwrap();

        assert_eq!(doc.channel.title, "Example Blog");
        assert_eq!(doc.channel.description, "Posts about things");
        assert_eq!(doc.channel.items.len(), 2);
        assert_eq!(
            doc.channel.items[0],
            Item {
                title: "First post".to_string(),
                link: "https://blog.example.com/first".to_string(),
                description: "Hello".to_string(),
                pub_date: "Mon, 02 Jan 2006 15:04:05 -0700".to_string(),
            }
        );
        assert_eq!(doc.channel.items[1].title, "Second post");
    }

    #[test]
    fn test_prefixed_link_does_not_replace_channel_link() {
        let doc = parse_document(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(doc.channel.link, "https://blog.example.com/");
    }

    #[test]
    fn test_prefixed_link_before_plain_link() {
        let xml = r#"<rss xmlns:atom="http://www.w3.org/2005/Atom"><channel>
            <atom:link>https://example.com/self</atom:link>
            <link>https://example.com/</link>
        </channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.link, "https://example.com/");
    }

    #[test]
    fn test_entities_unescaped_in_titles() {
        let xml = r#"<rss><channel>
            <title>A &amp; B</title>
            <description>Caf&amp;eacute; &amp;amp; bar</description>
            <item><title>Tom &amp;amp; Jerry</title><description>&lt;p&gt;hi&lt;/p&gt;</description></item>
        </channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();

        assert_eq!(doc.channel.title, "A & B");
        assert_eq!(doc.channel.description, "Café & bar");
        assert_eq!(doc.channel.items[0].title, "Tom & Jerry");
        assert_eq!(doc.channel.items[0].description, "<p>hi</p>");
    }

    #[test]
    fn test_html_only_entity_survives_xml_pass() {
        let xml = "<rss><channel><title>Fish&nbsp;&amp;&nbsp;Chips</title></channel></rss>";
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.title, "Fish\u{a0}&\u{a0}Chips");
    }

    #[test]
    fn test_bare_ampersand_does_not_block_other_entities() {
        let xml = r#"<rss><channel>
            <title>Q&amp;A &amp;amp; more</title>
            <item>
                <title>R&amp;D at AT&amp;T &amp;#8211; notes</title>
                <description>&amp;lt;b&amp;gt;Tips &amp; tricks&amp;lt;/b&amp;gt;</description>
            </item>
        </channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();

        assert_eq!(doc.channel.title, "Q&A & more");
        assert_eq!(doc.channel.items[0].title, "R&D at AT&T \u{2013} notes");
        assert_eq!(doc.channel.items[0].description, "<b>Tips & tricks</b>");
    }

    #[test]
    fn test_unescape_html_keeps_unknown_references() {
        assert_eq!(unescape_html("&bogus; &amp; &#39;x&#x27;"), "&bogus; & 'x'");
        assert_eq!(unescape_html("trailing &"), "trailing &");
        assert_eq!(unescape_html("&amp no semicolon"), "&amp no semicolon");
        assert_eq!(unescape_html("&;"), "&;");
        assert_eq!(unescape_html("naïve &eacute;"), "naïve é");
    }

    #[test]
    fn test_link_and_pub_date_are_not_html_unescaped() {
        let xml = r#"<rss><channel><item>
            <link>https://example.com/?a=1&amp;amp;b=2</link>
            <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate>
        </item></channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.items[0].link, "https://example.com/?a=1&amp;b=2");
    }

    #[test]
    fn test_cdata_description() {
        let xml = r#"<rss><channel><item>
            <title>Post</title>
            <description><![CDATA[<p>Rich & raw</p>]]></description>
        </item></channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.items[0].description, "<p>Rich & raw</p>");
    }

    #[test]
    fn test_empty_channel() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc, Document::default());
    }

    #[test]
    fn test_self_closing_elements() {
        let xml = r#"<rss><channel><title/><item/><item><title>x</title></item></channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.items.len(), 2);
        assert_eq!(doc.channel.items[0], Item::default());
        assert_eq!(doc.channel.items[1].title, "x");
    }

    #[test]
    fn test_any_root_name_accepted() {
        let xml = "<feed><channel><title>Odd root</title></channel></feed>";
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.title, "Odd root");
    }

    #[test]
    fn test_unknown_and_nested_elements_ignored() {
        let xml = r#"<rss><channel>
            <generator>hugo</generator>
            <item>
              <guid>abc</guid>
              <title>Kept<b>dropped</b></title>
              <category><title>not the item title</title></category>
            </item>
        </channel></rss>"#;
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.items[0].title, "Kept");
    }

    #[test]
    fn test_repeated_field_keeps_last_value() {
        let xml = "<rss><channel><title>one</title><title>two</title></channel></rss>";
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(doc.channel.title, "two");
    }

    #[test]
    fn test_items_outside_channel_ignored() {
        let xml = "<rss><item><title>stray</title></item><channel></channel></rss>";
        let doc = parse_document(xml.as_bytes()).unwrap();
        assert!(doc.channel.items.is_empty());
    }

    #[test]
    fn test_malformed_xml_rejected() {
        let err = parse_document(b"<rss><channel></rss>").unwrap_err();
        assert!(matches!(err, ParseError::Xml(_)), "got {:?}", err);
    }

    #[test]
    fn test_truncated_document_rejected() {
        let err = parse_document(b"<rss><channel><title>cut").unwrap_err();
        assert!(
            matches!(err, ParseError::Truncated(_) | ParseError::Xml(_)),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_empty_body_rejected() {
        let err = parse_document(b"").unwrap_err();
        assert!(matches!(err, ParseError::NoRoot), "got {:?}", err);

        let err = parse_document(b"just some text").unwrap_err();
        assert!(matches!(err, ParseError::NoRoot), "got {:?}", err);
    }
}
