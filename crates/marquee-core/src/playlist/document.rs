//! Playlist document parsing
//!
//! The document is read as a stream of XML events. Character data of the
//! leaf that is currently open is collected into one scratch buffer per role;
//! when an entry element closes, the four buffers become a [`MovieEntry`].
//!
//! ```text
//! <movies>
//!   <movie>
//!     <title>A</title>
//!     <duration>10:00</duration>
//!     <poster>posters/a.png</poster>
//!     <path>https://media.example.com/a/index.m3u8</path>
//!   </movie>
//! </movies>
//! ```

use crate::{types::MovieEntry, Error, Result};
use quick_xml::{errors::SyntaxError, events::Event, Reader};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Element names used by a playlist publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSchema {
    /// Element wrapping one entry
    pub entry: String,
    pub title: String,
    pub duration: String,
    pub poster: String,
    pub path: String,
}

impl Default for PlaylistSchema {
    fn default() -> Self {
        Self {
            entry: "movie".to_string(),
            title: "title".to_string(),
            duration: "duration".to_string(),
            poster: "poster".to_string(),
            path: "path".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Duration,
    Poster,
    Path,
}

impl PlaylistSchema {
    fn field(&self, name: &str) -> Option<Field> {
        if name == self.title {
            Some(Field::Title)
        } else if name == self.duration {
            Some(Field::Duration)
        } else if name == self.poster {
            Some(Field::Poster)
        } else if name == self.path {
            Some(Field::Path)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct Scratch {
    title: String,
    duration: String,
    poster: String,
    path: String,
}

impl Scratch {
    fn buffer(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Duration => &mut self.duration,
            Field::Poster => &mut self.poster,
            Field::Path => &mut self.path,
        }
    }

    fn take(&mut self) -> MovieEntry {
        let scratch = std::mem::take(self);
        MovieEntry {
            title: scratch.title.trim().to_string(),
            duration: scratch.duration.trim().to_string(),
            poster: scratch.poster.trim().to_string(),
            path: scratch.path.trim().to_string(),
        }
    }
}

/// Incremental entry builder driven by element events
///
/// Feed it `start_element` / `characters` / `end_element` in document order,
/// then call [`finish`](Self::finish). An entry still open at `finish` is
/// dropped.
#[derive(Debug)]
pub struct DocumentParser<'a> {
    schema: &'a PlaylistSchema,
    current_element: Option<String>,
    in_entry: bool,
    scratch: Scratch,
    entries: Vec<MovieEntry>,
}

impl<'a> DocumentParser<'a> {
    pub fn new(schema: &'a PlaylistSchema) -> Self {
        Self {
            schema,
            current_element: None,
            in_entry: false,
            scratch: Scratch::default(),
            entries: Vec::new(),
        }
    }

    pub fn start_element(&mut self, name: &str) {
        if name == self.schema.entry {
            self.in_entry = true;
            self.scratch = Scratch::default();
        }
        self.current_element = Some(name.to_string());
    }

    pub fn characters(&mut self, text: &str) {
        if !self.in_entry {
            return;
        }
        let field = self.current_element.as_deref().and_then(|name| self.schema.field(name));
        if let Some(field) = field {
            self.scratch.buffer(field).push_str(text);
        }
    }

    pub fn end_element(&mut self, name: &str) {
        self.current_element = None;

        if name == self.schema.entry && self.in_entry {
            let entry = self.scratch.take();
            if entry.path.is_empty() {
                debug!(title = %entry.title, "Playlist entry without a media path");
            }
            self.entries.push(entry);
            self.in_entry = false;
        }
    }

    /// Entries completed so far
    pub fn entries(&self) -> &[MovieEntry] {
        &self.entries
    }

    pub fn finish(self) -> Vec<MovieEntry> {
        if self.in_entry {
            debug!(completed = self.entries.len(), "Document ended inside an entry, dropping it");
        }
        self.entries
    }
}

/// Parse a whole playlist document
///
/// Structural errors (mismatched or unmatched end tags, unknown markup,
/// invalid UTF-8) fail with [`Error::ParseFailed`]. A document that simply
/// stops while elements are open is accepted and the unfinished entry is
/// dropped, even when the cut lands in the middle of a tag.
pub fn parse_document(data: &[u8], schema: &PlaylistSchema) -> Result<Vec<MovieEntry>> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut parser = DocumentParser::new(schema);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = element_name(e.name().into_inner())?;
                parser.start_element(name);
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(e.name().into_inner())?;
                parser.start_element(name);
                parser.end_element(name);
            }
            Ok(Event::End(e)) => {
                let name = element_name(e.name().into_inner())?;
                parser.end_element(name);
            }
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(text) => parser.characters(&text),
                // A reference cut off by the end of the input
                Err(_) if reader.buffer_position() >= data.len() as u64 => break,
                Err(e) => return Err(Error::parse(format!("invalid character data: {e}"))),
            },
            Ok(Event::CData(e)) => {
                let text = std::str::from_utf8(&e)
                    .map_err(|e| Error::parse(format!("invalid UTF-8 in CDATA: {e}")))?;
                parser.characters(text);
            }
            Ok(Event::Eof) => break,
            Err(quick_xml::Error::Syntax(cause)) if ends_input(cause) => {
                debug!(%cause, "Document ends inside markup");
                break;
            }
            Err(e) => {
                return Err(Error::parse(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(parser.finish())
}

/// Syntax errors quick-xml raises only when the input runs out mid-markup
fn ends_input(cause: SyntaxError) -> bool {
    matches!(
        cause,
        SyntaxError::UnclosedTag
            | SyntaxError::UnclosedComment
            | SyntaxError::UnclosedCData
            | SyntaxError::UnclosedDoctype
            | SyntaxError::UnclosedPIOrXmlDecl
    )
}

fn element_name(raw: &[u8]) -> Result<&str> {
    std::str::from_utf8(raw).map_err(|e| Error::parse(format!("invalid UTF-8 in element name: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> Result<Vec<MovieEntry>> {
        parse_document(doc.as_bytes(), &PlaylistSchema::default())
    }

    #[test]
    fn test_single_entry() {
        let entries = parse(
            "<movies><movie><title>A</title><duration>10:00</duration><poster>p</poster><path>u</path></movie></movies>",
        )
        .unwrap();

        assert_eq!(entries, vec![MovieEntry::new("A", "10:00", "p", "u")]);
    }

    #[test]
    fn test_entries_keep_document_order() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
            <movies>
              <movie><title>First</title><duration>1:00</duration><poster>1.png</poster><path>1.m3u8</path></movie>
              <movie><title>Second</title><duration>2:00</duration><poster>2.png</poster><path>2.m3u8</path></movie>
              <movie><title>Third</title><duration>3:00</duration><poster>3.png</poster><path>3.m3u8</path></movie>
            </movies>"#;

        let titles: Vec<_> = parse(doc).unwrap().into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_truncated_entry_is_dropped() {
        let doc = "<movies>\
            <movie><title>A</title><duration>1:00</duration><poster>a</poster><path>a</path></movie>\
            <movie><title>B</title><duration>2:00</duration>";

        let entries = parse(doc).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "A");
    }

    #[test]
    fn test_cut_anywhere_inside_an_entry() {
        let complete = "<movies>\
            <movie><title>A</title><duration>1:00</duration><poster>a</poster><path>a</path></movie>";
        let second = "<movie><title>B</title><duration>2:00</duration><poster>b</poster><path>b</path></movie>";

        for cut in 0..second.len() {
            let doc = format!("{complete}{}", &second[..cut]);
            let entries = parse(&doc).unwrap_or_else(|e| panic!("cut {cut} {:?}: {e}", &second[..cut]));
            let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
            assert_eq!(titles, vec!["A"], "cut {cut}");
        }

        let whole = parse(&format!("{complete}{second}")).unwrap();
        assert_eq!(whole.len(), 2);
    }

    #[test]
    fn test_cut_inside_comment_cdata_and_reference() {
        let head = "<movies><movie><title>A</title><duration>1:00</duration><poster>a</poster><path>a</path></movie>";

        for tail in ["<!-- note", "<movie><poster><![CDATA[p?a=1", "<movie><title>Tom &am"] {
            let entries = parse(&format!("{head}{tail}")).unwrap();
            assert_eq!(entries.len(), 1, "{tail}");
        }
    }

    #[test]
    fn test_unknown_markup_fails() {
        assert!(matches!(
            parse("<movies><!x></movies>"),
            Err(Error::ParseFailed(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("<movies/>").unwrap().is_empty());
        assert!(parse("<movies></movies>").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_elements_are_ignored() {
        let doc = "<movies><meta>ignored</meta><movie><rating>PG</rating><title>A</title>\
            <duration>1:00</duration><poster>a</poster><path>a</path></movie></movies>";

        let entries = parse(doc).unwrap();
        assert_eq!(entries, vec![MovieEntry::new("A", "1:00", "a", "a")]);
    }

    #[test]
    fn test_entities_and_cdata() {
        let doc = "<movies><movie><title>Tom &amp; Jerry</title><duration>7:00</duration>\
            <poster><![CDATA[p?a=1&b=2]]></poster><path>u</path></movie></movies>";

        let entries = parse(doc).unwrap();
        assert_eq!(entries[0].title, "Tom & Jerry");
        assert_eq!(entries[0].poster, "p?a=1&b=2");
    }

    #[test]
    fn test_mismatched_end_tag_fails() {
        let doc = "<movies><movie><title>A</duration></movie></movies>";
        assert!(matches!(parse(doc), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_unmatched_end_tag_fails() {
        assert!(matches!(parse("<movies></movie></movies>"), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let mut doc = b"<movies><movie><title>".to_vec();
        doc.extend_from_slice(&[0xff, 0xfe]);
        doc.extend_from_slice(b"</title></movie></movies>");

        assert!(matches!(
            parse_document(&doc, &PlaylistSchema::default()),
            Err(Error::ParseFailed(_))
        ));
    }

    #[test]
    fn test_custom_schema() {
        let schema = PlaylistSchema {
            entry: "item".to_string(),
            title: "name".to_string(),
            duration: "length".to_string(),
            poster: "thumb".to_string(),
            path: "stream".to_string(),
        };
        let doc = "<feed><item><name>X</name><length>0:42</length><thumb>t</thumb><stream>s</stream></item></feed>";

        let entries = parse_document(doc.as_bytes(), &schema).unwrap();
        assert_eq!(entries, vec![MovieEntry::new("X", "0:42", "t", "s")]);
    }

    #[test]
    fn test_driving_events_by_hand() {
        let schema = PlaylistSchema::default();
        let mut parser = DocumentParser::new(&schema);

        parser.start_element("movie");
        parser.start_element("title");
        parser.characters("Split ");
        parser.characters("title");
        parser.end_element("title");
        assert!(parser.entries().is_empty());
        parser.end_element("movie");

        assert_eq!(parser.finish()[0].title, "Split title");
    }
}
