//! Lenient reader for rendered WordPress HTML fragments.
//!
//! Built on `quick-xml` with end-name checks disabled, so unclosed `<p>`,
//! stray end tags, and HTML entities do not abort parsing. A parse error
//! stops reading and keeps whatever was collected so far.
//!
//! Block elements (`p`, `ul`, `ol`) are read as units. A block whose only
//! text sits inside `<strong>`/`<b>` is a section heading; later blocks
//! belong to that section until the next heading.

use indexmap::{IndexMap, IndexSet};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;

use service_public_core::models::{ContactPoint, DocumentLink};
use service_public_core::text::normalise_whitespace;

/// What a service page's content yields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceContent {
    pub summary: Option<String>,
    pub contacts: Vec<ContactPoint>,
    pub links: Vec<DocumentLink>,
}

#[derive(Debug, Default)]
struct Block {
    is_paragraph: bool,
    text: String,
    strong: String,
    outside_strong: String,
}

#[derive(Debug, Default)]
struct Document {
    blocks: Vec<Block>,
    links: Vec<DocumentLink>,
    loose_text: String,
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase()
}

fn text_of(t: &BytesText<'_>) -> String {
    match t.unescape() {
        Ok(s) => s.into_owned(),
        Err(_) => String::from_utf8_lossy(t.as_ref()).into_owned(),
    }
}

fn href_of(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.as_ref().eq_ignore_ascii_case(b"href"))
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
        .map(|v| normalise_whitespace(&v))
        .filter(|v| !v.is_empty())
}

fn is_block(name: &str) -> bool {
    matches!(name, "p" | "ul" | "ol")
}

fn is_bold(name: &str) -> bool {
    matches!(name, "strong" | "b")
}

fn is_separator(name: &str) -> bool {
    matches!(name, "br" | "li" | "div" | "td" | "tr" | "h1" | "h2" | "h3" | "h4")
}

fn read_document(html: &str) -> Document {
    let mut reader = Reader::from_str(html);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    let mut doc = Document::default();
    let mut current: Option<Block> = None;
    let mut block_depth = 0usize;
    let mut bold_depth = 0usize;
    let mut skip_depth = 0usize;
    let mut anchor: Option<(String, String)> = None;

    let push_text = |text: &str,
                     current: &mut Option<Block>,
                     anchor: &mut Option<(String, String)>,
                     loose: &mut String,
                     bold: bool| {
        loose.push_str(text);
        if let Some(block) = current.as_mut() {
            block.text.push_str(text);
            if bold {
                block.strong.push_str(text);
            } else {
                block.outside_strong.push_str(text);
            }
        }
        if let Some((_, anchor_text)) = anchor.as_mut() {
            anchor_text.push_str(text);
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = tag_name(&e);
                if matches!(name.as_str(), "script" | "style") {
                    skip_depth += 1;
                } else if name == "p" && current.as_ref().is_some_and(|b| b.is_paragraph) {
                    // <p> cannot nest; an open paragraph closes implicitly.
                    if let Some(block) = current.take() {
                        doc.blocks.push(block);
                    }
                    current = Some(Block {
                        is_paragraph: true,
                        ..Block::default()
                    });
                } else if is_block(&name) {
                    if block_depth == 0 {
                        current = Some(Block {
                            is_paragraph: name == "p",
                            ..Block::default()
                        });
                    }
                    block_depth += 1;
                } else if is_bold(&name) {
                    bold_depth += 1;
                } else if name == "a" {
                    anchor = href_of(&e).map(|href| (href, String::new()));
                } else if is_separator(&name) {
                    push_text(" ", &mut current, &mut anchor, &mut doc.loose_text, bold_depth > 0);
                }
            }
            Ok(Event::Empty(e)) => {
                let name = tag_name(&e);
                if name == "a" {
                    if let Some(href) = href_of(&e) {
                        doc.links.push(DocumentLink {
                            title: href.clone(),
                            url: Some(href),
                            document_type: None,
                        });
                    }
                } else if is_separator(&name) {
                    push_text(" ", &mut current, &mut anchor, &mut doc.loose_text, bold_depth > 0);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                if matches!(name.as_str(), "script" | "style") {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if is_block(&name) {
                    if block_depth > 0 {
                        block_depth -= 1;
                        if block_depth == 0 {
                            if let Some(block) = current.take() {
                                doc.blocks.push(block);
                            }
                        }
                    }
                } else if is_bold(&name) {
                    bold_depth = bold_depth.saturating_sub(1);
                } else if name == "a" {
                    if let Some((href, text)) = anchor.take() {
                        let title = normalise_whitespace(&text);
                        doc.links.push(DocumentLink {
                            title: if title.is_empty() { href.clone() } else { title },
                            url: Some(href),
                            document_type: None,
                        });
                    }
                } else if is_separator(&name) {
                    push_text(" ", &mut current, &mut anchor, &mut doc.loose_text, bold_depth > 0);
                }
            }
            Ok(Event::Text(t)) => {
                if skip_depth == 0 {
                    let text = text_of(&t);
                    push_text(&text, &mut current, &mut anchor, &mut doc.loose_text, bold_depth > 0);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "stopping lenient HTML read early");
                break;
            }
        }
    }

    if let Some(block) = current.take() {
        doc.blocks.push(block);
    }
    if let Some((href, text)) = anchor.take() {
        let title = normalise_whitespace(&text);
        doc.links.push(DocumentLink {
            title: if title.is_empty() { href.clone() } else { title },
            url: Some(href),
            document_type: None,
        });
    }
    doc
}

/// Plain text of a fragment with entities decoded and whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    normalise_whitespace(&read_document(html).loose_text)
}

/// First non-empty paragraph, or the whole fragment's text.
pub fn first_paragraph(html: &str) -> Option<String> {
    let doc = read_document(html);
    doc.blocks
        .iter()
        .filter(|b| b.is_paragraph)
        .map(|b| normalise_whitespace(&b.text))
        .find(|t| !t.is_empty())
        .or_else(|| Some(normalise_whitespace(&doc.loose_text)))
        .filter(|t| !t.is_empty())
}

fn section_key(heading: &str) -> String {
    heading
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

/// Extract summary, contacts, and links from a service page body.
pub fn parse_service_content(html: &str) -> ServiceContent {
    let doc = read_document(html);

    let mut sections: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut current_section: Option<String> = None;
    let mut first_plain_paragraph: Option<String> = None;
    let mut contacts: IndexSet<ContactPoint> = IndexSet::new();

    for block in &doc.blocks {
        let strong = normalise_whitespace(&block.strong);
        let outside = normalise_whitespace(&block.outside_strong);
        if !strong.is_empty() && outside.is_empty() {
            let key = section_key(&strong);
            sections.entry(key.clone()).or_default();
            current_section = Some(key);
            continue;
        }

        let text = normalise_whitespace(&block.text);
        if text.is_empty() {
            continue;
        }
        if block.is_paragraph && strong.is_empty() && first_plain_paragraph.is_none() {
            first_plain_paragraph = Some(text.clone());
        }

        let key = current_section.clone().unwrap_or_else(|| "body".to_string());
        sections.entry(key).or_default().push(text.clone());

        if let Some(section) = &current_section {
            if section.starts_with("adresse") {
                contacts.insert(ContactPoint {
                    label: "Adresse".to_string(),
                    value: Some(text.clone()),
                });
            }
            if section.contains("structure") {
                contacts.insert(ContactPoint {
                    label: "Structure".to_string(),
                    value: Some(text),
                });
            }
        }
    }

    let summary = match (sections.get("description"), sections.get("body")) {
        (Some(description), _) if !description.is_empty() => description.first().cloned(),
        (_, Some(body)) if !body.is_empty() => body
            .iter()
            .find(|candidate| {
                !matches!(
                    candidate.to_lowercase().as_str(),
                    "description" | "adresse" | "structure"
                )
            })
            .cloned(),
        _ => first_plain_paragraph,
    };

    let links: IndexSet<DocumentLink> = doc.links.into_iter().collect();

    ServiceContent {
        summary,
        contacts: contacts.into_iter().collect(),
        links: links.into_iter().collect(),
    }
}
