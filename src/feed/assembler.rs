use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::error::CoreError;
use crate::feed::model::{Article, FeedEnvelope, FeedOptions};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const MEDIA_NS: &str = "http://search.yahoo.com/mrss/";

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("xml write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml processing failed: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl From<AssembleError> for CoreError {
    fn from(e: AssembleError) -> Self {
        CoreError::Internal(e.to_string())
    }
}

/// Inputs for a pass-through rewrite.
pub struct PassthroughSpec<'a> {
    pub overrides: &'a FeedOptions,
    /// Effective item cap; items beyond it are dropped from the end.
    pub limit: usize,
    pub generator: &'a str,
    pub self_link: &'a str,
    pub build_time: DateTime<Utc>,
}

#[derive(Clone, Copy, PartialEq)]
enum FeedFormat {
    Rss,
    Atom,
}

/// Rewrites an origin feed in place, preserving everything it does not own.
///
/// Mutated: the channel/feed `title` and `description`/`subtitle` (only
/// when an override is present), `lastBuildDate`/`updated` (always, to the
/// build time), `generator` (always), the `href` of an existing
/// `rel="self"` link, and the item list (truncated to `limit`).
/// `lastBuildDate` and `generator` are inserted when the source lacks
/// them; a missing self link is not added, since the source may not
/// declare the Atom namespace.
///
/// Only the first matching element directly under `channel` (RSS) or
/// `feed` (Atom) is rewritten; non-namespaced foreign elements with
/// colliding names nested deeper are preserved verbatim.
pub fn rewrite_feed(input: &[u8], spec: &PassthroughSpec<'_>) -> Result<Vec<u8>, AssembleError> {
    let mut reader = Reader::from_reader(input);
    let mut writer = Writer::new(Vec::with_capacity(input.len() + 256));

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut format: Option<FeedFormat> = None;
    let mut title_done = false;
    let mut desc_done = false;
    let mut build_done = false;
    let mut generator_done = false;
    let mut self_done = false;
    let mut item_count = 0usize;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if format.is_none() && path.is_empty() {
                    format = match name.as_slice() {
                        b"rss" => Some(FeedFormat::Rss),
                        b"feed" => Some(FeedFormat::Atom),
                        _ => None,
                    };
                }

                if at_channel_level(&path, format) {
                    match (format, name.as_slice()) {
                        (_, b"title") if spec.overrides.title.is_some() && !title_done => {
                            title_done = true;
                            replace_text(
                                &mut reader,
                                &mut writer,
                                &e,
                                spec.overrides.title.as_deref().unwrap_or_default(),
                            )?;
                            continue;
                        }
                        (Some(FeedFormat::Rss), b"description")
                        | (Some(FeedFormat::Atom), b"subtitle")
                            if spec.overrides.description.is_some() && !desc_done =>
                        {
                            desc_done = true;
                            replace_text(
                                &mut reader,
                                &mut writer,
                                &e,
                                spec.overrides.description.as_deref().unwrap_or_default(),
                            )?;
                            continue;
                        }
                        (Some(FeedFormat::Rss), b"lastBuildDate") if !build_done => {
                            build_done = true;
                            replace_text(
                                &mut reader,
                                &mut writer,
                                &e,
                                &spec.build_time.to_rfc2822(),
                            )?;
                            continue;
                        }
                        (Some(FeedFormat::Atom), b"updated") if !build_done => {
                            build_done = true;
                            let stamp = spec
                                .build_time
                                .to_rfc3339_opts(SecondsFormat::Secs, true);
                            replace_text(&mut reader, &mut writer, &e, &stamp)?;
                            continue;
                        }
                        (_, b"generator") if !generator_done => {
                            generator_done = true;
                            replace_text(&mut reader, &mut writer, &e, spec.generator)?;
                            continue;
                        }
                        (Some(FeedFormat::Rss), b"item") | (Some(FeedFormat::Atom), b"entry") => {
                            item_count += 1;
                            if item_count > spec.limit {
                                // Consume and drop the whole element
                                reader.read_to_end(e.name())?;
                                continue;
                            }
                        }
                        _ => {}
                    }
                }

                path.push(name);
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                let name = e.name().as_ref().to_vec();
                let is_self_link = at_channel_level(&path, format)
                    && !self_done
                    && matches!(
                        (format, name.as_slice()),
                        (Some(FeedFormat::Rss), b"atom:link") | (Some(FeedFormat::Atom), b"link")
                    )
                    && has_attr(&e, b"rel", b"self");

                if is_self_link {
                    self_done = true;
                    writer.write_event(Event::Empty(replace_href(&e, spec.self_link)))?;
                } else {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::End(e) => {
                let closes_channel = match format {
                    Some(FeedFormat::Rss) => {
                        e.name().as_ref() == b"channel" && path.len() == 2
                    }
                    Some(FeedFormat::Atom) => e.name().as_ref() == b"feed" && path.len() == 1,
                    None => false,
                };
                if closes_channel {
                    if !build_done {
                        match format {
                            Some(FeedFormat::Rss) => {
                                write_text_element(
                                    &mut writer,
                                    "lastBuildDate",
                                    &spec.build_time.to_rfc2822(),
                                )?;
                            }
                            Some(FeedFormat::Atom) => {
                                let stamp = spec
                                    .build_time
                                    .to_rfc3339_opts(SecondsFormat::Secs, true);
                                write_text_element(&mut writer, "updated", &stamp)?;
                            }
                            None => {}
                        }
                        build_done = true;
                    }
                    if !generator_done {
                        write_text_element(&mut writer, "generator", spec.generator)?;
                        generator_done = true;
                    }
                }
                path.pop();
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner())
}

/// Serializes a [`FeedEnvelope`] as RSS 2.0.
///
/// Output is byte-for-byte identical for a fixed envelope: element order is
/// fixed and the only timestamp written is the envelope's `build_time`.
/// Namespace declarations are emitted only when a namespaced child appears
/// somewhere in the document.
pub fn synthesize(envelope: &FeedEnvelope) -> Result<Vec<u8>, AssembleError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let has_items = !envelope.items.is_empty();
    let has_content = envelope.items.iter().any(|a| a.content.is_some());
    let has_media = envelope.items.iter().any(|a| a.image.is_some());

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:atom", ATOM_NS));
    if has_items {
        rss.push_attribute(("xmlns:dc", DC_NS));
    }
    if has_content {
        rss.push_attribute(("xmlns:content", CONTENT_NS));
    }
    if has_media {
        rss.push_attribute(("xmlns:media", MEDIA_NS));
    }
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    write_text_element(&mut writer, "title", &envelope.title)?;
    write_text_element(&mut writer, "description", &envelope.description)?;
    write_text_element(&mut writer, "link", &envelope.site_link)?;

    let mut self_link = BytesStart::new("atom:link");
    self_link.push_attribute(("href", envelope.self_link.as_str()));
    self_link.push_attribute(("rel", "self"));
    self_link.push_attribute(("type", "application/rss+xml"));
    writer.write_event(Event::Empty(self_link))?;

    if let Some(language) = &envelope.language {
        write_text_element(&mut writer, "language", language)?;
    }
    for category in &envelope.categories {
        write_text_element(&mut writer, "category", category)?;
    }
    write_text_element(&mut writer, "ttl", &envelope.ttl_minutes.to_string())?;
    write_text_element(&mut writer, "generator", &envelope.generator)?;
    write_text_element(
        &mut writer,
        "lastBuildDate",
        &envelope.build_time.to_rfc2822(),
    )?;

    for (index, item) in envelope.items.iter().enumerate() {
        write_item(&mut writer, envelope, item, index)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_item(
    writer: &mut Writer<Vec<u8>>,
    envelope: &FeedEnvelope,
    article: &Article,
    index: usize,
) -> Result<(), AssembleError> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;

    write_text_element(writer, "title", &article.title)?;
    write_text_element(writer, "description", &article.description)?;
    write_text_element(writer, "link", &article.link)?;

    let guid = if article.guid.is_empty() {
        format!("{}#{}", article.link, index)
    } else {
        article.guid.clone()
    };
    let mut guid_elem = BytesStart::new("guid");
    if guid != article.link {
        guid_elem.push_attribute(("isPermaLink", "false"));
    }
    writer.write_event(Event::Start(guid_elem))?;
    writer.write_event(Event::Text(BytesText::new(&guid)))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;

    write_text_element(writer, "pubDate", &article.published_at.to_rfc2822())?;

    if let Some(author) = &article.author {
        write_text_element(writer, "author", author)?;
        write_text_element(writer, "dc:creator", author)?;
    }
    if let Some(category) = &article.category {
        write_text_element(writer, "category", category)?;
    }

    if let Some(image) = &article.image {
        let mime = image_mime(image);

        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", image.as_str()));
        enclosure.push_attribute(("length", "0"));
        enclosure.push_attribute(("type", mime));
        writer.write_event(Event::Empty(enclosure))?;

        let mut media_content = BytesStart::new("media:content");
        media_content.push_attribute(("url", image.as_str()));
        media_content.push_attribute(("medium", "image"));
        media_content.push_attribute(("type", mime));
        writer.write_event(Event::Empty(media_content))?;

        let mut media_thumb = BytesStart::new("media:thumbnail");
        media_thumb.push_attribute(("url", image.as_str()));
        writer.write_event(Event::Empty(media_thumb))?;
    }

    if let Some(content) = &article.content {
        writer.write_event(Event::Start(BytesStart::new("content:encoded")))?;
        // A CDATA section cannot contain its own terminator
        let safe = content.replace("]]>", "]]&gt;");
        writer.write_event(Event::CData(BytesCData::new(safe)))?;
        writer.write_event(Event::End(BytesEnd::new("content:encoded")))?;
    }

    write_text_element(writer, "dc:source", &envelope.site_link)?;
    write_text_element(writer, "dc:identifier", &guid)?;

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), AssembleError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn at_channel_level(path: &[Vec<u8>], format: Option<FeedFormat>) -> bool {
    match format {
        Some(FeedFormat::Rss) => path.len() == 2 && path[0] == b"rss" && path[1] == b"channel",
        Some(FeedFormat::Atom) => path.len() == 1 && path[0] == b"feed",
        None => false,
    }
}

fn replace_text<'a>(
    reader: &mut Reader<&'a [u8]>,
    writer: &mut Writer<Vec<u8>>,
    start: &BytesStart<'_>,
    text: &str,
) -> Result<(), AssembleError> {
    writer.write_event(Event::Start(start.to_owned()))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    reader.read_to_end(start.name())?;
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn has_attr(e: &BytesStart<'_>, key: &[u8], value: &[u8]) -> bool {
    e.attributes()
        .flatten()
        .any(|a| a.key.as_ref() == key && a.value.as_ref() == value)
}

fn replace_href(e: &BytesStart<'_>, href: &str) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut replaced = BytesStart::new(name);
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"href" {
            replaced.push_attribute(("href", href));
        } else {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            replaced.push_attribute((key.as_str(), value.as_str()));
        }
    }
    replaced
}

fn image_mime(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "image/jpeg"
    }
}
