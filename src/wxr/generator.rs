//! WXR 1.2 emission.
//!
//! The generator owns the output [`Writer`] for one document. The channel
//! header is written by [`begin_channel`](WxrGenerator::begin_channel) and the
//! `<rss>`/`<channel>` elements stay open until
//! [`end_channel`](WxrGenerator::end_channel), so items can be appended across
//! many separate batches.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ConvertError, Result};

use super::builder::{DocumentBuilder, Escape};
use super::item::{Author, ChannelMeta, Comment, WxrItem};
use super::writer::Writer;

pub const WXR_VERSION: &str = "1.2";

const RSS_ATTRIBUTES: &[(&str, &str)] = &[
    ("version", "2.0"),
    ("xmlns:excerpt", "http://wordpress.org/export/1.2/excerpt/"),
    ("xmlns:content", "http://purl.org/rss/1.0/modules/content/"),
    ("xmlns:wfw", "http://wellformedweb.org/CommentAPI/"),
    ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
    ("xmlns:wp", "http://wordpress.org/export/1.2/"),
];

/// `pubDate` format: RFC 2822, always in UTC.
pub fn rss_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S +0000").to_string()
}

/// `wp:post_date` / `wp:comment_date` format.
pub fn wp_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Channel(Vec<String>),
    Ended,
}

pub struct WxrGenerator {
    writer: Writer,
    phase: Phase,
}

impl WxrGenerator {
    pub fn new(writer: Writer) -> Self {
        Self {
            writer,
            phase: Phase::Idle,
        }
    }

    /// Wrap a writer positioned inside an already-open channel.
    pub fn resume(writer: Writer) -> Self {
        Self {
            writer,
            phase: Phase::Channel(vec!["rss".to_string(), "channel".to_string()]),
        }
    }

    pub fn begin_channel(&mut self, meta: &ChannelMeta) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(ConvertError::Structural("channel already started".into()));
        }
        let mut b = DocumentBuilder::new();
        b.declaration()?;
        b.open("rss", RSS_ATTRIBUTES)?;
        b.open("channel", &[])?;
        b.leaf("title", &meta.title)?;
        b.leaf("link", &meta.link)?;
        b.leaf("description", &meta.description)?;
        if let Some(date) = &meta.pub_date {
            b.leaf("pubDate", &rss_date(date))?;
        }
        b.leaf("language", &meta.language)?;
        b.leaf("wp:wxr_version", WXR_VERSION)?;
        b.leaf(
            "wp:base_site_url",
            meta.base_site_url.as_deref().unwrap_or(&meta.link),
        )?;
        b.leaf(
            "wp:base_blog_url",
            meta.base_blog_url.as_deref().unwrap_or(&meta.link),
        )?;
        for author in &meta.authors {
            write_author(&mut b, author)?;
        }
        b.leaf(
            "generator",
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
        )?;

        let suspended = b.suspend();
        self.writer.write(&suspended.text)?;
        self.phase = Phase::Channel(suspended.open);
        debug!(title = %meta.title, "channel header written");
        Ok(())
    }

    /// Emit one `<item>`. The item is validated before anything is written.
    pub fn write_item(&mut self, item: &WxrItem) -> Result<()> {
        let depth = match &self.phase {
            Phase::Channel(open) => open.len(),
            _ => {
                return Err(ConvertError::Structural(
                    "item written outside of an open channel".into(),
                ));
            }
        };
        let status = item.validate()?;

        let mut b = DocumentBuilder::at_depth(depth);
        b.element("item", &[], |b| {
            b.leaf_cdata("title", &item.title)?;
            if let Some(link) = &item.link {
                b.leaf("link", link)?;
            }
            if let Some(date) = &item.published_at {
                b.leaf("pubDate", &rss_date(date))?;
            }
            if let Some(creator) = &item.creator {
                b.leaf_cdata("dc:creator", creator)?;
            }
            b.open("guid", &[("isPermaLink", "false")])?;
            b.text(&item.guid(), Escape::Entities)?;
            b.close()?;
            // Importers expect both bodies even when empty.
            b.leaf_cdata("content:encoded", item.content.as_deref().unwrap_or(""))?;
            b.leaf_cdata("excerpt:encoded", item.excerpt.as_deref().unwrap_or(""))?;
            b.leaf("wp:post_id", &item.post_id.to_string())?;
            if let Some(date) = &item.published_at {
                b.leaf_cdata("wp:post_date", &wp_date(date))?;
                b.leaf_cdata("wp:post_date_gmt", &wp_date(date))?;
            }
            b.leaf_cdata(
                "wp:comment_status",
                if item.comments_open { "open" } else { "closed" },
            )?;
            b.leaf_cdata("wp:ping_status", "closed")?;
            if let Some(slug) = &item.slug {
                b.leaf_cdata("wp:post_name", slug)?;
            }
            b.leaf_cdata("wp:status", status.as_str())?;
            b.leaf("wp:post_parent", "0")?;
            b.leaf("wp:menu_order", "0")?;
            b.leaf_cdata("wp:post_type", item.post_type.as_str())?;
            b.leaf("wp:is_sticky", if item.sticky { "1" } else { "0" })?;
            for term in &item.terms {
                b.open(
                    "category",
                    &[("domain", term.taxonomy.domain()), ("nicename", term.slug.as_str())],
                )?;
                b.cdata(&term.name)?;
                b.close()?;
            }
            for meta in &item.meta {
                b.element("wp:postmeta", &[], |b| {
                    b.leaf_cdata("wp:meta_key", &meta.key)?;
                    b.leaf_cdata("wp:meta_value", &meta.value)?;
                    Ok(())
                })?;
            }
            for comment in &item.comments {
                write_comment(b, comment)?;
            }
            Ok(())
        })?;

        let fragment = b.finish()?;
        self.writer.write(&fragment)?;
        Ok(())
    }

    pub fn end_channel(&mut self) -> Result<()> {
        let open = match std::mem::replace(&mut self.phase, Phase::Ended) {
            Phase::Channel(open) => open,
            other => {
                self.phase = other;
                return Err(ConvertError::Structural(
                    "end_channel without an open channel".into(),
                ));
            }
        };
        let mut b = DocumentBuilder::resume(open);
        while b.depth() > 0 {
            b.close()?;
        }
        let mut tail = b.finish()?;
        tail.push('\n');
        self.writer.write(&tail)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.writer.close()
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }
}

fn write_author(b: &mut DocumentBuilder, author: &Author) -> Result<()> {
    b.element("wp:author", &[], |b| {
        b.leaf("wp:author_id", &author.id.to_string())?;
        b.leaf_cdata("wp:author_login", &author.login)?;
        if let Some(email) = &author.email {
            b.leaf_cdata("wp:author_email", email)?;
        }
        b.leaf_cdata("wp:author_display_name", &author.display_name)?;
        Ok(())
    })?;
    Ok(())
}

fn write_comment(b: &mut DocumentBuilder, comment: &Comment) -> Result<()> {
    b.element("wp:comment", &[], |b| {
        b.leaf("wp:comment_id", &comment.id.to_string())?;
        b.leaf_cdata("wp:comment_author", &comment.author)?;
        if let Some(email) = &comment.author_email {
            b.leaf_cdata("wp:comment_author_email", email)?;
        }
        if let Some(url) = &comment.author_url {
            b.leaf("wp:comment_author_url", url)?;
        }
        b.leaf_cdata("wp:comment_date", &wp_date(&comment.date))?;
        b.leaf_cdata("wp:comment_date_gmt", &wp_date(&comment.date))?;
        b.leaf_cdata("wp:comment_content", &comment.content)?;
        b.leaf_cdata("wp:comment_approved", if comment.approved { "1" } else { "0" })?;
        b.leaf_cdata("wp:comment_type", "comment")?;
        b.leaf("wp:comment_parent", &comment.parent.to_string())?;
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wxr::item::{Meta, PostStatus, Taxonomy, Term};
    use crate::wxr::writer::Target;
    use chrono::TimeZone;
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn sample_item() -> WxrItem {
        let mut item = WxrItem::new("1001.hello", 5, "Hello & <welcome>");
        item.status = Some(PostStatus::Publish);
        item.published_at = Some(date());
        item.slug = Some("hello".into());
        item.creator = Some("ana".into());
        item.content = Some("<p>body with ]]> inside</p>".into());
        item.terms.push(Term {
            taxonomy: Taxonomy::PostTag,
            slug: "rust".into(),
            name: "Rust".into(),
        });
        item.meta.push(Meta::new("_substack_attachment", "a.png"));
        item.meta.push(Meta::new("_substack_attachment", "b.png"));
        item.comments.push(Comment {
            id: 1,
            author: "bob".into(),
            author_email: None,
            author_url: None,
            date: date(),
            content: "nice".into(),
            approved: true,
            parent: 0,
        });
        item
    }

    fn buffer_generator() -> WxrGenerator {
        WxrGenerator::new(Writer::open(Target::Buffer).unwrap())
    }

    fn count_elements(xml: &str, name: &str) -> usize {
        let mut reader = Reader::from_str(xml);
        let mut count = 0;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.name().as_ref() == name.as_bytes() => count += 1,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!("malformed xml: {e}\n{xml}"),
            }
        }
        count
    }

    #[test]
    fn date_formats_are_fixed() {
        assert_eq!(rss_date(&date()), "Tue, 05 Mar 2024 14:07:09 +0000");
        assert_eq!(wp_date(&date()), "2024-03-05 14:07:09");
    }

    #[test]
    fn full_document_is_well_formed() {
        let mut g = buffer_generator();
        let meta = ChannelMeta {
            title: "Blog".into(),
            link: "https://example.com".into(),
            pub_date: Some(date()),
            authors: vec![Author {
                id: 1,
                login: "ana".into(),
                email: Some("ana@example.com".into()),
                display_name: "Ana".into(),
            }],
            ..ChannelMeta::default()
        };
        g.begin_channel(&meta).unwrap();
        g.write_item(&sample_item()).unwrap();
        let mut second = sample_item();
        second.source_id = "1002.other".into();
        second.post_id = 6;
        g.write_item(&second).unwrap();
        g.end_channel().unwrap();
        assert_eq!(count_elements(g.writer().contents().unwrap(), "item"), 2);

        let xml = g.writer().contents().unwrap().to_string();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n<rss version=\"2.0\""));
        assert!(xml.ends_with("\t</channel>\n</rss>\n"));
        assert_eq!(count_elements(&xml, "item"), 2);
        assert_eq!(count_elements(&xml, "wp:postmeta"), 4);
        assert_eq!(count_elements(&xml, "wp:comment"), 2);
        assert_eq!(count_elements(&xml, "wp:author"), 1);
        assert!(xml.contains("<wp:wxr_version>1.2</wp:wxr_version>"));
        assert!(xml.contains("<pubDate>Tue, 05 Mar 2024 14:07:09 +0000</pubDate>"));
        assert!(xml.contains(r#"<guid isPermaLink="false">substack:1001.hello</guid>"#));
        assert!(xml.contains(r#"<category domain="post_tag" nicename="rust"><![CDATA[Rust]]></category>"#));
        assert!(xml.contains("<![CDATA[<p>body with ]]]]><![CDATA[> inside</p>]]>"));
    }

    #[test]
    fn optional_fields_omitted_but_bodies_present() {
        let mut g = buffer_generator();
        g.begin_channel(&ChannelMeta::default()).unwrap();
        let mut item = WxrItem::new("x", 1, "Bare");
        item.status = Some(PostStatus::Draft);
        g.write_item(&item).unwrap();
        let xml = g.writer().contents().unwrap();
        assert!(!xml.contains("<wp:post_date>"));
        assert!(!xml.contains("<dc:creator>"));
        assert!(!xml.contains("<wp:post_name>"));
        assert!(xml.contains("<content:encoded><![CDATA[]]></content:encoded>"));
        assert!(xml.contains("<excerpt:encoded><![CDATA[]]></excerpt:encoded>"));
        assert!(xml.contains("<wp:status><![CDATA[draft]]></wp:status>"));
    }

    #[test]
    fn item_fragment_layout() {
        let mut g = buffer_generator();
        g.begin_channel(&ChannelMeta::default()).unwrap();
        let start = g.writer().bytes_written() as usize;
        let mut item = WxrItem::new("x", 1, "T");
        item.status = Some(PostStatus::Publish);
        g.write_item(&item).unwrap();
        let fragment = &g.writer().contents().unwrap()[start..];
        assert!(fragment.starts_with("\n\t\t<item>\n\t\t\t<title><![CDATA[T]]></title>"));
        assert!(fragment.ends_with("\n\t\t</item>"));
    }

    #[test]
    fn schema_error_writes_nothing() {
        let mut g = buffer_generator();
        g.begin_channel(&ChannelMeta::default()).unwrap();
        let before = g.writer().bytes_written();
        let item = WxrItem::new("x", 1, "No status");
        let err = g.write_item(&item).unwrap_err();
        assert!(matches!(err, ConvertError::Schema { .. }));
        assert_eq!(g.writer().bytes_written(), before);
    }

    #[test]
    fn items_require_open_channel() {
        let mut g = buffer_generator();
        let err = g.write_item(&sample_item()).unwrap_err();
        assert!(matches!(err, ConvertError::Structural(_)));

        g.begin_channel(&ChannelMeta::default()).unwrap();
        assert!(g.begin_channel(&ChannelMeta::default()).is_err());
        g.end_channel().unwrap();
        assert!(matches!(
            g.write_item(&sample_item()),
            Err(ConvertError::Structural(_))
        ));
        assert!(g.end_channel().is_err());
    }

    #[test]
    fn empty_channel_is_well_formed() {
        let mut g = buffer_generator();
        g.begin_channel(&ChannelMeta::default()).unwrap();
        g.end_channel().unwrap();
        let xml = g.writer().contents().unwrap();
        assert_eq!(count_elements(xml, "item"), 0);
        assert_eq!(count_elements(xml, "channel"), 1);
    }

    #[test]
    fn resumed_generator_closes_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xml");
        let offset = {
            let mut g = WxrGenerator::new(Writer::open(Target::File(path.clone())).unwrap());
            g.begin_channel(&ChannelMeta::default()).unwrap();
            g.write_item(&sample_item()).unwrap();
            g.flush().unwrap();
            let offset = g.writer().bytes_written();
            // Simulate a crash after a half-written batch.
            let mut half = sample_item();
            half.source_id = "lost".into();
            g.write_item(&half).unwrap();
            g.close().unwrap();
            offset
        };

        let writer = Writer::open(Target::Resume {
            path: path.clone(),
            offset,
        })
        .unwrap();
        let mut g = WxrGenerator::resume(writer);
        g.end_channel().unwrap();
        g.close().unwrap();

        let xml = std::fs::read_to_string(&path).unwrap();
        assert_eq!(count_elements(&xml, "item"), 1);
        assert!(!xml.contains("substack:lost"));
    }
}
