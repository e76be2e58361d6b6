//! Mapping of Substack posts onto WXR items.
//!
//! Mapping is deterministic: the same source item at the same position with the
//! same first comment id always yields the same [`WxrItem`]. Resumed jobs rely
//! on this to reproduce output byte for byte.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::source::SourceItem;
use crate::wxr::{Comment, Meta, PostStatus, PostType, Taxonomy, Term, WxrItem};

pub const UNTITLED: &str = "(untitled)";

/// Lowercase ASCII slug: runs of anything but letters and digits become `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS` (read as UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default)]
pub struct Mapper {
    /// Post ids are `base_post_id + position + 1`.
    pub base_post_id: u64,
    /// Publication URL on Substack, used to build `<link>`.
    pub source_url: Option<String>,
    pub default_author: Option<String>,
}

impl Mapper {
    /// Map the item found at `position`; its comments are numbered from
    /// `first_comment_id`.
    pub fn map(&self, source: &SourceItem, position: u64, first_comment_id: u64) -> Result<WxrItem> {
        let id = non_blank(&source.id)
            .ok_or_else(|| ConvertError::schema(format!("position {position}"), "missing id"))?
            .to_string();

        let published = source
            .is_published
            .ok_or_else(|| ConvertError::schema(&id, "missing publication status"))?;

        let published_at = match non_blank(&source.published_at) {
            Some(raw) => Some(
                parse_date(raw)
                    .ok_or_else(|| ConvertError::schema(&id, format!("unreadable date {raw:?}")))?,
            ),
            None => None,
        };
        if published && published_at.is_none() {
            return Err(ConvertError::schema(&id, "published post has no date"));
        }

        let title = non_blank(&source.title).unwrap_or(UNTITLED).to_string();
        let slug = non_blank(&source.slug)
            .map(slugify)
            .or_else(|| id.split_once('.').map(|(_, rest)| slugify(rest)))
            .filter(|s| !s.is_empty())
            .or_else(|| Some(slugify(&title)).filter(|s| !s.is_empty()));

        let mut item = WxrItem::new(&id, self.base_post_id + position + 1, title);
        item.status = Some(if published {
            PostStatus::Publish
        } else {
            PostStatus::Draft
        });
        item.published_at = published_at;
        item.content = source.body_html.clone();
        item.excerpt = non_blank(&source.subtitle).map(str::to_string);
        item.creator = non_blank(&source.author)
            .map(str::to_string)
            .or_else(|| self.default_author.clone());
        item.post_type = match source.post_type.as_deref() {
            Some("page") => PostType::Page,
            _ => PostType::Post,
        };
        if let (Some(base), Some(slug)) = (&self.source_url, &slug) {
            item.link = Some(format!("{}/p/{slug}", base.trim_end_matches('/')));
        }
        item.slug = slug;

        if let Some(section) = non_blank(&source.section) {
            push_term(&mut item.terms, Taxonomy::Category, section);
        }
        for tag in &source.tags {
            push_term(&mut item.terms, Taxonomy::PostTag, tag);
        }

        item.meta.push(Meta::new("_substack_post_id", &id));
        if let Some(kind) = non_blank(&source.post_type) {
            item.meta.push(Meta::new("_substack_type", kind));
        }
        if let Some(audience) = non_blank(&source.audience) {
            item.meta.push(Meta::new("_substack_audience", audience));
        }
        if let Some(url) = non_blank(&source.podcast_url) {
            item.meta.push(Meta::new("_substack_podcast_url", url));
        }
        for attachment in &source.attachments {
            item.meta
                .push(Meta::new("_substack_attachment", attachment.url.trim()));
        }

        let mut next_id = first_comment_id;
        for comment in &source.comments {
            let Some(body) = non_blank(&comment.body) else {
                debug!(post = %id, "dropping comment without body");
                continue;
            };
            let date = non_blank(&comment.date)
                .and_then(parse_date)
                .or(published_at)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            item.comments.push(Comment {
                id: next_id,
                author: non_blank(&comment.author).unwrap_or("Anonymous").to_string(),
                author_email: non_blank(&comment.email).map(str::to_string),
                author_url: None,
                date,
                content: body.to_string(),
                approved: true,
                parent: 0,
            });
            next_id += 1;
        }

        Ok(item)
    }
}

fn push_term(terms: &mut Vec<Term>, taxonomy: Taxonomy, name: &str) {
    let name = name.trim();
    let slug = slugify(name);
    if slug.is_empty()
        || terms
            .iter()
            .any(|t| t.taxonomy == taxonomy && t.slug == slug)
    {
        return;
    }
    terms.push(Term {
        taxonomy,
        slug,
        name: name.to_string(),
    });
}
