use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    Draft,
    Private,
    Pending,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Draft => "draft",
            PostStatus::Private => "private",
            PostStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Post,
    Page,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Post => "post",
            PostType::Page => "page",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Taxonomy {
    Category,
    PostTag,
}

impl Taxonomy {
    pub fn domain(&self) -> &'static str {
        match self {
            Taxonomy::Category => "category",
            Taxonomy::PostTag => "post_tag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub taxonomy: Taxonomy,
    pub slug: String,
    pub name: String,
}

/// One `wp:postmeta` pair. Keys may repeat within an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub key: String,
    pub value: String,
}

impl Meta {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub date: DateTime<Utc>,
    pub content: String,
    pub approved: bool,
    pub parent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub login: String,
    pub email: Option<String>,
    pub display_name: String,
}

/// Site-level data emitted once at the top of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub base_site_url: Option<String>,
    #[serde(default)]
    pub base_blog_url: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(skip)]
    pub pub_date: Option<DateTime<Utc>>,
}

fn default_language() -> String {
    "en-US".to_string()
}

impl Default for ChannelMeta {
    fn default() -> Self {
        Self {
            title: "Imported from Substack".to_string(),
            link: "http://localhost".to_string(),
            description: String::new(),
            language: default_language(),
            base_site_url: None,
            base_blog_url: None,
            authors: Vec::new(),
            pub_date: None,
        }
    }
}

/// A post in WXR shape, ready for the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WxrItem {
    /// Identifier of the originating source item.
    pub source_id: String,
    pub post_id: u64,
    pub title: String,
    pub link: Option<String>,
    pub creator: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub slug: Option<String>,
    pub status: Option<PostStatus>,
    pub post_type: PostType,
    pub comments_open: bool,
    pub sticky: bool,
    pub terms: Vec<Term>,
    pub meta: Vec<Meta>,
    pub comments: Vec<Comment>,
}

impl WxrItem {
    pub fn new(source_id: impl Into<String>, post_id: u64, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            post_id,
            title: title.into(),
            link: None,
            creator: None,
            content: None,
            excerpt: None,
            published_at: None,
            slug: None,
            status: None,
            post_type: PostType::Post,
            comments_open: true,
            sticky: false,
            terms: Vec::new(),
            meta: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Stable guid traceable back to the source item.
    pub fn guid(&self) -> String {
        format!("substack:{}", self.source_id)
    }

    /// Check the fields the generator cannot do without, returning the status.
    pub fn validate(&self) -> Result<PostStatus> {
        let label = if self.source_id.trim().is_empty() {
            format!("post {}", self.post_id)
        } else {
            self.source_id.clone()
        };
        if self.source_id.trim().is_empty() {
            return Err(ConvertError::schema(label, "missing source id"));
        }
        if self.post_id == 0 {
            return Err(ConvertError::schema(label, "post id must be non-zero"));
        }
        if self.title.trim().is_empty() {
            return Err(ConvertError::schema(label, "missing title"));
        }
        self.status
            .ok_or_else(|| ConvertError::schema(label, "missing status"))
    }
}
