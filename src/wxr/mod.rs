pub mod builder;
pub mod generator;
pub mod item;
pub mod writer;

pub use builder::{DocumentBuilder, Escape, Suspended};
pub use generator::WxrGenerator;
pub use item::{
    Author, ChannelMeta, Comment, Meta, PostStatus, PostType, Taxonomy, Term, WxrItem,
};
pub use writer::{Target, Writer};
