//! Domain types for the news site backend.

pub mod language;
pub mod posts;

pub use language::Language;
pub use posts::{ContentVariant, PaginatedPosts, Post, PostInput};

use crate::cache::{EntityMarker, EntitySchema};

/// The entity marker set for this backend.
///
/// `ContentVariant` is declared before `Post`: both carry `postId`, and
/// marker matching is first-wins, so the more specific composite key must
/// come first.
pub fn schema() -> EntitySchema {
    EntitySchema::new(vec![
        EntityMarker::new("ContentVariant", ["postId", "languageCode"]),
        EntityMarker::new("Post", ["postId"]),
        EntityMarker::new("User", ["userId"]),
    ])
}
