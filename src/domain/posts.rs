//! Post shapes as served by the backend.

use serde::{Deserialize, Serialize};

use super::language::Language;

/// A post with its per-language content variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub post_id: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub views_count: i64,
    #[serde(default)]
    pub is_top: bool,
    #[serde(default)]
    pub base_language: Language,
    #[serde(default)]
    pub served_language: Option<Language>,
    #[serde(default)]
    pub variants: Vec<ContentVariant>,
}

impl Post {
    /// The content variant to render for a requested language.
    ///
    /// Falls back to the post's base language when the requested one has no
    /// variant; `None` only for a post with no variants at all.
    pub fn content_resolved(&self, requested: Language) -> Option<&ContentVariant> {
        self.variants
            .iter()
            .find(|variant| variant.language == requested)
            .or_else(|| {
                self.variants
                    .iter()
                    .find(|variant| variant.language == self.base_language)
            })
    }
}

/// One language's title/content/tags for a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentVariant {
    pub post_id: i64,
    #[serde(rename = "languageCode")]
    pub language: Language,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One page of the paginated post listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedPosts {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<Post>,
}

/// Fields accepted by the create/update mutations.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInput {
    pub title: String,
    pub content: String,
    pub language: Language,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_top: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn variant(language: Language, title: &str) -> ContentVariant {
        ContentVariant {
            post_id: 1,
            language,
            title: title.to_string(),
            content: String::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn resolution_prefers_requested_language() {
        let post = Post {
            post_id: 1,
            image_url: None,
            created_at: None,
            views_count: 0,
            is_top: false,
            base_language: Language::Hy,
            served_language: None,
            variants: vec![variant(Language::Hy, "Բարև"), variant(Language::En, "Hello")],
        };

        assert_eq!(
            post.content_resolved(Language::En).map(|v| v.title.as_str()),
            Some("Hello")
        );
        // Missing variant falls back to the base language.
        assert_eq!(
            post.content_resolved(Language::Ru).map(|v| v.title.as_str()),
            Some("Բարև")
        );
    }

    #[test]
    fn resolution_is_none_without_variants() {
        let post = Post {
            post_id: 1,
            image_url: None,
            created_at: None,
            views_count: 0,
            is_top: false,
            base_language: Language::En,
            served_language: None,
            variants: Vec::new(),
        };
        assert!(post.content_resolved(Language::En).is_none());
    }

    #[test]
    fn post_decodes_from_camel_case() {
        let post: Post = serde_json::from_value(json!({
            "postId": 5,
            "imageUrl": "cover.png",
            "viewsCount": 12,
            "isTop": true,
            "baseLanguage": "EN",
            "variants": [
                {"postId": 5, "languageCode": "EN", "title": "Hello", "tags": ["news"]}
            ]
        }))
        .expect("decode");

        assert_eq!(post.post_id, 5);
        assert!(post.is_top);
        assert_eq!(post.variants[0].language, Language::En);
        assert_eq!(post.variants[0].tags, vec!["news".to_string()]);
    }

    #[test]
    fn paginated_page_decodes() {
        let page: PaginatedPosts = serde_json::from_value(json!({
            "page": 1,
            "pageSize": 12,
            "totalPages": 2,
            "totalCount": 20,
            "items": [{"postId": 1}]
        }))
        .expect("decode");

        assert_eq!(page.total_count, 20);
        assert_eq!(page.items.len(), 1);
    }
}
