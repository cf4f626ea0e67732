//! Typed operations over the generic cache core.
//!
//! Each method encodes the variable shape the backend expects, runs through
//! the cache under the policy the corresponding page uses (lists revalidate
//! in the background, search always hits the network), and decodes the named
//! response field into its domain type. Mutations declare their cache
//! effects here, next to the operation that causes them.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::cache::{
    CacheContext, CachePolicy, MutationEffects, MutationResponse, QueryKey, QueryOptions,
    QueryResponse,
};
use crate::domain::{Language, PaginatedPosts, Post, PostInput};
use crate::error::QueryError;

use super::fetcher::Fetcher;

pub const OP_POSTS: &str = "posts";
pub const OP_POST: &str = "post";
pub const OP_POSTS_PAGINATED: &str = "postsPaginated";
pub const OP_TOP_POSTS: &str = "topPosts";
pub const OP_SEARCH_POSTS: &str = "searchPosts";
pub const OP_DID_YOU_MEAN: &str = "didYouMean";
pub const OP_CREATE_POST: &str = "createPost";
pub const OP_UPDATE_POST: &str = "updatePost";
pub const OP_DELETE_POST: &str = "deletePost";
pub const OP_LOGIN: &str = "login";

/// Operations whose cached slots a post mutation makes stale.
const LIST_OPERATIONS: [&str; 3] = [OP_POSTS, OP_POSTS_PAGINATED, OP_TOP_POSTS];

/// Search query parameters.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub contains_text: String,
    pub sort_by_relevance: bool,
}

/// Credentials accepted by the login mutation.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Session returned by a successful login.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthSession {
    pub token: String,
}

/// Typed client bound to one cache context and one transport.
#[derive(Clone)]
pub struct OnsideClient {
    cache: CacheContext,
    fetcher: Arc<dyn Fetcher>,
}

impl OnsideClient {
    pub fn new(cache: CacheContext, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { cache, fetcher }
    }

    pub fn cache(&self) -> &CacheContext {
        &self.cache
    }

    /// All posts in a language; cached, revalidated in the background.
    pub async fn posts(&self, language: Language) -> Result<Vec<Post>, QueryError> {
        let response = self
            .cache
            .query(
                OP_POSTS,
                json!({ "language": language }),
                Arc::clone(&self.fetcher),
                QueryOptions::new(CachePolicy::CacheAndNetwork),
            )
            .await;
        decode_query(response, OP_POSTS)
    }

    /// One post by id; served from cache when already fetched.
    pub async fn post(&self, id: i64) -> Result<Post, QueryError> {
        let response = self
            .cache
            .query(
                OP_POST,
                json!({ "id": id }),
                Arc::clone(&self.fetcher),
                QueryOptions::default(),
            )
            .await;
        decode_query(response, OP_POST)
    }

    pub async fn posts_paginated(
        &self,
        page: u32,
        page_size: u32,
        language: Language,
    ) -> Result<PaginatedPosts, QueryError> {
        let response = self
            .cache
            .query(
                OP_POSTS_PAGINATED,
                json!({ "page": page, "pageSize": page_size, "language": language }),
                Arc::clone(&self.fetcher),
                QueryOptions::new(CachePolicy::CacheAndNetwork),
            )
            .await;
        decode_query(response, OP_POSTS_PAGINATED)
    }

    pub async fn top_posts(&self, limit: u32, language: Language) -> Result<Vec<Post>, QueryError> {
        let response = self
            .cache
            .query(
                OP_TOP_POSTS,
                json!({ "limit": limit, "language": language }),
                Arc::clone(&self.fetcher),
                QueryOptions::new(CachePolicy::CacheAndNetwork),
            )
            .await;
        decode_query(response, OP_TOP_POSTS)
    }

    /// Full-text search; always hits the network, results still written back
    /// so post records stay consistent with the rest of the cache.
    pub async fn search_posts(
        &self,
        filter: &SearchFilter,
        language: Language,
    ) -> Result<Vec<Post>, QueryError> {
        let response = self
            .cache
            .query(
                OP_SEARCH_POSTS,
                json!({
                    "filter": {
                        "containsText": filter.contains_text,
                        "sortByRelevance": filter.sort_by_relevance,
                    },
                    "language": language,
                }),
                Arc::clone(&self.fetcher),
                QueryOptions::new(CachePolicy::NetworkOnly),
            )
            .await;
        decode_query(response, OP_SEARCH_POSTS)
    }

    /// Spelling suggestion for a search query, when the backend has one.
    pub async fn did_you_mean(&self, query: &str) -> Result<Option<String>, QueryError> {
        let response = self
            .cache
            .query(
                OP_DID_YOU_MEAN,
                json!({ "query": query }),
                Arc::clone(&self.fetcher),
                QueryOptions::default(),
            )
            .await;
        decode_query(response, OP_DID_YOU_MEAN)
    }

    /// Create a post; list slots go stale so open pages re-fetch.
    pub async fn create_post(&self, input: &PostInput) -> Result<Post, QueryError> {
        let response = self
            .cache
            .mutate(
                OP_CREATE_POST,
                json!({ "input": input }),
                Arc::clone(&self.fetcher),
                list_stale_effects(),
            )
            .await;
        decode_mutation(response, OP_CREATE_POST)
    }

    /// Update a post; the returned record propagates to every cached view.
    pub async fn update_post(&self, id: i64, input: &PostInput) -> Result<Post, QueryError> {
        let response = self
            .cache
            .mutate(
                OP_UPDATE_POST,
                json!({ "id": id, "input": input }),
                Arc::clone(&self.fetcher),
                list_stale_effects(),
            )
            .await;
        decode_mutation(response, OP_UPDATE_POST)
    }

    /// Delete a post; the record is removed from the store and pruned out of
    /// every cached list, with pagination totals decremented optimistically.
    pub async fn delete_post(&self, id: i64) -> Result<bool, QueryError> {
        let response = self
            .cache
            .mutate(
                OP_DELETE_POST,
                json!({ "id": id }),
                Arc::clone(&self.fetcher),
                list_stale_effects().remove(crate::cache::EntityKey::new("Post", id.to_string())),
            )
            .await;
        decode_mutation(response, OP_DELETE_POST)
    }

    /// Authenticate; touches no cached post state.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthSession, QueryError> {
        let response = self
            .cache
            .mutate(
                OP_LOGIN,
                json!({
                    "input": {
                        "username": credentials.username,
                        "password": credentials.password,
                    }
                }),
                Arc::clone(&self.fetcher),
                MutationEffects::none(),
            )
            .await;
        decode_mutation(response, OP_LOGIN)
    }
}

/// Cache key for the posts listing, for subscribe/peek callers.
pub fn posts_key(language: Language) -> QueryKey {
    QueryKey::encode(OP_POSTS, &json!({ "language": language }))
}

pub fn posts_paginated_key(page: u32, page_size: u32, language: Language) -> QueryKey {
    QueryKey::encode(
        OP_POSTS_PAGINATED,
        &json!({ "page": page, "pageSize": page_size, "language": language }),
    )
}

pub fn top_posts_key(limit: u32, language: Language) -> QueryKey {
    QueryKey::encode(OP_TOP_POSTS, &json!({ "limit": limit, "language": language }))
}

fn list_stale_effects() -> MutationEffects {
    LIST_OPERATIONS
        .iter()
        .fold(MutationEffects::none(), |effects, op| {
            effects.stale_operation(*op)
        })
}

fn decode_query<T: DeserializeOwned>(response: QueryResponse, field: &str) -> Result<T, QueryError> {
    if let Some(error) = response.error {
        return Err(error);
    }
    decode_field(response.data, field)
}

fn decode_mutation<T: DeserializeOwned>(
    response: MutationResponse,
    field: &str,
) -> Result<T, QueryError> {
    if let Some(error) = response.error {
        return Err(error);
    }
    decode_field(response.data, field)
}

fn decode_field<T: DeserializeOwned>(data: Option<Value>, field: &str) -> Result<T, QueryError> {
    let mut data = data.ok_or_else(|| QueryError::decode(format!("empty response for `{field}`")))?;
    let value = data
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| QueryError::decode(format!("response missing field `{field}`")))?;
    serde_json::from_value(value).map_err(|err| QueryError::decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::domain;

    use super::*;

    /// Routes each operation to a fixed response.
    struct ScriptedFetcher {
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, operation: &str, variables: &Value) -> Result<Value, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match operation {
                OP_POSTS => Ok(json!({
                    "posts": [{
                        "postId": 1,
                        "baseLanguage": "EN",
                        "variants": [
                            {"postId": 1, "languageCode": "EN", "title": "Hello"}
                        ]
                    }]
                })),
                OP_POST => Ok(json!({
                    "post": {"postId": variables["id"], "baseLanguage": "EN"}
                })),
                OP_DID_YOU_MEAN => Ok(json!({ "didYouMean": "messi" })),
                OP_DELETE_POST => Ok(json!({ "deletePost": true })),
                OP_LOGIN => Ok(json!({ "login": {"token": "abc"} })),
                other => Err(QueryError::decode(format!("unscripted operation `{other}`"))),
            }
        }
    }

    fn client() -> (OnsideClient, Arc<ScriptedFetcher>) {
        let cache = CacheContext::with_defaults(domain::schema());
        let fetcher = ScriptedFetcher::new();
        (
            OnsideClient::new(cache, Arc::clone(&fetcher) as Arc<dyn Fetcher>),
            fetcher,
        )
    }

    #[tokio::test]
    async fn posts_decodes_typed_records() {
        let (client, _) = client();
        let posts = client.posts(Language::En).await.expect("posts");
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0]
                .content_resolved(Language::En)
                .map(|v| v.title.as_str()),
            Some("Hello")
        );
    }

    #[tokio::test]
    async fn post_by_id_is_cached() {
        let (client, fetcher) = client();
        client.post(7).await.expect("post");
        client.post(7).await.expect("post");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn did_you_mean_decodes_option() {
        let (client, _) = client();
        let suggestion = client.did_you_mean("mesi").await.expect("suggestion");
        assert_eq!(suggestion.as_deref(), Some("messi"));
    }

    #[tokio::test]
    async fn delete_returns_bool_and_login_returns_session() {
        let (client, _) = client();
        assert!(client.delete_post(1).await.expect("delete"));
        let session = client
            .login(&Credentials {
                username: "admin".to_string(),
                password: "secret".to_string(),
            })
            .await
            .expect("login");
        assert_eq!(session.token, "abc");
    }

    #[tokio::test]
    async fn missing_field_is_a_decode_error() {
        let err = decode_field::<Vec<Post>>(Some(json!({"other": []})), OP_POSTS)
            .expect_err("missing field");
        assert!(matches!(err, QueryError::Decode(_)));
    }

    #[test]
    fn key_helpers_match_manual_encoding() {
        assert_eq!(
            posts_key(Language::En),
            QueryKey::encode(OP_POSTS, &json!({"language": "EN"}))
        );
        assert_eq!(
            posts_paginated_key(1, 12, Language::Ru).operation(),
            OP_POSTS_PAGINATED
        );
        assert_eq!(top_posts_key(12, Language::En).operation(), OP_TOP_POSTS);
    }
}
