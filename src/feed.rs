use std::collections::HashSet;

use crate::data::PostStore;
use crate::error::ApiError;
use crate::social::{Post, PostId};

pub const DEFAULT_FETCH_LIMIT: usize = 100;

/// Which listing a cache mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedScope {
    All,
    Author(String),
}

/// One fetch for a cache, detached so it can run on another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub scope: FeedScope,
    pub term: String,
    pub limit: usize,
}

impl FeedRequest {
    pub fn fetch(&self, store: &dyn PostStore) -> Result<Vec<Post>, ApiError> {
        match &self.scope {
            FeedScope::All if self.term.is_empty() => store.list_posts(self.limit, None),
            FeedScope::All => store.search_posts(&self.term),
            // Profile listings have no remote search; filter what came back.
            FeedScope::Author(name) => Ok(store
                .list_posts(self.limit, Some(name))?
                .into_iter()
                .filter(|post| post.matches(&self.term))
                .collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Fetched(usize),
    Cached,
}

/// Posts most recently fetched for a view, plus the term they were fetched for.
#[derive(Debug, Clone)]
pub struct FeedCache {
    scope: FeedScope,
    limit: usize,
    posts: Vec<Post>,
    term: String,
    loaded: bool,
}

impl FeedCache {
    pub fn new(scope: FeedScope, limit: usize) -> Self {
        Self {
            scope,
            limit: limit.max(1),
            posts: Vec::new(),
            term: String::new(),
            loaded: false,
        }
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn get(&self, id: PostId) -> Option<&Post> {
        self.posts.iter().find(|post| post.id == id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn needs_fetch(&self, term: &str) -> bool {
        !self.loaded || self.term != normalize(term)
    }

    pub fn request(&self, term: &str) -> FeedRequest {
        FeedRequest {
            scope: self.scope.clone(),
            term: normalize(term),
            limit: self.limit,
        }
    }

    /// Installs a finished fetch. On error the previous contents stay.
    pub fn apply(
        &mut self,
        request: FeedRequest,
        result: Result<Vec<Post>, ApiError>,
    ) -> Result<usize, ApiError> {
        let posts = match result {
            Ok(posts) => posts,
            Err(err) => {
                tracing::warn!(term = %request.term, error = %err, "feed load failed");
                return Err(err);
            }
        };
        let mut seen = HashSet::new();
        let posts: Vec<Post> = posts
            .into_iter()
            .filter(|post| seen.insert(post.id))
            .collect();
        tracing::debug!(term = %request.term, count = posts.len(), "feed loaded");
        self.posts = posts;
        self.term = request.term;
        self.loaded = true;
        Ok(self.posts.len())
    }

    /// Fetches unless the cache already holds `term`.
    pub fn load(&mut self, store: &dyn PostStore, term: &str) -> Result<LoadOutcome, ApiError> {
        if !self.needs_fetch(term) {
            return Ok(LoadOutcome::Cached);
        }
        let request = self.request(term);
        let result = request.fetch(store);
        self.apply(request, result).map(LoadOutcome::Fetched)
    }

    /// Forces the next load to refetch even for the same term.
    pub fn invalidate(&mut self) {
        self.loaded = false;
    }
}

fn normalize(term: &str) -> String {
    term.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::identity;
    use crate::data::{MemoryStore, StoreOp};
    use crate::social::PostDraft;

    fn titles(cache: &FeedCache) -> Vec<&str> {
        cache.posts().iter().map(|post| post.title.as_str()).collect()
    }

    #[test]
    fn empty_term_matches_unfiltered_listing() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::All, DEFAULT_FETCH_LIMIT);
        cache.load(&store, "   ").unwrap();
        assert_eq!(cache.posts(), store.list_posts(DEFAULT_FETCH_LIMIT, None).unwrap());
        assert_eq!(store.calls(StoreOp::Search), 0);
    }

    #[test]
    fn term_uses_search_and_same_term_is_cached() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::All, DEFAULT_FETCH_LIMIT);
        assert_eq!(cache.load(&store, "hike").unwrap(), LoadOutcome::Fetched(3));
        assert_eq!(cache.term(), "hike");
        assert_eq!(cache.load(&store, "hike ").unwrap(), LoadOutcome::Cached);
        assert_eq!(store.calls(StoreOp::Search), 1);
    }

    #[test]
    fn invalidate_forces_refetch_and_drops_deleted() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::All, DEFAULT_FETCH_LIMIT);
        cache.load(&store, "").unwrap();
        let gone = cache.posts()[0].id;
        store.remove_post(gone);

        assert_eq!(cache.load(&store, "").unwrap(), LoadOutcome::Cached);
        cache.invalidate();
        cache.load(&store, "").unwrap();
        assert!(cache.get(gone).is_none());
        assert_eq!(store.calls(StoreOp::List), 2);
    }

    #[test]
    fn created_post_appears_once_after_reload() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::All, DEFAULT_FETCH_LIMIT);
        cache.load(&store, "").unwrap();
        store.create_post(&PostDraft::new("Hello", "", "")).unwrap();
        cache.invalidate();
        cache.load(&store, "").unwrap();
        assert_eq!(titles(&cache).iter().filter(|t| **t == "Hello").count(), 1);
    }

    #[test]
    fn failed_load_keeps_previous_contents() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::All, DEFAULT_FETCH_LIMIT);
        cache.load(&store, "").unwrap();
        let before = cache.posts().to_vec();

        store.fail_next(StoreOp::Search, ApiError::Network("offline".into()));
        let err = cache.load(&store, "debugging").unwrap_err();
        assert_eq!(err, ApiError::Network("offline".into()));
        assert_eq!(cache.posts(), before);
        assert_eq!(cache.term(), "");
        assert!(cache.is_loaded());
    }

    #[test]
    fn author_scope_filters_locally() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::Author("grace".into()), DEFAULT_FETCH_LIMIT);
        cache.load(&store, "DEBUG").unwrap();
        assert_eq!(cache.len(), 3);
        assert!(cache.posts().iter().all(|post| post.author_name() == "grace"));
        assert_eq!(store.calls(StoreOp::Search), 0);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut cache = FeedCache::new(FeedScope::All, DEFAULT_FETCH_LIMIT);
        let request = cache.request("");
        let mut posts = store.list_posts(3, None).unwrap();
        posts.push(posts[0].clone());
        assert_eq!(cache.apply(request, Ok(posts)).unwrap(), 3);
    }
}
