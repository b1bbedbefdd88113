use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::card::{
    is_owner, CardError, EditDraft, PostCard, RenderedCard, DELETE_FAILED, LOGIN_PROMPT,
    UPDATE_FAILED,
};
use crate::data::PostStore;
use crate::error::ApiError;
use crate::feed::{FeedCache, FeedRequest, FeedScope};
use crate::follow::{FollowAction, FollowError, FollowToggle, FollowView};
use crate::pagination::Pagination;
use crate::session::Identity;
use crate::social::{Post, PostDraft, PostId, Profile, ProfileExpand};

pub const NO_POSTS: &str = "No posts found.";
pub const LOAD_FAILED: &str = "Could not load posts.";
pub const CREATE_FAILED: &str = "Post creation failed";
pub const FETCH_FAILED: &str = "Could not load post.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("Please login first.")]
    NotLoggedIn,
    #[error("post {0} is not in this feed")]
    UnknownPost(PostId),
    #[error("profile is still loading")]
    ProfileNotLoaded,
    #[error("Could not load posts.")]
    Load(#[source] ApiError),
    #[error("Could not load profile.")]
    Profile(#[source] ApiError),
    #[error("{message}")]
    Create { message: String, source: ApiError },
    #[error("{message}")]
    Fetch { message: String, source: ApiError },
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Follow(#[from] FollowError),
}

/// Card interactions, addressed by post id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostEvent {
    /// Fetches a single post by id so its card works outside the loaded feed.
    Open(PostId),
    Edit(PostId),
    UpdateDraft(PostId, EditDraft),
    Save(PostId),
    CancelEdit(PostId),
    RequestDelete(PostId),
    ConfirmDelete(PostId),
    CancelDelete(PostId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Search(String),
    LoadMore,
    Refresh,
    Create(PostDraft),
    Post(PostEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    Search(String),
    LoadMore,
    Refresh,
    ToggleFollow,
    Post(PostEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Loading,
    Ready,
    Empty,
    Failed,
}

impl FeedStatus {
    pub fn message(&self) -> Option<&'static str> {
        match self {
            FeedStatus::Empty => Some(NO_POSTS),
            FeedStatus::Failed => Some(LOAD_FAILED),
            FeedStatus::Loading | FeedStatus::Ready => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
    pub cards: Vec<RenderedCard>,
    pub show_load_more: bool,
    pub status: FeedStatus,
    pub term: String,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileView {
    pub name: String,
    pub email: String,
    pub bio: Option<String>,
    pub posts: i64,
    pub followers: i64,
    pub following: i64,
    pub follow: Option<FollowView>,
    pub feed: FeedView,
}

enum Response {
    Posts {
        request_id: u64,
        request: FeedRequest,
        result: Result<Vec<Post>, ApiError>,
    },
    Saved {
        id: PostId,
        result: Result<Post, ApiError>,
    },
    Deleted {
        id: PostId,
        result: Result<(), ApiError>,
    },
    Created {
        result: Result<Post, ApiError>,
    },
    Fetched {
        id: PostId,
        then_edit: bool,
        result: Result<Post, ApiError>,
    },
    Profile {
        request_id: u64,
        result: Result<Profile, ApiError>,
    },
    Follow {
        action: FollowAction,
        result: Result<(), ApiError>,
    },
}

/// Runs store calls on background threads and collects their responses.
struct Worker {
    store: Arc<dyn PostStore>,
    response_tx: Sender<Response>,
    response_rx: Receiver<Response>,
    next_request_id: u64,
    outstanding: usize,
}

impl Worker {
    fn new(store: Arc<dyn PostStore>) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            store,
            response_tx,
            response_rx,
            next_request_id: 1,
            outstanding: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        request_id
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce(&dyn PostStore) -> Response + Send + 'static,
    {
        self.outstanding += 1;
        let tx = self.response_tx.clone();
        let store = self.store.clone();
        thread::spawn(move || {
            let _ = tx.send(job(store.as_ref()));
        });
    }

    fn try_next(&mut self) -> Option<Response> {
        let response = self.response_rx.try_recv().ok()?;
        self.outstanding = self.outstanding.saturating_sub(1);
        Some(response)
    }

    fn wait_next(&mut self) -> Option<Response> {
        if self.outstanding == 0 {
            return None;
        }
        let response = self.response_rx.recv().ok()?;
        self.outstanding -= 1;
        Some(response)
    }
}

/// Cache, pagination and per-post cards for one listing.
struct Listing {
    cache: FeedCache,
    pages: Pagination,
    cards: HashMap<PostId, PostCard>,
    opened: HashMap<PostId, Post>,
    pending_load: Option<u64>,
    failed: bool,
    notice: Option<String>,
}

impl Listing {
    fn new(scope: FeedScope, fetch_limit: usize, page_size: usize) -> Self {
        Self {
            cache: FeedCache::new(scope, fetch_limit),
            pages: Pagination::new(page_size),
            cards: HashMap::new(),
            opened: HashMap::new(),
            pending_load: None,
            failed: false,
            notice: None,
        }
    }

    fn search(&mut self, worker: &mut Worker, identity: &Identity, term: &str) {
        self.pages.reset();
        self.load(worker, identity, term);
    }

    fn load(&mut self, worker: &mut Worker, identity: &Identity, term: &str) {
        if !self.cache.needs_fetch(term) {
            // A newer term may be in flight; the cached one wins now.
            self.pending_load = None;
            self.failed = false;
            self.sync_cards(identity);
            return;
        }
        let request_id = worker.next_id();
        let request = self.cache.request(term);
        tracing::debug!(request_id, term = %request.term, "loading feed");
        self.pending_load = Some(request_id);
        worker.spawn(move |store| {
            let result = request.fetch(store);
            Response::Posts {
                request_id,
                request,
                result,
            }
        });
    }

    fn reload(&mut self, worker: &mut Worker, identity: &Identity) {
        self.cache.invalidate();
        let term = self.cache.term().to_string();
        self.load(worker, identity, &term);
    }

    fn apply_posts(
        &mut self,
        identity: &Identity,
        request_id: u64,
        request: FeedRequest,
        result: Result<Vec<Post>, ApiError>,
    ) -> Result<(), DriverError> {
        if self.pending_load != Some(request_id) {
            tracing::debug!(request_id, "dropping stale feed response");
            return Ok(());
        }
        self.pending_load = None;
        match self.cache.apply(request, result) {
            Ok(_) => {
                self.failed = false;
                self.sync_cards(identity);
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                Err(DriverError::Load(err))
            }
        }
    }

    /// Keeps card state for posts still cached or opened and builds cards for new ones.
    fn sync_cards(&mut self, identity: &Identity) {
        let viewer = identity.current_user();
        let viewer = viewer.as_deref();
        let posts = self.cache.posts();
        let opened = &self.opened;
        self.cards.retain(|id, _| {
            opened.contains_key(id) || posts.iter().any(|post| post.id == *id)
        });
        for post in posts {
            let stale = self
                .cards
                .get(&post.id)
                .map_or(true, |card| card.is_owned() != is_owner(post, viewer));
            if stale {
                self.cards.insert(post.id, PostCard::new(post, viewer));
            }
        }
    }

    fn post(&self, id: PostId) -> Option<&Post> {
        self.cache.get(id).or_else(|| self.opened.get(&id))
    }

    fn handle_post(&mut self, worker: &mut Worker, event: PostEvent) -> Result<(), DriverError> {
        match event {
            PostEvent::Open(id) => Self::open(worker, id, false),
            PostEvent::Edit(id) => {
                if self.post(id).is_none() || !self.cards.contains_key(&id) {
                    // Seed the card and draft from the server copy once it arrives.
                    Self::open(worker, id, true);
                    return Ok(());
                }
                let post = self
                    .cache
                    .get(id)
                    .or_else(|| self.opened.get(&id))
                    .ok_or(DriverError::UnknownPost(id))?;
                let card = self.cards.get_mut(&id).ok_or(DriverError::UnknownPost(id))?;
                card.begin_edit(post)?;
            }
            PostEvent::UpdateDraft(id, draft) => {
                let card = self.card_mut(id)?;
                let current = card.draft_mut().ok_or(CardError::NotEditing)?;
                *current = draft;
            }
            PostEvent::Save(id) => {
                let request = self.card_mut(id)?.begin_save()?;
                worker.spawn(move |store| Response::Saved {
                    id,
                    result: request.send(store),
                });
            }
            PostEvent::CancelEdit(id) => self.card_mut(id)?.cancel_edit(),
            PostEvent::RequestDelete(id) => self.card_mut(id)?.request_delete()?,
            PostEvent::ConfirmDelete(id) => {
                let request = self.card_mut(id)?.confirm_delete()?;
                worker.spawn(move |store| Response::Deleted {
                    id,
                    result: request.send(store),
                });
            }
            PostEvent::CancelDelete(id) => self.card_mut(id)?.cancel_delete(),
        }
        Ok(())
    }

    fn card_mut(&mut self, id: PostId) -> Result<&mut PostCard, DriverError> {
        self.cards.get_mut(&id).ok_or(DriverError::UnknownPost(id))
    }

    fn open(worker: &mut Worker, id: PostId, then_edit: bool) {
        tracing::debug!(%id, then_edit, "fetching post");
        worker.spawn(move |store| Response::Fetched {
            id,
            then_edit,
            result: store.get_post(id),
        });
    }

    fn apply_fetched(
        &mut self,
        identity: &Identity,
        id: PostId,
        then_edit: bool,
        result: Result<Post, ApiError>,
    ) -> Result<(), DriverError> {
        let post = result.map_err(|source| {
            tracing::warn!(%id, error = %source, "post fetch failed");
            DriverError::Fetch {
                message: source.user_message(FETCH_FAILED),
                source,
            }
        })?;
        let viewer = identity.current_user();
        let viewer = viewer.as_deref();
        let stale = self
            .cards
            .get(&id)
            .map_or(true, |card| card.is_owned() != is_owner(&post, viewer));
        if stale {
            self.cards.insert(id, PostCard::new(&post, viewer));
        }
        self.opened.insert(id, post);
        if then_edit {
            if let (Some(card), Some(post)) = (self.cards.get_mut(&id), self.opened.get(&id)) {
                card.begin_edit(post)?;
            }
        }
        Ok(())
    }

    fn apply_saved(
        &mut self,
        worker: &mut Worker,
        identity: &Identity,
        id: PostId,
        result: Result<Post, ApiError>,
    ) -> Result<(), DriverError> {
        let saved = match self.cards.get_mut(&id) {
            Some(card) => card.finish_save(&mut self.cache, result)?,
            None => result.map_err(|source| {
                tracing::warn!(%id, error = %source, "post update failed after its card closed");
                CardError::Store {
                    message: source.user_message(UPDATE_FAILED),
                    source,
                }
            })?,
        };
        if let Some(post) = self.opened.get_mut(&id) {
            *post = saved;
        }
        self.reload(worker, identity);
        Ok(())
    }

    fn apply_deleted(
        &mut self,
        worker: &mut Worker,
        identity: &Identity,
        id: PostId,
        result: Result<(), ApiError>,
    ) -> Result<(), DriverError> {
        match self.cards.get_mut(&id) {
            Some(card) => card.finish_delete(&mut self.cache, result)?,
            None => result.map_err(|source| {
                tracing::warn!(%id, error = %source, "post delete failed after its card closed");
                CardError::Store {
                    message: source.user_message(DELETE_FAILED),
                    source,
                }
            })?,
        }
        self.cards.remove(&id);
        self.opened.remove(&id);
        self.reload(worker, identity);
        Ok(())
    }

    fn status(&self) -> FeedStatus {
        if self.pending_load.is_some() || (!self.cache.is_loaded() && !self.failed) {
            FeedStatus::Loading
        } else if self.failed {
            FeedStatus::Failed
        } else if self.cache.is_empty() {
            FeedStatus::Empty
        } else {
            FeedStatus::Ready
        }
    }

    fn render(&self) -> FeedView {
        let status = self.status();
        let posts = self.cache.posts();
        let cards = match status {
            FeedStatus::Failed => Vec::new(),
            _ => self
                .pages
                .visible_slice(posts)
                .iter()
                .filter_map(|post| self.cards.get(&post.id).map(|card| card.render(post)))
                .collect(),
        };
        FeedView {
            show_load_more: status == FeedStatus::Ready && self.pages.has_more(posts.len()),
            cards,
            status,
            term: self.cache.term().to_string(),
            notice: self.notice.clone(),
        }
    }
}

/// The all-posts feed with search, paging, creation and per-post cards.
pub struct FeedDriver {
    worker: Worker,
    identity: Arc<Identity>,
    listing: Listing,
}

impl FeedDriver {
    pub fn new(
        store: Arc<dyn PostStore>,
        identity: Arc<Identity>,
        fetch_limit: usize,
        page_size: usize,
    ) -> Self {
        Self {
            worker: Worker::new(store),
            identity,
            listing: Listing::new(FeedScope::All, fetch_limit, page_size),
        }
    }

    pub fn init(&mut self) {
        self.search("");
    }

    pub fn search(&mut self, term: &str) {
        self.listing.search(&mut self.worker, &self.identity, term);
    }

    pub fn load_more(&mut self) {
        self.listing.pages.load_more();
    }

    pub fn cache(&self) -> &FeedCache {
        &self.listing.cache
    }

    pub fn pagination(&self) -> &Pagination {
        &self.listing.pages
    }

    pub fn card(&self, id: PostId) -> Option<&PostCard> {
        self.listing.cards.get(&id)
    }

    /// A post from the loaded feed, or one fetched on its own with [`PostEvent::Open`].
    pub fn post(&self, id: PostId) -> Option<&Post> {
        self.listing.post(id)
    }

    pub fn post_view(&self, id: PostId) -> Option<RenderedCard> {
        let post = self.listing.post(id)?;
        self.listing.cards.get(&id).map(|card| card.render(post))
    }

    /// True while any store call started by this driver has not been applied.
    pub fn is_busy(&self) -> bool {
        self.worker.outstanding > 0
    }

    pub fn handle(&mut self, event: FeedEvent) -> Result<(), DriverError> {
        match event {
            FeedEvent::Search(term) => self.search(&term),
            FeedEvent::LoadMore => self.load_more(),
            FeedEvent::Refresh => self.listing.reload(&mut self.worker, &self.identity),
            FeedEvent::Create(draft) => self.create(draft)?,
            FeedEvent::Post(event) => self.listing.handle_post(&mut self.worker, event)?,
        }
        Ok(())
    }

    fn create(&mut self, draft: PostDraft) -> Result<(), DriverError> {
        if self.identity.current_user().is_none() {
            self.listing.notice = Some(LOGIN_PROMPT.to_string());
            return Err(DriverError::NotLoggedIn);
        }
        self.listing.notice = None;
        self.worker.spawn(move |store| Response::Created {
            result: store.create_post(&draft),
        });
        Ok(())
    }

    /// Applies every response that has already arrived.
    pub fn pump(&mut self) -> Result<(), DriverError> {
        let mut first_error = None;
        while let Some(response) = self.worker.try_next() {
            if let Err(err) = self.apply(response) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Blocks until every outstanding call, including follow-up reloads, is applied.
    pub fn settle(&mut self) -> Result<(), DriverError> {
        let mut first_error = None;
        while let Some(response) = self.worker.wait_next() {
            if let Err(err) = self.apply(response) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn apply(&mut self, response: Response) -> Result<(), DriverError> {
        let listing = &mut self.listing;
        match response {
            Response::Posts {
                request_id,
                request,
                result,
            } => listing.apply_posts(&self.identity, request_id, request, result),
            Response::Saved { id, result } => {
                listing.apply_saved(&mut self.worker, &self.identity, id, result)
            }
            Response::Deleted { id, result } => {
                listing.apply_deleted(&mut self.worker, &self.identity, id, result)
            }
            Response::Created { result } => match result {
                Ok(post) => {
                    tracing::info!(id = %post.id, "post created");
                    listing.pages.reset();
                    listing.reload(&mut self.worker, &self.identity);
                    Ok(())
                }
                Err(source) => {
                    let message = source.user_message(CREATE_FAILED);
                    tracing::warn!(error = %source, "post creation failed");
                    listing.notice = Some(message.clone());
                    Err(DriverError::Create { message, source })
                }
            },
            Response::Fetched {
                id,
                then_edit,
                result,
            } => listing.apply_fetched(&self.identity, id, then_edit, result),
            Response::Profile { .. } | Response::Follow { .. } => Ok(()),
        }
    }

    pub fn render(&self) -> FeedView {
        self.listing.render()
    }
}

/// One profile page: header counts, follow control and the author's posts.
pub struct ProfileDriver {
    worker: Worker,
    identity: Arc<Identity>,
    name: String,
    profile: Option<Profile>,
    follow: Option<FollowToggle>,
    pending_profile: Option<u64>,
    listing: Listing,
}

impl ProfileDriver {
    pub fn new(
        store: Arc<dyn PostStore>,
        identity: Arc<Identity>,
        name: &str,
        fetch_limit: usize,
        page_size: usize,
    ) -> Self {
        Self {
            worker: Worker::new(store),
            identity,
            name: name.to_string(),
            profile: None,
            follow: None,
            pending_profile: None,
            listing: Listing::new(FeedScope::Author(name.to_string()), fetch_limit, page_size),
        }
    }

    pub fn init(&mut self) {
        self.load_profile();
        self.listing.search(&mut self.worker, &self.identity, "");
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn follow(&self) -> Option<&FollowToggle> {
        self.follow.as_ref()
    }

    pub fn cache(&self) -> &FeedCache {
        &self.listing.cache
    }

    pub fn is_busy(&self) -> bool {
        self.worker.outstanding > 0
    }

    fn load_profile(&mut self) {
        let request_id = self.worker.next_id();
        let name = self.name.clone();
        self.pending_profile = Some(request_id);
        self.worker.spawn(move |store| Response::Profile {
            request_id,
            result: store.get_profile(&name, ProfileExpand::default()),
        });
    }

    pub fn handle(&mut self, event: ProfileEvent) -> Result<(), DriverError> {
        match event {
            ProfileEvent::Search(term) => {
                self.listing.search(&mut self.worker, &self.identity, &term)
            }
            ProfileEvent::LoadMore => self.listing.pages.load_more(),
            ProfileEvent::Refresh => {
                self.load_profile();
                self.listing.reload(&mut self.worker, &self.identity);
            }
            ProfileEvent::ToggleFollow => {
                let toggle = self.follow.as_mut().ok_or(DriverError::ProfileNotLoaded)?;
                if let Some(action) = toggle.begin()? {
                    self.worker.spawn(move |store| {
                        let result = action.send(store);
                        Response::Follow { action, result }
                    });
                }
            }
            ProfileEvent::Post(event) => self.listing.handle_post(&mut self.worker, event)?,
        }
        Ok(())
    }

    pub fn pump(&mut self) -> Result<(), DriverError> {
        let mut first_error = None;
        while let Some(response) = self.worker.try_next() {
            if let Err(err) = self.apply(response) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn settle(&mut self) -> Result<(), DriverError> {
        let mut first_error = None;
        while let Some(response) = self.worker.wait_next() {
            if let Err(err) = self.apply(response) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn apply(&mut self, response: Response) -> Result<(), DriverError> {
        match response {
            Response::Posts {
                request_id,
                request,
                result,
            } => self
                .listing
                .apply_posts(&self.identity, request_id, request, result),
            Response::Saved { id, result } => {
                self.listing
                    .apply_saved(&mut self.worker, &self.identity, id, result)
            }
            Response::Deleted { id, result } => {
                self.listing
                    .apply_deleted(&mut self.worker, &self.identity, id, result)
            }
            Response::Profile { request_id, result } => {
                if self.pending_profile != Some(request_id) {
                    return Ok(());
                }
                self.pending_profile = None;
                let profile = result.map_err(DriverError::Profile)?;
                let viewer = self.identity.current_user();
                // Keep an in-flight toggle rather than losing its guard.
                if !self.follow.as_ref().is_some_and(FollowToggle::in_flight) {
                    self.follow = Some(FollowToggle::new(&profile, viewer.as_deref()));
                }
                self.profile = Some(profile);
                Ok(())
            }
            Response::Follow { action, result } => {
                let toggle = self.follow.as_mut().ok_or(DriverError::ProfileNotLoaded)?;
                toggle.finish(&action, result)?;
                // Follower counts changed server-side.
                self.load_profile();
                Ok(())
            }
            Response::Fetched {
                id,
                then_edit,
                result,
            } => self
                .listing
                .apply_fetched(&self.identity, id, then_edit, result),
            Response::Created { .. } => Ok(()),
        }
    }

    pub fn render(&self) -> Option<ProfileView> {
        let profile = self.profile.as_ref()?;
        Some(ProfileView {
            name: profile.name.clone(),
            email: profile.email.clone(),
            bio: profile.bio.clone(),
            posts: profile.count.posts,
            followers: profile.count.followers,
            following: profile.count.following,
            follow: self
                .follow
                .as_ref()
                .filter(|toggle| toggle.is_visible())
                .map(FollowToggle::view),
            feed: self.listing.render(),
        })
    }
}
