use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::ApiError;
use crate::session::{Identity, TokenProvider};
use crate::social::{
    Author, Media, Post, PostCounts, PostDraft, PostId, Profile, ProfileCounts, ProfileExpand,
    ProfileRef,
};

/// Remote operations the feed controllers consume.
pub trait PostStore: Send + Sync {
    fn list_posts(&self, limit: usize, author: Option<&str>) -> Result<Vec<Post>, ApiError>;
    fn search_posts(&self, term: &str) -> Result<Vec<Post>, ApiError>;
    fn get_post(&self, id: PostId) -> Result<Post, ApiError>;
    fn create_post(&self, draft: &PostDraft) -> Result<Post, ApiError>;
    fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<Post, ApiError>;
    fn delete_post(&self, id: PostId) -> Result<(), ApiError>;
    fn get_profile(&self, name: &str, expand: ProfileExpand) -> Result<Profile, ApiError>;
    fn follow_profile(&self, name: &str) -> Result<(), ApiError>;
    fn unfollow_profile(&self, name: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Search,
    Get,
    Create,
    Update,
    Delete,
    Profile,
    Follow,
    Unfollow,
}

/// In-process store with the same rules the hosted API enforces.
///
/// Backs `--demo` and the controller tests. Calls are counted per
/// operation and a failure can be queued for the next call of an operation.
pub struct MemoryStore {
    identity: Arc<Identity>,
    state: Mutex<MemoryState>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    failures: Mutex<HashMap<StoreOp, ApiError>>,
}

#[derive(Default)]
struct MemoryState {
    posts: BTreeMap<PostId, Post>,
    profiles: BTreeMap<String, ProfileRecord>,
    next_id: i64,
}

struct ProfileRecord {
    email: String,
    bio: Option<String>,
    followers: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// A store seeded with a few profiles and fifteen posts.
    pub fn with_sample_data(identity: Arc<Identity>) -> Self {
        let store = Self::new(identity);
        for name in ["ada", "grace", "linus"] {
            store.add_profile(name);
        }
        store.add_follower("grace", "linus");
        let samples = [
            ("ada", "Hello from the feed", "First post on the new client."),
            ("grace", "Compilers are friends", "A compiler is a program that..."),
            ("linus", "Release notes", ""),
            ("ada", "Weekend hike", "Photos from the ridge."),
            ("grace", "Debugging tips", "Print the state, then print it again."),
        ];
        for round in 0..3 {
            for (author, title, body) in samples {
                let title = if round == 0 {
                    title.to_string()
                } else {
                    format!("{title} #{}", round + 1)
                };
                store.insert_post(author, &title, body);
            }
        }
        store
    }

    pub fn add_profile(&self, name: &str) {
        self.state
            .lock()
            .profiles
            .entry(name.to_string())
            .or_insert_with(|| ProfileRecord {
                email: format!("{name}@stud.noroff.no"),
                bio: None,
                followers: BTreeSet::new(),
            });
    }

    /// Records `follower -> target` without going through a session.
    pub fn add_follower(&self, target: &str, follower: &str) {
        self.add_profile(target);
        self.add_profile(follower);
        if let Some(record) = self.state.lock().profiles.get_mut(target) {
            record.followers.insert(follower.to_string());
        }
    }

    /// Seeds a post as `author` without going through a session.
    pub fn insert_post(&self, author: &str, title: &str, body: &str) -> Post {
        self.add_profile(author);
        let mut state = self.state.lock();
        let post = state.new_post(author, &PostDraft::new(title, body, ""));
        state.posts.insert(post.id, post.clone());
        post
    }

    /// Removes a post as if another client had deleted it.
    pub fn remove_post(&self, id: PostId) -> Option<Post> {
        self.state.lock().posts.remove(&id)
    }

    pub fn post_count(&self) -> usize {
        self.state.lock().posts.len()
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn fail_next(&self, op: StoreOp, err: ApiError) {
        self.failures.lock().insert(op, err);
    }

    fn begin(&self, op: StoreOp) -> Result<String, ApiError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        self.identity.token()?;
        if let Some(err) = self.failures.lock().remove(&op) {
            return Err(err);
        }
        self.identity.current_user().ok_or_else(ApiError::not_logged_in)
    }
}

impl MemoryState {
    fn new_post(&mut self, author: &str, draft: &PostDraft) -> Post {
        let id = PostId(self.next_id);
        self.next_id += 1;
        let created = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
            + Duration::minutes(id.0);
        let email = self
            .profiles
            .get(author)
            .map(|record| record.email.clone())
            .unwrap_or_default();
        Post {
            id,
            title: draft.title.clone(),
            body: draft.body.clone(),
            tags: Vec::new(),
            media: draft.media.clone(),
            created,
            updated: Some(created),
            author: Author {
                name: author.to_string(),
                email,
            },
            count: PostCounts::default(),
        }
    }

    /// Newest first, like the hosted listing.
    fn newest_first<'a>(
        &'a self,
        filter: impl Fn(&Post) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Post> + 'a {
        self.posts.values().rev().filter(move |post| filter(*post))
    }

    fn owned_post_mut(&mut self, id: PostId, viewer: &str) -> Result<&mut Post, ApiError> {
        let post = self
            .posts
            .get_mut(&id)
            .ok_or_else(|| ApiError::not_found("No post with such ID"))?;
        if post.author.name != viewer {
            return Err(ApiError::forbidden(
                "You do not have permission to modify this post",
            ));
        }
        Ok(post)
    }

    fn profile(&self, name: &str, expand: ProfileExpand) -> Result<Profile, ApiError> {
        let record = self
            .profiles
            .get(name)
            .ok_or_else(|| ApiError::not_found("No profile with this name"))?;
        let following: Vec<ProfileRef> = self
            .profiles
            .iter()
            .filter(|(_, other)| other.followers.contains(name))
            .map(|(other, _)| ProfileRef {
                name: other.clone(),
            })
            .collect();
        let followers: Vec<ProfileRef> = record
            .followers
            .iter()
            .map(|follower| ProfileRef {
                name: follower.clone(),
            })
            .collect();
        Ok(Profile {
            name: name.to_string(),
            email: record.email.clone(),
            bio: record.bio.clone(),
            count: ProfileCounts {
                posts: self.newest_first(|post| post.author.name == name).count() as i64,
                followers: followers.len() as i64,
                following: following.len() as i64,
            },
            followers: expand.followers.then_some(followers),
            following: expand.following.then_some(following),
        })
    }
}

fn validate(draft: &PostDraft) -> Result<(), ApiError> {
    if draft.title.trim().is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    if let Some(Media { url, .. }) = &draft.media {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ApiError::validation("Image URL must be valid URL"));
        }
    }
    Ok(())
}

impl PostStore for MemoryStore {
    fn list_posts(&self, limit: usize, author: Option<&str>) -> Result<Vec<Post>, ApiError> {
        self.begin(StoreOp::List)?;
        let state = self.state.lock();
        if let Some(name) = author {
            if !state.profiles.contains_key(name) {
                return Err(ApiError::not_found("No profile with this name"));
            }
        }
        Ok(state
            .newest_first(|post| author.map_or(true, |name| post.author.name == name))
            .take(limit)
            .cloned()
            .collect())
    }

    fn search_posts(&self, term: &str) -> Result<Vec<Post>, ApiError> {
        self.begin(StoreOp::Search)?;
        let state = self.state.lock();
        Ok(state.newest_first(|post| post.matches(term)).cloned().collect())
    }

    fn get_post(&self, id: PostId) -> Result<Post, ApiError> {
        self.begin(StoreOp::Get)?;
        self.state
            .lock()
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("No post with such ID"))
    }

    fn create_post(&self, draft: &PostDraft) -> Result<Post, ApiError> {
        let viewer = self.begin(StoreOp::Create)?;
        validate(draft)?;
        let mut state = self.state.lock();
        let post = state.new_post(&viewer, draft);
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<Post, ApiError> {
        let viewer = self.begin(StoreOp::Update)?;
        let mut state = self.state.lock();
        let post = state.owned_post_mut(id, &viewer)?;
        validate(draft)?;
        post.title = draft.title.clone();
        post.body = draft.body.clone();
        post.media = draft.media.clone();
        post.updated = Some(Utc::now());
        Ok(post.clone())
    }

    fn delete_post(&self, id: PostId) -> Result<(), ApiError> {
        let viewer = self.begin(StoreOp::Delete)?;
        let mut state = self.state.lock();
        state.owned_post_mut(id, &viewer)?;
        state.posts.remove(&id);
        Ok(())
    }

    fn get_profile(&self, name: &str, expand: ProfileExpand) -> Result<Profile, ApiError> {
        self.begin(StoreOp::Profile)?;
        self.state.lock().profile(name, expand)
    }

    fn follow_profile(&self, name: &str) -> Result<(), ApiError> {
        let viewer = self.begin(StoreOp::Follow)?;
        if viewer == name {
            return Err(ApiError::validation("You can't follow yourself"));
        }
        let mut state = self.state.lock();
        let record = state
            .profiles
            .get_mut(name)
            .ok_or_else(|| ApiError::not_found("No profile with this name"))?;
        if !record.followers.insert(viewer) {
            return Err(ApiError::conflict("You are already following this profile"));
        }
        Ok(())
    }

    fn unfollow_profile(&self, name: &str) -> Result<(), ApiError> {
        let viewer = self.begin(StoreOp::Unfollow)?;
        let mut state = self.state.lock();
        let record = state
            .profiles
            .get_mut(name)
            .ok_or_else(|| ApiError::not_found("No profile with this name"))?;
        if !record.followers.remove(&viewer) {
            return Err(ApiError::conflict("You are not following this profile"));
        }
        Ok(())
    }
}
