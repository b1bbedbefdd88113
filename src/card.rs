use crate::data::PostStore;
use crate::error::ApiError;
use crate::feed::FeedCache;
use crate::social::{Post, PostDraft, PostId};

pub const NO_CONTENT: &str = "No content";
pub const DEFAULT_IMAGE_ALT: &str = "Post image";
pub const UPDATE_FAILED: &str = "Post update failed";
pub const DELETE_FAILED: &str = "Post deletion failed";
pub const LOGIN_PROMPT: &str = "Please login first.";

/// True only for a signed-in viewer whose name is the post's author.
pub fn is_owner(post: &Post, viewer: Option<&str>) -> bool {
    match viewer {
        Some(name) if !name.is_empty() => post.author.name == name,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    #[error("Please login first.")]
    NotLoggedIn,
    #[error("only the author can change this post")]
    NotOwner,
    #[error("title required")]
    TitleRequired,
    #[error("post is not being edited")]
    NotEditing,
    #[error("delete has not been confirmed")]
    NotConfirmed,
    #[error("{message}")]
    Store { message: String, source: ApiError },
}

/// Edited values, detached from the cached post until saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditDraft {
    pub title: String,
    pub body: String,
    pub media_url: String,
}

impl EditDraft {
    pub fn from_post(post: &Post) -> Self {
        Self {
            title: post.title.clone(),
            body: post.body.clone(),
            media_url: post
                .media
                .as_ref()
                .map(|media| media.url.clone())
                .unwrap_or_default(),
        }
    }

    pub fn to_post_draft(&self) -> PostDraft {
        PostDraft::new(&self.title, &self.body, &self.media_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardMode {
    Viewing,
    Editing(EditDraft),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub id: PostId,
    pub draft: PostDraft,
}

impl SaveRequest {
    pub fn send(&self, store: &dyn PostStore) -> Result<Post, ApiError> {
        store.update_post(self.id, &self.draft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    pub id: PostId,
}

impl DeleteRequest {
    pub fn send(&self, store: &dyn PostStore) -> Result<(), ApiError> {
        store.delete_post(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardAction {
    Open(PostId),
    ViewAuthor(String),
    Edit(PostId),
    Delete(PostId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageView {
    pub url: String,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardView {
    pub id: PostId,
    pub title: String,
    pub body: String,
    pub image: Option<ImageView>,
    pub author: String,
    pub created: String,
    pub actions: Vec<CardAction>,
    pub confirming_delete: bool,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditView {
    pub id: PostId,
    pub title: String,
    pub body: String,
    pub media_url: String,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedCard {
    View(CardView),
    Edit(EditView),
}

impl RenderedCard {
    pub fn id(&self) -> PostId {
        match self {
            RenderedCard::View(view) => view.id,
            RenderedCard::Edit(view) => view.id,
        }
    }
}

/// Interaction state for one rendered post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCard {
    id: PostId,
    signed_in: bool,
    owned: bool,
    mode: CardMode,
    confirming_delete: bool,
    notice: Option<String>,
}

impl PostCard {
    pub fn new(post: &Post, viewer: Option<&str>) -> Self {
        Self {
            id: post.id,
            signed_in: viewer.is_some_and(|name| !name.is_empty()),
            owned: is_owner(post, viewer),
            mode: CardMode::Viewing,
            confirming_delete: false,
            notice: None,
        }
    }

    pub fn id(&self) -> PostId {
        self.id
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn mode(&self) -> &CardMode {
        &self.mode
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.mode, CardMode::Editing(_))
    }

    pub fn is_confirming_delete(&self) -> bool {
        self.confirming_delete
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn draft(&self) -> Option<&EditDraft> {
        match &self.mode {
            CardMode::Editing(draft) => Some(draft),
            CardMode::Viewing => None,
        }
    }

    pub fn draft_mut(&mut self) -> Option<&mut EditDraft> {
        match &mut self.mode {
            CardMode::Editing(draft) => Some(draft),
            CardMode::Viewing => None,
        }
    }

    fn ensure_owner(&self) -> Result<(), CardError> {
        if !self.signed_in {
            return Err(CardError::NotLoggedIn);
        }
        if !self.owned {
            return Err(CardError::NotOwner);
        }
        Ok(())
    }

    /// Viewing -> Editing with a draft copied from `post`.
    pub fn begin_edit(&mut self, post: &Post) -> Result<(), CardError> {
        self.ensure_owner()?;
        if !self.is_editing() {
            self.mode = CardMode::Editing(EditDraft::from_post(post));
        }
        self.confirming_delete = false;
        self.notice = None;
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        self.mode = CardMode::Viewing;
        self.notice = None;
    }

    /// Validates the draft and builds the update call. The card stays in
    /// Editing until [`PostCard::finish_save`] sees the response.
    pub fn begin_save(&mut self) -> Result<SaveRequest, CardError> {
        self.ensure_owner()?;
        let draft = self.draft().ok_or(CardError::NotEditing)?;
        if draft.title.trim().is_empty() {
            self.notice = Some(CardError::TitleRequired.to_string());
            return Err(CardError::TitleRequired);
        }
        Ok(SaveRequest {
            id: self.id,
            draft: draft.to_post_draft(),
        })
    }

    pub fn finish_save(
        &mut self,
        cache: &mut FeedCache,
        result: Result<Post, ApiError>,
    ) -> Result<Post, CardError> {
        match result {
            Ok(post) => {
                tracing::info!(id = %self.id, "post saved");
                cache.invalidate();
                self.mode = CardMode::Viewing;
                self.notice = None;
                Ok(post)
            }
            Err(source) => {
                let message = source.user_message(UPDATE_FAILED);
                tracing::warn!(id = %self.id, error = %source, "post save failed");
                self.notice = Some(message.clone());
                Err(CardError::Store { message, source })
            }
        }
    }

    pub fn save(
        &mut self,
        store: &dyn PostStore,
        cache: &mut FeedCache,
    ) -> Result<Post, CardError> {
        let request = self.begin_save()?;
        let result = request.send(store);
        self.finish_save(cache, result)
    }

    /// Shows the confirmation step; nothing is sent yet.
    pub fn request_delete(&mut self) -> Result<(), CardError> {
        self.ensure_owner()?;
        self.confirming_delete = true;
        self.notice = None;
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        self.confirming_delete = false;
    }

    pub fn confirm_delete(&mut self) -> Result<DeleteRequest, CardError> {
        self.ensure_owner()?;
        if !self.confirming_delete {
            return Err(CardError::NotConfirmed);
        }
        self.confirming_delete = false;
        Ok(DeleteRequest { id: self.id })
    }

    pub fn finish_delete(
        &mut self,
        cache: &mut FeedCache,
        result: Result<(), ApiError>,
    ) -> Result<(), CardError> {
        match result {
            Ok(()) => {
                tracing::info!(id = %self.id, "post deleted");
                cache.invalidate();
                self.notice = None;
                Ok(())
            }
            Err(source) => {
                let message = source.user_message(DELETE_FAILED);
                tracing::warn!(id = %self.id, error = %source, "post delete failed");
                self.notice = Some(message.clone());
                Err(CardError::Store { message, source })
            }
        }
    }

    /// Confirms a previously requested delete and sends it.
    pub fn delete(
        &mut self,
        store: &dyn PostStore,
        cache: &mut FeedCache,
    ) -> Result<(), CardError> {
        let request = self.confirm_delete()?;
        let result = request.send(store);
        self.finish_delete(cache, result)
    }

    pub fn render(&self, post: &Post) -> RenderedCard {
        match &self.mode {
            CardMode::Editing(draft) => RenderedCard::Edit(EditView {
                id: self.id,
                title: draft.title.clone(),
                body: draft.body.clone(),
                media_url: draft.media_url.clone(),
                notice: self.notice.clone(),
            }),
            CardMode::Viewing => RenderedCard::View(self.view(post)),
        }
    }

    pub fn view(&self, post: &Post) -> CardView {
        let mut actions = vec![
            CardAction::Open(post.id),
            CardAction::ViewAuthor(post.author.name.clone()),
        ];
        if self.owned {
            actions.push(CardAction::Edit(post.id));
            actions.push(CardAction::Delete(post.id));
        }
        let body = if post.body.trim().is_empty() {
            NO_CONTENT.to_string()
        } else {
            post.body.clone()
        };
        let image = post
            .media
            .as_ref()
            .filter(|media| !media.url.trim().is_empty())
            .map(|media| ImageView {
                url: media.url.clone(),
                alt: if media.alt.trim().is_empty() {
                    DEFAULT_IMAGE_ALT.to_string()
                } else {
                    media.alt.clone()
                },
            });
        CardView {
            id: post.id,
            title: post.title.clone(),
            body,
            image,
            author: post.author.name.clone(),
            created: post.created.format("%Y-%m-%d").to_string(),
            actions,
            confirming_delete: self.confirming_delete,
            notice: self.notice.clone(),
        }
    }
}
