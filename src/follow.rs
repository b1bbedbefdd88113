use crate::data::PostStore;
use crate::error::ApiError;
use crate::social::Profile;

pub const FOLLOW_LABEL: &str = "Follow";
pub const UNFOLLOW_LABEL: &str = "Unfollow";
pub const PENDING_LABEL: &str = "Please wait...";
pub const FOLLOW_FAILED: &str = "Follow request failed";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FollowError {
    #[error("Please login first.")]
    NotLoggedIn,
    #[error("you cannot follow yourself")]
    OwnProfile,
    #[error("{message}")]
    Store { message: String, source: ApiError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowAction {
    Follow(String),
    Unfollow(String),
}

impl FollowAction {
    pub fn send(&self, store: &dyn PostStore) -> Result<(), ApiError> {
        match self {
            FollowAction::Follow(name) => store.follow_profile(name),
            FollowAction::Unfollow(name) => store.unfollow_profile(name),
        }
    }

    fn follows_after(&self) -> bool {
        matches!(self, FollowAction::Follow(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowView {
    pub visible: bool,
    pub label: &'static str,
    pub disabled: bool,
    pub notice: Option<String>,
}

/// Follow state for one viewed profile with a single-request guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowToggle {
    target: String,
    visible: bool,
    signed_in: bool,
    is_following: bool,
    in_flight: bool,
    label: &'static str,
    notice: Option<String>,
}

fn resting_label(is_following: bool) -> &'static str {
    if is_following {
        UNFOLLOW_LABEL
    } else {
        FOLLOW_LABEL
    }
}

impl FollowToggle {
    pub fn new(target: &Profile, viewer: Option<&str>) -> Self {
        let viewer = viewer.filter(|name| !name.is_empty());
        let is_following = viewer.is_some_and(|name| target.has_follower(name));
        Self {
            target: target.name.clone(),
            visible: viewer != Some(target.name.as_str()),
            signed_in: viewer.is_some(),
            is_following,
            in_flight: false,
            label: resting_label(is_following),
            notice: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_following(&self) -> bool {
        self.is_following
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Starts a toggle. `Ok(None)` means a request is already in flight and
    /// the click is ignored.
    pub fn begin(&mut self) -> Result<Option<FollowAction>, FollowError> {
        if self.in_flight {
            tracing::debug!(target = %self.target, "follow toggle ignored while in flight");
            return Ok(None);
        }
        if !self.visible {
            return Err(FollowError::OwnProfile);
        }
        if !self.signed_in {
            self.notice = Some(FollowError::NotLoggedIn.to_string());
            return Err(FollowError::NotLoggedIn);
        }
        self.in_flight = true;
        self.label = PENDING_LABEL;
        self.notice = None;
        let action = if self.is_following {
            FollowAction::Unfollow(self.target.clone())
        } else {
            FollowAction::Follow(self.target.clone())
        };
        Ok(Some(action))
    }

    /// Applies the response for `action`; returns the new following state.
    pub fn finish(
        &mut self,
        action: &FollowAction,
        result: Result<(), ApiError>,
    ) -> Result<bool, FollowError> {
        self.in_flight = false;
        match result {
            Ok(()) => {
                self.is_following = action.follows_after();
                self.label = resting_label(self.is_following);
                tracing::info!(
                    target = %self.target,
                    following = self.is_following,
                    "follow toggled"
                );
                Ok(self.is_following)
            }
            Err(source) => {
                self.label = resting_label(self.is_following);
                let message = source.user_message(FOLLOW_FAILED);
                tracing::warn!(target = %self.target, error = %source, "follow toggle failed");
                self.notice = Some(message.clone());
                Err(FollowError::Store { message, source })
            }
        }
    }

    /// Runs a whole toggle cycle. `Ok(None)` when the click was ignored.
    pub fn click(&mut self, store: &dyn PostStore) -> Result<Option<bool>, FollowError> {
        let Some(action) = self.begin()? else {
            return Ok(None);
        };
        let result = action.send(store);
        self.finish(&action, result).map(Some)
    }

    pub fn view(&self) -> FollowView {
        FollowView {
            visible: self.visible,
            label: self.label,
            disabled: self.in_flight,
            notice: self.notice.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::identity;
    use crate::data::{MemoryStore, StoreOp};
    use crate::session::Identity;
    use crate::social::ProfileExpand;
    use std::sync::Arc;

    fn profile(store: &MemoryStore, name: &str) -> Profile {
        store.get_profile(name, ProfileExpand::default()).unwrap()
    }

    #[test]
    fn starts_from_followers_list() {
        let store = MemoryStore::with_sample_data(identity("linus"));
        let grace = profile(&store, "grace");
        assert!(FollowToggle::new(&grace, Some("linus")).is_following());
        assert!(!FollowToggle::new(&grace, Some("ada")).is_following());
        assert_eq!(FollowToggle::new(&grace, Some("ada")).label(), FOLLOW_LABEL);
    }

    #[test]
    fn hidden_on_own_profile() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut toggle = FollowToggle::new(&profile(&store, "ada"), Some("ada"));
        assert!(!toggle.view().visible);
        assert_eq!(toggle.click(&store), Err(FollowError::OwnProfile));
        assert_eq!(store.calls(StoreOp::Follow), 0);
    }

    #[test]
    fn follow_then_failed_unfollow() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        store.add_profile("pat");
        let mut toggle = FollowToggle::new(&profile(&store, "pat"), Some("ada"));
        assert_eq!(toggle.label(), FOLLOW_LABEL);

        assert_eq!(toggle.click(&store), Ok(Some(true)));
        assert_eq!(toggle.label(), UNFOLLOW_LABEL);
        assert!(toggle.is_following());

        store.fail_next(StoreOp::Unfollow, ApiError::Network("offline".into()));
        let err = toggle.click(&store).unwrap_err();
        assert_eq!(err.to_string(), FOLLOW_FAILED);
        assert_eq!(toggle.label(), UNFOLLOW_LABEL);
        assert!(toggle.is_following());
        assert!(!toggle.in_flight());
    }

    #[test]
    fn clicks_while_in_flight_are_ignored() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let mut toggle = FollowToggle::new(&profile(&store, "grace"), Some("ada"));

        let action = toggle.begin().unwrap().unwrap();
        assert_eq!(toggle.label(), PENDING_LABEL);
        assert!(toggle.view().disabled);
        for _ in 0..5 {
            assert_eq!(toggle.begin(), Ok(None));
        }
        let result = action.send(&store);
        assert_eq!(toggle.finish(&action, result), Ok(true));
        assert_eq!(store.calls(StoreOp::Follow), 1);
        assert!(!toggle.in_flight());
    }

    #[test]
    fn logged_out_click_prompts_without_request() {
        let store = MemoryStore::with_sample_data(Arc::new(Identity::anonymous()));
        let grace = MemoryStore::with_sample_data(identity("ada"))
            .get_profile("grace", ProfileExpand::default())
            .unwrap();
        let mut toggle = FollowToggle::new(&grace, None);
        assert!(toggle.is_visible());
        assert_eq!(toggle.click(&store), Err(FollowError::NotLoggedIn));
        assert_eq!(toggle.notice(), Some("Please login first."));
        assert_eq!(store.calls(StoreOp::Follow), 0);
        assert!(!toggle.in_flight());
    }

    #[test]
    fn conflict_message_is_surfaced() {
        let store = MemoryStore::with_sample_data(identity("ada"));
        let grace = profile(&store, "grace");
        let mut toggle = FollowToggle::new(&grace, Some("ada"));
        store.follow_profile("grace").unwrap();
        let err = toggle.click(&store).unwrap_err();
        assert_eq!(err.to_string(), "You are already following this profile");
        assert!(!toggle.is_following());
        assert_eq!(toggle.label(), FOLLOW_LABEL);
    }
}
