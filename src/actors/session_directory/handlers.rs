use std::collections::HashSet;

use tracing::{debug, warn};

use super::directory::DirectoryActor;
use super::messages::DirectoryEvent;
use crate::chat::{SessionSummary, USERS, UserProfile};
use crate::error::ChatError;
use crate::store::{Document, DocumentSnapshot, StoreError};

impl DirectoryActor {
    pub(super) fn handle_sessions_snapshot(&mut self, docs: Vec<Document>) {
        let mut incoming = Vec::with_capacity(docs.len());
        for doc in &docs {
            match SessionSummary::from_document(doc, &self.current_user_id) {
                Some(summary) => incoming.push(summary),
                None => debug!("Skipping session document {}: invalid participants", doc.id),
            }
        }

        // Entries unchanged by the (session id, last message timestamp)
        // identity are carried over wholesale; everything else is rebuilt
        // from the profile cache, or the placeholder until a profile
        // arrives.
        let mut merged = Vec::with_capacity(incoming.len());
        for mut summary in incoming {
            if let Some(existing) = self
                .state
                .sessions
                .iter()
                .find(|entry| entry.same_entry(&summary))
            {
                merged.push(existing.clone());
                continue;
            }
            if let Some(profile) = self.profiles.get(&summary.other_participant_id) {
                summary.apply_profile(profile);
            }
            merged.push(summary);
        }

        let list_changed = merged != self.state.sessions;
        let had_error = self.state.error.take().is_some();
        let was_loading = std::mem::take(&mut self.state.is_loading);
        if list_changed {
            self.state.sessions = merged;
        }
        if list_changed || had_error || was_loading {
            self.publish();
        }

        self.reconcile_profile_listeners();
    }

    pub(super) fn handle_sessions_error(&mut self, error: StoreError) {
        warn!("Chat session subscription failed: {}", error);
        // The last known list stays in place; only the error field flips.
        self.state.error = Some(ChatError::DirectoryUnavailable(error.to_string()));
        self.state.is_loading = false;
        self.publish();
    }

    pub(super) fn handle_profile(&mut self, user_id: String, snapshot: DocumentSnapshot) {
        if !self.profile_subs.contains_key(&user_id) {
            debug!("Dropping profile snapshot for {}: no longer in view", user_id);
            return;
        }
        let profile = match snapshot {
            Ok(Some(doc)) => UserProfile::from_document(&doc),
            Ok(None) => {
                debug!("Profile document not found for {}", user_id);
                UserProfile::unknown()
            }
            Err(e) => {
                warn!("Profile subscription failed for {}: {}", user_id, e);
                UserProfile {
                    name: "Unknown".to_string(),
                    surname: String::new(),
                    avatar_url: None,
                }
            }
        };

        if self.profiles.get(&user_id) == Some(&profile) {
            return;
        }
        self.profiles.insert(user_id.clone(), profile.clone());

        let mut changed = false;
        for summary in self
            .state
            .sessions
            .iter_mut()
            .filter(|entry| entry.other_participant_id == user_id)
        {
            changed |= summary.apply_profile(&profile);
        }
        if changed {
            self.publish();
        }
    }

    /// Adjusts the per-user profile subscriptions to match the participants
    /// currently in view: exactly one live subscription per visible id.
    pub(super) fn reconcile_profile_listeners(&mut self) {
        let desired: HashSet<String> = self
            .state
            .sessions
            .iter()
            .map(|entry| entry.other_participant_id.clone())
            .collect();
        let active: HashSet<String> = self.profile_subs.keys().cloned().collect();
        let diff = diff_listener_keys(&desired, &active);

        for user_id in diff.to_remove {
            if let Some(guard) = self.profile_subs.remove(&user_id) {
                guard.cancel();
            }
            self.profiles.remove(&user_id);
            debug!("Removed profile listener for {}", user_id);
        }

        for user_id in diff.to_add {
            let mut subscription = self.store.subscribe_document(USERS, &user_id);
            self.profile_subs
                .insert(user_id.clone(), subscription.guard());
            let events = self.events.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = subscription.recv().await {
                    let event = DirectoryEvent::Profile {
                        user_id: user_id.clone(),
                        snapshot,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            });
        }
    }

    pub(super) fn handle_stop(&mut self) {
        self.session_guard.cancel();
        for guard in self.profile_subs.values() {
            guard.cancel();
        }
        self.profile_subs.clear();
    }
}

pub(crate) struct ListenerDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

/// Difference between the participant ids that should be watched and the
/// ones currently watched. Kept as a pure function so the reconciliation
/// rule is testable without a store.
pub(crate) fn diff_listener_keys(
    desired: &HashSet<String>,
    active: &HashSet<String>,
) -> ListenerDiff {
    let mut to_add: Vec<String> = desired.difference(active).cloned().collect();
    let mut to_remove: Vec<String> = active.difference(desired).cloned().collect();
    to_add.sort();
    to_remove.sort();
    ListenerDiff { to_add, to_remove }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_adds_missing_and_removes_stale() {
        let diff = diff_listener_keys(&keys(&["a", "b", "c"]), &keys(&["b", "d"]));
        assert_eq!(diff.to_add, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(diff.to_remove, vec!["d".to_string()]);
    }

    #[test]
    fn test_diff_is_empty_when_sets_match() {
        let diff = diff_listener_keys(&keys(&["a"]), &keys(&["a"]));
        assert!(diff.to_add.is_empty());
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_diff_removes_everything_for_empty_view() {
        let diff = diff_listener_keys(&HashSet::new(), &keys(&["a", "b"]));
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove, vec!["a".to_string(), "b".to_string()]);
    }
}
