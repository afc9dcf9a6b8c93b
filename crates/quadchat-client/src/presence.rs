//! Presence and typing aggregation.
//!
//! Folds `user-list`, `presence` and `typing` pushes into readable state:
//! per-user online/last-seen and, per room, who is typing in the order they
//! started.
//!
//! # Invariants
//!
//! - A user appears at most once in a room's typing list.
//! - Typing entries not refreshed within the expiry window are dropped on the
//!   next sweep, so a lost "stopped typing" event cannot leave a stuck
//!   indicator.

use std::{
    collections::BTreeMap,
    fmt,
    ops::Sub,
    time::Duration,
};

use chrono::{DateTime, Utc};
use quadchat_proto::{PresenceUpdate, RoomId, UserId, UserSummary};

/// Typing entries older than this are considered stale.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(5);

/// Names shown before collapsing into "+N more".
pub const DEFAULT_TYPING_DISPLAY_CAP: usize = 3;

/// Online state of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPresence {
    /// Name to show.
    pub display_name: String,
    /// Avatar reference, if any.
    pub avatar_ref: Option<String>,
    /// Currently connected.
    pub online: bool,
    /// When the user was last seen online.
    pub last_seen: Option<DateTime<Utc>>,
}

/// One user typing in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser<I> {
    /// Who is typing.
    pub user_id: UserId,
    /// Name carried by the typing event.
    pub name: String,
    touched: I,
}

/// Display form of a room's typing list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypingSummary {
    /// First names, in the order users started typing.
    pub names: Vec<String>,
    /// How many more are typing beyond `names`.
    pub more: usize,
}

impl TypingSummary {
    /// Nobody is typing.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for TypingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.names.as_slice(), self.more) {
            ([], _) => Ok(()),
            ([one], 0) => write!(f, "{one} is typing"),
            (names, 0) => write!(f, "{} are typing", names.join(", ")),
            (names, more) => write!(f, "{} +{more} more are typing", names.join(", ")),
        }
    }
}

/// Presence directory plus per-room typing lists.
#[derive(Debug, Clone)]
pub struct PresenceAggregator<I> {
    users: BTreeMap<UserId, UserPresence>,
    typing: BTreeMap<RoomId, Vec<TypingUser<I>>>,
}

impl<I> Default for PresenceAggregator<I> {
    fn default() -> Self {
        Self { users: BTreeMap::new(), typing: BTreeMap::new() }
    }
}

impl<I> PresenceAggregator<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the directory with a `user-list` snapshot.
    pub fn apply_user_list(&mut self, users: Vec<UserSummary>) {
        self.users = users
            .into_iter()
            .map(|u| {
                let presence = UserPresence {
                    display_name: u.display_name,
                    avatar_ref: u.avatar_ref,
                    online: u.online,
                    last_seen: u.last_seen,
                };
                (u.id, presence)
            })
            .collect();
    }

    /// Apply a `presence` push. Returns whether anything changed.
    pub fn apply_presence(&mut self, update: PresenceUpdate) -> bool {
        let entry = self.users.entry(update.user_id.clone()).or_insert_with(|| UserPresence {
            display_name: update.user_id.clone(),
            avatar_ref: None,
            online: !update.online,
            last_seen: None,
        });

        let last_seen = update.last_seen.or(entry.last_seen);
        let changed = entry.online != update.online || entry.last_seen != last_seen;
        entry.online = update.online;
        entry.last_seen = last_seen;
        changed
    }

    /// Presence of one user.
    pub fn user(&self, user_id: &str) -> Option<&UserPresence> {
        self.users.get(user_id)
    }

    /// Whether the user is known to be online.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|u| u.online)
    }

    /// All known users.
    pub fn users(&self) -> impl Iterator<Item = (&UserId, &UserPresence)> {
        self.users.iter()
    }

    /// Apply a typing event for `room_id`. Returns whether the visible list
    /// changed (a refresh of an existing entry does not count).
    pub fn set_typing(
        &mut self,
        room_id: &str,
        user_id: &str,
        name: &str,
        is_typing: bool,
        now: I,
    ) -> bool {
        if is_typing {
            let entries = self.typing.entry(room_id.to_string()).or_default();
            if let Some(existing) = entries.iter_mut().find(|t| t.user_id == user_id) {
                existing.touched = now;
                return false;
            }
            entries.push(TypingUser {
                user_id: user_id.to_string(),
                name: name.to_string(),
                touched: now,
            });
            return true;
        }

        let Some(entries) = self.typing.get_mut(room_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|t| t.user_id != user_id);
        let changed = entries.len() != before;
        if entries.is_empty() {
            self.typing.remove(room_id);
        }
        changed
    }

    /// Drop entries untouched for longer than `expiry`. Returns the rooms
    /// whose lists changed.
    pub fn expire(&mut self, now: I, expiry: Duration) -> Vec<RoomId> {
        let mut changed = Vec::new();
        self.typing.retain(|room_id, entries| {
            let before = entries.len();
            entries.retain(|t| now - t.touched <= expiry);
            if entries.len() != before {
                changed.push(room_id.clone());
            }
            !entries.is_empty()
        });
        changed
    }

    /// Who is typing in `room_id`, in start order.
    pub fn typing_in(&self, room_id: &str) -> &[TypingUser<I>] {
        self.typing.get(room_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// First `cap` names plus overflow count.
    pub fn summary(&self, room_id: &str, cap: usize) -> TypingSummary {
        let entries = self.typing_in(room_id);
        TypingSummary {
            names: entries.iter().take(cap).map(|t| t.name.clone()).collect(),
            more: entries.len().saturating_sub(cap),
        }
    }

    /// Move typing state to a room's new id.
    pub fn rename_room(&mut self, old: &str, new: &str) {
        if let Some(entries) = self.typing.remove(old) {
            self.typing.insert(new.to_string(), entries);
        }
    }

    /// Drop all typing state, keeping the user directory. Returns the
    /// rooms that showed someone typing.
    pub fn clear_typing(&mut self) -> Vec<RoomId> {
        std::mem::take(&mut self.typing)
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(room_id, _)| room_id)
            .collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.users.clear();
        self.typing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Agg = PresenceAggregator<Duration>;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn typing_true_is_idempotent() {
        let mut agg = Agg::new();
        assert!(agg.set_typing("r1", "u2", "Bea", true, ms(0)));
        assert!(!agg.set_typing("r1", "u2", "Bea", true, ms(100)));
        assert_eq!(agg.typing_in("r1").len(), 1);
    }

    #[test]
    fn typing_false_removes() {
        let mut agg = Agg::new();
        agg.set_typing("r1", "u2", "Bea", true, ms(0));
        assert!(agg.set_typing("r1", "u2", "Bea", false, ms(10)));
        assert!(agg.typing_in("r1").is_empty());
        assert!(!agg.set_typing("r1", "u2", "Bea", false, ms(20)));
    }

    #[test]
    fn insertion_order_and_cap() {
        let mut agg = Agg::new();
        for (i, name) in ["Ann", "Bo", "Cy", "Di", "Ed"].iter().enumerate() {
            agg.set_typing("r1", &format!("u{i}"), name, true, ms(0));
        }
        // Refresh does not reorder.
        agg.set_typing("r1", "u0", "Ann", true, ms(50));

        let summary = agg.summary("r1", DEFAULT_TYPING_DISPLAY_CAP);
        assert_eq!(summary.names, ["Ann", "Bo", "Cy"]);
        assert_eq!(summary.more, 2);
        assert_eq!(summary.to_string(), "Ann, Bo, Cy +2 more are typing");
    }

    #[test]
    fn summary_text() {
        let mut agg = Agg::new();
        assert_eq!(agg.summary("r1", 3).to_string(), "");
        agg.set_typing("r1", "u1", "Ann", true, ms(0));
        assert_eq!(agg.summary("r1", 3).to_string(), "Ann is typing");
        agg.set_typing("r1", "u2", "Bo", true, ms(0));
        assert_eq!(agg.summary("r1", 3).to_string(), "Ann, Bo are typing");
    }

    #[test]
    fn stale_entries_expire() {
        let mut agg = Agg::new();
        agg.set_typing("r1", "u1", "Ann", true, ms(0));
        agg.set_typing("r1", "u2", "Bo", true, ms(3_000));

        assert!(agg.expire(ms(5_000), DEFAULT_TYPING_EXPIRY).is_empty());
        assert_eq!(agg.expire(ms(5_001), DEFAULT_TYPING_EXPIRY), vec!["r1".to_string()]);
        assert_eq!(agg.typing_in("r1")[0].user_id, "u2");

        agg.expire(ms(8_001), DEFAULT_TYPING_EXPIRY);
        assert!(agg.typing_in("r1").is_empty());
    }

    #[test]
    fn refresh_postpones_expiry() {
        let mut agg = Agg::new();
        agg.set_typing("r1", "u1", "Ann", true, ms(0));
        agg.set_typing("r1", "u1", "Ann", true, ms(4_000));
        assert!(agg.expire(ms(6_000), DEFAULT_TYPING_EXPIRY).is_empty());
    }

    #[test]
    fn clearing_typing_keeps_directory() {
        let mut agg = Agg::new();
        agg.apply_user_list(vec![UserSummary {
            id: "u1".into(),
            display_name: "Ann".into(),
            avatar_ref: None,
            online: true,
            last_seen: None,
        }]);
        agg.set_typing("r1", "u1", "Ann", true, ms(0));
        agg.set_typing("r2", "u1", "Ann", true, ms(0));
        agg.set_typing("r2", "u1", "Ann", false, ms(5));

        assert_eq!(agg.clear_typing(), ["r1"]);
        assert!(agg.typing_in("r1").is_empty());
        assert!(agg.is_online("u1"));
        assert!(agg.clear_typing().is_empty());
    }

    #[test]
    fn presence_updates_directory() {
        let mut agg = Agg::new();
        agg.apply_user_list(vec![UserSummary {
            id: "u1".into(),
            display_name: "Ann".into(),
            avatar_ref: None,
            online: false,
            last_seen: None,
        }]);
        assert!(!agg.is_online("u1"));

        let seen = DateTime::<Utc>::default();
        assert!(agg.apply_presence(PresenceUpdate {
            user_id: "u1".into(),
            online: true,
            last_seen: Some(seen),
        }));
        assert!(agg.is_online("u1"));
        assert_eq!(agg.user("u1").unwrap().display_name, "Ann");

        // Same state again is not a change.
        assert!(!agg.apply_presence(PresenceUpdate {
            user_id: "u1".into(),
            online: true,
            last_seen: None,
        }));
        assert_eq!(agg.user("u1").unwrap().last_seen, Some(seen));
    }

    #[test]
    fn presence_for_unknown_user_is_recorded() {
        let mut agg = Agg::new();
        assert!(agg.apply_presence(PresenceUpdate {
            user_id: "u9".into(),
            online: true,
            last_seen: None,
        }));
        assert!(agg.is_online("u9"));
    }

    #[test]
    fn user_list_snapshot_replaces() {
        let mut agg = Agg::new();
        agg.apply_presence(PresenceUpdate { user_id: "old".into(), online: true, last_seen: None });
        agg.apply_user_list(vec![]);
        assert!(agg.user("old").is_none());
    }

    #[test]
    fn rename_moves_typing() {
        let mut agg = Agg::new();
        agg.set_typing("dm-a-b", "b", "Bo", true, ms(0));
        agg.rename_room("dm-a-b", "srv-1");
        assert_eq!(agg.typing_in("srv-1").len(), 1);
        assert!(agg.typing_in("dm-a-b").is_empty());
    }
}
