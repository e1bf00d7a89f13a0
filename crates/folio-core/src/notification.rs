//! Notification records and the deduplicated cache set.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

/// Authenticated user identifier, as issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Unique notification identifier (primary key in the remote store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    /// Wrap a raw notification identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Client-side copy of a notification row.
///
/// The remote store owns the record. Everything except `id`, `read` and
/// `created_at` is opaque to the subscription manager and travels in
/// `payload` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier.
    pub id: NotificationId,
    /// Whether the user has read this notification.
    #[serde(default, rename = "is_read")]
    pub read: bool,
    /// Creation time in unix milliseconds.
    pub created_at: u64,
    /// Opaque remaining fields (title, message, order reference, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Notification {
    /// Create an unread notification with an empty payload.
    pub fn new(id: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: NotificationId::new(id),
            read: false,
            created_at,
            payload: serde_json::Value::Null,
        }
    }

    /// Set the read flag.
    #[must_use]
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Set the opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Remove duplicate ids from `list`, keeping the first occurrence of each.
pub fn dedup_by_id(list: Vec<Notification>) -> Vec<Notification> {
    let mut seen = HashSet::with_capacity(list.len());
    list.into_iter().filter(|n| seen.insert(n.id.clone())).collect()
}

/// Ordered notification collection with unique ids.
///
/// Construction always deduplicates, so no two entries ever share an id.
/// The set is replaced wholesale on update and never patched in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSet {
    entries: Vec<Notification>,
}

impl NotificationSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a fetched list. First occurrence of an id wins.
    pub fn from_list(list: Vec<Notification>) -> Self {
        Self { entries: dedup_by_id(list) }
    }

    /// Entries in list order.
    pub fn as_slice(&self) -> &[Notification] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with the read flag unset.
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    /// The id set, ignoring order.
    pub fn ids(&self) -> HashSet<NotificationId> {
        self.entries.iter().map(|n| n.id.clone()).collect()
    }

    /// Consume the set, returning the entries.
    pub fn into_vec(self) -> Vec<Notification> {
        self.entries
    }

    /// Keep only the `keep` most recent entries by `created_at`.
    ///
    /// Entries with equal timestamps are ranked by list position. Survivors
    /// keep their relative order.
    pub fn retain_most_recent(&mut self, keep: usize) {
        if self.entries.len() <= keep {
            return;
        }

        let mut ranked: Vec<(usize, u64)> =
            self.entries.iter().enumerate().map(|(i, n)| (i, n.created_at)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut kept = vec![false; self.entries.len()];
        for (index, _) in ranked.into_iter().take(keep) {
            kept[index] = true;
        }

        let mut position = 0;
        self.entries.retain(|_| {
            let keep_entry = kept[position];
            position += 1;
            keep_entry
        });
    }
}
