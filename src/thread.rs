//! Subject-based thread grouping
//!
//! Threads are derived, never stored: every call regroups a freshly fetched
//! message set. Two messages belong to the same thread exactly when their
//! [`thread_key`]s are equal, so unrelated conversations that reuse a subject
//! line are merged and a reply that edits the subject starts a new thread.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fetcher::{FolderMessage, Message};

/// Display subject for messages without one
pub const NO_SUBJECT: &str = "No Subject";

/// A conversation reconstructed from subject equality
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub key: String,
    /// Subject of the earliest member
    pub subject: String,
    /// Timestamp of the newest member
    pub latest_activity: DateTime<Utc>,
    /// Members, oldest first
    pub messages: Vec<FolderMessage>,
}

impl Thread {
    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.message.is_seen()).count()
    }
}

/// One search hit per thread key across every searched folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub key: String,
    pub subject: String,
    /// Folder the latest matching message came from
    pub folder: String,
    pub latest: Message,
    pub latest_activity: DateTime<Utc>,
}

/// A correspondent seen in sender or recipient headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

fn display_subject(subject: &str) -> &str {
    if subject.trim().is_empty() {
        NO_SUBJECT
    } else {
        subject
    }
}

/// Grouping key of a subject: lower-cased and trimmed, blank subjects
/// collapse to the key of [`NO_SUBJECT`]
pub fn thread_key(subject: &str) -> String {
    display_subject(subject).trim().to_lowercase()
}

/// Whether `message` contains `query` in its subject, body, sender or any
/// recipient, ignoring case
///
/// `query` must already be lower-cased.
pub fn matches_query(message: &Message, query: &str) -> bool {
    message.subject.to_lowercase().contains(query)
        || message.body.to_lowercase().contains(query)
        || message.from.to_lowercase().contains(query)
        || message.to.iter().any(|to| to.to_lowercase().contains(query))
}

/// Partition `messages` into threads, most recently active first
///
/// Members are sorted oldest first; messages with equal timestamps keep
/// their input order. Threads with equal activity are ordered by key.
pub fn group(messages: Vec<FolderMessage>) -> Vec<Thread> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<FolderMessage>> = HashMap::new();

    for message in messages {
        let key = thread_key(&message.message.subject);
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(message);
    }

    let mut threads: Vec<Thread> = order
        .into_iter()
        .filter_map(|key| {
            let members = buckets.remove(&key)?;
            build_thread(key, members)
        })
        .collect();

    threads.sort_by(|a, b| {
        b.latest_activity
            .cmp(&a.latest_activity)
            .then_with(|| a.key.cmp(&b.key))
    });
    threads
}

fn build_thread(key: String, mut members: Vec<FolderMessage>) -> Option<Thread> {
    members.sort_by_key(|m| m.message.date);
    let subject = display_subject(&members.first()?.message.subject).to_owned();
    let latest_activity = members.iter().map(|m| m.message.date).max()?;
    Some(Thread {
        key,
        subject,
        latest_activity,
        messages: members,
    })
}

/// Filter by `query`, then keep the single latest match per thread key
///
/// A blank query matches nothing. When two matches share a key and a
/// timestamp, the one seen first is kept.
pub fn group_for_search(messages: Vec<FolderMessage>, query: &str) -> Vec<SearchResult> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let query = query.to_lowercase();

    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, SearchResult> = HashMap::new();

    for FolderMessage { folder, message } in messages {
        if !matches_query(&message, &query) {
            continue;
        }
        let key = thread_key(&message.subject);
        match best.get_mut(&key) {
            Some(current) => {
                if message.date > current.latest_activity {
                    current.latest_activity = message.date;
                    current.folder = folder;
                    current.latest = message;
                }
            }
            None => {
                order.push(key.clone());
                best.insert(
                    key.clone(),
                    SearchResult {
                        key,
                        subject: display_subject(&message.subject).to_owned(),
                        folder,
                        latest_activity: message.date,
                        latest: message,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|key| best.remove(&key))
        .collect();
    results.sort_by(|a, b| {
        b.latest_activity
            .cmp(&a.latest_activity)
            .then_with(|| a.key.cmp(&b.key))
    });
    results
}

/// The thread whose key equals `key` after normalization
pub fn find_thread(messages: Vec<FolderMessage>, key: &str) -> Option<Thread> {
    let wanted = key.trim().to_lowercase();
    let members: Vec<FolderMessage> = messages
        .into_iter()
        .filter(|m| thread_key(&m.message.subject) == wanted)
        .collect();
    build_thread(wanted, members)
}

/// Distinct sender and recipient addresses in first-seen order
///
/// Names are guessed from the local part: `jane.q.doe@x` becomes first name
/// `jane`, last name `q doe`.
pub fn collect_contacts(messages: &[FolderMessage]) -> Vec<Contact> {
    let mut seen = HashSet::new();
    let mut contacts = Vec::new();

    let addresses = messages.iter().flat_map(|m| {
        std::iter::once(&m.message.from).chain(m.message.to.iter())
    });
    for address in addresses {
        let address = address.trim();
        if address.is_empty() || !seen.insert(address.to_lowercase()) {
            continue;
        }
        let local = address.split('@').next().unwrap_or_default();
        let mut parts = local.split('.');
        let first_name = parts.next().unwrap_or_default().to_owned();
        let last_name = parts.collect::<Vec<_>>().join(" ");
        contacts.push(Contact {
            email: address.to_owned(),
            first_name,
            last_name,
        });
    }
    contacts
}
