//! # Envelope
//!
//! Module dedicated to envelopes. An envelope is the lightweight
//! image of a remote message: its server UID, its flags, its size and
//! its effective date. It is all the synchronizer needs to decide
//! whether a message belongs to the fetch window and whether it still
//! needs to be downloaded.

pub mod flag;

use std::{
    cmp::Ordering,
    ops::{Deref, DerefMut},
};

use chrono::{DateTime, Utc};

#[doc(inline)]
pub use self::flag::{Flag, Flags};

/// The envelope of a remote message.
///
/// The server UID is kept as a string: most IMAP servers hand out
/// numeric UIDs, but the synchronizer treats them as opaque and only
/// compares them numerically when both sides actually parse.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Envelope {
    /// The server-assigned UID of the message.
    pub uid: String,

    /// The flags attached to the message on the server.
    pub flags: Flags,

    /// The size of the message, in bytes.
    pub size: u32,

    /// The effective date of the message.
    pub date: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Returns the UID as a number, when it parses as one.
    pub fn uid_number(&self) -> Option<u64> {
        self.uid.parse().ok()
    }

    /// Returns `true` when the message was already known at the time
    /// the given highest-seen UID was recorded.
    ///
    /// Non-numeric UIDs are never considered old.
    pub fn is_older_than(&self, highest_seen_uid: Option<u64>) -> bool {
        match (self.uid_number(), highest_seen_uid) {
            (Some(uid), Some(highest)) => uid <= highest,
            _ => false,
        }
    }
}

/// Wrapper around a list of envelopes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Envelopes(Vec<Envelope>);

impl Deref for Envelopes {
    type Target = Vec<Envelope>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Envelopes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Envelope> for Envelopes {
    fn from_iter<T: IntoIterator<Item = Envelope>>(iter: T) -> Self {
        Envelopes(iter.into_iter().collect())
    }
}

impl IntoIterator for Envelopes {
    type Item = Envelope;
    type IntoIter = <Vec<Envelope> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Compares two server UIDs, newest first.
///
/// Numeric UIDs sort in descending order. Non-numeric UIDs sort after
/// every numeric one, in no particular order between themselves.
pub fn cmp_uid_desc(left: &str, right: &str) -> Ordering {
    match (left.parse::<u64>(), right.parse::<u64>()) {
        (Ok(left), Ok(right)) => right.cmp(&left),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_sort_newest_first() {
        let mut uids = vec!["12", "no-uid", "102", "3"];
        uids.sort_by(|left, right| cmp_uid_desc(left, right));
        assert_eq!(uids, ["102", "12", "3", "no-uid"]);
    }

    #[test]
    fn old_message_detection() {
        let envelope = Envelope {
            uid: "41".into(),
            ..Default::default()
        };

        assert!(envelope.is_older_than(Some(42)));
        assert!(envelope.is_older_than(Some(41)));
        assert!(!envelope.is_older_than(Some(40)));
        assert!(!envelope.is_older_than(None));

        let envelope = Envelope {
            uid: "local-draft".into(),
            ..Default::default()
        };

        assert!(!envelope.is_older_than(Some(42)));
    }
}
