//! # Envelope flags
//!
//! Module dedicated to envelope flags. The concept of flag is the
//! same as for any IMAP client: a tag attached to a message on the
//! server, mirrored into the local cache by the synchronizer.

use std::{
    collections::BTreeSet,
    fmt,
    ops::{Deref, DerefMut},
};

#[cfg(feature = "derive")]
use serde::{Deserialize, Serialize};

/// The envelope flag.
///
/// A flag is like a tag that can be attached to an envelope. The
/// well-known IMAP system flags have their own variant, everything
/// else ends up in [`Flag::Custom`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
#[cfg_attr(
    feature = "derive",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Flag {
    /// Flag used when the message has been opened.
    Seen,

    /// Flag used when the message has been answered.
    Answered,

    /// Flag used as a bookmark. The meaning is specific to the user:
    /// it could be important, starred, to check etc.
    Flagged,

    /// Flag used when the message is marked for deletion.
    Deleted,

    /// Flag used when the message is a draft and is therefore not
    /// complete.
    Draft,

    /// Flag used for all other use cases.
    Custom(String),
}

impl Flag {
    /// Creates a custom flag.
    pub fn custom(flag: impl ToString) -> Self {
        Self::Custom(flag.to_string())
    }
}

/// Parse a flag from a string. If the string does not match any of
/// the existing variants, it is considered as custom.
impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        match s.trim().trim_start_matches('\\') {
            seen if seen.eq_ignore_ascii_case("seen") => Flag::Seen,
            answered if answered.eq_ignore_ascii_case("answered") => Flag::Answered,
            flagged if flagged.eq_ignore_ascii_case("flagged") => Flag::Flagged,
            deleted if deleted.eq_ignore_ascii_case("deleted") => Flag::Deleted,
            draft if draft.eq_ignore_ascii_case("draft") => Flag::Draft,
            flag => Flag::Custom(flag.into()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Seen => write!(f, "seen"),
            Flag::Answered => write!(f, "answered"),
            Flag::Flagged => write!(f, "flagged"),
            Flag::Deleted => write!(f, "deleted"),
            Flag::Draft => write!(f, "draft"),
            Flag::Custom(flag) => write!(f, "{flag}"),
        }
    }
}

/// The set of envelope flags.
///
/// It uses a [`BTreeSet`] to prevent duplicates and to keep a stable
/// order when displayed.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "derive", derive(Serialize, Deserialize))]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    /// Checks the presence of the given flag in the set.
    pub fn has(&self, flag: &Flag) -> bool {
        self.0.contains(flag)
    }
}

impl Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        Flags(iter.into_iter().collect())
    }
}

impl IntoIterator for Flags {
    type Item = Flag;
    type IntoIter = <BTreeSet<Flag> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut glue = "";
        for flag in &self.0 {
            write!(f, "{glue}{flag}")?;
            glue = " ";
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Flag, Flags};

    #[test]
    fn parse_system_flags() {
        assert_eq!(Flag::from("\\Seen"), Flag::Seen);
        assert_eq!(Flag::from("answered"), Flag::Answered);
        assert_eq!(Flag::from("\\Deleted"), Flag::Deleted);
        assert_eq!(Flag::from("$Forwarded"), Flag::custom("$Forwarded"));
    }

    #[test]
    fn display_flags() {
        let flags = Flags::from_iter([Flag::Seen, Flag::Flagged, Flag::Seen]);
        assert_eq!(flags.to_string(), "seen flagged");
        assert_eq!(flags.len(), 2);
    }
}
