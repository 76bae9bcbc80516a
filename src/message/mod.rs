//! # Message
//!
//! Module dedicated to remote messages. A [`RemoteMessage`] is an
//! envelope whose structure and content get populated incrementally,
//! depending on the fetch profile the synchronizer asked for.

use crate::envelope::Envelope;

/// A remote message, as returned by a fetch.
///
/// Which fields are populated depends on the requested
/// [`FetchProfile`](crate::backend::FetchProfile): a flags fetch only
/// refreshes the envelope, a structure fetch adds the body structure,
/// a full or sane fetch adds the content.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteMessage {
    /// The envelope of the message.
    pub envelope: Envelope,

    /// The MIME structure of the message, when fetched.
    pub structure: Option<BodyStructure>,

    /// The raw content of the message, when fetched. May be truncated
    /// when the fetch was bounded by a maximum download size.
    pub content: Option<Vec<u8>>,
}

impl RemoteMessage {
    /// Shortcut to the server UID of the message.
    pub fn uid(&self) -> &str {
        &self.envelope.uid
    }
}

/// The MIME structure of a remote message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BodyStructure {
    /// A leaf part.
    Part(MessagePart),

    /// A multipart container.
    Multipart(Vec<BodyStructure>),
}

impl BodyStructure {
    /// Collects the text-bearing leaf parts of the structure, in
    /// order of appearance.
    ///
    /// Used by the synchronizer to download only the readable portion
    /// of messages exceeding the automatic download size.
    pub fn text_parts(&self) -> Vec<&MessagePart> {
        let mut parts = Vec::new();
        self.collect_text_parts(&mut parts);
        parts
    }

    fn collect_text_parts<'a>(&'a self, parts: &mut Vec<&'a MessagePart>) {
        match self {
            Self::Part(part) if part.media_type.starts_with("text/") => parts.push(part),
            Self::Part(_) => (),
            Self::Multipart(children) => {
                for child in children {
                    child.collect_text_parts(parts);
                }
            }
        }
    }
}

/// A leaf part of a message structure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessagePart {
    /// The part identifier, as understood by the remote folder when
    /// fetching individual parts.
    pub id: String,

    /// The MIME media type of the part.
    pub media_type: String,

    /// The size of the part, in bytes.
    pub size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: &str, media_type: &str) -> BodyStructure {
        BodyStructure::Part(MessagePart {
            id: id.into(),
            media_type: media_type.into(),
            size: 0,
        })
    }

    #[test]
    fn text_parts_are_collected_in_order() {
        let structure = BodyStructure::Multipart(vec![
            part("1", "text/plain"),
            BodyStructure::Multipart(vec![part("2.1", "image/png"), part("2.2", "text/html")]),
            part("3", "application/pdf"),
        ]);

        let ids: Vec<_> = structure.text_parts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["1", "2.2"]);
    }
}
