//! # Synchronization report
//!
//! Module dedicated to the report returned by a synchronization
//! pass.

/// The report of one synchronization pass.
///
/// A failed pass does not error out: the failure is recorded here and
/// in the folder status, and the previous local content is left
/// intact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    /// Number of downloaded messages that were unseen and not
    /// previously cached.
    pub new_messages: usize,

    /// Number of local messages destroyed by deletion propagation.
    pub removed_messages: usize,

    /// Number of cached messages whose flags actually changed.
    pub changed_flags: usize,

    /// The root-cause message of the failure, when the pass failed.
    pub failure: Option<String>,
}
