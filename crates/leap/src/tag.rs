//! Client-tag generation.
//!
//! Tags are opaque correlation identifiers carried in the message header.
//! The source is a collaborator so tests can mint deterministic tags.

use uuid::Uuid;

/// Mints the client tag for a request that was issued without one.
pub trait TagSource: Send + Sync {
    fn next_tag(&self) -> String;
}

/// Default source: random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidTags;

impl TagSource for UuidTags {
    fn next_tag(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_tags_are_unique() {
        let tags = UuidTags;
        assert_ne!(tags.next_tag(), tags.next_tag());
    }
}
