//! Key layout inside the shared store
//!
//! ```text
//! cache:seq:<seq>                   serialized LogEntry
//! cache:block:<channel>:<index>     serialized CacheBlock
//! cache:clock:<channel>             highest sequence recorded for a channel
//! cache:clock                       highest sequence recorded by any node
//! ```

const PREFIX: &str = "cache";

/// Key of the raw entry for a sequence
pub fn entry_key(seq: u64) -> String {
    format!("{PREFIX}:seq:{seq}")
}

/// Key of one channel block
pub fn block_key(channel: &str, block_index: u64) -> String {
    format!("{PREFIX}:block:{channel}:{block_index}")
}

/// Key of a channel's watermark
pub fn channel_clock_key(channel: &str) -> String {
    format!("{PREFIX}:clock:{channel}")
}

/// Key of the global watermark
pub fn global_clock_key() -> String {
    format!("{PREFIX}:clock")
}

/// Split a block key back into `(channel, block_index)`
///
/// Channel names may themselves contain `:`, so the index is taken from the
/// right.
pub fn parse_block_key(key: &str) -> Option<(&str, u64)> {
    let rest = key.strip_prefix(PREFIX)?.strip_prefix(":block:")?;
    let (channel, index) = rest.rsplit_once(':')?;
    Some((channel, index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(entry_key(10_010), "cache:seq:10010");
        assert_eq!(block_key("ABC", 1), "cache:block:ABC:1");
        assert_eq!(channel_clock_key("ABC"), "cache:clock:ABC");
        assert_eq!(global_clock_key(), "cache:clock");
    }

    #[test]
    fn test_parse_block_key() {
        assert_eq!(parse_block_key("cache:block:ABC:3"), Some(("ABC", 3)));
        assert_eq!(parse_block_key("cache:block:a:b:7"), Some(("a:b", 7)));
        assert_eq!(parse_block_key("cache:seq:7"), None);
        assert_eq!(parse_block_key("cache:block:ABC:x"), None);
    }
}
