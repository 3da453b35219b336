//! Channel name utilities.
//!
//! # Reference
//! - RFC 2812 Section 1.3: Channel names

/// Extension trait for checking if a string looks like an IRC channel name.
pub trait ChannelExt {
    /// Check if this string is a channel name.
    ///
    /// Channel names start with '#', '&', '+', or '!' and contain no space,
    /// comma, BEL or NUL.
    fn is_channel_name(&self) -> bool;
}

impl ChannelExt for str {
    fn is_channel_name(&self) -> bool {
        let mut chars = self.chars();
        match chars.next() {
            Some('#' | '&' | '+' | '!') => {}
            _ => return false,
        }
        chars.all(|c| c != ' ' && c != ',' && c != '\x07' && c != '\0')
    }
}

impl ChannelExt for String {
    fn is_channel_name(&self) -> bool {
        self.as_str().is_channel_name()
    }
}
