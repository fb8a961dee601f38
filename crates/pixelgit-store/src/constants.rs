/// Attachment ceiling in bytes of encoded payload (4 MiB)
pub const MAX_ATTACHMENT_BYTES: usize = 4 * 1024 * 1024;

/// Longest text preview cached on a chat, in characters
pub const MAX_SUMMARY_CHARS: usize = 120;

/// Avatar assigned when registration does not supply one
pub const DEFAULT_AVATAR: &str = "https://api.dicebear.com/7.x/identicon/svg?seed=default&scale=80";
