use sha2::{Digest, Sha256};

/// Truncate to `max` characters, appending "..." when something was cut (Unicode-safe).
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep at most `max_words` whitespace-separated words.
pub fn truncate_words(s: &str, max_words: usize) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= max_words {
        return s.trim().to_string();
    }
    format!("{}...", words[..max_words].join(" "))
}

/// Keep the head and tail of long text so prompts stay bounded.
pub fn truncate_middle(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let head: String = content.chars().take(max_chars / 2).collect();
    let tail: String = content
        .chars()
        .rev()
        .take(max_chars / 2)
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    format!("{}\n\n... [truncated] ...\n\n{}", head, tail)
}

/// SHA-256 of `content`, hex encoded. Stable across processes and toolchains.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex_encode(&hasher.finalize())
}

pub fn hash_str(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
