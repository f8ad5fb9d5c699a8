use std::fmt::Write;

use state::BannedIds;

use crate::ProductVariant;

pub const ALERT_HEADER: &str = "**Found Amazing Deals**";

/// Renders minor units as `units.cents`.
pub fn format_price(minor: u64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}

/// Escapes the characters that open entities in Telegram's legacy Markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn push_entry(out: &mut String, item: &ProductVariant) {
    let _ = write!(
        out,
        "**ID**:\t`{}`\n**Price**:\t{}\n**Name**:\t{}\n\n",
        item.id,
        format_price(item.price),
        escape_markdown(&item.name)
    );
}

/// Full listing of the available items followed by the ban-list.
pub fn format_listing(items: &[ProductVariant], banned: &BannedIds) -> String {
    let mut out = String::new();
    if items.is_empty() {
        out.push_str("No products available.\n\n");
    }
    for item in items {
        push_entry(&mut out, item);
    }
    if !banned.is_empty() {
        out.push_str("Banned Products:\n");
        for id in banned.iter() {
            let _ = writeln!(out, "ID: `{id}`");
        }
    }
    out
}

/// Alert for the given deals, or `None` when there are none.
pub fn format_alert(deals: &[&ProductVariant], link: &str) -> Option<String> {
    if deals.is_empty() {
        return None;
    }
    let mut out = format!("{ALERT_HEADER}\n\n");
    for item in deals {
        push_entry(&mut out, item);
    }
    let _ = write!(out, "Check Link: [Link]({link})");
    Some(out)
}

/// Splits `text` into parts of at most `limit` characters, preferring
/// blank-line boundaries between entries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for piece in text.split_inclusive("\n\n") {
        let piece_len = piece.chars().count();
        if current_len + piece_len > limit && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if piece_len <= limit {
            current.push_str(piece);
            current_len += piece_len;
            continue;
        }
        for ch in piece.chars() {
            if current_len == limit {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += 1;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, price: u64, name: &str) -> ProductVariant {
        ProductVariant {
            id,
            price,
            name: name.to_string(),
        }
    }

    #[test]
    fn prices_render_with_cents() {
        assert_eq!(format_price(1000), "10.00");
        assert_eq!(format_price(52905), "529.05");
        assert_eq!(format_price(7), "0.07");
    }

    #[test]
    fn listing_includes_items_and_ban_list() {
        let banned: BannedIds = [9, 4].into_iter().collect();
        let listing = format_listing(&[item(1, 1000, "MacBook Air")], &banned);
        assert_eq!(
            listing,
            "**ID**:\t`1`\n**Price**:\t10.00\n**Name**:\tMacBook Air\n\n\
             Banned Products:\nID: `4`\nID: `9`\n"
        );
    }

    #[test]
    fn names_with_markdown_characters_are_escaped() {
        assert_eq!(escape_markdown("Mac_Book *Pro* `16` [2019]"), "Mac\\_Book \\*Pro\\* \\`16\\` \\[2019]");
        let a = item(7, 2500, "Air_M1*");
        let alert = format_alert(&[&a], "https://shop.example/c").expect("alert");
        assert!(alert.contains("**Name**:\tAir\\_M1\\*\n"));
    }

    #[test]
    fn empty_listing_is_still_sendable() {
        let listing = format_listing(&[], &BannedIds::new());
        assert!(!listing.is_empty());
    }

    #[test]
    fn alert_has_header_entries_and_link() {
        let a = item(1, 1000, "MacBook Air");
        let alert = format_alert(&[&a], "https://shop.example/c").expect("alert");
        assert!(alert.starts_with("**Found Amazing Deals**\n\n**ID**:\t`1`"));
        assert!(alert.ends_with("Check Link: [Link](https://shop.example/c)"));
        assert!(format_alert(&[], "https://shop.example/c").is_none());
    }

    #[test]
    fn split_keeps_entries_whole() {
        let text = "aaaa\n\nbbbb\n\ncccc\n\n";
        assert_eq!(
            split_message(text, 12),
            vec!["aaaa\n\nbbbb\n\n".to_string(), "cccc\n\n".to_string()]
        );
        assert_eq!(split_message("short", 4096), vec!["short".to_string()]);
    }

    #[test]
    fn split_hard_wraps_oversized_entries() {
        let parts = split_message("abcdefghij", 4);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
        assert!(split_message("", 10).is_empty());
    }
}
