//! Display attributes for assignees: initials and a stable palette color.

use taskdeck_proto::task::{Assignee, IdentityId};

/// Fixed assignee palette (hex colors).
pub const PALETTE: [&str; 8] = [
    "#3B82F6", "#10B981", "#F59E0B", "#EF4444", "#8B5CF6", "#EC4899", "#14B8A6", "#F97316",
];

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Initials from the first letter of up to two words, upper-cased.
///
/// Returns `"U"` for an empty or whitespace-only name.
#[must_use]
pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    if letters.is_empty() {
        "U".to_string()
    } else {
        letters
    }
}

/// Palette color for a display name. FNV-1a over the UTF-8 bytes, so the
/// same name maps to the same color on every run and platform.
#[must_use]
pub fn color_for(name: &str) -> &'static str {
    let hash = name
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(FNV_PRIME));
    PALETTE[hash as usize % PALETTE.len()]
}

/// Builds an assignee with derived initials and color.
#[must_use]
pub fn decorate(identity: IdentityId, display_name: &str) -> Assignee {
    Assignee {
        identity,
        display_name: display_name.to_string(),
        initials: initials(display_name),
        color_tag: color_for(display_name).to_string(),
    }
}
