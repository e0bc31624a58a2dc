//! Team identifier and join code generation.

use rand::Rng;

use taskdeck_proto::team::{JOIN_CODE_ALPHABET, JOIN_CODE_LEN, TeamId};

/// Characters of a generated team identifier.
pub const TEAM_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a generated team identifier.
pub const TEAM_ID_LEN: usize = 8;

/// Draws before giving up on finding an unused value.
pub const MAX_ATTEMPTS: usize = 64;

fn draw<R: Rng>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())]))
        .collect()
}

/// A team identifier not rejected by `taken`, or `None` after
/// [`MAX_ATTEMPTS`] collisions.
pub fn team_id<R: Rng>(rng: &mut R, taken: impl Fn(&TeamId) -> bool) -> Option<TeamId> {
    (0..MAX_ATTEMPTS)
        .map(|_| TeamId::new(draw(rng, TEAM_ID_ALPHABET, TEAM_ID_LEN)))
        .find(|id| !taken(id))
}

/// A join code not rejected by `taken`, or `None` after [`MAX_ATTEMPTS`]
/// collisions.
pub fn join_code<R: Rng>(rng: &mut R, taken: impl Fn(&str) -> bool) -> Option<String> {
    (0..MAX_ATTEMPTS)
        .map(|_| draw(rng, JOIN_CODE_ALPHABET, JOIN_CODE_LEN))
        .find(|code| !taken(code))
}
