use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;

/// Generate an opaque credential token: `length` characters drawn uniformly
/// from the 62-symbol alphanumeric alphabet. `thread_rng` is a CSPRNG, which
/// is all the threat model here asks for.
pub fn generate_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a numeric challenge code of `length` digits. The receiver shows
/// this to a human who reads it to the sender out-of-band.
pub fn generate_challenge_code(length: usize) -> String {
    let digits = Uniform::from(0..10u8);
    rand::thread_rng()
        .sample_iter(&digits)
        .take(length)
        .map(|digit| char::from(b'0' + digit))
        .collect()
}
