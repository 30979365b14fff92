use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TAIL_LEN: usize = 10;

/// Mints a kind-prefixed opaque id, e.g. `post_k3v09qrx1m`.
///
/// Ten characters over a 36-symbol alphabet carry ~51.7 bits of entropy,
/// enough to make in-process collisions negligible. Root entities may use
/// caller-supplied ids instead; children always get minted ones.
pub fn mint(kind: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(kind.len() + 1 + TAIL_LEN);
    id.push_str(&kind.to_ascii_lowercase());
    id.push('_');
    for _ in 0..TAIL_LEN {
        id.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    id
}
