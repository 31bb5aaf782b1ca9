use rand::{thread_rng, Rng};

const TOKEN_ALPHABET: &[u8] = b"0123456789abcdef";

/// Random lowercase hex token of `len` characters.
pub fn generate_token(len: usize) -> String {
    let mut rng = thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
            TOKEN_ALPHABET[idx] as char
        })
        .collect()
}
