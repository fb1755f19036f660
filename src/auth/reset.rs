use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};

/// Raw entropy behind a reset token, before encoding.
pub const TOKEN_BYTES: usize = 32;

/// Length of the code handed back to the requester.
pub const CODE_LEN: usize = 8;

/// Fresh URL-safe reset token drawn from the OS CSPRNG.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// The part of `token` the requester gets to see.
pub fn display_code(token: &str) -> &str {
    // the alphabet is ASCII, so a byte index is a char boundary
    &token[..CODE_LEN.min(token.len())]
}

/// Only codes of the displayed length are looked up; anything shorter would
/// match many tokens at once.
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe_and_full_length() {
        let token = generate_reset_token();
        // 32 bytes, unpadded base64
        assert_eq!(token.len(), 43);
        assert!(token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn tokens_do_not_repeat() {
        assert_ne!(generate_reset_token(), generate_reset_token());
    }

    #[test]
    fn display_code_is_a_prefix() {
        let token = generate_reset_token();
        let code = display_code(&token);
        assert_eq!(code.len(), CODE_LEN);
        assert!(token.starts_with(code));
        assert!(is_well_formed_code(code));
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert!(!is_well_formed_code(""));
        assert!(!is_well_formed_code("abc"));
        assert!(!is_well_formed_code("abcdefg%"));
        assert!(!is_well_formed_code("abcdefghi"));
    }
}
