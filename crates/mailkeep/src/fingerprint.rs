//! Message fingerprinting for deduplication.
//!
//! The fingerprint is a SHA-256 digest over the pipe-joined concatenation of
//! five header fields in a fixed order: subject, sender, recipients, the raw
//! Date header, and the Message-ID. The fields are used exactly as captured
//! by the decoder, untrimmed. Two structurally distinct messages that share
//! all five fields collapse to one archived copy; that is the intended
//! trade-off, not a defect.

use sha2::{Digest, Sha256};

/// Computes the dedup fingerprint for a message.
pub fn fingerprint(
    subject: &str,
    sender: &str,
    recipients: &str,
    raw_date: &str,
    message_id: &str,
) -> String {
    let data = format!(
        "{}|{}|{}|{}|{}",
        subject, sender, recipients, raw_date, message_id
    );
    let digest = Sha256::digest(data.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = fingerprint("Hi", "a@x.com", "b@y.com", "Mon, 1 Jan 2024 00:00:00 +0000", "<1@x>");
        let b = fingerprint("Hi", "a@x.com", "b@y.com", "Mon, 1 Jan 2024 00:00:00 +0000", "<1@x>");
        assert_eq!(a, b);
    }

    #[test]
    fn test_field_order_matters() {
        let a = fingerprint("s", "f", "t", "d", "m");
        let b = fingerprint("f", "s", "t", "d", "m");
        assert_ne!(a, b);
    }

    #[test]
    fn test_any_field_change_changes_digest() {
        let base = fingerprint("s", "f", "t", "d", "m");
        assert_ne!(base, fingerprint("s2", "f", "t", "d", "m"));
        assert_ne!(base, fingerprint("s", "f2", "t", "d", "m"));
        assert_ne!(base, fingerprint("s", "f", "t2", "d", "m"));
        assert_ne!(base, fingerprint("s", "f", "t", "d2", "m"));
        assert_ne!(base, fingerprint("s", "f", "t", "d", "m2"));
    }

    #[test]
    fn test_untrimmed_fields() {
        // Whitespace is significant; the caller passes fields verbatim.
        assert_ne!(
            fingerprint(" s", "f", "t", "d", "m"),
            fingerprint("s", "f", "t", "d", "m")
        );
    }

    #[test]
    fn test_known_digest_shape() {
        let digest = fingerprint("", "", "", "", "");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
