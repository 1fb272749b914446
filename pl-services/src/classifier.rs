//! Content classification.
//!
//! Classification reads only the message row and is deterministic, so its
//! result can be memoized permanently (see [`crate::category_cache`]).

use lazy_static::lazy_static;
use regex::Regex;

use pl_models::{Message, MessageCategory, MessageKind};

lazy_static! {
    static ref LINK_PATTERN: Regex =
        Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>]+").expect("valid link regex");
}

/// GIF file signatures.
const GIF_SIGNATURES: [&[u8]; 2] = [b"GIF87a", b"GIF89a"];

/// Maps a message to its category bits. Must be pure.
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, message: &Message) -> MessageCategory;
}

/// Classifier used unless a caller supplies its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl DefaultClassifier {
    fn is_gif(message: &Message) -> bool {
        let mime_says_gif = message
            .mime_type
            .as_deref()
            .is_some_and(|mime| mime.eq_ignore_ascii_case("image/gif"));
        let data_says_gif = message
            .asset_data
            .as_deref()
            .is_some_and(|data| GIF_SIGNATURES.iter().any(|sig| data.starts_with(sig)));
        mime_says_gif || data_says_gif
    }

    fn media_bits(mime: Option<&str>) -> MessageCategory {
        match mime.map(str::to_ascii_lowercase) {
            Some(m) if m.starts_with("audio/") => MessageCategory::AUDIO,
            Some(m) if m.starts_with("video/") => MessageCategory::VIDEO,
            _ => MessageCategory::NONE,
        }
    }
}

impl ContentClassifier for DefaultClassifier {
    fn classify(&self, message: &Message) -> MessageCategory {
        let mut category = match message.kind {
            MessageKind::Text => {
                let mut c = MessageCategory::TEXT;
                if message
                    .text
                    .as_deref()
                    .is_some_and(|text| LINK_PATTERN.is_match(text))
                {
                    c |= MessageCategory::LINK;
                }
                c
            }
            MessageKind::Image => {
                let mut c = MessageCategory::IMAGE;
                if Self::is_gif(message) {
                    c |= MessageCategory::GIF;
                }
                c
            }
            MessageKind::File => {
                MessageCategory::FILE | Self::media_bits(message.mime_type.as_deref())
            }
            MessageKind::Location => MessageCategory::LOCATION,
            MessageKind::Knock => MessageCategory::KNOCK,
            MessageKind::System => MessageCategory::SYSTEM_MESSAGE,
        };

        if message.is_ephemeral || message.is_obfuscated || message.has_been_deleted() {
            category |= MessageCategory::EXCLUDED_FROM_COLLECTION;
        }
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &Message) -> MessageCategory {
        DefaultClassifier.classify(message)
    }

    #[test]
    fn test_text_and_links() {
        assert_eq!(classify(&Message::text(1, "hello")), MessageCategory::TEXT);
        assert_eq!(
            classify(&Message::text(1, "see https://example.com/x")),
            MessageCategory::TEXT | MessageCategory::LINK
        );
        assert_eq!(
            classify(&Message::text(1, "www.example.org")),
            MessageCategory::TEXT | MessageCategory::LINK
        );
    }

    #[test]
    fn test_gif_by_mime_or_signature() {
        let by_mime = Message::image(1, vec![0, 1, 2], "image/gif");
        let by_bytes = Message::image(1, b"GIF89a\x01\x00".to_vec(), "application/octet-stream");
        let png = Message::image(1, b"\x89PNG".to_vec(), "image/png");

        let gif = MessageCategory::IMAGE | MessageCategory::GIF;
        assert_eq!(classify(&by_mime), gif);
        assert_eq!(classify(&by_bytes), gif);
        assert_eq!(classify(&png), MessageCategory::IMAGE);
    }

    #[test]
    fn test_files_by_mime() {
        assert_eq!(
            classify(&Message::file(1, vec![], "audio/mpeg")),
            MessageCategory::FILE | MessageCategory::AUDIO
        );
        assert_eq!(
            classify(&Message::file(1, vec![], "Video/MP4")),
            MessageCategory::FILE | MessageCategory::VIDEO
        );
        assert_eq!(
            classify(&Message::file(1, vec![], "application/pdf")),
            MessageCategory::FILE
        );
    }

    #[test]
    fn test_ephemeral_is_excluded() {
        let msg = Message::text(1, "secret").with_destruction_timeout(std::time::Duration::from_secs(5));
        assert!(classify(&msg).contains(MessageCategory::EXCLUDED_FROM_COLLECTION));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let msg = Message::image(1, b"GIF87a".to_vec(), "image/gif");
        assert_eq!(classify(&msg), classify(&msg.clone()));
    }
}
