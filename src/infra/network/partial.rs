/// Leading bytes of every accepted document.
pub const DOCUMENT_MAGIC: &[u8] = b"%PDF-";
/// Smallest truncated payload worth handing to a parser.
pub const MIN_PARTIAL_BYTES: usize = 1024;
/// Smallest fraction of the declared length worth rendering.
pub const MIN_PARTIAL_RATIO: f64 = 0.1;

/// Decides whether a truncated payload is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDataPolicy {
    pub enabled: bool,
}

impl PartialDataPolicy {
    /// True only when partial rendering is enabled, the buffer starts with the
    /// document header, holds at least [`MIN_PARTIAL_BYTES`] and, when the
    /// total length is known, covers at least [`MIN_PARTIAL_RATIO`] of it.
    pub fn can_render(&self, buffer: &[u8], content_length: Option<u64>) -> bool {
        if !self.enabled {
            return false;
        }
        if !buffer.starts_with(DOCUMENT_MAGIC) {
            return false;
        }
        if buffer.len() < MIN_PARTIAL_BYTES {
            return false;
        }
        content_length.is_none_or(|total| buffer.len() as f64 / total as f64 >= MIN_PARTIAL_RATIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(len: usize) -> Vec<u8> {
        let mut buffer = DOCUMENT_MAGIC.to_vec();
        buffer.resize(len.max(DOCUMENT_MAGIC.len()), b'x');
        buffer.truncate(len);
        buffer
    }

    const ENABLED: PartialDataPolicy = PartialDataPolicy { enabled: true };

    #[test]
    fn half_of_a_document_with_header_is_renderable() {
        assert!(ENABLED.can_render(&document(2048), Some(4096)));
    }

    #[test]
    fn each_condition_is_required() {
        assert!(!PartialDataPolicy { enabled: false }.can_render(&document(2048), Some(4096)));
        assert!(!ENABLED.can_render(&document(1023), None));
        assert!(!ENABLED.can_render(&vec![b'x'; 4096], Some(8192)));
        assert!(!ENABLED.can_render(&document(1024), Some(10_241)));
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert!(ENABLED.can_render(&document(1024), None));
        assert!(ENABLED.can_render(&document(1024), Some(10_240)));
    }

    #[test]
    fn zero_declared_length_is_always_covered() {
        assert!(ENABLED.can_render(&document(1024), Some(0)));
        assert!(!ENABLED.can_render(&document(1023), Some(0)));
        assert!(!ENABLED.can_render(&vec![b'x'; 2048], Some(0)));
    }

    #[test]
    fn verdict_is_a_function_of_the_four_conditions() {
        for enabled in [false, true] {
            let policy = PartialDataPolicy { enabled };
            for len in [0_usize, 4, 5, 512, 1023, 1024, 2048, 4096] {
                for header in [false, true] {
                    for total in [None, Some(0_u64), Some(1024), Some(4096), Some(20_480), Some(65_536)] {
                        let buffer = if header {
                            document(len)
                        } else {
                            vec![b'x'; len]
                        };
                        let expected = enabled
                            && header
                            && len >= DOCUMENT_MAGIC.len()
                            && len >= MIN_PARTIAL_BYTES
                            && total.is_none_or(|t| len as f64 / t as f64 >= MIN_PARTIAL_RATIO);
                        assert_eq!(
                            policy.can_render(&buffer, total),
                            expected,
                            "enabled={enabled} len={len} header={header} total={total:?}"
                        );
                        assert_eq!(
                            policy.can_render(&buffer, total),
                            policy.can_render(&buffer, total)
                        );
                    }
                }
            }
        }
    }
}
