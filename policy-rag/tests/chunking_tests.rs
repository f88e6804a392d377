//! Property tests for lossless chunking and neighbor stitching.

use policy_rag::{Chunker, FixedSizeChunker, rejoin, stitch};
use proptest::prelude::*;

/// Settings with `overlap < size`.
fn arb_settings() -> impl Strategy<Value = (usize, usize)> {
    (1usize..64).prop_flat_map(|size| (Just(size), 0..size))
}

/// Mixed ASCII, accented, and multi-byte text.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-zA-Z0-9 .,\\n₹éü€中文🙂]{0,400}").unwrap()
}

mod prop_chunk_rejoin {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn rejoining_spans_reproduces_text((size, overlap) in arb_settings(), text in arb_text()) {
            let chunker = FixedSizeChunker::new(size, overlap);
            let spans = chunker.chunk(&text);
            prop_assert_eq!(rejoin(&spans, chunker.overlap()), text);
        }

        #[test]
        fn spans_respect_size_and_overlap((size, overlap) in arb_settings(), text in arb_text()) {
            let spans = FixedSizeChunker::new(size, overlap).chunk(&text);
            let char_len = text.chars().count();

            if char_len == 0 {
                prop_assert!(spans.is_empty());
            } else if char_len <= size {
                prop_assert_eq!(spans.len(), 1);
            }

            for span in &spans {
                prop_assert!(span.text.chars().count() <= size);
            }
            for pair in spans.windows(2) {
                prop_assert_eq!(pair[0].char_end() - pair[1].char_start, overlap);
                let tail: String = pair[0].text.chars().skip(pair[0].text.chars().count() - overlap).collect();
                let head: String = pair[1].text.chars().take(overlap).collect();
                prop_assert_eq!(tail, head);
            }
            if let Some(last) = spans.last() {
                prop_assert_eq!(last.char_end(), char_len);
            }
        }

        #[test]
        fn stitching_all_spans_reproduces_text((size, overlap) in arb_settings(), text in arb_text()) {
            let spans = FixedSizeChunker::new(size, overlap).chunk(&text);
            let stitched = stitch(spans.iter().map(|s| (s.char_start, s.text.as_str())));
            prop_assert_eq!(stitched, text);
        }
    }
}

#[test]
fn overlap_at_chunk_boundary_of_real_policy_text() {
    let text = "Savings account holders must maintain an average monthly balance. \
                Non-maintenance attracts charges as per the schedule of charges.";
    let chunker = FixedSizeChunker::new(40, 10);
    let spans = chunker.chunk(text);
    assert!(spans.len() > 2);
    assert_eq!(rejoin(&spans, 10), text);
    assert_eq!(spans[1].char_start, 30);
}
