//! Property tests for the chunker

use proptest::prelude::*;
use ragmill::TextChunker;

proptest! {
    /// The chunker terminates on arbitrary input and every window fits the
    /// configured size
    #[test]
    fn windows_fit_and_loop_terminates(
        text in ".{0,400}",
        size in 2usize..64,
        overlap_seed in 0usize..100,
    ) {
        let overlap = overlap_seed % size;
        let chunker = TextChunker::new(size, overlap).unwrap();
        let chunks = chunker.split(&text);

        let total = text.chars().count();
        // Every iteration advances, so the chunk count is bounded by the input
        prop_assert!(chunks.len() <= total + 1);

        for chunk in &chunks {
            prop_assert!(chunk.end_char >= chunk.start_char);
            prop_assert!(chunk.end_char - chunk.start_char <= size);
            prop_assert!(chunk.end_char <= total);
        }
    }

    /// Chunk content is the trimmed window the offsets describe
    #[test]
    fn content_matches_window(
        text in "[ -~\\n]{0,300}",
        size in 4usize..48,
    ) {
        let chunker = TextChunker::new(size, size / 4).unwrap();
        let chars: Vec<char> = text.chars().collect();

        for chunk in chunker.split(&text) {
            let window: String = chars[chunk.start_char..chunk.end_char].iter().collect();
            prop_assert_eq!(chunk.content.as_str(), window.trim());
        }
    }

    /// Window starts strictly increase, so concatenation covers the input
    /// in order
    #[test]
    fn starts_are_strictly_increasing(
        text in ".{1,300}",
        size in 4usize..48,
    ) {
        let chunker = TextChunker::new(size, size / 3).unwrap();
        let chunks = chunker.split(&text);

        for pair in chunks.windows(2) {
            prop_assert!(pair[0].start_char < pair[1].start_char);
        }
    }
}

#[test]
fn empty_input_is_one_empty_chunk() {
    let chunker = TextChunker::default();
    let chunks = chunker.split("");
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.is_empty());
}
