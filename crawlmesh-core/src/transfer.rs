//! Chunk sizing for streamed bundle transfers

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// Largest chunk used for any transfer
pub const MAX_CHUNK: usize = MB as usize;

/// Picks the read size for streaming a payload of `total` bytes
///
/// Small payloads go in one piece, larger ones are split into a bounded
/// number of chunks, and anything past 100 MB uses fixed 1 MiB chunks.
pub fn chunk_size(total: u64) -> usize {
    let size = if total < 10 * KB {
        total
    } else if total < MB {
        total / 10
    } else if total < 10 * MB {
        total / 20
    } else if total < 100 * MB {
        total / 50
    } else {
        MB
    };

    size.clamp(1, MB) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_is_sent_whole() {
        assert_eq!(chunk_size(5 * KB), 5 * 1024);
    }

    #[test]
    fn test_empty_payload_still_has_a_chunk() {
        assert_eq!(chunk_size(0), 1);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(chunk_size(500 * KB), (500 * KB / 10) as usize);
        assert_eq!(chunk_size(5 * MB), (5 * MB / 20) as usize);
        assert_eq!(chunk_size(50 * MB), MAX_CHUNK);
        assert_eq!(chunk_size(20 * MB), (20 * MB / 50) as usize);
        assert_eq!(chunk_size(2048 * MB), MAX_CHUNK);
    }
}
