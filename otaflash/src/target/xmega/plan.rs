//! Page/chunk partitioning of a padded firmware image.
//!
//! The bootloader buffers one flash page at a time, filled by write-chunk
//! packets addressed by their byte offset within that page. A transfer plan
//! partitions the image into ordered pages, each into ordered chunks of at
//! most [`CHUNK_SIZE`](crate::protocol::wire::CHUNK_SIZE) bytes, and is
//! computed once per upload.

use crate::protocol::wire::CHUNK_SIZE;

/// Ordered page/chunk view over a padded image.
#[derive(Debug, Clone, Copy)]
pub struct TransferPlan<'a> {
    image: &'a [u8],
    page_size: usize,
}

impl<'a> TransferPlan<'a> {
    /// Create a plan for `image` with the given flash page size.
    pub fn new(image: &'a [u8], page_size: u16) -> Self {
        Self {
            image,
            page_size: usize::from(page_size.max(1)),
        }
    }

    /// Total image length in bytes.
    pub fn total_len(&self) -> usize {
        self.image.len()
    }

    /// Number of pages in the plan.
    pub fn page_count(&self) -> usize {
        self.image.len().div_ceil(self.page_size)
    }

    /// Iterate over the pages in transfer order.
    pub fn pages(&self) -> impl Iterator<Item = Page<'a>> + 'a {
        self.image.chunks(self.page_size).map(|data| Page { data })
    }
}

/// One flash page of the image.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    data: &'a [u8],
}

impl<'a> Page<'a> {
    /// Page length in bytes (full `page_size` except possibly the last).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the page is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over the page's chunks with their in-page byte offsets.
    #[allow(clippy::cast_possible_truncation)]
    pub fn chunks(&self) -> impl Iterator<Item = Chunk<'a>> + 'a {
        self.data.chunks(CHUNK_SIZE).enumerate().map(|(i, data)| {
            Chunk {
                // Safe cast: offsets stay within one flash page
                offset: (i * CHUNK_SIZE) as u16,
                data,
            }
        })
    }
}

/// One write-chunk unit.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Byte offset of this chunk within its page.
    pub offset: u16,
    /// Chunk data (at most `CHUNK_SIZE` bytes).
    pub data: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_partitioning() {
        let image = vec![0u8; 512];
        let plan = TransferPlan::new(&image, 256);
        assert_eq!(plan.page_count(), 2);
        assert!(plan.pages().all(|p| p.len() == 256));
    }

    #[test]
    fn test_partial_last_page() {
        let image = vec![0u8; 300];
        let plan = TransferPlan::new(&image, 256);
        let lens: Vec<usize> = plan.pages().map(|p| p.len()).collect();
        assert_eq!(lens, [256, 44]);
    }

    #[test]
    fn test_chunk_layout_of_256_byte_page() {
        // 256 = 8 * 29 + 24
        let image = vec![0u8; 256];
        let plan = TransferPlan::new(&image, 256);
        let page = plan.pages().next().unwrap();

        let chunks: Vec<(u16, usize)> = page.chunks().map(|c| (c.offset, c.data.len())).collect();
        assert_eq!(chunks.len(), 9);
        for (i, &(offset, len)) in chunks.iter().enumerate().take(8) {
            assert_eq!(offset, (i * 29) as u16);
            assert_eq!(len, 29);
        }
        assert_eq!(chunks[8], (232, 24));
    }

    #[test]
    fn test_chunk_offsets_restart_per_page() {
        let image = vec![0u8; 512];
        let plan = TransferPlan::new(&image, 256);
        for page in plan.pages() {
            assert_eq!(page.chunks().next().unwrap().offset, 0);
        }
    }

    #[test]
    fn test_concatenated_chunks_reproduce_image() {
        let image: Vec<u8> = (0..=255u8).cycle().take(777).collect();
        let plan = TransferPlan::new(&image, 256);

        let mut rebuilt = Vec::new();
        for page in plan.pages() {
            for chunk in page.chunks() {
                assert!(chunk.data.len() <= CHUNK_SIZE);
                rebuilt.extend_from_slice(chunk.data);
            }
        }
        assert_eq!(rebuilt, image);
    }

    #[test]
    fn test_empty_image() {
        let plan = TransferPlan::new(&[], 256);
        assert_eq!(plan.page_count(), 0);
        assert_eq!(plan.pages().count(), 0);
    }
}
