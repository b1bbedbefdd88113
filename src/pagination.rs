pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Visible prefix of a cached sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page_size: usize,
    visible: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            visible: page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn visible_count(&self) -> usize {
        self.visible
    }

    pub fn reset(&mut self) {
        self.visible = self.page_size;
    }

    /// Grows the window by one page; the slice caps itself at what is cached.
    pub fn load_more(&mut self) {
        self.visible = self.visible.saturating_add(self.page_size);
    }

    pub fn visible_slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[..self.visible.min(items.len())]
    }

    pub fn has_more(&self, len: usize) -> bool {
        self.visible < len
    }
}
