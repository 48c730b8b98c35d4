use thiserror::Error;

/// Bytes per identifier slot, including the terminating zero.
pub const SLOT_SIZE: usize = 64;
/// Slots per lazily allocated page.
pub const PAGE_SLOTS: usize = 256;
/// Default cap on the number of identifiers one compilation may allocate.
pub const DEFAULT_MAX_STRINGS: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("identifier pool exhausted ({capacity} identifiers)")]
    Exhausted { capacity: usize },

    #[error("identifier is {len} bytes long, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Handle to an identifier stored in an [`IddStrPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Idd(u32);

impl Idd {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

type Page = Box<[[u8; SLOT_SIZE]; PAGE_SLOTS]>;

/// Slab storage for the identifiers of one compilation.
///
/// Identifiers are copied into fixed-size slots; pages of slots are only
/// allocated once the running count crosses a page boundary. Nothing is
/// released individually: `clear` drops everything at once.
pub struct IddStrPool {
    pages: Vec<Page>,
    count: usize,
    max_strings: usize,
}

impl Default for IddStrPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IddStrPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STRINGS)
    }

    pub fn with_capacity(max_strings: usize) -> Self {
        IddStrPool {
            pages: Vec::new(),
            count: 0,
            max_strings,
        }
    }

    /// Copies `text` into a fresh slot and returns its handle.
    pub fn allocate_string(&mut self, text: &str) -> Result<Idd, PoolError> {
        let max = SLOT_SIZE - 1;
        if text.len() > max {
            return Err(PoolError::TooLong {
                len: text.len(),
                max,
            });
        }
        if self.count >= self.max_strings {
            return Err(PoolError::Exhausted {
                capacity: self.max_strings,
            });
        }

        let page = self.count / PAGE_SLOTS;
        let slot = self.count % PAGE_SLOTS;
        if page == self.pages.len() {
            self.pages.push(Box::new([[0u8; SLOT_SIZE]; PAGE_SLOTS]));
        }

        let dest = &mut self.pages[page][slot];
        dest[..text.len()].copy_from_slice(text.as_bytes());
        dest[text.len()] = 0;

        let idd = Idd(self.count as u32);
        self.count += 1;
        Ok(idd)
    }

    /// Returns the text behind a handle. Handles from a cleared pool read as "".
    pub fn get(&self, idd: Idd) -> &str {
        let index = idd.index();
        if index >= self.count {
            return "";
        }
        let slot = &self.pages[index / PAGE_SLOTS][index % PAGE_SLOTS];
        let len = slot.iter().position(|&b| b == 0).unwrap_or(SLOT_SIZE);
        std::str::from_utf8(&slot[..len]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.count = 0;
    }
}
