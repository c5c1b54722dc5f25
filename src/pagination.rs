use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page request. Zero means "use the default" for either field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Fill defaults and reject sizes above [`MAX_PAGE_SIZE`].
    pub fn normalized(self) -> Result<Self> {
        let page = self.page.max(1);
        let page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n if n > MAX_PAGE_SIZE => {
                return Err(EngineError::validation(format!(
                    "page_size must be at most {MAX_PAGE_SIZE}, got {n}"
                )))
            }
            n => n,
        };
        Ok(Self { page, page_size })
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Slice one page out of an already ordered list.
    pub fn slice(items: Vec<T>, request: PageRequest) -> Result<Self> {
        let request = request.normalized()?;
        let total_items = items.len() as u64;
        let total_pages = total_items.div_ceil(request.page_size as u64) as u32;
        let data = items
            .into_iter()
            .skip(request.offset())
            .take(request.page_size as usize)
            .collect();
        Ok(Self {
            data,
            page: request.page,
            page_size: request.page_size,
            total_items,
            total_pages,
        })
    }
}
