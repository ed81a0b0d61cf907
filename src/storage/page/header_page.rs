//! The header page lives at `HEADER_PAGE_ID` (page 0) and maps index names
//! to their root page ids. Every B+tree persists root changes through it.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

pub fn record_count(page: &Page) -> usize {
    LittleEndian::read_i32(&page.data[COUNT_OFFSET..COUNT_OFFSET + 4]).max(0) as usize
}

fn set_record_count(page: &mut Page, count: usize) {
    LittleEndian::write_i32(&mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4], count as i32);
}

fn record_name(page: &Page, index: usize) -> &str {
    let start = RECORDS_OFFSET + index * RECORD_SIZE;
    let raw = &page.data[start..start + NAME_SIZE];
    let len = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
    std::str::from_utf8(&raw[..len]).unwrap_or("")
}

fn find_index(page: &Page, name: &str) -> Option<usize> {
    (0..record_count(page)).find(|&i| record_name(page, i) == name)
}

/// Look up the root page id recorded for `name`.
pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
    find_index(page, name).map(|i| {
        let start = RECORDS_OFFSET + i * RECORD_SIZE + NAME_SIZE;
        LittleEndian::read_i32(&page.data[start..start + 4])
    })
}

/// Add a `{name -> root_page_id}` record. Fails when the name is taken, too
/// long, or the page is full.
pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    let count = record_count(page);
    if name.len() >= NAME_SIZE || count >= MAX_RECORDS || find_index(page, name).is_some() {
        return false;
    }

    let start = RECORDS_OFFSET + count * RECORD_SIZE;
    page.data[start..start + NAME_SIZE].fill(0);
    page.data[start..start + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_i32(
        &mut page.data[start + NAME_SIZE..start + RECORD_SIZE],
        root_page_id,
    );
    set_record_count(page, count + 1);
    true
}

/// Update an existing record in place. Fails when the name is unknown.
pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    match find_index(page, name) {
        Some(i) => {
            let start = RECORDS_OFFSET + i * RECORD_SIZE + NAME_SIZE;
            LittleEndian::write_i32(&mut page.data[start..start + 4], root_page_id);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::HEADER_PAGE_ID;

    #[test]
    fn test_insert_and_lookup() {
        let mut page = Page::new(HEADER_PAGE_ID);

        assert!(insert_record(&mut page, "orders_pk", 3));
        assert!(insert_record(&mut page, "orders_by_date", 9));
        assert_eq!(record_count(&page), 2);

        assert_eq!(get_root_id(&page, "orders_pk"), Some(3));
        assert_eq!(get_root_id(&page, "orders_by_date"), Some(9));
        assert_eq!(get_root_id(&page, "missing"), None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(insert_record(&mut page, "orders_pk", 3));
        assert!(!insert_record(&mut page, "orders_pk", 4));
        assert_eq!(get_root_id(&page, "orders_pk"), Some(3));
    }

    #[test]
    fn test_update_record() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(insert_record(&mut page, "orders_pk", 3));
        assert!(update_record(&mut page, "orders_pk", 12));
        assert_eq!(get_root_id(&page, "orders_pk"), Some(12));
        assert!(!update_record(&mut page, "missing", 1));
    }

    #[test]
    fn test_name_too_long_rejected() {
        let mut page = Page::new(HEADER_PAGE_ID);
        let long_name = "x".repeat(NAME_SIZE);
        assert!(!insert_record(&mut page, &long_name, 1));
    }
}
