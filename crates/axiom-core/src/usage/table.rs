//! The usage table: which usages the firmware exposes and where they live.
//!
//! Built from u31: page 0 carries the number of usages, page 1 one 6-byte
//! record per usage.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AxiomError, Result};
use crate::protocol::constants::{PAGE_SIZE, USAGE_DEVICE_INFO, USAGE_TABLE_ENTRY_SIZE};
use crate::usages::DecodeError;

/// Byte length of a usage from its table record.
///
/// Reports (`num_pages == 0`) hold `(max_offset + 1)` words. Paged usages
/// fill all but the last page. u31 is one page of device information plus
/// the table itself.
pub fn compute_length(id: u8, num_pages: u8, max_offset: u8, num_usages: u8) -> usize {
    let words = (max_offset as usize + 1) * 2;
    if num_pages == 0 {
        words
    } else if id != USAGE_DEVICE_INFO {
        (num_pages as usize - 1) * PAGE_SIZE + words
    } else {
        PAGE_SIZE + num_usages as usize * USAGE_TABLE_ENTRY_SIZE
    }
}

/// One record of the usage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageTableEntry {
    pub id: u8,
    pub start_page: u8,
    pub num_pages: u8,
    pub max_offset: u8,
    pub offset_type: bool,
    pub usage_rev: u8,
    length: usize,
}

impl UsageTableEntry {
    /// Parse a 6-byte record.
    pub fn from_record(record: &[u8; USAGE_TABLE_ENTRY_SIZE], num_usages: u8) -> Self {
        let [id, start_page, num_pages, offset, usage_rev, _] = *record;
        let max_offset = offset & 0x7F;
        Self {
            id,
            start_page,
            num_pages,
            max_offset,
            offset_type: offset & 0x80 != 0,
            usage_rev,
            length: compute_length(id, num_pages, max_offset, num_usages),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_report(&self) -> bool {
        self.num_pages == 0
    }
}

impl fmt::Display for UsageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Usage: u{:02x}    Rev: {:3}    Page: 0x{:02x}00    Num Pages: {:3}    Length: {:5}    {}",
            self.id,
            self.usage_rev,
            self.start_page,
            self.num_pages,
            self.length,
            if self.is_report() { "Report" } else { "" }
        )
    }
}

/// Usage table of the connected device.
#[derive(Debug, Clone, Default)]
pub struct UsageTable {
    entries: BTreeMap<u8, UsageTableEntry>,
    populated: bool,
    max_report_len: usize,
    num_usages: u8,
}

impl UsageTable {
    /// Empty, unpopulated table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a populated table from u31 page 1.
    pub fn from_records(num_usages: u8, records: &[u8]) -> Result<Self> {
        let expected = num_usages as usize * USAGE_TABLE_ENTRY_SIZE;
        if records.len() < expected {
            return Err(DecodeError::BufferTooSmall {
                usage: USAGE_DEVICE_INFO,
                expected,
                actual: records.len(),
            }
            .into());
        }

        let mut table = Self {
            num_usages,
            populated: true,
            ..Self::default()
        };
        for chunk in records[..expected].chunks_exact(USAGE_TABLE_ENTRY_SIZE) {
            let mut record = [0u8; USAGE_TABLE_ENTRY_SIZE];
            record.copy_from_slice(chunk);
            let entry = UsageTableEntry::from_record(&record, num_usages);
            if entry.is_report() {
                table.max_report_len = table.max_report_len.max(entry.length());
            }
            table.entries.insert(entry.id, entry);
        }
        Ok(table)
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Address of `page` of `usage`.
    ///
    /// u31 is always at page 0, so it is addressable before the table is
    /// populated.
    pub fn target_address(&self, usage: u8, page: u8) -> Result<u16> {
        if !self.populated && usage == USAGE_DEVICE_INFO {
            return Ok((page as u16) << 8);
        }
        let entry = self.entry(usage)?;
        let absolute = entry.start_page as u16 + page as u16;
        if absolute > u8::MAX as u16 {
            return Err(AxiomError::AddressOutOfRange { usage, page });
        }
        Ok(absolute << 8)
    }

    /// Table record of `usage`.
    pub fn entry(&self, usage: u8) -> Result<&UsageTableEntry> {
        if !self.populated {
            return Err(AxiomError::TableNotPopulated { usage });
        }
        self.entries
            .get(&usage)
            .ok_or(AxiomError::UnknownUsage { usage })
    }

    pub fn length(&self, usage: u8) -> Result<usize> {
        Ok(self.entry(usage)?.length())
    }

    pub fn revision(&self, usage: u8) -> Result<u8> {
        Ok(self.entry(usage)?.usage_rev)
    }

    /// Whether the connected firmware exposes `usage`.
    pub fn is_usage_present(&self, usage: u8) -> bool {
        self.entries.contains_key(&usage)
    }

    /// Entries in usage ID order.
    pub fn iter(&self) -> impl Iterator<Item = &UsageTableEntry> {
        self.entries.values()
    }

    /// Longest report usage, the size the bridge streams in proxy mode.
    pub fn max_report_len(&self) -> usize {
        self.max_report_len
    }

    pub fn num_usages(&self) -> u8 {
        self.num_usages
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for UsageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.populated {
            return writeln!(f, "Usage table not yet initialised");
        }
        writeln!(f, "Usage Table:")?;
        for entry in self.iter() {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(entries: &[[u8; 6]]) -> Vec<u8> {
        entries.iter().flatten().copied().collect()
    }

    fn sample() -> UsageTable {
        let raw = records(&[
            [0x31, 0x00, 0x02, 0x00, 0x01, 0x00],
            [0x02, 0x02, 0x01, 0x03, 0x01, 0x00],
            [0x34, 0x05, 0x00, 0x3F, 0x03, 0x00],
            [0x35, 0x06, 0x00, 0x05, 0x01, 0x00],
            [0x20, 0x07, 0x03, 0x93, 0x01, 0x00],
        ]);
        UsageTable::from_records(5, &raw).unwrap()
    }

    #[test]
    fn test_report_length() {
        let table = sample();
        assert_eq!(table.length(0x34).unwrap(), (0x3F + 1) * 2);
        assert_eq!(table.length(0x35).unwrap(), 12);
        assert!(table.entry(0x34).unwrap().is_report());
    }

    #[test]
    fn test_paged_length() {
        let table = sample();
        assert_eq!(table.length(0x02).unwrap(), 8);
        // offset_type bit is not part of max_offset
        let entry = table.entry(0x20).unwrap();
        assert_eq!(entry.max_offset, 0x13);
        assert!(entry.offset_type);
        assert_eq!(entry.length(), 2 * 256 + (0x13 + 1) * 2);
    }

    #[test]
    fn test_u31_length_counts_table() {
        let table = sample();
        assert_eq!(table.length(0x31).unwrap(), 256 + 5 * 6);
    }

    #[test]
    fn test_length_formula_grid() {
        for max_offset in [0u8, 1, 0x3F, 0x7F] {
            assert_eq!(compute_length(0x07, 0, max_offset, 9), (max_offset as usize + 1) * 2);
            for pages in [1u8, 2, 5] {
                assert_eq!(
                    compute_length(0x07, pages, max_offset, 9),
                    (pages as usize - 1) * 256 + (max_offset as usize + 1) * 2
                );
            }
        }
    }

    #[test]
    fn test_max_report_len() {
        assert_eq!(sample().max_report_len(), 128);
    }

    #[test]
    fn test_target_address() {
        let table = sample();
        assert_eq!(table.target_address(0x02, 0).unwrap(), 0x0200);
        assert_eq!(table.target_address(0x20, 2).unwrap(), 0x0900);
        // same inputs, same answer
        assert_eq!(
            table.target_address(0x20, 1).unwrap(),
            table.target_address(0x20, 1).unwrap()
        );
    }

    #[test]
    fn test_u31_bootstrap_address() {
        let table = UsageTable::new();
        assert_eq!(table.target_address(0x31, 0).unwrap(), 0x0000);
        assert_eq!(table.target_address(0x31, 1).unwrap(), 0x0100);
    }

    #[test]
    fn test_not_populated() {
        let table = UsageTable::new();
        assert!(matches!(
            table.target_address(0x02, 0),
            Err(AxiomError::TableNotPopulated { usage: 0x02 })
        ));
        assert!(matches!(
            table.length(0x02),
            Err(AxiomError::TableNotPopulated { usage: 0x02 })
        ));
    }

    #[test]
    fn test_unknown_usage() {
        let table = sample();
        assert!(!table.is_usage_present(0x77));
        assert!(matches!(
            table.target_address(0x77, 0),
            Err(AxiomError::UnknownUsage { usage: 0x77 })
        ));
    }

    #[test]
    fn test_address_out_of_range() {
        let raw = records(&[[0x99, 0xFF, 0x02, 0x7F, 0x01, 0x00]]);
        let table = UsageTable::from_records(1, &raw).unwrap();
        assert_eq!(table.target_address(0x99, 0).unwrap(), 0xFF00);
        assert!(matches!(
            table.target_address(0x99, 1),
            Err(AxiomError::AddressOutOfRange { usage: 0x99, page: 1 })
        ));
    }

    #[test]
    fn test_short_records() {
        assert!(matches!(
            UsageTable::from_records(3, &[0u8; 12]),
            Err(AxiomError::Decode(DecodeError::BufferTooSmall { expected: 18, .. }))
        ));
    }

    #[test]
    fn test_entry_display() {
        let table = sample();
        let row = table.entry(0x34).unwrap().to_string();
        assert_eq!(
            row,
            "Usage: u34    Rev:   3    Page: 0x0500    Num Pages:   0    Length:   128    Report"
        );
    }
}
