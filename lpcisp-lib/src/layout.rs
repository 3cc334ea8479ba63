//! Flash 扇区布局

use crate::error::SequencingError;
use crate::{Error, Result};
use std::fmt;

/// 起止扇区（闭区间），保证 `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorRange {
    start: u32,
    end: u32,
}

impl SectorRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_input(format!(
                "sector range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(sector: u32) -> Self {
        Self {
            start: sector,
            end: sector,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// 判断 `other` 是否完全落在本区间内
    pub fn contains(&self, other: &SectorRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn includes(&self, sector: u32) -> bool {
        self.start <= sector && sector <= self.end
    }

    pub fn overlaps(&self, other: &SectorRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl fmt::Display for SectorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    base: u32,
    sector_sizes: Vec<u32>,
    boot_block: Option<SectorRange>,
}

impl FlashLayout {
    pub const KIB: u32 = 1024;

    pub fn new(base: u32, sector_sizes: Vec<u32>, boot_block: Option<SectorRange>) -> Self {
        Self {
            base,
            sector_sizes,
            boot_block,
        }
    }

    pub fn uniform(sector_size: u32, sector_count: u32) -> Self {
        Self::new(0, vec![sector_size; sector_count as usize], None)
    }

    /// LPC111x / LPC11Cxx / LPC13xx：全部 4 KiB 扇区
    pub fn lpc11xx(flash_kib: u32) -> Self {
        Self::uniform(4 * Self::KIB, (flash_kib / 4).max(1))
    }

    /// LPC17xx：前 16 个 4 KiB 扇区，其余 32 KiB
    pub fn lpc17xx(flash_kib: u32) -> Self {
        let small = (flash_kib / 4).min(16);
        let large = flash_kib.saturating_sub(64) / 32;
        let mut sizes = vec![4 * Self::KIB; small as usize];
        sizes.extend(std::iter::repeat_n(32 * Self::KIB, large as usize));
        Self::new(0, sizes, None)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn sector_count(&self) -> u32 {
        self.sector_sizes.len() as u32
    }

    pub fn total_size(&self) -> u32 {
        self.sector_sizes.iter().sum()
    }

    pub fn boot_block(&self) -> Option<SectorRange> {
        self.boot_block
    }

    pub fn sector_size(&self, sector: u32) -> Option<u32> {
        self.sector_sizes.get(sector as usize).copied()
    }

    pub fn sector_address(&self, sector: u32) -> Option<u32> {
        if sector >= self.sector_count() {
            return None;
        }
        Some(
            self.base
                + self.sector_sizes[..sector as usize]
                    .iter()
                    .sum::<u32>(),
        )
    }

    /// 扇区范围结束处（不含）的地址
    pub fn range_end(&self, range: &SectorRange) -> Option<u64> {
        let start = self.sector_address(range.end())?;
        let size = self.sector_size(range.end())?;
        Some(start as u64 + size as u64)
    }

    /// 地址所在扇区
    pub fn sector_of(&self, address: u32) -> Option<u32> {
        let mut start = self.base;
        if address < start {
            return None;
        }
        for (index, size) in self.sector_sizes.iter().enumerate() {
            if address < start + size {
                return Some(index as u32);
            }
            start += size;
        }
        None
    }

    /// `[address, address + len)` 覆盖的扇区
    pub fn sectors_for(&self, address: u32, len: u32) -> Result<SectorRange> {
        let last = address
            .checked_add(len.max(1) - 1)
            .ok_or(SequencingError::AddressOutOfRange { address })?;
        let start = self
            .sector_of(address)
            .ok_or(SequencingError::AddressOutOfRange { address })?;
        let end = self
            .sector_of(last)
            .ok_or(SequencingError::AddressOutOfRange { address: last })?;
        SectorRange::new(start, end)
    }

    /// 扇区 0 与 boot block 永远不允许 prepare/erase/write
    pub fn is_protected(&self, range: &SectorRange) -> bool {
        range.includes(0)
            || self
                .boot_block
                .is_some_and(|boot_block| boot_block.overlaps(range))
    }

    pub fn check_mutable(&self, range: &SectorRange) -> std::result::Result<(), SequencingError> {
        if range.end() >= self.sector_count() {
            return Err(SequencingError::SectorOutOfRange {
                sector: range.end(),
                count: self.sector_count(),
            });
        }
        if self.is_protected(range) {
            return Err(SequencingError::BootSectorProtected(*range));
        }
        Ok(())
    }
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self::lpc11xx(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_requires_ordered_bounds() {
        assert!(SectorRange::new(3, 2).is_err());
        let range = SectorRange::new(2, 5).unwrap();
        assert_eq!(range.len(), 4);
        assert!(range.contains(&SectorRange::single(3)));
        assert!(!range.contains(&SectorRange::new(4, 6).unwrap()));
        assert_eq!(range.to_string(), "2..5");
        assert_eq!(SectorRange::single(7).to_string(), "7");
    }

    #[test]
    fn uniform_layout_maps_addresses() {
        let layout = FlashLayout::lpc11xx(32);
        assert_eq!(layout.sector_count(), 8);
        assert_eq!(layout.sector_of(0x0000), Some(0));
        assert_eq!(layout.sector_of(0x1000), Some(1));
        assert_eq!(layout.sector_of(0x7FFF), Some(7));
        assert_eq!(layout.sector_of(0x8000), None);
        assert_eq!(
            layout.sectors_for(0x1F00, 0x200).unwrap(),
            SectorRange::new(1, 2).unwrap()
        );
        assert_eq!(layout.sector_address(3), Some(0x3000));
    }

    #[test]
    fn lpc17xx_layout_switches_to_large_sectors() {
        let layout = FlashLayout::lpc17xx(512);
        assert_eq!(layout.sector_count(), 30);
        assert_eq!(layout.total_size(), 512 * 1024);
        assert_eq!(layout.sector_of(0x0001_0000), Some(16));
        assert_eq!(layout.sector_address(17), Some(0x0001_8000));
        assert_eq!(
            layout.range_end(&SectorRange::new(15, 16).unwrap()),
            Some(0x0001_8000)
        );
        assert_eq!(layout.range_end(&SectorRange::single(30)), None);
    }

    #[test]
    fn sector_zero_and_boot_block_are_protected() {
        let layout = FlashLayout::new(
            0,
            vec![4096; 8],
            Some(SectorRange::new(7, 7).unwrap()),
        );
        assert_eq!(
            layout.check_mutable(&SectorRange::new(0, 2).unwrap()),
            Err(SequencingError::BootSectorProtected(
                SectorRange::new(0, 2).unwrap()
            ))
        );
        assert!(layout.check_mutable(&SectorRange::new(6, 7).unwrap()).is_err());
        assert!(layout.check_mutable(&SectorRange::new(1, 6).unwrap()).is_ok());
        assert!(matches!(
            layout.check_mutable(&SectorRange::new(5, 9).unwrap()),
            Err(SequencingError::SectorOutOfRange { sector: 9, .. })
        ));
    }
}
