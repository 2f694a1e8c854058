use anyhow::{bail, Result};

use crate::mapper::Mirroring;

/// Parsed cartridge descriptor. ROM file parsing happens outside the core;
/// the loader hands us the already-split PRG/CHR images plus the header
/// facts the mappers care about.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_id: u8,
    pub mirroring: Mirroring,
    pub has_battery_backed_ram: bool,
    pub prg_rom: Vec<u8>,
    pub chr_data: Vec<u8>,
    pub chr_is_ram: bool,
}

impl Cartridge {
    pub fn new(
        mapper_id: u8,
        mirroring: Mirroring,
        has_battery_backed_ram: bool,
        prg_rom: Vec<u8>,
        chr_data: Vec<u8>,
        chr_is_ram: bool,
    ) -> Result<Self> {
        if prg_rom.is_empty() {
            bail!("invalid PRG ROM: empty payload");
        }

        // A cartridge without CHR-ROM carries 8 KiB of CHR-RAM instead.
        let chr_data = if chr_is_ram && chr_data.is_empty() {
            vec![0; 8 * 1024]
        } else if chr_data.is_empty() {
            bail!("invalid CHR data: empty payload without CHR-RAM flag");
        } else {
            chr_data
        };

        Ok(Self {
            mapper_id,
            mirroring,
            has_battery_backed_ram,
            prg_rom,
            chr_data,
            chr_is_ram,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chr_ram_flag_allocates_eight_kib() {
        let cart =
            Cartridge::new(0, Mirroring::Vertical, false, vec![0xEA; 0x4000], Vec::new(), true)
                .unwrap();
        assert_eq!(cart.chr_data.len(), 8 * 1024);
        assert!(cart.chr_is_ram);
    }

    #[test]
    fn empty_prg_rom_is_rejected() {
        let result =
            Cartridge::new(0, Mirroring::Horizontal, false, Vec::new(), vec![0; 0x2000], false);
        assert!(result.is_err());
    }
}
