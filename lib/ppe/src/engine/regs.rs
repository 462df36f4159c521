// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Frame-engine register map and bitfield helpers.
//!
//! Only the registers the offload path touches are described here.

/// A contiguous mask covering bits `l` through `h`, inclusive.
pub const fn genmask(h: u32, l: u32) -> u32 {
    (u32::MAX >> (31 - h)) & (u32::MAX << l)
}

pub const fn bit(n: u32) -> u32 {
    1 << n
}

/// Extract the field described by `mask` from `val`.
pub const fn field_get(mask: u32, val: u32) -> u32 {
    (val & mask) >> mask.trailing_zeros()
}

/// Shift `val` into the field described by `mask`, truncating it to
/// the width of the field.
pub const fn field_prep(mask: u32, val: u32) -> u32 {
    (val << mask.trailing_zeros()) & mask
}

/// The largest value the field described by `mask` can hold.
pub const fn field_max(mask: u32) -> u32 {
    mask >> mask.trailing_zeros()
}

pub const PPE_NUM: usize = 2;

pub const REG_FE_FOE_TS: u32 = 0x0010;

const PPE1_BASE: u32 = 0x0c00;
const PPE2_BASE: u32 = 0x1c00;

const fn ppe_base(n: usize) -> u32 {
    if n == 0 { PPE1_BASE } else { PPE2_BASE }
}

pub const fn reg_ppe_glo_cfg(n: usize) -> u32 {
    ppe_base(n) + 0x200
}
pub const PPE_GLO_CFG_EN_MASK: u32 = bit(0);

pub const fn reg_ppe_tb_cfg(n: usize) -> u32 {
    ppe_base(n) + 0x21c
}
pub const PPE_SRAM_TB_NUM_ENTRY_MASK: u32 = genmask(26, 24);
pub const PPE_TB_CFG_KEEPALIVE_MASK: u32 = genmask(13, 12);
pub const PPE_TB_CFG_AGE_TCP_FIN_MASK: u32 = bit(11);
pub const PPE_TB_CFG_AGE_UDP_MASK: u32 = bit(10);
pub const PPE_TB_CFG_AGE_TCP_MASK: u32 = bit(9);
pub const PPE_TB_CFG_AGE_UNBIND_MASK: u32 = bit(8);
pub const PPE_TB_CFG_AGE_NON_L4_MASK: u32 = bit(7);
pub const PPE_TB_CFG_AGE_PREBIND_MASK: u32 = bit(6);
pub const PPE_TB_CFG_SEARCH_MISS_MASK: u32 = genmask(5, 4);
pub const PPE_TB_ENTRY_SIZE_MASK: u32 = bit(3);
pub const PPE_DRAM_TB_NUM_ENTRY_MASK: u32 = genmask(2, 0);

pub const fn reg_ppe_tb_base(n: usize) -> u32 {
    ppe_base(n) + 0x220
}

pub const fn reg_ppe_bnd_age0(n: usize) -> u32 {
    ppe_base(n) + 0x23c
}
pub const PPE_BIND_AGE0_DELTA_NON_L4: u32 = genmask(30, 16);
pub const PPE_BIND_AGE0_DELTA_UDP: u32 = genmask(14, 0);

pub const fn reg_ppe_bnd_age1(n: usize) -> u32 {
    ppe_base(n) + 0x240
}
pub const PPE_BIND_AGE1_DELTA_TCP_FIN: u32 = genmask(30, 16);
pub const PPE_BIND_AGE1_DELTA_TCP: u32 = genmask(14, 0);

pub const fn reg_ppe_hash_seed(n: usize) -> u32 {
    ppe_base(n) + 0x244
}

pub const fn reg_ppe_tb_hash_cfg(n: usize) -> u32 {
    ppe_base(n) + 0x250
}
pub const PPE_DRAM_HASH1_MODE_MASK: u32 = genmask(31, 28);
pub const PPE_DRAM_HASH1_EN_MASK: u32 = bit(24);
pub const PPE_DRAM_HASH0_MODE_MASK: u32 = genmask(23, 20);
pub const PPE_DRAM_TABLE_EN_MASK: u32 = bit(16);
pub const PPE_SRAM_HASH1_MODE_MASK: u32 = genmask(15, 12);
pub const PPE_SRAM_HASH1_EN_MASK: u32 = bit(8);
pub const PPE_SRAM_HASH0_MODE_MASK: u32 = genmask(7, 4);
pub const PPE_SRAM_TABLE_EN_MASK: u32 = bit(0);

/// Egress MTU register for the port pair containing `port`.
pub const fn reg_ppe_mtu(n: usize, port: usize) -> u32 {
    ppe_base(n) + 0x304 + ((port as u32 >> 1) << 2)
}
pub const FP0_EGRESS_MTU_MASK: u32 = genmask(13, 0);
pub const FP1_EGRESS_MTU_MASK: u32 = genmask(29, 16);

/// The SRAM request/acknowledge window.
pub const fn reg_ppe_ram_ctrl(n: usize) -> u32 {
    ppe_base(n) + 0x31c
}
pub const PPE_SRAM_CTRL_ACK_MASK: u32 = bit(31);
pub const PPE_SRAM_CTRL_ENTRY_MASK: u32 = genmask(23, 8);
pub const PPE_SRAM_CTRL_WR_MASK: u32 = bit(1);
pub const PPE_SRAM_CTRL_REQ_MASK: u32 = bit(0);

/// The `word`th data register of the SRAM window.
pub const fn reg_ppe_ram_entry(n: usize, word: usize) -> u32 {
    ppe_base(n) + 0x320 + ((word as u32) << 2)
}

pub const fn reg_updmem_ctrl(n: usize) -> u32 {
    ppe_base(n) + 0x370
}
pub const PPE_UPDMEM_ACK_MASK: u32 = bit(31);
pub const PPE_UPDMEM_ADDR_MASK: u32 = genmask(11, 8);
pub const PPE_UPDMEM_OFFSET_MASK: u32 = genmask(7, 4);
pub const PPE_UPDMEM_SEL_MASK: u32 = genmask(3, 2);
pub const PPE_UPDMEM_WR_MASK: u32 = bit(1);
pub const PPE_UPDMEM_REQ_MASK: u32 = bit(0);

pub const fn reg_updmem_data(n: usize) -> u32 {
    ppe_base(n) + 0x374
}

/// Encoding of a table size for the `*_TB_NUM_ENTRY` fields: 1K
/// entries is 0, doubling from there.
pub const fn ram_num_entries_shift(entries: u32) -> u32 {
    (entries >> 10).trailing_zeros()
}
