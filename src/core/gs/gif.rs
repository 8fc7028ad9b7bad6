// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! GIF packet demux
//!
//! The GS receives 128-bit quadwords on four logical paths. Each path carries
//! a persistent GIFTag that describes how the following quadwords decode:
//! PACKED (one register per quadword, bit-packed), REGLIST (two raw 64-bit
//! register writes per quadword) or IMAGE (raw HWREG payload). The register
//! list cycles NREG entries per loop for NLOOP loops.
//!
//! On every fresh tag the demux inspects `(FLG, NREG, REGS, PRIM)` and caches
//! a compiled handler on the path when the register pattern matches one of the
//! very common vertex-stream shapes. Matching loops are then burst-processed
//! without per-register dispatch.

use super::registers::*;
use super::renderer::GsRenderer;
use super::Gs;

// PACKED register descriptors (REGS nibbles).
pub const GIF_REG_PRIM: u32 = 0x0;
pub const GIF_REG_RGBAQ: u32 = 0x1;
pub const GIF_REG_ST: u32 = 0x2;
pub const GIF_REG_UV: u32 = 0x3;
pub const GIF_REG_XYZF2: u32 = 0x4;
pub const GIF_REG_XYZ2: u32 = 0x5;
pub const GIF_REG_TEX0_1: u32 = 0x6;
pub const GIF_REG_TEX0_2: u32 = 0x7;
pub const GIF_REG_CLAMP_1: u32 = 0x8;
pub const GIF_REG_CLAMP_2: u32 = 0x9;
pub const GIF_REG_FOG: u32 = 0xa;
pub const GIF_REG_XYZF3: u32 = 0xc;
pub const GIF_REG_XYZ3: u32 = 0xd;
pub const GIF_REG_AD: u32 = 0xe;
pub const GIF_REG_NOP: u32 = 0xf;

// GIFTag data formats.
pub const GIF_FLG_PACKED: u32 = 0;
pub const GIF_FLG_REGLIST: u32 = 1;
pub const GIF_FLG_IMAGE: u32 = 2;
// Reserved; hardware treats it as IMAGE.
pub const GIF_FLG_IMAGE2: u32 = 3;

/// A decoded GIFTag header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GifTag {
    pub nloop: u32,
    pub eop: bool,
    pub pre: bool,
    pub prim: u64,
    pub flg: u32,
    pub nreg: u32,
    pub regs: u64,
}

impl GifTag {
    /// Decode a tag from the two halves of a quadword
    pub fn parse(lo: u64, hi: u64) -> Self {
        GifTag {
            nloop: (lo & 0x7fff) as u32,
            eop: lo & (1 << 15) != 0,
            pre: lo & (1 << 46) != 0,
            prim: (lo >> 47) & 0x7ff,
            flg: ((lo >> 58) & 0x3) as u32,
            nreg: ((lo >> 60) & 0xf) as u32,
            regs: hi,
        }
    }

    /// NREG with the 0-means-16 encoding applied
    #[inline]
    pub fn effective_nreg(&self) -> u32 {
        if self.nreg == 0 {
            16
        } else {
            self.nreg
        }
    }
}

/// A compiled fast-path handler cached on a path
///
/// Selected when a fresh PACKED tag matches one of the common vertex-stream
/// register patterns; `None` falls back to per-register dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompiledGifHandler {
    #[default]
    None,
    /// `(ST, RGBAQ, XYZ2/XYZF2)` repeated `verts_per_loop` times
    StqRgbaXyz { fog: bool, verts_per_loop: u32 },
    /// `(UV, RGBAQ, XYZ2/XYZF2)`
    UvRgbaXyz { fog: bool },
    /// `(ST, XYZ, ST, RGBAQ, XYZ)` sprite streams
    SpriteStXyz { fog: bool },
    /// A+D only, any NREG
    AdOnly,
}

/// Per-path demux state
#[derive(Debug, Clone, Copy, Default)]
pub struct GifPath {
    pub tag: GifTag,
    pub loops: u32,
    pub reg: u32,
    pub compiled: CompiledGifHandler,
}

const fn nibble_pattern(regs: &[u32]) -> u64 {
    let mut out = 0u64;
    let mut i = 0;
    while i < regs.len() {
        out |= (regs[i] as u64) << (4 * i);
        i += 1;
    }
    out
}

const STQ_RGBA_XYZ2: u64 = nibble_pattern(&[GIF_REG_ST, GIF_REG_RGBAQ, GIF_REG_XYZ2]);
const STQ_RGBA_XYZF2: u64 = nibble_pattern(&[GIF_REG_ST, GIF_REG_RGBAQ, GIF_REG_XYZF2]);
const UV_RGBA_XYZ2: u64 = nibble_pattern(&[GIF_REG_UV, GIF_REG_RGBAQ, GIF_REG_XYZ2]);
const UV_RGBA_XYZF2: u64 = nibble_pattern(&[GIF_REG_UV, GIF_REG_RGBAQ, GIF_REG_XYZF2]);
const SPRITE_ST_XYZ2: u64 = nibble_pattern(&[
    GIF_REG_ST,
    GIF_REG_XYZ2,
    GIF_REG_ST,
    GIF_REG_RGBAQ,
    GIF_REG_XYZ2,
]);
const SPRITE_ST_XYZF2: u64 = nibble_pattern(&[
    GIF_REG_ST,
    GIF_REG_XYZF2,
    GIF_REG_ST,
    GIF_REG_RGBAQ,
    GIF_REG_XYZF2,
]);
const AD_ONLY: u64 = (GIF_REG_AD as u64) * 0x1111_1111_1111_1111;

/// Pick a compiled handler for a fresh tag, if its shape matches
///
/// `prim_type` is the current PRIM register's primitive; the multi-vertex
/// variants only make sense for the matching list primitive.
pub fn select_compiled_handler(tag: &GifTag, prim_type: u32) -> CompiledGifHandler {
    if tag.flg != GIF_FLG_PACKED || tag.nloop == 0 {
        return CompiledGifHandler::None;
    }

    let nreg = tag.nreg;
    match nreg {
        3 if tag.regs & 0xfff == STQ_RGBA_XYZ2 => CompiledGifHandler::StqRgbaXyz {
            fog: false,
            verts_per_loop: 1,
        },
        3 if tag.regs & 0xfff == STQ_RGBA_XYZF2 => CompiledGifHandler::StqRgbaXyz {
            fog: true,
            verts_per_loop: 1,
        },
        3 if tag.regs & 0xfff == UV_RGBA_XYZ2 => CompiledGifHandler::UvRgbaXyz { fog: false },
        3 if tag.regs & 0xfff == UV_RGBA_XYZF2 => CompiledGifHandler::UvRgbaXyz { fog: true },
        5 if tag.regs & 0xfffff == SPRITE_ST_XYZF2 && prim_type == super::kick::PRIM_SPRITE => {
            CompiledGifHandler::SpriteStXyz { fog: true }
        }
        5 if tag.regs & 0xfffff == SPRITE_ST_XYZ2 && prim_type == super::kick::PRIM_SPRITE => {
            CompiledGifHandler::SpriteStXyz { fog: false }
        }
        6 if tag.regs & 0xff_ffff == STQ_RGBA_XYZ2 | (STQ_RGBA_XYZ2 << 12)
            && prim_type == super::kick::PRIM_LINE_LIST =>
        {
            CompiledGifHandler::StqRgbaXyz {
                fog: false,
                verts_per_loop: 2,
            }
        }
        6 if tag.regs & 0xff_ffff == STQ_RGBA_XYZF2 | (STQ_RGBA_XYZF2 << 12)
            && prim_type == super::kick::PRIM_LINE_LIST =>
        {
            CompiledGifHandler::StqRgbaXyz {
                fog: true,
                verts_per_loop: 2,
            }
        }
        9 if tag.regs & 0xf_ffff_ffff
            == STQ_RGBA_XYZ2 | (STQ_RGBA_XYZ2 << 12) | (STQ_RGBA_XYZ2 << 24)
            && prim_type == super::kick::PRIM_TRIANGLE_LIST =>
        {
            CompiledGifHandler::StqRgbaXyz {
                fog: false,
                verts_per_loop: 3,
            }
        }
        9 if tag.regs & 0xf_ffff_ffff
            == STQ_RGBA_XYZF2 | (STQ_RGBA_XYZF2 << 12) | (STQ_RGBA_XYZF2 << 24)
            && prim_type == super::kick::PRIM_TRIANGLE_LIST =>
        {
            CompiledGifHandler::StqRgbaXyz {
                fog: true,
                verts_per_loop: 3,
            }
        }
        _ => {
            let reg_mask = if tag.nreg == 0 {
                u64::MAX
            } else {
                (1u64 << (tag.nreg * 4)) - 1
            };
            if tag.regs & reg_mask == AD_ONLY & reg_mask {
                CompiledGifHandler::AdOnly
            } else {
                CompiledGifHandler::None
            }
        }
    }
}

#[inline]
fn qword(data: &[u8], i: usize) -> (u64, u64) {
    let o = i * 16;
    (
        u64::from_le_bytes(data[o..o + 8].try_into().unwrap()),
        u64::from_le_bytes(data[o + 8..o + 16].try_into().unwrap()),
    )
}

impl<R: GsRenderer> Gs<R> {
    /// Ingest a byte stream on GIF path 0..=3
    ///
    /// The stream must be a whole number of 128-bit quadwords; a ragged tail
    /// is dropped with a warning. Decoding is strictly ordered within the
    /// call, and path state persists so tags and loops may span calls.
    pub fn gif_transfer(&mut self, path_index: usize, data: &[u8]) {
        debug_assert!(path_index < 4);
        if path_index >= 4 {
            log::error!("GIF transfer on invalid path {}", path_index);
            return;
        }
        if data.len() % 16 != 0 {
            log::warn!("GIF transfer of {} bytes is not quadword aligned", data.len());
        }

        let size = data.len() / 16;
        let mut nreg = self.paths[path_index].tag.effective_nreg();
        let mut i = 0usize;

        while i < size {
            let path = &self.paths[path_index];
            if path.loops == path.tag.nloop {
                let (lo, hi) = qword(data, i);
                let tag = GifTag::parse(lo, hi);
                log::trace!(
                    "GIFTag path {}: NLOOP={} FLG={} NREG={} REGS={:#x}",
                    path_index,
                    tag.nloop,
                    tag.flg,
                    tag.nreg,
                    tag.regs
                );

                self.paths[path_index].tag = tag;
                if tag.flg == GIF_FLG_PACKED && tag.pre {
                    self.ad_prim(tag.prim);
                }
                self.update_compiled_gif_handler(path_index);

                let path = &mut self.paths[path_index];
                path.loops = 0;
                path.reg = 0;
                nreg = tag.effective_nreg();
                i += 1;
                continue;
            }

            let tag = path.tag;
            let compiled = path.compiled;
            let reg = path.reg;

            let whole_loops = ((size - i) as u32 / nreg).min(tag.nloop - path.loops);
            if reg == 0 && compiled != CompiledGifHandler::None && whole_loops != 0 {
                self.run_compiled_handler(compiled, &data[i * 16..], whole_loops, nreg);
                self.paths[path_index].loops += whole_loops;
                i += (whole_loops * nreg) as usize;
            } else if tag.flg == GIF_FLG_PACKED {
                let addr = ((tag.regs >> (4 * reg)) & 0xf) as u32;
                let (lo, hi) = qword(data, i);
                if addr == GIF_REG_AD {
                    self.write_register((hi & 0xff) as u8, lo);
                } else {
                    self.dispatch_packed(addr, lo, hi);
                }
                i += 1;

                let path = &mut self.paths[path_index];
                path.reg += 1;
                if path.reg == nreg {
                    path.reg = 0;
                    path.loops += 1;
                }
            } else if tag.flg == GIF_FLG_REGLIST {
                // Two registers per quadword; loops pack tightly when NREG is
                // odd, and a trailing half-quadword at the end of the final
                // loop is consumed without being reinterpreted.
                let (lo, hi) = qword(data, i);
                for word in [lo, hi] {
                    let path = &mut self.paths[path_index];
                    if path.loops == path.tag.nloop {
                        break;
                    }
                    let addr = ((path.tag.regs >> (4 * path.reg)) & 0xf) as u32;
                    path.reg += 1;
                    if path.reg == nreg {
                        path.reg = 0;
                        path.loops += 1;
                    }
                    self.dispatch_reglist(addr, word);
                }
                i += 1;
            } else {
                // IMAGE (and the reserved format, which hardware treats the
                // same way): payload feeds HWREG.
                if tag.flg == GIF_FLG_IMAGE2 {
                    log::warn!("GIFTag with reserved FLG=3, treating as IMAGE");
                }
                let loops = (size - i).min((tag.nloop - path.loops) as usize);
                self.hwreg_write_bulk(&data[i * 16..(i + loops) * 16]);
                self.paths[path_index].loops += loops as u32;
                i += loops;
            }
        }
    }

    /// Re-derive the cached fast-path handler for a path
    pub(crate) fn update_compiled_gif_handler(&mut self, path_index: usize) {
        let tag = self.paths[path_index].tag;
        self.paths[path_index].compiled =
            select_compiled_handler(&tag, self.registers.prim.prim());
    }

    fn run_compiled_handler(
        &mut self,
        handler: CompiledGifHandler,
        data: &[u8],
        loops: u32,
        nreg: u32,
    ) {
        match handler {
            CompiledGifHandler::StqRgbaXyz {
                fog,
                verts_per_loop,
            } => {
                let mut off = 0usize;
                for _ in 0..loops * verts_per_loop {
                    self.packed_st_bytes(data, off);
                    self.packed_rgbaq_bytes(data, off + 16);
                    self.packed_xyz_bytes(data, off + 32, fog, false);
                    off += 48;
                }
            }
            CompiledGifHandler::UvRgbaXyz { fog } => {
                let mut off = 0usize;
                for _ in 0..loops {
                    self.packed_uv_bytes(data, off);
                    self.packed_rgbaq_bytes(data, off + 16);
                    self.packed_xyz_bytes(data, off + 32, fog, false);
                    off += 48;
                }
            }
            CompiledGifHandler::SpriteStXyz { fog } => {
                let mut off = 0usize;
                for _ in 0..loops {
                    self.packed_st_bytes(data, off);
                    self.packed_xyz_bytes(data, off + 16, fog, false);
                    self.packed_st_bytes(data, off + 32);
                    self.packed_rgbaq_bytes(data, off + 48);
                    self.packed_xyz_bytes(data, off + 64, fog, false);
                    off += 80;
                }
            }
            CompiledGifHandler::AdOnly => {
                for q in 0..(loops * nreg) as usize {
                    let (lo, hi) = qword(data, q);
                    self.write_register((hi & 0xff) as u8, lo);
                }
            }
            CompiledGifHandler::None => unreachable!(),
        }
    }

    fn dispatch_packed(&mut self, addr: u32, lo: u64, hi: u64) {
        match addr {
            GIF_REG_PRIM => self.ad_prim(lo),
            GIF_REG_RGBAQ => self.packed_rgbaq(lo, hi),
            GIF_REG_ST => self.packed_st(lo, hi),
            GIF_REG_UV => self.packed_uv(lo),
            GIF_REG_XYZF2 => self.packed_xyzf(lo, hi, false),
            GIF_REG_XYZ2 => self.packed_xyz(lo, hi, false),
            GIF_REG_TEX0_1 => self.ad_tex0(0, lo),
            GIF_REG_TEX0_2 => self.ad_tex0(1, lo),
            GIF_REG_CLAMP_1 => self.ad_clamp(0, lo),
            GIF_REG_CLAMP_2 => self.ad_clamp(1, lo),
            GIF_REG_FOG => self.packed_fog(hi),
            GIF_REG_XYZF3 => self.packed_xyzf(lo, hi, true),
            GIF_REG_XYZ3 => self.packed_xyz(lo, hi, true),
            _ => {}
        }
    }

    fn dispatch_reglist(&mut self, addr: u32, word: u64) {
        match addr {
            GIF_REG_PRIM => self.ad_prim(word),
            GIF_REG_RGBAQ => self.ad_rgbaq(word),
            GIF_REG_ST => self.ad_st(word),
            GIF_REG_UV => self.ad_uv(word),
            GIF_REG_XYZF2 => self.ad_xyzf2(word),
            GIF_REG_XYZ2 => self.ad_xyz2(word),
            GIF_REG_TEX0_1 => self.ad_tex0(0, word),
            GIF_REG_TEX0_2 => self.ad_tex0(1, word),
            GIF_REG_CLAMP_1 => self.ad_clamp(0, word),
            GIF_REG_CLAMP_2 => self.ad_clamp(1, word),
            GIF_REG_FOG => self.ad_fog(word),
            GIF_REG_XYZF3 => self.ad_xyzf3(word),
            GIF_REG_XYZ3 => self.ad_xyz3(word),
            _ => {}
        }
    }

    // Packed payload extractors. Layouts follow the PACKED quadword formats;
    // each position register carries the ADC "vertex only, no draw" bit.

    pub(crate) fn packed_rgbaq(&mut self, lo: u64, hi: u64) {
        let rgbaq = &mut self.registers.rgbaq;
        rgbaq.set_r((lo & 0xff) as u32);
        rgbaq.set_g(((lo >> 32) & 0xff) as u32);
        rgbaq.set_b((hi & 0xff) as u32);
        rgbaq.set_a(((hi >> 32) & 0xff) as u32);
        rgbaq.set_q(self.registers.internal_q);
    }

    pub(crate) fn packed_st(&mut self, lo: u64, hi: u64) {
        self.registers.st = St(lo);
        self.registers.internal_q = f32::from_bits(hi as u32);
    }

    pub(crate) fn packed_uv(&mut self, lo: u64) {
        let uv = &mut self.registers.uv;
        uv.set_u((lo & 0x3fff) as u32);
        uv.set_v(((lo >> 32) & 0x3fff) as u32);
    }

    pub(crate) fn packed_fog(&mut self, hi: u64) {
        self.registers.fog.set_f(((hi >> 36) & 0xff) as u32);
    }

    pub(crate) fn packed_xyzf(&mut self, lo: u64, hi: u64, force_adc: bool) {
        let mut xyzf = 0u64;
        xyzf |= lo & 0xffff;
        xyzf |= ((lo >> 32) & 0xffff) << 16;
        xyzf |= ((hi >> 4) & 0xff_ffff) << 32;
        xyzf |= ((hi >> 36) & 0xff) << 56;
        let adc = force_adc || hi & (1 << 47) != 0;

        self.vertex_kick_xyzf(xyzf);
        self.drawing_kick(adc);
    }

    pub(crate) fn packed_xyz(&mut self, lo: u64, hi: u64, force_adc: bool) {
        let mut xyz = 0u64;
        xyz |= lo & 0xffff;
        xyz |= ((lo >> 32) & 0xffff) << 16;
        xyz |= (hi & 0xffff_ffff) << 32;
        let adc = force_adc || hi & (1 << 47) != 0;

        self.vertex_kick_xyz(xyz);
        self.drawing_kick(adc);
    }

    // Byte-offset variants used by the burst handlers.

    #[inline]
    fn packed_st_bytes(&mut self, data: &[u8], off: usize) {
        let lo = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        let hi = u64::from_le_bytes(data[off + 8..off + 16].try_into().unwrap());
        self.packed_st(lo, hi);
    }

    #[inline]
    fn packed_rgbaq_bytes(&mut self, data: &[u8], off: usize) {
        let lo = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        let hi = u64::from_le_bytes(data[off + 8..off + 16].try_into().unwrap());
        self.packed_rgbaq(lo, hi);
    }

    #[inline]
    fn packed_uv_bytes(&mut self, data: &[u8], off: usize) {
        let lo = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        self.packed_uv(lo);
    }

    #[inline]
    fn packed_xyz_bytes(&mut self, data: &[u8], off: usize, fog: bool, force_adc: bool) {
        let lo = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        let hi = u64::from_le_bytes(data[off + 8..off + 16].try_into().unwrap());
        if fog {
            self.packed_xyzf(lo, hi, force_adc);
        } else {
            self.packed_xyz(lo, hi, force_adc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gs::kick::{PRIM_LINE_LIST, PRIM_SPRITE, PRIM_TRIANGLE_LIST};

    fn tag(flg: u32, nloop: u32, nreg: u32, regs: u64) -> GifTag {
        GifTag {
            nloop,
            eop: false,
            pre: false,
            prim: 0,
            flg,
            nreg,
            regs,
        }
    }

    #[test]
    fn test_tag_parse() {
        // NLOOP=5, EOP, PRE, PRIM=3, FLG=PACKED, NREG=3
        let lo = 5u64 | (1 << 15) | (1 << 46) | (3u64 << 47) | (3u64 << 60);
        let t = GifTag::parse(lo, 0x512);
        assert_eq!(t.nloop, 5);
        assert!(t.eop);
        assert!(t.pre);
        assert_eq!(t.prim, 3);
        assert_eq!(t.flg, GIF_FLG_PACKED);
        assert_eq!(t.nreg, 3);
        assert_eq!(t.regs, 0x512);
    }

    #[test]
    fn test_effective_nreg() {
        assert_eq!(tag(GIF_FLG_PACKED, 1, 0, 0).effective_nreg(), 16);
        assert_eq!(tag(GIF_FLG_PACKED, 1, 7, 0).effective_nreg(), 7);
    }

    #[test]
    fn test_select_stq_rgba_xyz() {
        let t = tag(GIF_FLG_PACKED, 4, 3, 0x512);
        assert_eq!(
            select_compiled_handler(&t, PRIM_TRIANGLE_LIST),
            CompiledGifHandler::StqRgbaXyz {
                fog: false,
                verts_per_loop: 1
            }
        );

        let t = tag(GIF_FLG_PACKED, 4, 3, 0x412);
        assert_eq!(
            select_compiled_handler(&t, 0),
            CompiledGifHandler::StqRgbaXyz {
                fog: true,
                verts_per_loop: 1
            }
        );
    }

    #[test]
    fn test_select_trilist_burst() {
        let t = tag(GIF_FLG_PACKED, 4, 9, 0x512512512);
        assert_eq!(
            select_compiled_handler(&t, PRIM_TRIANGLE_LIST),
            CompiledGifHandler::StqRgbaXyz {
                fog: false,
                verts_per_loop: 3
            }
        );
        // Only valid when the PRIM register agrees.
        assert_eq!(
            select_compiled_handler(&t, PRIM_SPRITE),
            CompiledGifHandler::None
        );
    }

    #[test]
    fn test_select_linelist_burst() {
        let t = tag(GIF_FLG_PACKED, 4, 6, 0x412412);
        assert_eq!(
            select_compiled_handler(&t, PRIM_LINE_LIST),
            CompiledGifHandler::StqRgbaXyz {
                fog: true,
                verts_per_loop: 2
            }
        );
    }

    #[test]
    fn test_select_sprite_burst() {
        let t = tag(GIF_FLG_PACKED, 4, 5, 0x41242);
        assert_eq!(
            select_compiled_handler(&t, PRIM_SPRITE),
            CompiledGifHandler::SpriteStXyz { fog: true }
        );
        assert_eq!(
            select_compiled_handler(&t, PRIM_TRIANGLE_LIST),
            CompiledGifHandler::None
        );
    }

    #[test]
    fn test_select_ad_only() {
        let t = tag(GIF_FLG_PACKED, 4, 1, 0xe);
        assert_eq!(select_compiled_handler(&t, 0), CompiledGifHandler::AdOnly);

        let t = tag(GIF_FLG_PACKED, 4, 0, AD_ONLY);
        assert_eq!(select_compiled_handler(&t, 0), CompiledGifHandler::AdOnly);

        let t = tag(GIF_FLG_PACKED, 4, 2, 0x2e);
        assert_eq!(select_compiled_handler(&t, 0), CompiledGifHandler::None);
    }

    #[test]
    fn test_no_fast_path_for_reglist_or_empty() {
        let t = tag(GIF_FLG_REGLIST, 4, 3, 0x512);
        assert_eq!(select_compiled_handler(&t, 0), CompiledGifHandler::None);

        let t = tag(GIF_FLG_PACKED, 0, 3, 0x512);
        assert_eq!(select_compiled_handler(&t, 0), CompiledGifHandler::None);
    }
}
