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

//! Renderer interface
//!
//! The GPU-accelerated renderer lives outside this crate and is consumed
//! through the [`GsRenderer`] trait: render-pass submission, VRAM copies,
//! palette-cache updates, cached-texture creation, scanout and host/GPU
//! timeline synchronization. This module also defines the descriptor types
//! that cross that boundary, including the packed per-primitive attribute
//! encoding shared with the renderer's shaders.

use serde::{Deserialize, Serialize};

use super::page_tracker::FlushReason;
use super::registers::{
    BitBltBuf, Clamp, Frame, Miptbp, PrivRegisterState, Tex0, Tex1, Texa, TexClut, TrxDir, TrxPos,
    TrxReg, Zbuf, WM_REGION_CLAMP,
};

// PrimitiveAttribute.state bit layout. The state-vector index lives in the
// high half; the low bits are per-primitive flags.
pub const STATE_BIT_Z_TEST: u32 = 0;
pub const STATE_BIT_Z_TEST_GREATER: u32 = 1;
pub const STATE_BIT_Z_WRITE: u32 = 2;
pub const STATE_BIT_OPAQUE: u32 = 3;
pub const STATE_BIT_MULTISAMPLE: u32 = 4;
pub const STATE_BIT_SCANMSK_EVEN: u32 = 5;
pub const STATE_BIT_SCANMSK_ODD: u32 = 6;
pub const STATE_BIT_PERSPECTIVE: u32 = 7;
pub const STATE_BIT_IIP: u32 = 8;
pub const STATE_BIT_FIX: u32 = 9;
pub const STATE_BIT_PARALLELOGRAM: u32 = 10;
pub const STATE_BIT_SPRITE: u32 = 11;
pub const STATE_BIT_LINE: u32 = 12;
pub const STATE_BIT_SNAP_RASTER: u32 = 13;
pub const STATE_INDEX_BIT_OFFSET: u32 = 16;

// PrimitiveAttribute.tex bit layout. Sampler state in the low bits, texture
// index in the high half. The MSB of the index field marks on-tile feedback;
// its low bits then encode `clut_instance * 32 + CSA` instead of an index.
pub const TEX_SAMPLER_MAG_LINEAR_BIT: u32 = 1 << 0;
pub const TEX_SAMPLER_MIN_LINEAR_BIT: u32 = 1 << 1;
pub const TEX_SAMPLER_MIPMAP_LINEAR_BIT: u32 = 1 << 2;
pub const TEX_SAMPLER_CLAMP_S_BIT: u32 = 1 << 3;
pub const TEX_SAMPLER_CLAMP_T_BIT: u32 = 1 << 4;
pub const TEX_MAX_MIP_LEVEL_OFFSET: u32 = 5;
pub const TEX_TEXTURE_INDEX_BITS: u32 = 16;
pub const TEX_TEXTURE_INDEX_OFFSET: u32 = 16;
pub const TEX_FEEDBACK_INDEX_BIT: u32 = 1 << (TEX_TEXTURE_INDEX_BITS - 1);

// PrimitiveAttribute.tex2 bit layout: fixed-LOD select plus L and K.
pub const TEX2_FIXED_LOD_OFFSET: u32 = 0;
pub const TEX2_L_OFFSET: u32 = 1;
pub const TEX2_K_OFFSET: u32 = 16;

// PrimitiveAttribute.alpha bit layout: AFIX and AREF bytes.
pub const ALPHA_AFIX_OFFSET: u32 = 0;
pub const ALPHA_AREF_OFFSET: u32 = 8;

// StateVector.blend_mode bit layout.
pub const BLEND_MODE_ABE_BIT: u32 = 1 << 0;
pub const BLEND_MODE_DTHE_BIT: u32 = 1 << 1;
pub const BLEND_MODE_ATE_BIT: u32 = 1 << 2;
pub const BLEND_MODE_ATE_MODE_OFFSET: u32 = 3;
pub const BLEND_MODE_AFAIL_MODE_OFFSET: u32 = 6;
pub const BLEND_MODE_DATE_BIT: u32 = 1 << 8;
pub const BLEND_MODE_DATM_BIT: u32 = 1 << 9;
pub const BLEND_MODE_A_MODE_OFFSET: u32 = 10;
pub const BLEND_MODE_B_MODE_OFFSET: u32 = 12;
pub const BLEND_MODE_C_MODE_OFFSET: u32 = 14;
pub const BLEND_MODE_D_MODE_OFFSET: u32 = 16;
pub const BLEND_MODE_PABE_BIT: u32 = 1 << 18;
pub const BLEND_MODE_COLCLAMP_BIT: u32 = 1 << 19;
pub const BLEND_MODE_FB_ALPHA_BIT: u32 = 1 << 20;

// StateVector.combiner bit layout.
pub const COMBINER_TME_BIT: u32 = 1 << 0;
pub const COMBINER_TCC_BIT: u32 = 1 << 1;
pub const COMBINER_MODE_OFFSET: u32 = 2;
pub const COMBINER_FOG_BIT: u32 = 1 << 4;

/// Supersampling factor
///
/// Selects per-axis log2 sampling rates; the odd factors put the extra rate on
/// the Y axis where interlaced content benefits most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SuperSampling {
    #[default]
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl SuperSampling {
    /// Per-axis (x, y) log2 sampling rates
    pub fn rate_log2(self) -> (u32, u32) {
        match self {
            SuperSampling::X1 => (0, 0),
            SuperSampling::X2 => (0, 1),
            SuperSampling::X4 => (1, 1),
            SuperSampling::X8 => (1, 2),
            SuperSampling::X16 => (2, 2),
        }
    }
}

/// Engine construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsOptions {
    /// VRAM size in bytes; must be a page multiple with a power-of-two page
    /// count
    pub vram_size: usize,
    pub super_sampling: SuperSampling,
}

impl Default for GsOptions {
    fn default() -> Self {
        GsOptions {
            vram_size: 4 * 1024 * 1024,
            super_sampling: SuperSampling::X1,
        }
    }
}

/// Per-draw debug capture granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrawDebugMode {
    #[default]
    None,
    /// Capture every 16th primitive, enough to bisect a faulty draw
    Strided,
    /// Capture every primitive
    Full,
}

/// Debug switches
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DebugMode {
    pub draw_mode: DrawDebugMode,
    /// Feed render targets back for inspection after each pass
    pub feedback_render_target: bool,
}

/// Vertex position in window subpixel space plus depth
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VertexPosition {
    pub x: i32,
    pub y: i32,
    pub z: f32,
}

/// Interpolated vertex attributes snapshotted at kick time
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VertexAttribute {
    pub s: f32,
    pub t: f32,
    pub q: f32,
    /// Packed RGBA bytes
    pub rgba: u32,
    pub fog: f32,
    /// Texel-space UV, 12.4 fixed point
    pub u: u16,
    pub v: u16,
}

/// Packed per-primitive state shared with the renderer's shaders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimitiveAttribute {
    pub tex: u32,
    pub tex2: u32,
    pub state: u32,
    pub fbmsk: u32,
    pub fogcol: u32,
    pub alpha: u32,
    /// Inclusive pixel-space bounding box (x0, y0, x1, y1)
    pub bb: [i16; 4],
}

/// Deduplicated blend/combiner/dither state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StateVector {
    pub blend_mode: u32,
    pub combiner: u32,
    pub dimx: [u32; 2],
}

/// The effective sampled region of a texture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
}

/// Everything needed to synthesize a cached texture
///
/// Fields that only affect shading or the palette upload are normalized to
/// zero by the builder before hashing so they never cause spurious cache
/// misses. For palette formats the owning CLUT instance is part of the key.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextureDescriptor {
    pub tex0: Tex0,
    pub tex1: Tex1,
    pub texa: Texa,
    pub clamp: Clamp,
    pub miptbp1_3: Miptbp,
    pub miptbp4_6: Miptbp,
    pub palette_bank: u32,
    pub latest_palette_bank: u32,
    pub rect: TextureRect,
    pub hash: u64,
}

/// Compute the effective sampled rectangle of a texture descriptor
///
/// REGION_CLAMP narrows the rect; everything else covers the full TW/TH
/// extent. Level count follows MXL, which the builder zeroes when the MMIN
/// filter never samples a mip.
pub fn compute_effective_texture_rect(desc: &TextureDescriptor) -> TextureRect {
    let tw = desc.tex0.tw().min(10);
    let th = desc.tex0.th().min(10);
    let mut rect = TextureRect {
        x: 0,
        y: 0,
        width: 1 << tw,
        height: 1 << th,
        levels: desc.tex1.mxl().min(6) + 1,
    };

    if desc.clamp.wms() == WM_REGION_CLAMP {
        rect.x = desc.clamp.minu();
        rect.width = (desc.clamp.maxu() + 1).saturating_sub(desc.clamp.minu()).max(1);
    }

    if desc.clamp.wmt() == WM_REGION_CLAMP {
        rect.y = desc.clamp.minv();
        rect.height = (desc.clamp.maxv() + 1).saturating_sub(desc.clamp.minv()).max(1);
    }

    rect
}

/// One entry of a render pass's texture table
#[derive(Debug, Clone)]
pub struct TextureInfo<I> {
    pub image: I,
    /// Texture width/height and their reciprocals
    pub sizes: [f32; 4],
    /// Inclusive sampled region in texels
    pub region: [f32; 4],
    /// UV bias applied before sampling (normalized)
    pub bias: [f32; 2],
}

/// A normalized CLUT upload request
///
/// Non-contributing TEX0 fields are zeroed so identical uploads compare equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaletteUpload {
    pub tex0: Tex0,
    pub texclut: TexClut,
}

/// A VRAM copy handed to the renderer
///
/// For HOST→LOCAL the payload carries qwords accumulated from HWREG;
/// `offset_qwords` marks how much of it earlier partial flushes already
/// consumed, and `required_qwords` the full transfer size. LOCAL→LOCAL copies
/// carry an empty payload.
#[derive(Debug, Clone, Copy)]
pub struct CopyVram<'a> {
    pub trxpos: TrxPos,
    pub trxreg: TrxReg,
    pub trxdir: TrxDir,
    pub bitbltbuf: BitBltBuf,
    pub host_data: &'a [u64],
    pub offset_qwords: usize,
    pub required_qwords: usize,
}

/// Framebuffer binding of a render pass
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameBufferDesc {
    pub frame: Frame,
    pub zbuf: Zbuf,
}

/// One batched render pass
#[derive(Debug)]
pub struct RenderPassDesc<'a, I> {
    pub positions: &'a [VertexPosition],
    pub attributes: &'a [VertexAttribute],
    pub prims: &'a [PrimitiveAttribute],
    pub states: &'a [StateVector],
    pub textures: &'a [TextureInfo<I>],
    pub fb: FrameBufferDesc,

    /// Pixel-space origin of the pass bounding box
    pub base_x: i32,
    pub base_y: i32,
    pub coarse_tile_size_log2: u32,
    pub coarse_tiles_width: u32,
    pub coarse_tiles_height: u32,

    pub feedback_texture: bool,
    pub feedback_psm: u32,
    pub feedback_cpsm: u32,

    pub z_sensitive: bool,
    pub has_aa1: bool,
    pub has_scanmsk: bool,

    pub sampling_rate_x_log2: u32,
    pub sampling_rate_y_log2: u32,

    /// Debug: resolve render targets after the pass
    pub feedback_color: bool,
    pub feedback_depth: bool,
    /// Debug: capture every Nth primitive (0 = off)
    pub debug_capture_stride: u32,

    pub label_key: u64,
    pub flush_reason: FlushReason,
}

/// Scanout request passed through to the renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct VSyncInfo {
    /// Field phase for interlaced modes
    pub phase: u32,
    pub force_progressive: bool,
    pub overscan: bool,
    pub anti_blur: bool,
}

/// Result of a vsync scanout
#[derive(Debug, Clone)]
pub struct ScanoutResult<I> {
    pub image: Option<I>,
    pub width: u32,
    pub height: u32,
}

/// Counters since the last call to `consume_flush_stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub num_render_passes: u64,
    pub num_copies: u64,
    pub num_copy_barriers: u64,
    pub num_palette_updates: u64,
}

/// GPU timestamp accumulation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampType {
    RenderPass,
    TextureUpload,
    PaletteUpdate,
    Copy,
    Readback,
}

/// The downstream GPU renderer
///
/// The engine is single-threaded; the renderer may run its own submission
/// thread internally and synchronizes with the host exclusively through the
/// monotonic timeline passed to `flush_submit` / `wait_timeline`.
pub trait GsRenderer {
    /// Shared handle to a GPU image; clones must refer to the same image.
    type Image: Clone;

    /// Submit one batched render pass.
    fn flush_rendering(&mut self, rp: &RenderPassDesc<'_, Self::Image>);

    /// Flush all pending HOST→LOCAL and LOCAL→LOCAL copies.
    fn flush_transfer(&mut self);

    /// Order overlapping copies without flushing other work.
    fn transfer_overlap_barrier(&mut self);

    /// Flush pending VRAM→texture cache uploads.
    fn flush_cache_upload(&mut self);

    /// Upload host-written pages into GPU VRAM.
    fn flush_host_vram_copy(&mut self, pages: &[u32]);

    /// Read GPU VRAM pages back into the host copy.
    fn flush_readback(&mut self, pages: &[u32]);

    /// Enqueue a VRAM copy.
    fn copy_vram(&mut self, copy: &CopyVram<'_>);

    /// Upload a palette; returns the CLUT instance id it landed in.
    fn update_palette_cache(&mut self, upload: &PaletteUpload) -> u32;

    /// Synthesize a GPU texture from VRAM for the given descriptor.
    fn create_cached_texture(&mut self, desc: &TextureDescriptor) -> Self::Image;

    /// Drop renderer state derived from the supersampling rate.
    fn invalidate_super_sampling_state(&mut self);

    /// Begin direct host access to the VRAM shadow copy.
    fn begin_host_vram_access(&mut self) -> &mut [u8];

    /// End a host write access begun with `begin_host_vram_access`.
    fn end_host_write_vram_access(&mut self);

    /// Block until the GPU timeline reaches `timeline`.
    fn wait_timeline(&mut self, timeline: u64);

    /// Submit all batched work; the timeline reaches `timeline` on completion.
    fn flush_submit(&mut self, timeline: u64);

    /// Scan out the current display registers.
    fn vsync(&mut self, privs: &PrivRegisterState, info: &VSyncInfo) -> ScanoutResult<Self::Image>;

    /// Return and reset flush counters.
    fn consume_flush_stats(&mut self) -> FlushStats;

    /// Accumulated GPU time in seconds for a timestamp category.
    fn get_accumulated_timestamps(&self, ty: TimestampType) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_super_sampling_rates() {
        assert_eq!(SuperSampling::X1.rate_log2(), (0, 0));
        assert_eq!(SuperSampling::X2.rate_log2(), (0, 1));
        assert_eq!(SuperSampling::X4.rate_log2(), (1, 1));
        assert_eq!(SuperSampling::X8.rate_log2(), (1, 2));
        assert_eq!(SuperSampling::X16.rate_log2(), (2, 2));
    }

    #[test]
    fn test_effective_rect_full() {
        let mut desc = TextureDescriptor::default();
        desc.tex0.set_tw(8);
        desc.tex0.set_th(7);
        let rect = compute_effective_texture_rect(&desc);
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 256, 128));
        assert_eq!(rect.levels, 1);
    }

    #[test]
    fn test_effective_rect_region_clamp() {
        let mut desc = TextureDescriptor::default();
        desc.tex0.set_tw(8);
        desc.tex0.set_th(8);
        desc.clamp.set_wms(WM_REGION_CLAMP);
        desc.clamp.set_minu(32);
        desc.clamp.set_maxu(95);
        let rect = compute_effective_texture_rect(&desc);
        assert_eq!(rect.x, 32);
        assert_eq!(rect.width, 64);
        assert_eq!(rect.height, 256);
    }

    #[test]
    fn test_effective_rect_levels() {
        let mut desc = TextureDescriptor::default();
        desc.tex1.set_mxl(3);
        let rect = compute_effective_texture_rect(&desc);
        assert_eq!(rect.levels, 4);
    }
}
