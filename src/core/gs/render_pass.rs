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

//! Render-pass builder
//!
//! Accumulates primitives into one coarse render pass per framebuffer
//! binding. Blend/combiner state and texture descriptors are deduplicated
//! through fingerprint maps so thousands of draws collapse into a handful of
//! indices. CLUT uploads are memoized in a sliding window because games
//! re-upload identical palettes constantly. The builder also classifies
//! framebuffer feedback and decides when the pass must flush: framebuffer
//! pointer changes, resource overflow, or hazards reported by the page
//! tracker.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::kick::ColorFeedbackMode;
use super::page_tracker::{FlushReason, FlushRequest};
use super::registers::*;
use super::renderer::*;
use super::vram::*;
use super::Gs;

/// Primitive cap per render pass
pub const MAX_PRIMITIVES_PER_FLUSH: usize = 0x4000;
/// State-vector cap per render pass
pub const MAX_STATE_VECTORS: usize = 1024;
/// Texture cap per render pass
pub const MAX_TEXTURES: usize = 1024;
/// CLUT instances available before palette uploads force a flush
pub const CLUT_INSTANCES: u32 = 1024;
/// Sliding window of memoized palette uploads
pub const NUM_MEMOIZED_PALETTES: usize = 64;

// Framebuffer swizzle tile dimensions used for binning-cost estimates.
const FB_SWIZZLE_WIDTH_LOG2: u32 = 3;
const FB_SWIZZLE_HEIGHT_LOG2: u32 = 3;

/// Empty bounding-box sentinel
pub const BB_EMPTY: [i32; 4] = [i32::MAX, i32::MAX, i32::MIN, i32::MIN];

// Dirty bits. Register writes mark these; draw kicks consume them so
// unchanged state is never re-derived on the hot path.
pub const DIRTY_DEGENERATE: u32 = 1 << 0;
pub const DIRTY_STATE: u32 = 1 << 1;
pub const DIRTY_PRIM_TEMPLATE: u32 = 1 << 2;
pub const DIRTY_TEX: u32 = 1 << 3;
pub const DIRTY_FB: u32 = 1 << 4;
pub const DIRTY_FEEDBACK: u32 = 1 << 5;
pub const DIRTY_ALL: u32 = 0x3f;

/// Dirty-flag bitset with a small typed API
#[derive(Debug, Clone, Copy, Default)]
pub struct DirtyFlags(u32);

impl DirtyFlags {
    #[inline]
    pub fn mark(&mut self, bits: u32) {
        self.0 |= bits;
    }

    #[inline]
    pub fn clear(&mut self, bits: u32) {
        self.0 &= !bits;
    }

    #[inline]
    pub fn is_set(&self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    /// Test and clear in one step
    #[inline]
    pub fn take(&mut self, bits: u32) -> bool {
        let set = self.0 & bits != 0;
        if set {
            self.0 &= !bits;
        }
        set
    }

    #[inline]
    pub fn mark_all(&mut self) {
        self.0 = DIRTY_ALL;
    }

    #[inline]
    pub fn clear_all(&mut self) {
        self.0 = 0;
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Resolved per-primitive template, rebuilt when the prim-template bit dirties
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimTemplate {
    pub tex: u32,
    pub tex2: u32,
    pub state: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TexLevel {
    pub base: u32,
    pub stride: u32,
}

/// Memoized page rects of the currently bound texture, one per mip level
#[derive(Debug, Clone, Copy, Default)]
pub struct TexPageState {
    pub rect: TextureRect,
    pub levels: [TexLevel; 7],
    pub page_rects: [PageRect; 7],
}

/// Cached derivations of the register file
pub struct StateTracker {
    pub dirty: DirtyFlags,
    pub last_state_vector: StateVector,
    pub last_state_index: u32,
    /// `u32::MAX` when no texture index is valid
    pub last_texture_index: u32,
    pub last_texture_descriptor: TextureDescriptor,
    pub degenerate_draw: bool,
    pub tex: TexPageState,
    pub prim_template: PrimTemplate,
}

impl StateTracker {
    pub fn new() -> Self {
        let mut tracker = StateTracker {
            dirty: DirtyFlags::default(),
            last_state_vector: StateVector::default(),
            last_state_index: 0,
            last_texture_index: u32::MAX,
            last_texture_descriptor: TextureDescriptor::default(),
            degenerate_draw: false,
            tex: TexPageState::default(),
            prim_template: PrimTemplate::default(),
        };
        tracker.dirty.mark_all();
        tracker
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextureMapEntry {
    pub index: u32,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct MemoizedPalette {
    upload: PaletteUpload,
    csa_mask: u32,
    clut_instance: u32,
}

/// The open render-pass accumulator
///
/// Allocated once with reserved capacity; cleared, never freed, on each flush.
pub struct RenderPassState<I> {
    pub positions: Vec<VertexPosition>,
    pub attributes: Vec<VertexAttribute>,
    pub prim: Vec<PrimitiveAttribute>,

    pub state_vectors: Vec<StateVector>,
    pub state_vector_map: HashMap<StateVector, u32>,

    pub tex_infos: Vec<TextureInfo<I>>,
    pub texture_map: HashMap<u64, TextureMapEntry>,

    memoized_palettes: Vec<MemoizedPalette>,
    pub clut_instance: u32,
    pub latest_clut_instance: u32,
    pub pending_palette_updates: u32,

    pub bb: [i32; 4],
    pub frame: Frame,
    pub zbuf: Zbuf,
    pub fb_page_width_log2: u32,
    pub fb_page_height_log2: u32,
    pub z_page_width_log2: u32,
    pub z_page_height_log2: u32,

    pub color_write_mask: u32,
    pub z_sensitive: bool,
    pub z_write: bool,
    pub has_aa1: bool,
    pub has_scanmsk: bool,

    pub has_color_feedback: bool,
    pub is_color_feedback: bool,
    pub is_potential_color_feedback: bool,
    pub is_potential_depth_feedback: bool,
    pub feedback_psm: u32,
    pub feedback_cpsm: u32,

    pub label_key: u64,
}

impl<I> RenderPassState<I> {
    pub fn new() -> Self {
        let fb_layout = psm_layout(PSMCT32);
        RenderPassState {
            positions: Vec::with_capacity(MAX_PRIMITIVES_PER_FLUSH * 3),
            attributes: Vec::with_capacity(MAX_PRIMITIVES_PER_FLUSH * 3),
            prim: Vec::with_capacity(MAX_PRIMITIVES_PER_FLUSH),
            state_vectors: Vec::new(),
            state_vector_map: HashMap::new(),
            tex_infos: Vec::new(),
            texture_map: HashMap::new(),
            memoized_palettes: Vec::with_capacity(NUM_MEMOIZED_PALETTES),
            clut_instance: 0,
            latest_clut_instance: 0,
            pending_palette_updates: 0,
            bb: BB_EMPTY,
            frame: Frame::default(),
            zbuf: Zbuf::default(),
            fb_page_width_log2: fb_layout.page_width_log2,
            fb_page_height_log2: fb_layout.page_height_log2,
            z_page_width_log2: fb_layout.page_width_log2,
            z_page_height_log2: fb_layout.page_height_log2,
            color_write_mask: 0,
            z_sensitive: false,
            z_write: false,
            has_aa1: false,
            has_scanmsk: false,
            has_color_feedback: false,
            is_color_feedback: false,
            is_potential_color_feedback: false,
            is_potential_depth_feedback: false,
            feedback_psm: 0,
            feedback_cpsm: 0,
            label_key: 0,
        }
    }

    /// Drop palette memoization (VRAM-backed palette data changed)
    pub fn forget_palette_memoization(&mut self) {
        self.memoized_palettes.clear();
    }

    pub fn num_memoized_palettes(&self) -> usize {
        self.memoized_palettes.len()
    }
}

fn hash_texture_descriptor(desc: &TextureDescriptor) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    desc.tex0.0.hash(&mut hasher);
    desc.tex1.0.hash(&mut hasher);
    desc.texa.0.hash(&mut hasher);
    desc.miptbp1_3.0.hash(&mut hasher);
    desc.miptbp4_6.0.hash(&mut hasher);
    desc.clamp.0.hash(&mut hasher);
    // The palette bank must be part of the key: the same texture sampled
    // through different palettes has to keep distinct cache entries alive for
    // the duration of the pass.
    (desc.palette_bank as u64).hash(&mut hasher);
    hasher.finish()
}

/// Does the texture's block range straddle the FB or Z base?
///
/// Games sometimes declare a huge texture (e.g. 1024x1024 32-bit covers all of
/// VRAM) without sampling anywhere near the frame buffer. Flag it as potential
/// feedback so the hazard rect can be clamped to the pre-FB region instead of
/// producing false invalidations.
fn compute_has_potential_feedback(
    tex0: Tex0,
    fb_base_page: u32,
    z_base_page: u32,
    vram_pages: u32,
) -> (bool, bool) {
    let width = 1u32 << tex0.tw();
    let height = 1u32 << tex0.th();
    let rect = compute_page_rect(tex0.tbp0(), 0, 0, width, height, tex0.tbw(), tex0.psm());
    let span = rect.page_stride * (rect.page_height - 1) + rect.page_width;
    let tex_base = tex0.tbp0() / BLOCKS_PER_PAGE;

    let in_range = |base: u32| {
        let rel = base.wrapping_sub(tex_base) & (vram_pages - 1);
        rel > 0 && rel < span
    };

    (in_range(fb_base_page), in_range(z_base_page))
}

impl<R: GsRenderer> Gs<R> {
    /// Drop render-pass texture indices for invalidated cache entries
    pub(crate) fn apply_texture_invalidation(&mut self, hashes: &[u64]) {
        if hashes.is_empty() {
            return;
        }
        for hash in hashes {
            if let Some(entry) = self.render_pass.texture_map.get_mut(hash) {
                entry.valid = false;
            }
        }
        self.mark_texture_state_dirty();
    }

    pub(crate) fn mark_texture_state_dirty(&mut self) {
        self.state_tracker.last_texture_index = u32::MAX;
        self.state_tracker
            .dirty
            .mark(DIRTY_PRIM_TEMPLATE | DIRTY_TEX);
    }

    /// Flush the render pass if FRAME or ZBUF moved in a meaningful way
    ///
    /// A Z buffer change without any Z-sensitive draw in flight does not need
    /// a flush; the binding is simply replaced.
    pub(crate) fn check_frame_buffer_state(&mut self) {
        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];

        if !self.state_tracker.dirty.take(DIRTY_FB) {
            debug_assert_eq!(self.render_pass.frame.low_word(), ctx.frame.low_word());
            debug_assert_eq!(self.render_pass.zbuf.psm(), ctx.zbuf.psm());
            debug_assert_eq!(self.render_pass.zbuf.zbp(), ctx.zbuf.zbp());
            return;
        }

        let fb_delta = self.render_pass.frame.low_word() != ctx.frame.low_word();
        let z_delta = self.render_pass.zbuf.psm() != ctx.zbuf.psm()
            || self.render_pass.zbuf.zbp() != ctx.zbuf.zbp();

        if !self.render_pass.prim.is_empty()
            && (fb_delta || (self.render_pass.z_sensitive && z_delta))
        {
            self.flush_pending_transfer(true);
            let flags = self.tracker.flush_render_pass();
            self.run_flush(FlushRequest {
                flags,
                reason: FlushReason::FBPointer,
            });
        }

        if fb_delta {
            let layout = psm_layout(ctx.frame.psm());
            self.render_pass.fb_page_width_log2 = layout.page_width_log2;
            self.render_pass.fb_page_height_log2 = layout.page_height_log2;
            self.render_pass.frame = ctx.frame;
        }

        if z_delta {
            let layout = psm_layout(ctx.zbuf.psm());
            self.render_pass.z_page_width_log2 = layout.page_width_log2;
            self.render_pass.z_page_height_log2 = layout.page_height_log2;
            self.render_pass.zbuf = ctx.zbuf;
        }
    }

    /// Page footprint of the pass bounding box on the color buffer
    pub(crate) fn compute_fb_rect(&self, bb: [i32; 4]) -> PageRect {
        let wl = self.render_pass.fb_page_width_log2;
        let hl = self.render_pass.fb_page_height_log2;
        let x0 = (bb[0] >> wl) as u32;
        let y0 = (bb[1] >> hl) as u32;
        let x1 = (bb[2] >> wl) as u32;
        let y1 = (bb[3] >> hl) as u32;
        let stride = self.render_pass.frame.fbw();

        PageRect {
            base_page: self.render_pass.frame.fbp() + x0 + y0 * stride,
            page_width: x1 - x0 + 1,
            page_height: y1 - y0 + 1,
            page_stride: stride,
            block_mask: !0u32,
            write_mask: psm_word_write_mask(self.render_pass.frame.psm()),
        }
    }

    /// Page footprint of the pass bounding box on the depth buffer
    pub(crate) fn compute_z_rect(&self, bb: [i32; 4]) -> PageRect {
        let wl = self.render_pass.z_page_width_log2;
        let hl = self.render_pass.z_page_height_log2;
        let x0 = (bb[0] >> wl) as u32;
        let y0 = (bb[1] >> hl) as u32;
        let x1 = (bb[2] >> wl) as u32;
        let y1 = (bb[3] >> hl) as u32;
        let stride = self.render_pass.frame.fbw();

        PageRect {
            base_page: self.render_pass.zbuf.zbp() + x0 + y0 * stride,
            page_width: x1 - x0 + 1,
            page_height: y1 - y0 + 1,
            page_stride: stride,
            block_mask: !0u32,
            write_mask: psm_word_write_mask(self.render_pass.zbuf.psm()),
        }
    }

    /// Re-derive whether the bound texture aliases the frame buffer
    pub(crate) fn update_color_feedback_state(&mut self) {
        if !self.state_tracker.dirty.take(DIRTY_FEEDBACK) {
            // In feedback, state must be rechecked on every draw anyway; the
            // FB is expected to flush constantly.
            if self.render_pass.is_color_feedback {
                self.state_tracker
                    .dirty
                    .mark(DIRTY_PRIM_TEMPLATE | DIRTY_TEX);
            }
            return;
        }

        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];
        self.render_pass.is_color_feedback = false;
        self.render_pass.is_potential_color_feedback = false;
        self.render_pass.is_potential_depth_feedback = false;

        if prim.tme() == 0 {
            return;
        }

        // Region-repeat addressing is too messy to analyze.
        if ctx.clamp.wms() == WM_REGION_REPEAT || ctx.clamp.wmt() == WM_REGION_REPEAT {
            return;
        }

        if ctx.tex1.has_mipmap() {
            return;
        }

        let tex_psm = ctx.tex0.psm();

        if ctx.tex0.tbp0() != ctx.frame.fbp() * BLOCKS_PER_PAGE {
            let vram_pages = (self.vram_size as u32) / PAGE_SIZE;
            let (potential_color, potential_depth) = compute_has_potential_feedback(
                ctx.tex0,
                ctx.frame.fbp(),
                ctx.zbuf.zbp(),
                vram_pages,
            );

            // z_write alone is not enough; this runs before Z state commits.
            let has_z_write = self.render_pass.z_write
                || (self.state_is_z_sensitive() && ctx.zbuf.zmsk() == 0);

            let tex_write_mask = psm_word_write_mask(tex_psm);
            let fb_write_mask = psm_word_write_mask(self.render_pass.frame.psm());
            let z_write_mask = psm_word_write_mask(self.render_pass.zbuf.psm());

            // Aliasing 8H over 24-bit color is word-disjoint and harmless.
            self.render_pass.is_potential_color_feedback =
                potential_color && tex_write_mask & fb_write_mask != 0;
            self.render_pass.is_potential_depth_feedback =
                potential_depth && tex_write_mask & z_write_mask != 0 && has_z_write;

            return;
        }

        if ctx.tex0.tbw() != ctx.frame.fbw() {
            return;
        }

        // Feedback assumes identical bpp and swizzle layout.
        if swizzle_compat_key(tex_psm) != swizzle_compat_key(ctx.frame.psm()) {
            return;
        }

        let width = 1u32 << ctx.tex0.tw();
        let height = 1u32 << ctx.tex0.th();

        // The texture must cover the whole frame buffer.
        if ctx.frame.fbw() * BUFFER_WIDTH_SCALE > width {
            return;
        }

        // There is no framebuffer height; deduce it from the scissor.
        if ctx.scissor.scay1() >= height {
            return;
        }

        self.render_pass.is_color_feedback = true;
        self.state_tracker
            .dirty
            .mark(DIRTY_PRIM_TEMPLATE | DIRTY_TEX);
    }

    /// Recompute the bound texture's page rects and mark the reads
    pub(crate) fn update_texture_page_rects_and_read(&mut self) {
        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];
        let psm = ctx.tex0.psm();
        let levels = self.state_tracker.tex.rect.levels as usize;

        for level in 0..levels {
            let rect;
            if self.render_pass.is_potential_color_feedback
                || self.render_pass.is_potential_depth_feedback
            {
                debug_assert_eq!(levels, 1);
                let vram_pages = (self.vram_size as u32) / PAGE_SIZE;
                let tex_base_page = ctx.tex0.tbp0() / BLOCKS_PER_PAGE;

                // Clamp the hazard region so the straddling tail of the
                // texture does not falsely invalidate it.
                let mut clamped = PageRect {
                    base_page: tex_base_page,
                    page_width: vram_pages,
                    page_height: 1,
                    page_stride: 0,
                    block_mask: !0u32,
                    write_mask: !0u32,
                };

                if self.render_pass.is_potential_color_feedback {
                    let mut fb_base = self.registers.ctx[prim.ctxt() as usize].frame.fbp();
                    if fb_base <= tex_base_page {
                        fb_base += vram_pages;
                    }
                    clamped.page_width = clamped.page_width.min(fb_base - tex_base_page);
                }

                if self.render_pass.is_potential_depth_feedback {
                    let mut z_base = self.registers.ctx[prim.ctxt() as usize].zbuf.zbp();
                    if z_base <= tex_base_page {
                        z_base += vram_pages;
                    }
                    clamped.page_width = clamped.page_width.min(z_base - tex_base_page);
                }

                rect = clamped;
            } else {
                let tex = &self.state_tracker.tex;
                rect = compute_page_rect(
                    tex.levels[level].base,
                    tex.rect.x >> level,
                    tex.rect.y >> level,
                    (tex.rect.width >> level).max(1),
                    (tex.rect.height >> level).max(1),
                    tex.levels[level].stride,
                    psm,
                );
            }

            self.state_tracker.tex.page_rects[level] = rect;
            if let Some(req) = self.tracker.mark_texture_read(&rect) {
                self.run_flush(req);
            }
        }
    }

    /// Re-mark reads of the already-resolved texture page rects
    pub(crate) fn texture_page_rects_read(&mut self) {
        let levels = self.state_tracker.tex.rect.levels as usize;
        for level in 0..levels {
            let rect = self.state_tracker.tex.page_rects[level];
            if let Some(req) = self.tracker.mark_texture_read(&rect) {
                self.run_flush(req);
            }
        }
    }

    fn find_or_place_unique_state_vector(&mut self, state: StateVector) -> u32 {
        // Fast path: same vector as the previous draw.
        if !self.render_pass.state_vectors.is_empty()
            && state == self.state_tracker.last_state_vector
        {
            return self.state_tracker.last_state_index;
        }

        let state_index = match self.render_pass.state_vector_map.get(&state) {
            Some(&index) => index,
            None => {
                let index = self.render_pass.state_vectors.len() as u32;
                self.render_pass.state_vectors.push(state);
                self.render_pass.state_vector_map.insert(state, index);
                index
            }
        };

        self.state_tracker.last_state_vector = state;
        self.state_tracker.last_state_index = state_index;
        state_index
    }

    /// Build the blend/combiner state vector for the current registers
    pub(crate) fn drawing_kick_update_state_vector(&mut self) -> u32 {
        if !self.state_tracker.dirty.take(DIRTY_STATE) {
            return self.state_tracker.last_state_index;
        }

        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];

        let mut state = StateVector::default();

        if self.registers.dthe.dthe() != 0 {
            state.blend_mode |= BLEND_MODE_DTHE_BIT;
            state.dimx = [
                self.registers.dimx.low_word(),
                self.registers.dimx.high_word(),
            ];
        }

        // An ALWAYS-pass alpha test is meaningless.
        if ctx.test.ate() != 0 && ctx.test.atst() != ATST_ALWAYS {
            state.blend_mode |= BLEND_MODE_ATE_BIT;
            state.blend_mode |= ctx.test.atst() << BLEND_MODE_ATE_MODE_OFFSET;
            state.blend_mode |= ctx.test.afail() << BLEND_MODE_AFAIL_MODE_OFFSET;
        }

        if ctx.test.date() != 0 {
            state.blend_mode |= BLEND_MODE_DATE_BIT;
        }
        if ctx.test.datm() != 0 {
            state.blend_mode |= BLEND_MODE_DATM_BIT;
        }

        // AA1 seems to imply alpha blending.
        if prim.abe() != 0 || prim.aa1() != 0 {
            state.blend_mode |= ctx.alpha.a() << BLEND_MODE_A_MODE_OFFSET;
            state.blend_mode |= ctx.alpha.b() << BLEND_MODE_B_MODE_OFFSET;
            state.blend_mode |= ctx.alpha.c() << BLEND_MODE_C_MODE_OFFSET;
            state.blend_mode |= ctx.alpha.d() << BLEND_MODE_D_MODE_OFFSET;
        }

        if prim.abe() != 0 {
            state.blend_mode |= BLEND_MODE_ABE_BIT;
        }
        if self.registers.pabe.pabe() != 0 {
            state.blend_mode |= BLEND_MODE_PABE_BIT;
        }
        if self.registers.colclamp.clamp() != 0 {
            state.blend_mode |= BLEND_MODE_COLCLAMP_BIT;
        }
        if ctx.fba.fba() != 0 {
            state.blend_mode |= BLEND_MODE_FB_ALPHA_BIT;
        }

        if prim.tme() != 0 {
            state.combiner |= COMBINER_TME_BIT;
            if ctx.tex0.tcc() != 0 {
                state.combiner |= COMBINER_TCC_BIT;
            }
            state.combiner |= ctx.tex0.tfx() << COMBINER_MODE_OFFSET;
        }

        if prim.fge() != 0 {
            state.combiner |= COMBINER_FOG_BIT;
        }

        self.find_or_place_unique_state_vector(state)
    }

    fn mark_render_pass_has_texture_feedback(&mut self, tex0: Tex0) {
        if self.render_pass.has_color_feedback {
            let psm_delta = tex0.psm() != self.render_pass.feedback_psm;
            let cpsm_delta = is_palette_format(self.render_pass.feedback_psm)
                && self.render_pass.feedback_cpsm != tex0.cpsm();
            if psm_delta || cpsm_delta {
                // A pass records a single feedback format pair.
                let flags = self.tracker.flush_render_pass();
                self.run_flush(FlushRequest {
                    flags,
                    reason: FlushReason::TextureHazard,
                });
            }
        }

        if !self.render_pass.has_color_feedback {
            self.render_pass.has_color_feedback = true;
            self.render_pass.feedback_psm = tex0.psm();
            self.render_pass.feedback_cpsm = if is_palette_format(tex0.psm()) {
                tex0.cpsm()
            } else {
                0
            };
        }
    }

    /// Resolve the texture index for the current draw
    pub(crate) fn drawing_kick_update_texture(
        &mut self,
        feedback_mode: ColorFeedbackMode,
        uv_bb: [i32; 4],
        bb: [i32; 4],
    ) -> u32 {
        if !self.state_tracker.dirty.take(DIRTY_TEX) {
            debug_assert_ne!(self.state_tracker.last_texture_index, u32::MAX);
            return self.state_tracker.last_texture_index;
        }

        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];

        if feedback_mode == ColorFeedbackMode::Pixel {
            self.mark_render_pass_has_texture_feedback(ctx.tex0);
            // On-tile feedback: no image, no hazard. The index field encodes
            // the CLUT instance and sub-bank under the feedback sentinel bit.
            return TEX_FEEDBACK_INDEX_BIT | (self.render_pass.clut_instance * 32 + ctx.tex0.csa());
        }

        let mut desc = TextureDescriptor {
            tex0: ctx.tex0,
            tex1: ctx.tex1,
            clamp: ctx.clamp,
            ..TextureDescriptor::default()
        };

        let psm = desc.tex0.psm();
        let cpsm = desc.tex0.cpsm();
        let mut csa_mask = 0u32;

        if is_palette_format(psm) {
            desc.palette_bank = self.render_pass.clut_instance;
            desc.latest_palette_bank = self.render_pass.latest_clut_instance;

            // Only CT32 and CT16(S) palettes exist; 16-bit needs TEXA.
            if cpsm != PSMCT32 {
                desc.texa = self.registers.texa;
            }

            csa_mask = if psm == PSMT8 || psm == PSMT8H {
                0xffff
            } else {
                1
            };
            csa_mask <<= desc.tex0.csa();
            if cpsm == PSMCT32 {
                csa_mask |= csa_mask << 16;
            }
        } else {
            // Palette state is meaningless; normalize it out of the key.
            desc.tex0.set_cpsm(0);
            desc.tex0.set_csa(0);
            if psm != PSMCT32 && psm != PSMZ32 {
                desc.texa = self.registers.texa;
            }
        }

        // Only affects shading.
        desc.tex0.set_tcc(0);
        desc.tex0.set_tfx(0);

        // Only affects the palette upload.
        desc.tex0.set_cbp(0);
        desc.tex0.set_csm(0);
        desc.tex0.set_cld(0);

        // In feedback scenarios with overlap between the UV BB and the render
        // BB, hazard tracking is suspended unless the draw pattern proves the
        // regions disjoint.
        let mut cache_texture = true;

        if feedback_mode == ColorFeedbackMode::Sliced {
            if prim.prim() == super::kick::PRIM_SPRITE {
                // Sprite feedback is almost always an explicit mip/blur chain;
                // cache those. The case to avoid is random triangle soup.
                cache_texture = true;
            } else if desc.clamp.wms() == WM_REGION_CLAMP && desc.clamp.wmt() == WM_REGION_CLAMP {
                let clamp_bb = [
                    desc.clamp.minu() as i32,
                    desc.clamp.minv() as i32,
                    desc.clamp.maxu() as i32,
                    desc.clamp.maxv() as i32,
                ];
                let hazard_bb = [
                    clamp_bb[0].max(bb[0]),
                    clamp_bb[1].max(bb[1]),
                    clamp_bb[2].min(bb[2]),
                    clamp_bb[3].min(bb[3]),
                ];
                cache_texture = hazard_bb[0] > hazard_bb[2] || hazard_bb[1] > hazard_bb[3];
            } else {
                // Doing this correctly means emulating the real texture cache
                // exactly. Not caching is the safe call.
                cache_texture = false;
            }
        }

        if feedback_mode == ColorFeedbackMode::Sliced
            && cache_texture
            && !desc.clamp.has_horizontal_repeat()
            && !desc.clamp.has_vertical_repeat()
        {
            // The texture is discarded right away, so narrow it to the UV BB
            // to reduce upload cost.
            if desc.clamp.wms() == WM_REGION_CLAMP {
                let minu = (desc.clamp.minu() as i32).max(uv_bb[0].min(desc.clamp.maxu() as i32));
                let maxu = (desc.clamp.maxu() as i32).min(uv_bb[2].max(desc.clamp.minu() as i32));
                desc.clamp.set_minu(minu as u32);
                desc.clamp.set_maxu(maxu as u32);
            } else {
                desc.clamp.set_wms(WM_REGION_CLAMP);
                desc.clamp.set_minu(uv_bb[0].max(0) as u32);
                desc.clamp.set_maxu(uv_bb[2].max(0) as u32);
            }

            if desc.clamp.wmt() == WM_REGION_CLAMP {
                let minv = (desc.clamp.minv() as i32).max(uv_bb[1].min(desc.clamp.maxv() as i32));
                let maxv = (desc.clamp.maxv() as i32).min(uv_bb[3].max(desc.clamp.minv() as i32));
                desc.clamp.set_minv(minv as u32);
                desc.clamp.set_maxv(maxv as u32);
            } else {
                desc.clamp.set_wmt(WM_REGION_CLAMP);
                desc.clamp.set_minv(uv_bb[1].max(0) as u32);
                desc.clamp.set_maxv(uv_bb[3].max(0) as u32);
            }
        } else {
            // Normalize unused region bounds so clamp-mode variants do not
            // create duplicate textures.
            if !desc.clamp.has_horizontal_region() {
                desc.clamp.set_minu(0);
                desc.clamp.set_maxu(0);
                desc.clamp.set_wms(WM_CLAMP);
            }
            if !desc.clamp.has_vertical_region() {
                desc.clamp.set_minv(0);
                desc.clamp.set_maxv(0);
                desc.clamp.set_wmt(WM_CLAMP);
            }
        }

        let width = 1u32 << desc.tex0.tw();
        let height = 1u32 << desc.tex0.th();

        // No point uploading mips that are never sampled.
        if !desc.tex1.mmin_has_mipmap() {
            desc.tex1.set_mxl(0);
        }

        desc.rect = compute_effective_texture_rect(&desc);
        self.state_tracker.tex.rect = desc.rect;
        self.state_tracker.tex.levels[0] = TexLevel {
            base: desc.tex0.tbp0(),
            stride: desc.tex0.tbw(),
        };

        let miptbl_1_3 = ctx.miptbl_1_3;
        let miptbl_4_6 = ctx.miptbl_4_6;
        let levels = desc.rect.levels;
        if levels >= 2 {
            desc.miptbp1_3.set_tbp1(miptbl_1_3.tbp1());
            desc.miptbp1_3.set_tbw1(miptbl_1_3.tbw1());
            self.state_tracker.tex.levels[1] = TexLevel {
                base: miptbl_1_3.tbp1(),
                stride: miptbl_1_3.tbw1(),
            };
        }
        if levels >= 3 {
            desc.miptbp1_3.set_tbp2(miptbl_1_3.tbp2());
            desc.miptbp1_3.set_tbw2(miptbl_1_3.tbw2());
            self.state_tracker.tex.levels[2] = TexLevel {
                base: miptbl_1_3.tbp2(),
                stride: miptbl_1_3.tbw2(),
            };
        }
        if levels >= 4 {
            desc.miptbp1_3.set_tbp3(miptbl_1_3.tbp3());
            desc.miptbp1_3.set_tbw3(miptbl_1_3.tbw3());
            self.state_tracker.tex.levels[3] = TexLevel {
                base: miptbl_1_3.tbp3(),
                stride: miptbl_1_3.tbw3(),
            };
        }
        if levels >= 5 {
            desc.miptbp4_6.set_tbp1(miptbl_4_6.tbp1());
            desc.miptbp4_6.set_tbw1(miptbl_4_6.tbw1());
            self.state_tracker.tex.levels[4] = TexLevel {
                base: miptbl_4_6.tbp1(),
                stride: miptbl_4_6.tbw1(),
            };
        }
        if levels >= 6 {
            desc.miptbp4_6.set_tbp2(miptbl_4_6.tbp2());
            desc.miptbp4_6.set_tbw2(miptbl_4_6.tbw2());
            self.state_tracker.tex.levels[5] = TexLevel {
                base: miptbl_4_6.tbp2(),
                stride: miptbl_4_6.tbw2(),
            };
        }
        if levels >= 7 {
            desc.miptbp4_6.set_tbp3(miptbl_4_6.tbp3());
            desc.miptbp4_6.set_tbw3(miptbl_4_6.tbw3());
            self.state_tracker.tex.levels[6] = TexLevel {
                base: miptbl_4_6.tbp3(),
                stride: miptbl_4_6.tbw3(),
            };
        }

        // Only affects shading.
        desc.tex1.set_lcm(0);
        desc.tex1.set_mmag(0);
        desc.tex1.set_mmin(0);
        desc.tex1.set_mtba(0);
        desc.tex1.set_l(0);
        desc.tex1.set_k(0);

        // May flush the render pass on a hazard.
        if cache_texture {
            self.update_texture_page_rects_and_read();
        }

        // After a cache invalidation the last index is poisoned and a full
        // re-check is required.
        if self.state_tracker.last_texture_index != u32::MAX
            && !self.render_pass.tex_infos.is_empty()
            && self.state_tracker.last_texture_descriptor == desc
        {
            return self.state_tracker.last_texture_index;
        }

        let hash = hash_texture_descriptor(&desc);
        let cached = self.render_pass.texture_map.get(&hash).copied();

        let texture_index = if let Some(entry) = cached.filter(|e| e.valid) {
            entry.index
        } else {
            // Without page-tracker caching, hazard tracking still has to see
            // the first read from VRAM. Subsequent reads of this texture then
            // bypass it.
            if !cache_texture {
                self.update_texture_page_rects_and_read();
            }

            let image = match self.tracker.find_cached_texture(hash) {
                Some(image) => image,
                None => {
                    desc.hash = hash;
                    let image = self.renderer.create_cached_texture(&desc);
                    if cache_texture {
                        let levels = self.state_tracker.tex.rect.levels as usize;
                        let level_rects = &self.state_tracker.tex.page_rects[..levels];
                        self.tracker.register_cached_texture(
                            level_rects,
                            csa_mask,
                            self.render_pass.clut_instance,
                            hash,
                            image.clone(),
                        );
                    }
                    image
                }
            };

            let index = self.render_pass.tex_infos.len() as u32;
            self.render_pass.texture_map.insert(
                hash,
                TextureMapEntry {
                    index,
                    valid: true,
                },
            );

            let sizes = [
                width as f32,
                height as f32,
                1.0 / desc.rect.width as f32,
                1.0 / desc.rect.height as f32,
            ];
            let mut region = [0.0f32; 4];
            if desc.clamp.wms() == WM_CLAMP {
                region[0] = 0.0;
                region[2] = desc.rect.width as f32 - 1.0;
            } else if desc.clamp.wms() == WM_REGION_CLAMP {
                region[0] = desc.clamp.minu() as f32;
                region[2] = desc.clamp.maxu() as f32;
            }
            if desc.clamp.wmt() == WM_CLAMP {
                region[1] = 0.0;
                region[3] = desc.rect.height as f32 - 1.0;
            } else if desc.clamp.wmt() == WM_REGION_CLAMP {
                region[1] = desc.clamp.minv() as f32;
                region[3] = desc.clamp.maxv() as f32;
            }

            self.render_pass.tex_infos.push(TextureInfo {
                image,
                sizes,
                region,
                bias: [
                    -(desc.rect.x as f32) * sizes[2],
                    -(desc.rect.y as f32) * sizes[3],
                ],
            });

            index
        };

        self.state_tracker.last_texture_descriptor = desc;
        self.state_tracker.last_texture_index = texture_index;
        texture_index
    }

    /// Rebuild the primitive template if anything it derives from changed
    pub(crate) fn drawing_kick_update_state(
        &mut self,
        feedback_mode: ColorFeedbackMode,
        uv_bb: [i32; 4],
        bb: [i32; 4],
    ) {
        if !self.state_tracker.dirty.take(DIRTY_PRIM_TEMPLATE) {
            return;
        }

        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];

        let mut tpl = PrimTemplate::default();

        if prim.tme() != 0 {
            let index = self.drawing_kick_update_texture(feedback_mode, uv_bb, bb);
            tpl.tex = index << TEX_TEXTURE_INDEX_OFFSET;
            if ctx.tex1.mmag() == MAG_LINEAR {
                tpl.tex |= TEX_SAMPLER_MAG_LINEAR_BIT;
            }
            if ctx.clamp.has_horizontal_clamp() {
                tpl.tex |= TEX_SAMPLER_CLAMP_S_BIT;
            }
            if ctx.clamp.has_vertical_clamp() {
                tpl.tex |= TEX_SAMPLER_CLAMP_T_BIT;
            }

            match ctx.tex1.mmin() {
                MAG_LINEAR => tpl.tex |= TEX_SAMPLER_MIN_LINEAR_BIT,
                MMIN_NEAREST_MIPMAP_LINEAR => tpl.tex |= TEX_SAMPLER_MIPMAP_LINEAR_BIT,
                MMIN_LINEAR_MIPMAP_NEAREST => tpl.tex |= TEX_SAMPLER_MIN_LINEAR_BIT,
                MMIN_LINEAR_MIPMAP_LINEAR => {
                    tpl.tex |= TEX_SAMPLER_MIN_LINEAR_BIT | TEX_SAMPLER_MIPMAP_LINEAR_BIT
                }
                _ => {}
            }

            tpl.tex2 = ctx.tex1.lcm() << TEX2_FIXED_LOD_OFFSET;
            tpl.tex2 |= ctx.tex1.l() << TEX2_L_OFFSET;
            tpl.tex2 |= ctx.tex1.k() << TEX2_K_OFFSET;
            if ctx.tex1.mmin_has_mipmap() {
                tpl.tex |= ctx.tex1.mxl() << TEX_MAX_MIP_LEVEL_OFFSET;
            }
        }

        // State vector resolves after the texture: a texture hazard may have
        // flushed the pass and reset the state vectors.
        tpl.state = self.drawing_kick_update_state_vector() << STATE_INDEX_BIT_OFFSET;

        if ctx.test.zte() == ZTE_ENABLED {
            if ctx.test.has_z_test() {
                tpl.state |= 1 << STATE_BIT_Z_TEST;
                if ctx.test.ztst() == ZTST_GREATER {
                    tpl.state |= 1 << STATE_BIT_Z_TEST_GREATER;
                }
            }
            if ctx.zbuf.zmsk() == 0 {
                tpl.state |= 1 << STATE_BIT_Z_WRITE;
            }
        }

        let mut color_write_needs_previous_pixels = false;

        // AA1 implies blending of some sort.
        if prim.abe() != 0 || prim.aa1() != 0 {
            // Any blend factor reading the destination makes the draw
            // non-opaque.
            if ctx.alpha.a() == BLEND_RGB_DEST
                || ctx.alpha.b() == BLEND_RGB_DEST
                || ctx.alpha.c() == BLEND_ALPHA_DEST
                || ctx.alpha.d() == BLEND_RGB_DEST
            {
                color_write_needs_previous_pixels = true;
            }
        }

        // Any pixel test or partial write mask cannot be opaque.
        if (ctx.test.ate() != 0 && ctx.test.atst() != ATST_ALWAYS)
            || ctx.test.date() != 0
            || ctx.frame.fbmsk() != 0
        {
            color_write_needs_previous_pixels = true;
        }

        // In feedback, sampling the FB is effectively blending.
        if self.render_pass.is_color_feedback {
            color_write_needs_previous_pixels = true;
        }

        if !color_write_needs_previous_pixels {
            tpl.state |= 1 << STATE_BIT_OPAQUE;
        }

        if prim.aa1() != 0 {
            tpl.state |= 1 << STATE_BIT_MULTISAMPLE;
            self.render_pass.has_aa1 = true;
        }

        if self.registers.scanmsk.has_mask() {
            tpl.state |=
                1 << (STATE_BIT_SCANMSK_EVEN + self.registers.scanmsk.msk() - MSK_SKIP_EVEN);
            self.render_pass.has_scanmsk = true;
        }

        if prim.fst() == 0 {
            tpl.state |= 1 << STATE_BIT_PERSPECTIVE;
        }
        if prim.iip() != 0 {
            tpl.state |= 1 << STATE_BIT_IIP;
        }
        if prim.fix() != 0 {
            tpl.state |= 1 << STATE_BIT_FIX;
        }

        self.state_tracker.prim_template = tpl;
    }

    /// TEX0 write side effects: CLUT upload handling
    pub(crate) fn handle_tex0_write(&mut self, ctx_index: usize) {
        self.handle_clut_upload(ctx_index);
    }

    /// Auto-generate MIPTBP1 from TEX0 when TEX1.MTBA is set
    pub(crate) fn handle_miptbl_gen(&mut self, ctx_index: usize) {
        let tex0 = self.registers.ctx[ctx_index].tex0;
        let tex1 = self.registers.ctx[ctx_index].tex1;

        if tex1.mtba() == 0 {
            return;
        }

        let width = 1u32 << tex0.tw();
        let height = 1u32 << tex0.th();
        let layout = psm_layout(tex0.psm());
        let mut num_blocks = (width >> layout.block_width_log2) * (height >> layout.block_height_log2);
        let mut base = tex0.tbp0() + num_blocks;
        let mut row_length_64 = (width / 64) / 2;
        num_blocks /= 4;

        let miptbl = &mut self.registers.ctx[ctx_index].miptbl_1_3;
        miptbl.set_tbp1(base);
        miptbl.set_tbw1(row_length_64);
        base += num_blocks;

        num_blocks /= 4;
        row_length_64 /= 2;
        miptbl.set_tbp2(base);
        miptbl.set_tbw2(row_length_64);
        base += num_blocks;

        miptbl.set_tbp3(base);
        miptbl.set_tbw3(row_length_64);

        self.state_tracker
            .dirty
            .mark(DIRTY_TEX | DIRTY_PRIM_TEMPLATE);
    }

    /// Decode CLD and run the palette pipeline for a TEX0 write
    pub(crate) fn handle_clut_upload(&mut self, ctx_index: usize) {
        let tex0 = self.registers.ctx[ctx_index].tex0;
        let cld = tex0.cld();

        let load_clut = match cld {
            CLD_LOAD => true,
            CLD_LOAD_WRITE_CBP0 | CLD_LOAD_WRITE_CBP1 => {
                self.registers.cached_cbp[(cld & 1) as usize] = tex0.cbp();
                true
            }
            CLD_COMPARE_LOAD_CBP0 | CLD_COMPARE_LOAD_CBP1 => {
                let slot = (cld & 1) as usize;
                let load = self.registers.cached_cbp[slot] != tex0.cbp();
                self.registers.cached_cbp[slot] = tex0.cbp();
                load
            }
            _ => false,
        };

        if !load_clut {
            return;
        }

        // The CLUT read may depend on an in-flight partial transfer; the
        // HWREG writes technically land in VRAM immediately.
        if self.has_unflushed_partial_transfer() {
            log::warn!("Flushing partial transfer due to palette read");
            self.flush_pending_transfer(true);
        }

        let psm = tex0.psm();
        let cpsm = tex0.cpsm();
        let is_8bit_palette = psm == PSMT8 || psm == PSMT8H;

        let (palette_width, palette_height) = if is_8bit_palette {
            if tex0.csm() != CSM_LAYOUT_RECT {
                (256, 1)
            } else {
                (16, 16)
            }
        } else if tex0.csm() != CSM_LAYOUT_RECT {
            (16, 1)
        } else {
            (8, 4)
        };

        let mut csa_mask: u32 = if is_8bit_palette {
            0xffff
        } else {
            1 << tex0.csa()
        };
        // 32-bit color reads the upper CLUT bank as well.
        if cpsm == PSMCT32 {
            csa_mask |= csa_mask << 16;
        }

        let texclut = self.registers.texclut;
        let (x_offset, y_offset) = if tex0.csm() == CSM_LAYOUT_LINE {
            (texclut.cou() * COU_SCALE, texclut.cov())
        } else {
            (0, 0)
        };

        let clut_rect = PageRectClut {
            rect: compute_page_rect(
                tex0.cbp(),
                x_offset,
                y_offset,
                palette_width,
                palette_height,
                texclut.cbw(),
                cpsm,
            ),
            csa_mask,
        };

        if let Some(req) = self.tracker.mark_texture_read(&clut_rect.rect) {
            self.run_flush(req);
        }
        if self
            .tracker
            .register_cached_clut_clobber(&clut_rect, self.render_pass.clut_instance)
        {
            self.mark_texture_state_dirty();
        }

        // Queue up the palette upload with non-contributing fields zeroed.
        let mut upload = PaletteUpload {
            tex0,
            texclut,
        };
        upload.tex0.set_tbp0(0);
        upload.tex0.set_tfx(0);
        upload.tex0.set_tw(0);
        upload.tex0.set_th(0);
        upload.tex0.set_tcc(0);
        upload.tex0.set_tbw(0);
        upload.tex0.set_cld(0);
        // CSA seems to be ignored on upload in 256-color mode.
        if is_8bit_palette {
            upload.tex0.set_csa(0);
        }

        // Look for a memoized palette; games re-upload identical CLUTs
        // constantly and this is a very important optimization.
        let num_memoized = self.render_pass.memoized_palettes.len();
        for i in (0..num_memoized).rev() {
            let memoized = self.render_pass.memoized_palettes[i];

            // A later upload wrote banks outside this mask: diverging
            // history, stop searching.
            if memoized.csa_mask & !csa_mask != 0 {
                break;
            }

            if memoized.csa_mask == csa_mask && memoized.upload == upload {
                if memoized.clut_instance != self.render_pass.clut_instance {
                    self.mark_texture_state_dirty();
                }
                self.render_pass.clut_instance = memoized.clut_instance;

                // Move to the most-recent slot.
                if i + 1 < num_memoized {
                    self.render_pass.memoized_palettes.remove(i);
                    self.render_pass.memoized_palettes.push(memoized);
                }
                return;
            }
        }

        let instance = self.renderer.update_palette_cache(&upload);
        self.render_pass.clut_instance = instance;
        self.render_pass.latest_clut_instance = instance;
        self.render_pass.pending_palette_updates += 1;
        self.mark_texture_state_dirty();

        // Maintain the sliding window.
        if self.render_pass.memoized_palettes.len() == NUM_MEMOIZED_PALETTES {
            self.render_pass.memoized_palettes.remove(0);
        }
        self.render_pass.memoized_palettes.push(MemoizedPalette {
            upload,
            csa_mask,
            clut_instance: instance,
        });

        log::trace!(
            "CLUT upload memoized: instance {} csa_mask {:#x}",
            instance,
            csa_mask
        );

        if self.render_pass.pending_palette_updates >= CLUT_INSTANCES {
            let flags = self.tracker.flush_render_pass();
            self.run_flush(FlushRequest {
                flags,
                reason: FlushReason::Overflow,
            });
        }
    }

    /// Emit the accumulated pass to the renderer and reset the accumulator
    pub(crate) fn emit_render_pass(&mut self, reason: FlushReason) {
        if !self.render_pass.prim.is_empty() {
            let bb = self.render_pass.bb;
            let num_primitives = self.render_pass.prim.len();

            debug_assert!(
                bb[2] < (self.render_pass.frame.fbw() * BUFFER_WIDTH_SCALE) as i32
            );

            // Somewhat arbitrary: balance binning load against dispatch
            // overhead.
            let tile_width = (((bb[2] - bb[0]) as u32) >> FB_SWIZZLE_WIDTH_LOG2) + 1;
            let tile_height = (((bb[3] - bb[1]) as u32) >> FB_SWIZZLE_HEIGHT_LOG2) + 1;
            let binning_cost = tile_width as u64 * tile_height as u64 * num_primitives as u64;
            let mut coarse_tile_size_log2 = if binning_cost < 10_000 {
                3
            } else if binning_cost < 10_000_000 {
                4
            } else if binning_cost < 100_000_000 {
                5
            } else {
                6
            };
            if self.sampling_rate_y_log2 != 0 && coarse_tile_size_log2 > 3 {
                coarse_tile_size_log2 -= 1;
            }

            let debug_capture_stride = match self.debug_mode.draw_mode {
                // Strided capture balances debuggability against a million
                // events to step through.
                DrawDebugMode::Strided => 16,
                DrawDebugMode::Full => 1,
                DrawDebugMode::None => 0,
            };

            let label_key = self.render_pass.label_key;
            self.render_pass.label_key += 1;

            let rp = &self.render_pass;
            let desc = RenderPassDesc {
                positions: &rp.positions,
                attributes: &rp.attributes,
                prims: &rp.prim,
                states: &rp.state_vectors,
                textures: &rp.tex_infos,
                fb: FrameBufferDesc {
                    frame: rp.frame,
                    zbuf: rp.zbuf,
                },
                base_x: bb[0],
                base_y: bb[1],
                coarse_tile_size_log2,
                coarse_tiles_width: (((bb[2] - bb[0]) as u32) >> coarse_tile_size_log2) + 1,
                coarse_tiles_height: (((bb[3] - bb[1]) as u32) >> coarse_tile_size_log2) + 1,
                feedback_texture: rp.has_color_feedback,
                feedback_psm: rp.feedback_psm,
                feedback_cpsm: rp.feedback_cpsm,
                z_sensitive: rp.z_sensitive,
                has_aa1: rp.has_aa1,
                has_scanmsk: rp.has_scanmsk,
                sampling_rate_x_log2: self.sampling_rate_x_log2,
                sampling_rate_y_log2: self.sampling_rate_y_log2,
                feedback_color: self.debug_mode.feedback_render_target,
                feedback_depth: self.debug_mode.feedback_render_target && rp.z_sensitive,
                debug_capture_stride,
                label_key,
                flush_reason: reason,
            };
            self.renderer.flush_rendering(&desc);

            log::debug!(
                "Render pass flushed ({:?}): {} prims, {} states, {} textures",
                reason,
                num_primitives,
                rp.state_vectors.len(),
                rp.tex_infos.len()
            );
        }

        let rp = &mut self.render_pass;
        rp.positions.clear();
        rp.attributes.clear();
        rp.prim.clear();
        rp.state_vectors.clear();
        rp.state_vector_map.clear();
        rp.tex_infos.clear();
        rp.texture_map.clear();
        rp.pending_palette_updates = 0;
        rp.bb = BB_EMPTY;
        rp.color_write_mask = 0;
        rp.z_sensitive = false;
        rp.z_write = false;
        rp.has_color_feedback = false;
        rp.has_aa1 = false;
        rp.has_scanmsk = false;
        self.state_tracker.dirty.mark_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_flags() {
        let mut dirty = DirtyFlags::default();
        assert!(!dirty.is_set(DIRTY_TEX));

        dirty.mark(DIRTY_TEX | DIRTY_FB);
        assert!(dirty.is_set(DIRTY_TEX));
        assert!(dirty.take(DIRTY_TEX));
        assert!(!dirty.take(DIRTY_TEX));
        assert!(dirty.is_set(DIRTY_FB));

        dirty.mark_all();
        assert_eq!(dirty.bits(), DIRTY_ALL);
        dirty.clear_all();
        assert_eq!(dirty.bits(), 0);
    }

    #[test]
    fn test_texture_descriptor_hash_includes_palette_bank() {
        let mut a = TextureDescriptor::default();
        let mut b = TextureDescriptor::default();
        a.palette_bank = 1;
        b.palette_bank = 2;
        assert_ne!(hash_texture_descriptor(&a), hash_texture_descriptor(&b));

        b.palette_bank = 1;
        assert_eq!(hash_texture_descriptor(&a), hash_texture_descriptor(&b));
    }

    #[test]
    fn test_potential_feedback_detection() {
        let mut tex0 = Tex0(0);
        tex0.set_tbp0(0);
        tex0.set_tw(10);
        tex0.set_th(10);
        tex0.set_tbw(16);
        tex0.set_psm(PSMCT32);

        // A 1024x1024 32-bit texture at base 0 spans 512 pages: everything in
        // a 4 MiB VRAM straddles it.
        let (color, depth) = compute_has_potential_feedback(tex0, 0x100, 0x180, 512);
        assert!(color);
        assert!(depth);

        // A tiny texture does not reach the FB.
        let mut small = Tex0(0);
        small.set_tw(6);
        small.set_th(6);
        small.set_tbw(1);
        small.set_psm(PSMCT32);
        let (color, depth) = compute_has_potential_feedback(small, 0x100, 0x180, 512);
        assert!(!color);
        assert!(!depth);
    }

    #[test]
    fn test_render_pass_state_reset_shape() {
        let rp: RenderPassState<u32> = RenderPassState::new();
        assert_eq!(rp.bb, BB_EMPTY);
        assert!(rp.prim.is_empty());
        assert_eq!(rp.fb_page_width_log2, 6);
        assert_eq!(rp.fb_page_height_log2, 5);
    }
}
