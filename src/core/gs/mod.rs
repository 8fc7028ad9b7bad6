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

//! Graphics Synthesizer command-stream engine
//!
//! This module implements the front half of a GS: the [`Gs`] engine ingests
//! GIF packets on four logical paths, decodes register writes and vertex
//! kicks, and batches primitives, palette uploads and VRAM transfers into
//! coarse render passes consumed by a [`GsRenderer`].
//!
//! # Architecture
//!
//! - [`gif`]: GIFTag parsing and PACKED/REGLIST/IMAGE demux with burst fast
//!   paths for common vertex streams
//! - [`registers`]: the 64-bit register file with typed bitfield views
//! - [`kick`]: the 3-deep vertex queue and per-primitive drawing kicks
//! - [`render_pass`]: state/texture deduplication, CLUT memoization and flush
//!   decisions
//! - [`page_tracker`]: per-page hazard tracking over VRAM and the host/GPU
//!   timeline
//! - [`transfer`]: HOST↔LOCAL and LOCAL↔LOCAL transfer handling
//! - [`vram`]: pure page-geometry math
//! - [`renderer`]: the downstream renderer trait and descriptor types
//!
//! # Hazards and flushing
//!
//! Every draw, transfer and texture read is routed through the page tracker.
//! When an operation would observe stale data, the tracker hands back a flush
//! request which the engine executes against the renderer before the
//! operation applies. Host access to VRAM synchronizes through a monotonic
//! timeline instead of explicit semaphores.
//!
//! The engine is single-threaded: one owner thread drives the command stream,
//! and the renderer's internal concurrency is hidden behind the timeline.

pub mod gif;
pub mod kick;
pub mod page_tracker;
pub mod registers;
pub mod render_pass;
pub mod renderer;
pub mod transfer;
pub mod vram;

#[cfg(test)]
mod tests;

use super::error::{EmulatorError, Result};

use gif::GifPath;
use kick::{kick_shape, KickShape, VertexQueue};
use page_tracker::{
    FlushReason, FlushRequest, PageTracker, PAGE_TRACKER_FLUSH_CACHE_BIT,
    PAGE_TRACKER_FLUSH_COPY_BIT, PAGE_TRACKER_FLUSH_FB_BIT,
    PAGE_TRACKER_FLUSH_HOST_VRAM_SYNC_BIT, PAGE_TRACKER_FLUSH_WRITE_BACK_BIT,
};
use registers::*;
use render_pass::{RenderPassState, StateTracker, DIRTY_ALL, DIRTY_DEGENERATE, DIRTY_FB,
    DIRTY_FEEDBACK, DIRTY_PRIM_TEMPLATE, DIRTY_STATE, DIRTY_TEX};
use renderer::{
    DebugMode, FlushStats, GsOptions, GsRenderer, ScanoutResult, SuperSampling, TimestampType,
    VSyncInfo,
};
use transfer::TransferState;
use vram::{PageRect, PAGE_SIZE};

// Public surface re-exports.
pub use gif::{CompiledGifHandler, GifTag};
pub use page_tracker::PageTrackerFlushFlags;
pub use renderer::{
    CopyVram, DrawDebugMode, FrameBufferDesc, PaletteUpload, PrimitiveAttribute, RenderPassDesc,
    StateVector, TextureDescriptor, TextureInfo, VertexAttribute, VertexPosition,
};
pub use render_pass::{CLUT_INSTANCES, MAX_PRIMITIVES_PER_FLUSH, MAX_STATE_VECTORS, MAX_TEXTURES,
    NUM_MEMOIZED_PALETTES};

/// The GS command-stream engine
///
/// Owns the register file, the four GIF paths, the open render pass and the
/// VRAM page tracker, and drives the downstream renderer.
pub struct Gs<R: GsRenderer> {
    renderer: R,
    tracker: PageTracker<R::Image>,

    registers: RegisterState,
    priv_registers: PrivRegisterState,
    paths: [GifPath; 4],

    vertex_queue: VertexQueue,
    state_tracker: StateTracker,
    render_pass: RenderPassState<R::Image>,
    transfer_state: TransferState,
    /// Kick behavior of the current PRIM type; `None` discards kicks
    draw_shape: Option<KickShape>,

    vram_size: usize,
    sampling_rate_x_log2: u32,
    sampling_rate_y_log2: u32,
    debug_mode: DebugMode,

    /// Scratch buffer for draining page bitsets during flushes
    page_buffer: Vec<u32>,
}

impl<R: GsRenderer> Gs<R> {
    /// Create an engine over a renderer
    ///
    /// Fails if the VRAM size is not a page multiple with a power-of-two page
    /// count.
    pub fn new(renderer: R, options: &GsOptions) -> Result<Self> {
        let vram_size = options.vram_size;
        let page_size = PAGE_SIZE as usize;
        if vram_size == 0
            || vram_size % page_size != 0
            || !(vram_size / page_size).is_power_of_two()
        {
            return Err(EmulatorError::InvalidVramSize { size: vram_size });
        }
        let num_pages = (vram_size / page_size) as u32;

        let (sampling_rate_x_log2, sampling_rate_y_log2) = options.super_sampling.rate_log2();

        let mut gs = Gs {
            renderer,
            tracker: PageTracker::new(num_pages),
            registers: RegisterState::default(),
            priv_registers: PrivRegisterState::default(),
            paths: [GifPath::default(); 4],
            vertex_queue: VertexQueue::default(),
            state_tracker: StateTracker::new(),
            render_pass: RenderPassState::new(),
            transfer_state: TransferState::default(),
            draw_shape: None,
            vram_size,
            sampling_rate_x_log2,
            sampling_rate_y_log2,
            debug_mode: DebugMode::default(),
            page_buffer: Vec::new(),
        };
        gs.renderer.invalidate_super_sampling_state();
        Ok(gs)
    }

    /// Change the supersampling rate; renderer-side derived state resets
    pub fn set_super_sampling_rate(&mut self, super_sampling: SuperSampling) {
        let (x, y) = super_sampling.rate_log2();
        self.sampling_rate_x_log2 = x;
        self.sampling_rate_y_log2 = y;
        self.renderer.invalidate_super_sampling_state();
    }

    /// Execute a flush request against the renderer
    ///
    /// Order matters: host-written pages upload first, then copies land, then
    /// cache uploads, then the render pass, then readbacks. The tracker has
    /// already applied its own state transitions by the time a request
    /// reaches this point.
    pub(crate) fn run_flush(&mut self, req: FlushRequest) {
        let flags = req.flags;

        if flags & PAGE_TRACKER_FLUSH_HOST_VRAM_SYNC_BIT != 0 {
            let mut pages = std::mem::take(&mut self.page_buffer);
            self.tracker.take_sync_host_vram_pages(&mut pages);
            if !pages.is_empty() {
                self.renderer.flush_host_vram_copy(&pages);
            }
            self.page_buffer = pages;
        }

        if flags & PAGE_TRACKER_FLUSH_COPY_BIT != 0 {
            if flags
                & (PAGE_TRACKER_FLUSH_CACHE_BIT
                    | PAGE_TRACKER_FLUSH_FB_BIT
                    | PAGE_TRACKER_FLUSH_WRITE_BACK_BIT)
                != 0
            {
                self.renderer.flush_transfer();
            } else {
                // Nothing beyond copies is flushing: this is a WAW hazard
                // resolved internally with a barrier.
                self.renderer.transfer_overlap_barrier();
            }
        }

        if flags & PAGE_TRACKER_FLUSH_CACHE_BIT != 0 {
            self.renderer.flush_cache_upload();
            // VRAM may have changed under memoized palettes.
            self.render_pass.forget_palette_memoization();
        }

        if flags & PAGE_TRACKER_FLUSH_FB_BIT != 0 {
            self.emit_render_pass(req.reason);
        }

        if flags & PAGE_TRACKER_FLUSH_WRITE_BACK_BIT != 0 {
            let mut pages = std::mem::take(&mut self.page_buffer);
            self.tracker.take_sync_vram_host_pages(&mut pages);
            if !pages.is_empty() {
                self.renderer.flush_readback(&pages);
            }
            self.page_buffer = pages;
        }

        if flags & (PAGE_TRACKER_FLUSH_FB_BIT | PAGE_TRACKER_FLUSH_COPY_BIT) != 0 {
            let hashes = self
                .tracker
                .invalidate_texture_cache(self.render_pass.clut_instance);
            self.apply_texture_invalidation(&hashes);
        }
    }

    /// Direct A+D register write
    pub fn write_register(&mut self, addr: u8, value: u64) {
        match addr {
            ADDR_PRIM => self.ad_prim(value),
            ADDR_RGBAQ | ADDR_RGBAQ_ALIAS => self.ad_rgbaq(value),
            ADDR_ST => self.ad_st(value),
            ADDR_UV => self.ad_uv(value),
            ADDR_XYZF2 => self.ad_xyzf2(value),
            ADDR_XYZ2 => self.ad_xyz2(value),
            ADDR_TEX0_1 => self.ad_tex0(0, value),
            ADDR_TEX0_2 => self.ad_tex0(1, value),
            ADDR_CLAMP_1 => self.ad_clamp(0, value),
            ADDR_CLAMP_2 => self.ad_clamp(1, value),
            ADDR_FOG => self.ad_fog(value),
            ADDR_XYZF3 => self.ad_xyzf3(value),
            ADDR_XYZ3 => self.ad_xyz3(value),
            ADDR_TEX1_1 => self.ad_tex1(0, value),
            ADDR_TEX1_2 => self.ad_tex1(1, value),
            ADDR_TEX2_1 => self.ad_tex2(0, value),
            ADDR_TEX2_2 => self.ad_tex2(1, value),
            ADDR_XYOFFSET_1 => self.registers.ctx[0].xyoffset = XyOffset(value),
            ADDR_XYOFFSET_2 => self.registers.ctx[1].xyoffset = XyOffset(value),
            ADDR_PRMODECONT => self.registers.prmodecont = PrModeCont(value),
            ADDR_PRMODE => self.ad_prmode(value),
            ADDR_TEXCLUT => self.registers.texclut = TexClut(value),
            ADDR_SCANMSK => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.scanmsk.0,
                value,
                DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_MIPTBP1_1 => self.ad_miptbp(0, false, value),
            ADDR_MIPTBP1_2 => self.ad_miptbp(1, false, value),
            ADDR_MIPTBP2_1 => self.ad_miptbp(0, true, value),
            ADDR_MIPTBP2_2 => self.ad_miptbp(1, true, value),
            ADDR_TEXA => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.texa.0,
                value,
                DIRTY_PRIM_TEMPLATE | DIRTY_TEX,
            ),
            ADDR_FOGCOL => self.registers.fogcol = FogCol(value),
            // Hazard tracking supersedes TEXFLUSH; it cannot be relied on.
            ADDR_TEXFLUSH => {}
            ADDR_SCISSOR_1 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[0].scissor.0,
                value,
                DIRTY_DEGENERATE,
            ),
            ADDR_SCISSOR_2 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[1].scissor.0,
                value,
                DIRTY_DEGENERATE,
            ),
            ADDR_ALPHA_1 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[0].alpha.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_ALPHA_2 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[1].alpha.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_DIMX => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.dimx.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_DTHE => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.dthe.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_COLCLAMP => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.colclamp.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_TEST_1 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[0].test.0,
                value,
                DIRTY_DEGENERATE | DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_TEST_2 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[1].test.0,
                value,
                DIRTY_DEGENERATE | DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_PABE => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.pabe.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_FBA_1 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[0].fba.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_FBA_2 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[1].fba.0,
                value,
                DIRTY_STATE | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_FRAME_1 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[0].frame.0,
                value,
                DIRTY_DEGENERATE | DIRTY_FEEDBACK | DIRTY_FB | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_FRAME_2 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[1].frame.0,
                value,
                DIRTY_DEGENERATE | DIRTY_FEEDBACK | DIRTY_FB | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_ZBUF_1 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[0].zbuf.0,
                value,
                DIRTY_DEGENERATE | DIRTY_FEEDBACK | DIRTY_FB | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_ZBUF_2 => update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.ctx[1].zbuf.0,
                value,
                DIRTY_DEGENERATE | DIRTY_FEEDBACK | DIRTY_FB | DIRTY_PRIM_TEMPLATE,
            ),
            ADDR_BITBLTBUF => self.registers.bitbltbuf = BitBltBuf(value),
            ADDR_TRXPOS => self.registers.trxpos = TrxPos(value),
            ADDR_TRXREG => self.registers.trxreg = TrxReg(value),
            ADDR_TRXDIR => {
                self.registers.trxdir = TrxDir(value);
                self.init_transfer();
            }
            ADDR_HWREG => self.hwreg_write(value),
            // Interrupt signaling; nothing to batch.
            ADDR_SIGNAL | ADDR_FINISH | ADDR_LABEL => {}
            _ => log::trace!("Ignoring write to unknown register {:#x}", addr),
        }
    }

    // Register handlers with side effects beyond a plain store.

    pub(crate) fn ad_prim(&mut self, payload: u64) {
        let new_prim = Prim(payload);
        let prim_delta = self.registers.prim.prim() != new_prim.prim();

        if self.registers.prmodecont.ac() != 0 {
            if self.registers.prim.ctxt() != new_prim.ctxt() {
                self.state_tracker.dirty.mark(
                    DIRTY_DEGENERATE | DIRTY_PRIM_TEMPLATE | DIRTY_TEX | DIRTY_FB | DIRTY_FEEDBACK,
                );
            }

            update_internal_register(
                &mut self.state_tracker.dirty,
                &mut self.registers.prim.0,
                payload,
                DIRTY_FEEDBACK | DIRTY_PRIM_TEMPLATE | DIRTY_TEX | DIRTY_STATE,
            );

            if self.registers.prim.tme() == 0 {
                self.state_tracker.dirty.clear(DIRTY_TEX);
            }
        } else {
            let prim_type = new_prim.prim();
            self.registers.prim.set_prim(prim_type);
        }

        if prim_delta {
            self.update_draw_handler();
        }

        self.reset_vertex_queue();
        self.registers.internal_q = 1.0;
    }

    fn ad_prmode(&mut self, payload: u64) {
        if self.registers.prmodecont.ac() != 0 {
            return;
        }

        let mut prim = Prim(payload);
        prim.set_prim(self.registers.prim.prim());

        if self.registers.prim.ctxt() != prim.ctxt() {
            self.state_tracker.dirty.mark(
                DIRTY_DEGENERATE | DIRTY_PRIM_TEMPLATE | DIRTY_TEX | DIRTY_FB | DIRTY_FEEDBACK,
            );
        }

        update_internal_register(
            &mut self.state_tracker.dirty,
            &mut self.registers.prim.0,
            prim.0,
            DIRTY_FEEDBACK | DIRTY_PRIM_TEMPLATE | DIRTY_TEX | DIRTY_STATE,
        );

        if self.registers.prim.tme() == 0 {
            self.state_tracker.dirty.clear(DIRTY_TEX);
        }
    }

    pub(crate) fn ad_rgbaq(&mut self, payload: u64) {
        self.registers.rgbaq = Rgbaq(payload);
    }

    pub(crate) fn ad_st(&mut self, payload: u64) {
        self.registers.st = St(payload);
    }

    pub(crate) fn ad_uv(&mut self, payload: u64) {
        self.registers.uv = Uv(payload);
    }

    pub(crate) fn ad_fog(&mut self, payload: u64) {
        self.registers.fog = Fog(payload);
    }

    pub(crate) fn ad_xyz2(&mut self, payload: u64) {
        self.vertex_kick_xyz(payload);
        self.drawing_kick(false);
    }

    pub(crate) fn ad_xyzf2(&mut self, payload: u64) {
        self.vertex_kick_xyzf(payload);
        self.drawing_kick(false);
    }

    pub(crate) fn ad_xyz3(&mut self, payload: u64) {
        self.vertex_kick_xyz(payload);
    }

    pub(crate) fn ad_xyzf3(&mut self, payload: u64) {
        self.vertex_kick_xyzf(payload);
    }

    pub(crate) fn ad_tex0(&mut self, ctx: usize, payload: u64) {
        update_internal_register(
            &mut self.state_tracker.dirty,
            &mut self.registers.ctx[ctx].tex0.0,
            payload,
            DIRTY_FEEDBACK | DIRTY_STATE | DIRTY_PRIM_TEMPLATE | DIRTY_TEX,
        );
        self.handle_tex0_write(ctx);
        self.handle_miptbl_gen(ctx);
    }

    /// TEX2 aliases TEX0 but preserves the geometry/shading fields
    fn ad_tex2(&mut self, ctx: usize, payload: u64) {
        let preserve = self.registers.ctx[ctx].tex0;
        let mut tex0 = Tex0(payload);
        tex0.set_tbp0(preserve.tbp0());
        tex0.set_tbw(preserve.tbw());
        tex0.set_tw(preserve.tw());
        tex0.set_th(preserve.th());
        tex0.set_tcc(preserve.tcc());
        tex0.set_tfx(preserve.tfx());
        self.ad_tex0(ctx, tex0.0);
    }

    pub(crate) fn ad_clamp(&mut self, ctx: usize, payload: u64) {
        update_internal_register(
            &mut self.state_tracker.dirty,
            &mut self.registers.ctx[ctx].clamp.0,
            payload,
            DIRTY_FEEDBACK | DIRTY_PRIM_TEMPLATE | DIRTY_TEX,
        );
    }

    fn ad_tex1(&mut self, ctx: usize, payload: u64) {
        update_internal_register(
            &mut self.state_tracker.dirty,
            &mut self.registers.ctx[ctx].tex1.0,
            payload,
            DIRTY_FEEDBACK | DIRTY_PRIM_TEMPLATE | DIRTY_TEX,
        );
    }

    fn ad_miptbp(&mut self, ctx: usize, upper: bool, payload: u64) {
        let reg = if upper {
            &mut self.registers.ctx[ctx].miptbl_4_6.0
        } else {
            &mut self.registers.ctx[ctx].miptbl_1_3.0
        };
        update_internal_register(
            &mut self.state_tracker.dirty,
            reg,
            payload,
            DIRTY_PRIM_TEMPLATE | DIRTY_TEX,
        );
    }

    /// Select the kick behavior for the current PRIM type
    pub(crate) fn update_draw_handler(&mut self) {
        self.draw_shape = kick_shape(self.registers.prim.prim());
    }

    /// Force submission of all batched work and advance the timeline
    pub fn flush(&mut self) {
        self.flush_pending_transfer(true);
        let (timeline, flags) = self.tracker.mark_submission_timeline();
        self.run_flush(FlushRequest {
            flags,
            reason: FlushReason::SubmissionFlush,
        });
        self.renderer.flush_submit(timeline);
    }

    /// Mark all derived state dirty and re-derive cached handlers
    ///
    /// Call after mutating the register file externally (e.g. loading a save
    /// state through [`Gs::register_state_mut`]).
    pub fn clobber_register_state(&mut self) {
        self.state_tracker.dirty.mark(DIRTY_ALL);
        self.update_draw_handler();
        // Pending GIFTags still describe in-flight loops; re-derive their
        // compiled handlers rather than guessing which path runs next.
        for path in 0..4 {
            self.update_compiled_gif_handler(path);
        }
    }

    fn page_range_rect(&self, offset: usize, size: usize) -> PageRect {
        let begin = (offset / PAGE_SIZE as usize) as u32;
        let end = ((offset + size - 1) / PAGE_SIZE as usize) as u32;
        PageRect::linear(begin, end - begin + 1)
    }

    /// Map a VRAM range for direct host writes
    ///
    /// Blocks until the GPU is done with the range; a pending submission is
    /// forced if needed. The borrow keeps the mapping exclusive; call
    /// [`Gs::end_vram_write`] with the same range afterwards.
    pub fn map_vram_write(&mut self, offset: usize, size: usize) -> Result<&mut [u8]> {
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > self.vram_size) {
            return Err(EmulatorError::InvalidVramRange { offset, size });
        }

        let rect = self.page_range_rect(offset, size);
        let mut timeline = self.tracker.get_host_write_timeline(&rect);
        if timeline == u64::MAX {
            let (t, flags) = self.tracker.mark_submission_timeline();
            self.run_flush(FlushRequest {
                flags,
                reason: FlushReason::SubmissionFlush,
            });
            self.renderer.flush_submit(t);
            timeline = t;
        }
        self.renderer.wait_timeline(timeline);

        Ok(&mut self.renderer.begin_host_vram_access()[offset..offset + size])
    }

    /// Finish a host write mapping; the pages upload at the next flush
    pub fn end_vram_write(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let rect = self.page_range_rect(offset, size);
        self.renderer.end_host_write_vram_access();
        self.tracker.commit_host_write(&rect);
    }

    /// Map a VRAM range for host reads
    pub fn map_vram_read(&mut self, offset: usize, size: usize) -> Result<&[u8]> {
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > self.vram_size) {
            return Err(EmulatorError::InvalidVramRange { offset, size });
        }

        let rect = self.page_range_rect(offset, size);
        let mut timeline = self.tracker.get_host_read_timeline(&rect);
        if timeline == u64::MAX {
            let (t, flags) = self.tracker.mark_submission_timeline();
            self.run_flush(FlushRequest {
                flags,
                reason: FlushReason::SubmissionFlush,
            });
            self.renderer.flush_submit(t);
            timeline = t;
        }
        self.renderer.wait_timeline(timeline);

        Ok(&self.renderer.begin_host_vram_access()[offset..offset + size])
    }

    /// Write a privileged (CSR-space) register
    pub fn write_priv_register(&mut self, addr: u32, value: u64) {
        self.priv_registers.write(addr, value);
    }

    /// Scan out the display through the renderer
    pub fn vsync(&mut self, info: &VSyncInfo) -> ScanoutResult<R::Image> {
        self.renderer.vsync(&self.priv_registers, info)
    }

    /// Return and reset the renderer's flush counters
    pub fn consume_flush_stats(&mut self) -> FlushStats {
        self.renderer.consume_flush_stats()
    }

    /// Accumulated GPU time for a timestamp category
    pub fn get_accumulated_timestamps(&self, ty: TimestampType) -> f64 {
        self.renderer.get_accumulated_timestamps(ty)
    }

    pub fn set_debug_mode(&mut self, mode: DebugMode) {
        self.debug_mode = mode;
    }

    /// The GS register file
    pub fn register_state(&self) -> &RegisterState {
        &self.registers
    }

    /// Mutable access to the register file
    ///
    /// For save-state style restores; call [`Gs::clobber_register_state`]
    /// afterwards so derived state is rebuilt.
    pub fn register_state_mut(&mut self) -> &mut RegisterState {
        &mut self.registers
    }

    /// The privileged register file
    pub fn priv_register_state(&self) -> &PrivRegisterState {
        &self.priv_registers
    }

    /// Demux state of a GIF path
    pub fn gif_path(&self, path: usize) -> &GifPath {
        &self.paths[path]
    }
}

/// Store a register value, marking dirty bits only when it actually changed
#[inline]
fn update_internal_register(
    dirty: &mut render_pass::DirtyFlags,
    reg: &mut u64,
    value: u64,
    flags: u32,
) {
    if *reg != value {
        *reg = value;
        dirty.mark(flags);
    }
}
