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

//! VRAM page tracker
//!
//! Tracks per-page hazard state over the whole VRAM and answers one question
//! on every operation: does this access require flushing something first, and
//! what? Render-pass accesses are tracked with whole-page flags; copies and
//! texture reads are tracked per 256-byte block, since page granularity is too
//! pessimistic for them. Word write-masks catch formats that alias within a
//! word (24-bit color vs 8-bit-high alpha).
//!
//! State transitions are additive within a flush epoch: pages accumulate
//! fb-read/fb-write/copy/cached-read state and only drop back to idle when the
//! corresponding flush completes. Every `mark_*` operation applies its own
//! transitions and returns an optional [`FlushRequest`] that the engine must
//! execute against the renderer; the request is already reflected in tracker
//! state when it is returned.
//!
//! The tracker also owns the global cached-texture map. Cached textures are
//! reference counted; every page covered by a texture holds a handle so that
//! overwriting any of its blocks can drop it from the cache.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use super::vram::{PageRect, PageRectClut};

// Flush flag bits. The composite masks mirror how much renderer-side work has
// to complete for the corresponding hazard to clear.
pub const PAGE_TRACKER_FLUSH_HOST_VRAM_SYNC_BIT: u32 = 1 << 0;
pub const PAGE_TRACKER_FLUSH_COPY_BIT: u32 = 1 << 1;
pub const PAGE_TRACKER_FLUSH_CACHE_BIT: u32 = 1 << 2;
pub const PAGE_TRACKER_FLUSH_FB_BIT: u32 = 1 << 3;
pub const PAGE_TRACKER_FLUSH_WRITE_BACK_BIT: u32 = 1 << 4;

pub const PAGE_TRACKER_FLUSH_COPY_ALL: u32 =
    PAGE_TRACKER_FLUSH_HOST_VRAM_SYNC_BIT | PAGE_TRACKER_FLUSH_COPY_BIT;
pub const PAGE_TRACKER_FLUSH_CACHE_ALL: u32 =
    PAGE_TRACKER_FLUSH_COPY_ALL | PAGE_TRACKER_FLUSH_CACHE_BIT;
pub const PAGE_TRACKER_FLUSH_FB_ALL: u32 =
    PAGE_TRACKER_FLUSH_CACHE_ALL | PAGE_TRACKER_FLUSH_FB_BIT;

pub type PageTrackerFlushFlags = u32;

// Per-page state flags.
const PAGE_STATE_FB_WRITE_BIT: u32 = 1 << 0;
const PAGE_STATE_FB_READ_BIT: u32 = 1 << 1;
// On mark_submission_timeline, the page receives the new host read/write
// timeline value.
const PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT: u32 = 1 << 2;
const PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT: u32 = 1 << 3;

/// Why a flush was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// FRAME or ZBUF moved mid-pass
    FBPointer,
    /// A render-pass resource limit was hit
    Overflow,
    /// A texture read overlapped pending framebuffer writes
    TextureHazard,
    /// A copy overlapped pending work, or vice versa
    CopyHazard,
    /// An explicit submission (flush, host mapping, readback)
    SubmissionFlush,
}

/// A flush the engine must execute against the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRequest {
    pub flags: PageTrackerFlushFlags,
    pub reason: FlushReason,
}

/// A GPU texture synthesized from VRAM, shared between the global cache map
/// and every page it covers
#[derive(Debug)]
pub struct CachedTexture<I> {
    pub hash: u64,
    pub image: I,
    /// Cleared on invalidation; stale page handles are dropped lazily
    valid: Cell<bool>,
}

pub type CachedTextureHandle<I> = Rc<CachedTexture<I>>;

/// A page's reference to a cached texture, with the masks that decide whether
/// a write to the page actually clobbers it
#[derive(Debug, Clone)]
struct CachedTextureMasked<I> {
    tex: CachedTextureHandle<I>,
    block_mask: u32,
    write_mask: u32,
    clut_instance: u32,
}

/// A palette texture's claim on CLUT sub-banks
#[derive(Debug, Clone)]
struct CachedPaletteTexture<I> {
    tex: CachedTextureHandle<I>,
    csa_mask: u32,
    clut_instance: u32,
}

#[derive(Debug, Default)]
struct PageState<I> {
    /// Textures sampled from this page; writes to overlapping blocks
    /// invalidate them
    cached_textures: Vec<CachedTextureMasked<I>>,

    /// The host may read this page once the GPU timeline reaches this value
    host_read_timeline: u64,
    /// The host may write this page once the GPU timeline reaches this value
    host_write_timeline: u64,

    flags: u32,

    // Tracked per 256-byte block.
    copy_write_block_mask: u32,
    copy_read_block_mask: u32,
    cached_read_block_mask: u32,
    texture_cache_needs_invalidate_block_mask: u32,
    texture_cache_needs_invalidate_write_mask: u32,

    /// Word mask of all render-pass accesses this epoch
    pending_fb_access_mask: u32,
}

impl<I> PageState<I> {
    fn new() -> Self {
        PageState {
            cached_textures: Vec::new(),
            host_read_timeline: 0,
            host_write_timeline: 0,
            flags: 0,
            copy_write_block_mask: 0,
            copy_read_block_mask: 0,
            cached_read_block_mask: 0,
            texture_cache_needs_invalidate_block_mask: 0,
            texture_cache_needs_invalidate_write_mask: 0,
            pending_fb_access_mask: 0,
        }
    }
}

/// Per-page hazard and timeline tracking for the whole VRAM
pub struct PageTracker<I> {
    pages: Vec<PageState<I>>,
    page_mask: u32,
    timeline: u64,

    cached_textures: HashMap<u64, CachedTextureHandle<I>>,
    texture_cached_palette: Vec<CachedPaletteTexture<I>>,
    /// Union of the CSA banks claimed by registered palette textures
    csa_written_mask: u32,

    /// Pages with armed invalidate masks, scanned by
    /// `invalidate_texture_cache`
    potential_invalidated_pages: Vec<u32>,

    // Pages queued for host→GPU upload and GPU→host write-back; drained by
    // the engine while executing a flush request.
    sync_host_vram_pages: Vec<u32>,
    sync_vram_host_pages: Vec<u32>,
}

impl<I: Clone> PageTracker<I> {
    /// Create a tracker for a power-of-two number of pages
    pub fn new(num_pages: u32) -> Self {
        debug_assert!(num_pages.is_power_of_two());
        let words = ((num_pages + 31) / 32) as usize;
        PageTracker {
            pages: (0..num_pages).map(|_| PageState::new()).collect(),
            page_mask: num_pages - 1,
            timeline: 0,
            cached_textures: HashMap::new(),
            texture_cached_palette: Vec::new(),
            csa_written_mask: 0,
            potential_invalidated_pages: Vec::new(),
            sync_host_vram_pages: vec![0; words],
            sync_vram_host_pages: vec![0; words],
        }
    }

    #[inline]
    fn page_index(&self, page: u32) -> usize {
        (page & self.page_mask) as usize
    }

    fn any_page(&self, rect: &PageRect, f: impl Fn(&PageState<I>) -> bool) -> bool {
        let mut hit = false;
        rect.for_each_page(|p| {
            if !hit && f(&self.pages[(p & self.page_mask) as usize]) {
                hit = true;
            }
        });
        hit
    }

    /// Mark render-pass color/depth writes over `rect`
    ///
    /// Outstanding copies that overlap the touched blocks must land first, so
    /// they are requested as a copy flush.
    pub fn mark_fb_write(&mut self, rect: &PageRect) -> Option<FlushRequest> {
        let req = self.check_copy_overlap(rect);
        let mask = self.page_mask;
        rect.for_each_page(|p| {
            let page = &mut self.pages[(p & mask) as usize];
            page.flags |= PAGE_STATE_FB_WRITE_BIT;
            page.pending_fb_access_mask |= rect.write_mask;
        });
        req
    }

    /// Mark render-pass read-only depth access over `rect`
    pub fn mark_fb_read(&mut self, rect: &PageRect) -> Option<FlushRequest> {
        let req = self.check_copy_overlap(rect);
        let mask = self.page_mask;
        rect.for_each_page(|p| {
            let page = &mut self.pages[(p & mask) as usize];
            page.flags |= PAGE_STATE_FB_READ_BIT;
            page.pending_fb_access_mask |= rect.write_mask;
        });
        req
    }

    fn check_copy_overlap(&mut self, rect: &PageRect) -> Option<FlushRequest> {
        let overlap = self.any_page(rect, |page| {
            (page.copy_write_block_mask | page.copy_read_block_mask) & rect.block_mask != 0
        });
        if overlap {
            self.complete_flush(PAGE_TRACKER_FLUSH_COPY_ALL);
            Some(FlushRequest {
                flags: PAGE_TRACKER_FLUSH_COPY_ALL,
                reason: FlushReason::CopyHazard,
            })
        } else {
            None
        }
    }

    /// Mark a HOST→LOCAL or LOCAL→LOCAL destination
    ///
    /// Pending render-pass accesses that alias the written words flush first;
    /// overlap with earlier copies only needs an ordering barrier.
    pub fn mark_transfer_write(&mut self, rect: &PageRect) -> Option<FlushRequest> {
        let fb_overlap = self.any_page(rect, |page| {
            page.flags & (PAGE_STATE_FB_WRITE_BIT | PAGE_STATE_FB_READ_BIT) != 0
                && page.pending_fb_access_mask & rect.write_mask != 0
        });

        let req = if fb_overlap {
            self.complete_flush(PAGE_TRACKER_FLUSH_FB_ALL);
            Some(FlushRequest {
                flags: PAGE_TRACKER_FLUSH_FB_ALL,
                reason: FlushReason::CopyHazard,
            })
        } else {
            let copy_overlap = self.any_page(rect, |page| {
                (page.copy_write_block_mask | page.copy_read_block_mask) & rect.block_mask != 0
            });
            if copy_overlap {
                self.complete_flush(PAGE_TRACKER_FLUSH_COPY_BIT);
                Some(FlushRequest {
                    flags: PAGE_TRACKER_FLUSH_COPY_BIT,
                    reason: FlushReason::CopyHazard,
                })
            } else {
                None
            }
        };

        let mask = self.page_mask;
        let scan = &mut self.potential_invalidated_pages;
        rect.for_each_page(|p| {
            let idx = (p & mask) as usize;
            let page = &mut self.pages[idx];
            if page.texture_cache_needs_invalidate_block_mask == 0 {
                scan.push(idx as u32);
            }
            page.copy_write_block_mask |= rect.block_mask;
            page.texture_cache_needs_invalidate_block_mask |= rect.block_mask;
            page.texture_cache_needs_invalidate_write_mask |= rect.write_mask;
            page.flags |= PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT
                | PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT;
        });

        req
    }

    /// Mark a LOCAL→LOCAL copy; the source contributes read state
    pub fn mark_transfer_copy(
        &mut self,
        dst_rect: &PageRect,
        src_rect: &PageRect,
    ) -> Option<FlushRequest> {
        let src_fb_overlap = self.any_page(src_rect, |page| {
            page.flags & PAGE_STATE_FB_WRITE_BIT != 0
                && page.pending_fb_access_mask & src_rect.write_mask != 0
        });

        let src_req = if src_fb_overlap {
            self.complete_flush(PAGE_TRACKER_FLUSH_FB_ALL);
            Some(FlushRequest {
                flags: PAGE_TRACKER_FLUSH_FB_ALL,
                reason: FlushReason::CopyHazard,
            })
        } else {
            None
        };

        let dst_req = self.mark_transfer_write(dst_rect);

        let mask = self.page_mask;
        src_rect.for_each_page(|p| {
            let page = &mut self.pages[(p & mask) as usize];
            page.copy_read_block_mask |= src_rect.block_mask;
            page.flags |= PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT;
        });

        merge_requests(src_req, dst_req)
    }

    /// Mark a texture-cache read over `rect`
    ///
    /// Reading pages with pending framebuffer writes is a texture hazard and
    /// flushes the render pass. Reading blocks with pending copy writes forces
    /// the copy and cache-upload queues out so the upload sees current VRAM.
    pub fn mark_texture_read(&mut self, rect: &PageRect) -> Option<FlushRequest> {
        let fb_overlap = self.any_page(rect, |page| {
            page.flags & PAGE_STATE_FB_WRITE_BIT != 0
                && page.pending_fb_access_mask & rect.write_mask != 0
        });

        let req = if fb_overlap {
            self.complete_flush(PAGE_TRACKER_FLUSH_FB_ALL);
            Some(FlushRequest {
                flags: PAGE_TRACKER_FLUSH_FB_ALL,
                reason: FlushReason::TextureHazard,
            })
        } else {
            let copy_overlap = self.any_page(rect, |page| {
                page.copy_write_block_mask & rect.block_mask != 0
            });
            if copy_overlap {
                self.complete_flush(PAGE_TRACKER_FLUSH_CACHE_ALL);
                Some(FlushRequest {
                    flags: PAGE_TRACKER_FLUSH_CACHE_ALL,
                    reason: FlushReason::CopyHazard,
                })
            } else {
                None
            }
        };

        let mask = self.page_mask;
        rect.for_each_page(|p| {
            let page = &mut self.pages[(p & mask) as usize];
            page.cached_read_block_mask |= rect.block_mask;
        });

        req
    }

    /// Mark a LOCAL→HOST readback of `rect`
    ///
    /// All pending GPU work producing the region flushes, the covered pages
    /// are queued for write-back, and the host-read timeline is armed; the
    /// host waits on `get_host_read_timeline` before touching the mapping.
    pub fn mark_readback(&mut self, rect: &PageRect) -> FlushRequest {
        let flags = PAGE_TRACKER_FLUSH_FB_ALL | PAGE_TRACKER_FLUSH_WRITE_BACK_BIT;
        self.complete_flush(flags);

        let mask = self.page_mask;
        let bits = &mut self.sync_vram_host_pages;
        rect.for_each_page(|p| {
            let idx = p & mask;
            bits[(idx / 32) as usize] |= 1 << (idx & 31);
        });
        rect.for_each_page(|p| {
            let page = &mut self.pages[(p & mask) as usize];
            page.flags |= PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT;
        });

        FlushRequest {
            flags,
            reason: FlushReason::SubmissionFlush,
        }
    }

    /// A new CLUT upload clobbers palette banks
    ///
    /// Cached palette textures whose banks overlap the upload are stale unless
    /// they were built from the current CLUT instance (self-invalidation
    /// inside a render pass would only cause churn). Returns true if anything
    /// was invalidated so the caller can dirty its texture state.
    pub fn register_cached_clut_clobber(
        &mut self,
        clut: &PageRectClut,
        clut_instance_match: u32,
    ) -> bool {
        if self.csa_written_mask & clut.csa_mask == 0 {
            return false;
        }

        let map = &mut self.cached_textures;
        let mut any = false;
        self.texture_cached_palette.retain(|t| {
            if !t.tex.valid.get() {
                return false;
            }
            if t.csa_mask & clut.csa_mask != 0 && t.clut_instance != clut_instance_match {
                t.tex.valid.set(false);
                map.remove(&t.tex.hash);
                any = true;
                false
            } else {
                true
            }
        });
        self.csa_written_mask = self
            .texture_cached_palette
            .iter()
            .fold(0, |m, t| m | t.csa_mask);
        any
    }

    /// Insert a synthesized texture into the cache
    ///
    /// Every page covered by any mip level holds a handle carrying the union
    /// block and write masks, so later writes can decide whether they clobber
    /// the texture.
    pub fn register_cached_texture(
        &mut self,
        level_rects: &[PageRect],
        csa_mask: u32,
        clut_instance: u32,
        hash: u64,
        image: I,
    ) {
        let tex = Rc::new(CachedTexture {
            hash,
            image,
            valid: Cell::new(true),
        });
        self.cached_textures.insert(hash, tex.clone());

        let mask = self.page_mask;
        for rect in level_rects {
            rect.for_each_page(|p| {
                self.pages[(p & mask) as usize]
                    .cached_textures
                    .push(CachedTextureMasked {
                        tex: tex.clone(),
                        block_mask: rect.block_mask,
                        write_mask: rect.write_mask,
                        clut_instance,
                    });
            });
        }

        if csa_mask != 0 {
            self.csa_written_mask |= csa_mask;
            self.texture_cached_palette.push(CachedPaletteTexture {
                tex,
                csa_mask,
                clut_instance,
            });
        }
    }

    /// Look up a cached texture by fingerprint
    pub fn find_cached_texture(&self, hash: u64) -> Option<I> {
        self.cached_textures.get(&hash).map(|t| t.image.clone())
    }

    /// Drop cached textures clobbered by writes recorded since the last scan
    ///
    /// A texture dies when written blocks and written words both overlap it,
    /// unless it belongs to `clut_instance_match` (which avoids a fresh
    /// texture invalidating itself inside a render pass). Returns the
    /// fingerprints of everything dropped.
    pub fn invalidate_texture_cache(&mut self, clut_instance_match: u32) -> Vec<u64> {
        let mut hashes = Vec::new();

        let map = &mut self.cached_textures;
        for idx in self.potential_invalidated_pages.drain(..) {
            let page = &mut self.pages[idx as usize];
            let block_mask = page.texture_cache_needs_invalidate_block_mask;
            let write_mask = page.texture_cache_needs_invalidate_write_mask;
            if block_mask == 0 {
                continue;
            }

            page.cached_textures.retain(|t| {
                if !t.tex.valid.get() {
                    return false;
                }
                let clobbered = t.block_mask & block_mask != 0
                    && t.write_mask & write_mask != 0
                    && t.clut_instance != clut_instance_match;
                if clobbered {
                    t.tex.valid.set(false);
                    map.remove(&t.tex.hash);
                    hashes.push(t.tex.hash);
                    false
                } else {
                    true
                }
            });

            page.texture_cache_needs_invalidate_block_mask = 0;
            page.texture_cache_needs_invalidate_write_mask = 0;
        }

        if !hashes.is_empty() {
            self.texture_cached_palette.retain(|t| t.tex.valid.get());
            self.csa_written_mask = self
                .texture_cached_palette
                .iter()
                .fold(0, |m, t| m | t.csa_mask);
        }

        hashes
    }

    /// Timeline the host must reach before reading `rect`, or `u64::MAX`
    /// while GPU-side work on it is still unsubmitted
    pub fn get_host_read_timeline(&self, rect: &PageRect) -> u64 {
        let mut timeline = 0;
        let mut hazard = false;
        rect.for_each_page(|p| {
            let page = &self.pages[(p & self.page_mask) as usize];
            if page.flags
                & (PAGE_STATE_FB_WRITE_BIT | PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT)
                != 0
                || page.copy_write_block_mask != 0
            {
                hazard = true;
            }
            timeline = timeline.max(page.host_read_timeline);
        });
        if hazard {
            u64::MAX
        } else {
            timeline
        }
    }

    /// Timeline the host must reach before writing `rect`, or `u64::MAX`
    /// while GPU-side work on it is still unsubmitted
    pub fn get_host_write_timeline(&self, rect: &PageRect) -> u64 {
        let mut timeline = 0;
        let mut hazard = false;
        rect.for_each_page(|p| {
            let page = &self.pages[(p & self.page_mask) as usize];
            if page.flags
                & (PAGE_STATE_FB_WRITE_BIT
                    | PAGE_STATE_FB_READ_BIT
                    | PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT)
                != 0
                || page.copy_write_block_mask != 0
                || page.copy_read_block_mask != 0
                || page.cached_read_block_mask != 0
            {
                hazard = true;
            }
            timeline = timeline.max(page.host_write_timeline);
        });
        if hazard {
            u64::MAX
        } else {
            timeline
        }
    }

    /// The host finished writing `rect` directly; queue the pages for upload
    /// into GPU VRAM at the next flush
    pub fn commit_host_write(&mut self, rect: &PageRect) {
        let mask = self.page_mask;
        let bits = &mut self.sync_host_vram_pages;
        rect.for_each_page(|p| {
            let idx = p & mask;
            bits[(idx / 32) as usize] |= 1 << (idx & 31);
        });
    }

    /// Unconditionally flush the render pass state
    pub fn flush_render_pass(&mut self) -> PageTrackerFlushFlags {
        self.complete_flush(PAGE_TRACKER_FLUSH_FB_ALL);
        PAGE_TRACKER_FLUSH_FB_ALL
    }

    /// Mark an explicit submission
    ///
    /// All batched GPU work resolves, the global timeline advances, and every
    /// page awaiting a timeline update is stamped with the new value. Returns
    /// the strictly increasing timeline together with the flush the engine
    /// must execute before submitting it.
    pub fn mark_submission_timeline(&mut self) -> (u64, PageTrackerFlushFlags) {
        let flags = PAGE_TRACKER_FLUSH_FB_ALL | PAGE_TRACKER_FLUSH_WRITE_BACK_BIT;
        self.complete_flush(flags);

        self.timeline += 1;
        let timeline = self.timeline;
        for page in &mut self.pages {
            if page.flags & PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT != 0 {
                page.host_read_timeline = timeline;
            }
            if page.flags & PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT != 0 {
                page.host_write_timeline = timeline;
            }
            page.flags &= !(PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT
                | PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT);
        }

        (timeline, flags)
    }

    /// Apply the page-state transitions implied by a flush
    ///
    /// Copy flush clears block-level copy state, cache flush clears cached
    /// reads, fb flush retires render-pass flags into timeline updates and
    /// arms texture invalidation for the written words.
    fn complete_flush(&mut self, flags: PageTrackerFlushFlags) {
        let clear_copy = flags & PAGE_TRACKER_FLUSH_COPY_BIT != 0;
        let clear_cache = flags & PAGE_TRACKER_FLUSH_CACHE_BIT != 0;
        let clear_fb = flags & PAGE_TRACKER_FLUSH_FB_BIT != 0;

        let pages = &mut self.pages;
        let scan = &mut self.potential_invalidated_pages;
        for (idx, page) in pages.iter_mut().enumerate() {
            if clear_copy {
                page.copy_write_block_mask = 0;
                page.copy_read_block_mask = 0;
            }
            if clear_cache {
                page.cached_read_block_mask = 0;
            }
            if clear_fb && page.flags & (PAGE_STATE_FB_WRITE_BIT | PAGE_STATE_FB_READ_BIT) != 0 {
                if page.flags & PAGE_STATE_FB_WRITE_BIT != 0 {
                    page.flags |= PAGE_STATE_TIMELINE_UPDATE_HOST_READ_BIT
                        | PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT;
                    // The pass wrote these words; any texture sampled from
                    // them is stale.
                    if page.texture_cache_needs_invalidate_block_mask == 0 {
                        scan.push(idx as u32);
                    }
                    page.texture_cache_needs_invalidate_block_mask = !0u32;
                    page.texture_cache_needs_invalidate_write_mask |=
                        page.pending_fb_access_mask;
                } else {
                    page.flags |= PAGE_STATE_TIMELINE_UPDATE_HOST_WRITE_BIT;
                }
                page.flags &= !(PAGE_STATE_FB_WRITE_BIT | PAGE_STATE_FB_READ_BIT);
                page.pending_fb_access_mask = 0;
            }
        }
    }

    /// Drain the pages queued for host→GPU VRAM upload
    pub fn take_sync_host_vram_pages(&mut self, out: &mut Vec<u32>) {
        out.clear();
        for (word, bits) in self.sync_host_vram_pages.iter_mut().enumerate() {
            let mut b = *bits;
            while b != 0 {
                let bit = b.trailing_zeros();
                out.push(word as u32 * 32 + bit);
                b &= b - 1;
            }
            *bits = 0;
        }
    }

    /// Drain the pages queued for GPU→host write-back
    pub fn take_sync_vram_host_pages(&mut self, out: &mut Vec<u32>) {
        out.clear();
        for (word, bits) in self.sync_vram_host_pages.iter_mut().enumerate() {
            let mut b = *bits;
            while b != 0 {
                let bit = b.trailing_zeros();
                out.push(word as u32 * 32 + bit);
                b &= b - 1;
            }
            *bits = 0;
        }
    }
}

/// Merge two flush requests, keeping the stronger flag set
pub fn merge_requests(
    a: Option<FlushRequest>,
    b: Option<FlushRequest>,
) -> Option<FlushRequest> {
    match (a, b) {
        (Some(a), Some(b)) => Some(FlushRequest {
            flags: a.flags | b.flags,
            reason: a.reason,
        }),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_rect(page: u32, block_mask: u32, write_mask: u32) -> PageRect {
        PageRect {
            base_page: page,
            page_width: 1,
            page_height: 1,
            page_stride: 0,
            block_mask,
            write_mask,
        }
    }

    #[test]
    fn test_transfer_then_texture_read_is_copy_hazard() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);

        assert!(tracker
            .mark_transfer_write(&block_rect(100, 0xff, !0))
            .is_none());

        let req = tracker
            .mark_texture_read(&block_rect(100, 0x10, !0))
            .expect("overlapping read must request a flush");
        assert_eq!(req.reason, FlushReason::CopyHazard);
        assert_ne!(req.flags & PAGE_TRACKER_FLUSH_CACHE_BIT, 0);

        // The hazard is consumed by the flush.
        assert!(tracker
            .mark_texture_read(&block_rect(100, 0x10, !0))
            .is_none());
    }

    #[test]
    fn test_disjoint_blocks_do_not_hazard() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        tracker.mark_transfer_write(&block_rect(100, 0x0f, !0));
        assert!(tracker
            .mark_texture_read(&block_rect(100, 0xf0, !0))
            .is_none());
    }

    #[test]
    fn test_transfer_write_over_fb_write_flushes_once() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        tracker.mark_fb_write(&block_rect(7, !0, 0x00ff_ffff));

        let req = tracker
            .mark_transfer_write(&block_rect(7, !0, 0x00ff_ffff))
            .expect("aliasing transfer must flush the render pass");
        assert_eq!(req.flags & PAGE_TRACKER_FLUSH_FB_BIT, PAGE_TRACKER_FLUSH_FB_BIT);
        assert_eq!(req.reason, FlushReason::CopyHazard);

        // Exactly once: flags retired, the next write sees only its own
        // earlier copy (same blocks, barrier request).
        let req = tracker.mark_transfer_write(&block_rect(7, !0, 0x00ff_ffff));
        assert_eq!(
            req.map(|r| r.flags),
            Some(PAGE_TRACKER_FLUSH_COPY_BIT)
        );
    }

    #[test]
    fn test_masked_writes_do_not_alias() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        // 24-bit FB write vs 8H texture read: block overlap, word-disjoint.
        tracker.mark_fb_write(&block_rect(3, !0, 0x00ff_ffff));
        assert!(tracker
            .mark_texture_read(&block_rect(3, !0, 0xff00_0000))
            .is_none());
    }

    #[test]
    fn test_submission_timeline_increases_and_stamps() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        let rect = block_rect(12, !0, !0);

        tracker.mark_fb_write(&rect);
        assert_eq!(tracker.get_host_read_timeline(&rect), u64::MAX);

        tracker.flush_render_pass();
        // Still pending: the flush retired the pass but nothing is submitted.
        assert_eq!(tracker.get_host_read_timeline(&rect), u64::MAX);

        let (t1, _) = tracker.mark_submission_timeline();
        let (t2, _) = tracker.mark_submission_timeline();
        assert!(t2 > t1);
        assert_eq!(tracker.get_host_read_timeline(&rect), t1);
        assert_eq!(tracker.get_host_write_timeline(&rect), t1);
    }

    #[test]
    fn test_cached_texture_invalidation() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        let rect = block_rect(40, 0x3, !0);
        tracker.register_cached_texture(&[rect], 0, 5, 0x1234, 99);
        assert_eq!(tracker.find_cached_texture(0x1234), Some(99));

        // Write the blocks the texture lives in.
        tracker.mark_transfer_write(&block_rect(40, 0x1, !0));
        let hashes = tracker.invalidate_texture_cache(u32::MAX);
        assert_eq!(hashes, vec![0x1234]);
        assert_eq!(tracker.find_cached_texture(0x1234), None);

        // A second scan has nothing left to do.
        tracker.mark_transfer_write(&block_rect(40, 0x1, !0));
        assert!(tracker.invalidate_texture_cache(u32::MAX).is_empty());
    }

    #[test]
    fn test_invalidation_spares_matching_clut_instance() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        tracker.register_cached_texture(&[block_rect(41, !0, !0)], 0, 7, 0xbeef, 1);
        tracker.mark_transfer_write(&block_rect(41, !0, !0));
        assert!(tracker.invalidate_texture_cache(7).is_empty());
        assert_eq!(tracker.find_cached_texture(0xbeef), Some(1));
    }

    #[test]
    fn test_fb_write_invalidates_cached_texture_after_flush() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        tracker.register_cached_texture(&[block_rect(8, !0, !0)], 0, 0, 0xcafe, 2);

        tracker.mark_fb_write(&block_rect(8, !0, !0));
        tracker.flush_render_pass();

        let hashes = tracker.invalidate_texture_cache(u32::MAX);
        assert_eq!(hashes, vec![0xcafe]);
    }

    #[test]
    fn test_clut_clobber_invalidates_overlapping_banks() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        tracker.register_cached_texture(&[block_rect(2, !0, !0)], 0x0001, 3, 0xaaaa, 4);

        let clut = PageRectClut {
            rect: block_rect(300, !0, !0),
            csa_mask: 0x0001,
        };
        // Same instance: no self-invalidation.
        assert!(!tracker.register_cached_clut_clobber(&clut, 3));
        // Different instance: stale.
        assert!(tracker.register_cached_clut_clobber(&clut, 9));
        assert_eq!(tracker.find_cached_texture(0xaaaa), None);
    }

    #[test]
    fn test_host_sync_page_drain() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        tracker.commit_host_write(&PageRect::linear(33, 2));

        let mut pages = Vec::new();
        tracker.take_sync_host_vram_pages(&mut pages);
        assert_eq!(pages, vec![33, 34]);

        tracker.take_sync_host_vram_pages(&mut pages);
        assert!(pages.is_empty());
    }

    #[test]
    fn test_readback_queues_write_back() {
        let mut tracker: PageTracker<u32> = PageTracker::new(512);
        let req = tracker.mark_readback(&PageRect::linear(64, 1));
        assert_ne!(req.flags & PAGE_TRACKER_FLUSH_WRITE_BACK_BIT, 0);

        let mut pages = Vec::new();
        tracker.take_sync_vram_host_pages(&mut pages);
        assert_eq!(pages, vec![64]);
        assert_eq!(
            tracker.get_host_read_timeline(&PageRect::linear(64, 1)),
            u64::MAX
        );
    }
}
