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

//! Engine-level scenario tests driven through a recording mock renderer

use super::kick::{PRIM_SPRITE, PRIM_TRIANGLE_LIST, SUBPIXEL_BITS};
use super::page_tracker::FlushReason;
use super::registers::*;
use super::render_pass::{BB_EMPTY, DIRTY_ALL, DIRTY_STATE, MAX_PRIMITIVES_PER_FLUSH};
use super::renderer::*;
use super::vram::{PSMCT32, PSMT8};
use super::Gs;

#[derive(Debug, Clone)]
struct CapturedPass {
    prims: Vec<PrimitiveAttribute>,
    num_states: usize,
    num_textures: usize,
    reason: FlushReason,
    feedback_texture: bool,
}

#[derive(Default)]
struct MockRenderer {
    host_vram: Vec<u8>,
    passes: Vec<CapturedPass>,
    copies: usize,
    transfers_flushed: usize,
    barriers: usize,
    cache_uploads: usize,
    palette_updates: u32,
    textures_created: u32,
    submits: Vec<u64>,
    waits: Vec<u64>,
    host_vram_copies: Vec<Vec<u32>>,
    readbacks: Vec<Vec<u32>>,
}

impl MockRenderer {
    fn new() -> Self {
        MockRenderer {
            host_vram: vec![0u8; 4 * 1024 * 1024],
            ..MockRenderer::default()
        }
    }
}

impl GsRenderer for MockRenderer {
    type Image = u32;

    fn flush_rendering(&mut self, rp: &RenderPassDesc<'_, u32>) {
        self.passes.push(CapturedPass {
            prims: rp.prims.to_vec(),
            num_states: rp.states.len(),
            num_textures: rp.textures.len(),
            reason: rp.flush_reason,
            feedback_texture: rp.feedback_texture,
        });
    }

    fn flush_transfer(&mut self) {
        self.transfers_flushed += 1;
    }

    fn transfer_overlap_barrier(&mut self) {
        self.barriers += 1;
    }

    fn flush_cache_upload(&mut self) {
        self.cache_uploads += 1;
    }

    fn flush_host_vram_copy(&mut self, pages: &[u32]) {
        self.host_vram_copies.push(pages.to_vec());
    }

    fn flush_readback(&mut self, pages: &[u32]) {
        self.readbacks.push(pages.to_vec());
    }

    fn copy_vram(&mut self, _copy: &CopyVram<'_>) {
        self.copies += 1;
    }

    fn update_palette_cache(&mut self, _upload: &PaletteUpload) -> u32 {
        let instance = self.palette_updates;
        self.palette_updates += 1;
        instance
    }

    fn create_cached_texture(&mut self, _desc: &TextureDescriptor) -> u32 {
        self.textures_created += 1;
        self.textures_created
    }

    fn invalidate_super_sampling_state(&mut self) {}

    fn begin_host_vram_access(&mut self) -> &mut [u8] {
        &mut self.host_vram
    }

    fn end_host_write_vram_access(&mut self) {}

    fn wait_timeline(&mut self, timeline: u64) {
        self.waits.push(timeline);
    }

    fn flush_submit(&mut self, timeline: u64) {
        self.submits.push(timeline);
    }

    fn vsync(&mut self, _privs: &PrivRegisterState, _info: &VSyncInfo) -> ScanoutResult<u32> {
        ScanoutResult {
            image: None,
            width: 0,
            height: 0,
        }
    }

    fn consume_flush_stats(&mut self) -> FlushStats {
        FlushStats {
            num_render_passes: self.passes.len() as u64,
            num_copies: self.copies as u64,
            num_copy_barriers: self.barriers as u64,
            num_palette_updates: self.palette_updates as u64,
        }
    }

    fn get_accumulated_timestamps(&self, _ty: TimestampType) -> f64 {
        0.0
    }
}

fn gs() -> Gs<MockRenderer> {
    let _ = env_logger::builder().is_test(true).try_init();
    Gs::new(MockRenderer::new(), &GsOptions::default()).unwrap()
}

fn frame_reg(fbp: u32, fbw: u32, psm: u32) -> u64 {
    let mut frame = Frame(0);
    frame.set_fbp(fbp);
    frame.set_fbw(fbw);
    frame.set_psm(psm);
    frame.0
}

fn scissor_reg(x0: u32, x1: u32, y0: u32, y1: u32) -> u64 {
    let mut scissor = Scissor(0);
    scissor.set_scax0(x0);
    scissor.set_scax1(x1);
    scissor.set_scay0(y0);
    scissor.set_scay1(y1);
    scissor.0
}

fn xyz_reg(x: u32, y: u32, z: u32) -> u64 {
    (x as u64 & 0xffff) | ((y as u64 & 0xffff) << 16) | ((z as u64) << 32)
}

fn uv_reg(u: u32, v: u32) -> u64 {
    let mut uv = Uv(0);
    uv.set_u(u);
    uv.set_v(v);
    uv.0
}

/// Bind a 640-wide 32-bit framebuffer at FBP 0 with a 640x448 scissor.
fn bind_default_fb(gs: &mut Gs<MockRenderer>) {
    gs.write_register(ADDR_FRAME_1, frame_reg(0, 10, PSMCT32));
    gs.write_register(ADDR_SCISSOR_1, scissor_reg(0, 639, 0, 447));
}

fn draw_triangle(gs: &mut Gs<MockRenderer>) {
    gs.write_register(ADDR_XYZ2, xyz_reg(0, 0, 0));
    gs.write_register(ADDR_XYZ2, xyz_reg(640 << SUBPIXEL_BITS, 0, 0));
    gs.write_register(ADDR_XYZ2, xyz_reg(0, 448 << SUBPIXEL_BITS, 0));
}

#[test]
fn test_single_opaque_triangle() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);

    // Nothing emits until the explicit flush.
    assert!(gs.renderer.passes.is_empty());
    gs.flush();

    assert_eq!(gs.renderer.passes.len(), 1);
    let pass = &gs.renderer.passes[0];
    assert_eq!(pass.prims.len(), 1);
    assert_eq!(pass.num_states, 1);
    assert_eq!(pass.num_textures, 0);
    assert_eq!(pass.reason, FlushReason::SubmissionFlush);
    assert_eq!(pass.prims[0].bb, [0, 0, 639, 447]);
    // An untextured, unblended, untested draw is opaque.
    assert_ne!(pass.prims[0].state & (1 << STATE_BIT_OPAQUE), 0);
}

#[test]
fn test_render_pass_resets_after_flush() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);
    gs.flush();

    assert!(gs.render_pass.prim.is_empty());
    assert!(gs.render_pass.positions.is_empty());
    assert!(gs.render_pass.state_vectors.is_empty());
    assert!(gs.render_pass.tex_infos.is_empty());
    assert_eq!(gs.render_pass.bb, BB_EMPTY);
    assert_eq!(gs.state_tracker.dirty.bits(), DIRTY_ALL);
}

#[test]
fn test_clut_upload_memoization() {
    let mut gs = gs();

    let mut tex0 = Tex0(0);
    tex0.set_psm(PSMT8);
    tex0.set_cbp(0xc80);
    tex0.set_cld(CLD_LOAD);

    gs.write_register(ADDR_TEX0_1, tex0.0);
    gs.write_register(ADDR_TEX0_1, tex0.0);

    // The second identical upload memoizes.
    assert_eq!(gs.renderer.palette_updates, 1);
    assert_eq!(gs.render_pass.pending_palette_updates, 1);
    assert_eq!(gs.render_pass.num_memoized_palettes(), 1);
}

#[test]
fn test_clut_compare_mode_skips_matching_cbp() {
    let mut gs = gs();

    let mut tex0 = Tex0(0);
    tex0.set_psm(PSMT8);
    tex0.set_cbp(0xc80);
    tex0.set_cld(CLD_COMPARE_LOAD_CBP0);

    // Cached CBP0 starts at 0, so the first compare loads.
    gs.write_register(ADDR_TEX0_1, tex0.0);
    assert_eq!(gs.renderer.palette_updates, 1);

    // Matching CBP: no load at all.
    gs.write_register(ADDR_TEX0_1, tex0.0);
    assert_eq!(gs.renderer.palette_updates, 1);
    assert_eq!(gs.render_pass.num_memoized_palettes(), 1);
}

#[test]
fn test_pixel_feedback_sprite() {
    let mut gs = gs();
    bind_default_fb(&mut gs);

    // Texture = frame buffer: same base, same stride, 1024x512 covers the
    // 640-wide FB, scissor stays below TH.
    let mut tex0 = Tex0(0);
    tex0.set_tbp0(0);
    tex0.set_tbw(10);
    tex0.set_psm(PSMCT32);
    tex0.set_tw(10);
    tex0.set_th(9);
    gs.write_register(ADDR_TEX0_1, tex0.0);

    let mut prim = Prim(0);
    prim.set_prim(PRIM_SPRITE);
    prim.set_tme(1);
    prim.set_fst(1);
    gs.write_register(ADDR_PRIM, prim.0);

    // Full-screen sprite with UV equal to XY.
    gs.write_register(ADDR_UV, uv_reg(0, 0));
    gs.write_register(ADDR_XYZ2, xyz_reg(0, 0, 0));
    gs.write_register(
        ADDR_UV,
        uv_reg(640 << SUBPIXEL_BITS, 448 << SUBPIXEL_BITS),
    );
    gs.write_register(
        ADDR_XYZ2,
        xyz_reg(640 << SUBPIXEL_BITS, 448 << SUBPIXEL_BITS, 0),
    );

    assert!(gs.render_pass.is_color_feedback);
    assert!(gs.render_pass.has_color_feedback);
    assert_eq!(gs.render_pass.prim.len(), 1);

    // The texture index carries the feedback sentinel; no image was
    // synthesized and no hazard fired.
    let tex = gs.render_pass.prim[0].tex;
    assert_ne!(
        tex & (TEX_FEEDBACK_INDEX_BIT << TEX_TEXTURE_INDEX_OFFSET),
        0
    );
    assert_eq!(gs.renderer.textures_created, 0);
    assert_eq!(gs.renderer.cache_uploads, 0);
    assert!(gs.renderer.passes.is_empty());

    gs.flush();
    assert_eq!(gs.renderer.passes.len(), 1);
    assert!(gs.renderer.passes[0].feedback_texture);
}

#[test]
fn test_transfer_then_clut_read_flushes_cache() {
    let mut gs = gs();

    // HOST→LOCAL: one 64x32 32-bit page at block 0xc80 (page 100).
    let mut bltbuf = BitBltBuf(0);
    bltbuf.set_dbp(0xc80);
    bltbuf.set_dbw(1);
    bltbuf.set_dpsm(PSMCT32);
    gs.write_register(ADDR_BITBLTBUF, bltbuf.0);

    let mut trxreg = TrxReg(0);
    trxreg.set_rrw(64);
    trxreg.set_rrh(32);
    gs.write_register(ADDR_TRXREG, trxreg.0);
    gs.write_register(ADDR_TRXPOS, 0);
    gs.write_register(ADDR_TRXDIR, HOST_TO_LOCAL as u64);

    // 64*32*32 bits = 1024 qwords completes the transfer.
    for i in 0..1024u64 {
        gs.write_register(ADDR_HWREG, i);
    }
    assert_eq!(gs.renderer.copies, 1);

    // A CLUT load from the freshly written page must flush copy + cache
    // queues so the upload sees current VRAM.
    let mut tex0 = Tex0(0);
    tex0.set_psm(PSMT8);
    tex0.set_cbp(0xc80);
    tex0.set_cld(CLD_LOAD);
    gs.write_register(ADDR_TEX0_1, tex0.0);

    assert_eq!(gs.renderer.transfers_flushed, 1);
    assert_eq!(gs.renderer.cache_uploads, 1);
}

#[test]
fn test_fb_pointer_change_flushes_mid_pass() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);
    draw_triangle(&mut gs);

    // Move the frame buffer; the third draw must flush the first two.
    gs.write_register(ADDR_FRAME_1, frame_reg(0x100, 10, PSMCT32));
    draw_triangle(&mut gs);

    assert_eq!(gs.renderer.passes.len(), 1);
    assert_eq!(gs.renderer.passes[0].reason, FlushReason::FBPointer);
    assert_eq!(gs.renderer.passes[0].prims.len(), 2);

    gs.flush();
    assert_eq!(gs.renderer.passes.len(), 2);
    assert_eq!(gs.renderer.passes[1].prims.len(), 1);
}

#[test]
fn test_primitive_overflow_forces_flush() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);

    for _ in 0..MAX_PRIMITIVES_PER_FLUSH {
        gs.write_register(ADDR_XYZ2, xyz_reg(0, 0, 0));
        gs.write_register(ADDR_XYZ2, xyz_reg(16 << SUBPIXEL_BITS, 0, 0));
        gs.write_register(ADDR_XYZ2, xyz_reg(0, 16 << SUBPIXEL_BITS, 0));
    }

    // The cap triggers right after the last append.
    assert_eq!(gs.renderer.passes.len(), 1);
    assert_eq!(gs.renderer.passes[0].reason, FlushReason::Overflow);
    assert_eq!(gs.renderer.passes[0].prims.len(), MAX_PRIMITIVES_PER_FLUSH);
    assert!(gs.render_pass.prim.is_empty());
}

#[test]
fn test_register_write_idempotence() {
    let mut gs = gs();

    let mut test = Test(0);
    test.set_ate(1);
    test.set_atst(ATST_NEVER);

    gs.state_tracker.dirty.clear_all();
    gs.write_register(ADDR_TEST_1, test.0);
    assert!(gs.state_tracker.dirty.is_set(DIRTY_STATE));

    // The second identical write sets no new dirty bits.
    gs.state_tracker.dirty.clear_all();
    gs.write_register(ADDR_TEST_1, test.0);
    assert_eq!(gs.state_tracker.dirty.bits(), 0);
}

#[test]
fn test_submission_timelines_increase() {
    let mut gs = gs();
    gs.flush();
    gs.flush();
    gs.flush();
    assert_eq!(gs.renderer.submits, vec![1, 2, 3]);
}

#[test]
fn test_degenerate_scissor_drops_draws() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    // Inverted scissor.
    gs.write_register(ADDR_SCISSOR_1, scissor_reg(100, 50, 0, 447));
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);

    gs.flush();
    assert!(gs.renderer.passes.is_empty());
}

#[test]
fn test_ztst_never_is_degenerate() {
    let mut gs = gs();
    bind_default_fb(&mut gs);

    let mut test = Test(0);
    test.set_zte(ZTE_ENABLED);
    test.set_ztst(ZTST_NEVER);
    gs.write_register(ADDR_TEST_1, test.0);

    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);

    gs.flush();
    assert!(gs.renderer.passes.is_empty());
}

#[test]
fn test_adc_kicks_do_not_draw() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);

    // XYZ3 only updates the queue.
    gs.write_register(ADDR_XYZ3, xyz_reg(0, 0, 0));
    gs.write_register(ADDR_XYZ3, xyz_reg(640 << SUBPIXEL_BITS, 0, 0));
    gs.write_register(ADDR_XYZ3, xyz_reg(0, 448 << SUBPIXEL_BITS, 0));

    gs.flush();
    assert!(gs.renderer.passes.is_empty());
}

#[test]
fn test_map_vram_write_forces_submission() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);

    // Mapping the page the pass renders to must submit and wait.
    let mapping = gs.map_vram_write(0, 4096).unwrap();
    mapping.fill(0xaa);
    gs.end_vram_write(0, 4096);

    assert_eq!(gs.renderer.passes.len(), 1);
    assert_eq!(gs.renderer.submits, vec![1]);
    assert_eq!(gs.renderer.waits, vec![1]);

    // The host-written page uploads with the next flush.
    gs.flush();
    assert_eq!(gs.renderer.host_vram_copies, vec![vec![0]]);
}

#[test]
fn test_map_vram_rejects_bad_range() {
    let mut gs = gs();
    assert!(gs.map_vram_write(4 * 1024 * 1024, 16).is_err());
    assert!(gs.map_vram_read(0, 0).is_err());
}

#[test]
fn test_local_to_host_readback() {
    let mut gs = gs();

    let mut bltbuf = BitBltBuf(0);
    bltbuf.set_sbp(0);
    bltbuf.set_sbw(1);
    bltbuf.set_spsm(PSMCT32);
    gs.write_register(ADDR_BITBLTBUF, bltbuf.0);

    let mut trxreg = TrxReg(0);
    trxreg.set_rrw(64);
    trxreg.set_rrh(32);
    gs.write_register(ADDR_TRXREG, trxreg.0);
    gs.write_register(ADDR_TRXDIR, LOCAL_TO_HOST as u64);

    assert_eq!(gs.renderer.readbacks, vec![vec![0]]);

    // The host read then waits on a fresh timeline.
    let _ = gs.map_vram_read(0, 4096).unwrap();
    assert_eq!(gs.renderer.submits, vec![1]);
    assert_eq!(gs.renderer.waits, vec![1]);
}

#[test]
fn test_gif_packed_triangle_stream() {
    let mut gs = gs();
    bind_default_fb(&mut gs);

    // PACKED tag with PRE setting PRIM to a triangle list and the classic
    // (ST, RGBAQ, XYZ2) shape, one loop per vertex.
    let prim_bits = PRIM_TRIANGLE_LIST as u64;
    let tag_lo = 3u64 | (1 << 46) | (prim_bits << 47) | (3u64 << 60);
    let tag_hi = 0x512u64;

    let mut packet = Vec::new();
    packet.extend_from_slice(&tag_lo.to_le_bytes());
    packet.extend_from_slice(&tag_hi.to_le_bytes());

    let verts: [(u32, u32); 3] = [(0, 0), (640, 0), (0, 448)];
    for &(x, y) in &verts {
        // ST
        packet.extend_from_slice(&0u64.to_le_bytes());
        packet.extend_from_slice(&1.0f32.to_bits().to_le_bytes());
        packet.extend_from_slice(&0u32.to_le_bytes());
        // RGBAQ
        packet.extend_from_slice(&0x80u64.to_le_bytes());
        packet.extend_from_slice(&0x80u64.to_le_bytes());
        // XYZ2
        let lo = (x << SUBPIXEL_BITS) as u64 | (((y << SUBPIXEL_BITS) as u64) << 32);
        packet.extend_from_slice(&lo.to_le_bytes());
        packet.extend_from_slice(&0u64.to_le_bytes());
    }

    gs.gif_transfer(0, &packet);
    gs.flush();

    assert_eq!(gs.renderer.passes.len(), 1);
    let pass = &gs.renderer.passes[0];
    assert_eq!(pass.prims.len(), 1);
    assert_eq!(pass.prims[0].bb, [0, 0, 639, 447]);
}

#[test]
fn test_gif_ad_only_stream() {
    let mut gs = gs();

    // A+D-only tag carrying FRAME and SCISSOR writes.
    let tag_lo = 2u64 | (1u64 << 60);
    let tag_hi = 0xeu64;

    let mut packet = Vec::new();
    packet.extend_from_slice(&tag_lo.to_le_bytes());
    packet.extend_from_slice(&tag_hi.to_le_bytes());
    packet.extend_from_slice(&frame_reg(0x80, 8, PSMCT32).to_le_bytes());
    packet.extend_from_slice(&(ADDR_FRAME_1 as u64).to_le_bytes());
    packet.extend_from_slice(&scissor_reg(0, 511, 0, 255).to_le_bytes());
    packet.extend_from_slice(&(ADDR_SCISSOR_1 as u64).to_le_bytes());

    gs.gif_transfer(0, &packet);

    assert_eq!(gs.register_state().ctx[0].frame.fbp(), 0x80);
    assert_eq!(gs.register_state().ctx[0].scissor.scax1(), 511);
}

#[test]
fn test_gif_image_stream_feeds_transfer() {
    let mut gs = gs();

    let mut bltbuf = BitBltBuf(0);
    bltbuf.set_dbp(0);
    bltbuf.set_dbw(1);
    bltbuf.set_dpsm(PSMCT32);
    gs.write_register(ADDR_BITBLTBUF, bltbuf.0);

    let mut trxreg = TrxReg(0);
    trxreg.set_rrw(8);
    trxreg.set_rrh(8);
    gs.write_register(ADDR_TRXREG, trxreg.0);
    gs.write_register(ADDR_TRXPOS, 0);
    gs.write_register(ADDR_TRXDIR, HOST_TO_LOCAL as u64);

    // 8x8x32bpp = 256 bytes = 16 quadwords of IMAGE data.
    let tag_lo = 16u64 | (2u64 << 58);
    let mut packet = Vec::new();
    packet.extend_from_slice(&tag_lo.to_le_bytes());
    packet.extend_from_slice(&0u64.to_le_bytes());
    for i in 0..32u64 {
        packet.extend_from_slice(&i.to_le_bytes());
    }

    gs.gif_transfer(0, &packet);
    assert_eq!(gs.renderer.copies, 1);
}

#[test]
fn test_prim_write_resets_vertex_queue() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);

    gs.write_register(ADDR_XYZ2, xyz_reg(0, 0, 0));
    gs.write_register(ADDR_XYZ2, xyz_reg(640 << SUBPIXEL_BITS, 0, 0));
    // PRIM rewrite drops the two queued vertices.
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    gs.write_register(ADDR_XYZ2, xyz_reg(0, 448 << SUBPIXEL_BITS, 0));

    gs.flush();
    assert!(gs.renderer.passes.is_empty());
}

#[test]
fn test_state_vector_dedup_across_draws() {
    let mut gs = gs();
    bind_default_fb(&mut gs);
    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);

    draw_triangle(&mut gs);
    draw_triangle(&mut gs);

    // Toggle blending on, then back off: three distinct register states but
    // only two unique state vectors.
    let mut alpha = Alpha(0);
    alpha.set_d(1);
    gs.write_register(ADDR_ALPHA_1, alpha.0);
    let mut prim = Prim(0);
    prim.set_prim(PRIM_TRIANGLE_LIST);
    prim.set_abe(1);
    gs.write_register(ADDR_PRIM, prim.0);
    draw_triangle(&mut gs);

    gs.write_register(ADDR_PRIM, PRIM_TRIANGLE_LIST as u64);
    draw_triangle(&mut gs);

    gs.flush();
    assert_eq!(gs.renderer.passes.len(), 1);
    assert_eq!(gs.renderer.passes[0].prims.len(), 4);
    assert_eq!(gs.renderer.passes[0].num_states, 2);
}
