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

//! Vertex queue and primitive kicks
//!
//! XYZ writes push vertices through a 3-deep queue, snapshotting the current
//! ST/UV/RGBAQ/FOG registers. Once the queue holds enough vertices for the
//! current primitive type, the drawing kick derives the pixel-space bounding
//! box, classifies framebuffer feedback, resolves state and texture indices,
//! and appends the primitive to the open render pass. Queue maintenance
//! afterwards depends on the topology: lists drain, strips keep the last two
//! vertices, fans pin the first vertex.

use super::page_tracker::{FlushReason, FlushRequest};
use super::registers::*;
use super::render_pass::{
    DIRTY_DEGENERATE, DIRTY_FEEDBACK, DIRTY_TEX, CLUT_INSTANCES, MAX_PRIMITIVES_PER_FLUSH,
    MAX_STATE_VECTORS, MAX_TEXTURES,
};
use super::renderer::*;
use super::vram::BUFFER_WIDTH_SCALE;
use super::Gs;

/// Vertex coordinates carry 4 fractional bits
pub const SUBPIXEL_BITS: u32 = 4;

// PRIM.PRIM primitive types.
pub const PRIM_POINT: u32 = 0;
pub const PRIM_LINE_LIST: u32 = 1;
pub const PRIM_LINE_STRIP: u32 = 2;
pub const PRIM_TRIANGLE_LIST: u32 = 3;
pub const PRIM_TRIANGLE_STRIP: u32 = 4;
pub const PRIM_TRIANGLE_FAN: u32 = 5;
pub const PRIM_SPRITE: u32 = 6;
pub const PRIM_INVALID: u32 = 7;

/// Queue discipline after a completed primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    List,
    Strip,
    Fan,
}

/// Data-driven kick behavior for one primitive type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KickShape {
    pub num_vertices: u32,
    pub topology: Topology,
    /// Axis-aligned parallelogram rasterization (points and sprites)
    pub quad: bool,
}

/// Kick descriptor for a PRIM.PRIM value; `None` discards vertex kicks
pub fn kick_shape(prim_type: u32) -> Option<KickShape> {
    let shape = match prim_type {
        PRIM_POINT => KickShape {
            num_vertices: 1,
            topology: Topology::List,
            quad: true,
        },
        PRIM_LINE_LIST => KickShape {
            num_vertices: 2,
            topology: Topology::List,
            quad: false,
        },
        PRIM_LINE_STRIP => KickShape {
            num_vertices: 2,
            topology: Topology::Strip,
            quad: false,
        },
        PRIM_TRIANGLE_LIST => KickShape {
            num_vertices: 3,
            topology: Topology::List,
            quad: false,
        },
        PRIM_TRIANGLE_STRIP => KickShape {
            num_vertices: 3,
            topology: Topology::Strip,
            quad: false,
        },
        PRIM_TRIANGLE_FAN => KickShape {
            num_vertices: 3,
            topology: Topology::Fan,
            quad: false,
        },
        PRIM_SPRITE => KickShape {
            num_vertices: 2,
            topology: Topology::List,
            quad: true,
        },
        _ => return None,
    };
    Some(shape)
}

/// The 3-deep vertex queue
#[derive(Debug, Clone, Copy, Default)]
pub struct VertexQueue {
    pub pos: [VertexPosition; 3],
    pub attr: [VertexAttribute; 3],
    pub count: usize,
}

/// How a draw samples the frame buffer it renders to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFeedbackMode {
    None,
    /// Resolve-then-sample; the draw cannot be proven 1:1
    Sliced,
    /// Exact 1:1 texel-to-pixel copy; the render target doubles as texture
    Pixel,
}

impl<R: GsRenderer> Gs<R> {
    fn shift_vertex_queue(&mut self) {
        let q = &mut self.vertex_queue;
        if q.count == 3 {
            q.pos[0] = q.pos[1];
            q.attr[0] = q.attr[1];
            q.pos[1] = q.pos[2];
            q.attr[1] = q.attr[2];
            q.count = 2;
        }
    }

    /// Push a vertex from an XYZ2/XYZ3 write
    pub(crate) fn vertex_kick_xyz(&mut self, xyz: u64) {
        self.shift_vertex_queue();
        let regs = &self.registers;
        let q = &mut self.vertex_queue;

        q.pos[q.count] = VertexPosition {
            x: (xyz & 0xffff) as i32,
            y: ((xyz >> 16) & 0xffff) as i32,
            z: ((xyz >> 32) & 0xffff_ffff) as f32,
        };
        q.attr[q.count] = VertexAttribute {
            s: regs.st.s(),
            t: regs.st.t(),
            q: regs.rgbaq.q(),
            rgba: regs.rgbaq.low_word(),
            fog: regs.fog.f() as f32,
            u: regs.uv.u() as u16,
            v: regs.uv.v() as u16,
        };
        q.count += 1;
    }

    /// Push a vertex from an XYZF2/XYZF3 write; fog rides in the register
    pub(crate) fn vertex_kick_xyzf(&mut self, xyzf: u64) {
        self.shift_vertex_queue();
        let regs = &self.registers;
        let q = &mut self.vertex_queue;

        q.pos[q.count] = VertexPosition {
            x: (xyzf & 0xffff) as i32,
            y: ((xyzf >> 16) & 0xffff) as i32,
            z: ((xyzf >> 32) & 0x00ff_ffff) as f32,
        };
        q.attr[q.count] = VertexAttribute {
            s: regs.st.s(),
            t: regs.st.t(),
            q: regs.rgbaq.q(),
            rgba: regs.rgbaq.low_word(),
            fog: ((xyzf >> 56) & 0xff) as f32,
            u: regs.uv.u() as u16,
            v: regs.uv.v() as u16,
        };
        q.count += 1;
    }

    pub(crate) fn reset_vertex_queue(&mut self) {
        self.vertex_queue.count = 0;
    }

    /// Attempt a draw after a position register write
    pub(crate) fn drawing_kick(&mut self, adc: bool) {
        match self.draw_shape {
            Some(shape) => self.drawing_kick_primitive(shape, adc),
            // Invalid primitive type: vertex kicks are discarded.
            None => self.vertex_queue.count = 0,
        }
        self.post_draw_kick_handler();
    }

    fn drawing_kick_primitive(&mut self, shape: KickShape, adc: bool) {
        if self.vertex_queue.count < shape.num_vertices as usize {
            return;
        }

        if !adc {
            if !self.draw_is_degenerate() {
                self.drawing_kick_append(shape);
            } else {
                log::trace!("Degenerate draw skipped");
            }
        }

        // Queue maintenance happens regardless of ADC and degeneracy.
        match shape.topology {
            Topology::Fan => {
                let q = &mut self.vertex_queue;
                q.pos[1] = q.pos[2];
                q.attr[1] = q.attr[2];
                q.count = 2;
            }
            Topology::List => self.vertex_queue.count = 0,
            // Strips shift on the next vertex kick.
            Topology::Strip => {}
        }
    }

    /// Flush automatically once any render-pass resource cap is reached
    pub(crate) fn post_draw_kick_handler(&mut self) {
        if self.render_pass.pending_palette_updates >= CLUT_INSTANCES
            || self.render_pass.prim.len() >= MAX_PRIMITIVES_PER_FLUSH
            || self.render_pass.tex_infos.len() >= MAX_TEXTURES
            || self.render_pass.state_vectors.len() >= MAX_STATE_VECTORS
        {
            self.flush_pending_transfer(true);
            let flags = self.tracker.flush_render_pass();
            self.run_flush(FlushRequest {
                flags,
                reason: FlushReason::Overflow,
            });
        }
    }

    /// A draw that cannot have side effects, checked once per dirty epoch
    pub(crate) fn draw_is_degenerate(&mut self) -> bool {
        if !self.state_tracker.dirty.take(DIRTY_DEGENERATE) {
            return self.state_tracker.degenerate_draw;
        }

        let prim = self.registers.prim;
        let ctx = &self.registers.ctx[prim.ctxt() as usize];

        let degenerate = if ctx.scissor.scax0() > ctx.scissor.scax1()
            || ctx.scissor.scay0() > ctx.scissor.scay1()
        {
            // Inverted scissor clips everything.
            true
        } else if ctx.test.zte() == ZTE_ENABLED && ctx.test.ztst() == ZTST_NEVER {
            // The depth test can never pass.
            true
        } else if ctx.test.ate() != 0
            && ctx.test.atst() == ATST_NEVER
            && ctx.test.afail() == AFAIL_KEEP
        {
            // Alpha test always fails and failure keeps FB contents.
            true
        } else {
            // Fully masked color and depth. An undefined ZTE ignores depth.
            let read_only_depth =
                ctx.zbuf.zmsk() != 0 || ctx.test.zte() == ZTE_UNDEFINED;
            let read_only_color = ctx.frame.fbmsk() == u32::MAX;
            read_only_color && read_only_depth
        };

        self.state_tracker.degenerate_draw = degenerate;
        degenerate
    }

    /// The current draw reads or writes depth
    pub(crate) fn state_is_z_sensitive(&self) -> bool {
        let prim = self.registers.prim;
        let ctx = &self.registers.ctx[prim.ctxt() as usize];

        if ctx.test.zte() == ZTE_ENABLED {
            if ctx.test.has_z_test() {
                return true;
            }
            // ZTST_NEVER triggers the degenerate path and never gets here.
            if ctx.zbuf.zmsk() == 0 {
                return true;
            }
        }

        false
    }

    fn drawing_kick_append(&mut self, shape: KickShape) {
        let prim = self.registers.prim;
        let ctx = self.registers.ctx[prim.ctxt() as usize];

        let num = shape.num_vertices as usize;
        let quad = shape.quad;
        let is_line = !quad && num == 2;

        let off_x = ctx.xyoffset.ofx() as i32;
        let off_y = ctx.xyoffset.ofy() as i32;

        let mut pos = [VertexPosition::default(); 3];
        let mut attr = [VertexAttribute::default(); 3];
        let count = self.vertex_queue.count;

        if num == 1 {
            pos[0] = self.vertex_queue.pos[count - 1];
            attr[0] = self.vertex_queue.attr[count - 1];
            pos[0].x -= off_x + (1 << (SUBPIXEL_BITS - 1));
            pos[0].y -= off_y + (1 << (SUBPIXEL_BITS - 1));
            // Expand the point into a 1-pixel quad.
            pos[1] = pos[0];
            pos[1].x += 1 << SUBPIXEL_BITS;
            pos[1].y += 1 << SUBPIXEL_BITS;
        } else {
            for i in 0..num {
                pos[i] = self.vertex_queue.pos[count - 1 - i];
                attr[i] = self.vertex_queue.attr[count - 1 - i];
                pos[i].x -= off_x;
                pos[i].y -= off_y;
            }
        }

        let mut lo = [pos[0].x.min(pos[1].x), pos[0].y.min(pos[1].y)];
        let mut hi = [pos[0].x.max(pos[1].x), pos[0].y.max(pos[1].y)];
        if !quad && !is_line {
            lo = [lo[0].min(pos[2].x), lo[1].min(pos[2].y)];
            hi = [hi[0].max(pos[2].x), hi[1].max(pos[2].y)];
        }

        hi[0] -= 1;
        hi[1] -= 1;
        // Tighten per top-left raster rules; AA1 edges cover partial pixels.
        if quad || prim.aa1() == 0 {
            let round = (1 << (SUBPIXEL_BITS - self.sampling_rate_y_log2)) - 1;
            lo[0] += round;
            lo[1] += round;
        }

        lo[0] >>= SUBPIXEL_BITS;
        lo[1] >>= SUBPIXEL_BITS;
        hi[0] >>= SUBPIXEL_BITS;
        hi[1] >>= SUBPIXEL_BITS;

        if is_line {
            // Account for line expansion.
            lo[0] -= 1;
            lo[1] -= 1;
            hi[0] += 1;
            hi[1] += 1;
        }

        lo[0] = lo[0].max(ctx.scissor.scax0() as i32);
        lo[1] = lo[1].max(ctx.scissor.scay0() as i32);
        hi[0] = hi[0].min(ctx.scissor.scax1() as i32);
        hi[1] = hi[1].min(ctx.scissor.scay1() as i32);
        hi[0] = hi[0].min((ctx.frame.fbw() * BUFFER_WIDTH_SCALE) as i32 - 1);

        let bb = [lo[0], lo[1], hi[0], hi[1]];
        if bb[2] < bb[0] || bb[3] < bb[1] {
            // Fully clipped away.
            return;
        }

        self.update_color_feedback_state();
        let mut uv_bb = [0i32; 4];
        let mut feedback_mode = ColorFeedbackMode::None;
        if self.render_pass.is_color_feedback {
            feedback_mode =
                deduce_color_feedback_mode(quad, num, &pos, &attr, &ctx, prim, &mut uv_bb, bb);
        }

        // A partial transfer may feed the texture this draw samples. It has
        // to land before texture state is resolved.
        if prim.tme() != 0 && self.has_unflushed_partial_transfer() {
            log::warn!("Flushing partial transfer due to texture read");
            self.flush_pending_transfer(true);
        }

        // Even with no state changes, FRAME/ZBUF deltas must be considered.
        // Hazard flushes set dirty bits, re-triggering the state checks below.
        self.check_frame_buffer_state();

        debug_assert!(bb[2] < (ctx.frame.fbw() * BUFFER_WIDTH_SCALE) as i32);

        // It must still be safe to read the bound texture. When the tex dirty
        // bit is set this happens while resolving the texture index instead.
        if prim.tme() != 0 && !self.state_tracker.dirty.is_set(DIRTY_TEX) {
            self.texture_page_rects_read();
        }

        self.drawing_kick_update_state(feedback_mode, uv_bb, bb);
        let tpl = self.state_tracker.prim_template;

        let mut prim_attr = PrimitiveAttribute {
            tex: tpl.tex,
            tex2: tpl.tex2,
            state: tpl.state,
            fbmsk: ctx.frame.fbmsk(),
            fogcol: self.registers.fogcol.low_word(),
            alpha: (ctx.alpha.fix() << ALPHA_AFIX_OFFSET) | (ctx.test.aref() << ALPHA_AREF_OFFSET),
            bb: [bb[0] as i16, bb[1] as i16, bb[2] as i16, bb[3] as i16],
        };

        if quad {
            prim_attr.state |= (1 << STATE_BIT_PARALLELOGRAM)
                | (1 << STATE_BIT_SPRITE)
                | (1 << STATE_BIT_SNAP_RASTER);
            prim_attr.state &= !(1 << STATE_BIT_MULTISAMPLE);
        } else if is_line {
            prim_attr.state |= (1 << STATE_BIT_PARALLELOGRAM) | (1 << STATE_BIT_LINE);
            // AA1 lines never have full coverage; suppress Z writes.
            if prim_attr.state & (1 << STATE_BIT_MULTISAMPLE) != 0 {
                prim_attr.state &= !(1 << STATE_BIT_Z_WRITE);
            }
        }

        if num == 1 {
            // Nothing to interpolate, and upscaling a point would break the
            // exact pixel games rely on.
            prim_attr.state |= (1 << STATE_BIT_FIX) | (1 << STATE_BIT_SNAP_RASTER);
        }

        // Page damage is only re-marked when the pass actually grows; doing it
        // per draw would spam the tracker.
        let mut rp_expands = false;
        let is_z_sensitive = self.state_is_z_sensitive();

        if !self.render_pass.z_sensitive && is_z_sensitive {
            self.render_pass.z_sensitive = true;
            rp_expands = true;
        }

        if is_z_sensitive && ctx.zbuf.zmsk() == 0 && !self.render_pass.z_write {
            self.render_pass.z_write = true;
            // Z writes may create a depth feedback that did not exist before.
            self.state_tracker.dirty.mark(DIRTY_FEEDBACK);
            rp_expands = true;
        }

        let write_mask = !ctx.frame.fbmsk();
        if write_mask & self.render_pass.color_write_mask != write_mask {
            self.render_pass.color_write_mask |= write_mask;
            rp_expands = true;
        }

        let rp_bb = &mut self.render_pass.bb;
        if bb[0] < rp_bb[0] {
            rp_bb[0] = bb[0];
            rp_expands = true;
        }
        if bb[1] < rp_bb[1] {
            rp_bb[1] = bb[1];
            rp_expands = true;
        }
        if bb[2] > rp_bb[2] {
            rp_bb[2] = bb[2];
            rp_expands = true;
        }
        if bb[3] > rp_bb[3] {
            rp_bb[3] = bb[3];
            rp_expands = true;
        }

        if rp_expands {
            let mut fb_rect = self.compute_fb_rect(self.render_pass.bb);
            fb_rect.write_mask &= self.render_pass.color_write_mask;
            if let Some(req) = self.tracker.mark_fb_write(&fb_rect) {
                self.run_flush(req);
            }

            if self.render_pass.z_sensitive {
                let z_rect = self.compute_z_rect(self.render_pass.bb);
                let req = if self.render_pass.z_write {
                    self.tracker.mark_fb_write(&z_rect)
                } else {
                    self.tracker.mark_fb_read(&z_rect)
                };
                if let Some(req) = req {
                    self.run_flush(req);
                }
            }
        }

        self.render_pass.prim.push(prim_attr);
        self.render_pass.positions.extend_from_slice(&pos);
        self.render_pass.attributes.extend_from_slice(&attr);

        // Everything is resolved for this register state now, even if a
        // mid-append flush left stale dirty bits behind.
        self.state_tracker.dirty.clear_all();
    }
}

/// Classify how a feedback draw samples the frame buffer
///
/// `Pixel` mode requires proof of exact 1:1 texel addressing: no perspective,
/// nearest magnification, no clamping observable within the primitive, and
/// every UV-vs-position delta inside one pixel so NEAREST snapping lands on
/// the written texel.
#[allow(clippy::too_many_arguments)]
pub(crate) fn deduce_color_feedback_mode(
    quad: bool,
    num_vertices: usize,
    pos: &[VertexPosition; 3],
    attr: &[VertexAttribute; 3],
    ctx: &ContextState,
    prim: Prim,
    uv_bb: &mut [i32; 4],
    bb: [i32; 4],
) -> ColorFeedbackMode {
    // Sprites and triangles can feed back; lines and points cannot.
    let can_feedback = num_vertices == 3 || (quad && num_vertices == 2);
    if !can_feedback {
        return ColorFeedbackMode::None;
    }

    let width = 1i32 << ctx.tex0.tw();
    let height = 1i32 << ctx.tex0.th();
    let fwidth = (width << SUBPIXEL_BITS) as f32;
    let fheight = (height << SUBPIXEL_BITS) as f32;
    let mut needs_perspective = false;

    let mut uv = [[0i32; 2]; 3];
    if prim.fst() != 0 {
        for i in 0..num_vertices.min(if quad { 2 } else { 3 }) {
            uv[i] = [attr[i].u as i32, attr[i].v as i32];
        }
    } else {
        // With varying Q the mapping is perspective and cannot be pixel
        // exact. Sprites use flat Q0 only.
        if !quad && (attr[0].q != attr[1].q || attr[1].q != attr[2].q) {
            needs_perspective = true;
        }

        for i in 0..(if quad { 2 } else { 3 }) {
            let inv_q = 1.0 / attr[i].q;
            uv[i] = [
                (fwidth * attr[i].s * inv_q) as i32,
                (fheight * attr[i].t * inv_q) as i32,
            ];
        }
    }

    let used = if quad { 2 } else { 3 };
    let mut uv_min = uv[0];
    let mut uv_max = uv[0];
    for v in uv.iter().take(used).skip(1) {
        uv_min = [uv_min[0].min(v[0]), uv_min[1].min(v[1])];
        uv_max = [uv_max[0].max(v[0]), uv_max[1].max(v[1])];
    }

    // Linear filtering samples half a texel around the point.
    if ctx.tex1.mmag() != 0 {
        uv_min[0] -= 1 << (SUBPIXEL_BITS - 1);
        uv_min[1] -= 1 << (SUBPIXEL_BITS - 1);
        uv_max[0] += (1 << SUBPIXEL_BITS) - 1;
        uv_max[1] += (1 << SUBPIXEL_BITS) - 1;
    }

    // This can safely become a REGION_CLAMP.
    *uv_bb = [
        uv_min[0] >> SUBPIXEL_BITS,
        uv_min[1] >> SUBPIXEL_BITS,
        uv_max[0] >> SUBPIXEL_BITS,
        uv_max[1] >> SUBPIXEL_BITS,
    ];

    if needs_perspective || ctx.tex1.mmag() == MAG_LINEAR {
        return ColorFeedbackMode::Sliced;
    }

    // If the region clamp contains the whole primitive BB, clamping is not
    // observable and can be ignored; otherwise it breaks 1:1 addressing.
    if ctx.clamp.wms() == WM_REGION_CLAMP {
        let minu = ctx.clamp.minu() as i32;
        let maxu = ctx.clamp.maxu() as i32;
        if bb[0] < minu || bb[2] > maxu {
            return ColorFeedbackMode::Sliced;
        }
    }

    if ctx.clamp.wmt() == WM_REGION_CLAMP {
        let minv = ctx.clamp.minv() as i32;
        let maxv = ctx.clamp.maxv() as i32;
        if bb[1] < minv || bb[3] > maxv {
            return ColorFeedbackMode::Sliced;
        }
    }

    let mut min_delta = i32::MAX;
    let mut max_delta = i32::MIN;
    for i in 0..used {
        let dx = uv[i][0] - pos[i].x;
        let dy = uv[i][1] - pos[i].y;
        min_delta = min_delta.min(dx).min(dy);
        max_delta = max_delta.max(dx).max(dy);
    }

    // Deltas within [0, 2^SUBPIXEL_BITS) guarantee NEAREST snaps each pixel
    // center onto its own texel.
    if min_delta < 0 || max_delta >= 1 << SUBPIXEL_BITS {
        return ColorFeedbackMode::Sliced;
    }

    ColorFeedbackMode::Pixel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kick_shapes() {
        assert_eq!(
            kick_shape(PRIM_POINT),
            Some(KickShape {
                num_vertices: 1,
                topology: Topology::List,
                quad: true
            })
        );
        assert_eq!(
            kick_shape(PRIM_TRIANGLE_FAN),
            Some(KickShape {
                num_vertices: 3,
                topology: Topology::Fan,
                quad: false
            })
        );
        assert_eq!(
            kick_shape(PRIM_SPRITE),
            Some(KickShape {
                num_vertices: 2,
                topology: Topology::List,
                quad: true
            })
        );
        assert_eq!(kick_shape(PRIM_INVALID), None);
    }

    fn feedback_ctx(tw: u32, th: u32) -> ContextState {
        let mut ctx = ContextState::default();
        ctx.tex0.set_tw(tw);
        ctx.tex0.set_th(th);
        ctx
    }

    #[test]
    fn test_pixel_feedback_for_aligned_sprite() {
        let ctx = feedback_ctx(10, 9);
        let mut prim = Prim(0);
        prim.set_fst(1);

        let pos = [
            VertexPosition { x: 0, y: 0, z: 0.0 },
            VertexPosition {
                x: 640 << SUBPIXEL_BITS,
                y: 448 << SUBPIXEL_BITS,
                z: 0.0,
            },
            VertexPosition::default(),
        ];
        let attr = [
            VertexAttribute {
                u: 0,
                v: 0,
                ..Default::default()
            },
            VertexAttribute {
                u: (640 << SUBPIXEL_BITS) as u16,
                v: (448 << SUBPIXEL_BITS) as u16,
                ..Default::default()
            },
            VertexAttribute::default(),
        ];

        let mut uv_bb = [0; 4];
        let mode = deduce_color_feedback_mode(
            true,
            2,
            &pos,
            &attr,
            &ctx,
            prim,
            &mut uv_bb,
            [0, 0, 639, 447],
        );
        assert_eq!(mode, ColorFeedbackMode::Pixel);
        assert_eq!(uv_bb, [0, 0, 640, 448]);
    }

    #[test]
    fn test_offset_sprite_is_sliced() {
        let ctx = feedback_ctx(10, 9);
        let mut prim = Prim(0);
        prim.set_fst(1);

        // UVs shifted a full pixel off the positions.
        let pos = [
            VertexPosition { x: 32, y: 0, z: 0.0 },
            VertexPosition {
                x: (640 << SUBPIXEL_BITS) + 32,
                y: 448 << SUBPIXEL_BITS,
                z: 0.0,
            },
            VertexPosition::default(),
        ];
        let attr = [
            VertexAttribute {
                u: 0,
                v: 0,
                ..Default::default()
            },
            VertexAttribute {
                u: (640 << SUBPIXEL_BITS) as u16,
                v: (448 << SUBPIXEL_BITS) as u16,
                ..Default::default()
            },
            VertexAttribute::default(),
        ];

        let mut uv_bb = [0; 4];
        let mode = deduce_color_feedback_mode(
            true,
            2,
            &pos,
            &attr,
            &ctx,
            prim,
            &mut uv_bb,
            [2, 0, 641, 447],
        );
        assert_eq!(mode, ColorFeedbackMode::Sliced);
    }

    #[test]
    fn test_linear_filtering_is_sliced() {
        let mut ctx = feedback_ctx(10, 9);
        ctx.tex1.set_mmag(MAG_LINEAR);
        let mut prim = Prim(0);
        prim.set_fst(1);

        let pos = [VertexPosition::default(); 3];
        let attr = [VertexAttribute::default(); 3];
        let mut uv_bb = [0; 4];
        let mode =
            deduce_color_feedback_mode(true, 2, &pos, &attr, &ctx, prim, &mut uv_bb, [0, 0, 7, 7]);
        assert_eq!(mode, ColorFeedbackMode::Sliced);
    }

    #[test]
    fn test_perspective_triangle_is_sliced() {
        let ctx = feedback_ctx(8, 8);
        let prim = Prim(0); // FST=0: ST/Q addressing

        let pos = [VertexPosition::default(); 3];
        let mut attr = [VertexAttribute::default(); 3];
        attr[0].q = 1.0;
        attr[1].q = 2.0;
        attr[2].q = 1.0;

        let mut uv_bb = [0; 4];
        let mode =
            deduce_color_feedback_mode(false, 3, &pos, &attr, &ctx, prim, &mut uv_bb, [0, 0, 7, 7]);
        assert_eq!(mode, ColorFeedbackMode::Sliced);
    }

    #[test]
    fn test_lines_never_feed_back() {
        let ctx = feedback_ctx(8, 8);
        let prim = Prim(0);
        let pos = [VertexPosition::default(); 3];
        let attr = [VertexAttribute::default(); 3];
        let mut uv_bb = [0; 4];
        let mode =
            deduce_color_feedback_mode(false, 2, &pos, &attr, &ctx, prim, &mut uv_bb, [0, 0, 1, 1]);
        assert_eq!(mode, ColorFeedbackMode::None);
    }
}
