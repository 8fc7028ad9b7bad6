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

//! VRAM transfer engine
//!
//! TRXDIR writes kick one of three transfer directions. HOST→LOCAL latches
//! the transfer registers and accumulates HWREG qwords until the computed
//! payload size is reached, then hands the copy to the renderer. A partial
//! transfer can be forced out early when a dependent CLUT or texture read
//! arrives; `last_flushed_qwords` tracks how much already went out so
//! re-emission never duplicates payload. LOCAL→LOCAL copies are enqueued
//! immediately. LOCAL→HOST arms the readback path; the host maps VRAM after
//! waiting on the returned timeline.

use super::registers::*;
use super::renderer::{CopyVram, GsRenderer};
use super::vram::{bits_per_pixel, compute_page_rect};
use super::Gs;

/// Transfer registers latched at TRXDIR time
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferCopyRegs {
    pub trxdir: TrxDir,
    pub trxpos: TrxPos,
    pub trxreg: TrxReg,
    pub bitbltbuf: BitBltBuf,
}

/// State of the active HOST→LOCAL transfer
#[derive(Debug, Default)]
pub struct TransferState {
    pub host_to_local_active: bool,
    pub required_qwords: usize,
    pub last_flushed_qwords: usize,
    pub payload: Vec<u64>,
    pub copy: TransferCopyRegs,
}

impl<R: GsRenderer> Gs<R> {
    /// Payload received but not yet handed to the renderer
    pub(crate) fn has_unflushed_partial_transfer(&self) -> bool {
        self.transfer_state.host_to_local_active
            && self.transfer_state.payload.len() > self.transfer_state.last_flushed_qwords
    }

    /// HWREG write; only meaningful while a HOST→LOCAL transfer is active
    pub(crate) fn hwreg_write(&mut self, payload: u64) {
        if self.transfer_state.host_to_local_active {
            self.transfer_state.payload.push(payload);
            self.check_pending_transfer();
        }
    }

    /// Bulk HWREG payload from an IMAGE-format GIF packet
    pub(crate) fn hwreg_write_bulk(&mut self, data: &[u8]) {
        if !self.transfer_state.host_to_local_active {
            return;
        }
        for chunk in data.chunks_exact(8) {
            self.transfer_state
                .payload
                .push(u64::from_le_bytes(chunk.try_into().unwrap()));
        }
        self.check_pending_transfer();
    }

    fn check_pending_transfer(&mut self) {
        if self.transfer_state.host_to_local_active
            && self.transfer_state.payload.len() >= self.transfer_state.required_qwords
        {
            self.flush_pending_transfer(false);
        }
    }

    /// Hand accumulated HOST→LOCAL payload to the renderer
    ///
    /// With `keep_alive` the transfer stays active for further HWREG data;
    /// a game may keep streaming after a dependent read forced a partial
    /// flush.
    pub(crate) fn flush_pending_transfer(&mut self, keep_alive: bool) {
        if self.has_unflushed_partial_transfer() {
            let regs = self.transfer_state.copy;
            if regs.bitbltbuf != self.registers.bitbltbuf {
                log::warn!("Mismatch in BITBLTBUF state between transfer kick and flush");
            }
            if regs.trxpos != self.registers.trxpos {
                log::warn!("Mismatch in TRXPOS state between transfer kick and flush");
            }
            if regs.trxreg != self.registers.trxreg {
                log::warn!("Mismatch in TRXREG state between transfer kick and flush");
            }

            let dst_rect = compute_page_rect(
                regs.bitbltbuf.dbp(),
                regs.trxpos.dsax(),
                regs.trxpos.dsay(),
                regs.trxreg.rrw(),
                regs.trxreg.rrh(),
                regs.bitbltbuf.dbw(),
                regs.bitbltbuf.dpsm(),
            );

            if let Some(req) = self.tracker.mark_transfer_write(&dst_rect) {
                self.run_flush(req);
            }
            let hashes = self
                .tracker
                .invalidate_texture_cache(self.render_pass.clut_instance);
            self.apply_texture_invalidation(&hashes);

            let copy = CopyVram {
                trxpos: regs.trxpos,
                trxreg: regs.trxreg,
                trxdir: regs.trxdir,
                bitbltbuf: regs.bitbltbuf,
                host_data: &self.transfer_state.payload,
                offset_qwords: self.transfer_state.last_flushed_qwords,
                required_qwords: self.transfer_state.required_qwords,
            };
            self.renderer.copy_vram(&copy);

            log::debug!(
                "VRAM upload: {} / {} qwords",
                self.transfer_state.payload.len(),
                self.transfer_state.required_qwords
            );

            // We may never receive the rest of the payload; remember how much
            // went out so a later flush only sends the tail.
            self.transfer_state.last_flushed_qwords = self.transfer_state.payload.len();
        }

        if !keep_alive {
            self.transfer_state.payload.clear();
            self.transfer_state.last_flushed_qwords = 0;
            self.transfer_state.host_to_local_active = false;
        }
    }

    /// TRXDIR write: latch the transfer registers and start the transfer
    pub(crate) fn init_transfer(&mut self) {
        self.flush_pending_transfer(false);

        self.transfer_state.copy = TransferCopyRegs {
            trxdir: self.registers.trxdir,
            trxpos: self.registers.trxpos,
            trxreg: self.registers.trxreg,
            bitbltbuf: self.registers.bitbltbuf,
        };
        let regs = self.transfer_state.copy;

        match regs.trxdir.xdir() {
            LOCAL_TO_LOCAL => {
                let dst_rect = compute_page_rect(
                    regs.bitbltbuf.dbp(),
                    regs.trxpos.dsax(),
                    regs.trxpos.dsay(),
                    regs.trxreg.rrw(),
                    regs.trxreg.rrh(),
                    regs.bitbltbuf.dbw(),
                    regs.bitbltbuf.dpsm(),
                );
                let src_rect = compute_page_rect(
                    regs.bitbltbuf.sbp(),
                    regs.trxpos.ssax(),
                    regs.trxpos.ssay(),
                    regs.trxreg.rrw(),
                    regs.trxreg.rrh(),
                    regs.bitbltbuf.sbw(),
                    regs.bitbltbuf.spsm(),
                );

                if let Some(req) = self.tracker.mark_transfer_copy(&dst_rect, &src_rect) {
                    self.run_flush(req);
                }

                let copy = CopyVram {
                    trxpos: regs.trxpos,
                    trxreg: regs.trxreg,
                    trxdir: regs.trxdir,
                    bitbltbuf: regs.bitbltbuf,
                    host_data: &[],
                    offset_qwords: 0,
                    required_qwords: 0,
                };
                self.renderer.copy_vram(&copy);
                log::debug!(
                    "LOCAL→LOCAL copy: {}x{} SBP {:#x} → DBP {:#x}",
                    regs.trxreg.rrw(),
                    regs.trxreg.rrh(),
                    regs.bitbltbuf.sbp(),
                    regs.bitbltbuf.dbp()
                );
            }
            HOST_TO_LOCAL => {
                let qwords = (regs.trxreg.rrw() as usize
                    * regs.trxreg.rrh() as usize
                    * bits_per_pixel(regs.bitbltbuf.dpsm()) as usize)
                    / 64;
                self.transfer_state.required_qwords = qwords;
                self.transfer_state.host_to_local_active = qwords != 0;
                // Now await HWREG writes.
            }
            LOCAL_TO_HOST => {
                let src_rect = compute_page_rect(
                    regs.bitbltbuf.sbp(),
                    regs.trxpos.ssax(),
                    regs.trxpos.ssay(),
                    regs.trxreg.rrw(),
                    regs.trxreg.rrh(),
                    regs.bitbltbuf.sbw(),
                    regs.bitbltbuf.spsm(),
                );
                let req = self.tracker.mark_readback(&src_rect);
                self.run_flush(req);
                log::debug!(
                    "LOCAL→HOST readback armed: {}x{} SBP {:#x}",
                    regs.trxreg.rrw(),
                    regs.trxreg.rrh(),
                    regs.bitbltbuf.sbp()
                );
            }
            _ => {
                // Deactivated.
            }
        }
    }
}
