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

//! ps2gs: A PlayStation 2 Graphics Synthesizer command-stream core
//!
//! This crate implements the front half of a GS emulator: it ingests GIF
//! packets, maintains the GS register file, and batches primitives, texture
//! uploads and VRAM transfers into coarse render passes that a GPU-accelerated
//! renderer consumes.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`core::gs`]: GIF packet demux, register decoding, primitive kicks,
//!   render-pass batching and the VRAM page tracker
//! - [`core::error`]: Error types shared across the crate
//!
//! The GPU-side renderer is not part of this crate. It is consumed through the
//! [`core::gs::renderer::GsRenderer`] trait, which covers render-pass
//! submission, VRAM copies, palette-cache updates, cached-texture creation and
//! host/GPU timeline synchronization.
//!
//! # Getting Started
//!
//! 1. Implement [`core::gs::renderer::GsRenderer`] over your GPU backend
//! 2. Create a [`core::gs::Gs`] engine with [`core::gs::renderer::GsOptions`]
//! 3. Feed GIF packets through `gif_transfer` and scan out with `vsync`
//!
//! # Error Handling
//!
//! The command stream is trusted input and never produces errors. Fallible
//! operations (construction, host VRAM mapping) return
//! [`core::error::Result<T>`] which is an alias for
//! `Result<T, EmulatorError>`.

pub mod core;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
