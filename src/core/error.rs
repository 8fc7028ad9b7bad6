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

//! Error types
//!
//! The command stream itself is trusted input and never produces errors, so
//! the fallible surface is small: engine construction and host VRAM mapping.

use std::fmt;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Errors produced by the GS core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// The configured VRAM size is unusable
    ///
    /// VRAM must be a non-zero multiple of the page size with a power-of-two
    /// page count so page indices can wrap with a mask.
    InvalidVramSize { size: usize },

    /// A host VRAM mapping request falls outside the VRAM range
    InvalidVramRange { offset: usize, size: usize },
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::InvalidVramSize { size } => {
                write!(f, "invalid VRAM size: {} bytes", size)
            }
            EmulatorError::InvalidVramRange { offset, size } => {
                write!(
                    f,
                    "host VRAM mapping out of range: offset {} size {}",
                    offset, size
                )
            }
        }
    }
}

impl std::error::Error for EmulatorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EmulatorError::InvalidVramSize { size: 12345 };
        assert_eq!(err.to_string(), "invalid VRAM size: 12345 bytes");

        let err = EmulatorError::InvalidVramRange {
            offset: 4096,
            size: 64,
        };
        assert_eq!(
            err.to_string(),
            "host VRAM mapping out of range: offset 4096 size 64"
        );
    }
}
