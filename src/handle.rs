// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::id::SegmentId;

/// An index entry points at the start byte of a record inside a segment
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IndexEntry {
    /// Segment ID
    pub segment_id: SegmentId,

    /// Offset in file
    pub offset: u64,
}
