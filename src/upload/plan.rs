//! Part boundaries for a multipart upload

use super::UploadError;
use crate::s3::MAX_PARTS;
use std::ops::Range;

/// Fixed-size split of a source into 1-based, contiguous parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    total_size: u64,
    part_size: u64,
    total_parts: u32,
}

/// One part awaiting transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTask {
    pub part_number: u32,
    pub range: Range<u64>,
}

impl PartTask {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartPlan {
    /// Plan `ceil(total_size / part_size)` parts.
    ///
    /// Every part is `part_size` bytes except the last, which holds the
    /// remainder.
    pub fn new(total_size: u64, part_size: u64) -> Result<Self, UploadError> {
        if total_size == 0 {
            return Err(UploadError::EmptySource);
        }
        if part_size == 0 {
            return Err(UploadError::InvalidPartSize(part_size));
        }

        let required = total_size.div_ceil(part_size);
        if required > u64::from(MAX_PARTS) {
            return Err(UploadError::TooManyParts {
                required,
                max: MAX_PARTS,
            });
        }

        Ok(Self {
            total_size,
            part_size,
            total_parts: required as u32,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// The task for `part_number`, or `None` outside `1..=total_parts`
    pub fn part(&self, part_number: u32) -> Option<PartTask> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }

        let start = u64::from(part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.total_size);
        Some(PartTask {
            part_number,
            range: start..end,
        })
    }

    /// All tasks in part-number order
    pub fn tasks(&self) -> impl Iterator<Item = PartTask> + '_ {
        (1..=self.total_parts).filter_map(move |n| self.part(n))
    }
}
