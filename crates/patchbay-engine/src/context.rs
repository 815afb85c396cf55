use patchbay_interface::FrameTime;

/// Per-block processing state handed to every execute() call.
///
/// Constructed fresh by the engine at the top of each audio block.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    start: FrameTime,
    end: FrameTime,
    nframes: u32,
}

impl ProcessContext {
    pub fn new(start: FrameTime, nframes: u32) -> Self {
        Self {
            start,
            end: start + FrameTime::from(nframes),
            nframes,
        }
    }

    pub fn start(&self) -> FrameTime {
        self.start
    }

    /// One past the last frame of this block.
    pub fn end(&self) -> FrameTime {
        self.end
    }

    pub fn nframes(&self) -> u32 {
        self.nframes
    }

    /// Offset of `time` within this block, clamped to the block range.
    ///
    /// Times before the block clamp to the first sample; a time at or past
    /// the block end clamps to the last sample.
    pub fn offset_of(&self, time: FrameTime) -> u32 {
        if time <= self.start {
            0
        } else {
            ((time - self.start).min(FrameTime::from(self.nframes.saturating_sub(1)))) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_clamp_to_block() {
        let ctx = ProcessContext::new(100, 16);
        assert_eq!(ctx.offset_of(90), 0);
        assert_eq!(ctx.offset_of(100), 0);
        assert_eq!(ctx.offset_of(107), 7);
        assert_eq!(ctx.offset_of(115), 15);
        assert_eq!(ctx.offset_of(116), 15);
        assert_eq!(ctx.end(), 116);
    }
}
