use crate::error::FallbackSink;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum FallbackDetailCapture {
    #[default]
    RedactedSummaryOnly,
    FullDetails,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct OutputLimits {
    /// Partial lines growing past this many bytes are emitted early, unterminated.
    pub max_line_bytes: Option<usize>,
}

pub struct OutputConfig {
    pub limits: OutputLimits,
    pub channel_capacity: usize,
    pub read_chunk_bytes: usize,
    pub fallback_detail: FallbackDetailCapture,
    pub fallback_sink: Option<Box<dyn FallbackSink>>,
}

impl OutputConfig {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
    pub const DEFAULT_READ_CHUNK_BYTES: usize = 4096;

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.limits.max_line_bytes = Some(max_line_bytes);
        self
    }

    pub fn with_fallback_sink(
        mut self,
        sink: impl FallbackSink,
        capture: FallbackDetailCapture,
    ) -> Self {
        self.fallback_sink = Some(Box::new(sink));
        self.fallback_detail = capture;
        self
    }

    #[cfg(feature = "tokio")]
    pub(crate) fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            limits: OutputLimits::default(),
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
            read_chunk_bytes: Self::DEFAULT_READ_CHUNK_BYTES,
            fallback_detail: FallbackDetailCapture::RedactedSummaryOnly,
            fallback_sink: None,
        }
    }
}
