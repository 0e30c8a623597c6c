/// Coarse network health shown next to the call controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLabel {
    Unknown,
    Good,
    Fair,
    Poor,
}

/// Uplink/downlink ordinal scores as reported by the transport (lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkQualitySample {
    pub uplink: u8,
    pub downlink: u8,
}

/// Reduce a sample to a label using the worse of the two directions.
pub fn label(uplink: u8, downlink: u8) -> QualityLabel {
    match uplink.max(downlink) {
        0..=2 => QualityLabel::Good,
        3..=4 => QualityLabel::Fair,
        _ => QualityLabel::Poor,
    }
}

/// Keeps only the latest sample. No smoothing.
#[derive(Debug, Default)]
pub struct NetworkQualityMonitor {
    latest: Option<NetworkQualitySample>,
}

impl NetworkQualityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; returns the new label if it differs from the previous one.
    pub fn record(&mut self, sample: NetworkQualitySample) -> Option<QualityLabel> {
        let before = self.label();
        self.latest = Some(sample);
        let after = self.label();
        (before != after).then_some(after)
    }

    pub fn label(&self) -> QualityLabel {
        self.latest
            .map(|s| label(s.uplink, s.downlink))
            .unwrap_or(QualityLabel::Unknown)
    }

    pub fn latest(&self) -> Option<NetworkQualitySample> {
        self.latest
    }

    pub fn reset(&mut self) {
        self.latest = None;
    }
}
