pub type CogtileResult<T> = Result<T, CogtileError>;

#[derive(thiserror::Error, Debug)]
pub enum CogtileError {
    #[error("invalid step index {index} (pipeline has {len} steps)")]
    InvalidIndex { index: usize, len: usize },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported sample type: {0}")]
    UnsupportedSampleType(String),

    #[error("unknown scene: {0}")]
    UnknownScene(String),

    #[error("scene error: {0}")]
    Scene(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("gpu device lost: {0}")]
    DeviceLost(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CogtileError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn unsupported_sample_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedSampleType(msg.into())
    }

    pub fn scene(msg: impl Into<String>) -> Self {
        Self::Scene(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn device_lost(msg: impl Into<String>) -> Self {
        Self::DeviceLost(msg.into())
    }

    /// Device-level failures retire the GPU backend for the session; every
    /// other error only fails the tile at hand.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            CogtileError::decode("x")
                .to_string()
                .contains("decode error:")
        );
        assert!(
            CogtileError::unsupported_sample_type("float32")
                .to_string()
                .contains("unsupported sample type:")
        );
        assert!(
            CogtileError::scene("x")
                .to_string()
                .contains("scene error:")
        );
        assert!(CogtileError::gpu("x").to_string().contains("gpu error:"));
        assert_eq!(
            CogtileError::InvalidIndex { index: 3, len: 3 }.to_string(),
            "invalid step index 3 (pipeline has 3 steps)"
        );
    }

    #[test]
    fn only_device_loss_retires_the_backend() {
        assert!(CogtileError::device_lost("poll failed").is_device_lost());
        assert!(!CogtileError::gpu("validation").is_device_lost());
        assert!(!CogtileError::decode("bad bytes").is_device_lost());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = CogtileError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
