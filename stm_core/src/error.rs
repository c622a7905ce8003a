use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StmError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("poll limit of {limit} exceeded while {during}")]
    PollLimit { limit: u64, during: &'static str },
    #[error("current sampler stalled: no good sample for {stalled_ms} ms")]
    SamplerStalled { stalled_ms: u64 },
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing piezo drive")]
    MissingPiezo,
    #[error("missing stepper")]
    MissingStepper,
    #[error("missing current sense")]
    MissingCurrentSense,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
