use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum MachineError {
    /// Link-level failure (timeout after retries, desynchronized stream).
    #[error("link error: {0}")]
    Link(String),
    /// Device answered with a nonzero status byte; transient, the run loop
    /// keeps polling.
    #[error("device fault on message {id}: status {status}")]
    DeviceFault { id: u8, status: u8 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing AC power sense")]
    MissingAcSense,
    #[error("missing mode dial")]
    MissingDial,
    #[error("missing pump switch")]
    MissingPumpSwitch,
    #[error("missing pump output")]
    MissingPump,
    #[error("missing solenoid output")]
    MissingSolenoid,
    #[error("missing indicator bank")]
    MissingIndicators,
    #[error("missing boiler controller")]
    MissingBoiler,
    #[error("missing autobrew schedule")]
    MissingScheduler,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
