use btleplug::api::BDAddr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlissError {
    #[error("no Bluetooth adapter available")]
    AdapterNotAvailable,

    #[error("no fixture with address {address} found within {timeout_secs}s")]
    DeviceNotFound { address: BDAddr, timeout_secs: u64 },

    #[error("characteristic {uuid} not found on {address}")]
    CharacteristicNotFound { address: BDAddr, uuid: Uuid },

    #[error("not connected to {address}")]
    NotConnected { address: BDAddr },

    #[error("scene index {index} out of range, fixture stores {count} scenes")]
    SceneOutOfRange { index: u8, count: u8 },

    #[error("invalid mac address {mac:?}")]
    InvalidAddress { mac: String },

    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}
