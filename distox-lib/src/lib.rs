pub mod bootloader;
pub mod calib;
pub mod channel;
pub mod config;
pub mod constants;
pub mod controller;
pub mod device;
pub mod error;
pub mod frame;
pub mod measurement;
pub mod memory;
pub mod mode;
pub mod router;
pub mod transport;


// Re-export the session types for easy access
pub use config::{DeviceConfig, Model};
pub use device::{DistoX, DownloadCount, DownloadEvent, DownloadListener};
pub use error::DistoError;
pub use transport::{Connector, SerialConnector};
