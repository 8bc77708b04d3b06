pub mod bluetooth;
pub mod bt_discovery;
pub mod simulated;
pub mod traits;

pub use bluetooth::BluetoothTransport;
pub use simulated::{SimulatedTransport, WriteRecord};
pub use traits::{
    BleTransport, Capabilities, CharacteristicInfo, DiscoveryStream, LinkHandle,
    NotificationStream, PeripheralRecord,
};
