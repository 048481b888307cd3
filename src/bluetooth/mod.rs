/// Transmitter framing state machines and the BLE driver that runs them
pub mod abbott;
pub mod blucon;
pub mod bubble;
pub mod miaomiao;
pub mod scanner;

use bluer::Uuid;
use std::fmt;

use crate::nfc::SecurityContext;
use crate::sensor::{PersistedState, Sensor};

pub use abbott::{Abbott, AbbottAuthentication};
pub use blucon::{BluCon, BluConRequest, BluConResponse};
pub use bubble::Bubble;
pub use miaomiao::MiaoMiao;

/// Expand a 16-bit assigned number against the Bluetooth base UUID
const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5F9B_34FB)
}

/// GATT service and characteristic triple used by a transmitter family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProfile {
    pub name: &'static str,
    pub service: Uuid,
    pub write: Uuid,
    pub read: Uuid,
}

pub const ABBOTT_PROFILE: VendorProfile = VendorProfile {
    name: "Libre",
    service: short_uuid(0xFDE3),
    write: short_uuid(0xF001),
    read: short_uuid(0xF002),
};

const NORDIC_UART_SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
const NORDIC_UART_WRITE: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
const NORDIC_UART_READ: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

pub const BUBBLE_PROFILE: VendorProfile = VendorProfile {
    name: "Bubble",
    service: NORDIC_UART_SERVICE,
    write: NORDIC_UART_WRITE,
    read: NORDIC_UART_READ,
};

pub const MIAOMIAO_PROFILE: VendorProfile = VendorProfile {
    name: "MiaoMiao",
    service: NORDIC_UART_SERVICE,
    write: NORDIC_UART_WRITE,
    read: NORDIC_UART_READ,
};

pub const BLUCON_PROFILE: VendorProfile = VendorProfile {
    name: "BluCon",
    service: Uuid::from_u128(0x436A62C0_082E_4CE8_A08B_01D81F195B24),
    write: Uuid::from_u128(0x436AA6E9_082E_4CE8_A08B_01D81F195B24),
    read: Uuid::from_u128(0x436A0C82_082E_4CE8_A08B_01D81F195B24),
};

/// Transmitter families that can be selected in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Abbott,
    Bubble,
    MiaoMiao,
    BluCon,
}

impl Vendor {
    pub const ALL: [Vendor; 4] = [Vendor::Abbott, Vendor::Bubble, Vendor::MiaoMiao, Vendor::BluCon];

    pub fn profile(&self) -> &'static VendorProfile {
        match self {
            Vendor::Abbott => &ABBOTT_PROFILE,
            Vendor::Bubble => &BUBBLE_PROFILE,
            Vendor::MiaoMiao => &MIAOMIAO_PROFILE,
            Vendor::BluCon => &BLUCON_PROFILE,
        }
    }

    /// Parse a configuration name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "abbott" | "libre" => Some(Vendor::Abbott),
            "bubble" => Some(Vendor::Bubble),
            "miaomiao" => Some(Vendor::MiaoMiao),
            "blucon" => Some(Vendor::BluCon),
            _ => None,
        }
    }

    /// Recognize a transmitter from its advertised name
    pub fn from_device_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.starts_with("abbott") {
            Some(Vendor::Abbott)
        } else if name.starts_with("Bubble") {
            Some(Vendor::Bubble)
        } else if lower.contains("miaomiao") {
            Some(Vendor::MiaoMiao)
        } else if name.starts_with("BLU") {
            Some(Vendor::BluCon)
        } else {
            None
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().name)
    }
}

/// Which of the two profile characteristics a notification or write concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    Write,
    Read,
}

/// A complete memory image reassembled from notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramPayload {
    pub bytes: Vec<u8>,
}

/// Side effects requested by a state machine, executed by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Write { characteristic: Characteristic, bytes: Vec<u8> },
    EnableNotify(Characteristic),
    Status(String),
    Fram(FramPayload),
    /// Decrypted Libre 2 BLE payload
    BlePayload(Vec<u8>),
    SensorGone,
}

impl Action {
    pub fn write(bytes: impl Into<Vec<u8>>) -> Self {
        Action::Write {
            characteristic: Characteristic::Write,
            bytes: bytes.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Action::Status(message.into())
    }
}

/// Per-connection reassembly state, dropped on disconnect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportSession<A> {
    pub buffer: Vec<u8>,
    pub authentication: A,
    pub security_context: Option<SecurityContext>,
}

impl<A: Default> TransportSession<A> {
    pub fn reset(&mut self) {
        *self = TransportSession::default();
    }
}

/// Battery and version details reported by a transmitter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub battery: Option<u8>,
    pub firmware: String,
    pub hardware: String,
    pub mac_address: Vec<u8>,
}

/// Mutable state a notification handler may update
pub struct NotificationContext<'a> {
    pub sensor: &'a mut Sensor,
    pub state: &'a mut PersistedState,
    /// Minutes between readings requested from the transmitter
    pub reading_interval: u8,
}

/// Behaviour shared by every transmitter family.
///
/// Implementations are pure state machines: they never touch the radio,
/// only return the actions the driver has to carry out.
pub trait TransmitterProtocol {
    fn profile(&self) -> &'static VendorProfile;

    fn device_info(&self) -> &DeviceInfo;

    /// Decode the vendor part of an advertisement
    fn parse_manufacturer_data(&mut self, data: &[u8]) -> Vec<Action>;

    /// Command that starts periodic readings, empty when not applicable
    fn read_command(&self, interval: u8) -> Vec<u8>;

    /// Actions to run once the profile characteristics are resolved
    fn on_connected(&mut self, ctx: &mut NotificationContext<'_>) -> Vec<Action>;

    fn handle_notification(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        ctx: &mut NotificationContext<'_>,
    ) -> Vec<Action>;

    /// Drop reassembly and authentication state
    fn disconnected(&mut self);
}

#[derive(Debug, Clone)]
pub enum Transmitter {
    Abbott(Abbott),
    Bubble(Bubble),
    MiaoMiao(MiaoMiao),
    BluCon(BluCon),
}

impl Transmitter {
    pub fn new(vendor: Vendor, device_name: &str) -> Self {
        match vendor {
            Vendor::Abbott => Transmitter::Abbott(Abbott::from_device_name(device_name)),
            Vendor::Bubble => Transmitter::Bubble(Bubble::default()),
            Vendor::MiaoMiao => Transmitter::MiaoMiao(MiaoMiao::default()),
            Vendor::BluCon => Transmitter::BluCon(BluCon::default()),
        }
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            Transmitter::Abbott(_) => Vendor::Abbott,
            Transmitter::Bubble(_) => Vendor::Bubble,
            Transmitter::MiaoMiao(_) => Vendor::MiaoMiao,
            Transmitter::BluCon(_) => Vendor::BluCon,
        }
    }

    fn inner(&self) -> &dyn TransmitterProtocol {
        match self {
            Transmitter::Abbott(t) => t,
            Transmitter::Bubble(t) => t,
            Transmitter::MiaoMiao(t) => t,
            Transmitter::BluCon(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TransmitterProtocol {
        match self {
            Transmitter::Abbott(t) => t,
            Transmitter::Bubble(t) => t,
            Transmitter::MiaoMiao(t) => t,
            Transmitter::BluCon(t) => t,
        }
    }
}

impl TransmitterProtocol for Transmitter {
    fn profile(&self) -> &'static VendorProfile {
        self.inner().profile()
    }

    fn device_info(&self) -> &DeviceInfo {
        self.inner().device_info()
    }

    fn parse_manufacturer_data(&mut self, data: &[u8]) -> Vec<Action> {
        self.inner_mut().parse_manufacturer_data(data)
    }

    fn read_command(&self, interval: u8) -> Vec<u8> {
        self.inner().read_command(interval)
    }

    fn on_connected(&mut self, ctx: &mut NotificationContext<'_>) -> Vec<Action> {
        self.inner_mut().on_connected(ctx)
    }

    fn handle_notification(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        ctx: &mut NotificationContext<'_>,
    ) -> Vec<Action> {
        self.inner_mut().handle_notification(characteristic, data, ctx)
    }

    fn disconnected(&mut self) {
        self.inner_mut().disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuids_expand_against_base() {
        assert_eq!(
            ABBOTT_PROFILE.service.to_string(),
            "0000fde3-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            BUBBLE_PROFILE.read.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn vendors_from_names() {
        assert_eq!(Vendor::from_device_name("ABBOTT3MH001DG75W"), Some(Vendor::Abbott));
        assert_eq!(Vendor::from_device_name("Bubble_Nano"), Some(Vendor::Bubble));
        assert_eq!(Vendor::from_device_name("miaomiao2"), Some(Vendor::MiaoMiao));
        assert_eq!(Vendor::from_device_name("BLU01234"), Some(Vendor::BluCon));
        assert_eq!(Vendor::from_device_name("Ruuvi 1234"), None);
        assert_eq!(Vendor::from_name(" BluCon "), Some(Vendor::BluCon));
        assert_eq!(Vendor::from_name("dexcom"), None);
    }

    #[test]
    fn transmitter_dispatches_to_vendor() {
        let transmitter = Transmitter::new(Vendor::Bubble, "Bubble");
        assert_eq!(transmitter.vendor(), Vendor::Bubble);
        assert_eq!(transmitter.profile(), &BUBBLE_PROFILE);
        assert_eq!(transmitter.read_command(5), vec![0x00, 0x00, 0x05]);
    }
}
