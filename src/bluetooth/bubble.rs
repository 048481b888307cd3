/// Bubble transmitter: tagged responses and 344-byte FRAM reassembly
use crate::bluetooth::{
    Action, Characteristic, DeviceInfo, FramPayload, NotificationContext, TransmitterProtocol,
    TransportSession, VendorProfile, BUBBLE_PROFILE,
};
use crate::sensor::SensorType;
use crate::utils::{hex, hex_address};

const FRAM_LENGTH: usize = 344;
const CHALLENGE_LENGTH: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleResponse {
    DataInfo = 0x80,
    DataPacket = 0x82,
    DecryptedDataPacket = 0x88,
    SecurityChallenge = 0x8A,
    NoSensor = 0xBF,
    SerialNumber = 0xC0,
    PatchInfo = 0xC1,
}

impl BubbleResponse {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x80 => Some(BubbleResponse::DataInfo),
            0x82 => Some(BubbleResponse::DataPacket),
            0x88 => Some(BubbleResponse::DecryptedDataPacket),
            0x8A => Some(BubbleResponse::SecurityChallenge),
            0xBF => Some(BubbleResponse::NoSensor),
            0xC0 => Some(BubbleResponse::SerialNumber),
            0xC1 => Some(BubbleResponse::PatchInfo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bubble {
    pub session: TransportSession<()>,
    pub info: DeviceInfo,
    /// Gen-2 challenge forwarded by the transmitter
    pub challenge: Vec<u8>,
}

impl Bubble {
    /// Firmware as a number, `0.0` when unknown
    fn firmware_version(&self) -> f64 {
        self.info.firmware.parse().unwrap_or(0.0)
    }

    fn data_info(&mut self, data: &[u8], ctx: &NotificationContext<'_>) -> Vec<Action> {
        if data.len() < 5 {
            return Vec::new();
        }
        self.info.battery = Some(data[4]);
        self.info.firmware = format!("{}.{}", data[2], data[3]);
        self.info.hardware = format!("{}.{}", data[data.len() - 2], data[data.len() - 1]);

        let patch_info = if ctx.state.patch_info.is_empty() {
            &ctx.sensor.patch_info
        } else {
            &ctx.state.patch_info
        };
        let sensor_type = SensorType::from_patch_info(patch_info);
        let decrypted = self.firmware_version() >= 2.6
            && matches!(sensor_type, SensorType::Libre2 | SensorType::LibreUS14day);
        let reply = if decrypted {
            vec![0x08, 0x01, 0x00, 0x00, 0x00, 0x2B]
        } else {
            vec![0x02, 0x01, 0x00, 0x00, 0x00, 0x2B]
        };
        vec![
            Action::status(format!(
                "Bubble: battery: {}, firmware: {}, hardware: {}",
                data[4], self.info.firmware, self.info.hardware
            )),
            Action::write(reply),
        ]
    }

    fn security_challenge(&mut self, data: &[u8]) -> Vec<Action> {
        let buffer = &mut self.session.buffer;
        if buffer.is_empty() && data.len() > 5 {
            buffer.extend_from_slice(&data[5..]);
        } else if buffer.len() == 15 && data.len() > 4 {
            buffer.extend_from_slice(&data[4..]);
        }
        if buffer.len() == 28 {
            self.challenge = buffer[..CHALLENGE_LENGTH].to_vec();
            buffer.clear();
            return vec![Action::status(format!(
                "Bubble: gen2 security challenge: {}",
                hex(&self.challenge)
            ))];
        }
        Vec::new()
    }

    fn data_packet(&mut self, data: &[u8], ctx: &NotificationContext<'_>) -> Vec<Action> {
        if data.len() > 4 {
            self.session.buffer.extend_from_slice(&data[4..]);
        }
        if self.session.buffer.len() < FRAM_LENGTH {
            return Vec::new();
        }
        let mut bytes = std::mem::take(&mut self.session.buffer);
        bytes.truncate(FRAM_LENGTH);
        vec![
            Action::Fram(FramPayload { bytes }),
            Action::status(format!("{}  +  Bubble", ctx.sensor.sensor_type)),
        ]
    }
}

impl TransmitterProtocol for Bubble {
    fn profile(&self) -> &'static VendorProfile {
        &BUBBLE_PROFILE
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn parse_manufacturer_data(&mut self, data: &[u8]) -> Vec<Action> {
        if data.len() < 12 {
            return Vec::new();
        }
        self.info.firmware = format!("{}.{}", data[8], data[9]);
        self.info.hardware = format!("{}.{}", data[10], data[11]);
        self.info.mac_address = data[2..8].iter().rev().copied().collect();
        let mut message = format!(
            "Bubble: advertised manufacturer data: firmware: {}, hardware: {}, MAC address: {}",
            self.info.firmware,
            self.info.hardware,
            hex_address(&self.info.mac_address)
        );
        if let Some(battery) = data.get(12) {
            self.info.battery = Some(*battery);
            message.push_str(&format!(", battery: {}", battery));
        }
        vec![Action::Status(message)]
    }

    fn read_command(&self, interval: u8) -> Vec<u8> {
        vec![0x00, 0x00, interval]
    }

    fn on_connected(&mut self, ctx: &mut NotificationContext<'_>) -> Vec<Action> {
        vec![
            Action::EnableNotify(Characteristic::Read),
            Action::write(self.read_command(ctx.reading_interval)),
        ]
    }

    fn handle_notification(
        &mut self,
        _characteristic: Characteristic,
        data: &[u8],
        ctx: &mut NotificationContext<'_>,
    ) -> Vec<Action> {
        let Some(response) = data.first().and_then(|tag| BubbleResponse::from_tag(*tag)) else {
            return Vec::new();
        };
        match response {
            BubbleResponse::NoSensor => {
                self.session.buffer.clear();
                vec![Action::status("Bubble: no sensor"), Action::SensorGone]
            }
            BubbleResponse::DataInfo => self.data_info(data, ctx),
            BubbleResponse::SerialNumber => {
                if data.len() >= 10 {
                    let uid = data[2..10].to_vec();
                    ctx.state.active_sensor_uid = uid.clone();
                    ctx.sensor.set_uid(uid);
                }
                Vec::new()
            }
            BubbleResponse::PatchInfo => {
                let range = if self.firmware_version() < 1.35 { 3..9 } else { 5..11 };
                if data.len() >= range.end {
                    ctx.state.patch_info = data[range].to_vec();
                    ctx.sensor.set_patch_info(ctx.state.patch_info.clone());
                    return vec![Action::status(format!(
                        "Bubble: patch info: {}, sensor type: {}, serial number: {}",
                        hex(&ctx.sensor.patch_info),
                        ctx.sensor.sensor_type,
                        ctx.sensor.serial
                    ))];
                }
                Vec::new()
            }
            BubbleResponse::SecurityChallenge => self.security_challenge(data),
            BubbleResponse::DataPacket | BubbleResponse::DecryptedDataPacket => {
                self.data_packet(data, ctx)
            }
        }
    }

    fn disconnected(&mut self) {
        self.session.reset();
    }
}
