/// MiaoMiao transmitter: length-prefixed 0x28 packets carrying uid, FRAM and patch info
use crate::bluetooth::{
    Action, Characteristic, DeviceInfo, FramPayload, NotificationContext, TransmitterProtocol,
    TransportSession, VendorProfile, MIAOMIAO_PROFILE,
};
use crate::utils::hex;

const PACKET_START: u8 = 0x28;
const NEW_SENSOR: u8 = 0x32;
const NO_SENSOR: u8 = 0x34;
const FREQUENCY_ACK: u8 = 0xD1;

/// Header up to the FRAM and the shortest complete packet
const FRAM_OFFSET: usize = 18;
const MIN_PACKET_LENGTH: usize = 363;
const FRAM_LENGTH: usize = 344;
const PATCH_INFO_OFFSET: usize = 363;

#[derive(Debug, Clone, Default)]
pub struct MiaoMiao {
    pub session: TransportSession<()>,
    pub info: DeviceInfo,
}

impl MiaoMiao {
    /// Declared length once the three header bytes are in
    fn expected_length(&self) -> Option<usize> {
        let buffer = &self.session.buffer;
        if buffer.len() < 3 {
            return None;
        }
        let declared = u16::from_be_bytes([buffer[1], buffer[2]]) as usize;
        Some(declared.max(MIN_PACKET_LENGTH))
    }

    fn complete_packet(&mut self, ctx: &mut NotificationContext<'_>) -> Vec<Action> {
        let packet = std::mem::take(&mut self.session.buffer);
        self.info.battery = Some(packet[13]);
        self.info.firmware = hex(&packet[14..16]);
        self.info.hardware = hex(&packet[16..18]);

        let uid = packet[5..13].to_vec();
        if ctx.sensor.uid != uid {
            ctx.state.active_sensor_uid = uid.clone();
            ctx.sensor.set_uid(uid);
        }
        if packet.len() >= PATCH_INFO_OFFSET + 6 {
            ctx.sensor
                .set_patch_info(packet[PATCH_INFO_OFFSET..PATCH_INFO_OFFSET + 6].to_vec());
        }

        vec![
            Action::Fram(FramPayload {
                bytes: packet[FRAM_OFFSET..FRAM_OFFSET + FRAM_LENGTH].to_vec(),
            }),
            Action::status(format!(
                "{}  +  MiaoMiao (battery {}%)",
                ctx.sensor.sensor_type, packet[13]
            )),
        ]
    }
}

impl TransmitterProtocol for MiaoMiao {
    fn profile(&self) -> &'static VendorProfile {
        &MIAOMIAO_PROFILE
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn parse_manufacturer_data(&mut self, _data: &[u8]) -> Vec<Action> {
        Vec::new()
    }

    fn read_command(&self, interval: u8) -> Vec<u8> {
        match interval {
            1 | 3 => vec![0xD1, interval, 0xF0],
            _ => vec![0xF0],
        }
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
        if self.session.buffer.is_empty() {
            match data.first() {
                Some(&PACKET_START) => {}
                Some(&NEW_SENSOR) => {
                    return vec![
                        Action::status("MiaoMiao: new sensor detected"),
                        Action::write(vec![0xD3, 0x01]),
                    ]
                }
                Some(&NO_SENSOR) => {
                    return vec![Action::status("MiaoMiao: no sensor"), Action::SensorGone]
                }
                Some(&FREQUENCY_ACK) => {
                    let accepted = data.get(1) == Some(&0x01);
                    return vec![Action::status(format!(
                        "MiaoMiao: reading interval {}",
                        if accepted { "accepted" } else { "rejected" }
                    ))];
                }
                _ => return Vec::new(),
            }
        }

        self.session.buffer.extend_from_slice(data);
        match self.expected_length() {
            Some(length) if self.session.buffer.len() >= length => self.complete_packet(ctx),
            _ => Vec::new(),
        }
    }

    fn disconnected(&mut self) {
        self.session.reset();
    }
}
