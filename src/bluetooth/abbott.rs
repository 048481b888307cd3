/// Native Libre 2 / Libre Sense BLE: streaming unlock, gen-2 handshake and 46-byte frames
use crate::bluetooth::{
    Action, Characteristic, DeviceInfo, NotificationContext, TransmitterProtocol,
    TransportSession, VendorProfile, ABBOTT_PROFILE,
};
use crate::nfc::SecurityContext;
use crate::sensor::cipher::{decrypt_ble, streaming_unlock_payload, BLE_PACKET_LENGTH};
use crate::sensor::{SensorFamily, SensorType};
use crate::utils::hex;

const FIRST_PACKET_LENGTH: usize = 20;
const CHALLENGE_LENGTH: usize = 14;
const SESSION_INFO_LENGTH: usize = 25;
const READ_CHALLENGE: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbbottAuthentication {
    #[default]
    NotAuthenticated,
    EnableNotification,
    ChallengeResponse,
    GetSessionInfo,
    Authenticated,
    BleLogin,
}

#[derive(Debug, Clone, Default)]
pub struct Abbott {
    pub session: TransportSession<AbbottAuthentication>,
    pub info: DeviceInfo,
    /// Serial advertised after the `ABBOTT` prefix
    pub serial: String,
    pub security_generation: u8,
    /// Uid recovered from the advertisement
    pub uid: Vec<u8>,
    session_info: Vec<u8>,
}

impl Abbott {
    /// Derive serial and security generation from the advertised name
    pub fn from_device_name(name: &str) -> Self {
        let serial: String = name.chars().skip(6).collect();
        let security_generation = match serial.chars().next() {
            Some('7') => 2,
            _ => 0,
        };
        Abbott {
            serial,
            security_generation,
            ..Default::default()
        }
    }

    pub fn authentication(&self) -> AbbottAuthentication {
        self.session.authentication
    }

    fn handle_security(&mut self, data: &[u8]) -> Vec<Action> {
        match self.session.authentication {
            AbbottAuthentication::ChallengeResponse if data.len() == CHALLENGE_LENGTH => {
                self.session.authentication = AbbottAuthentication::GetSessionInfo;
                vec![Action::status(format!("Libre: challenge response: {}", hex(data)))]
            }
            AbbottAuthentication::GetSessionInfo => {
                match data.len() {
                    7 => self.session_info = data.to_vec(),
                    18 => self.session_info.extend_from_slice(data),
                    _ => {}
                }
                if self.session_info.len() == SESSION_INFO_LENGTH {
                    self.session.authentication = AbbottAuthentication::Authenticated;
                    self.session.security_context = Some(SecurityContext {
                        session_info: std::mem::take(&mut self.session_info),
                        ..Default::default()
                    });
                    return vec![Action::EnableNotify(Characteristic::Read)];
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_data(&mut self, data: &[u8], ctx: &mut NotificationContext<'_>) -> Vec<Action> {
        // 46 bytes arrive as 20 + 18 + 8
        if data.len() == FIRST_PACKET_LENGTH {
            self.session.buffer.clear();
        }
        self.session.buffer.extend_from_slice(data);

        if self.session.buffer.len() < BLE_PACKET_LENGTH {
            return Vec::new();
        }
        let packet = std::mem::take(&mut self.session.buffer);
        if packet.len() > BLE_PACKET_LENGTH {
            return vec![Action::status(format!(
                "Libre: discarded {} bytes out of frame",
                packet.len()
            ))];
        }
        match decrypt_ble(&ctx.sensor.uid, &packet) {
            Ok(payload) => vec![
                Action::BlePayload(payload),
                Action::status(format!("{}  +  BLE", ctx.sensor.sensor_type)),
            ],
            Err(e) => vec![Action::status(e.status())],
        }
    }
}

impl TransmitterProtocol for Abbott {
    fn profile(&self) -> &'static VendorProfile {
        &ABBOTT_PROFILE
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn parse_manufacturer_data(&mut self, data: &[u8]) -> Vec<Action> {
        if data.len() <= 7 {
            return Vec::new();
        }
        let mut uid = data[2..8].to_vec();
        uid.extend_from_slice(&[0x07, 0xE0]);
        let message = format!("Libre: advertised uid: {}", hex(&uid));
        // gen-2 sensors advertise an unrelated identifier
        if data[7] == 0xA4 {
            self.uid = uid;
        }
        vec![Action::Status(message)]
    }

    fn read_command(&self, _interval: u8) -> Vec<u8> {
        Vec::new()
    }

    fn on_connected(&mut self, ctx: &mut NotificationContext<'_>) -> Vec<Action> {
        if ctx.sensor.uid.is_empty() && !self.uid.is_empty() {
            ctx.sensor.set_uid(self.uid.clone());
        }
        if ctx.sensor.sensor_type == SensorType::Unknown {
            let (sensor_type, family) = match self.serial.chars().next() {
                Some('7') => (SensorType::LibreSense, SensorFamily::LibreSense),
                _ => (SensorType::Libre2, SensorFamily::Libre2),
            };
            ctx.sensor.sensor_type = sensor_type;
            ctx.sensor.family = family;
        }
        if self.security_generation == 0 {
            self.security_generation = ctx.sensor.security_generation;
        }
        if !ctx.state.active_sensor_uid.is_empty() && ctx.state.active_sensor_uid == ctx.sensor.uid {
            ctx.sensor.streaming_unlock_code = ctx.state.streaming_unlock_code;
            ctx.sensor.streaming_unlock_count = ctx.state.streaming_unlock_count;
            ctx.sensor.calibration_info = ctx.state.calibration_info;
        }

        if self.security_generation > 1
            && self.session.authentication == AbbottAuthentication::NotAuthenticated
        {
            self.session.authentication = AbbottAuthentication::EnableNotification;
            let mut actions = vec![Action::EnableNotify(Characteristic::Write)];
            self.session.authentication = AbbottAuthentication::ChallengeResponse;
            actions.push(Action::write(vec![READ_CHALLENGE]));
            return actions;
        }

        let mut actions = Vec::new();
        if !ctx.sensor.uid.is_empty()
            && !ctx.sensor.patch_info.is_empty()
            && !ctx.state.active_sensor_initial_patch_info.is_empty()
        {
            let count = ctx.state.streaming_unlock_count.wrapping_add(1);
            match streaming_unlock_payload(
                &ctx.sensor.uid,
                &ctx.state.active_sensor_initial_patch_info,
                ctx.state.streaming_unlock_code,
                count,
            ) {
                Ok(payload) => {
                    ctx.state.streaming_unlock_count = count;
                    ctx.sensor.streaming_unlock_count = count;
                    self.session.authentication = AbbottAuthentication::BleLogin;
                    actions.push(Action::write(payload.to_vec()));
                }
                Err(e) => actions.push(Action::status(e.status())),
            }
        }
        actions.push(Action::EnableNotify(Characteristic::Read));
        actions
    }

    fn handle_notification(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        ctx: &mut NotificationContext<'_>,
    ) -> Vec<Action> {
        match characteristic {
            Characteristic::Write => self.handle_security(data),
            Characteristic::Read => self.handle_data(data, ctx),
        }
    }

    fn disconnected(&mut self) {
        self.session.reset();
        self.session_info.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{PersistedState, Sensor};
    use crate::utils::parse_hex;

    const PACKET: &str = "8e423b02a45718c6fa8267c88a3b80664dc9696dbbbcc896c471f549931a148e72e35354aa5fa7b139db0a451735";

    fn sensor() -> Sensor {
        Sensor::new(
            parse_hex("2fe7b10000a407e0").unwrap(),
            parse_hex("9d083001712b").unwrap(),
        )
    }

    #[test]
    fn reassembles_and_decrypts_three_packets() {
        let mut abbott = Abbott::from_device_name("ABBOTT3MH001DG75W");
        let mut sensor = sensor();
        let mut state = PersistedState::default();
        let mut ctx = NotificationContext { sensor: &mut sensor, state: &mut state, reading_interval: 5 };
        let packet = parse_hex(PACKET).unwrap();

        assert!(abbott.handle_notification(Characteristic::Read, &packet[..20], &mut ctx).is_empty());
        assert!(abbott.handle_notification(Characteristic::Read, &packet[20..38], &mut ctx).is_empty());
        let actions = abbott.handle_notification(Characteristic::Read, &packet[38..], &mut ctx);
        match &actions[0] {
            Action::BlePayload(payload) => assert_eq!(payload.len(), 44),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(actions[1], Action::status("Libre 2  +  BLE"));
        assert!(abbott.session.buffer.is_empty());
    }

    #[test]
    fn corrupted_frame_resets_buffer() {
        let mut abbott = Abbott::default();
        let mut sensor = sensor();
        let mut state = PersistedState::default();
        let mut ctx = NotificationContext { sensor: &mut sensor, state: &mut state, reading_interval: 5 };
        let mut packet = parse_hex(PACKET).unwrap();
        packet[30] ^= 0x01;

        abbott.handle_notification(Characteristic::Read, &packet[..20], &mut ctx);
        abbott.handle_notification(Characteristic::Read, &packet[20..38], &mut ctx);
        let actions = abbott.handle_notification(Characteristic::Read, &packet[38..], &mut ctx);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0], Action::status("BLE data decryption failed"));
        assert!(abbott.session.buffer.is_empty());
    }

    #[test]
    fn first_packet_restarts_frame() {
        let mut abbott = Abbott::default();
        let mut sensor = sensor();
        let mut state = PersistedState::default();
        let mut ctx = NotificationContext { sensor: &mut sensor, state: &mut state, reading_interval: 5 };
        let packet = parse_hex(PACKET).unwrap();

        abbott.handle_notification(Characteristic::Read, &packet[..20], &mut ctx);
        abbott.handle_notification(Characteristic::Read, &packet[..20], &mut ctx);
        abbott.handle_notification(Characteristic::Read, &packet[20..38], &mut ctx);
        let actions = abbott.handle_notification(Characteristic::Read, &packet[38..], &mut ctx);
        assert!(matches!(actions[0], Action::BlePayload(_)));
    }

    #[test]
    fn gen1_connection_writes_unlock_payload() {
        let mut abbott = Abbott::from_device_name("ABBOTT3MH001DG75W");
        let mut sensor = sensor();
        let mut state = PersistedState {
            active_sensor_initial_patch_info: parse_hex("9d083001712b").unwrap(),
            streaming_unlock_code: 42,
            streaming_unlock_count: 0,
            ..Default::default()
        };
        let mut ctx = NotificationContext { sensor: &mut sensor, state: &mut state, reading_interval: 5 };
        let actions = abbott.on_connected(&mut ctx);
        assert_eq!(
            actions,
            vec![
                Action::write(parse_hex("2b000000696632842f86040e").unwrap()),
                Action::EnableNotify(Characteristic::Read),
            ]
        );
        assert_eq!(state.streaming_unlock_count, 1);
        assert_eq!(abbott.authentication(), AbbottAuthentication::BleLogin);
    }

    #[test]
    fn gen2_handshake_reaches_authenticated() {
        let mut abbott = Abbott::from_device_name("ABBOTT7MH001DG75W");
        let mut sensor = Sensor::default();
        let mut state = PersistedState::default();
        let mut ctx = NotificationContext { sensor: &mut sensor, state: &mut state, reading_interval: 5 };

        let actions = abbott.on_connected(&mut ctx);
        assert_eq!(
            actions,
            vec![Action::EnableNotify(Characteristic::Write), Action::write(vec![0x20])]
        );
        assert_eq!(abbott.authentication(), AbbottAuthentication::ChallengeResponse);

        abbott.handle_notification(Characteristic::Write, &[0u8; 14], &mut ctx);
        assert_eq!(abbott.authentication(), AbbottAuthentication::GetSessionInfo);
        abbott.handle_notification(Characteristic::Write, &[1u8; 7], &mut ctx);
        let actions = abbott.handle_notification(Characteristic::Write, &[2u8; 18], &mut ctx);
        assert_eq!(actions, vec![Action::EnableNotify(Characteristic::Read)]);
        assert_eq!(abbott.authentication(), AbbottAuthentication::Authenticated);
        assert_eq!(abbott.session.security_context.as_ref().map(|c| c.session_info.len()), Some(25));

        abbott.disconnected();
        assert_eq!(abbott.authentication(), AbbottAuthentication::NotAuthenticated);
        assert!(abbott.session.security_context.is_none());
    }

    #[test]
    fn advertised_uid_requires_a4_marker() {
        let mut abbott = Abbott::default();
        abbott.parse_manufacturer_data(&[0x00, 0x00, 0x2F, 0xE7, 0xB1, 0x00, 0x00, 0xA4]);
        assert_eq!(abbott.uid, parse_hex("2fe7b10000a407e0").unwrap());

        let mut gen2 = Abbott::default();
        gen2.parse_manufacturer_data(&[0x00, 0x00, 0x0B, 0xF3, 0xB7, 0xAA, 0x48, 0xB8]);
        assert!(gen2.uid.is_empty());
    }
}
