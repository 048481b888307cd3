/// BluCon transmitter: request/response command chain ending in a 43-block FRAM read
use crate::bluetooth::{
    Action, Characteristic, DeviceInfo, FramPayload, NotificationContext, TransmitterProtocol,
    TransportSession, VendorProfile, BLUCON_PROFILE,
};
use crate::sensor::SensorState;
use crate::utils::hex;

const FRAM_LENGTH: usize = 344;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BluConRequest {
    #[default]
    None,
    Ack,
    Sleep,
    SensorInfo,
    Fram,
    Battery,
    Firmware,
    PatchUid,
    PatchInfo,
}

impl BluConRequest {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            BluConRequest::None => &[],
            BluConRequest::Ack => &[0x81, 0x0A, 0x00],
            BluConRequest::Sleep => &[0x01, 0x0C, 0x0E, 0x00],
            BluConRequest::SensorInfo => &[0x01, 0x0D, 0x09, 0x00],
            BluConRequest::Fram => &[0x01, 0x0D, 0x0F, 0x02, 0x00, 0x2B],
            BluConRequest::Battery => &[0x01, 0x0D, 0x0A, 0x00],
            BluConRequest::Firmware => &[0x01, 0x0D, 0x0B, 0x00],
            BluConRequest::PatchUid => &[0x01, 0x0E, 0x00, 0x03, 0x26, 0x01, 0x00],
            BluConRequest::PatchInfo => &[0x01, 0x0E, 0x00, 0x03, 0x02, 0xA1, 0x07],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluConResponse {
    Ack,
    PatchUidInfo,
    NoSensor,
    ReadingError,
    Timeout,
    SensorInfo,
    Battery,
    Firmware,
    SingleBlock,
    MultipleBlocks,
    Wakeup,
    BatteryLow,
}

impl BluConResponse {
    /// Classify a notification: full matches first, then prefixes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let exact = match data {
            [0x8B, 0x0A, 0x00] => Some(BluConResponse::Ack),
            [0x8B, 0x1A, 0x02, 0x00, 0x0F] => Some(BluConResponse::NoSensor),
            [0x8B, 0x1A, 0x02, 0x00, 0x11] => Some(BluConResponse::ReadingError),
            [0x8B, 0x1A, 0x02, 0x00, 0x14] => Some(BluConResponse::Timeout),
            [0xCB, 0x01, 0x00, 0x00] => Some(BluConResponse::Wakeup),
            [0xCB, 0x02, 0x00, 0x00] | [0xCB, 0xDB, 0x00, 0x00] => Some(BluConResponse::BatteryLow),
            _ => None,
        };
        exact.or(match data {
            [0x8B, 0x0E, ..] => Some(BluConResponse::PatchUidInfo),
            [0x8B, 0xD9, ..] => Some(BluConResponse::SensorInfo),
            [0x8B, 0xDA, ..] => Some(BluConResponse::Battery),
            [0x8B, 0xDB, ..] => Some(BluConResponse::Firmware),
            [0x8B, 0xDE, ..] => Some(BluConResponse::SingleBlock),
            [0x8B, 0xDF, ..] => Some(BluConResponse::MultipleBlocks),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BluCon {
    pub session: TransportSession<()>,
    pub info: DeviceInfo,
    pub current_request: BluConRequest,
}

impl BluCon {
    fn request(&mut self, request: BluConRequest) -> Action {
        self.current_request = request;
        Action::write(request.bytes().to_vec())
    }

    fn go_to_sleep(&mut self, message: &str) -> Vec<Action> {
        self.session.buffer.clear();
        vec![Action::status(message), self.request(BluConRequest::Sleep)]
    }
}

impl TransmitterProtocol for BluCon {
    fn profile(&self) -> &'static VendorProfile {
        &BLUCON_PROFILE
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn parse_manufacturer_data(&mut self, _data: &[u8]) -> Vec<Action> {
        Vec::new()
    }

    fn read_command(&self, _interval: u8) -> Vec<u8> {
        vec![0x00]
    }

    fn on_connected(&mut self, _ctx: &mut NotificationContext<'_>) -> Vec<Action> {
        vec![Action::EnableNotify(Characteristic::Read)]
    }

    fn handle_notification(
        &mut self,
        _characteristic: Characteristic,
        data: &[u8],
        ctx: &mut NotificationContext<'_>,
    ) -> Vec<Action> {
        let Some(response) = BluConResponse::parse(data) else {
            return Vec::new();
        };
        match response {
            BluConResponse::Timeout => self.go_to_sleep("BluCon: timeout"),
            BluConResponse::NoSensor => {
                let mut actions = self.go_to_sleep("BluCon: no sensor");
                actions.push(Action::SensorGone);
                actions
            }
            BluConResponse::ReadingError => self.go_to_sleep("BluCon: reading error"),
            BluConResponse::BatteryLow => self.go_to_sleep("BluCon: battery low"),
            BluConResponse::Wakeup => vec![self.request(BluConRequest::SensorInfo)],
            BluConResponse::SensorInfo => {
                if data.len() < 18 {
                    return Vec::new();
                }
                ctx.sensor.set_uid(data[3..11].to_vec());
                ctx.state.active_sensor_uid = ctx.sensor.uid.clone();
                ctx.sensor.state = SensorState::from_byte(data[17]);
                let next = if ctx.sensor.state == SensorState::Active {
                    BluConRequest::Ack
                } else {
                    BluConRequest::Sleep
                };
                vec![
                    Action::status(format!(
                        "BluCon: patch uid: {}, serial number: {}, sensor state: {}",
                        hex(&ctx.sensor.uid),
                        ctx.sensor.serial,
                        ctx.sensor.state
                    )),
                    self.request(next),
                ]
            }
            BluConResponse::Ack => {
                if self.current_request == BluConRequest::Ack {
                    vec![self.request(BluConRequest::Firmware)]
                } else {
                    // acknowledging a sleep request
                    self.current_request = BluConRequest::None;
                    Vec::new()
                }
            }
            BluConResponse::Firmware => {
                self.info.firmware = data
                    .iter()
                    .skip(2)
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(".");
                vec![self.request(BluConRequest::Battery)]
            }
            BluConResponse::Battery => {
                match data.get(2) {
                    Some(0xAA) => self.info.battery = Some(100),
                    Some(0x02) => self.info.battery = Some(5),
                    _ => {}
                }
                vec![self.request(BluConRequest::PatchInfo)]
            }
            BluConResponse::PatchUidInfo => {
                match self.current_request {
                    BluConRequest::PatchInfo if data.len() > 3 => {
                        ctx.sensor.set_patch_info(data[3..].to_vec());
                    }
                    BluConRequest::PatchUid if data.len() > 4 => {
                        ctx.sensor.set_uid(data[4..].to_vec());
                    }
                    _ => {}
                }
                self.session.buffer.clear();
                vec![self.request(BluConRequest::Fram)]
            }
            BluConResponse::MultipleBlocks => {
                if data.len() > 4 {
                    self.session.buffer.extend_from_slice(&data[4..]);
                }
                if self.session.buffer.len() < FRAM_LENGTH {
                    return Vec::new();
                }
                let mut bytes = std::mem::take(&mut self.session.buffer);
                bytes.truncate(FRAM_LENGTH);
                vec![
                    self.request(BluConRequest::Sleep),
                    Action::Fram(FramPayload { bytes }),
                    Action::status(format!("{}  +  BluCon", ctx.sensor.sensor_type)),
                ]
            }
            BluConResponse::SingleBlock => Vec::new(),
        }
    }

    fn disconnected(&mut self) {
        self.session.reset();
        self.current_request = BluConRequest::None;
    }
}
