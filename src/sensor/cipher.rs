/// Libre 2 stream cipher: FRAM and BLE payload decryption, streaming unlock
use crate::error::{CgmError, CgmResult};
use crate::sensor::crc::crc16;
use crate::sensor::types::SensorType;

pub const KEY: [u16; 4] = [0xA0C5, 0x6860, 0x0000, 0x14C6];
pub const SECRET: u16 = 0x1B6A;

/// Sub-commands whose codes seed the keystream
pub const ACTIVATE_CODE: u16 = 0x1B;
pub const ENABLE_STREAMING_CODE: u16 = 0x1E;

pub const FRAM_BLOCKS: usize = 43;
pub const BLE_PACKET_LENGTH: usize = 46;
pub const BLE_PAYLOAD_LENGTH: usize = 44;

const UNLOCK_SEED: [u8; 8] = [0xC1, 0xC4, 0xC3, 0xC0, 0xD4, 0xE1, 0xE7, 0xBA];

fn le(lo: u8, hi: u8) -> u16 {
    u16::from_le_bytes([lo, hi])
}

fn words_to_le(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn check_uid(uid: &[u8]) -> CgmResult<()> {
    if uid.len() < 8 {
        return Err(CgmError::InvalidData(format!(
            "sensor uid must be 8 bytes, got {}",
            uid.len()
        )));
    }
    Ok(())
}

fn check_patch_info(info: &[u8]) -> CgmResult<()> {
    if info.len() < 6 {
        return Err(CgmError::InvalidData(format!(
            "patch info must be at least 6 bytes, got {}",
            info.len()
        )));
    }
    Ok(())
}

/// Seed the four-word state from the uid, a command code and a secret.
///
/// `uid` must hold at least 6 bytes.
pub fn prepare_variables(uid: &[u8], x: u16, y: u16) -> [u16; 4] {
    [
        le(uid[4], uid[5]).wrapping_add(x).wrapping_add(y),
        le(uid[2], uid[3]).wrapping_add(KEY[2]),
        le(uid[0], uid[1]).wrapping_add(x.wrapping_mul(2)),
        0x241A ^ KEY[3],
    ]
}

/// Second seeding form used by the streaming unlock payload
pub fn prepare_variables2(uid: &[u8], i1: u16, i2: u16, i3: u16, i4: u16) -> [u16; 4] {
    [
        le(uid[4], uid[5]).wrapping_add(i1),
        le(uid[2], uid[3]).wrapping_add(i2),
        le(uid[0], uid[1]).wrapping_add(i3).wrapping_add(KEY[2]),
        i4.wrapping_add(KEY[3]),
    ]
}

/// Eight rounds of shift-and-conditional-xor mixing over four words
pub fn process_crypto(input: [u16; 4]) -> [u16; 4] {
    fn op(value: u16) -> u16 {
        let mut res = value >> 2;
        if value & 1 != 0 {
            res ^= KEY[1];
        }
        if value & 2 != 0 {
            res ^= KEY[0];
        }
        res
    }

    let r0 = op(input[0]) ^ input[3];
    let r1 = op(r0) ^ input[2];
    let r2 = op(r1) ^ input[1];
    let r3 = op(r2) ^ input[0];
    let r4 = op(r3);
    let r5 = op(r4 ^ r0);
    let r6 = op(r5 ^ r1);
    let r7 = op(r6 ^ r2);

    [r3 ^ r7, r2 ^ r6, r1 ^ r5, r0 ^ r4]
}

/// Four keystream bytes appended to `A1` sub-commands and mixed into the unlock payload.
///
/// The low and high words are xored with inverted constants.
pub fn useful_function(uid: &[u8], x: u16, y: u16) -> [u8; 4] {
    let block_key = process_crypto(prepare_variables(uid, x, y));
    let r1 = block_key[0] ^ 0x4163;
    let r2 = block_key[1] ^ 0x4344;
    let [a, b] = r1.to_le_bytes();
    let [c, d] = r2.to_le_bytes();
    [a, b, c, d]
}

/// Decrypt the 43 FRAM blocks of a Libre 2 or Libre US 14-day sensor.
///
/// Bytes past the 43rd block are returned unchanged. The cipher is a pure
/// XOR keystream, so the same call encrypts.
///
/// # Arguments
/// * `sensor_type` - Only `Libre2` and `LibreUS14day` are supported
/// * `uid` - 8-byte sensor uid
/// * `info` - Patch info returned by the `A1` command
/// * `data` - At least 344 bytes of encrypted FRAM
pub fn decrypt_fram(
    sensor_type: SensorType,
    uid: &[u8],
    info: &[u8],
    data: &[u8],
) -> CgmResult<Vec<u8>> {
    check_uid(uid)?;
    check_patch_info(info)?;
    if data.len() < FRAM_BLOCKS * 8 {
        return Err(CgmError::InvalidData(format!(
            "FRAM must be at least {} bytes, got {}",
            FRAM_BLOCKS * 8,
            data.len()
        )));
    }

    let info_word = le(info[4], info[5]);
    let arg = |block: usize| -> CgmResult<u16> {
        match sensor_type {
            SensorType::LibreUS14day if block < 3 || block >= 40 => Ok(0xCADC),
            SensorType::LibreUS14day => Ok(info_word),
            SensorType::Libre2 => Ok(info_word ^ 0x44),
            other => Err(CgmError::UnsupportedOperation(format!(
                "FRAM decryption of {}",
                other
            ))),
        }
    };

    let mut result = data.to_vec();
    for block in 0..FRAM_BLOCKS {
        let key = process_crypto(prepare_variables(uid, block as u16, arg(block)?));
        let keystream = words_to_le(&key);
        for (byte, k) in result[block * 8..block * 8 + 8].iter_mut().zip(keystream) {
            *byte ^= k;
        }
    }
    Ok(result)
}

/// Encrypt plain FRAM back into the sensor's stored form
pub fn encrypt_fram(
    sensor_type: SensorType,
    uid: &[u8],
    info: &[u8],
    data: &[u8],
) -> CgmResult<Vec<u8>> {
    decrypt_fram(sensor_type, uid, info, data)
}

fn ble_keystream(uid: &[u8], header: [u8; 2]) -> Vec<u8> {
    let d = useful_function(uid, ACTIVATE_CODE, SECRET);
    let x = (le(d[0], d[1]) ^ le(d[2], d[3])) | 0x63;
    let y = le(header[0], header[1]) ^ 0x63;

    let mut key = Vec::with_capacity(64);
    let mut block_key = process_crypto(prepare_variables(uid, x, y));
    for _ in 0..8 {
        key.extend(words_to_le(&block_key));
        block_key = process_crypto(block_key);
    }
    key
}

/// Decrypt a 46-byte Libre 2 BLE packet into its 44-byte payload.
///
/// The payload ends with a little-endian CRC16 over its first 42 bytes;
/// a mismatch means a wrong key or a corrupted packet and is reported as
/// `DecryptionFailure`.
pub fn decrypt_ble(uid: &[u8], data: &[u8]) -> CgmResult<Vec<u8>> {
    check_uid(uid)?;
    if data.len() != BLE_PACKET_LENGTH {
        return Err(CgmError::DecryptionFailure(format!(
            "expected {} bytes, got {}",
            BLE_PACKET_LENGTH,
            data.len()
        )));
    }

    let key = ble_keystream(uid, [data[0], data[1]]);
    let result: Vec<u8> = data[2..].iter().zip(key).map(|(b, k)| b ^ k).collect();

    let stored = le(result[BLE_PAYLOAD_LENGTH - 2], result[BLE_PAYLOAD_LENGTH - 1]);
    let computed = crc16(&result[..BLE_PAYLOAD_LENGTH - 2]);
    if stored != computed {
        return Err(CgmError::DecryptionFailure(format!(
            "payload CRC16 {:04x}, computed {:04x}",
            stored, computed
        )));
    }
    Ok(result)
}

/// Build the 12-byte payload written to the BLE login characteristic.
///
/// The first four bytes are `enable_time + unlock_count` little-endian,
/// followed by two rounds of [`process_crypto`] seeded from the
/// activate/enable-streaming keystreams and CRCs of intermediate values.
pub fn streaming_unlock_payload(
    uid: &[u8],
    info: &[u8],
    enable_time: u32,
    unlock_count: u16,
) -> CgmResult<[u8; 12]> {
    check_uid(uid)?;
    check_patch_info(info)?;

    let b = enable_time.wrapping_add(unlock_count as u32).to_le_bytes();

    let ad = useful_function(uid, ACTIVATE_CODE, SECRET);
    let ed = useful_function(
        uid,
        ENABLE_STREAMING_CODE,
        (enable_time & 0xFFFF) as u16 ^ le(info[4], info[5]),
    );

    let t11 = le(ed[0], ed[1]) ^ le(b[2], b[3]);
    let t12 = le(ad[0], ad[1]);
    let t13 = le(ed[2], ed[3]) ^ le(b[0], b[1]);
    let t14 = le(ad[2], ad[3]);

    let t2 = process_crypto(prepare_variables2(uid, t11, t12, t13, t14));

    let mut seed = UNLOCK_SEED.to_vec();
    seed.extend(t2[0].to_le_bytes());
    let t31 = crc16(&seed);
    let t32 = crc16(&words_to_le(&t2[1..]));
    let t33 = crc16(&[ad[0], ad[1], ad[2], ad[3], ed[0], ed[1]]);
    let t34 = crc16(&[ed[2], ed[3], b[0], b[1], b[2], b[3]]);

    let t4 = process_crypto(prepare_variables2(uid, t31, t32, t33, t34));

    let mut payload = [0u8; 12];
    payload[..4].copy_from_slice(&b);
    payload[4..].copy_from_slice(&words_to_le(&t4));
    Ok(payload)
}
