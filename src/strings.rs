//! Caches a device's supported language IDs and fetched string descriptors
//! so repeated lookups of the same index don't re-issue control transfers.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::descriptors::{decode_string_descriptor, language_id};
use crate::error::{messages, Error};
use crate::hci::{request_type, ControlType, Direction, HostController, Recipient, SetupPacket};

const GET_DESCRIPTOR: u8 = 0x06;

/// Per-device string descriptor cache.
///
/// The language ID table (string descriptor index 0) is fetched at most
/// once, on first use, via [`OnceCell`]; concurrent callers racing the first
/// lookup all observe the same fetch rather than issuing duplicate control
/// transfers.
pub struct StringCache {
    device_id: u32,
    languages: OnceCell<Vec<u16>>,
    strings: Mutex<HashMap<(u8, u16), String>>,
}

impl StringCache {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            languages: OnceCell::new(),
            strings: Mutex::new(HashMap::new()),
        }
    }

    fn language_ids(&self, hci: &dyn HostController) -> Result<&[u16], Error> {
        self.languages
            .get_or_try_init(|| {
                let raw = fetch_string_descriptor(hci, self.device_id, 0, 0)?;
                Ok(raw[2..]
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
                    .collect())
            })
            .map(|v| v.as_slice())
    }

    /// Fetch and decode string descriptor `index`, preferring
    /// [`language_id::US_ENGLISH`] and falling back to the device's first
    /// advertised language ID.
    ///
    /// Idempotent: repeated calls with the same index return the cached
    /// decoded string without a further control transfer.
    pub fn get_string(&self, hci: &dyn HostController, index: u8) -> Result<String, Error> {
        if index == 0 {
            return Err(messages::invalid_args("string descriptor index 0 holds language IDs, not a string"));
        }

        let languages = self.language_ids(hci)?;
        let language = if languages.contains(&language_id::US_ENGLISH) {
            language_id::US_ENGLISH
        } else {
            *languages
                .first()
                .ok_or_else(|| messages::io("device advertises no string languages"))?
        };

        let key = (index, language);
        if let Some(cached) = self.strings.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }

        let raw = fetch_string_descriptor(hci, self.device_id, index, language)?;
        let decoded = decode_string_descriptor(&raw)
            .map_err(|_| messages::io("malformed string descriptor"))?;
        self.strings.lock().unwrap().insert(key, decoded.clone());
        Ok(decoded)
    }
}

fn fetch_string_descriptor(
    hci: &dyn HostController,
    device_id: u32,
    index: u8,
    language: u16,
) -> Result<Vec<u8>, Error> {
    let engine = crate::control::ControlTransferEngine::new(device_id);
    let setup = SetupPacket {
        request_type: request_type(Direction::In, ControlType::Standard, Recipient::Device),
        request: GET_DESCRIPTOR,
        value: (u16::from(crate::descriptors::DESCRIPTOR_TYPE_STRING) << 8) | index as u16,
        index: language,
        length: 255,
    };
    engine.control(hci, setup, vec![0u8; 255], None)
}
