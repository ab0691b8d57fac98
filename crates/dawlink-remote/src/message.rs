//! Framed control messages and their stable on-wire ids.
//!
//! A message is an id plus a list of string arguments. Integer payloads
//! travel as decimal strings: uniform, endian-neutral, and trivially
//! readable in a debugger. The bulk audio path bypasses this entirely.

/// On-wire message ids. Values are stable; plugin-specific traffic starts
/// at [`USER_MESSAGE_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageId {
    Undefined = 0,
    GeneralFailure = 1,
    InitDone = 2,
    ClosePlugin = 3,
    SampleRateInformation = 4,
    BufferSizeInformation = 5,
    MidiEvent = 6,
    StartProcessing = 7,
    ProcessingDone = 8,
    ChangeSharedMemoryKey = 9,
    ChangeInputCount = 10,
    ChangeOutputCount = 11,
    ShowUi = 12,
    HideUi = 13,
    SaveSettingsToString = 14,
    SaveSettingsToFile = 15,
    LoadSettingsFromString = 16,
    LoadSettingsFromFile = 17,
    LoadPresetFromFile = 18,
}

/// First id available for plugin-specific messages.
pub const USER_MESSAGE_BASE: i32 = 64;

impl MessageId {
    /// The on-wire value.
    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Map an on-wire value back to a known id.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Undefined,
            1 => Self::GeneralFailure,
            2 => Self::InitDone,
            3 => Self::ClosePlugin,
            4 => Self::SampleRateInformation,
            5 => Self::BufferSizeInformation,
            6 => Self::MidiEvent,
            7 => Self::StartProcessing,
            8 => Self::ProcessingDone,
            9 => Self::ChangeSharedMemoryKey,
            10 => Self::ChangeInputCount,
            11 => Self::ChangeOutputCount,
            12 => Self::ShowUi,
            13 => Self::HideUi,
            14 => Self::SaveSettingsToString,
            15 => Self::SaveSettingsToFile,
            16 => Self::LoadSettingsFromString,
            17 => Self::LoadSettingsFromFile,
            18 => Self::LoadPresetFromFile,
            _ => return None,
        })
    }
}

/// One framed control message: an id and its string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i32,
    pub args: Vec<String>,
}

impl Message {
    /// A message with a known id and no arguments yet.
    pub fn new(id: MessageId) -> Self {
        Self {
            id: id.raw(),
            args: Vec::new(),
        }
    }

    /// A message with a raw id, for plugin-specific traffic at or above
    /// [`USER_MESSAGE_BASE`].
    pub fn user(id: i32) -> Self {
        Self {
            id,
            args: Vec::new(),
        }
    }

    /// Append an integer argument (stringified in base 10).
    pub fn with_int(mut self, value: i32) -> Self {
        self.push_int(value);
        self
    }

    /// Append a string argument.
    pub fn with_str(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn push_int(&mut self, value: i32) {
        self.args.push(value.to_string());
    }

    /// Integer view of argument `index`; missing or malformed arguments
    /// read as 0, matching classic `atoi` tolerance.
    pub fn int_arg(&self, index: usize) -> i32 {
        self.args
            .get(index)
            .and_then(|arg| arg.parse().ok())
            .unwrap_or(0)
    }

    /// String view of argument `index`; missing arguments read as "".
    pub fn str_arg(&self, index: usize) -> &str {
        self.args.get(index).map_or("", String::as_str)
    }

    /// Whether this message carries the given known id.
    pub fn is(&self, id: MessageId) -> bool {
        self.id == id.raw()
    }

    /// Encoded size on the wire: id, argument count, then a length prefix
    /// plus payload per argument.
    pub fn encoded_len(&self) -> usize {
        8 + self.args.iter().map(|arg| 4 + arg.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_raw_roundtrip() {
        for raw in 0..=18 {
            let id = MessageId::from_raw(raw).expect("known id");
            assert_eq!(id.raw(), raw);
        }
        assert_eq!(MessageId::from_raw(19), None);
        assert_eq!(MessageId::from_raw(USER_MESSAGE_BASE), None);
        assert_eq!(MessageId::from_raw(-1), None);
    }

    #[test]
    fn test_int_args() {
        let m = Message::new(MessageId::MidiEvent)
            .with_int(9)
            .with_int(0)
            .with_int(60)
            .with_int(-100);
        assert_eq!(m.int_arg(0), 9);
        assert_eq!(m.int_arg(3), -100);
        // Out of range reads as zero.
        assert_eq!(m.int_arg(4), 0);
    }

    #[test]
    fn test_malformed_int_reads_as_zero() {
        let m = Message::new(MessageId::SampleRateInformation).with_str("not a number");
        assert_eq!(m.int_arg(0), 0);
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(Message::new(MessageId::StartProcessing).encoded_len(), 8);
        let m = Message::new(MessageId::LoadPresetFromFile).with_str("preset.fxp");
        assert_eq!(m.encoded_len(), 8 + 4 + 10);
    }
}
