/*!
Audio Device Classification

A discovered device counts as an audio device when any one of three rules
matches: its class of device carries an audio minor class, it advertises a
known audio profile UUID, or its name looks like an audio product. Rules
are checked in that order and the first match wins.
*/

use uuid::{uuid, Uuid};

use super::FoundDevice;

/// Major + minor device class bits, with service class and format bits
/// masked off.
const DEVICE_CLASS_MASK: u32 = 0x1FFC;

/// Audio/video minor classes that identify playback hardware.
const AUDIO_DEVICE_CLASSES: [u32; 5] = [
    0x0414, // loudspeaker
    0x0418, // headphones
    0x041C, // portable audio
    0x0420, // car audio
    0x0428, // hi-fi audio
];

/// SDP/GATT service UUIDs advertised by audio sinks and sources.
const AUDIO_SERVICE_UUIDS: [Uuid; 5] = [
    uuid!("0000110a-0000-1000-8000-00805f9b34fb"), // Audio Source
    uuid!("0000110b-0000-1000-8000-00805f9b34fb"), // Audio Sink
    uuid!("0000110e-0000-1000-8000-00805f9b34fb"), // A/V Remote Control
    uuid!("0000111e-0000-1000-8000-00805f9b34fb"), // Handsfree
    uuid!("00001108-0000-1000-8000-00805f9b34fb"), // Headset
];

const AUDIO_NAME_KEYWORDS: [&str; 4] = ["speaker", "headset", "earphone", "audio"];

type Rule = (&'static str, fn(&FoundDevice) -> bool);

const RULES: [Rule; 3] = [
    ("device-class", matches_device_class),
    ("service-uuid", matches_service_uuid),
    ("name", matches_name),
];

/// Returns the name of the first rule the device matches, or `None` for a
/// device that is not an audio device.
pub fn classify(device: &FoundDevice) -> Option<&'static str> {
    RULES
        .iter()
        .find(|(_, rule)| rule(device))
        .map(|(label, _)| *label)
}

fn matches_device_class(device: &FoundDevice) -> bool {
    device
        .device_class
        .map_or(false, |class| AUDIO_DEVICE_CLASSES.contains(&(class & DEVICE_CLASS_MASK)))
}

fn matches_service_uuid(device: &FoundDevice) -> bool {
    device
        .service_uuids
        .iter()
        .any(|uuid| AUDIO_SERVICE_UUIDS.contains(uuid))
}

fn matches_name(device: &FoundDevice) -> bool {
    device.name.as_ref().map_or(false, |name| {
        let name = name.to_lowercase();
        AUDIO_NAME_KEYWORDS.iter().any(|keyword| name.contains(keyword))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: Option<&str>, class: Option<u32>, uuids: &[Uuid]) -> FoundDevice {
        FoundDevice {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            name: name.map(str::to_string),
            device_class: class,
            service_uuids: uuids.to_vec(),
        }
    }

    #[test]
    fn loudspeaker_class_matches() {
        let found = device(Some("Living Room"), Some(0x0414), &[]);
        assert_eq!(classify(&found), Some("device-class"));
    }

    #[test]
    fn service_class_bits_are_ignored() {
        // Rendering + audio service bits set on top of the headphones class.
        let found = device(None, Some(0x240418), &[]);
        assert_eq!(classify(&found), Some("device-class"));
    }

    #[test]
    fn non_audio_class_does_not_match() {
        // Smartphone: computer major class, no audio signal anywhere else.
        let found = device(Some("Pixel"), Some(0x020C), &[]);
        assert_eq!(classify(&found), None);
    }

    #[test]
    fn audio_sink_uuid_matches() {
        let sink = uuid!("0000110b-0000-1000-8000-00805f9b34fb");
        let found = device(None, None, &[sink]);
        assert_eq!(classify(&found), Some("service-uuid"));
    }

    #[test]
    fn unrelated_uuid_does_not_match() {
        let battery = uuid!("0000180f-0000-1000-8000-00805f9b34fb");
        let found = device(None, None, &[battery]);
        assert_eq!(classify(&found), None);
    }

    #[test]
    fn name_keyword_matches_case_insensitively() {
        let found = device(Some("JBL Speaker"), None, &[]);
        assert_eq!(classify(&found), Some("name"));
        let found = device(Some("MY HEADSET PRO"), None, &[]);
        assert_eq!(classify(&found), Some("name"));
    }

    #[test]
    fn class_rule_wins_over_name_rule() {
        let found = device(Some("Bedroom Speaker"), Some(0x0414), &[]);
        assert_eq!(classify(&found), Some("device-class"));
    }

    #[test]
    fn nameless_classless_device_does_not_match() {
        let found = device(None, None, &[]);
        assert_eq!(classify(&found), None);
    }
}
