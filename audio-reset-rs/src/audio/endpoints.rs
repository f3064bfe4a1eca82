//! Endpoint access traits.
//!
//! `AudioEndpoints` is one live connection to the OS audio topology;
//! `AudioBackend` opens a fresh connection per pipeline step.

use super::device::{AudioDevice, AudioError, DeviceRole, Direction};

/// Query and mutate the live audio endpoint topology.
pub trait AudioEndpoints {
    /// Active endpoints for a direction, in OS enumeration order.
    fn list_endpoints(&self, direction: Direction) -> Result<Vec<AudioDevice>, AudioError>;

    /// Current default endpoint for a direction and role, if any.
    fn default_endpoint(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<AudioDevice>, AudioError>;

    /// Make `device` the default endpoint for `role`.
    fn set_default_endpoint(&self, device: &AudioDevice, role: DeviceRole)
        -> Result<(), AudioError>;

    /// Master volume scalar (0.0 to 1.0).
    fn volume(&self, device: &AudioDevice) -> Result<f32, AudioError>;

    /// Set the master volume scalar (0.0 to 1.0).
    fn set_volume(&self, device: &AudioDevice, level: f32) -> Result<(), AudioError>;

    /// Set the mute state.
    fn set_mute(&self, device: &AudioDevice, muted: bool) -> Result<(), AudioError>;

    /// First active endpoint whose friendly name equals `name`, ignoring case.
    ///
    /// Two devices sharing a name resolve to whichever the OS lists first.
    fn find_by_name(
        &self,
        direction: Direction,
        name: &str,
    ) -> Result<Option<AudioDevice>, AudioError> {
        Ok(self
            .list_endpoints(direction)?
            .into_iter()
            .find(|device| device.is_active && device.matches_name(name)))
    }

    /// Number of active endpoints whose name contains `tag`, ignoring case.
    fn count_tagged(&self, direction: Direction, tag: &str) -> Result<usize, AudioError> {
        Ok(self
            .list_endpoints(direction)?
            .iter()
            .filter(|device| device.is_active && device.name_contains(tag))
            .count())
    }
}

/// Factory for endpoint connections.
pub trait AudioBackend {
    /// Open a new connection. Failure here means the audio subsystem itself
    /// is unreachable.
    fn connect(&self) -> Result<Box<dyn AudioEndpoints + '_>, AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAudio;

    #[test]
    fn test_find_by_name_is_case_insensitive() {
        let audio = FakeAudio::new();
        audio.add(Direction::Playback, "Speakers (X)");
        let endpoints = audio.connect().unwrap();

        let found = endpoints
            .find_by_name(Direction::Playback, "speakers (x)")
            .unwrap();
        assert_eq!(found.map(|d| d.name), Some("Speakers (X)".to_string()));
    }

    #[test]
    fn test_find_by_name_respects_direction() {
        let audio = FakeAudio::new();
        audio.add(Direction::Recording, "Headset");
        let endpoints = audio.connect().unwrap();

        assert!(endpoints
            .find_by_name(Direction::Playback, "Headset")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_find_by_name_first_match_wins() {
        let audio = FakeAudio::new();
        let first = audio.add(Direction::Playback, "Twin");
        audio.add(Direction::Playback, "TWIN");
        let endpoints = audio.connect().unwrap();

        let found = endpoints.find_by_name(Direction::Playback, "twin").unwrap();
        assert_eq!(found.map(|d| d.id), Some(first));
    }

    #[test]
    fn test_find_by_name_skips_inactive() {
        let audio = FakeAudio::new();
        let id = audio.add(Direction::Playback, "Sleeping");
        audio.set_active(&id, false);
        let endpoints = audio.connect().unwrap();

        assert!(endpoints
            .find_by_name(Direction::Playback, "Sleeping")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_count_tagged() {
        let audio = FakeAudio::new();
        audio.add(Direction::Playback, "System (Elgato Virtual Audio)");
        audio.add(Direction::Playback, "Music (Elgato Virtual Audio)");
        audio.add(Direction::Playback, "Speakers (Realtek)");
        audio.add(Direction::Recording, "Chat Mic (Elgato Virtual Audio)");
        let endpoints = audio.connect().unwrap();

        assert_eq!(endpoints.count_tagged(Direction::Playback, "Elgato").unwrap(), 2);
    }
}
