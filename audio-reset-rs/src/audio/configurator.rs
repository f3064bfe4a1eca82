//! Default-device and volume changes by friendly name.
//!
//! Every call resolves its target afresh through the endpoint connection.
//! There is no rollback for default-endpoint changes; only the playback
//! volume is saved and restored by the caller.

use super::device::{AudioDevice, AudioError, DeviceRole, DeviceRoleAssignment, Direction};
use super::endpoints::AudioEndpoints;

/// Applies default-device, mute and volume changes.
pub struct DeviceConfigurator<'a> {
    endpoints: &'a dyn AudioEndpoints,
}

impl<'a> DeviceConfigurator<'a> {
    pub fn new(endpoints: &'a dyn AudioEndpoints) -> Self {
        Self { endpoints }
    }

    /// Resolve `target_name` and make it the default for `direction` + `role`.
    ///
    /// Returns `AudioError::DeviceNotFound` when no active endpoint carries
    /// that name.
    pub fn set_default(
        &self,
        direction: Direction,
        role: DeviceRole,
        target_name: &str,
    ) -> Result<AudioDevice, AudioError> {
        let device = self.resolve(direction, target_name)?;
        self.endpoints.set_default_endpoint(&device, role)?;
        Ok(device)
    }

    /// Apply one role assignment.
    pub fn apply(&self, assignment: &DeviceRoleAssignment) -> Result<AudioDevice, AudioError> {
        self.set_default(assignment.direction, assignment.role, &assignment.target)
    }

    /// Resolve `target_name`, unmute it and set its volume scalar.
    pub fn set_volume_and_unmute(
        &self,
        direction: Direction,
        target_name: &str,
        level: f32,
    ) -> Result<AudioDevice, AudioError> {
        check_level(level)?;
        let device = self.resolve(direction, target_name)?;
        self.endpoints.set_mute(&device, false)?;
        self.endpoints.set_volume(&device, level)?;
        Ok(device)
    }

    /// Volume of the current default playback device.
    pub fn playback_volume(&self) -> Result<f32, AudioError> {
        let device = self.default_playback()?;
        self.endpoints.volume(&device)
    }

    /// Set the volume of the current default playback device.
    pub fn set_playback_volume(&self, level: f32) -> Result<(), AudioError> {
        check_level(level)?;
        let device = self.default_playback()?;
        self.endpoints.set_volume(&device, level)
    }

    fn default_playback(&self) -> Result<AudioDevice, AudioError> {
        self.endpoints
            .default_endpoint(Direction::Playback, DeviceRole::Console)?
            .ok_or(AudioError::NoDefaultDevice {
                direction: Direction::Playback,
            })
    }

    fn resolve(&self, direction: Direction, name: &str) -> Result<AudioDevice, AudioError> {
        self.endpoints
            .find_by_name(direction, name)?
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: name.to_string(),
            })
    }
}

fn check_level(level: f32) -> Result<(), AudioError> {
    if (0.0..=1.0).contains(&level) {
        Ok(())
    } else {
        Err(AudioError::InvalidVolume(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBackend;
    use crate::testing::FakeAudio;

    #[test]
    fn test_set_default_resolves_by_name() {
        let audio = FakeAudio::new();
        let id = audio.add(Direction::Playback, "System (Elgato Virtual Audio)");
        let endpoints = audio.connect().unwrap();
        let configurator = DeviceConfigurator::new(endpoints.as_ref());

        let device = configurator
            .set_default(
                Direction::Playback,
                DeviceRole::Communications,
                "system (elgato virtual audio)",
            )
            .unwrap();

        assert_eq!(device.id, id);
        assert_eq!(
            audio.default_id(Direction::Playback, DeviceRole::Communications),
            Some(id)
        );
    }

    #[test]
    fn test_set_default_unknown_name_changes_nothing() {
        let audio = FakeAudio::new();
        let id = audio.add(Direction::Recording, "Mic");
        audio.set_default(&id, DeviceRole::Console);
        let endpoints = audio.connect().unwrap();
        let configurator = DeviceConfigurator::new(endpoints.as_ref());

        let err = configurator
            .set_default(Direction::Recording, DeviceRole::Console, "Missing Mic")
            .unwrap_err();

        assert!(matches!(err, AudioError::DeviceNotFound { ref name } if name == "Missing Mic"));
        assert_eq!(audio.default_id(Direction::Recording, DeviceRole::Console), Some(id));
        assert_eq!(audio.mutation_count(), 0);
    }

    #[test]
    fn test_set_volume_and_unmute() {
        let audio = FakeAudio::new();
        let id = audio.add(Direction::Playback, "Speakers (Headset - Chat)");
        audio.set_muted(&id, true);
        audio.set_level(&id, 0.3);
        let endpoints = audio.connect().unwrap();
        let configurator = DeviceConfigurator::new(endpoints.as_ref());

        configurator
            .set_volume_and_unmute(Direction::Playback, "Speakers (Headset - Chat)", 1.0)
            .unwrap();

        assert_eq!(audio.is_muted(&id), Some(false));
        assert_eq!(audio.level(&id), Some(1.0));
    }

    #[test]
    fn test_playback_volume_without_default() {
        let audio = FakeAudio::new();
        audio.add(Direction::Playback, "Speakers");
        let endpoints = audio.connect().unwrap();
        let configurator = DeviceConfigurator::new(endpoints.as_ref());

        assert!(matches!(
            configurator.playback_volume(),
            Err(AudioError::NoDefaultDevice { .. })
        ));
    }

    #[test]
    fn test_set_playback_volume_rejects_out_of_range() {
        let audio = FakeAudio::new();
        let id = audio.add(Direction::Playback, "Speakers");
        audio.set_default(&id, DeviceRole::Console);
        let endpoints = audio.connect().unwrap();
        let configurator = DeviceConfigurator::new(endpoints.as_ref());

        assert!(matches!(
            configurator.set_playback_volume(1.5),
            Err(AudioError::InvalidVolume(_))
        ));
        configurator.set_playback_volume(0.2).unwrap();
        assert_eq!(configurator.playback_volume().unwrap(), 0.2);
    }
}
