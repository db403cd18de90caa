//! Null device: always reachable, never has records.

use punchsync_core::{DeviceCapabilities, DeviceIdentity, DeviceInfo, PunchRecord};

use crate::{AttendanceDevice, DeviceError};

#[derive(Debug, Clone)]
pub struct NullDevice {
    identity: DeviceIdentity,
}

impl NullDevice {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self { identity }
    }
}

impl AttendanceDevice for NullDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            incremental_fetch: false,
            clear_source: true,
        }
    }

    fn connect(&mut self) -> bool {
        true
    }

    fn disconnect(&mut self) -> bool {
        true
    }

    fn test_connection(&mut self) -> bool {
        true
    }

    fn try_fetch_all(&mut self) -> Result<Vec<PunchRecord>, DeviceError> {
        Ok(Vec::new())
    }

    fn clear_source(&mut self) -> bool {
        true
    }

    fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new("null", self.identity.clone())
            .with_detail("description", "Null device for testing");
        info.capabilities = self.capabilities();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_device_is_empty_and_reachable() {
        let mut device = NullDevice::new(DeviceIdentity::from("null"));
        assert!(device.connect());
        assert!(device.fetch_all().is_empty());
        assert!(device.fetch_since(0).is_empty(), "unsupported fetch_since folds to empty");
        assert!(device.clear_source());
        assert!(device.disconnect());
        assert_eq!(device.device_info().device_type, "null");
    }
}
