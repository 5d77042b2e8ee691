use crate::config::DevicesConfig;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Curtain,
    Light,
}

/// Static map from gateway node ids to home-automation entity ids.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    curtains: HashMap<String, String>,
    lights: HashMap<String, String>,
}

impl DeviceRegistry {
    pub fn new(curtains: HashMap<String, String>, lights: HashMap<String, String>) -> Self {
        Self { curtains, lights }
    }

    pub fn from_config(devices: &DevicesConfig) -> Self {
        Self::new(devices.curtains.clone(), devices.lights.clone())
    }

    /// Curtains are consulted before lights.
    pub fn resolve(&self, node_id: &str) -> Option<(DeviceClass, &str)> {
        if let Some(entity) = self.curtains.get(node_id) {
            return Some((DeviceClass::Curtain, entity.as_str()));
        }
        self.lights
            .get(node_id)
            .map(|entity| (DeviceClass::Light, entity.as_str()))
    }

    pub fn len(&self) -> usize {
        self.curtains.len() + self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(
            HashMap::from([
                ("3".to_string(), "living_room_curtain".to_string()),
                ("7".to_string(), "shared_curtain".to_string()),
            ]),
            HashMap::from([
                ("5".to_string(), "hall_light".to_string()),
                ("7".to_string(), "shared_light".to_string()),
            ]),
        )
    }

    #[test]
    fn resolves_each_partition() {
        let reg = registry();
        assert_eq!(reg.resolve("3"), Some((DeviceClass::Curtain, "living_room_curtain")));
        assert_eq!(reg.resolve("5"), Some((DeviceClass::Light, "hall_light")));
        assert_eq!(reg.resolve("99"), None);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn curtains_win_when_both_partitions_map_a_node() {
        assert_eq!(registry().resolve("7"), Some((DeviceClass::Curtain, "shared_curtain")));
    }
}
