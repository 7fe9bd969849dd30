//! Device state cache and change detection.
//!
//! Every property keeps two values: the one last published, and the one last
//! confirmed by the bus. They differ only while an optimistic command value is
//! outstanding; [`StateStore::retract`] rolls the published value back when
//! that command is never acknowledged.

use std::collections::{BTreeMap, HashMap};

use crate::value::{DeviceKind, PropertyValue};

/// Property identity: device kind, room and property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub device: DeviceKind,
    pub room: String,
    pub name: String,
}

impl PropertyKey {
    pub fn new(device: DeviceKind, room: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device,
            room: room.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    published: PropertyValue,
    confirmed: Option<PropertyValue>,
}

/// Properties of one device in one room.
pub type DeviceState = BTreeMap<String, PropertyValue>;

/// Cache of the last published value per property plus the per-device view.
///
/// Entries are created lazily on first touch and never removed.
#[derive(Debug, Default)]
pub struct StateStore {
    cache: HashMap<PropertyKey, Entry>,
    devices: BTreeMap<(DeviceKind, String), DeviceState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value decoded from the bus.
    ///
    /// Returns `true` when the value should be published: it differs from the
    /// last published value, or `force` is set.
    pub fn update(
        &mut self,
        device: DeviceKind,
        room: &str,
        name: &str,
        value: PropertyValue,
        force: bool,
    ) -> bool {
        let key = PropertyKey::new(device, room, name);
        match self.cache.get_mut(&key) {
            Some(entry) => {
                entry.confirmed = Some(value.clone());
                if !force && entry.published == value {
                    return false;
                }
                entry.published = value.clone();
            }
            None => {
                self.cache.insert(
                    key.clone(),
                    Entry {
                        published: value.clone(),
                        confirmed: Some(value.clone()),
                    },
                );
            }
        }
        self.set_device_property(key, value);
        true
    }

    /// Record a commanded value before the bus confirms it.
    ///
    /// The confirmed value is left untouched so the command can be retracted.
    pub fn optimistic(
        &mut self,
        device: DeviceKind,
        room: &str,
        name: &str,
        value: PropertyValue,
    ) -> bool {
        let key = PropertyKey::new(device, room, name);
        match self.cache.get_mut(&key) {
            Some(entry) if entry.published == value => return false,
            Some(entry) => entry.published = value.clone(),
            None => {
                self.cache.insert(
                    key.clone(),
                    Entry {
                        published: value.clone(),
                        confirmed: None,
                    },
                );
            }
        }
        self.set_device_property(key, value);
        true
    }

    /// Record a bus value as confirmed without publishing it.
    ///
    /// Used while a command for the property is outstanding; the published
    /// value keeps showing the commanded state.
    pub fn confirm(&mut self, device: DeviceKind, room: &str, name: &str, value: PropertyValue) {
        if let Some(entry) = self.cache.get_mut(&PropertyKey::new(device, room, name)) {
            entry.confirmed = Some(value);
        }
    }

    /// Undo an optimistic value whose command was never acknowledged.
    ///
    /// Returns the restored bus-confirmed value when it differs from what was
    /// published. Without a confirmed value there is nothing to restore.
    pub fn retract(&mut self, device: DeviceKind, room: &str, name: &str) -> Option<PropertyValue> {
        let key = PropertyKey::new(device, room, name);
        let entry = self.cache.get_mut(&key)?;
        let confirmed = entry.confirmed.clone()?;
        if entry.published == confirmed {
            return None;
        }
        entry.published = confirmed.clone();
        self.set_device_property(key, confirmed.clone());
        Some(confirmed)
    }

    /// Last published value.
    pub fn get(&self, device: DeviceKind, room: &str, name: &str) -> Option<&PropertyValue> {
        self.cache
            .get(&PropertyKey::new(device, room, name))
            .map(|entry| &entry.published)
    }

    /// Last value reported by the bus.
    pub fn confirmed(&self, device: DeviceKind, room: &str, name: &str) -> Option<&PropertyValue> {
        self.cache
            .get(&PropertyKey::new(device, room, name))
            .and_then(|entry| entry.confirmed.as_ref())
    }

    pub fn device(&self, device: DeviceKind, room: &str) -> Option<&DeviceState> {
        self.devices.get(&(device, room.to_string()))
    }

    /// Every known device, ordered by kind then room.
    pub fn devices(&self) -> impl Iterator<Item = (&(DeviceKind, String), &DeviceState)> {
        self.devices.iter()
    }

    /// Number of properties tracked.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn set_device_property(&mut self, key: PropertyKey, value: PropertyValue) {
        self.devices
            .entry((key.device, key.room))
            .or_default()
            .insert(key.name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on() -> PropertyValue {
        PropertyValue::Switch(true)
    }

    fn off() -> PropertyValue {
        PropertyValue::Switch(false)
    }

    #[test]
    fn test_change_only_publish() {
        let mut store = StateStore::new();
        assert!(store.update(DeviceKind::Light, "1", "power1", on(), false));
        assert!(!store.update(DeviceKind::Light, "1", "power1", on(), false));
        assert!(store.update(DeviceKind::Light, "1", "power1", off(), false));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_force_always_publishes() {
        let mut store = StateStore::new();
        assert!(store.update(DeviceKind::Thermostat, "2", "target", PropertyValue::Number(21.0), true));
        assert!(store.update(DeviceKind::Thermostat, "2", "target", PropertyValue::Number(21.0), true));
    }

    #[test]
    fn test_device_state_created_lazily() {
        let mut store = StateStore::new();
        assert!(store.device(DeviceKind::Outlet, "1").is_none());

        store.update(DeviceKind::Outlet, "1", "power1", on(), false);
        store.update(DeviceKind::Outlet, "1", "usage1", PropertyValue::Number(3.5), false);

        let state = store.device(DeviceKind::Outlet, "1").unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("power1"), Some(&on()));
        assert_eq!(store.devices().count(), 1);
    }

    #[test]
    fn test_optimistic_then_confirmed() {
        let mut store = StateStore::new();
        store.update(DeviceKind::Light, "1", "power1", off(), false);

        assert!(store.optimistic(DeviceKind::Light, "1", "power1", on()));
        assert_eq!(store.get(DeviceKind::Light, "1", "power1"), Some(&on()));
        assert_eq!(store.confirmed(DeviceKind::Light, "1", "power1"), Some(&off()));

        // the bus disagrees: the decoded value wins
        assert!(store.update(DeviceKind::Light, "1", "power1", off(), false));
        assert_eq!(store.get(DeviceKind::Light, "1", "power1"), Some(&off()));
    }

    #[test]
    fn test_optimistic_unchanged_is_silent() {
        let mut store = StateStore::new();
        store.update(DeviceKind::Fan, "1", "power", on(), false);
        assert!(!store.optimistic(DeviceKind::Fan, "1", "power", on()));
    }

    #[test]
    fn test_retract_restores_confirmed() {
        let mut store = StateStore::new();
        store.update(DeviceKind::Light, "2", "power2", off(), false);
        store.optimistic(DeviceKind::Light, "2", "power2", on());

        assert_eq!(store.retract(DeviceKind::Light, "2", "power2"), Some(off()));
        assert_eq!(store.get(DeviceKind::Light, "2", "power2"), Some(&off()));
        assert_eq!(
            store.device(DeviceKind::Light, "2").unwrap().get("power2"),
            Some(&off())
        );
        // nothing left to undo
        assert_eq!(store.retract(DeviceKind::Light, "2", "power2"), None);
    }

    #[test]
    fn test_retract_without_confirmation() {
        let mut store = StateStore::new();
        store.optimistic(DeviceKind::Gas, "1", "cutoff", off());
        assert_eq!(store.retract(DeviceKind::Gas, "1", "cutoff"), None);
        assert_eq!(store.retract(DeviceKind::Doorlock, "1", "power"), None);
    }

    #[test]
    fn test_confirm_keeps_published_value() {
        let mut store = StateStore::new();
        store.update(DeviceKind::Light, "1", "power1", off(), false);
        assert!(store.optimistic(DeviceKind::Light, "1", "power1", on()));

        store.confirm(DeviceKind::Light, "1", "power1", off());
        assert_eq!(store.get(DeviceKind::Light, "1", "power1"), Some(&on()));
        assert_eq!(store.confirmed(DeviceKind::Light, "1", "power1"), Some(&off()));
        assert_eq!(store.retract(DeviceKind::Light, "1", "power1"), Some(off()));
    }
}
