//! Attribute registry of the ATT server
//!
//! Attributes are registered in groups covering a contiguous handle range.
//! Groups are kept ordered by start handle; every list or value mutation takes
//! the store lock for that single operation only.
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use super::types::{AttributePermissions, AttributeSettings, ConnectionId};
use crate::error::ServerError;
use crate::uuid::Uuid;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a write reached the attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Request,
    Command,
    /// A queued prepared write applied by Execute Write
    Execute,
}

/// A write handed to a group's write callback
#[derive(Debug, Clone, Copy)]
pub struct WriteEvent<'a> {
    pub handle: u16,
    pub kind: WriteKind,
    pub offset: u16,
    pub value: &'a [u8],
}

/// Produces the value of an attribute carrying `READ_CALLBACK`
pub type ReadCallback =
    Arc<dyn Fn(ConnectionId, u16) -> Result<Vec<u8>, AttErrorCode> + Send + Sync>;

/// Consumes writes to an attribute carrying `WRITE_CALLBACK`
pub type WriteCallback =
    Arc<dyn Fn(ConnectionId, &WriteEvent<'_>) -> Result<(), AttErrorCode> + Send + Sync>;

/// A single addressable attribute
#[derive(Debug, Clone)]
pub struct Attribute {
    handle: u16,
    uuid: Uuid,
    /// Backing storage, always `max_length` bytes long
    buffer: Vec<u8>,
    length: u16,
    settings: AttributeSettings,
    permissions: AttributePermissions,
}

impl Attribute {
    /// Create a fixed-length attribute; its maximum length is the length of
    /// `value`.
    pub fn new(uuid: Uuid, value: impl Into<Vec<u8>>, permissions: AttributePermissions) -> Self {
        let mut buffer = value.into();
        buffer.truncate(usize::from(u16::MAX));
        let length = buffer.len() as u16;

        Self {
            handle: ATT_HANDLE_NONE,
            uuid,
            buffer,
            length,
            settings: AttributeSettings::empty(),
            permissions,
        }
    }

    /// Create a variable-length attribute holding up to `max_length` bytes.
    ///
    /// `max_length` is raised to the initial value's length if that is longer.
    pub fn variable(
        uuid: Uuid,
        value: impl Into<Vec<u8>>,
        max_length: u16,
        permissions: AttributePermissions,
    ) -> Self {
        let mut attribute = Self::new(uuid, value, permissions);
        let max_length = max_length.max(attribute.length);
        attribute.buffer.resize(usize::from(max_length), 0);
        attribute.settings = AttributeSettings::VARIABLE_LENGTH;
        attribute
    }

    /// Add storage settings
    pub fn with_settings(mut self, settings: AttributeSettings) -> Self {
        self.settings |= settings;
        self
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Current value
    pub fn value(&self) -> &[u8] {
        &self.buffer[..usize::from(self.length)]
    }

    pub fn len(&self) -> u16 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn max_length(&self) -> u16 {
        self.buffer.len() as u16
    }

    pub fn settings(&self) -> AttributeSettings {
        self.settings
    }

    pub fn permissions(&self) -> AttributePermissions {
        self.permissions
    }

    pub fn is_variable_length(&self) -> bool {
        self.settings.contains(AttributeSettings::VARIABLE_LENGTH)
    }

    fn is_service_declaration(&self) -> bool {
        self.uuid == PRIMARY_SERVICE_UUID || self.uuid == SECONDARY_SERVICE_UUID
    }

    /// Overwrite the value from its start. Nothing is copied on rejection.
    fn set(&mut self, bytes: &[u8]) -> AttResult<()> {
        if bytes.len() > self.buffer.len() {
            return Err(AttError::LengthExceeded {
                handle: self.handle,
                len: bytes.len(),
                max: self.max_length(),
            });
        }

        self.buffer[..bytes.len()].copy_from_slice(bytes);
        if self.is_variable_length() {
            self.length = bytes.len() as u16;
        }
        Ok(())
    }

    /// Write `bytes` at `offset`. Nothing is copied on rejection.
    fn write_at(&mut self, offset: u16, bytes: &[u8]) -> AttResult<()> {
        let offset_usize = usize::from(offset);
        if offset_usize > self.buffer.len() {
            return Err(AttError::InvalidOffset {
                handle: self.handle,
                offset,
            });
        }

        let end = offset_usize + bytes.len();
        if end > self.buffer.len() {
            return Err(AttError::LengthExceeded {
                handle: self.handle,
                len: end,
                max: self.max_length(),
            });
        }

        self.buffer[offset_usize..end].copy_from_slice(bytes);
        if self.is_variable_length() {
            self.length = end as u16;
        }
        Ok(())
    }
}

/// A contiguous run of attributes registered together
pub struct AttributeGroup {
    start_handle: u16,
    end_handle: u16,
    attributes: Vec<Attribute>,
    read_callback: Option<ReadCallback>,
    write_callback: Option<WriteCallback>,
}

impl AttributeGroup {
    /// Build a group whose attributes take the handles `start_handle`,
    /// `start_handle + 1`, ... in order.
    pub fn new(start_handle: u16, attributes: Vec<Attribute>) -> Result<Self, ServerError> {
        if start_handle == ATT_HANDLE_NONE {
            return Err(ServerError::InvalidGroup("handle 0x0000 is reserved".into()));
        }
        if attributes.is_empty() {
            return Err(ServerError::InvalidGroup(format!(
                "group at {:#06x} has no attributes",
                start_handle
            )));
        }

        let end_handle = u16::try_from(attributes.len() - 1)
            .ok()
            .and_then(|count| start_handle.checked_add(count))
            .ok_or_else(|| {
                ServerError::InvalidGroup(format!(
                    "{} attributes from {:#06x} overflow the handle space",
                    attributes.len(),
                    start_handle
                ))
            })?;

        let attributes = attributes
            .into_iter()
            .zip(start_handle..=end_handle)
            .map(|(mut attribute, handle)| {
                attribute.handle = handle;
                attribute
            })
            .collect();

        Ok(Self {
            start_handle,
            end_handle,
            attributes,
            read_callback: None,
            write_callback: None,
        })
    }

    pub fn with_read_callback(mut self, callback: ReadCallback) -> Self {
        self.read_callback = Some(callback);
        self
    }

    pub fn with_write_callback(mut self, callback: WriteCallback) -> Self {
        self.write_callback = Some(callback);
        self
    }

    pub fn start_handle(&self) -> u16 {
        self.start_handle
    }

    pub fn end_handle(&self) -> u16 {
        self.end_handle
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.start_handle..=self.end_handle).contains(&handle)
    }

    pub fn attribute(&self, handle: u16) -> Option<&Attribute> {
        if !self.contains(handle) {
            return None;
        }
        self.attributes.get(usize::from(handle - self.start_handle))
    }

    fn attribute_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        if !self.contains(handle) {
            return None;
        }
        self.attributes.get_mut(usize::from(handle - self.start_handle))
    }

    fn overlaps(&self, other: &AttributeGroup) -> bool {
        self.start_handle <= other.end_handle && other.start_handle <= self.end_handle
    }
}

impl fmt::Debug for AttributeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeGroup")
            .field("start_handle", &self.start_handle)
            .field("end_handle", &self.end_handle)
            .field("attributes", &self.attributes)
            .field("read_callback", &self.read_callback.is_some())
            .field("write_callback", &self.write_callback.is_some())
            .finish()
    }
}

/// What the server needs to know about an attribute to decide on an access,
/// copied out so no lock is held while callbacks run.
#[derive(Clone)]
pub struct AttributeAccess {
    pub handle: u16,
    pub permissions: AttributePermissions,
    pub settings: AttributeSettings,
    pub max_length: u16,
    pub read_callback: Option<ReadCallback>,
    pub write_callback: Option<WriteCallback>,
}

impl AttributeAccess {
    /// The group's read callback, if this attribute defers reads to it
    pub fn reader(&self) -> Option<&ReadCallback> {
        self.read_callback
            .as_ref()
            .filter(|_| self.settings.contains(AttributeSettings::READ_CALLBACK))
    }

    /// The group's write callback, if this attribute defers writes to it
    pub fn writer(&self) -> Option<&WriteCallback> {
        self.write_callback
            .as_ref()
            .filter(|_| self.settings.contains(AttributeSettings::WRITE_CALLBACK))
    }
}

type Groups = BTreeMap<u16, AttributeGroup>;

/// Registry of attribute groups ordered by start handle
#[derive(Debug, Default)]
pub struct AttributeStore {
    groups: Mutex<Groups>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the store lock. Released when the guard is dropped.
    pub fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            groups: self.groups.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Remove every group
    pub fn clear(&self) {
        self.lock().groups.clear();
    }

    /// Insert a group in start handle order
    pub fn register_group(&self, group: AttributeGroup) -> Result<(), ServerError> {
        let mut guard = self.lock();
        let start = group.start_handle;

        if guard.groups.contains_key(&start) {
            return Err(ServerError::DuplicateGroup(start));
        }

        if let Some(other) = guard.groups.values().find(|other| other.overlaps(&group)) {
            warn!(
                "(ATT) group {:#06x}..={:#06x} overlaps registered group {:#06x}..={:#06x}",
                group.start_handle,
                group.end_handle,
                other.start_handle,
                other.end_handle
            );
        }

        info!(
            "(ATT) registered group {:#06x}..={:#06x} ({} attributes)",
            group.start_handle,
            group.end_handle,
            group.attributes.len()
        );
        guard.groups.insert(start, group);
        Ok(())
    }

    /// Remove the group starting at `start_handle` and hand it back.
    ///
    /// A miss is not an error: the group may already have been removed.
    pub fn unregister_group(&self, start_handle: u16) -> Option<AttributeGroup> {
        let removed = self.lock().groups.remove(&start_handle);

        if removed.is_none() {
            warn!("(ATT) no group registered at handle {:#06x}", start_handle);
        }
        removed
    }

    /// Replace an attribute value.
    ///
    /// The stored length only follows the write for variable-length
    /// attributes; a fixed-length attribute has its leading bytes replaced.
    pub fn set_value(&self, handle: u16, bytes: &[u8]) -> AttResult<()> {
        let mut guard = self.lock();
        let attribute = guard.find_mut(handle).ok_or(AttError::NotFound(handle))?;
        attribute.set(bytes)
    }

    /// Write part of an attribute value starting at `offset`
    pub fn write_at(&self, handle: u16, offset: u16, bytes: &[u8]) -> AttResult<()> {
        let mut guard = self.lock();
        let attribute = guard.find_mut(handle).ok_or(AttError::NotFound(handle))?;
        attribute.write_at(offset, bytes)
    }

    /// Borrow an attribute value.
    ///
    /// The returned guard holds the store lock until it is dropped, so it
    /// must not be kept across calls that modify the store.
    pub fn get_value(&self, handle: u16) -> AttResult<AttributeValue<'_>> {
        let guard = self.lock();
        if guard.find(handle).is_none() {
            return Err(AttError::NotFound(handle));
        }
        Ok(AttributeValue { guard, handle })
    }

    /// Handle ranges of all registered groups, in handle order
    pub fn group_ranges(&self) -> Vec<(u16, u16)> {
        self.lock()
            .groups()
            .map(|group| (group.start_handle, group.end_handle))
            .collect()
    }
}

/// Exclusive access to the registry for the duration of one operation
pub struct StoreGuard<'a> {
    groups: MutexGuard<'a, Groups>,
}

impl<'a> StoreGuard<'a> {
    /// Groups in ascending handle order
    pub fn groups(&self) -> impl Iterator<Item = &AttributeGroup> + '_ {
        self.groups.values()
    }

    /// Locate an attribute and the group that owns it
    pub fn find(&self, handle: u16) -> Option<(&AttributeGroup, &Attribute)> {
        let (_, group) = self.groups.range(..=handle).next_back()?;
        group.attribute(handle).map(|attribute| (group, attribute))
    }

    fn find_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        let (_, group) = self.groups.range_mut(..=handle).next_back()?;
        group.attribute_mut(handle)
    }

    /// Snapshot of what an access check on `handle` needs
    pub fn access(&self, handle: u16) -> Option<AttributeAccess> {
        self.find(handle).map(|(group, attribute)| AttributeAccess {
            handle,
            permissions: attribute.permissions,
            settings: attribute.settings,
            max_length: attribute.max_length(),
            read_callback: group.read_callback.clone(),
            write_callback: group.write_callback.clone(),
        })
    }

    /// Attributes with handles in `start..=end`, in handle order
    pub fn attributes_in(&self, start: u16, end: u16) -> impl Iterator<Item = &Attribute> + '_ {
        self.groups
            .values()
            .filter(move |group| group.start_handle <= end && group.end_handle >= start)
            .flat_map(|group| group.attributes.iter())
            .filter(move |attribute| (start..=end).contains(&attribute.handle))
    }

    /// Last handle of the service whose declaration sits at `handle`: the
    /// handle before the next service declaration, or `0xFFFF` for the last
    /// service on the server.
    pub fn service_group_end(&self, handle: u16) -> u16 {
        let Some(next) = handle.checked_add(1) else {
            return ATT_HANDLE_MAX;
        };

        self.attributes_in(next, ATT_HANDLE_MAX)
            .find(|attribute| attribute.is_service_declaration())
            .map_or(ATT_HANDLE_MAX, |attribute| attribute.handle - 1)
    }
}

/// Borrowed attribute value; holds the store lock while alive
pub struct AttributeValue<'a> {
    guard: StoreGuard<'a>,
    handle: u16,
}

impl AttributeValue<'_> {
    pub fn handle(&self) -> u16 {
        self.handle
    }
}

impl Deref for AttributeValue<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard
            .find(self.handle)
            .map_or(&[][..], |(_, attribute)| attribute.value())
    }
}

impl fmt::Debug for AttributeValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeValue({:#06x}: {})", self.handle, hex::encode(&**self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(start: u16, extra: usize) -> AttributeGroup {
        let mut attributes = vec![Attribute::new(
            Uuid::from_u16(PRIMARY_SERVICE_UUID),
            vec![0x0F, 0x18],
            AttributePermissions::READ,
        )];
        for _ in 0..extra {
            attributes.push(Attribute::variable(
                Uuid::from_u16(0x2A19),
                Vec::new(),
                16,
                AttributePermissions::READ_WRITE,
            ));
        }
        AttributeGroup::new(start, attributes).unwrap()
    }

    #[test]
    fn test_groups_traverse_in_handle_order() {
        let store = AttributeStore::new();
        store.register_group(service(0x0020, 1)).unwrap();
        store.register_group(service(0x0001, 2)).unwrap();
        store.register_group(service(0x0010, 0)).unwrap();

        assert_eq!(
            store.group_ranges(),
            vec![(0x0001, 0x0003), (0x0010, 0x0010), (0x0020, 0x0021)]
        );
    }

    #[test]
    fn test_duplicate_start_handle_is_rejected() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 0)).unwrap();
        assert!(matches!(
            store.register_group(service(0x0001, 1)),
            Err(ServerError::DuplicateGroup(0x0001))
        ));
    }

    #[test]
    fn test_invalid_groups() {
        let reserved = vec![Attribute::new(
            Uuid::from_u16(1),
            vec![],
            AttributePermissions::READ,
        )];
        assert!(AttributeGroup::new(0, reserved).is_err());
        assert!(AttributeGroup::new(1, Vec::new()).is_err());

        let two = vec![
            Attribute::new(Uuid::from_u16(1), vec![], AttributePermissions::READ),
            Attribute::new(Uuid::from_u16(1), vec![], AttributePermissions::READ),
        ];
        assert!(AttributeGroup::new(0xFFFF, two).is_err());
    }

    #[test]
    fn test_handles_follow_group_start() {
        let group = service(0x0005, 2);
        let handles: Vec<u16> = group.attributes().iter().map(|a| a.handle()).collect();
        assert_eq!(handles, vec![0x0005, 0x0006, 0x0007]);
        assert_eq!(group.end_handle(), 0x0007);
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 1)).unwrap();

        store.set_value(0x0002, b"hello").unwrap();
        assert_eq!(&*store.get_value(0x0002).unwrap(), b"hello");

        store.set_value(0x0002, b"hi").unwrap();
        assert_eq!(&*store.get_value(0x0002).unwrap(), b"hi");
    }

    #[test]
    fn test_oversized_write_leaves_value_untouched() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 1)).unwrap();
        store.set_value(0x0002, b"keep").unwrap();

        let err = store.set_value(0x0002, &[0u8; 17]).unwrap_err();
        assert_eq!(
            err,
            AttError::LengthExceeded {
                handle: 0x0002,
                len: 17,
                max: 16
            }
        );
        assert_eq!(&*store.get_value(0x0002).unwrap(), b"keep");
    }

    #[test]
    fn test_fixed_length_keeps_its_length() {
        let store = AttributeStore::new();
        let group = AttributeGroup::new(
            0x0001,
            vec![Attribute::new(
                Uuid::from_u16(0x2A00),
                vec![1, 2, 3, 4],
                AttributePermissions::READ_WRITE,
            )],
        )
        .unwrap();
        store.register_group(group).unwrap();

        store.set_value(0x0001, &[9, 9]).unwrap();
        assert_eq!(&*store.get_value(0x0001).unwrap(), &[9, 9, 3, 4]);
    }

    #[test]
    fn test_unregister_invalidates_handles() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 1)).unwrap();

        let removed = store.unregister_group(0x0001).unwrap();
        assert_eq!(removed.end_handle(), 0x0002);

        assert_eq!(store.get_value(0x0002).unwrap_err(), AttError::NotFound(0x0002));
        assert_eq!(store.set_value(0x0001, &[]).unwrap_err(), AttError::NotFound(0x0001));
        assert!(store.unregister_group(0x0001).is_none());
    }

    #[test]
    fn test_lookup_between_groups_misses() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 1)).unwrap();
        store.register_group(service(0x0010, 1)).unwrap();

        let guard = store.lock();
        assert!(guard.find(0x0003).is_none());
        assert!(guard.find(0x0000).is_none());
        let (group, attribute) = guard.find(0x0011).unwrap();
        assert_eq!(group.start_handle(), 0x0010);
        assert_eq!(attribute.handle(), 0x0011);
    }

    #[test]
    fn test_write_at_extends_variable_value() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 1)).unwrap();

        store.write_at(0x0002, 0, b"abc").unwrap();
        store.write_at(0x0002, 3, b"def").unwrap();
        assert_eq!(&*store.get_value(0x0002).unwrap(), b"abcdef");

        assert_eq!(
            store.write_at(0x0002, 17, b"x").unwrap_err(),
            AttError::InvalidOffset {
                handle: 0x0002,
                offset: 17
            }
        );
        assert!(matches!(
            store.write_at(0x0002, 10, &[0u8; 7]),
            Err(AttError::LengthExceeded { .. })
        ));
        assert_eq!(&*store.get_value(0x0002).unwrap(), b"abcdef");
    }

    #[test]
    fn test_service_group_end() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 2)).unwrap();
        store.register_group(service(0x0008, 1)).unwrap();

        let guard = store.lock();
        assert_eq!(guard.service_group_end(0x0001), 0x0007);
        assert_eq!(guard.service_group_end(0x0008), 0xFFFF);
    }

    #[test]
    fn test_attributes_in_range_spans_groups() {
        let store = AttributeStore::new();
        store.register_group(service(0x0001, 2)).unwrap();
        store.register_group(service(0x0008, 1)).unwrap();

        let guard = store.lock();
        let handles: Vec<u16> = guard.attributes_in(0x0002, 0x0008).map(|a| a.handle()).collect();
        assert_eq!(handles, vec![0x0002, 0x0003, 0x0008]);
    }
}
