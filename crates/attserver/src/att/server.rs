//! ATT Server implementation
use super::constants::*;
use super::database::{
    AttributeAccess, AttributeGroup, AttributeStore, AttributeValue, WriteEvent, WriteKind,
};
use super::error::{AttError, AttErrorCode, AttResult};
use super::idle::DiscoveryIdleTracker;
use super::interface::{
    AuthorizationCallback, DeviceManager, IndicationHandler, NoIndications, SignedWriteHandler,
    Transport,
};
use super::method::{suppresses_error_response, Method};
use super::pdu::*;
use super::prepare::PreparedWriteQueue;
use super::types::*;
use crate::error::{ServerError, TimerError};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Default discovery-idle timeout in seconds
pub const DEFAULT_DISCOVERY_IDLE_TIMEOUT: u16 = 15;

/// ATT Server configuration
#[derive(Debug, Clone)]
pub struct AttServerConfig {
    /// Server MTU, offered in Exchange MTU Responses
    pub mtu: u16,
    /// Seconds without discovery traffic before a connection is reported
    /// idle; 0 disables tracking
    pub discovery_idle_timeout: u16,
    /// Maximum number of prepared writes queued per connection
    pub prepare_queue_limit: usize,
}

impl Default for AttServerConfig {
    fn default() -> Self {
        Self {
            mtu: ATT_DEFAULT_MTU,
            discovery_idle_timeout: DEFAULT_DISCOVERY_IDLE_TIMEOUT,
            prepare_queue_limit: ATT_PREPARE_WRITE_QUEUE_SIZE,
        }
    }
}

/// Per-connection state
struct Connection {
    mtu: AtomicU16,
    prepared: Mutex<PreparedWriteQueue>,
    idle: Mutex<DiscoveryIdleTracker>,
    indication_pending: AtomicBool,
    /// Set once the connection is torn down; PDUs still in flight are not
    /// answered
    closed: AtomicBool,
}

impl Connection {
    fn new(config: &AttServerConfig) -> Self {
        Self {
            mtu: AtomicU16::new(ATT_DEFAULT_MTU),
            prepared: Mutex::new(PreparedWriteQueue::new(config.prepare_queue_limit)),
            idle: Mutex::new(DiscoveryIdleTracker::new(config.discovery_idle_timeout)),
            indication_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn mtu(&self) -> usize {
        usize::from(self.mtu.load(Ordering::Acquire))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn no_signed_writes() -> SignedWriteHandler {
    Arc::new(|conn: ConnectionId, command: &SignedWriteCommand| {
        debug!(
            "(ATT) {} signed write to {:#06x} ignored, no handler registered",
            conn,
            command.handle
        );
    })
}

/// ATT Server
///
/// Owns the attribute registry and the state of every open connection. All
/// entry points take `&self`; the embedding stack drives the server from
/// whatever threads deliver transport and timer events.
pub struct AttServer<T: Transport, D: DeviceManager> {
    store: AttributeStore,
    transport: T,
    device_manager: D,
    config: AttServerConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    indications: RwLock<Arc<dyn IndicationHandler>>,
    authorization: RwLock<Option<AuthorizationCallback>>,
    signed_writes: RwLock<SignedWriteHandler>,
}

impl<T: Transport, D: DeviceManager> AttServer<T, D> {
    /// Create a new ATT server
    pub fn new(transport: T, device_manager: D, mut config: AttServerConfig) -> Self {
        config.mtu = config.mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);

        let server = Self {
            store: AttributeStore::new(),
            transport,
            device_manager,
            config,
            connections: RwLock::new(HashMap::new()),
            indications: RwLock::new(Arc::new(NoIndications)),
            authorization: RwLock::new(None),
            signed_writes: RwLock::new(no_signed_writes()),
        };
        server.init();
        server
    }

    /// Reset to the initial state: empty registry, no authorization callback,
    /// no-op indication and signed-write handlers. Open connections are kept.
    pub fn init(&self) {
        self.store.clear();
        *write(&self.indications) = Arc::new(NoIndications);
        *write(&self.authorization) = None;
        *write(&self.signed_writes) = no_signed_writes();
        info!("(ATT) server initialized, mtu {}", self.config.mtu);
    }

    pub fn config(&self) -> &AttServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn device_manager(&self) -> &D {
        &self.device_manager
    }

    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    // Profile layer API

    pub fn register_group(&self, group: AttributeGroup) -> Result<(), ServerError> {
        self.store.register_group(group)
    }

    pub fn unregister_group(&self, start_handle: u16) -> Option<AttributeGroup> {
        self.store.unregister_group(start_handle)
    }

    /// Handle ranges of the registered groups, in handle order
    pub fn registered_groups(&self) -> Vec<(u16, u16)> {
        self.store.group_ranges()
    }

    pub fn set_attribute_value(&self, handle: u16, value: &[u8]) -> AttResult<()> {
        self.store.set_value(handle, value)
    }

    /// Borrow a stored value. The store stays locked until the returned guard
    /// is dropped.
    pub fn get_attribute_value(&self, handle: u16) -> AttResult<AttributeValue<'_>> {
        self.store.get_value(handle)
    }

    pub fn register_authorization_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionId, Access, u16) -> Result<(), AttErrorCode> + Send + Sync + 'static,
    {
        let callback: AuthorizationCallback = Arc::new(callback);
        *write(&self.authorization) = Some(callback);
    }

    pub fn register_signed_write_handler<F>(&self, handler: F)
    where
        F: Fn(ConnectionId, &SignedWriteCommand) + Send + Sync + 'static,
    {
        *write(&self.signed_writes) = Arc::new(handler);
    }

    pub fn register_indication_handler<H: IndicationHandler + 'static>(&self, handler: H) {
        *write(&self.indications) = Arc::new(handler);
    }

    // Connection lifecycle

    pub fn on_connection_opened(&self, conn: ConnectionId) -> Result<(), ServerError> {
        {
            let mut connections = write(&self.connections);
            if connections.contains_key(&conn) {
                return Err(ServerError::DuplicateConnection(conn));
            }
            connections.insert(conn, Arc::new(Connection::new(&self.config)));
        }

        info!("(ATT) {} opened", conn);
        self.indication_handler().connection_opened(conn);
        Ok(())
    }

    pub fn on_connection_closed(&self, conn: ConnectionId) -> Result<(), ServerError> {
        let connection = write(&self.connections)
            .remove(&conn)
            .ok_or(ServerError::UnknownConnection(conn))?;

        connection.closed.store(true, Ordering::Release);
        lock(&connection.prepared).clear_on_disconnect();
        lock(&connection.idle).on_disconnect(&self.device_manager, conn);

        info!("(ATT) {} closed", conn);
        self.indication_handler().connection_closed(conn);
        Ok(())
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        read(&self.connections).contains_key(&conn)
    }

    /// MTU currently in effect on a connection
    pub fn connection_mtu(&self, conn: ConnectionId) -> Option<u16> {
        self.connection(conn)
            .map(|connection| connection.mtu.load(Ordering::Acquire))
    }

    /// Number of prepared writes waiting on a connection
    pub fn prepared_writes(&self, conn: ConnectionId) -> Option<usize> {
        self.connection(conn)
            .map(|connection| lock(&connection.prepared).len())
    }

    /// Idle timer of `conn` expired
    pub fn on_idle_timeout(&self, conn: ConnectionId) {
        match self.connection(conn) {
            Some(connection) => lock(&connection.idle).on_timeout(&self.device_manager, conn),
            None => debug!("(ATT) idle timeout for unknown {}", conn),
        }
    }

    /// L2CAP flow control changed on a connection
    pub fn on_flow_control(&self, conn: ConnectionId, enabled: bool) {
        if !self.is_connected(conn) {
            debug!("(ATT) flow control event for unknown {}", conn);
            return;
        }

        debug!(
            "(ATT) {} flow {}",
            conn,
            if enabled { "enabled" } else { "disabled" }
        );
        self.indication_handler().flow_control(conn, enabled);
    }

    // Server initiated PDUs

    /// Send a Handle Value Notification, truncating the value to `mtu - 3`
    pub fn send_notification(
        &self,
        conn: ConnectionId,
        handle: u16,
        value: &[u8],
    ) -> Result<(), ServerError> {
        let connection = self
            .connection(conn)
            .ok_or(ServerError::UnknownConnection(conn))?;

        let len = value.len().min(connection.mtu() - 3);
        let notification = HandleValueNotification {
            handle,
            value: value[..len].to_vec(),
        };
        self.send(conn, &notification.serialize())
    }

    /// Send a Handle Value Indication, truncating the value to `mtu - 3`.
    ///
    /// Only one indication may be outstanding per connection; the next one can
    /// be sent once the client's confirmation has arrived.
    pub fn send_indication(
        &self,
        conn: ConnectionId,
        handle: u16,
        value: &[u8],
    ) -> Result<(), ServerError> {
        let connection = self
            .connection(conn)
            .ok_or(ServerError::UnknownConnection(conn))?;

        if connection
            .indication_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServerError::IndicationPending(conn));
        }

        let len = value.len().min(connection.mtu() - 3);
        let indication = HandleValueIndication {
            handle,
            value: value[..len].to_vec(),
        };

        self.send(conn, &indication.serialize()).map_err(|err| {
            connection.indication_pending.store(false, Ordering::Release);
            err
        })
    }

    // Dispatcher

    /// Process one PDU received on `conn`.
    ///
    /// Protocol failures are answered on the wire or dropped, never returned.
    /// The returned error only reports local failures: a response the
    /// transport would not take, or an idle timer that could not be armed.
    pub fn handle_pdu(&self, conn: ConnectionId, pdu: &[u8]) -> Result<(), ServerError> {
        let Some(connection) = self.connection(conn) else {
            debug!("(ATT) dropping PDU from unknown {}", conn);
            return Ok(());
        };

        let Some(&opcode) = pdu.first() else {
            debug!("(ATT) {} empty PDU dropped", conn);
            return Ok(());
        };

        trace!("(ATT) {} rx {}", conn, hex::encode(pdu));

        let method = Method::from_opcode(opcode);
        let mut timer = Ok(());

        let result = if pdu.len() < method.min_length() {
            Err(AttError::InvalidPdu)
        } else if !method.has_handler() {
            Err(AttError::RequestNotSupported)
        } else {
            let result = self.dispatch(method, conn, &connection, pdu);
            if method.is_discovery() {
                timer = lock(&connection.idle).on_discovery_pdu(&self.device_manager, conn);
            }
            result
        };

        if connection.closed.load(Ordering::Acquire) {
            debug!("(ATT) {} closed while handling {:?}, no response", conn, method);
            return Ok(());
        }

        match result {
            Ok(Some(response)) => {
                info!("(ATT) {} {:?} processed", conn, method);
                self.send(conn, &response)?;
            }
            Ok(None) => debug!("(ATT) {} {:?} processed", conn, method),
            Err(err) if suppresses_error_response(opcode) => {
                debug!("(ATT) {} {:?} failed without response: {}", conn, method, err);
            }
            Err(err) => {
                let handle = err.handle().unwrap_or_else(|| method.request_handle(pdu));
                info!("(ATT) {} {:?} failed: {}", conn, method, err);
                let response = ErrorResponse::new(opcode, handle, err.to_error_code());
                self.send(conn, &response.serialize())?;
            }
        }

        timer.map_err(|err: TimerError| {
            warn!("(ATT) {} idle timer not armed: {}", conn, err);
            ServerError::Timer(err)
        })
    }

    fn dispatch(
        &self,
        method: Method,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Option<Vec<u8>>> {
        match method {
            Method::ExchangeMtu => self.exchange_mtu(conn, connection, pdu).map(Some),
            Method::FindInformation => self.find_information(connection, pdu).map(Some),
            Method::FindByTypeValue => self.find_by_type_value(connection, pdu).map(Some),
            Method::ReadByType => self.read_by_type(conn, connection, pdu).map(Some),
            Method::Read => self.read(conn, connection, pdu).map(Some),
            Method::ReadBlob => self.read_blob(conn, connection, pdu).map(Some),
            Method::ReadMultiple => self.read_multiple(conn, connection, pdu).map(Some),
            Method::ReadByGroupType => self.read_by_group_type(conn, connection, pdu).map(Some),
            Method::Write => self.write_request(conn, pdu).map(Some),
            Method::WriteCommand => self.write_command(conn, pdu).map(|()| None),
            Method::SignedWriteCommand => self.signed_write_command(conn, pdu).map(|()| None),
            Method::PrepareWrite => self.prepare_write(conn, connection, pdu).map(Some),
            Method::ExecuteWrite => self.execute_write(conn, connection, pdu).map(Some),
            Method::ValueConfirmation => {
                self.value_confirmation(conn, connection);
                Ok(None)
            }
            Method::ValueNotification | Method::ValueIndication | Method::Unknown => {
                Err(AttError::RequestNotSupported)
            }
        }
    }

    // Method handlers

    fn exchange_mtu(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = ExchangeMtuRequest::parse(pdu)?;
        let server_mtu = self.config.mtu;

        let mtu = request.client_mtu.min(server_mtu).max(ATT_DEFAULT_MTU);
        connection.mtu.store(mtu, Ordering::Release);
        debug!("(ATT) {} mtu {}", conn, mtu);

        Ok(ExchangeMtuResponse { server_mtu }.serialize())
    }

    fn find_information(&self, connection: &Connection, pdu: &[u8]) -> AttResult<Vec<u8>> {
        let request = FindInformationRequest::parse(pdu)?;
        let range = request.range;
        range.validate()?;

        let mtu = connection.mtu();
        let mut entries = Vec::new();
        let mut size = 2;
        let mut short_format = None;

        let store = self.store.lock();
        for attribute in store.attributes_in(range.start, range.end) {
            let uuid = attribute.uuid();
            let short = uuid.as_u16().is_some();
            if *short_format.get_or_insert(short) != short {
                break;
            }

            let entry_len = 2 + uuid.att_len();
            if size + entry_len > mtu {
                break;
            }
            size += entry_len;
            entries.push((attribute.handle(), uuid));
        }
        drop(store);

        if entries.is_empty() {
            return Err(AttError::NoAttributesInRange(range.start));
        }

        Ok(FindInformationResponse { entries }.serialize())
    }

    fn find_by_type_value(&self, connection: &Connection, pdu: &[u8]) -> AttResult<Vec<u8>> {
        let request = FindByTypeValueRequest::parse(pdu)?;
        let range = request.range;
        range.validate()?;

        let max_entries = (connection.mtu() - 1) / 4;
        let store = self.store.lock();
        let handles: Vec<(u16, u16)> = store
            .attributes_in(range.start, range.end)
            .filter(|attribute| {
                attribute.uuid() == request.attribute_type
                    && attribute.value() == request.attribute_value.as_slice()
            })
            .take(max_entries)
            .map(|attribute| {
                let handle = attribute.handle();
                (handle, store.service_group_end(handle))
            })
            .collect();
        drop(store);

        if handles.is_empty() {
            return Err(AttError::NoAttributesInRange(range.start));
        }

        Ok(FindByTypeValueResponse { handles }.serialize())
    }

    fn read_by_type(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = ReadByTypeRequest::parse(pdu)?;
        let range = request.range;
        range.validate()?;

        let candidates: Vec<AttributeAccess> = {
            let store = self.store.lock();
            store
                .attributes_in(range.start, range.end)
                .filter(|attribute| attribute.uuid() == request.attribute_type)
                .filter_map(|attribute| store.access(attribute.handle()))
                .collect()
        };

        let mtu = connection.mtu();
        let max_value = (mtu - 4).min(ATT_MAX_LIST_VALUE_LEN);
        let mut data = Vec::new();
        let mut value_len = None;
        let mut size = 2;

        for access in &candidates {
            let mut value = match self.checked_read(conn, access) {
                Ok(value) => value,
                Err(err) if data.is_empty() => return Err(err),
                Err(_) => break,
            };
            value.truncate(max_value);

            if *value_len.get_or_insert(value.len()) != value.len() {
                break;
            }
            let entry_len = 2 + value.len();
            if size + entry_len > mtu {
                break;
            }
            size += entry_len;
            data.push(HandleValue {
                handle: access.handle,
                value,
            });
        }

        let Some(value_len) = value_len.filter(|_| !data.is_empty()) else {
            return Err(AttError::NoAttributesInRange(range.start));
        };

        Ok(ReadByTypeResponse {
            length: (2 + value_len) as u8,
            data,
        }
        .serialize())
    }

    fn read(&self, conn: ConnectionId, connection: &Connection, pdu: &[u8]) -> AttResult<Vec<u8>> {
        let request = ReadRequest::parse(pdu)?;
        let access = self.attribute_access(request.handle)?;

        let mut value = self.checked_read(conn, &access)?;
        value.truncate(connection.mtu() - 1);

        Ok(ReadResponse { value }.serialize())
    }

    fn read_blob(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = ReadBlobRequest::parse(pdu)?;
        let access = self.attribute_access(request.handle)?;

        let value = self.checked_read(conn, &access)?;
        let offset = usize::from(request.offset);
        if offset > value.len() {
            return Err(AttError::InvalidOffset {
                handle: request.handle,
                offset: request.offset,
            });
        }

        let end = value.len().min(offset + connection.mtu() - 1);
        Ok(ReadBlobResponse {
            value: value[offset..end].to_vec(),
        }
        .serialize())
    }

    fn read_multiple(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = ReadMultipleRequest::parse(pdu)?;

        let mut values = Vec::new();
        for &handle in &request.handles {
            let access = self.attribute_access(handle)?;
            values.extend(self.checked_read(conn, &access)?);
        }
        values.truncate(connection.mtu() - 1);

        Ok(ReadMultipleResponse { values }.serialize())
    }

    fn read_by_group_type(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = ReadByGroupTypeRequest::parse(pdu)?;
        let range = request.range;
        range.validate()?;

        if request.group_type != PRIMARY_SERVICE_UUID
            && request.group_type != SECONDARY_SERVICE_UUID
        {
            return Err(AttError::UnsupportedGroupType(range.start));
        }

        let candidates: Vec<(AttributeAccess, u16)> = {
            let store = self.store.lock();
            store
                .attributes_in(range.start, range.end)
                .filter(|attribute| attribute.uuid() == request.group_type)
                .filter_map(|attribute| {
                    let handle = attribute.handle();
                    store
                        .access(handle)
                        .map(|access| (access, store.service_group_end(handle)))
                })
                .collect()
        };

        let mtu = connection.mtu();
        let max_value = (mtu - 6).min(ATT_MAX_LIST_VALUE_LEN - 2);
        let mut data = Vec::new();
        let mut value_len = None;
        let mut size = 2;

        for (access, end_group_handle) in &candidates {
            let mut value = match self.checked_read(conn, access) {
                Ok(value) => value,
                Err(err) if data.is_empty() => return Err(err),
                Err(_) => break,
            };
            value.truncate(max_value);

            if *value_len.get_or_insert(value.len()) != value.len() {
                break;
            }
            let entry_len = 4 + value.len();
            if size + entry_len > mtu {
                break;
            }
            size += entry_len;
            data.push(GroupData {
                handle: access.handle,
                end_group_handle: *end_group_handle,
                value,
            });
        }

        let Some(value_len) = value_len.filter(|_| !data.is_empty()) else {
            return Err(AttError::NoAttributesInRange(range.start));
        };

        Ok(ReadByGroupTypeResponse {
            length: (4 + value_len) as u8,
            data,
        }
        .serialize())
    }

    fn write_request(&self, conn: ConnectionId, pdu: &[u8]) -> AttResult<Vec<u8>> {
        let request = WriteRequest::parse(pdu)?;
        self.apply_write(conn, request.handle, &request.value, WriteKind::Request)?;
        Ok(WriteResponse.serialize())
    }

    fn write_command(&self, conn: ConnectionId, pdu: &[u8]) -> AttResult<()> {
        let command = WriteCommand::parse(pdu)?;
        self.apply_write(conn, command.handle, &command.value, WriteKind::Command)
    }

    fn signed_write_command(&self, conn: ConnectionId, pdu: &[u8]) -> AttResult<()> {
        let command = SignedWriteCommand::parse(pdu)?;
        let access = self.attribute_access(command.handle)?;

        if !access.permissions.permits(Access::Write)
            || !access.settings.contains(AttributeSettings::ALLOW_SIGNED)
        {
            return Err(AttError::WriteNotPermitted(command.handle));
        }

        let handler = read(&self.signed_writes).clone();
        handler(conn, &command);
        Ok(())
    }

    fn prepare_write(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = PrepareWriteRequest::parse(pdu)?;
        let access = self.attribute_access(request.handle)?;
        self.authorize(conn, &access, Access::Write)?;

        let offset_allowed = access
            .settings
            .intersects(AttributeSettings::ALLOW_OFFSET | AttributeSettings::WRITE_CALLBACK);
        if request.offset != 0 && !offset_allowed {
            return Err(AttError::AttributeNotLong(request.handle));
        }

        lock(&connection.prepared).prepare(request.handle, request.offset, &request.value)?;

        Ok(PrepareWriteResponse::from(request).serialize())
    }

    fn execute_write(
        &self,
        conn: ConnectionId,
        connection: &Connection,
        pdu: &[u8],
    ) -> AttResult<Vec<u8>> {
        let request = ExecuteWriteRequest::parse(pdu)?;

        if !request.commit {
            let mut queue = lock(&connection.prepared);
            debug!("(ATT) {} cancelled {} prepared writes", conn, queue.len());
            queue.cancel();
            return Ok(ExecuteWriteResponse.serialize());
        }

        let writes = lock(&connection.prepared).take();

        for prepared in &writes {
            let access = self.attribute_access(prepared.handle)?;
            match access.writer() {
                Some(writer) => {
                    let event = WriteEvent {
                        handle: prepared.handle,
                        kind: WriteKind::Execute,
                        offset: prepared.offset,
                        value: &prepared.value,
                    };
                    writer(conn, &event).map_err(|code| AttError::Application {
                        handle: prepared.handle,
                        code,
                    })?;
                }
                None => self
                    .store
                    .write_at(prepared.handle, prepared.offset, &prepared.value)?,
            }
        }

        Ok(ExecuteWriteResponse.serialize())
    }

    fn value_confirmation(&self, conn: ConnectionId, connection: &Connection) {
        if connection.indication_pending.swap(false, Ordering::AcqRel) {
            self.indication_handler().confirmation_received(conn);
        } else {
            debug!("(ATT) {} confirmation without pending indication", conn);
        }
    }

    // Helpers

    fn connection(&self, conn: ConnectionId) -> Option<Arc<Connection>> {
        read(&self.connections).get(&conn).cloned()
    }

    fn indication_handler(&self) -> Arc<dyn IndicationHandler> {
        read(&self.indications).clone()
    }

    fn attribute_access(&self, handle: u16) -> AttResult<AttributeAccess> {
        self.store.lock().access(handle).ok_or(AttError::NotFound(handle))
    }

    /// Permission and authorization check. Runs the authorization callback
    /// with no lock held.
    fn authorize(
        &self,
        conn: ConnectionId,
        access: &AttributeAccess,
        kind: Access,
    ) -> AttResult<()> {
        let handle = access.handle;

        if !access.permissions.permits(kind) {
            return Err(match kind {
                Access::Read => AttError::ReadNotPermitted(handle),
                Access::Write => AttError::WriteNotPermitted(handle),
            });
        }

        if access.permissions.requires_authorization(kind) {
            let callback = read(&self.authorization).clone();
            if let Some(callback) = callback {
                callback(conn, kind, handle)
                    .map_err(|code| AttError::Unauthorized { handle, code })?;
            }
        }

        Ok(())
    }

    /// Authorized read of the full value, from the read callback or the store
    fn checked_read(&self, conn: ConnectionId, access: &AttributeAccess) -> AttResult<Vec<u8>> {
        self.authorize(conn, access, Access::Read)?;

        match access.reader() {
            Some(reader) => reader(conn, access.handle).map_err(|code| AttError::Application {
                handle: access.handle,
                code,
            }),
            None => Ok(self.store.get_value(access.handle)?.to_vec()),
        }
    }

    /// Write Request and Write Command path
    fn apply_write(
        &self,
        conn: ConnectionId,
        handle: u16,
        value: &[u8],
        kind: WriteKind,
    ) -> AttResult<()> {
        let access = self.attribute_access(handle)?;
        self.authorize(conn, &access, Access::Write)?;

        let variable = access.settings.contains(AttributeSettings::VARIABLE_LENGTH);
        let max = usize::from(access.max_length);
        if value.len() > max || (!variable && value.len() != max) {
            return Err(AttError::LengthExceeded {
                handle,
                len: value.len(),
                max: access.max_length,
            });
        }

        match access.writer() {
            Some(writer) => {
                let event = WriteEvent {
                    handle,
                    kind,
                    offset: 0,
                    value,
                };
                writer(conn, &event).map_err(|code| AttError::Application { handle, code })
            }
            None => self.store.set_value(handle, value),
        }
    }

    fn send(&self, conn: ConnectionId, pdu: &[u8]) -> Result<(), ServerError> {
        trace!("(ATT) {} tx {}", conn, hex::encode(pdu));

        self.transport.send_pdu(conn, pdu).map_err(|err| {
            warn!("(ATT) {} send failed: {}", conn, err);
            ServerError::Transport(err)
        })
    }
}
