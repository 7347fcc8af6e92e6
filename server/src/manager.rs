use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use log::{info, warn};
use serde_json::{json, Map, Value};

use vantage_shared::{
    read_actions, write_delete, write_diff, write_event, write_full, write_initial_list,
    write_schema, write_terminate, AssignmentOp, Body, CollectionKind, Envelope, MessageError,
    MessageId, Packet, PacketPool, PacketWriter, RecordError, Reply, ReplyResult, Responder,
    ResponseCallback, SchemaRegistry,
};

use crate::actions::{ActionCall, ActionError, ActionRegistry};
use crate::area::{AreaRecord, LoadedArea};
use crate::client::Client;
use crate::config::ReplicationConfig;
use crate::entity::Entity;
use crate::error::ReplicationError;
use crate::events::ReplicationEvent;
use crate::hooks::WorldHooks;
use crate::store::StoreRequest;
use crate::types::{AreaId, ClientKey, EntityId};

/// Delete reason for an entity that left the client's visible areas.
const REASON_LEFT_AREA: &str = "newva";
/// Delete reason for an entity that no longer exists anywhere.
const REASON_DESTROYED: &str = "destroyed";
/// Delete reason for a player entity whose client disconnected.
const REASON_LOGOUT: &str = "logout";

/// The server-side replication engine.
///
/// Single-threaded and poll-driven: the host feeds it inbound packets and
/// store completions, calls [`tick`](Self::tick) at its own cadence, then
/// drains outgoing packets, store requests and application events.
pub struct ReplicationManager {
    config: ReplicationConfig,
    registry: SchemaRegistry,
    actions: ActionRegistry,
    hooks: Box<dyn WorldHooks>,
    pool: PacketPool,

    next_entity_id: EntityId,
    next_client_key: u64,
    entities: HashMap<EntityId, Entity>,
    areas: HashMap<AreaId, AreaRecord>,
    clients: HashMap<ClientKey, Client>,

    /// Entities with unreplicated changes, in mutation order.
    dirty_queue: VecDeque<EntityId>,
    queued: HashSet<EntityId>,

    store_requests: Vec<StoreRequest>,
    /// Player load in flight, keyed by persistence key.
    player_loads: HashMap<String, ClientKey>,
    /// Player save in flight, keyed by persistence key.
    player_saves: HashSet<String>,
    /// A snapshot taken at disconnect while an earlier save was still in
    /// flight; issued once that save settles.
    deferred_player_saves: HashMap<String, Value>,

    /// Delete reasons for entities that no longer exist, kept until every
    /// client that knew them has been told.
    destroyed_reasons: HashMap<EntityId, String>,
    /// Events queued for broadcast to every subscriber of an area.
    pending_events: Vec<(AreaId, Value)>,

    /// Shared with responder sinks, which push completed responses here.
    outgoing: Rc<RefCell<Vec<(ClientKey, Packet)>>>,
    events: Vec<ReplicationEvent>,
    message_names: HashSet<String>,
    last_save_sweep: Instant,
}

impl ReplicationManager {
    pub fn new(
        config: ReplicationConfig,
        registry: SchemaRegistry,
        actions: ActionRegistry,
        hooks: Box<dyn WorldHooks>,
    ) -> Self {
        Self {
            config,
            registry,
            actions,
            hooks,
            pool: PacketPool::new(),
            next_entity_id: 1,
            next_client_key: 1,
            entities: HashMap::new(),
            areas: HashMap::new(),
            clients: HashMap::new(),
            dirty_queue: VecDeque::new(),
            queued: HashSet::new(),
            store_requests: Vec::new(),
            player_loads: HashMap::new(),
            player_saves: HashSet::new(),
            deferred_player_saves: HashMap::new(),
            destroyed_reasons: HashMap::new(),
            pending_events: Vec::new(),
            outgoing: Rc::new(RefCell::new(Vec::new())),
            events: Vec::new(),
            message_names: HashSet::new(),
            last_save_sweep: Instant::now(),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Declares an application message name; inbound envelopes with this
    /// name surface as [`ReplicationEvent::Message`].
    pub fn register_message(&mut self, name: impl Into<String>) {
        self.message_names.insert(name.into());
    }

    // ---------- entities ----------

    /// Creates a server-owned entity from initial data. The entity is placed
    /// in whatever visible area its data maps to and replicates from the next
    /// tick on.
    pub fn create_entity(&mut self, data: Map<String, Value>) -> EntityId {
        let area = self.hooks.area_of(&data);
        let id = self.alloc_entity_id();
        let mut entity = Entity::new(id, data, area, false);
        entity.need_save = true;
        self.entities.insert(id, entity);
        self.place_entity(id, area);
        self.mark_area_dirty(area);
        self.enqueue_dirty(id);
        id
    }

    /// Removes an entity. Clients that knew it receive a delete record with
    /// the given reason on the next tick.
    pub fn destroy_entity(
        &mut self,
        id: EntityId,
        reason: impl Into<String>,
    ) -> Result<(), ReplicationError> {
        let entity = self
            .entities
            .remove(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        self.remove_resident(entity.current_area, id);
        if !entity.is_player {
            self.mark_area_dirty(entity.current_area);
        }
        self.destroyed_reasons.insert(id, reason.into());
        self.queued.remove(&id);
        Ok(())
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Overrides the reason clients are given when this entity later drops
    /// out of their view.
    pub fn set_delete_reason(
        &mut self,
        id: EntityId,
        reason: impl Into<String>,
    ) -> Result<(), ReplicationError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        entity.delete_reason = Some(reason.into());
        Ok(())
    }

    /// Reads a field, falling back to the schema default when the entity does
    /// not carry it.
    pub fn field(&self, id: EntityId, name: &str) -> Result<Value, ReplicationError> {
        let entity = self
            .entities
            .get(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        self.registry.require(name)?;
        Ok(entity.field(&self.registry, name))
    }

    pub fn set_field(
        &mut self,
        id: EntityId,
        name: &str,
        value: Value,
    ) -> Result<(), ReplicationError> {
        let collection = self.registry.require(name)?.collection;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        if value.is_null() {
            entity.reset_field(collection, name);
        } else {
            entity.set_field(collection, name, value);
        }
        self.enqueue_dirty(id);
        Ok(())
    }

    /// Clears a field back to its schema default.
    pub fn reset_field(&mut self, id: EntityId, name: &str) -> Result<(), ReplicationError> {
        self.set_field(id, name, Value::Null)
    }

    pub fn set_index(
        &mut self,
        id: EntityId,
        name: &str,
        index: u64,
        value: Value,
    ) -> Result<(), ReplicationError> {
        self.require_collection(name, CollectionKind::Array)?;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        entity.set_index(name, index, value);
        self.enqueue_dirty(id);
        Ok(())
    }

    pub fn set_length(
        &mut self,
        id: EntityId,
        name: &str,
        len: u64,
    ) -> Result<(), ReplicationError> {
        self.require_collection(name, CollectionKind::Array)?;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        entity.set_length(name, len);
        self.enqueue_dirty(id);
        Ok(())
    }

    pub fn set_key(
        &mut self,
        id: EntityId,
        name: &str,
        key: &str,
        value: Value,
    ) -> Result<(), ReplicationError> {
        self.require_collection(name, CollectionKind::Record)?;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        entity.set_key(name, key, value);
        self.enqueue_dirty(id);
        Ok(())
    }

    pub fn remove_key(
        &mut self,
        id: EntityId,
        name: &str,
        key: &str,
    ) -> Result<(), ReplicationError> {
        self.require_collection(name, CollectionKind::Record)?;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        entity.remove_key(name, key);
        self.enqueue_dirty(id);
        Ok(())
    }

    fn require_collection(
        &self,
        name: &str,
        expected: CollectionKind,
    ) -> Result<(), ReplicationError> {
        let field = self.registry.require(name)?;
        if field.collection != expected {
            return Err(RecordError::CollectionMismatch {
                field: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn alloc_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    fn enqueue_dirty(&mut self, id: EntityId) {
        if self.queued.insert(id) {
            self.dirty_queue.push_back(id);
        }
    }

    /// Adds an entity to its area's resident set, requesting a load first if
    /// the area is not in memory. Entities that arrive while the load is in
    /// flight ride along as movers and merge in on completion.
    fn place_entity(&mut self, id: EntityId, area: AreaId) {
        match self.areas.get_mut(&area) {
            Some(AreaRecord::Loaded(loaded)) => {
                loaded.residents.insert(id);
            }
            Some(AreaRecord::Loading { movers, .. }) => {
                movers.insert(id);
            }
            None => {
                let mut movers = HashSet::new();
                movers.insert(id);
                self.areas.insert(
                    area,
                    AreaRecord::Loading {
                        waiters: Vec::new(),
                        movers,
                        save_deferred: false,
                    },
                );
                self.store_requests.push(StoreRequest::LoadArea { area });
            }
        }
    }

    fn remove_resident(&mut self, area: AreaId, id: EntityId) {
        match self.areas.get_mut(&area) {
            Some(AreaRecord::Loaded(loaded)) => {
                loaded.residents.remove(&id);
            }
            Some(AreaRecord::Loading { movers, .. }) => {
                movers.remove(&id);
            }
            None => {}
        }
    }

    fn mark_area_dirty(&mut self, area: AreaId) {
        match self.areas.get_mut(&area) {
            Some(AreaRecord::Loaded(loaded)) => loaded.need_save = true,
            Some(AreaRecord::Loading { save_deferred, .. }) => *save_deferred = true,
            None => {}
        }
    }

    // ---------- clients ----------

    /// Registers a new connection and returns its key.
    pub fn client_connect(&mut self) -> ClientKey {
        let key = ClientKey::new(self.next_client_key);
        self.next_client_key += 1;
        self.clients.insert(key, Client::new());
        key
    }

    /// Starts the join flow: loads the player's persisted entity (or mints a
    /// fresh one when the store has none) and emits
    /// [`ReplicationEvent::ClientReady`] when it is live.
    pub fn client_join(
        &mut self,
        key: ClientKey,
        player_key: impl Into<String>,
    ) -> Result<(), ReplicationError> {
        let player_key = player_key.into();
        let client = self
            .clients
            .get_mut(&key)
            .ok_or(ReplicationError::UnknownClient(key))?;
        if client.loading {
            return Err(ReplicationError::JoinInFlight(key));
        }
        client.loading = true;
        client.player_key = Some(player_key.clone());
        self.player_loads.insert(player_key.clone(), key);
        self.store_requests
            .push(StoreRequest::LoadPlayer { player_key });
        Ok(())
    }

    /// Replaces the set of visible areas the client wants to observe. New
    /// areas are loaded on demand; entities in dropped areas are deleted from
    /// the client's view on the next tick.
    pub fn client_set_areas(
        &mut self,
        key: ClientKey,
        areas: Vec<AreaId>,
    ) -> Result<(), ReplicationError> {
        let now = Instant::now();
        let client = self
            .clients
            .get(&key)
            .ok_or(ReplicationError::UnknownClient(key))?;
        let previous = client.needed.clone();

        for area in &previous {
            if !areas.contains(area) {
                if let Some(AreaRecord::Loaded(loaded)) = self.areas.get_mut(area) {
                    loaded.subscribers = loaded.subscribers.saturating_sub(1);
                    loaded.last_needed = now;
                }
            }
        }
        for area in &areas {
            if previous.contains(area) {
                continue;
            }
            match self.areas.get_mut(area) {
                Some(AreaRecord::Loaded(loaded)) => {
                    loaded.subscribers += 1;
                    loaded.last_needed = now;
                }
                Some(AreaRecord::Loading { waiters, .. }) => {
                    waiters.push(key);
                }
                None => {
                    self.areas.insert(
                        *area,
                        AreaRecord::Loading {
                            waiters: vec![key],
                            movers: HashSet::new(),
                            save_deferred: false,
                        },
                    );
                    self.store_requests
                        .push(StoreRequest::LoadArea { area: *area });
                }
            }
        }

        if let Some(client) = self.clients.get_mut(&key) {
            client.needed = areas;
        }
        Ok(())
    }

    /// Tears the client down. Pending response callbacks fail immediately
    /// with [`MessageError::Disconnected`]; if a player load is still in
    /// flight the rest of the teardown waits for it to settle.
    pub fn client_disconnect(&mut self, key: ClientKey) -> Result<(), ReplicationError> {
        let client = self
            .clients
            .get_mut(&key)
            .ok_or(ReplicationError::UnknownClient(key))?;
        client.pending.fail_all(MessageError::Disconnected);
        if client.loading {
            client.disconnected = true;
            return Ok(());
        }
        self.teardown_client(key);
        Ok(())
    }

    fn teardown_client(&mut self, key: ClientKey) {
        let Some(client) = self.clients.remove(&key) else {
            return;
        };
        let now = Instant::now();
        for area in &client.needed {
            if let Some(AreaRecord::Loaded(loaded)) = self.areas.get_mut(area) {
                loaded.subscribers = loaded.subscribers.saturating_sub(1);
                loaded.last_needed = now;
            }
        }
        if client.entity != 0 {
            if let Some(entity) = self.entities.remove(&client.entity) {
                self.remove_resident(entity.current_area, client.entity);
                self.queued.remove(&client.entity);
                self.destroyed_reasons
                    .insert(client.entity, REASON_LOGOUT.to_string());
                if let Some(player_key) = &client.player_key {
                    let snapshot = entity.serialize(&self.registry);
                    if self.player_saves.contains(player_key) {
                        self.deferred_player_saves
                            .insert(player_key.clone(), snapshot);
                    } else {
                        self.player_saves.insert(player_key.clone());
                        self.store_requests.push(StoreRequest::SavePlayer {
                            player_key: player_key.clone(),
                            entity: snapshot,
                        });
                    }
                }
            }
        }
    }

    // ---------- store completions ----------

    /// Delivers the result of a [`StoreRequest::LoadArea`].
    pub fn complete_area_load(
        &mut self,
        area: AreaId,
        result: Result<Vec<Value>, String>,
    ) -> Result<(), ReplicationError> {
        let (waiters, movers, save_deferred) = match self.areas.remove(&area) {
            Some(AreaRecord::Loading {
                waiters,
                movers,
                save_deferred,
            }) => (waiters, movers, save_deferred),
            Some(record) => {
                self.areas.insert(area, record);
                return Err(ReplicationError::NoAreaLoadInFlight(area));
            }
            None => return Err(ReplicationError::NoAreaLoadInFlight(area)),
        };

        let stored = match result {
            Ok(stored) => stored,
            Err(error) => {
                warn!("visible area {area} failed to load: {error}");
                // entities already bound for this area must not be stranded;
                // keep the record loading and ask the store again
                if !movers.is_empty() {
                    self.areas.insert(
                        area,
                        AreaRecord::Loading {
                            waiters: Vec::new(),
                            movers,
                            save_deferred,
                        },
                    );
                    self.store_requests.push(StoreRequest::LoadArea { area });
                }
                self.events.push(ReplicationEvent::AreaLoadFailed {
                    area,
                    error,
                    waiters,
                });
                return Ok(());
            }
        };

        let now = Instant::now();
        let mut loaded = LoadedArea::new(now);
        loaded.residents = movers;
        loaded.need_save = save_deferred;

        let first_load = stored.is_empty();
        let data_sets: Vec<Map<String, Value>> = if first_load {
            self.hooks.populate_area(area)
        } else {
            stored
                .into_iter()
                .filter_map(|value| match value {
                    Value::Object(map) => Some(map),
                    other => {
                        warn!("discarding malformed stored entity in area {area}: {other}");
                        None
                    }
                })
                .collect()
        };
        if first_load && !data_sets.is_empty() {
            loaded.need_save = true;
        }

        let mut arrivals = Vec::new();
        for mut data in data_sets {
            self.hooks.post_load(&mut data);
            let id = self.alloc_entity_id();
            let home = self.hooks.area_of(&data);
            self.entities.insert(id, Entity::new(id, data, home, false));
            if home == area {
                loaded.residents.insert(id);
            } else {
                // stored under this area but mapping elsewhere now
                arrivals.push((id, home));
            }
        }

        // subscriber count is recomputed from scratch rather than replayed
        // from the waiter list, so duplicate waiters cannot skew it
        loaded.subscribers = self
            .clients
            .values()
            .filter(|c| c.needed.contains(&area))
            .count() as u32;

        self.areas.insert(area, AreaRecord::Loaded(loaded));
        for (id, home) in arrivals {
            self.place_entity(id, home);
        }
        info!("visible area {area} loaded");
        Ok(())
    }

    /// Delivers the result of a [`StoreRequest::SaveArea`].
    pub fn complete_area_save(
        &mut self,
        area: AreaId,
        result: Result<(), String>,
    ) -> Result<(), ReplicationError> {
        match self.areas.get_mut(&area) {
            Some(AreaRecord::Loaded(loaded)) if loaded.save_inflight => {
                loaded.save_inflight = false;
                if let Err(error) = result {
                    warn!("visible area {area} failed to save: {error}");
                    loaded.need_save = true;
                }
                Ok(())
            }
            _ => Err(ReplicationError::NoSaveInFlight(area.to_string())),
        }
    }

    /// Delivers the result of a [`StoreRequest::LoadPlayer`]. `Ok(None)`
    /// means the store has never seen this player.
    pub fn complete_player_load(
        &mut self,
        player_key: &str,
        result: Result<Option<Value>, String>,
    ) -> Result<(), ReplicationError> {
        let key = self
            .player_loads
            .remove(player_key)
            .ok_or_else(|| ReplicationError::NoPlayerLoadInFlight(player_key.to_string()))?;
        let Some(client) = self.clients.get_mut(&key) else {
            return Ok(());
        };
        client.loading = false;

        if client.disconnected {
            // nothing was mutated, so there is nothing to write back
            self.teardown_client(key);
            return Ok(());
        }

        let stored = match result {
            Ok(stored) => stored,
            Err(error) => {
                warn!("player '{player_key}' failed to load: {error}");
                client.player_key = None;
                self.events
                    .push(ReplicationEvent::ClientJoinFailed { client: key, error });
                return Ok(());
            }
        };

        let mut data = match stored {
            Some(Value::Object(map)) => map,
            Some(other) => {
                warn!("discarding malformed stored player '{player_key}': {other}");
                self.hooks.new_player(player_key)
            }
            None => self.hooks.new_player(player_key),
        };
        self.hooks.post_load(&mut data);

        let area = self.hooks.area_of(&data);
        let id = self.alloc_entity_id();
        self.entities.insert(id, Entity::new(id, data, area, true));
        self.place_entity(id, area);
        if let Some(client) = self.clients.get_mut(&key) {
            client.entity = id;
        }
        self.enqueue_dirty(id);
        self.events
            .push(ReplicationEvent::ClientReady { client: key, entity: id });
        Ok(())
    }

    /// Delivers the result of a [`StoreRequest::SavePlayer`].
    pub fn complete_player_save(
        &mut self,
        player_key: &str,
        result: Result<(), String>,
    ) -> Result<(), ReplicationError> {
        if !self.player_saves.remove(player_key) {
            return Err(ReplicationError::NoSaveInFlight(player_key.to_string()));
        }
        if let Err(error) = result {
            warn!("player '{player_key}' failed to save: {error}");
            if let Some(client) = self
                .clients
                .values()
                .find(|c| c.player_key.as_deref() == Some(player_key))
            {
                if let Some(entity) = self.entities.get_mut(&client.entity) {
                    entity.need_save = true;
                }
            }
        }
        if let Some(snapshot) = self.deferred_player_saves.remove(player_key) {
            self.player_saves.insert(player_key.to_string());
            self.store_requests.push(StoreRequest::SavePlayer {
                player_key: player_key.to_string(),
                entity: snapshot,
            });
        }
        Ok(())
    }

    // ---------- messaging ----------

    /// Decodes and dispatches one inbound packet from a client.
    pub fn handle_message(
        &mut self,
        key: ClientKey,
        bytes: &[u8],
    ) -> Result<(), ReplicationError> {
        if !self.clients.contains_key(&key) {
            return Err(ReplicationError::UnknownClient(key));
        }
        let packet = Packet::from_bytes(&self.pool, bytes).map_err(MessageError::from)?;
        let envelope = Envelope::read(&packet, &self.pool)?;

        match envelope.id {
            MessageId::ResponseTo(id) => {
                let reply: ReplyResult = match envelope.body {
                    Body::Error(message) => Err(MessageError::Remote(message)),
                    Body::Json(value) => Ok(Reply::Json(value)),
                    Body::Packet(packet) => Ok(Reply::Packet(packet)),
                };
                if let Some(client) = self.clients.get_mut(&key) {
                    client.pending.settle(id, reply)?;
                }
                Ok(())
            }
            MessageId::Name(name) => self.dispatch_named(key, name, envelope.correlation, envelope.body),
        }
    }

    fn dispatch_named(
        &mut self,
        key: ClientKey,
        name: String,
        correlation: u32,
        body: Body,
    ) -> Result<(), ReplicationError> {
        let responder = if correlation != 0 {
            Some(self.make_responder(key, correlation, &name))
        } else {
            None
        };

        match name.as_str() {
            "action" => {
                let Body::Packet(payload) = body else {
                    if let Some(responder) = responder {
                        responder.respond_err("action payload must be a packet");
                    }
                    return Ok(());
                };
                let mut reader = payload.reader();
                let requests = match read_actions(&mut reader, &self.registry) {
                    Ok(requests) => requests,
                    Err(error) => {
                        warn!("client {key:?} sent an undecodable action batch: {error}");
                        if let Some(responder) = responder {
                            responder.respond_err(error.to_string());
                        }
                        return Ok(());
                    }
                };
                let mut results = Vec::with_capacity(requests.len());
                for request in &requests {
                    match self.run_action(key, request) {
                        Ok(()) => results.push(json!({ "ok": true })),
                        Err(error) => {
                            results.push(json!({ "error": error.code() }));
                        }
                    }
                }
                if let Some(responder) = responder {
                    responder.respond(Value::Array(results));
                }
                Ok(())
            }
            "event" => {
                let Body::Json(payload) = body else {
                    if let Some(responder) = responder {
                        responder.respond_err("event payload must be json");
                    }
                    return Ok(());
                };
                let entity = self.clients.get(&key).map(|c| c.entity).unwrap_or(0);
                match self.entities.get(&entity) {
                    Some(entity) => {
                        self.pending_events.push((entity.current_area, payload));
                        if let Some(responder) = responder {
                            responder.respond(Value::Null);
                        }
                    }
                    None => {
                        warn!("client {key:?} sent an event before joining");
                        if let Some(responder) = responder {
                            responder.respond_err("no entity");
                        }
                    }
                }
                Ok(())
            }
            _ if self.message_names.contains(&name) => {
                let payload = match body {
                    Body::Json(value) => value,
                    Body::Error(message) => {
                        warn!("client {key:?} sent an error body for '{name}': {message}");
                        return Ok(());
                    }
                    Body::Packet(_) => {
                        if let Some(responder) = responder {
                            responder.respond_err("unexpected packet payload");
                        }
                        return Ok(());
                    }
                };
                self.events.push(ReplicationEvent::Message {
                    client: key,
                    name,
                    payload,
                    responder,
                });
                Ok(())
            }
            _ => {
                warn!("client {key:?} sent unknown message '{name}'");
                if let Some(responder) = responder {
                    responder.respond_err("unknown message");
                }
                Ok(())
            }
        }
    }

    fn make_responder(&self, key: ClientKey, correlation: u32, name: &str) -> Responder {
        let outgoing = Rc::clone(&self.outgoing);
        Responder::new(
            correlation,
            name,
            &self.pool,
            self.config.debug_wire,
            Box::new(move |packet| {
                outgoing.borrow_mut().push((key, packet));
            }),
        )
    }

    /// Sends a named request expecting a response; the callback fires exactly
    /// once, with the reply or with the disconnect error.
    pub fn send_request(
        &mut self,
        key: ClientKey,
        name: impl Into<String>,
        payload: Value,
        callback: ResponseCallback,
    ) -> Result<(), ReplicationError> {
        let name = name.into();
        let client = self
            .clients
            .get_mut(&key)
            .ok_or(ReplicationError::UnknownClient(key))?;
        let correlation = client
            .pending
            .register(name.clone(), Instant::now(), callback);
        let packet = Envelope::request(name, correlation, Body::Json(payload))
            .write(&self.pool, self.config.debug_wire);
        self.outgoing.borrow_mut().push((key, packet));
        Ok(())
    }

    /// Sends a named one-way message.
    pub fn send_push(
        &mut self,
        key: ClientKey,
        name: impl Into<String>,
        payload: Value,
    ) -> Result<(), ReplicationError> {
        if !self.clients.contains_key(&key) {
            return Err(ReplicationError::UnknownClient(key));
        }
        let packet =
            Envelope::push(name, Body::Json(payload)).write(&self.pool, self.config.debug_wire);
        self.outgoing.borrow_mut().push((key, packet));
        Ok(())
    }

    /// Queues an event for every subscriber of an area; delivered inside the
    /// next tick's update packet.
    pub fn broadcast_event(&mut self, area: AreaId, event: Value) {
        self.pending_events.push((area, event));
    }

    // ---------- actions ----------

    fn run_action(
        &mut self,
        key: ClientKey,
        request: &vantage_shared::ActionRequest,
    ) -> Result<(), ActionError> {
        let def = self
            .actions
            .get(&request.action_id)
            .ok_or_else(|| ActionError::UnknownAction(request.action_id.clone()))?;

        let caller = self.clients.get(&key).map(|c| c.entity).unwrap_or(0);
        let target = request.target.unwrap_or(caller);
        if def.is_self_only() && target != caller {
            return Err(ActionError::SelfOnly);
        }
        if target == 0 || !self.entities.contains_key(&target) {
            return Err(ActionError::NoEntity);
        }

        let assignments: Vec<(String, Value)> = request
            .assignments
            .iter()
            .map(|op| match op {
                AssignmentOp::Set(name, value) => (name.clone(), value.clone()),
                AssignmentOp::ResetDefault(name) => (name.clone(), Value::Null),
            })
            .collect();

        let applied = {
            let entity = &self.entities[&target];
            self.actions.execute(
                &self.registry,
                ActionCall {
                    client: key,
                    action_id: &request.action_id,
                    caller_entity: caller,
                    target_entity: target,
                    predicate: request.predicate.as_ref(),
                    payload: request.payload.as_ref(),
                    data: entity.data(),
                    assignments,
                },
            )?
        };

        for (name, value) in applied {
            if let Err(error) = self.set_field(target, &name, value) {
                warn!("action '{}' assignment to '{name}' dropped: {error}", request.action_id);
            }
        }
        Ok(())
    }

    // ---------- tick ----------

    /// One replication step: drains dirty entities into per-area diff
    /// fragments, assembles one update packet per client, then runs the
    /// periodic maintenance (overdue warnings, idle unloads, save sweeps).
    pub fn tick(&mut self, now: Instant) {
        let fragments = self.drain_dirty();
        self.assemble_updates(&fragments);
        self.pending_events.clear();
        self.prune_destroyed_reasons();
        self.maintenance(now);
    }

    /// Processes up to `max_dirty_per_tick` dirty entities. Returns the
    /// encoded diff bytes per area; entities that changed area skip the diff
    /// and are re-announced via full snapshots instead.
    fn drain_dirty(&mut self) -> HashMap<AreaId, Vec<u8>> {
        let mut writers: HashMap<AreaId, PacketWriter> = HashMap::new();
        let budget = self.config.max_dirty_per_tick.min(self.dirty_queue.len());

        for _ in 0..budget {
            let Some(id) = self.dirty_queue.pop_front() else {
                break;
            };
            self.queued.remove(&id);
            // cleared up front so an encode error cannot wedge the entity
            let (dirty, subs) = match self.entities.get_mut(&id) {
                Some(entity) => entity.take_dirty(),
                None => continue,
            };
            let (old_area, new_area, is_player) = match self.entities.get(&id) {
                Some(entity) => (
                    entity.current_area,
                    self.hooks.area_of(&entity.data),
                    entity.is_player,
                ),
                None => continue,
            };

            if new_area != old_area {
                if let Some(entity) = self.entities.get_mut(&id) {
                    entity.current_area = new_area;
                }
                self.remove_resident(old_area, id);
                self.place_entity(id, new_area);
                if !is_player {
                    self.mark_area_dirty(old_area);
                    self.mark_area_dirty(new_area);
                }
                // clients watching the new area (and the owner) must see a
                // fresh full snapshot; everyone else keeps the entity in
                // their known set so the delete scan can tell them it left
                for client in self.clients.values_mut() {
                    if client.entity == id || client.subscribed_to(new_area) {
                        client.known.remove(&id);
                    }
                }
                continue;
            }

            if !is_player {
                self.mark_area_dirty(old_area);
            }
            // a diff nobody can apply is pure waste: clients that have never
            // seen the entity get a full snapshot instead
            if !self.clients.values().any(|c| c.known.contains(&id)) {
                continue;
            }
            let changes = match self.entities.get(&id) {
                Some(entity) => entity.build_changes(&self.registry, &dirty, &subs),
                None => continue,
            };
            if changes.is_empty() {
                continue;
            }
            let writer = writers
                .entry(old_area)
                .or_insert_with(|| PacketWriter::new_with_mode(&self.pool, self.config.debug_wire));
            if let Err(error) = write_diff(writer, &self.registry, id, &changes) {
                warn!("diff for entity {id} dropped: {error}");
            }
        }

        writers
            .into_iter()
            .map(|(area, writer)| (area, writer.finish_body()))
            .collect()
    }

    /// Builds one update packet per client: deletes for entities gone from
    /// view, full snapshots for new arrivals, the shared per-area diff
    /// fragments, and any broadcast events.
    fn assemble_updates(&mut self, fragments: &HashMap<AreaId, Vec<u8>>) {
        let mut keys: Vec<ClientKey> = self.clients.keys().copied().collect();
        keys.sort();

        for key in keys {
            let client = &self.clients[&key];
            if client.loading || client.disconnected {
                continue;
            }

            // deletes: entities the client knows that are gone or out of view
            let mut deletes: Vec<(EntityId, String)> = Vec::new();
            for id in &client.known {
                match self.entities.get(id) {
                    None => {
                        let reason = self
                            .destroyed_reasons
                            .get(id)
                            .cloned()
                            .unwrap_or_else(|| REASON_DESTROYED.to_string());
                        deletes.push((*id, reason));
                    }
                    Some(entity) => {
                        // the client's own entity is never deleted from view
                        if *id != client.entity && !client.subscribed_to(entity.current_area) {
                            let reason = entity
                                .delete_reason
                                .clone()
                                .unwrap_or_else(|| REASON_LEFT_AREA.to_string());
                            deletes.push((*id, reason));
                        }
                    }
                }
            }
            deletes.sort();

            // fulls: residents of needed loaded areas the client has not seen
            let mut fulls: Vec<EntityId> = Vec::new();
            for area in &client.needed {
                if let Some(AreaRecord::Loaded(loaded)) = self.areas.get(area) {
                    for id in &loaded.residents {
                        if !client.known.contains(id) {
                            fulls.push(*id);
                        }
                    }
                }
            }
            if client.entity != 0
                && !client.known.contains(&client.entity)
                && self.entities.contains_key(&client.entity)
                && !fulls.contains(&client.entity)
            {
                fulls.push(client.entity);
            }
            fulls.sort();
            fulls.dedup();

            // a view starting from nothing is flagged so the client replaces
            // its world wholesale instead of merging
            let initial = client.known.is_empty();

            // diffs target entities the client already knows; an initial
            // packet has none, its residents arrive as fulls instead
            let mut area_bytes: Vec<&[u8]> = Vec::new();
            if !initial {
                for area in &client.needed {
                    if let Some(bytes) = fragments.get(area) {
                        area_bytes.push(bytes);
                    }
                }
            }
            let events: Vec<&Value> = self
                .pending_events
                .iter()
                .filter(|(area, _)| client.subscribed_to(*area))
                .map(|(_, event)| event)
                .collect();

            let has_content = !deletes.is_empty()
                || !fulls.is_empty()
                || !area_bytes.is_empty()
                || !events.is_empty()
                || !client.sent_schema;
            if !has_content {
                continue;
            }

            let send_schema = !client.sent_schema;

            let mut writer = PacketWriter::new_with_mode(&self.pool, self.config.debug_wire);
            if initial {
                write_initial_list(&mut writer);
            }
            if send_schema {
                write_schema(&mut writer, &self.registry);
            }
            for (id, reason) in &deletes {
                if let Err(error) = write_delete(&mut writer, *id, reason) {
                    warn!("delete record for entity {id} dropped: {error}");
                }
            }
            for id in &fulls {
                let Some(entity) = self.entities.get(id) else {
                    continue;
                };
                if let Err(error) = write_full(&mut writer, &self.registry, *id, &entity.data) {
                    warn!("full snapshot for entity {id} dropped: {error}");
                }
            }
            for bytes in area_bytes {
                writer.append_raw(bytes);
            }
            for event in events {
                write_event(&mut writer, event);
            }
            write_terminate(&mut writer);
            // one envelope per client so the transport never has to tell
            // update streams and application messages apart
            let packet = Envelope::push("update", Body::Packet(writer.finish()))
                .write(&self.pool, self.config.debug_wire);

            if let Some(client) = self.clients.get_mut(&key) {
                client.sent_schema = true;
                for (id, _) in &deletes {
                    client.known.remove(id);
                }
                for id in &fulls {
                    client.known.insert(*id);
                }
            }
            self.outgoing.borrow_mut().push((key, packet));
        }
    }

    fn prune_destroyed_reasons(&mut self) {
        if self.destroyed_reasons.is_empty() {
            return;
        }
        let mut still_known: HashSet<EntityId> = HashSet::new();
        for client in self.clients.values() {
            for id in &client.known {
                if self.destroyed_reasons.contains_key(id) {
                    still_known.insert(*id);
                }
            }
        }
        self.destroyed_reasons.retain(|id, _| still_known.contains(id));
    }

    fn maintenance(&mut self, now: Instant) {
        for client in self.clients.values_mut() {
            client.pending.check_overdue(now);
        }

        // idle unload: drop loaded areas nobody watches once fully persisted
        let unload: Vec<AreaId> = self
            .areas
            .iter()
            .filter_map(|(area, record)| match record {
                AreaRecord::Loaded(loaded)
                    if loaded.unloadable(now, self.config.area_unload_timeout)
                        && !loaded
                            .residents
                            .iter()
                            .any(|id| self.entities.get(id).is_some_and(|e| e.is_player)) =>
                {
                    Some(*area)
                }
                _ => None,
            })
            .collect();
        for area in unload {
            if let Some(AreaRecord::Loaded(loaded)) = self.areas.remove(&area) {
                for id in loaded.residents {
                    self.entities.remove(&id);
                    self.queued.remove(&id);
                }
                info!("visible area {area} unloaded");
            }
        }

        if now.duration_since(self.last_save_sweep) < self.config.save_interval {
            return;
        }
        self.last_save_sweep = now;

        let mut saves: Vec<(AreaId, Vec<Value>)> = Vec::new();
        for (area, record) in &mut self.areas {
            let AreaRecord::Loaded(loaded) = record else {
                continue;
            };
            if !loaded.need_save || loaded.save_inflight {
                continue;
            }
            let mut snapshots: Vec<(EntityId, Value)> = loaded
                .residents
                .iter()
                .filter_map(|id| self.entities.get(id))
                .filter(|entity| !entity.is_player)
                .map(|entity| (entity.id, entity.serialize(&self.registry)))
                .collect();
            snapshots.sort_by_key(|(id, _)| *id);
            loaded.need_save = false;
            loaded.save_inflight = true;
            saves.push((*area, snapshots.into_iter().map(|(_, v)| v).collect()));
        }
        for (area, entities) in saves {
            self.store_requests
                .push(StoreRequest::SaveArea { area, entities });
        }

        // players persist individually, keyed by their persistence key
        let candidates: Vec<(String, EntityId)> = self
            .clients
            .values()
            .filter_map(|c| c.player_key.clone().map(|k| (k, c.entity)))
            .collect();
        for (player_key, entity_id) in candidates {
            if self.player_saves.contains(&player_key) {
                continue;
            }
            let Some(entity) = self.entities.get_mut(&entity_id) else {
                continue;
            };
            if !entity.need_save {
                continue;
            }
            entity.need_save = false;
            let snapshot = entity.serialize(&self.registry);
            self.player_saves.insert(player_key.clone());
            self.store_requests.push(StoreRequest::SavePlayer {
                player_key,
                entity: snapshot,
            });
        }
    }

    // ---------- draining ----------

    /// Packets queued for the transport since the last drain.
    pub fn take_outgoing(&mut self) -> Vec<(ClientKey, Packet)> {
        std::mem::take(&mut *self.outgoing.borrow_mut())
    }

    /// Persistence work queued since the last drain.
    pub fn take_store_requests(&mut self) -> Vec<StoreRequest> {
        std::mem::take(&mut self.store_requests)
    }

    /// Application events raised since the last drain.
    pub fn take_events(&mut self) -> Vec<ReplicationEvent> {
        std::mem::take(&mut self.events)
    }
}
