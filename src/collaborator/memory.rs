//! In-memory automation client for development and testing.
//!
//! Simulates the platform side (registered numbers, chats, labels, groups) in a
//! [`MemoryWorld`] shared by every handle the [`MemoryClientFactory`] builds,
//! so state survives a session being torn down and recreated the way a real
//! account does. Faults can be injected to exercise the retry and fallback
//! paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::collaborator::{
    AutomationClient, ClientFactory, ClientHandle, CollaboratorError, CollaboratorEvent,
    CollaboratorResult, ScriptContext, StoreScript,
};
use crate::config::GatewayConfig;
use crate::types::{
    normalize, ChatSummary, ContactInfo, CreatedGroup, GroupMetadata, GroupParticipant,
    Identifier, Label, MediaPayload, MessageRecord, OrderMetadata, OutboundContent,
    ParticipantAction, ProfileInfo, SendOptions, SentMessage,
};

/// Error text the real client produces for the known send defect.
pub const MARKED_UNREAD_FAULT: &str =
    "Cannot read properties of undefined (reading 'markedUnread')";

/// One simulated chat.
#[derive(Debug, Clone)]
pub struct MemoryChat {
    pub summary: ChatSummary,
    /// Oldest first.
    pub messages: Vec<MessageRecord>,
    pub media: HashMap<String, MediaPayload>,
    pub note: Option<String>,
    pub archived: bool,
    pub pinned: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub starred: HashSet<String>,
    pub reactions: HashMap<String, String>,
    pub group: Option<GroupMetadata>,
}

impl MemoryChat {
    fn new(id: Identifier, name: Option<String>) -> Self {
        let phone_number = id.local_part().to_string();
        let is_group = id.is_group();
        Self {
            summary: ChatSummary {
                id,
                name,
                phone_number,
                unread_count: 0,
                last_message: None,
                is_group,
                timestamp: Utc::now().timestamp(),
                labels: Vec::new(),
            },
            messages: Vec::new(),
            media: HashMap::new(),
            note: None,
            archived: false,
            pinned: false,
            muted_until: None,
            starred: HashSet::new(),
            reactions: HashMap::new(),
            group: None,
        }
    }

    fn push(&mut self, record: MessageRecord) {
        self.summary.timestamp = record.timestamp;
        self.summary.last_message = Some(crate::types::LastMessage {
            body: record.body.clone(),
            timestamp: record.timestamp,
            from_me: record.from_me,
            kind: record.kind.clone(),
        });
        if !record.from_me {
            self.summary.unread_count += 1;
        }
        self.messages.push(record);
    }
}

/// Platform-side state shared by all handles of one factory.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorld {
    /// Saved credentials: a new handle restores the session without a QR.
    pub paired: bool,
    pub own_number: String,
    pub push_name: Option<String>,
    pub registered: HashSet<String>,
    pub chats: BTreeMap<String, MemoryChat>,
    pub contacts: HashMap<String, ContactInfo>,
    pub labels: BTreeMap<String, Label>,
    pub blocked: HashSet<String>,
    next_label_id: u64,
    /// Upcoming send attempts that fail with [`MARKED_UNREAD_FAULT`].
    pub pending_send_faults: u32,
    pub sent: Vec<(Identifier, OutboundContent)>,
}

impl MemoryWorld {
    /// Marks a number as present on the platform.
    pub fn register(&mut self, number: &str) -> Identifier {
        let id = normalize(number).as_user();
        self.registered.insert(id.local_part().to_string());
        id
    }

    /// Adds (or returns) a chat.
    pub fn add_chat(&mut self, id: &Identifier, name: Option<&str>) -> &mut MemoryChat {
        self.chats
            .entry(id.to_string())
            .or_insert_with(|| MemoryChat::new(id.clone(), name.map(str::to_string)))
    }

    /// Appends an incoming text message and returns its id.
    pub fn receive_text(&mut self, chat: &Identifier, body: &str) -> String {
        let id = format!("false_{}_{}", chat, short_id());
        let record = MessageRecord {
            id: id.clone(),
            body: body.to_string(),
            from_me: false,
            timestamp: Utc::now().timestamp(),
            kind: "chat".into(),
            ack: 1,
            has_media: false,
            author: None,
            order: OrderMetadata::default(),
        };
        self.add_chat(chat, None).push(record);
        id
    }

    /// Appends an incoming media message and returns its id.
    pub fn receive_media(&mut self, chat: &Identifier, media: MediaPayload) -> String {
        let id = format!("false_{}_{}", chat, short_id());
        let record = MessageRecord {
            id: id.clone(),
            body: String::new(),
            from_me: false,
            timestamp: Utc::now().timestamp(),
            kind: "image".into(),
            ack: 1,
            has_media: true,
            author: None,
            order: OrderMetadata::default(),
        };
        let entry = self.add_chat(chat, None);
        entry.push(record);
        entry.media.insert(id.clone(), media);
        id
    }

    pub fn add_contact(&mut self, contact: ContactInfo) {
        self.contacts.insert(contact.id.to_string(), contact);
    }

    pub fn add_label(&mut self, name: &str, hex_color: Option<&str>) -> Label {
        self.next_label_id += 1;
        let label = Label {
            id: self.next_label_id.to_string(),
            name: name.to_string(),
            hex_color: hex_color.map(str::to_string),
        };
        self.labels.insert(label.id.clone(), label.clone());
        label
    }

    fn chat_mut(&mut self, id: &Identifier) -> CollaboratorResult<&mut MemoryChat> {
        let registered = self.registered.contains(id.local_part()) && !id.is_group();
        let key = id.to_string();
        if !self.chats.contains_key(&key) && registered {
            self.add_chat(id, None);
        }
        self.chats
            .get_mut(&key)
            .ok_or_else(|| CollaboratorError::NotFound(format!("chat {id}")))
    }

    fn group_mut(&mut self, id: &Identifier) -> CollaboratorResult<&mut GroupMetadata> {
        self.chat_mut(id)?
            .group
            .as_mut()
            .ok_or_else(|| CollaboratorError::Failed(format!("{id} is not a group")))
    }

    fn update_label(&mut self, id: &str, name: &str, hex_color: Option<&str>) -> CollaboratorResult<()> {
        let label = self
            .labels
            .get_mut(id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("label {id}")))?;
        label.name = name.to_string();
        if let Some(color) = hex_color {
            label.hex_color = Some(color.to_string());
        }
        Ok(())
    }

    fn delete_label(&mut self, id: &str) -> CollaboratorResult<()> {
        if !self.labels.contains_key(id) {
            return Err(CollaboratorError::NotFound(format!("label {id}")));
        }
        if self
            .chats
            .values()
            .any(|chat| chat.summary.labels.iter().any(|l| l == id))
        {
            return Err(CollaboratorError::LabelInUse(id.to_string()));
        }
        self.labels.remove(id);
        Ok(())
    }

    fn change_chat_labels(&mut self, chat: &Identifier, label_ids: &[String]) -> CollaboratorResult<()> {
        let known: Vec<String> = label_ids
            .iter()
            .filter(|id| self.labels.contains_key(id.as_str()))
            .cloned()
            .collect();
        self.chat_mut(chat)?.summary.labels = known;
        Ok(())
    }

    fn create_group(&mut self, title: &str, participants: &[Identifier]) -> CreatedGroup {
        let id = normalize(&format!("120363{:012}@g.us", rand::random::<u32>()));
        let (present, missing): (Vec<_>, Vec<_>) = participants
            .iter()
            .cloned()
            .partition(|p| self.registered.contains(p.local_part()));
        let own = normalize(&self.own_number);
        let mut members = vec![GroupParticipant {
            id: own.clone(),
            is_admin: true,
            is_super_admin: true,
        }];
        members.extend(present.into_iter().map(|id| GroupParticipant {
            id,
            is_admin: false,
            is_super_admin: false,
        }));
        let chat = self.add_chat(&id, Some(title));
        chat.group = Some(GroupMetadata {
            id: id.clone(),
            name: title.to_string(),
            description: None,
            owner: Some(own),
            participants: members,
            creation: Some(Utc::now().timestamp()),
        });
        CreatedGroup {
            id,
            title: title.to_string(),
            missing_participants: missing,
        }
    }

    fn update_participants(
        &mut self,
        group: &Identifier,
        participants: &[Identifier],
        action: ParticipantAction,
    ) -> CollaboratorResult<()> {
        let metadata = self.group_mut(group)?;
        match action {
            ParticipantAction::Add => {
                for id in participants {
                    if !metadata.participants.iter().any(|p| &p.id == id) {
                        metadata.participants.push(GroupParticipant {
                            id: id.clone(),
                            is_admin: false,
                            is_super_admin: false,
                        });
                    }
                }
            }
            ParticipantAction::Remove => {
                metadata.participants.retain(|p| !participants.contains(&p.id));
            }
            ParticipantAction::Promote | ParticipantAction::Demote => {
                let admin = action == ParticipantAction::Promote;
                for participant in metadata
                    .participants
                    .iter_mut()
                    .filter(|p| participants.contains(&p.id))
                {
                    participant.is_admin = admin;
                }
            }
        }
        Ok(())
    }

    fn contact(&self, id: &Identifier) -> CollaboratorResult<ContactInfo> {
        let key = id.to_string();
        if let Some(contact) = self.contacts.get(&key) {
            let mut contact = contact.clone();
            contact.is_blocked = self.blocked.contains(&key);
            return Ok(contact);
        }
        if self.registered.contains(id.local_part()) {
            return Ok(ContactInfo {
                id: id.clone(),
                name: None,
                pushname: None,
                number: Some(id.local_part().to_string()),
                is_business: false,
                is_enterprise: false,
                is_blocked: self.blocked.contains(&key),
                about: None,
            });
        }
        Err(CollaboratorError::NotFound(format!("contact {id}")))
    }

    fn blocked_contacts(&self) -> CollaboratorResult<Vec<ContactInfo>> {
        let mut blocked: Vec<&String> = self.blocked.iter().collect();
        blocked.sort();
        blocked
            .into_iter()
            .map(|id| self.contact(&normalize(id)))
            .collect()
    }

    fn set_blocked(&mut self, id: &Identifier, blocked: bool) -> CollaboratorResult<()> {
        self.contact(id)?;
        if blocked {
            self.blocked.insert(id.to_string());
        } else {
            self.blocked.remove(&id.to_string());
        }
        Ok(())
    }
}

/// How the simulated client's low-level scripting context behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptMode {
    Available,
    Missing,
    Failing(String),
}

struct Behavior {
    unsupported: HashSet<&'static str>,
    failing: HashMap<&'static str, String>,
    script_mode: ScriptMode,
    fail_prewarm: bool,
    fail_next_initialize: Option<String>,
    teardown_delay: Option<Duration>,
}

struct Shared {
    world: Mutex<MemoryWorld>,
    behavior: Mutex<Behavior>,
    scripts: Mutex<Vec<StoreScript>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..20].to_uppercase()
}

fn to_json<T: Serialize>(value: T) -> CollaboratorResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| CollaboratorError::Failed(e.to_string()))
}

/// Builds [`MemoryClient`] handles over one shared [`MemoryWorld`].
pub struct MemoryClientFactory {
    shared: Arc<Shared>,
    handles: Mutex<Vec<Arc<MemoryClient>>>,
}

impl Default for MemoryClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        let world = MemoryWorld {
            own_number: "201009998888".into(),
            push_name: Some("Gateway".into()),
            ..Default::default()
        };
        Self {
            shared: Arc::new(Shared {
                world: Mutex::new(world),
                behavior: Mutex::new(Behavior {
                    unsupported: HashSet::new(),
                    failing: HashMap::new(),
                    script_mode: ScriptMode::Available,
                    fail_prewarm: false,
                    fail_next_initialize: None,
                    teardown_delay: None,
                }),
                scripts: Mutex::new(Vec::new()),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start with saved credentials, so handles go straight to ready.
    pub fn with_saved_session(self) -> Self {
        lock(&self.shared.world).paired = true;
        self
    }

    /// Runs `f` against the shared world.
    pub fn with_world<R>(&self, f: impl FnOnce(&mut MemoryWorld) -> R) -> R {
        f(&mut lock(&self.shared.world))
    }

    /// Models a client version lacking the named optional method.
    pub fn without_method(&self, method: &'static str) {
        lock(&self.shared.behavior).unsupported.insert(method);
    }

    /// Makes the named optional method throw `message`.
    pub fn failing_method(&self, method: &'static str, message: &str) {
        lock(&self.shared.behavior)
            .failing
            .insert(method, message.to_string());
    }

    pub fn set_script_mode(&self, mode: ScriptMode) {
        lock(&self.shared.behavior).script_mode = mode;
    }

    pub fn set_prewarm_failure(&self, fail: bool) {
        lock(&self.shared.behavior).fail_prewarm = fail;
    }

    /// The next `initialize` call fails with `message`.
    pub fn fail_next_initialize(&self, message: &str) {
        lock(&self.shared.behavior).fail_next_initialize = Some(message.to_string());
    }

    /// Makes `logout` and `destroy` take `delay` before the browser closes.
    pub fn slow_teardown(&self, delay: Duration) {
        lock(&self.shared.behavior).teardown_delay = Some(delay);
    }

    /// The next `count` send attempts hit the transient fault.
    pub fn inject_send_faults(&self, count: u32) {
        lock(&self.shared.world).pending_send_faults = count;
    }

    /// Scripts run through the fallback context so far.
    pub fn scripts(&self) -> Vec<StoreScript> {
        lock(&self.shared.scripts).clone()
    }

    pub fn handles_created(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Most recently constructed handle.
    pub fn latest(&self) -> Option<Arc<MemoryClient>> {
        lock(&self.handles).last().cloned()
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create(&self, config: &GatewayConfig) -> CollaboratorResult<ClientHandle> {
        let (sender, events) = mpsc::unbounded_channel();
        let client = Arc::new(MemoryClient {
            shared: self.shared.clone(),
            client_id: config.client_id.clone(),
            events: sender,
            closed: AtomicBool::new(false),
            send_attempts: AtomicU32::new(0),
            lookups: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            destroy_calls: AtomicU32::new(0),
        });
        lock(&self.handles).push(client.clone());
        Ok(ClientHandle { client, events })
    }
}

/// One simulated client handle.
pub struct MemoryClient {
    shared: Arc<Shared>,
    client_id: String,
    events: mpsc::UnboundedSender<CollaboratorEvent>,
    closed: AtomicBool,
    send_attempts: AtomicU32,
    lookups: AtomicU32,
    logout_calls: AtomicU32,
    destroy_calls: AtomicU32,
}

impl MemoryClient {
    /// Pushes a lifecycle signal as if the browser had produced it.
    pub fn emit(&self, event: CollaboratorEvent) {
        // The receiver is gone once the session retired this handle.
        let _ = self.events.send(event);
    }

    /// Simulates the phone scanning the QR code.
    pub fn scan(&self) {
        lock(&self.shared.world).paired = true;
        self.emit(CollaboratorEvent::Authenticated);
        self.emit(CollaboratorEvent::Ready);
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> u32 {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CollaboratorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Failed(
                "Protocol error: Session closed. Most likely the page has been closed.".into(),
            ));
        }
        Ok(())
    }

    /// Gate for optional methods: absent, failing or available.
    fn method(&self, name: &'static str) -> CollaboratorResult<()> {
        self.ensure_open()?;
        let behavior = lock(&self.shared.behavior);
        if behavior.unsupported.contains(name) {
            return Err(CollaboratorError::Unsupported(name));
        }
        if let Some(message) = behavior.failing.get(name) {
            return Err(CollaboratorError::Failed(message.clone()));
        }
        Ok(())
    }

    async fn teardown_pause(&self) {
        let delay = lock(&self.shared.behavior).teardown_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn world(&self) -> MutexGuard<'_, MemoryWorld> {
        lock(&self.shared.world)
    }
}

#[async_trait]
impl AutomationClient for MemoryClient {
    async fn initialize(&self) -> CollaboratorResult<()> {
        if let Some(message) = lock(&self.shared.behavior).fail_next_initialize.take() {
            return Err(CollaboratorError::Failed(message));
        }
        self.emit(CollaboratorEvent::Loading {
            percent: 100,
            message: "WhatsApp".into(),
        });
        if self.world().paired {
            self.emit(CollaboratorEvent::Authenticated);
            self.emit(CollaboratorEvent::Ready);
        } else {
            let qr = format!(
                "2@{:X},{},{:X}",
                rand::random::<u64>(),
                self.client_id,
                rand::random::<u32>()
            );
            self.emit(CollaboratorEvent::Qr(qr));
        }
        Ok(())
    }

    async fn logout(&self) -> CollaboratorResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.teardown_pause().await;
        self.closed.store(true, Ordering::SeqCst);
        self.world().paired = false;
        self.emit(CollaboratorEvent::Disconnected("LOGOUT".into()));
        Ok(())
    }

    async fn destroy(&self) -> CollaboratorResult<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.teardown_pause().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn profile(&self) -> CollaboratorResult<ProfileInfo> {
        self.ensure_open()?;
        let world = self.world();
        Ok(ProfileInfo {
            push_name: world.push_name.clone(),
            number: world.own_number.clone(),
            platform: "smba".into(),
            server: crate::types::servers::USER.into(),
        })
    }

    async fn number_id(&self, id: &Identifier) -> CollaboratorResult<Option<Identifier>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        let world = self.world();
        if id.is_group() {
            return Ok(world.chats.get(&id.to_string()).map(|c| c.summary.id.clone()));
        }
        Ok(world
            .registered
            .contains(id.local_part())
            .then(|| id.as_user()))
    }

    async fn chat_by_id(&self, id: &Identifier) -> CollaboratorResult<ChatSummary> {
        self.ensure_open()?;
        if lock(&self.shared.behavior).fail_prewarm {
            return Err(CollaboratorError::Failed(format!("chat {id} is not loaded yet")));
        }
        Ok(self.world().chat_mut(id)?.summary.clone())
    }

    async fn chats(&self) -> CollaboratorResult<Vec<ChatSummary>> {
        self.ensure_open()?;
        let mut chats: Vec<ChatSummary> = self
            .world()
            .chats
            .values()
            .map(|chat| chat.summary.clone())
            .collect();
        chats.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(chats)
    }

    async fn chat_contact(&self, chat: &Identifier) -> CollaboratorResult<ContactInfo> {
        self.ensure_open()?;
        let world = self.world();
        world
            .contacts
            .get(&chat.to_string())
            .cloned()
            .ok_or_else(|| CollaboratorError::Failed(format!("no contact behind {chat}")))
    }

    async fn send_message(
        &self,
        to: &Identifier,
        content: &OutboundContent,
        options: SendOptions,
    ) -> CollaboratorResult<SentMessage> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        let mut world = self.world();
        if world.pending_send_faults > 0 {
            world.pending_send_faults -= 1;
            return Err(CollaboratorError::Failed(MARKED_UNREAD_FAULT.into()));
        }

        let sent = SentMessage {
            id: format!("true_{}_{}", to, short_id()),
            timestamp: Utc::now().timestamp(),
        };
        let (body, kind, has_media) = match content {
            OutboundContent::Text(text) => (text.clone(), "chat", false),
            OutboundContent::Media { caption, .. } => {
                (caption.clone().unwrap_or_default(), "document", true)
            }
        };
        let chat = world.chat_mut(to)?;
        chat.push(MessageRecord {
            id: sent.id.clone(),
            body,
            from_me: true,
            timestamp: sent.timestamp,
            kind: kind.into(),
            ack: 1,
            has_media,
            author: None,
            order: OrderMetadata::default(),
        });
        if options.send_seen {
            chat.summary.unread_count = 0;
        }
        if let OutboundContent::Media { media, .. } = content {
            chat.media.insert(sent.id.clone(), media.clone());
        }
        world.sent.push((to.clone(), content.clone()));
        Ok(sent)
    }

    async fn fetch_messages(
        &self,
        chat: &Identifier,
        limit: usize,
    ) -> CollaboratorResult<Vec<MessageRecord>> {
        self.ensure_open()?;
        let mut world = self.world();
        let messages = &world.chat_mut(chat)?.messages;
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn labels(&self) -> CollaboratorResult<Vec<Label>> {
        self.ensure_open()?;
        Ok(self.world().labels.values().cloned().collect())
    }

    async fn create_label(&self, name: &str, hex_color: Option<&str>) -> CollaboratorResult<Label> {
        self.method("create_label")?;
        Ok(self.world().add_label(name, hex_color))
    }

    async fn update_label(&self, label: &Label) -> CollaboratorResult<()> {
        self.method("update_label")?;
        self.world()
            .update_label(&label.id, &label.name, label.hex_color.as_deref())
    }

    async fn delete_label(&self, label_id: &str) -> CollaboratorResult<()> {
        self.method("delete_label")?;
        self.world().delete_label(label_id)
    }

    async fn change_chat_labels(&self, chat: &Identifier, label_ids: &[String]) -> CollaboratorResult<()> {
        self.method("change_chat_labels")?;
        self.world().change_chat_labels(chat, label_ids)
    }

    async fn chat_note(&self, chat: &Identifier) -> CollaboratorResult<Option<String>> {
        self.method("chat_note")?;
        Ok(self.world().chat_mut(chat)?.note.clone())
    }

    async fn set_chat_note(&self, chat: &Identifier, note: &str) -> CollaboratorResult<()> {
        self.method("set_chat_note")?;
        self.world().chat_mut(chat)?.note = Some(note.to_string());
        Ok(())
    }

    async fn set_archived(&self, chat: &Identifier, archived: bool) -> CollaboratorResult<()> {
        self.method("set_archived")?;
        self.world().chat_mut(chat)?.archived = archived;
        Ok(())
    }

    async fn set_pinned(&self, chat: &Identifier, pinned: bool) -> CollaboratorResult<()> {
        self.method("set_pinned")?;
        self.world().chat_mut(chat)?.pinned = pinned;
        Ok(())
    }

    async fn set_muted(&self, chat: &Identifier, until: Option<DateTime<Utc>>) -> CollaboratorResult<()> {
        self.method("set_muted")?;
        self.world().chat_mut(chat)?.muted_until = until;
        Ok(())
    }

    async fn mark_unread(&self, chat: &Identifier) -> CollaboratorResult<()> {
        self.method("mark_unread")?;
        let mut world = self.world();
        let summary = &mut world.chat_mut(chat)?.summary;
        summary.unread_count = summary.unread_count.max(1);
        Ok(())
    }

    async fn create_group(&self, title: &str, participants: &[Identifier]) -> CollaboratorResult<CreatedGroup> {
        self.method("create_group")?;
        Ok(self.world().create_group(title, participants))
    }

    async fn group_metadata(&self, group: &Identifier) -> CollaboratorResult<GroupMetadata> {
        self.method("group_metadata")?;
        Ok(self.world().group_mut(group)?.clone())
    }

    async fn update_participants(
        &self,
        group: &Identifier,
        participants: &[Identifier],
        action: ParticipantAction,
    ) -> CollaboratorResult<()> {
        self.method("update_participants")?;
        self.world().update_participants(group, participants, action)
    }

    async fn contact_by_id(&self, id: &Identifier) -> CollaboratorResult<ContactInfo> {
        self.method("contact_by_id")?;
        self.world().contact(id)
    }

    async fn set_blocked(&self, id: &Identifier, blocked: bool) -> CollaboratorResult<()> {
        self.method("set_blocked")?;
        self.world().set_blocked(id, blocked)
    }

    async fn blocked_contacts(&self) -> CollaboratorResult<Vec<ContactInfo>> {
        self.method("blocked_contacts")?;
        self.world().blocked_contacts()
    }

    async fn delete_message(&self, chat: &Identifier, message_id: &str, everyone: bool) -> CollaboratorResult<()> {
        self.method("delete_message")?;
        let mut world = self.world();
        let entry = world.chat_mut(chat)?;
        if everyone {
            if let Some(message) = entry.messages.iter_mut().find(|m| m.id == message_id) {
                message.body.clear();
                message.kind = "revoked".into();
                message.has_media = false;
            }
        } else {
            entry.messages.retain(|m| m.id != message_id);
        }
        entry.media.remove(message_id);
        Ok(())
    }

    async fn react_to_message(&self, chat: &Identifier, message_id: &str, reaction: &str) -> CollaboratorResult<()> {
        self.method("react_to_message")?;
        let mut world = self.world();
        let entry = world.chat_mut(chat)?;
        if reaction.is_empty() {
            entry.reactions.remove(message_id);
        } else {
            entry
                .reactions
                .insert(message_id.to_string(), reaction.to_string());
        }
        Ok(())
    }

    async fn star_message(&self, chat: &Identifier, message_id: &str, starred: bool) -> CollaboratorResult<()> {
        self.method("star_message")?;
        let mut world = self.world();
        let entry = world.chat_mut(chat)?;
        if starred {
            entry.starred.insert(message_id.to_string());
        } else {
            entry.starred.remove(message_id);
        }
        Ok(())
    }

    async fn download_media(&self, chat: &Identifier, message_id: &str) -> CollaboratorResult<Option<MediaPayload>> {
        self.method("download_media")?;
        Ok(self.world().chat_mut(chat)?.media.get(message_id).cloned())
    }

    fn script_context(&self) -> Option<Arc<dyn ScriptContext>> {
        match lock(&self.shared.behavior).script_mode {
            ScriptMode::Missing => None,
            _ => Some(Arc::new(MemoryScriptContext {
                shared: self.shared.clone(),
            })),
        }
    }
}

/// Runs fallback scripts straight against the shared world.
struct MemoryScriptContext {
    shared: Arc<Shared>,
}

#[async_trait]
impl ScriptContext for MemoryScriptContext {
    async fn evaluate(&self, script: &StoreScript) -> CollaboratorResult<serde_json::Value> {
        lock(&self.shared.scripts).push(script.clone());
        if let ScriptMode::Failing(message) = &lock(&self.shared.behavior).script_mode {
            return Err(CollaboratorError::Failed(message.clone()));
        }

        let mut world = lock(&self.shared.world);
        match script {
            StoreScript::CreateLabel { name, hex_color } => {
                to_json(world.add_label(name, hex_color.as_deref()))
            }
            StoreScript::UpdateLabel {
                label_id,
                name,
                hex_color,
            } => to_json(world.update_label(label_id, name, hex_color.as_deref())?),
            StoreScript::DeleteLabel { label_id } => to_json(world.delete_label(label_id)?),
            StoreScript::ChangeChatLabels { chat_id, label_ids } => {
                to_json(world.change_chat_labels(chat_id, label_ids)?)
            }
            StoreScript::GetChatNote { chat_id } => to_json(world.chat_mut(chat_id)?.note.clone()),
            StoreScript::SetChatNote { chat_id, note } => {
                world.chat_mut(chat_id)?.note = Some(note.clone());
                Ok(serde_json::Value::Null)
            }
            StoreScript::SetArchived { chat_id, archived } => {
                world.chat_mut(chat_id)?.archived = *archived;
                Ok(serde_json::Value::Null)
            }
            StoreScript::SetPinned { chat_id, pinned } => {
                world.chat_mut(chat_id)?.pinned = *pinned;
                Ok(serde_json::Value::Null)
            }
            StoreScript::SetMuted { chat_id, until } => {
                world.chat_mut(chat_id)?.muted_until = *until;
                Ok(serde_json::Value::Null)
            }
            StoreScript::MarkUnread { chat_id } => {
                let summary = &mut world.chat_mut(chat_id)?.summary;
                summary.unread_count = summary.unread_count.max(1);
                Ok(serde_json::Value::Null)
            }
            StoreScript::CreateGroup {
                title,
                participants,
            } => to_json(world.create_group(title, participants)),
            StoreScript::GroupMetadata { group_id } => to_json(world.group_mut(group_id)?.clone()),
            StoreScript::UpdateParticipants {
                group_id,
                participants,
                action,
            } => to_json(world.update_participants(group_id, participants, *action)?),
            StoreScript::GetContact { contact_id } => to_json(world.contact(contact_id)?),
            StoreScript::SetBlocked {
                contact_id,
                blocked,
            } => to_json(world.set_blocked(contact_id, *blocked)?),
            StoreScript::BlockedContacts => to_json(world.blocked_contacts()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unpaired_handle_issues_qr_on_initialize() {
        let factory = MemoryClientFactory::new();
        let mut handle = factory.create(&GatewayConfig::default()).unwrap();
        handle.client.initialize().await.unwrap();

        assert!(matches!(
            handle.events.recv().await,
            Some(CollaboratorEvent::Loading { percent: 100, .. })
        ));
        match handle.events.recv().await {
            Some(CollaboratorEvent::Qr(qr)) => assert!(qr.contains("main-session")),
            other => panic!("expected a QR, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn label_in_use_cannot_be_deleted() {
        let factory = MemoryClientFactory::new();
        let handle = factory.create(&GatewayConfig::default()).unwrap();
        let (chat, label) = factory.with_world(|w| {
            let chat = w.register("201001112222");
            w.add_chat(&chat, Some("Mona"));
            (chat, w.add_label("VIP", Some("#ff0000")))
        });

        handle
            .client
            .change_chat_labels(&chat, &[label.id.clone()])
            .await
            .unwrap();
        assert_eq!(
            handle.client.delete_label(&label.id).await,
            Err(CollaboratorError::LabelInUse(label.id.clone()))
        );
    }

    #[tokio::test]
    async fn unsupported_methods_report_absence() {
        let factory = MemoryClientFactory::new();
        factory.without_method("create_label");
        let handle = factory.create(&GatewayConfig::default()).unwrap();
        assert_eq!(
            handle.client.create_label("VIP", None).await,
            Err(CollaboratorError::Unsupported("create_label"))
        );
    }

    #[tokio::test]
    async fn closed_handle_rejects_calls() {
        let factory = MemoryClientFactory::new();
        let handle = factory.create(&GatewayConfig::default()).unwrap();
        handle.client.destroy().await.unwrap();
        let err = handle.client.labels().await.unwrap_err();
        assert!(err.mentions("Session closed"));
    }
}
