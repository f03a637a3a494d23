//! In-memory mail server used by unit tests
//!
//! [`FakeServer`] implements [`Connector`]; every transport it hands out
//! shares the same mailbox state, so effects of one session (moves, flag
//! changes) are visible to the next. Failures can be injected per folder or
//! per message.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::errors::{AppError, AppResult};
use crate::session::{
    Connector, Credentials, FlagOp, FolderEntry, LockMode, MailTransport, RawEnvelope,
};

pub fn credentials(password: &str) -> Credentials {
    Credentials {
        principal: "me@example.com".to_owned(),
        secret: SecretString::new(password.into()),
    }
}

/// Timestamp of generated message `n`; later `n` is newer
pub fn message_date(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i64::from(n))
}

pub fn raw_message(subject: &str, from: &str, date: &str, body: &str) -> Vec<u8> {
    let mut raw = format!("Date: {date}\r\nFrom: {from}\r\nTo: me@example.com\r\n");
    if !subject.is_empty() {
        raw.push_str(&format!("Subject: {subject}\r\n"));
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    raw.into_bytes()
}

#[derive(Debug, Clone)]
struct FakeMessage {
    uid: u32,
    raw: Vec<u8>,
    flags: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeFolder {
    name: String,
    subscribed: bool,
    selectable: bool,
    fail_select: bool,
    fail_fetch: bool,
    next_uid: u32,
    messages: Vec<FakeMessage>,
}

impl FakeFolder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            subscribed: true,
            selectable: true,
            fail_select: false,
            fail_fetch: false,
            next_uid: 1,
            messages: Vec::new(),
        }
    }

    fn push(&mut self, raw: Vec<u8>, flags: Vec<String>) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;
        self.messages.push(FakeMessage { uid, raw, flags });
        uid
    }
}

#[derive(Debug, Default)]
struct FakeState {
    password: String,
    unreachable: bool,
    move_supported: bool,
    fail_mutations: bool,
    folders: Vec<FakeFolder>,
    body_failures: HashSet<(String, u32)>,
    link_lost_on_select: HashSet<String>,
    link_lost_on_body: bool,
    stalled_bodies: bool,
    connections: usize,
    body_fetches: usize,
    logouts: usize,
    envelope_fetches: usize,
    last_lock_mode: Option<LockMode>,
}

impl FakeState {
    fn folder_mut(&mut self, name: &str) -> &mut FakeFolder {
        if let Some(idx) = self.folders.iter().position(|f| f.name == name) {
            &mut self.folders[idx]
        } else {
            self.folders.push(FakeFolder::new(name));
            let last = self.folders.len() - 1;
            &mut self.folders[last]
        }
    }

    fn find_folder_mut(&mut self, name: &str) -> Option<&mut FakeFolder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }
}

/// Shared in-memory mailbox
#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new(password: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                password: password.to_owned(),
                move_supported: true,
                ..FakeState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake server state poisoned")
    }

    /// Folder with `count` generated messages, uids `1..=count`
    pub fn with_folder(self, name: &str, count: u32) -> Self {
        {
            let mut state = self.lock();
            let folder = state.folder_mut(name);
            for n in 1..=count {
                let raw = raw_message(
                    &format!("{name} message {n}"),
                    &format!("sender{n}@example.com"),
                    &message_date(n).to_rfc2822(),
                    &format!("Body of {name} message {n}"),
                );
                folder.push(raw, Vec::new());
            }
        }
        self
    }

    /// Append one message to `folder`, creating the folder if needed
    pub fn with_message(
        self,
        folder: &str,
        subject: &str,
        from: &str,
        date: &str,
        body: &str,
    ) -> Self {
        self.lock()
            .folder_mut(folder)
            .push(raw_message(subject, from, date, body), Vec::new());
        self
    }

    /// Folder that is listed but cannot be opened
    pub fn with_failing_folder(self, name: &str) -> Self {
        self.lock().folder_mut(name).fail_select = true;
        self
    }

    /// Folder that opens but whose window fetch fails
    pub fn with_fetch_failure(self, name: &str) -> Self {
        self.lock().folder_mut(name).fail_fetch = true;
        self
    }

    pub fn with_unsubscribed_folder(self, name: &str, count: u32) -> Self {
        let server = self.with_folder(name, count);
        server.lock().folder_mut(name).subscribed = false;
        server
    }

    pub fn with_noselect_folder(self, name: &str) -> Self {
        self.lock().folder_mut(name).selectable = false;
        self
    }

    pub fn with_body_failure(self, folder: &str, uid: u32) -> Self {
        self.lock().body_failures.insert((folder.to_owned(), uid));
        self
    }

    /// The connection drops when `folder` is opened
    pub fn with_link_lost_on_select(self, folder: &str) -> Self {
        self.lock().link_lost_on_select.insert(folder.to_owned());
        self
    }

    /// The connection drops on every body download
    pub fn with_link_lost_on_body(self) -> Self {
        self.lock().link_lost_on_body = true;
        self
    }

    /// Body downloads never complete
    pub fn with_stalled_bodies(self) -> Self {
        self.lock().stalled_bodies = true;
        self
    }

    pub fn with_flag(self, folder: &str, uid: u32, flag: &str) -> Self {
        {
            let mut state = self.lock();
            if let Some(msg) = state
                .folder_mut(folder)
                .messages
                .iter_mut()
                .find(|m| m.uid == uid)
            {
                msg.flags.push(flag.to_owned());
            }
        }
        self
    }

    pub fn without_move(self) -> Self {
        self.lock().move_supported = false;
        self
    }

    pub fn with_mutation_failure(self) -> Self {
        self.lock().fail_mutations = true;
        self
    }

    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn logouts(&self) -> usize {
        self.lock().logouts
    }

    pub fn body_fetches(&self) -> usize {
        self.lock().body_fetches
    }

    pub fn envelope_fetches(&self) -> usize {
        self.lock().envelope_fetches
    }

    pub fn last_lock_mode(&self) -> Option<LockMode> {
        self.lock().last_lock_mode
    }

    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.lock()
            .find_folder_mut(folder)
            .map(|f| f.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    pub fn flags_of(&self, folder: &str, uid: u32) -> Vec<String> {
        self.lock()
            .find_folder_mut(folder)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid))
            .map(|m| m.flags.clone())
            .unwrap_or_default()
    }
}

impl Connector for FakeServer {
    type Transport = FakeTransport;

    async fn connect(&self, credentials: &Credentials) -> AppResult<FakeTransport> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(AppError::Network("tcp connect failed: connection refused".to_owned()));
        }
        if credentials.secret.expose_secret() != state.password {
            return Err(AppError::AuthFailed(
                "No Response: [AUTHENTICATIONFAILED] Invalid credentials".to_owned(),
            ));
        }
        state.connections += 1;
        Ok(FakeTransport {
            server: self.clone(),
            selected: None,
        })
    }
}

/// One connection to a [`FakeServer`]
#[derive(Debug)]
pub struct FakeTransport {
    server: FakeServer,
    selected: Option<(String, LockMode)>,
}

impl FakeTransport {
    fn selected(&self) -> AppResult<&str> {
        self.selected
            .as_ref()
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| AppError::Internal("BAD no mailbox selected".to_owned()))
    }

    fn writable(&self) -> AppResult<String> {
        match &self.selected {
            Some((name, LockMode::ReadWrite)) => Ok(name.clone()),
            Some((_, LockMode::ReadOnly)) => {
                Err(AppError::Mutation("NO [READ-ONLY] mailbox is read-only".to_owned()))
            }
            None => Err(AppError::Mutation("BAD no mailbox selected".to_owned())),
        }
    }

    fn check_mutations(&self) -> AppResult<()> {
        if self.server.lock().fail_mutations {
            return Err(AppError::Mutation("NO [CANNOT] operation refused".to_owned()));
        }
        Ok(())
    }
}

impl MailTransport for FakeTransport {
    async fn list_folders(&mut self) -> AppResult<Vec<FolderEntry>> {
        Ok(self
            .server
            .lock()
            .folders
            .iter()
            .map(|f| FolderEntry {
                name: f.name.clone(),
                subscribed: f.subscribed,
                selectable: f.selectable,
            })
            .collect())
    }

    async fn select(&mut self, folder: &str, mode: LockMode) -> AppResult<u32> {
        let mut state = self.server.lock();
        state.last_lock_mode = Some(mode);
        if state.link_lost_on_select.contains(folder) {
            self.selected = None;
            return Err(AppError::Network(format!(
                "cannot open folder '{folder}': connection lost"
            )));
        }
        let found = state
            .find_folder_mut(folder)
            .filter(|f| f.selectable && !f.fail_select)
            .map(|f| f.messages.len() as u32);
        match found {
            Some(exists) => {
                self.selected = Some((folder.to_owned(), mode));
                Ok(exists)
            }
            None => {
                self.selected = None;
                Err(AppError::NotFound(format!(
                    "cannot open folder '{folder}': NO no such mailbox"
                )))
            }
        }
    }

    async fn fetch_envelopes(&mut self, first: u32, last: u32) -> AppResult<Vec<RawEnvelope>> {
        let name = self.selected()?.to_owned();
        let mut state = self.server.lock();
        state.envelope_fetches += 1;
        let folder = state
            .find_folder_mut(&name)
            .ok_or_else(|| AppError::Internal("selected folder vanished".to_owned()))?;
        if folder.fail_fetch {
            return Err(AppError::Internal("fetch failed: BAD server error".to_owned()));
        }
        Ok(folder
            .messages
            .iter()
            .enumerate()
            .map(|(idx, m)| (idx as u32 + 1, m))
            .filter(|(seq, _)| (first..=last).contains(seq))
            .map(|(seq, m)| RawEnvelope {
                seq,
                uid: m.uid,
                header: m.raw.clone(),
                flags: m.flags.clone(),
                internal_date: None,
            })
            .collect())
    }

    async fn fetch_body(&mut self, uid: u32) -> AppResult<Vec<u8>> {
        let name = self.selected()?.to_owned();
        let stalled = {
            let mut state = self.server.lock();
            state.body_fetches += 1;
            state.stalled_bodies
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.server.lock();
        if state.link_lost_on_body {
            return Err(AppError::Network("uid fetch failed: connection lost".to_owned()));
        }
        if state.body_failures.contains(&(name.clone(), uid)) {
            return Err(AppError::Internal("uid fetch failed: connection hiccup".to_owned()));
        }
        state
            .folders
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid))
            .map(|m| m.raw.clone())
            .ok_or_else(|| AppError::NotFound(format!("message uid {uid} has no body")))
    }

    async fn store_flag(&mut self, uid: u32, op: FlagOp, flag: &str) -> AppResult<()> {
        let name = self.writable()?;
        self.check_mutations()?;
        let mut state = self.server.lock();
        if let Some(msg) = state
            .find_folder_mut(&name)
            .and_then(|f| f.messages.iter_mut().find(|m| m.uid == uid))
        {
            let present = msg.flags.iter().any(|f| f == flag);
            match op {
                FlagOp::Add if !present => msg.flags.push(flag.to_owned()),
                FlagOp::Remove => msg.flags.retain(|f| f != flag),
                FlagOp::Add => {}
            }
        }
        Ok(())
    }

    async fn supports_move(&mut self) -> AppResult<bool> {
        Ok(self.server.lock().move_supported)
    }

    async fn move_message(&mut self, uid: u32, target: &str) -> AppResult<()> {
        let name = self.writable()?;
        self.check_mutations()?;
        let mut state = self.server.lock();
        if state.find_folder_mut(target).is_none() {
            return Err(AppError::Mutation(
                "UID MOVE failed: NO [TRYCREATE] no such mailbox".to_owned(),
            ));
        }
        let moved = state.find_folder_mut(&name).and_then(|f| {
            let idx = f.messages.iter().position(|m| m.uid == uid)?;
            Some(f.messages.remove(idx))
        });
        if let Some(msg) = moved {
            state.folder_mut(target).push(msg.raw, msg.flags);
        }
        Ok(())
    }

    async fn copy_message(&mut self, uid: u32, target: &str) -> AppResult<()> {
        let name = self.writable()?;
        self.check_mutations()?;
        let mut state = self.server.lock();
        if state.find_folder_mut(target).is_none() {
            return Err(AppError::Mutation(
                "UID COPY failed: NO [TRYCREATE] no such mailbox".to_owned(),
            ));
        }
        let copied = state
            .find_folder_mut(&name)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid).cloned());
        if let Some(msg) = copied {
            state.folder_mut(target).push(msg.raw, msg.flags);
        }
        Ok(())
    }

    async fn expunge(&mut self, uid: u32) -> AppResult<()> {
        let name = self.writable()?;
        let mut state = self.server.lock();
        if let Some(folder) = state.find_folder_mut(&name) {
            folder
                .messages
                .retain(|m| !(m.uid == uid && m.flags.iter().any(|f| f == "\\Deleted")));
        }
        Ok(())
    }

    async fn noop(&mut self) -> AppResult<()> {
        Ok(())
    }

    async fn logout(&mut self) -> AppResult<()> {
        self.server.lock().logouts += 1;
        self.selected = None;
        Ok(())
    }
}
