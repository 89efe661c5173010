//! Shared fixtures: an in-memory store and a scripted router behind the
//! `Connector` seam that records every command it receives.

use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ispnexus_routeros::{
    ApiError, ConnectTarget, ConnectionError, Connector, Reply, RouterApi, Row, Transport,
};

use crate::crypto::CredentialCipher;
use crate::db;
use crate::registry::ProfileInput;

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const SECRET_MENU: &str = "/ppp/secret";
pub const PROFILE_MENU: &str = "/ppp/profile";

pub async fn memory_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    // One connection: every pooled connection would get its own empty database.
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    db::migrate(&db).await.unwrap();
    db
}

pub fn test_cipher() -> CredentialCipher {
    CredentialCipher::from_hex(TEST_KEY).unwrap()
}

pub fn profile_input(name: &str, host: &str) -> ProfileInput {
    ProfileInput {
        name: name.to_string(),
        host: host.to_string(),
        port: Some(8728),
        username: "admin".to_string(),
        password: "router-pass".to_string(),
        transport: Transport::Plain,
        timeout_seconds: Some(2),
        description: None,
    }
}

#[derive(Default)]
struct RouterState {
    secrets: Vec<Row>,
    profiles: Vec<Row>,
    next_id: u32,
    log: Vec<String>,
    rejected_names: HashSet<String>,
    connects: usize,
    open_sessions: usize,
}

impl RouterState {
    fn table(&mut self, menu: &str) -> Option<&mut Vec<Row>> {
        match menu {
            SECRET_MENU => Some(&mut self.secrets),
            PROFILE_MENU => Some(&mut self.profiles),
            _ => None,
        }
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }

    fn profile_exists(&self, name: &str) -> bool {
        name == "default" || self.profiles.iter().any(|row| row.get("name") == Some(name))
    }
}

/// In-memory router. Rows are stored the way the router prints them
/// (`disabled` as `true`/`false`).
#[derive(Clone, Default)]
pub struct FakeRouter {
    state: Arc<Mutex<RouterState>>,
    unreachable: bool,
    password: Option<String>,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_password(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    /// Inserts a row directly, bypassing validation. Returns its `.id`.
    pub fn seed(&self, menu: &str, fields: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id();
        let mut row: Row = fields.iter().copied().collect();
        row.insert(".id", id.as_str());
        state.table(menu).unwrap().push(row);
        id
    }

    pub fn rows(&self, menu: &str) -> Vec<Row> {
        self.state.lock().unwrap().table(menu).unwrap().clone()
    }

    pub fn row_named(&self, menu: &str, name: &str) -> Option<Row> {
        self.rows(menu)
            .into_iter()
            .find(|row| row.get("name") == Some(name))
    }

    pub fn set_field(&self, menu: &str, id: &str, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        let row = state
            .table(menu)
            .unwrap()
            .iter_mut()
            .find(|row| row.get(".id") == Some(id))
            .unwrap();
        row.insert(key, value);
    }

    pub fn remove(&self, menu: &str, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.table(menu).unwrap().retain(|row| row.get(".id") != Some(id));
    }

    /// Any add or set carrying this name is trapped.
    pub fn reject_name(&self, name: &str) {
        self.state.lock().unwrap().rejected_names.insert(name.to_string());
    }

    /// Every command received, in order.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open_sessions
    }
}

#[async_trait]
impl Connector for FakeRouter {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn RouterApi>, ConnectionError> {
        if self.unreachable {
            return Err(ConnectionError::NetworkUnreachable(format!(
                "{}: no route to host",
                target.peer()
            )));
        }
        if let Some(expected) = &self.password {
            if &target.password != expected {
                return Err(ConnectionError::AuthenticationFailed(
                    "invalid user name or password".to_string(),
                ));
            }
        }
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        state.open_sessions += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<RouterState>>,
    closed: bool,
}

fn trap(message: &str) -> ApiError {
    ApiError::Trap {
        message: message.to_string(),
        category: None,
    }
}

fn done_with(key: &str, value: &str) -> Reply {
    Reply {
        rows: Vec::new(),
        done: [(key, value)].into_iter().collect(),
    }
}

/// Router-side rendering of a written value.
fn stored_value(key: &str, value: &str) -> String {
    match (key, value) {
        ("disabled", "yes") => "true".to_string(),
        ("disabled", "no") => "false".to_string(),
        _ => value.to_string(),
    }
}

fn handle(state: &mut RouterState, command: &str, params: &[(&str, &str)]) -> Result<Reply, ApiError> {
    match command {
        "/system/identity/print" => {
            return Ok(Reply {
                rows: vec![[("name", "fake-router")].into_iter().collect()],
                done: Row::new(),
            })
        }
        "/system/resource/print" => {
            return Ok(Reply {
                rows: vec![[
                    ("version", "7.15.3 (stable)"),
                    ("board-name", "CCR2004-1G-12S+2XS"),
                    ("platform", "MikroTik"),
                    ("uptime", "3d4h"),
                ]
                .into_iter()
                .collect()],
                done: Row::new(),
            })
        }
        _ => {}
    }

    let (menu, action) = command
        .rsplit_once('/')
        .ok_or_else(|| trap("no such command"))?;
    let param = |key: &str| params.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

    match action {
        "print" => {
            let rows = state.table(menu).ok_or_else(|| trap("no such command"))?.clone();
            if param("count-only").is_some() {
                Ok(done_with("ret", &rows.len().to_string()))
            } else {
                Ok(Reply {
                    rows,
                    done: Row::new(),
                })
            }
        }
        "add" => {
            let name = param("name").ok_or_else(|| trap("missing name"))?.to_string();
            if state.rejected_names.contains(&name) {
                return Err(trap("failure: rejected by router"));
            }
            if menu == SECRET_MENU {
                let profile = param("profile").unwrap_or("default");
                if !state.profile_exists(profile) {
                    return Err(trap(&format!("input does not match any value of profile: {profile}")));
                }
            }
            let id = state.allocate_id();
            let table = state.table(menu).ok_or_else(|| trap("no such command"))?;
            if table.iter().any(|row| row.get("name") == Some(name.as_str())) {
                return Err(trap("failure: entry already exists"));
            }
            let mut row = Row::new();
            row.insert(".id", id.as_str());
            for (key, value) in params {
                row.insert(*key, stored_value(key, value).as_str());
            }
            table.push(row);
            Ok(done_with("ret", &id))
        }
        "set" => {
            let id = param(".id").ok_or_else(|| trap("missing .id"))?.to_string();
            if let Some(name) = param("name") {
                if state.rejected_names.contains(name) {
                    return Err(trap("failure: rejected by router"));
                }
            }
            let table = state.table(menu).ok_or_else(|| trap("no such command"))?;
            let row = table
                .iter_mut()
                .find(|row| row.get(".id") == Some(id.as_str()))
                .ok_or_else(|| trap("no such item"))?;
            for (key, value) in params.iter().filter(|(k, _)| *k != ".id") {
                row.insert(*key, stored_value(key, value).as_str());
            }
            Ok(Reply::default())
        }
        _ => Err(trap("no such command")),
    }
}

#[async_trait]
impl RouterApi for FakeSession {
    async fn call(&mut self, command: &str, params: &[(&str, &str)]) -> Result<Reply, ApiError> {
        if self.closed {
            return Err(ApiError::SessionClosed);
        }
        let mut state = self.state.lock().unwrap();
        state.log.push(command.to_string());
        handle(&mut state, command, params)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().open_sessions -= 1;
        }
    }
}
