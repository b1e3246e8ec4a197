//! Named diagnostic session registry
//!
//! Test tooling addresses ECU connections by name. Creating a second session
//! under an existing name and operating on a name that was never created are
//! both configuration errors, surfaced immediately.

use std::collections::HashMap;

use crate::{DiagError, DiagServerResult, client::UdsSession, transport::DiagTransport};

#[derive(Debug, Default)]
/// Registry of named [UdsSession]s.
///
/// Sessions are independent of each other; the registry only resolves names.
pub struct SessionManager<T: DiagTransport> {
    sessions: HashMap<String, UdsSession<T>>,
}

impl<T: DiagTransport> SessionManager<T> {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Registers a session under `name`. Fails when the name is taken
    pub fn create(&mut self, name: &str, session: UdsSession<T>) -> DiagServerResult<()> {
        if self.sessions.contains_key(name) {
            return Err(DiagError::DuplicateSession(name.to_string()));
        }
        log::debug!("Registered diagnostic session '{name}'");
        self.sessions.insert(name.to_string(), session);
        Ok(())
    }

    /// Resolves a session by name
    pub fn get(&self, name: &str) -> DiagServerResult<&UdsSession<T>> {
        self.sessions
            .get(name)
            .ok_or_else(|| DiagError::UnknownDevice(name.to_string()))
    }

    /// Removes and returns a session, closing nothing the caller still owns
    pub fn remove(&mut self, name: &str) -> DiagServerResult<UdsSession<T>> {
        self.sessions
            .remove(name)
            .ok_or_else(|| DiagError::UnknownDevice(name.to_string()))
    }

    /// Names of all registered sessions
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}
