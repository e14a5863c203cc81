//! Services and their command tables.

use crate::dispatch::auth::Requester;
use common::{AuthLevel, Request, Response};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::warn;

/// Future returned by a command handler.
pub type HandlerFuture<'a> = BoxFuture<'a, ()>;

/// A command handler. It is solely responsible for populating the response.
pub type Handler<S> =
    for<'a> fn(&'a S, &'a Requester, &'a Request, &'a mut Response) -> HandlerFuture<'a>;

/// Minimum level and handler registered for one command string.
pub struct ServiceCommand<S> {
    pub min_auth_level: AuthLevel,
    pub handler: Handler<S>,
}

impl<S> Clone for ServiceCommand<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for ServiceCommand<S> {}

/// Full command string → [`ServiceCommand`].
pub struct CommandTable<S> {
    commands: HashMap<&'static str, ServiceCommand<S>>,
}

impl<S> CommandTable<S> {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Add a command. Commands are registered once at construction.
    pub fn with(mut self, command: &'static str, min_auth_level: AuthLevel, handler: Handler<S>) -> Self {
        let previous = self.commands.insert(
            command,
            ServiceCommand {
                min_auth_level,
                handler,
            },
        );
        if previous.is_some() {
            warn!("Command {} registered twice, keeping the last handler", command);
        }
        self
    }

    pub fn get(&self, command: &str) -> Option<&ServiceCommand<S>> {
        self.commands.get(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }
}

impl<S> Default for CommandTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A group of commands sharing a prefix, as seen by the dispatcher.
pub trait Service: Send + Sync + 'static {
    /// Command prefix, e.g. `"post"`.
    fn prefix(&self) -> &'static str;

    /// Minimum level for `command`, or `None` if the service lacks it.
    fn min_auth_level(&self, command: &str) -> Option<AuthLevel>;

    /// Run the handler for `command`.
    fn execute<'a>(
        &'a self,
        command: &'a str,
        requester: &'a Requester,
        request: &'a Request,
        response: &'a mut Response,
    ) -> HandlerFuture<'a>;
}

/// A service whose commands live in a [`CommandTable`].
pub trait CommandService: Sized + Send + Sync + 'static {
    const PREFIX: &'static str;

    fn commands(&self) -> &CommandTable<Self>;
}

impl<T: CommandService> Service for T {
    fn prefix(&self) -> &'static str {
        T::PREFIX
    }

    fn min_auth_level(&self, command: &str) -> Option<AuthLevel> {
        self.commands().get(command).map(|c| c.min_auth_level)
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
        requester: &'a Requester,
        request: &'a Request,
        response: &'a mut Response,
    ) -> HandlerFuture<'a> {
        match self.commands().get(command) {
            Some(entry) => (entry.handler)(self, requester, request, response),
            None => Box::pin(async move { response.not_implemented() }),
        }
    }
}
