//! Command registration and dispatch.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use super::handler::{CommandHandler, HandlerSlot};
use super::observer::{ErrorChain, FailureContext, Surface};
use super::types::{Argument, CallArgs, CommandKey, CommandKind, Parameter};

/// Errors produced while dispatching a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command already registered: {0}")]
    DuplicateCommand(CommandKey),

    #[error("Signature mismatch for {command}: {reason}")]
    SignatureMismatch { command: CommandKey, reason: String },

    #[error("Command {command} failed: {error:#}")]
    Failed {
        command: CommandKey,
        error: anyhow::Error,
    },
}

impl CommandError {
    /// The error returned by the handler, for handler failures.
    #[must_use]
    pub const fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A registered command.
#[derive(Debug)]
pub struct Command {
    key: CommandKey,
    description: String,
    kind: CommandKind,
    parameters: Vec<Parameter>,
    handler: HandlerSlot,
}

impl Command {
    /// Creates an application command.
    #[must_use]
    pub fn new(
        name: impl Into<CommandKey>,
        description: impl Into<String>,
        handler: CommandHandler,
    ) -> Self {
        Self {
            key: name.into(),
            description: description.into(),
            kind: CommandKind::Application,
            parameters: Vec::new(),
            handler: HandlerSlot::new(handler),
        }
    }

    /// Creates a hybrid command.
    #[must_use]
    pub fn hybrid(
        name: impl Into<CommandKey>,
        description: impl Into<String>,
        handler: CommandHandler,
    ) -> Self {
        Self {
            kind: CommandKind::Hybrid,
            ..Self::new(name, description, handler)
        }
    }

    /// Declares a parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub const fn key(&self) -> &CommandKey {
        &self.key
    }

    #[must_use]
    pub fn qualified_name(&self) -> &str {
        self.key.as_str()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The slot holding the live handler.
    #[must_use]
    pub const fn handler(&self) -> &HandlerSlot {
        &self.handler
    }

    /// Error surface failures of this command are reported to.
    #[must_use]
    pub const fn surface(&self) -> Surface {
        match self.kind {
            CommandKind::Application => Surface::Application,
            CommandKind::Hybrid => Surface::Hybrid,
        }
    }

    /// Checks call arguments against the declared signature.
    ///
    /// The first positional argument carries the invocation context, the rest
    /// map onto the declared parameters.
    pub fn check_signature(&self, args: &CallArgs) -> Result<(), CommandError> {
        let mismatch = |reason: String| CommandError::SignatureMismatch {
            command: self.key.clone(),
            reason,
        };

        let context_ok = match (self.kind, args.positional.first()) {
            (CommandKind::Application, Some(Argument::Interaction(_))) => true,
            (CommandKind::Hybrid, Some(Argument::Context(_))) => true,
            _ => false,
        };
        if !context_ok {
            return Err(mismatch(format!(
                "first argument must be the {} invocation context",
                self.surface()
            )));
        }

        let given = args.positional.len() - 1;
        let required = self.parameters.iter().filter(|p| p.required).count();
        let declared = self.parameters.len();
        if given < required || given > declared {
            return Err(mismatch(format!(
                "expected {required}..={declared} arguments, got {given}"
            )));
        }

        Ok(())
    }

    /// Runs the live handler.
    pub async fn invoke(&self, args: CallArgs) -> Result<(), CommandError> {
        self.check_signature(&args)?;

        let handler = self.handler.load();
        handler
            .call(args)
            .await
            .map_err(|error| CommandError::Failed {
                command: self.key.clone(),
                error,
            })
    }
}

/// All registered commands plus the error surfaces failures are reported to.
#[derive(Debug)]
pub struct CommandTree {
    commands: RwLock<HashMap<CommandKey, Arc<Command>>>,
    application_errors: ErrorChain,
    hybrid_errors: ErrorChain,
}

impl Default for CommandTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            application_errors: ErrorChain::new(Surface::Application),
            hybrid_errors: ErrorChain::new(Surface::Hybrid),
        }
    }

    /// Registers a command.
    pub fn add_command(&self, command: Command) -> Result<Arc<Command>, CommandError> {
        let mut commands = self
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if commands.contains_key(command.key()) {
            return Err(CommandError::DuplicateCommand(command.key().clone()));
        }

        let command = Arc::new(command);
        commands.insert(command.key().clone(), Arc::clone(&command));
        Ok(command)
    }

    /// Looks up a command by qualified name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Command>> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All registered commands, sorted by name.
    #[must_use]
    pub fn commands(&self) -> Vec<Arc<Command>> {
        let mut commands: Vec<_> = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        commands.sort_by(|a, b| a.key().cmp(b.key()));
        commands
    }

    /// The error chain of a surface.
    #[must_use]
    pub const fn error_chain(&self, surface: Surface) -> &ErrorChain {
        match surface {
            Surface::Application => &self.application_errors,
            Surface::Hybrid => &self.hybrid_errors,
        }
    }

    /// Dispatches a command.
    ///
    /// A failure is reported to the command's error surface before it is
    /// returned.
    pub async fn invoke(&self, name: &str, args: CallArgs) -> Result<(), CommandError> {
        let Some(command) = self.get(name) else {
            return Err(CommandError::UnknownCommand(name.to_owned()));
        };

        debug!("Dispatching {}", command.key());
        let interaction = args.find_interaction().cloned();

        let Err(error) = command.invoke(args).await else {
            return Ok(());
        };

        let ctx = FailureContext {
            surface: command.surface(),
            command: Some(Arc::clone(&command)),
            interaction,
        };
        self.error_chain(ctx.surface).notify(&ctx, &error).await;

        Err(error)
    }
}
