//! Command identity, invocation arguments and interaction types.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Stable identity of a registered command: its qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandKey(String);

impl CommandKey {
    /// Creates a key from a qualified command name (e.g. `"config reload"`).
    #[must_use]
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self(qualified_name.into())
    }

    /// Returns the qualified name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CommandKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of command, which decides the error surface its failures go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Invoked only through application (slash) interactions.
    Application,
    /// Invoked either through an interaction or a text message.
    Hybrid,
}

/// A declared command parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name as shown to users.
    pub name: String,

    /// Help text for the parameter.
    pub description: String,

    /// Whether callers must supply it.
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

impl Parameter {
    /// Creates a required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    /// Creates an optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// How a reply to an interaction was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// The first reply, sent as the interaction response.
    Initial,
    /// Any later reply, sent as a followup message.
    Followup,
}

/// A user-initiated application command invocation.
///
/// Clones share the same reply log, the way every handler sees the same
/// interaction object.
#[derive(Debug, Clone)]
pub struct Interaction {
    /// Interaction identifier.
    pub id: u64,

    /// Name of the invoking user.
    pub user: String,

    /// The command this interaction targets, if any.
    pub command: Option<CommandKey>,

    /// When the interaction was created.
    pub created_at: DateTime<Utc>,

    replies: Arc<Mutex<Vec<String>>>,
}

impl Interaction {
    /// Creates an interaction that is not bound to a command yet.
    #[must_use]
    pub fn new(id: u64, user: impl Into<String>) -> Self {
        Self {
            id,
            user: user.into(),
            command: None,
            created_at: Utc::now(),
            replies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Binds the interaction to a command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<CommandKey>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Sends a reply, as the initial response or as a followup.
    pub async fn reply(&self, content: impl Into<String>) -> ReplyKind {
        let mut replies = self.replies.lock().await;
        let kind = if replies.is_empty() {
            ReplyKind::Initial
        } else {
            ReplyKind::Followup
        };
        replies.push(content.into());
        kind
    }

    /// Whether the initial response has been sent.
    pub async fn is_responded(&self) -> bool {
        !self.replies.lock().await.is_empty()
    }

    /// Returns every reply sent so far.
    pub async fn replies(&self) -> Vec<String> {
        self.replies.lock().await.clone()
    }
}

/// Invocation context of a hybrid command.
#[derive(Debug, Clone)]
pub struct HybridContext {
    /// The invoked command.
    pub command: CommandKey,

    /// Who invoked it.
    pub author: String,

    /// Message text for text invocations, empty for interactions.
    pub content: String,

    /// Present only when invoked through an interaction.
    pub interaction: Option<Interaction>,
}

impl HybridContext {
    /// Context of a text (message) invocation.
    #[must_use]
    pub fn from_text(
        command: impl Into<CommandKey>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            author: author.into(),
            content: content.into(),
            interaction: None,
        }
    }

    /// Context of an interaction invocation.
    #[must_use]
    pub fn from_interaction(command: impl Into<CommandKey>, interaction: Interaction) -> Self {
        Self {
            command: command.into(),
            author: interaction.user.clone(),
            content: String::new(),
            interaction: Some(interaction),
        }
    }
}

/// A positional argument passed to a command handler.
#[derive(Debug, Clone)]
pub enum Argument {
    /// Leading argument of application commands.
    Interaction(Interaction),
    /// Leading argument of hybrid commands.
    Context(HybridContext),
    /// A plain parameter value.
    Value(serde_json::Value),
}

/// Arguments of one handler call.
///
/// `receiver` is set when the handler belongs to a command group, which the
/// host passes ahead of the positional arguments.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    /// The command group the handler is bound to.
    pub receiver: Option<String>,

    /// Arguments in declaration order, context first.
    pub positional: Vec<Argument>,
}

impl CallArgs {
    /// Creates an empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates arguments for a handler bound to a receiver.
    #[must_use]
    pub fn bound(receiver: impl Into<String>) -> Self {
        Self {
            receiver: Some(receiver.into()),
            positional: Vec::new(),
        }
    }

    /// Arguments of a plain application command call.
    #[must_use]
    pub fn for_interaction(interaction: Interaction) -> Self {
        Self::new().arg(Argument::Interaction(interaction))
    }

    /// Arguments of a hybrid command call.
    #[must_use]
    pub fn for_context(context: HybridContext) -> Self {
        Self::new().arg(Argument::Context(context))
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, argument: Argument) -> Self {
        self.positional.push(argument);
        self
    }

    /// Appends a plain value argument.
    #[must_use]
    pub fn value(self, value: impl Into<serde_json::Value>) -> Self {
        self.arg(Argument::Value(value.into()))
    }

    /// Finds the interaction among the positional arguments, looking inside
    /// hybrid contexts as well.
    #[must_use]
    pub fn find_interaction(&self) -> Option<&Interaction> {
        self.positional.iter().find_map(|argument| match argument {
            Argument::Interaction(interaction) => Some(interaction),
            Argument::Context(context) => context.interaction.as_ref(),
            Argument::Value(_) => None,
        })
    }

    /// Returns the hybrid context, if the call carries one.
    #[must_use]
    pub fn hybrid_context(&self) -> Option<&HybridContext> {
        self.positional.iter().find_map(|argument| match argument {
            Argument::Context(context) => Some(context),
            _ => None,
        })
    }
}
