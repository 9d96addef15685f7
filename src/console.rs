//! Operator console: chat commands typed on stdin.
//!
//! Each line is one command, written the way it would be typed in the guild
//! with the invoking member's id in place of the interaction context:
//!
//! - `/hello`
//! - `/link <discord_id>`, `/linkstatus <discord_id>`, `/unlink <discord_id>`,
//!   `/refresh <discord_id>`
//! - `/addfactory <factory_id> <role_id>`, `/removefactory <factory_id>`
//! - `/adduosthreshold <uos> <role_id>`, `/removeuosthreshold <uos>`
//! - `/setuosholderrole <uos> <role_id>`
//! - `/deleterole <role_id>`, `/printrole <role_id>`
//! - `/press <custom_id> <discord_id>` replays a button press
//! - `/roledeleted <role_id>` replays a guild role deletion
//! - `/help`, `/quit`

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::commands::{Command, CommandDispatcher, CommandReply, ReplyButton};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command: {0}. Type /help for the list.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid {what}: {value}")]
    Invalid { what: &'static str, value: String },
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(Command),
    Button { custom_id: String, invoker: String },
    RoleDeleted(String),
    Help,
    Quit,
}

impl FromStr for ConsoleInput {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err(ConsoleError::Usage("/help"));
        };
        let args: Vec<&str> = words.collect();
        let name = head.trim_start_matches('/').to_ascii_lowercase();

        let input = match name.as_str() {
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "hello" => Self::Command(Command::Hello),
            "link" => Self::Command(Command::Link {
                invoker: one(&args, "/link <discord_id>")?,
            }),
            "linkstatus" => Self::Command(Command::LinkStatus {
                invoker: one(&args, "/linkstatus <discord_id>")?,
            }),
            "unlink" => Self::Command(Command::Unlink {
                invoker: one(&args, "/unlink <discord_id>")?,
            }),
            "refresh" => Self::Command(Command::Refresh {
                invoker: one(&args, "/refresh <discord_id>")?,
            }),
            "addfactory" => {
                let (factory, role_id) = two(&args, "/addfactory <factory_id> <role_id>")?;
                Self::Command(Command::AddFactory {
                    factory_id: factory_id(&factory)?,
                    role_id,
                })
            }
            "removefactory" => Self::Command(Command::RemoveFactory {
                factory_id: factory_id(&one(&args, "/removefactory <factory_id>")?)?,
            }),
            "adduosthreshold" => {
                let (uos, role_id) = two(&args, "/adduosthreshold <uos> <role_id>")?;
                Self::Command(Command::AddUosThreshold {
                    threshold: amount(&uos)?,
                    role_id,
                })
            }
            "removeuosthreshold" => Self::Command(Command::RemoveUosThreshold {
                threshold: amount(&one(&args, "/removeuosthreshold <uos>")?)?,
            }),
            "setuosholderrole" => {
                let (uos, role_id) = two(&args, "/setuosholderrole <uos> <role_id>")?;
                Self::Command(Command::SetUosHolderRole {
                    threshold: amount(&uos)?,
                    role_id,
                })
            }
            "deleterole" => Self::Command(Command::DeleteRole {
                role_id: one(&args, "/deleterole <role_id>")?,
            }),
            "printrole" => Self::Command(Command::PrintRole {
                role_id: one(&args, "/printrole <role_id>")?,
            }),
            "press" => {
                let (custom_id, invoker) = two(&args, "/press <custom_id> <discord_id>")?;
                Self::Button { custom_id, invoker }
            }
            "roledeleted" => Self::RoleDeleted(one(&args, "/roledeleted <role_id>")?),
            _ => return Err(ConsoleError::Unknown(head.to_string())),
        };
        Ok(input)
    }
}

fn one(args: &[&str], usage: &'static str) -> Result<String, ConsoleError> {
    match args {
        [a] => Ok((*a).to_string()),
        _ => Err(ConsoleError::Usage(usage)),
    }
}

fn two(args: &[&str], usage: &'static str) -> Result<(String, String), ConsoleError> {
    match args {
        [a, b] => Ok(((*a).to_string(), (*b).to_string())),
        _ => Err(ConsoleError::Usage(usage)),
    }
}

fn factory_id(raw: &str) -> Result<u64, ConsoleError> {
    raw.parse().map_err(|_| ConsoleError::Invalid {
        what: "factory id",
        value: raw.to_string(),
    })
}

fn amount(raw: &str) -> Result<Decimal, ConsoleError> {
    Decimal::from_str(raw).map_err(|_| ConsoleError::Invalid {
        what: "UOS amount",
        value: raw.to_string(),
    })
}

/// Render a reply as console text.
pub fn render(reply: &CommandReply) -> String {
    let mut out = reply.content.clone();
    match &reply.button {
        Some(ReplyButton::OpenUrl { label, url }) => {
            out.push_str(&format!("\n  [{label}] {url}"));
        }
        Some(ReplyButton::Interaction { label, custom_id }) => {
            out.push_str(&format!("\n  [{label}] /press {custom_id} <discord_id>"));
        }
        None => {}
    }
    out
}

fn help() -> &'static str {
    "Commands: /hello /link /linkstatus /unlink /refresh /addfactory /removefactory \
     /adduosthreshold /removeuosthreshold /setuosholderrole /deleterole /printrole \
     /press /roledeleted /quit"
}

/// Read commands from `input` until EOF or `/quit`, writing replies to `output`.
pub async fn run<R, W>(
    dispatcher: Arc<CommandDispatcher>,
    input: R,
    mut output: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let text = match line.parse::<ConsoleInput>() {
            Ok(ConsoleInput::Quit) => break,
            Ok(ConsoleInput::Help) => help().to_string(),
            Ok(ConsoleInput::Command(command)) => render(&dispatcher.dispatch(command).await),
            Ok(ConsoleInput::Button { custom_id, invoker }) => {
                match Command::from_button(&custom_id, &invoker) {
                    Some(command) => render(&dispatcher.dispatch(command).await),
                    None => format!("No action for button {custom_id}"),
                }
            }
            Ok(ConsoleInput::RoleDeleted(role_id)) => {
                dispatcher.on_role_deleted(&role_id).await;
                format!("Dropped rule for deleted role {role_id}, if any.")
            }
            Err(e) => e.to_string(),
        };
        output.write_all(text.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    tracing::debug!("Console input closed");
    Ok(())
}

/// Serve the console on the process's stdin and stdout.
pub fn spawn_stdio(dispatcher: Arc<CommandDispatcher>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        if let Err(e) = run(dispatcher, stdin, tokio::io::stdout()).await {
            tracing::warn!(error = %e, "Console stopped");
        }
    })
}
