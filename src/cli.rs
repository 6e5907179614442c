use crate::collaborators::{Collaborators, ScanCredentials};
use crate::config::{load_global_settings, load_settings, Settings};
use crate::orchestration::checkpoint::open_checkpoint_store;
use crate::orchestration::events::ProgressObserver;
use crate::orchestration::state::{Actor, ProgressEntry, RequestInput, WorkflowState};
use crate::orchestration::{RunOutcome, RunStatus, WorkflowEngine};
use crate::shared::{now_secs, ReportId, SessionId};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Run { session_id: SessionId, text: String },
    Acknowledge { report_id: ReportId },
    Resume { session_id: SessionId },
    Show { session_id: SessionId },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    pub config_path: Option<PathBuf>,
    pub command: CliCommand,
}

pub fn help_text() -> String {
    [
        "Usage: scanward [--config PATH] <command>",
        "",
        "Commands:",
        "  run <session-id> <request...>   submit a request (or `send email`) to a session",
        "  acknowledge <report-id>         deliver a report acknowledgment and start cloning",
        "  resume <session-id>             continue a run interrupted between steps",
        "  show <session-id>               print the session checkpoint as JSON",
        "",
        "Settings default to ~/.scanward/config.yaml. Set SCANWARD_LOG to adjust logging.",
    ]
    .join("\n")
}

pub fn parse_args(args: &[String]) -> Result<CliInvocation, String> {
    let mut config_path = None;
    let mut rest = args;
    while let Some(first) = rest.first() {
        match first.as_str() {
            "--config" => {
                let path = rest
                    .get(1)
                    .ok_or_else(|| "`--config` requires a path".to_string())?;
                config_path = Some(PathBuf::from(path));
                rest = &rest[2..];
            }
            _ => break,
        }
    }

    let Some((verb, operands)) = rest.split_first() else {
        return Ok(CliInvocation {
            config_path,
            command: CliCommand::Help,
        });
    };
    let command = match verb.as_str() {
        "run" => {
            let (session, words) = operands
                .split_first()
                .ok_or_else(|| "usage: scanward run <session-id> <request...>".to_string())?;
            let text = words.join(" ");
            if text.trim().is_empty() {
                return Err("usage: scanward run <session-id> <request...>".to_string());
            }
            CliCommand::Run {
                session_id: SessionId::parse(session)?,
                text,
            }
        }
        "acknowledge" | "ack" => CliCommand::Acknowledge {
            report_id: ReportId::parse(single_operand(operands, "acknowledge <report-id>")?)?,
        },
        "resume" => CliCommand::Resume {
            session_id: SessionId::parse(single_operand(operands, "resume <session-id>")?)?,
        },
        "show" => CliCommand::Show {
            session_id: SessionId::parse(single_operand(operands, "show <session-id>")?)?,
        },
        "help" | "--help" | "-h" => CliCommand::Help,
        other => return Err(format!("unknown command `{other}`")),
    };
    Ok(CliInvocation {
        config_path,
        command,
    })
}

fn single_operand<'a>(operands: &'a [String], usage: &str) -> Result<&'a str, String> {
    match operands {
        [only] => Ok(only.as_str()),
        _ => Err(format!("usage: scanward {usage}")),
    }
}

/// Prints progress entries to stdout as they are produced.
struct ConsoleObserver;

impl ProgressObserver for ConsoleObserver {
    fn on_progress(&self, _session_id: &SessionId, entry: &ProgressEntry) {
        let label = match entry.actor {
            Actor::System => "system",
            Actor::Assistant => "assistant",
        };
        println!("[{label}] {}", entry.text);
    }
}

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let invocation = parse_args(&args)?;
    if invocation.command == CliCommand::Help {
        return Ok(help_text());
    }
    let settings = match invocation.config_path.as_deref() {
        Some(path) => load_settings(path),
        None => load_global_settings(),
    }
    .map_err(|err| err.to_string())?;

    if let CliCommand::Show { session_id } = &invocation.command {
        let store = open_checkpoint_store(&settings).map_err(|err| err.to_string())?;
        let state = store
            .get(session_id)
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("no checkpoint for session `{session_id}`"))?;
        return serde_json::to_string_pretty(&state).map_err(|err| err.to_string());
    }

    let engine = build_engine(settings)?;
    let now = now_secs();
    let outcome = match invocation.command {
        CliCommand::Run { session_id, text } => {
            engine.run(&session_id, RequestInput::text(text), now)
        }
        CliCommand::Acknowledge { report_id } => engine.acknowledge(&report_id, now),
        CliCommand::Resume { session_id } => engine.resume_interrupted(&session_id, now),
        CliCommand::Show { .. } | CliCommand::Help => return Ok(help_text()),
    }
    .map_err(|err| err.to_string())?;
    Ok(render_outcome(&outcome))
}

fn build_engine(settings: Settings) -> Result<WorkflowEngine, String> {
    let store = open_checkpoint_store(&settings).map_err(|err| err.to_string())?;
    let collaborators = Collaborators::from_settings(&settings).map_err(|err| err.to_string())?;
    let credentials = ScanCredentials {
        user: settings.scan.ssh_user.clone(),
        password: settings.scan_password().map_err(|err| err.to_string())?,
    };
    tracing::debug!(backend = store.backend_name(), "checkpoint store opened");
    Ok(WorkflowEngine::new(settings, collaborators, store)
        .with_credentials(credentials)
        .with_observer(Box::new(ConsoleObserver)))
}

pub fn render_outcome(outcome: &RunOutcome) -> String {
    let state: &WorkflowState = &outcome.state;
    let status = match outcome.status {
        RunStatus::Completed => "completed",
        RunStatus::Suspended => "awaiting approval",
    };
    let mut lines = vec![format!("session {}: {status}", state.session_id)];
    if let Some(summary) = state.final_summary.as_deref() {
        lines.push(String::new());
        lines.push(summary.to_string());
    }
    if !state.error_log.is_empty() {
        lines.push(String::new());
        lines.push(format!("errors ({}):", state.error_log.len()));
        lines.extend(state.error_log.iter().map(|err| format!("- {err}")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn run_joins_the_request_words() {
        let invocation =
            parse_args(&args(&["--config", "/etc/scanward.yaml", "run", "s1", "scan", "kafka"]))
                .expect("parse");
        assert_eq!(
            invocation.config_path,
            Some(PathBuf::from("/etc/scanward.yaml"))
        );
        assert_eq!(
            invocation.command,
            CliCommand::Run {
                session_id: SessionId::parse("s1").expect("id"),
                text: "scan kafka".to_string(),
            }
        );
    }

    #[test]
    fn empty_args_show_help() {
        assert_eq!(parse_args(&[]).expect("parse").command, CliCommand::Help);
        assert!(run_cli(Vec::new()).expect("help").contains("acknowledge"));
    }

    #[test]
    fn malformed_invocations_are_rejected() {
        assert!(parse_args(&args(&["run", "s1"])).is_err());
        assert!(parse_args(&args(&["acknowledge"])).is_err());
        assert!(parse_args(&args(&["show", "../etc"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
        let err = parse_args(&args(&["launch"])).expect_err("unknown");
        assert_eq!(err, "unknown command `launch`");
    }
}
