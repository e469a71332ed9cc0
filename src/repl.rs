//! Interactive shell with line editing, context-aware completion, and
//! background enrichment.
//!
//! The REPL task owns terminal I/O. Every keystroke (via the hinter
//! callback) flips the typing state, recomputes the panel layout, and
//! submits an enrichment snapshot; the pipeline's `panel.update` events land
//! in a shared slot rendered between commands, so the prompt itself never
//! blocks on background work.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustyline::Helper;
use rustyline::completion::Completer as LineCompleter;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use uuid::Uuid;

use crate::completer::Completer;
use crate::config::OutputFormat;
use crate::core::CoreOrchestrator;
use crate::db::Param;
use crate::enrichment::{EnrichmentPipeline, EnrichmentRequest};
use crate::error::{Error, Result, RiskError};
use crate::gate::ExecutionOptions;
use crate::output;
use crate::panels::{ContentSizes, PanelOrchestrator, terminal_height};
use crate::risk::RiskLevel;
use crate::vault::CredentialType;

/// Rustyline helper: completion from the intelligent completer, typing
/// snapshots from the hinter.
struct ShellHelper {
    completer: Arc<Completer>,
    pipeline: Arc<EnrichmentPipeline>,
    panels: Arc<PanelOrchestrator>,
    runtime: tokio::runtime::Handle,
    session: Uuid,
    cwd: PathBuf,
    typing: Arc<AtomicBool>,
}

impl LineCompleter for ShellHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let (start, completions) = self
            .runtime
            .block_on(self.completer.complete(line, pos));
        Ok((start, completions.into_iter().map(|c| c.text).collect()))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;

    // Called on every keystroke: the cheapest place to observe typing.
    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() {
            return None;
        }
        self.typing.store(true, Ordering::Relaxed);
        let prompt_lines = line.lines().count().max(1) as u16;
        self.panels
            .update(terminal_height(), true, prompt_lines, ContentSizes::default());
        if !line.trim().is_empty() {
            let mut request =
                EnrichmentRequest::new(self.session, line, self.cwd.clone());
            request.current_module = "repl".to_string();
            self.pipeline.submit(request);
        }
        None
    }
}

impl Highlighter for ShellHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{hint}\x1b[0m"))
    }
}

impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

/// A HIGH/CRITICAL statement waiting for interactive confirmation.
struct PendingSql {
    connection: String,
    sql: String,
    level: RiskLevel,
}

/// Run the interactive shell until EOF or `quit`.
pub async fn run(core: Arc<CoreOrchestrator>, format: OutputFormat) -> Result<()> {
    let typing = Arc::new(AtomicBool::new(false));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    // Latest module-panel payload, written by the bus handler, rendered
    // between commands.
    let module_panel: Arc<std::sync::Mutex<Option<serde_json::Value>>> =
        Arc::new(std::sync::Mutex::new(None));
    {
        let slot = module_panel.clone();
        core.bus
            .subscribe(
                "panel.update",
                Arc::new(move |event| {
                    *slot.lock().expect("panel slot poisoned") = Some(event.payload.clone());
                }),
            )
            .await;
    }

    let helper = ShellHelper {
        completer: core.completer.clone(),
        pipeline: core.pipeline.clone(),
        panels: core.panels.clone(),
        runtime: tokio::runtime::Handle::current(),
        session: core.session,
        cwd,
        typing: typing.clone(),
    };

    let mut editor = rustyline::Editor::<ShellHelper, rustyline::history::DefaultHistory>::new()
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    editor.set_helper(Some(helper));
    let history_path = core.config.state_dir.join("repl_history.txt");
    let _ = editor.load_history(&history_path);

    println!("ai-shell interactive mode. `help` for commands, `quit` to exit.");

    let mut active: Option<String> = None;
    let mut pending: Option<PendingSql> = None;

    loop {
        let prompt = match (&pending, &active) {
            (Some(p), _) => format!(
                "{} risk - type '{}' to run, anything else cancels> ",
                p.level,
                if p.level == RiskLevel::Critical {
                    "force"
                } else {
                    "yes"
                }
            ),
            (None, Some(name)) => format!("{name}> "),
            (None, None) => "ai-shell> ".to_string(),
        };

        let (line_result, returned_editor) = tokio::task::spawn_blocking(move || {
            let result = editor.readline(&prompt);
            (result, editor)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        editor = returned_editor;

        // Prompt went idle: recompute the layout once.
        typing.store(false, Ordering::Relaxed);
        core.panels
            .update(terminal_height(), false, 1, ContentSizes::default());

        let line = match line_result {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending = None;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(Error::Io(std::io::Error::other(e))),
        };
        let trimmed = line.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(&trimmed);

        if let Some(p) = pending.take() {
            let token = trimmed.to_ascii_lowercase();
            let authorized = match p.level {
                RiskLevel::Critical => token == "force",
                _ => token == "yes" || token == "y",
            };
            if authorized {
                let options = ExecutionOptions {
                    confirmed: true,
                    force: p.level == RiskLevel::Critical,
                    ..Default::default()
                };
                run_sql(&core, &p.connection, &p.sql, options, format).await;
            } else {
                println!("cancelled");
            }
            continue;
        }

        match dispatch(&core, &mut active, &trimmed, format).await {
            Ok(Dispatch::Continue) => {
                render_module_panel(&module_panel);
            }
            Ok(Dispatch::Quit) => break,
            Ok(Dispatch::NeedsConfirmation(p)) => {
                pending = Some(p);
            }
            Err(e) => {
                eprintln!("error: {e}");
            }
        }
    }

    let _ = editor.save_history(&history_path);
    Ok(())
}

enum Dispatch {
    Continue,
    Quit,
    NeedsConfirmation(PendingSql),
}

async fn dispatch(
    core: &Arc<CoreOrchestrator>,
    active: &mut Option<String>,
    line: &str,
    format: OutputFormat,
) -> Result<Dispatch> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();

    match command {
        "quit" | "exit" => return Ok(Dispatch::Quit),
        "help" => {
            println!(
                "commands: connect <name> <dsn>, disconnect <name>, use <name>, connections,\n\
                 \x20         vault <list|add|get|remove|rotate> ..., history, health, status,\n\
                 \x20         quit. Anything else runs on the active connection."
            );
        }
        "connect" => {
            let (name, dsn) = (words.next(), words.next());
            match (name, dsn) {
                (Some(name), Some(dsn)) => {
                    core.connect(name, dsn).await?;
                    *active = Some(name.to_string());
                    println!("connected '{name}'");
                }
                _ => println!("usage: connect <name> <dsn>"),
            }
        }
        "disconnect" => match words.next() {
            Some(name) => {
                core.disconnect(name).await?;
                if active.as_deref() == Some(name) {
                    *active = None;
                }
                println!("disconnected '{name}'");
            }
            None => println!("usage: disconnect <name>"),
        },
        "use" => match words.next() {
            Some(name) => {
                core.client(name).await?;
                *active = Some(name.to_string());
                println!("using '{name}'");
            }
            None => println!("usage: use <name>"),
        },
        "connections" => {
            for name in core.connection_names().await {
                let live = core.clients.read().await.contains_key(&name);
                println!("{name}{}", if live { " (connected)" } else { "" });
            }
        }
        "vault" => {
            let action = words.next().unwrap_or("list");
            vault_action(core, action, &words.collect::<Vec<_>>())?;
        }
        "history" => {
            for record in core.history.recent(10) {
                println!(
                    "[{}] {} ({} ms, {})",
                    record.started_at.format("%H:%M:%S"),
                    record.sql_redacted,
                    record.duration_ms,
                    record.risk_level
                );
            }
        }
        "health" => {
            let report = core.health().await;
            let value = serde_json::to_value(&report).unwrap_or_default();
            println!("{}", output::render_value(&value, format));
        }
        "status" => {
            let value = status_value(core).await;
            println!("{}", output::render_value(&value, format));
        }
        _ => {
            // User-typed SQL (or a driver-native statement).
            let Some(name) = active.clone() else {
                println!("no active connection; `connect <name> <dsn>` first");
                return Ok(Dispatch::Continue);
            };
            let outcome = run_sql(core, &name, line, ExecutionOptions::default(), format).await;
            if let Some(level) = outcome {
                return Ok(Dispatch::NeedsConfirmation(PendingSql {
                    connection: name,
                    sql: line.to_string(),
                    level,
                }));
            }
        }
    }
    Ok(Dispatch::Continue)
}

/// Execute through the gate, printing results. Returns the risk level when
/// the statement needs interactive confirmation.
async fn run_sql(
    core: &Arc<CoreOrchestrator>,
    connection: &str,
    sql: &str,
    options: ExecutionOptions,
    format: OutputFormat,
) -> Option<RiskLevel> {
    let client = match core.client(connection).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e}");
            return None;
        }
    };

    match core
        .gate
        .execute(connection, client.as_ref(), sql, &[], options)
        .await
    {
        Ok(outcome) => {
            if let Some(error) = outcome.error() {
                eprintln!("query failed: {error}");
                if let Some(explanation) = &outcome.explanation {
                    eprintln!("  {explanation}");
                }
            } else if let Some(output_rows) = &outcome.output {
                println!("{}", output::render_query_output(output_rows, format));
            }
            None
        }
        Err(Error::Risk(RiskError::Rejected(message))) => {
            let level = core
                .gate
                .analyzer()
                .analyze(sql)
                .map(|a| a.level)
                .unwrap_or(RiskLevel::High);
            println!("blocked: {message}");
            Some(level)
        }
        Err(e) => {
            eprintln!("error: {e}");
            None
        }
    }
}

fn vault_action(core: &Arc<CoreOrchestrator>, action: &str, args: &[&str]) -> Result<()> {
    match action {
        "list" => {
            for info in core.vault.list() {
                println!(
                    "{} ({}){}",
                    info.name,
                    info.credential_type,
                    if info.quarantined { " [quarantined]" } else { "" }
                );
            }
        }
        "add" => match args {
            [name, value] => {
                core.vault
                    .store(name, value, CredentialType::Standard, None)?;
                println!("stored '{name}'");
            }
            _ => println!("usage: vault add <name> <value>"),
        },
        "get" => match args {
            [name] => {
                let value = core.vault.retrieve(name, false)?;
                println!("{}", secrecy::ExposeSecret::expose_secret(&value));
            }
            _ => println!("usage: vault get <name>"),
        },
        "remove" => match args {
            [name] => {
                core.vault.delete(name)?;
                println!("removed '{name}'");
            }
            _ => println!("usage: vault remove <name>"),
        },
        "rotate" => match args {
            [name] => {
                core.vault.rotate(name)?;
                println!("rotated '{name}'");
            }
            _ => println!("usage: vault rotate <name>"),
        },
        other => println!("unknown vault action '{other}'"),
    }
    Ok(())
}

async fn status_value(core: &Arc<CoreOrchestrator>) -> serde_json::Value {
    use std::sync::atomic::Ordering;
    let mut pools = serde_json::Map::new();
    for (name, client) in core.clients.read().await.iter() {
        pools.insert(
            name.clone(),
            serde_json::to_value(client.pool().metrics()).unwrap_or_default(),
        );
    }
    serde_json::json!({
        "session": core.session,
        "bus": {
            "published": core.bus.counters.published.load(Ordering::Relaxed),
            "delivered": core.bus.counters.delivered.load(Ordering::Relaxed),
            "dropped": core.bus.counters.dropped.load(Ordering::Relaxed),
        },
        "enrichment": {
            "processed": core.pipeline.processed_count.load(Ordering::Relaxed),
            "skipped": core.pipeline.skipped_count.load(Ordering::Relaxed),
        },
        "vector_objects": core.vector.len().await,
        "pools": pools,
    })
}

fn render_module_panel(slot: &Arc<std::sync::Mutex<Option<serde_json::Value>>>) {
    let payload = slot.lock().expect("panel slot poisoned").take();
    if let Some(payload) = payload {
        if let Some(sections) = payload.get("sections").filter(|s| {
            s.as_object().map(|o| !o.is_empty()).unwrap_or(false)
        }) {
            println!("-- context ({})", payload["intent"].as_str().unwrap_or("?"));
            print!(
                "{}",
                output::render_value(sections, OutputFormat::Text)
            );
        }
    }
}

/// Parse positional CLI parameters for `query --param`.
pub fn parse_params(raw: &[String]) -> Vec<Param> {
    raw.iter().map(|r| Param::infer(r)).collect()
}
