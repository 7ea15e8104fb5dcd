//! Line-oriented presentation layer over the session engine.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

use iris_core::attachments::{mime_from_name, FileInfo};
use iris_core::{ExchangeOutcome, Message, MessagePart, MessageId, Role, SessionEvent};
use iris_engine::{SessionEngine, StreamHandle};
use iris_store::StoreState;

const HELP: &str = "\
commands:
  <text>                      send a message
  /new                        start a new thread
  /threads                    list threads
  /switch N                   make thread N current
  /history                    show the current thread
  /edit N text                rewrite message N and regenerate
  /regen [N]                  regenerate message N (default: last reply)
  /delete N                   delete message N
  /delete-from N              delete message N and everything after it
  /stop                       stop the active reply
  /search query               search titles and messages
  /project                    list projects
  /project new NAME           create a project
  /project rename N NAME      rename project N
  /project delete N           delete project N
  /project assign N|none      move the current thread
  /project filter N|none      limit threads and search to a project
  /attach PATH...             stage files for the next message
  /drafts                     list staged files
  /unattach N                 unstage file N
  /help                       this text
  /quit                       exit
Ctrl-C while a reply streams stops it.";

/// One parsed input line. Indexes are 1-based as displayed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    New,
    Threads,
    Switch(usize),
    History,
    Edit(usize, String),
    Regen(Option<usize>),
    Delete(usize),
    DeleteFrom(usize),
    Stop,
    Search(String),
    ProjectList,
    ProjectNew(String),
    ProjectRename(usize, String),
    ProjectDelete(usize),
    ProjectAssign(Option<usize>),
    ProjectFilter(Option<usize>),
    Attach(Vec<String>),
    Drafts,
    Unattach(usize),
    Help,
    Quit,
    Invalid(String),
}

/// Parse a line of input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ReplCommand::Send(line.to_string()));
    };

    let (name, args) = split_word(rest);
    let cmd = match name {
        "new" => ReplCommand::New,
        "threads" => ReplCommand::Threads,
        "switch" => index_arg(args, "/switch N").map_or_else(ReplCommand::Invalid, ReplCommand::Switch),
        "history" => ReplCommand::History,
        "edit" => {
            let (n, text) = split_word(args);
            match (parse_index(n), text.is_empty()) {
                (Some(n), false) => ReplCommand::Edit(n, text.to_string()),
                _ => ReplCommand::Invalid("usage: /edit N text".into()),
            }
        }
        "regen" if args.is_empty() => ReplCommand::Regen(None),
        "regen" => index_arg(args, "/regen [N]").map_or_else(ReplCommand::Invalid, |n| ReplCommand::Regen(Some(n))),
        "delete" => index_arg(args, "/delete N").map_or_else(ReplCommand::Invalid, ReplCommand::Delete),
        "delete-from" => index_arg(args, "/delete-from N").map_or_else(ReplCommand::Invalid, ReplCommand::DeleteFrom),
        "stop" => ReplCommand::Stop,
        "search" if args.is_empty() => ReplCommand::Invalid("usage: /search query".into()),
        "search" => ReplCommand::Search(args.to_string()),
        "project" => parse_project(args),
        "attach" if args.is_empty() => ReplCommand::Invalid("usage: /attach PATH...".into()),
        "attach" => ReplCommand::Attach(args.split_whitespace().map(str::to_string).collect()),
        "drafts" => ReplCommand::Drafts,
        "unattach" => index_arg(args, "/unattach N").map_or_else(ReplCommand::Invalid, ReplCommand::Unattach),
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("unknown command /{other}, try /help")),
    };
    Some(cmd)
}

fn parse_project(args: &str) -> ReplCommand {
    let (sub, rest) = split_word(args);
    match sub {
        "" => ReplCommand::ProjectList,
        "new" if !rest.is_empty() => ReplCommand::ProjectNew(rest.to_string()),
        "rename" => {
            let (n, name) = split_word(rest);
            match (parse_index(n), name.is_empty()) {
                (Some(n), false) => ReplCommand::ProjectRename(n, name.to_string()),
                _ => ReplCommand::Invalid("usage: /project rename N NAME".into()),
            }
        }
        "delete" => index_arg(rest, "/project delete N").map_or_else(ReplCommand::Invalid, ReplCommand::ProjectDelete),
        "assign" => optional_index(rest, "/project assign N|none")
            .map_or_else(ReplCommand::Invalid, ReplCommand::ProjectAssign),
        "filter" => optional_index(rest, "/project filter N|none")
            .map_or_else(ReplCommand::Invalid, ReplCommand::ProjectFilter),
        _ => ReplCommand::Invalid("usage: /project [new|rename|delete|assign|filter] ...".into()),
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn parse_index(s: &str) -> Option<usize> {
    s.parse::<usize>().ok().filter(|n| *n >= 1)
}

fn index_arg(args: &str, usage: &str) -> Result<usize, String> {
    parse_index(args.trim()).ok_or_else(|| format!("usage: {usage}"))
}

fn optional_index(args: &str, usage: &str) -> Result<Option<usize>, String> {
    match args.trim() {
        "none" => Ok(None),
        other => parse_index(other).map(Some).ok_or_else(|| format!("usage: {usage}")),
    }
}

pub fn render_message(state: &StoreState, message: &Message) -> String {
    let role = match message.role {
        Role::User => "you",
        Role::Assistant => "iris",
        Role::System => "system",
        Role::Tool => "tool",
    };
    let mut body = String::new();
    for part in &message.parts {
        match part {
            MessagePart::Text { text } => body.push_str(text),
            MessagePart::Code { language, code } => {
                body.push_str(&format!("\n```{}\n{code}\n```\n", language.as_deref().unwrap_or("")));
            }
            MessagePart::Attachment { attachment_id } => {
                let name = state
                    .attachments
                    .get(attachment_id)
                    .map_or("unknown file", |a| a.name.as_str());
                body.push_str(&format!(" [{name}]"));
            }
        }
    }
    if message.truncated {
        body.push_str(" [truncated]");
    }
    format!("{role}: {body}")
}

pub struct Repl {
    engine: SessionEngine,
}

impl Repl {
    pub fn new(engine: SessionEngine) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        println!("{HELP}\n");
        self.print_history();

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                println!();
                break;
            };
            let Some(cmd) = parse_command(&line) else {
                continue;
            };
            if cmd == ReplCommand::Quit {
                break;
            }
            self.dispatch(cmd).await?;
        }
        self.engine.stop();
        Ok(())
    }

    async fn dispatch(&self, cmd: ReplCommand) -> Result<()> {
        match cmd {
            ReplCommand::Send(text) => {
                let events = self.engine.subscribe();
                match self.engine.send(&text) {
                    Ok(handle) => self.follow(handle, events).await?,
                    Err(e) => println!("{e}"),
                }
            }
            ReplCommand::New => {
                self.engine.new_thread(None);
                println!("new thread started");
            }
            ReplCommand::Threads => self.print_threads(),
            ReplCommand::Switch(n) => {
                let id = self.engine.store().read(|s| s.visible_threads().nth(n - 1).map(|t| t.id.clone()));
                match id {
                    Some(id) => {
                        self.engine.set_current_thread(&id)?;
                        self.print_history();
                    }
                    None => println!("no thread {n}"),
                }
            }
            ReplCommand::History => self.print_history(),
            ReplCommand::Edit(n, text) => {
                let Some(id) = self.message_at(n) else {
                    println!("no message {n}");
                    return Ok(());
                };
                let events = self.engine.subscribe();
                match self.engine.edit_message(&id, &text)? {
                    Some(handle) => self.follow(handle, events).await?,
                    None => println!("message {n} is not one of yours"),
                }
            }
            ReplCommand::Regen(n) => {
                let events = self.engine.subscribe();
                let started = match n {
                    None => self.engine.regenerate_last()?,
                    Some(n) => match self.message_at(n) {
                        Some(id) => self.engine.regenerate_message(&id)?,
                        None => {
                            println!("no message {n}");
                            return Ok(());
                        }
                    },
                };
                match started {
                    Some(handle) => self.follow(handle, events).await?,
                    None => println!("nothing to regenerate"),
                }
            }
            ReplCommand::Delete(n) => match self.message_at(n) {
                Some(id) if self.engine.delete_message(&id) => println!("deleted message {n}"),
                _ => println!("no message {n}"),
            },
            ReplCommand::DeleteFrom(n) => match self.message_at(n) {
                Some(id) => println!("deleted {} messages", self.engine.delete_from_here(&id)),
                None => println!("no message {n}"),
            },
            ReplCommand::Stop => {
                if !self.engine.stop() {
                    println!("nothing is streaming");
                }
            }
            ReplCommand::Search(query) => {
                let hits = self.engine.search(&query);
                if hits.is_empty() {
                    println!("no matches");
                }
                for hit in hits {
                    match hit.snippet {
                        Some(snippet) => println!("{}: {snippet}", hit.thread_title),
                        None => println!("{} (title)", hit.thread_title),
                    }
                }
            }
            ReplCommand::ProjectList => self.print_projects(),
            ReplCommand::ProjectNew(name) => {
                self.engine.create_project(&name);
                println!("created project {name}");
            }
            ReplCommand::ProjectRename(n, name) => match self.project_at(n) {
                Some(id) => self.engine.rename_project(&id, &name)?,
                None => println!("no project {n}"),
            },
            ReplCommand::ProjectDelete(n) => match self.project_at(n) {
                Some(id) => {
                    let detached = self.engine.delete_project(&id)?;
                    println!("deleted project, {detached} threads detached");
                }
                None => println!("no project {n}"),
            },
            ReplCommand::ProjectAssign(n) => {
                let Some(thread_id) = self.engine.store().current_thread_id() else {
                    println!("no current thread");
                    return Ok(());
                };
                match n.map(|n| self.project_at(n).ok_or(n)).transpose() {
                    Ok(project) => self.engine.assign_thread_to_project(&thread_id, project.as_ref())?,
                    Err(n) => println!("no project {n}"),
                }
            }
            ReplCommand::ProjectFilter(n) => match n.map(|n| self.project_at(n).ok_or(n)).transpose() {
                Ok(project) => self.engine.set_project_filter(project.as_ref())?,
                Err(n) => println!("no project {n}"),
            },
            ReplCommand::Attach(paths) => {
                let mut files = Vec::with_capacity(paths.len());
                for path in &paths {
                    match file_info(Path::new(path)).await {
                        Ok(info) => files.push(info),
                        Err(e) => println!("{path}: {e}"),
                    }
                }
                let added = self.engine.add_draft_files(&files);
                println!("staged {} of {} files", added.len(), paths.len());
            }
            ReplCommand::Drafts => {
                let drafts = self.engine.draft_files();
                if drafts.is_empty() {
                    println!("no staged files");
                }
                for (i, a) in drafts.iter().enumerate() {
                    println!("{:>3}. {} ({}, {} bytes)", i + 1, a.name, a.mime, a.size);
                }
            }
            ReplCommand::Unattach(n) => {
                let id = self.engine.draft_files().get(n - 1).map(|a| a.id.clone());
                match id {
                    Some(id) if self.engine.remove_draft_file(&id) => println!("unstaged file {n}"),
                    _ => println!("no staged file {n}"),
                }
            }
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => {}
            ReplCommand::Invalid(msg) => println!("{msg}"),
        }
        Ok(())
    }

    /// Print the reply as it grows until the exchange settles. Ctrl-C stops it.
    async fn follow(&self, handle: StreamHandle, mut events: broadcast::Receiver<SessionEvent>) -> Result<()> {
        let mut printed = 0;
        print!("iris: ");
        std::io::stdout().flush()?;

        let outcome = loop {
            tokio::select! {
                outcome = handle.wait() => break outcome,
                event = events.recv() => match event {
                    Ok(SessionEvent::ContentUpdated { message_id, .. }) if message_id == handle.message_id => {
                        printed = self.print_delta(&handle.message_id, printed)?;
                    }
                    Err(RecvError::Lagged(_)) => {
                        printed = self.print_delta(&handle.message_id, printed)?;
                    }
                    _ => {}
                },
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        self.engine.stop();
                    }
                }
            }
        };
        self.print_delta(&handle.message_id, printed)?;
        println!();

        match outcome {
            ExchangeOutcome::Completed => {}
            ExchangeOutcome::Cancelled => println!("[stopped]"),
            ExchangeOutcome::Failed { error } => {
                tracing::warn!(%error, "exchange failed");
                let notice = self.engine.store().read(|s| {
                    s.messages(&handle.thread_id)
                        .last()
                        .filter(|m| m.role == Role::System)
                        .map(Message::text_content)
                });
                if let Some(notice) = notice {
                    println!("{notice}");
                }
            }
        }
        Ok(())
    }

    fn print_delta(&self, message_id: &MessageId, printed: usize) -> Result<usize> {
        let text = self
            .engine
            .store()
            .read(|s| s.message(message_id).map(Message::text_content))
            .unwrap_or_default();
        if let Some(delta) = text.get(printed..) {
            let mut out = std::io::stdout();
            out.write_all(delta.as_bytes())?;
            out.flush()?;
            return Ok(text.len());
        }
        Ok(printed)
    }

    fn print_history(&self) {
        self.engine.store().read(|s| {
            let Some(thread) = s.current_thread() else {
                println!("no current thread, /new starts one");
                return;
            };
            println!("── {} ──", thread.title);
            for (i, m) in s.messages(&thread.id).iter().enumerate() {
                println!("{:>3}. {}", i + 1, render_message(s, m));
            }
        });
    }

    fn print_threads(&self) {
        self.engine.store().read(|s| {
            for (i, t) in s.visible_threads().enumerate() {
                let marker = if s.current_thread_id.as_ref() == Some(&t.id) { '*' } else { ' ' };
                let project = t
                    .project_id
                    .as_ref()
                    .and_then(|p| s.project(p))
                    .map(|p| format!(" [{}]", p.name))
                    .unwrap_or_default();
                let count = s.messages(&t.id).len();
                println!("{marker}{:>3}. {}{project} ({count} messages)", i + 1, t.title);
            }
        });
    }

    fn print_projects(&self) {
        self.engine.store().read(|s| {
            if s.projects.is_empty() {
                println!("no projects");
            }
            for (i, p) in s.projects.iter().enumerate() {
                let marker = if s.project_filter.as_ref() == Some(&p.id) { '*' } else { ' ' };
                println!("{marker}{:>3}. {}", i + 1, p.name);
            }
        });
    }

    fn message_at(&self, n: usize) -> Option<MessageId> {
        self.engine.store().read(|s| {
            let tid = s.current_thread_id.as_ref()?;
            s.messages(tid).get(n - 1).map(|m| m.id.clone())
        })
    }

    fn project_at(&self, n: usize) -> Option<iris_core::ProjectId> {
        self.engine
            .store()
            .read(|s| s.projects.get(n - 1).map(|p| p.id.clone()))
    }
}

async fn file_info(path: &Path) -> std::io::Result<FileInfo> {
    let meta = tokio::fs::metadata(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime = mime_from_name(&name);
    Ok(FileInfo::new(name, mime, meta.len()))
}
