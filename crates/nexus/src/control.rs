//! Line-oriented control surface over stdin.

use anyhow::{anyhow, bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

use nexus_workspace::{Coordinator, ProjectId, Session, SessionId, SessionUpdate, TabId};

const HELP: &str = "\
Commands:
  sessions [project]            List sessions
  new <project> <dir> [title]   Create a session and open it
  open <session>                Open or focus a session's tab
  rename <session> <title>      Rename a session
  delete <session>              Close and forget a session
  tabs                          List open tabs
  focus <n>                     Focus tab n
  close [n]                     Close tab n (default: focused)
  send <text>                   Type a line into the focused tab
  resize <cols> <rows>          Resize the focused tab
  quit                          Exit

Sessions can be referred to by a unique id prefix.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Sessions(Option<ProjectId>),
    New {
        project_id: ProjectId,
        working_directory: PathBuf,
        title: Option<String>,
    },
    Open(String),
    Rename {
        session: String,
        title: String,
    },
    Delete(String),
    Tabs,
    Focus(usize),
    Close(Option<usize>),
    Send(String),
    Resize {
        cols: u16,
        rows: u16,
    },
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    let Some((verb, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "sessions" | "ls" => Command::Sessions(non_empty(rest).map(ProjectId::from)),
        "new" => {
            let (project, rest) = split_word(rest).context("usage: new <project> <dir> [title]")?;
            let (dir, title) = split_word(rest).context("usage: new <project> <dir> [title]")?;
            Command::New {
                project_id: project.into(),
                working_directory: expand_home(dir),
                title: non_empty(title).map(str::to_string),
            }
        }
        "open" => Command::Open(required(rest, "usage: open <session>")?),
        "rename" => {
            let (session, title) = split_word(rest).context("usage: rename <session> <title>")?;
            let title = non_empty(title).context("usage: rename <session> <title>")?;
            Command::Rename {
                session: session.to_string(),
                title: title.to_string(),
            }
        }
        "delete" | "rm" => Command::Delete(required(rest, "usage: delete <session>")?),
        "tabs" => Command::Tabs,
        "focus" => Command::Focus(parse_index(rest)?.context("usage: focus <n>")?),
        "close" => Command::Close(parse_index(rest)?),
        "send" => Command::Send(rest.to_string()),
        "resize" => {
            let mut parts = rest.split_whitespace();
            let (Some(cols), Some(rows), None) = (parts.next(), parts.next(), parts.next()) else {
                bail!("usage: resize <cols> <rows>");
            };
            Command::Resize {
                cols: cols.parse().context("invalid column count")?,
                rows: rows.parse().context("invalid row count")?,
            }
        }
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}', try 'help'"),
    };
    Ok(Some(command))
}

fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((s, "")),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn required(s: &str, usage: &str) -> Result<String> {
    non_empty(s)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{usage}"))
}

/// 1-based tab index.
fn parse_index(s: &str) -> Result<Option<usize>> {
    let Some(s) = non_empty(s) else {
        return Ok(None);
    };
    let index: usize = s.parse().with_context(|| format!("invalid tab number '{s}'"))?;
    if index == 0 {
        bail!("tab numbers start at 1");
    }
    Ok(Some(index))
}

fn expand_home(dir: &str) -> PathBuf {
    match dir.strip_prefix('~') {
        Some("") => nexus_paths::home_dir(),
        Some(rest) if rest.starts_with('/') => {
            nexus_paths::home_dir().join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(dir),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Executes commands against a coordinator.
pub struct Controller {
    coordinator: Coordinator,
}

impl Controller {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    /// Run commands from `lines` until `quit` or end of input.
    pub async fn run(
        &self,
        mut lines: mpsc::UnboundedReceiver<String>,
        out: &mut impl Write,
    ) -> Result<()> {
        while let Some(line) = lines.recv().await {
            let flow = match parse(&line) {
                Ok(None) => Flow::Continue,
                Ok(Some(command)) => match self.execute(command, out).await {
                    Ok(flow) => flow,
                    Err(e) => {
                        writeln!(out, "error: {e:#}")?;
                        Flow::Continue
                    }
                },
                Err(e) => {
                    writeln!(out, "error: {e:#}")?;
                    Flow::Continue
                }
            };
            out.flush()?;
            if flow == Flow::Quit {
                break;
            }
        }
        Ok(())
    }

    pub async fn execute(&self, command: Command, out: &mut impl Write) -> Result<Flow> {
        let catalog = self.coordinator.catalog();
        match command {
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Sessions(project_id) => {
                let sessions = match project_id {
                    Some(project_id) => catalog.by_project(&project_id),
                    None => catalog.all(),
                };
                if sessions.is_empty() {
                    writeln!(out, "No sessions")?;
                }
                for session in sessions {
                    let open = if self.coordinator.tab_for_session(session.id).is_some() {
                        "open"
                    } else {
                        "    "
                    };
                    writeln!(
                        out,
                        "{}  {}  {:<12} {:<24} {}",
                        session.id,
                        open,
                        session.project_id,
                        session.title,
                        session.working_directory.display()
                    )?;
                }
            }
            Command::New {
                project_id,
                working_directory,
                title,
            } => {
                let opened = self
                    .coordinator
                    .open_new(project_id, working_directory, title.as_deref())
                    .await;
                writeln!(out, "Created session {} ({})", opened.session.id, opened.session.title)?;
                if opened.tab_id.is_some() {
                    self.print_tabs(out)?;
                }
            }
            Command::Open(reference) => {
                let session = self.resolve_session(&reference)?;
                if self.coordinator.open_existing(&session).await.is_some() {
                    self.print_tabs(out)?;
                }
            }
            Command::Rename { session, title } => {
                let session = self.resolve_session(&session)?;
                catalog
                    .update(
                        session.id,
                        SessionUpdate {
                            title: Some(title.clone()),
                        },
                    )
                    .await;
                writeln!(out, "Renamed {} to {}", session.id, title)?;
            }
            Command::Delete(reference) => {
                let session = self.resolve_session(&reference)?;
                if let Some(tab_id) = self.coordinator.tab_for_session(session.id) {
                    self.coordinator.close(&tab_id).await;
                }
                catalog.delete(session.id).await;
                writeln!(out, "Deleted session {}", session.id)?;
            }
            Command::Tabs => self.print_tabs(out)?,
            Command::Focus(index) => {
                let tab_id = self.tab_at(Some(index))?;
                self.coordinator.set_focus(&tab_id);
                self.print_tabs(out)?;
            }
            Command::Close(index) => {
                let tab_id = self.tab_at(index)?;
                self.coordinator.close(&tab_id).await;
                self.print_tabs(out)?;
            }
            Command::Send(text) => {
                let tab_id = self.tab_at(None)?;
                self.coordinator.write(&tab_id, format!("{text}\n").as_bytes())?;
            }
            Command::Resize { cols, rows } => {
                let tab_id = self.tab_at(None)?;
                self.coordinator.resize(&tab_id, cols, rows)?;
            }
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Exact id, or a unique id prefix.
    fn resolve_session(&self, reference: &str) -> Result<Session> {
        let catalog = self.coordinator.catalog();
        if let Ok(id) = reference.parse::<SessionId>() {
            return catalog
                .get(id)
                .ok_or_else(|| anyhow!("no session {id}"));
        }

        let mut matches = catalog
            .all()
            .into_iter()
            .filter(|session| session.id.to_string().starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some(session), None) => Ok(session),
            (None, _) => bail!("no session matches '{reference}'"),
            (Some(_), Some(_)) => bail!("'{reference}' matches more than one session"),
        }
    }

    /// Tab at a 1-based index, or the focused tab.
    fn tab_at(&self, index: Option<usize>) -> Result<TabId> {
        match index {
            Some(index) => {
                let tabs = self.coordinator.tabs();
                index
                    .checked_sub(1)
                    .and_then(|i| tabs.get(i))
                    .map(|tab| tab.id.clone())
                    .ok_or_else(|| anyhow!("no tab {index}"))
            }
            None => self.coordinator.focused().context("no tab has focus"),
        }
    }

    fn print_tabs(&self, out: &mut impl Write) -> Result<()> {
        let snapshot = self.coordinator.snapshot();
        if snapshot.tabs.is_empty() {
            writeln!(out, "No open tabs")?;
            return Ok(());
        }
        for (index, tab) in snapshot.tabs.iter().enumerate() {
            let focus = if snapshot.focused.as_ref() == Some(&tab.id) {
                '>'
            } else {
                ' '
            };
            let activity = if snapshot.generating.contains(&tab.id) {
                '*'
            } else {
                ' '
            };
            writeln!(
                out,
                "{focus}{activity} {}. {:<24} {}",
                index + 1,
                tab.title,
                tab.working_directory.display()
            )?;
        }
        Ok(())
    }
}
