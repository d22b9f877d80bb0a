//! Terminal front end: the single consumer of [`Notification`]s plus a
//! line-based command reader on stdin.

use std::io::{self, BufRead};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::presenter::{Notification, PresenterHandle, Request, Severity};

const HELP: &str = "commands: now yes | target <address> | show | hide | quit";

/// Presentation state. Lives on the console thread only.
#[derive(Debug)]
pub struct ConsoleView {
    visible: bool,
    last_status: Option<(String, Severity)>,
}

impl ConsoleView {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            last_status: None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn apply(&mut self, notification: Notification, out: &mut dyn WriteColor) -> io::Result<()> {
        match notification {
            Notification::Status { text, severity } => {
                let changed = self
                    .last_status
                    .as_ref()
                    .is_none_or(|(last, _)| *last != text);
                self.last_status = Some((text, severity));
                if self.visible && changed {
                    self.print_status(out)?;
                }
            }
            Notification::CountdownTick {
                remaining_secs,
                command,
            } => {
                line(
                    out,
                    Some(Color::Red),
                    true,
                    &format!("network down! running `{command}` in {remaining_secs}s"),
                )?;
            }
            Notification::AlarmCleared => {
                line(out, Some(Color::Green), true, "network back, countdown stopped")?;
            }
            Notification::Foreground => {
                self.visible = true;
                self.print_status(out)?;
            }
            Notification::Hide => {
                if self.visible {
                    line(out, None, false, "(status hidden, type `show` to bring it back)")?;
                }
                self.visible = false;
            }
            Notification::TargetUpdated {
                address,
                reachable,
                saved,
            } => match saved {
                Ok(()) if reachable => {
                    line(out, Some(Color::Green), false, &format!("test passed, target saved: {address}"))?
                }
                Ok(()) => line(
                    out,
                    Some(Color::Yellow),
                    false,
                    &format!("target saved, but {address} does not answer right now"),
                )?,
                Err(e) => line(
                    out,
                    Some(Color::Red),
                    false,
                    &format!("now monitoring {address}, but saving failed: {e}"),
                )?,
            },
        }
        Ok(())
    }

    fn print_status(&self, out: &mut dyn WriteColor) -> io::Result<()> {
        let Some((text, severity)) = &self.last_status else {
            return Ok(());
        };
        let (color, marker) = match severity {
            Severity::Normal => (Color::Green, '●'),
            Severity::Warning => (Color::Yellow, '○'),
            Severity::Alert => (Color::Red, '!'),
        };
        line(out, Some(color), false, &format!("{marker} {text}"))
    }
}

fn line(out: &mut dyn WriteColor, color: Option<Color>, bold: bool, text: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(color).set_bold(bold))?;
    write!(out, "{text}")?;
    out.reset()?;
    writeln!(out)
}

/// Run the presentation loop on its own thread until every sender is gone.
pub fn spawn_presenter(rx: Receiver<Notification>, visible: bool) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let mut view = ConsoleView::new(visible);
            let mut stdout = StandardStream::stdout(ColorChoice::Auto);
            for notification in rx {
                if let Err(e) = view.apply(notification, &mut stdout) {
                    log::debug!("console write failed: {e}");
                }
            }
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    RunNow { confirmed: bool },
    Target(String),
    Show,
    Hide,
    Quit,
    Help,
}

pub fn parse_command(input: &str) -> Option<ConsoleCommand> {
    let mut parts = input.split_whitespace();
    let verb = parts.next()?;
    let rest: Vec<&str> = parts.collect();
    let cmd = match (verb.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("now", []) => ConsoleCommand::RunNow { confirmed: false },
        ("now", ["yes"]) => ConsoleCommand::RunNow { confirmed: true },
        ("target", [address]) => ConsoleCommand::Target((*address).to_string()),
        ("show" | "status", []) => ConsoleCommand::Show,
        ("hide", []) => ConsoleCommand::Hide,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => ConsoleCommand::Help,
    };
    Some(cmd)
}

/// Read commands from stdin and forward them to the watchdog or the view.
///
/// The thread is detached: a blocked stdin read must not hold up shutdown.
pub fn spawn_command_reader(
    presenter: PresenterHandle,
    requests: mpsc::Sender<Request>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            let stdin = io::stdin();
            for input in stdin.lock().lines() {
                let Ok(input) = input else { break };
                let Some(cmd) = parse_command(&input) else { continue };
                let request = match cmd {
                    ConsoleCommand::RunNow { confirmed: false } => {
                        println!("this runs the configured action immediately; type `now yes` to confirm");
                        continue;
                    }
                    ConsoleCommand::RunNow { confirmed: true } => Request::RunActionNow,
                    ConsoleCommand::Target(address) => Request::UpdateTarget(address),
                    ConsoleCommand::Show => {
                        presenter.post(Notification::Foreground);
                        continue;
                    }
                    ConsoleCommand::Hide => {
                        presenter.post(Notification::Hide);
                        continue;
                    }
                    ConsoleCommand::Quit => {
                        shutdown.cancel();
                        break;
                    }
                    ConsoleCommand::Help => {
                        println!("{HELP}");
                        continue;
                    }
                };
                if requests.blocking_send(request).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}
