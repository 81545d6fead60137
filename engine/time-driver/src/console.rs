//! Interactive console: status presenter and single-key controls

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::calendar::abs_time_to_ymdhms;
use crate::command::{Command, ControlInput};
use crate::rate::{ClockStatus, PauseStatus};
use crate::scheduler::ClockHandle;

/// Row the numeric prompt is drawn on, below the status frame
const PROMPT_ROW: u16 = 11;

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Something that can show the clock status
pub trait ConsoleSink: Send {
    fn render(&mut self, status: &ClockStatus);
}

/// Format a status frame
pub fn render_status(status: &ClockStatus) -> String {
    let calendar = abs_time_to_ymdhms(status.absolute_time)
        .map(|time| time.to_string())
        .unwrap_or_else(|| "----/--/--T--:--:--.--".to_string());
    let actual = status
        .actual_speed_up
        .map(|speed_up| format!("{speed_up:5.2}"))
        .unwrap_or_else(|| "  n/a".to_string());
    let state = match status.pause {
        PauseStatus::Playing => "playing".to_string(),
        PauseStatus::Pausing { target } => format!("pausing at tick {target}"),
        PauseStatus::Paused => "paused".to_string(),
    };

    format!(
        "TimeDriver:\n\
         \x20 tick = {}, absolute time = {:.6} = {}\n\
         \x20 real microseconds per tick = {}, attempted speed-up = {:5.2}, actual speed-up = {}\n\
         \x20 state = {}\n\
         \n\
         Press: 'p' to pause/unpause,\n\
         \x20      '+' to decrease delay by 2x,\n\
         \x20      '-' to increase delay by 2x,\n\
         \x20      'r' then seconds and Enter to run for a while,\n\
         \x20      'u' then absolute time and Enter to run until a time",
        status.tick_index,
        status.absolute_time,
        calendar,
        status.real_micros_per_tick,
        status.requested_speed_up,
        actual,
        state
    )
}

/// Renders status frames at the top of the terminal
#[derive(Default)]
pub struct TerminalConsole;

impl TerminalConsole {
    pub fn new() -> Self {
        Self
    }

    fn draw(frame: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for (row, line) in frame.lines().enumerate() {
            queue!(out, MoveTo(0, row as u16), Clear(ClearType::CurrentLine), Print(line))?;
        }
        out.flush()
    }
}

impl ConsoleSink for TerminalConsole {
    fn render(&mut self, status: &ClockStatus) {
        if let Err(e) = Self::draw(&render_status(status)) {
            debug!("Failed to draw console frame: {}", e);
        }
    }
}

/// Keeps the terminal in raw mode on an alternate screen; restores it on drop
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Keys the console reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Enter,
    Backspace,
    Escape,
    /// Ctrl+C; raw mode swallows the signal so the key is forwarded instead
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingVerb {
    Run,
    Until,
}

/// Turns console keys into control input.
///
/// `p` toggles pause, `+` and `-` halve and double the delay, `r` and `u` start reading a number
/// that Enter submits as RUN or UNTIL. Esc abandons the number.
#[derive(Debug, Default)]
pub struct KeyReader {
    pending: Option<(PendingVerb, String)>,
}

impl KeyReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, key: KeyInput) -> Option<ControlInput> {
        let Some((verb, buffer)) = self.pending.as_mut() else {
            return match key {
                KeyInput::Char('p' | 'P') => Some(ControlInput::Command(Command::Toggle)),
                KeyInput::Char('+') => Some(ControlInput::Command(Command::Decrease)),
                KeyInput::Char('-') => Some(ControlInput::Command(Command::Increase)),
                KeyInput::Char('r' | 'R') => {
                    self.pending = Some((PendingVerb::Run, String::new()));
                    None
                }
                KeyInput::Char('u' | 'U') => {
                    self.pending = Some((PendingVerb::Until, String::new()));
                    None
                }
                _ => None,
            };
        };

        match key {
            KeyInput::Char(c) if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E') => {
                buffer.push(c);
                None
            }
            KeyInput::Backspace => {
                buffer.pop();
                None
            }
            KeyInput::Escape => {
                self.pending = None;
                None
            }
            KeyInput::Enter => {
                let text = match verb {
                    PendingVerb::Run => format!("RUN {buffer}"),
                    PendingVerb::Until => format!("UNTIL {buffer}"),
                };
                self.pending = None;
                Some(ControlInput::Text(text))
            }
            _ => None,
        }
    }

    /// Prompt line while a number is being typed
    pub fn prompt(&self) -> Option<String> {
        self.pending.as_ref().map(|(verb, buffer)| match verb {
            PendingVerb::Run => format!("Run for how many seconds? {buffer}"),
            PendingVerb::Until => format!("Run until what absolute time? {buffer}"),
        })
    }
}

fn key_input(key: &KeyEvent) -> Option<KeyInput> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyInput::Interrupt)
        }
        KeyCode::Char(c) => Some(KeyInput::Char(c)),
        KeyCode::Enter => Some(KeyInput::Enter),
        KeyCode::Backspace => Some(KeyInput::Backspace),
        KeyCode::Esc => Some(KeyInput::Escape),
        _ => None,
    }
}

/// Text for the prompt row: the number being typed, else the last reply from the clock
fn prompt_line(reader: &KeyReader, last_reply: Option<&str>) -> Option<String> {
    reader.prompt().or_else(|| last_reply.map(|reply| format!("> {reply}")))
}

fn draw_prompt(prompt: Option<String>) -> io::Result<()> {
    let mut out = io::stdout().lock();
    queue!(out, MoveTo(0, PROMPT_ROW), Clear(ClearType::CurrentLine))?;
    if let Some(prompt) = prompt {
        queue!(out, Print(prompt))?;
    }
    out.flush()
}

/// Read console keys on a dedicated thread and forward them to the clock.
///
/// The thread exits when `stop` is set or the clock stops. Ctrl+C fires `interrupt` once.
pub fn spawn_key_listener(
    handle: ClockHandle,
    stop: Arc<AtomicBool>,
    interrupt: Option<oneshot::Sender<()>>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("console-keys".to_string()).spawn(move || {
        let mut reader = KeyReader::new();
        let mut interrupt = interrupt;
        let mut last_reply: Option<String> = None;

        while !stop.load(Ordering::Relaxed) {
            match event::poll(KEY_POLL_INTERVAL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("Console input failed: {}", e);
                    break;
                }
            }
            let key = match event::read() {
                Ok(Event::Key(key)) => key,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Console input failed: {}", e);
                    break;
                }
            };
            let Some(input) = key_input(&key) else {
                continue;
            };

            if input == KeyInput::Interrupt {
                if let Some(interrupt) = interrupt.take() {
                    let _ = interrupt.send(());
                }
                continue;
            }
            if let Some(control) = reader.feed(input) {
                match handle.blocking_request(control) {
                    Ok(reply) => last_reply = Some(reply),
                    Err(_) => {
                        debug!("Clock stopped, console listener exiting");
                        break;
                    }
                }
            }
            if let Err(e) = draw_prompt(prompt_line(&reader, last_reply.as_deref())) {
                debug!("Failed to draw console prompt: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(reader: &mut KeyReader, keys: &[KeyInput]) -> Vec<ControlInput> {
        keys.iter().filter_map(|key| reader.feed(*key)).collect()
    }

    #[test]
    fn test_single_keys() {
        let mut reader = KeyReader::new();
        let inputs = feed_all(
            &mut reader,
            &[KeyInput::Char('p'), KeyInput::Char('P'), KeyInput::Char('+'), KeyInput::Char('-')],
        );
        assert_eq!(
            inputs,
            vec![
                ControlInput::Command(Command::Toggle),
                ControlInput::Command(Command::Toggle),
                ControlInput::Command(Command::Decrease),
                ControlInput::Command(Command::Increase),
            ]
        );
        assert!(reader.feed(KeyInput::Char('x')).is_none());
    }

    #[test]
    fn test_run_reads_a_number() {
        let mut reader = KeyReader::new();
        let keys = [
            KeyInput::Char('r'),
            KeyInput::Char('1'),
            KeyInput::Char('2'),
            KeyInput::Char('p'),
            KeyInput::Char('9'),
            KeyInput::Backspace,
            KeyInput::Char('.'),
            KeyInput::Char('5'),
        ];
        assert!(feed_all(&mut reader, &keys).is_empty());
        assert_eq!(reader.prompt().unwrap(), "Run for how many seconds? 12.5");
        assert_eq!(reader.feed(KeyInput::Enter), Some(ControlInput::Text("RUN 12.5".to_string())));
        assert!(reader.prompt().is_none());
    }

    #[test]
    fn test_until_and_escape() {
        let mut reader = KeyReader::new();
        feed_all(&mut reader, &[KeyInput::Char('U'), KeyInput::Char('4'), KeyInput::Escape]);
        assert!(reader.prompt().is_none());

        let inputs = feed_all(
            &mut reader,
            &[KeyInput::Char('u'), KeyInput::Char('1'), KeyInput::Char('e'), KeyInput::Char('3'), KeyInput::Enter],
        );
        assert_eq!(inputs, vec![ControlInput::Text("UNTIL 1e3".to_string())]);
    }

    #[test]
    fn test_prompt_row_shows_last_reply() {
        let mut reader = KeyReader::new();
        assert!(prompt_line(&reader, None).is_none());

        // An empty number still goes to the clock and comes back rejected
        let inputs = feed_all(&mut reader, &[KeyInput::Char('r'), KeyInput::Enter]);
        assert_eq!(inputs, vec![ControlInput::Text("RUN ".to_string())]);
        assert_eq!(
            prompt_line(&reader, Some(crate::command::INVALID_COMMAND_REPLY)).unwrap(),
            "> INVALID COMMAND! (Try HELP)"
        );

        reader.feed(KeyInput::Char('u'));
        assert_eq!(
            prompt_line(&reader, Some("RUN")).unwrap(),
            "Run until what absolute time? "
        );
    }

    #[test]
    fn test_render_status() {
        let status = ClockStatus {
            tick_index: 42,
            display_tick_index: 50,
            pause: PauseStatus::Pausing { target: 100 },
            sim_micros_per_tick: 10_000,
            real_micros_per_tick: 5_000,
            absolute_time: 0.42,
            requested_speed_up: 2.0,
            actual_speed_up: Some(1.98),
        };
        let frame = render_status(&status);
        assert!(frame.contains("tick = 42"));
        assert!(frame.contains("2000/01/01T12:00:00.42"));
        assert!(frame.contains("real microseconds per tick = 5000"));
        assert!(frame.contains("attempted speed-up =  2.00"));
        assert!(frame.contains("actual speed-up =  1.98"));
        assert!(frame.contains("pausing at tick 100"));
        assert!(frame.lines().count() < PROMPT_ROW as usize);
    }

    #[test]
    fn test_render_status_without_measurement() {
        let frame = render_status(&ClockStatus::default());
        assert!(frame.contains("actual speed-up =   n/a"));
        assert!(frame.contains("state = playing"));
    }
}
