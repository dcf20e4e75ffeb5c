//! Terminal handling for the VM's memory-mapped keyboard and TTY.
//!
//! On a real terminal the VM wants non-canonical, no-echo, non-blocking
//! input; original settings must come back on every exit path. Raw mode is
//! scoped to a guard value, and Ctrl-C restores the terminal before exiting.

use std::io::{self, Read};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;

/// Scoped raw-mode switch. Does nothing when stdin is not a terminal, so
/// piped input behaves like a plain file.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn new() -> Self {
        let wants_raw =
            io::stdin().is_tty() && !terminal::is_raw_mode_enabled().is_ok_and(|is| is);
        let active = wants_raw && terminal::enable_raw_mode().is_ok();
        RawModeGuard { active }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = terminal::disable_raw_mode();
        }
    }
}

impl Default for RawModeGuard {
    fn default() -> Self {
        RawModeGuard::new()
    }
}

pub fn is_raw_mode() -> bool {
    terminal::is_raw_mode_enabled().is_ok_and(|is| is)
}

/// One-byte keyboard queue behind the MMIO cells.
///
/// A status poll refills the queue without blocking; a data read drains it.
/// Terminal input comes from key events; piped input is read a byte at a
/// time straight from stdin (EOF yields nothing).
#[derive(Debug)]
pub struct Keyboard {
    pending: Option<u8>,
    tty: bool,
}

impl Keyboard {
    pub fn new() -> Self {
        Keyboard {
            pending: None,
            tty: io::stdin().is_tty(),
        }
    }

    /// Whether a byte is available. Refills the queue.
    pub fn poll(&mut self) -> bool {
        self.fill();
        self.pending.is_some()
    }

    /// Pop the buffered byte, or 0x00 when none is available.
    pub fn take(&mut self) -> u8 {
        self.fill();
        self.pending.take().unwrap_or(0x00)
    }

    fn fill(&mut self) {
        if self.pending.is_some() {
            return;
        }
        self.pending = if self.tty {
            poll_key_byte()
        } else {
            read_stdin_byte()
        };
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard::new()
    }
}

/// Drain pending terminal events until one maps to an ASCII byte, without
/// blocking. Caller must have put the terminal in raw mode.
fn poll_key_byte() -> Option<u8> {
    while event::poll(Duration::ZERO).unwrap_or(false) {
        let Ok(ev) = event::read() else {
            return None;
        };
        if let Event::Key(key) = ev {
            if let Some(byte) = key_byte(key) {
                return Some(byte);
            }
        }
    }
    None
}

fn key_byte(key: KeyEvent) -> Option<u8> {
    if matches!(key.kind, KeyEventKind::Release) {
        return None;
    }

    match (key.modifiers, key.code) {
        // Ctrl+C: restore the terminal before leaving
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
            let _ = terminal::disable_raw_mode();
            println!();
            std::process::exit(0);
        }

        (_, KeyCode::Enter) | (_, KeyCode::Char('\n')) => Some(b'\n'),
        (_, KeyCode::Tab) => Some(b'\t'),
        (_, KeyCode::Backspace) => Some(0x08),
        (_, KeyCode::Esc) => Some(0x1B),

        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) if ch.is_ascii() => {
            Some(ch as u8)
        }

        _ => None,
    }
}

fn read_stdin_byte() -> Option<u8> {
    let mut buf = [0u8; 1];
    match io::stdin().read(&mut buf) {
        Ok(1) => Some(buf[0]),
        _ => None,
    }
}
