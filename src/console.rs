//! Diagnostic console: a serial-backed `fmt::Write` sink plus the in-band
//! colour escape codes used by the kernel's `dbg!`/`println!` call sites.
//!
//! Escape protocol: byte `14` marks the next colour byte as
//! a foreground change, byte `15` marks it as a background change, and
//! colour bytes `16..=31` index the 16-colour VGA palette. Every other byte
//! is printed literally. A real VGA text-mode console is an external
//! collaborator; this module only decodes the escapes
//! before handing bytes to whatever backing port is wired in.

use core::fmt;
use spin::Mutex;
use volatile::Volatile;

pub const ESC_SET_FOREGROUND: u8 = 14;
pub const ESC_SET_BACKGROUND: u8 = 15;
pub const COLOR_BASE: u8 = 16;
pub const COLOR_MAX: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogLevel(pub u8);

impl LogLevel {
    pub const ALERT: LogLevel = LogLevel(0);
    pub const CRITICAL: LogLevel = LogLevel(1);
    pub const ERROR: LogLevel = LogLevel(2);
    pub const WARNING: LogLevel = LogLevel(3);
    pub const INFO: LogLevel = LogLevel(4);
    pub const DEBUG: LogLevel = LogLevel(5);
}

/// Port 0x3F8 (COM1) data register on the boot CPU, wrapped so reads/writes
/// are never reordered or elided by the optimizer.
struct SerialPort {
    addr: usize,
}

unsafe impl Send for SerialPort {}

impl SerialPort {
    const fn new(addr: usize) -> Self {
        SerialPort { addr }
    }

    fn write_byte(&mut self, byte: u8) {
        let reg: &mut u8 = unsafe { &mut *(self.addr as *mut u8) };
        Volatile::new(reg).write(byte);
    }
}

/// Decodes the escape protocol and writes literal bytes to `sink`.
pub struct EscapeDecoder<'a, W: fmt::Write> {
    sink: &'a mut W,
    pending: Option<EscapeKind>,
}

#[derive(Clone, Copy)]
enum EscapeKind {
    Foreground,
    Background,
}

impl<'a, W: fmt::Write> EscapeDecoder<'a, W> {
    pub fn new(sink: &'a mut W) -> Self {
        EscapeDecoder { sink, pending: None }
    }

    pub fn feed_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.feed_byte(byte)?;
        }
        Ok(())
    }

    fn feed_byte(&mut self, byte: u8) -> fmt::Result {
        if let Some(kind) = self.pending.take() {
            if (COLOR_BASE..=COLOR_MAX).contains(&byte) {
                self.apply_color(kind, byte - COLOR_BASE);
                return Ok(());
            }
            // Not a colour byte after all; fall through and print it.
        }

        match byte {
            ESC_SET_FOREGROUND => self.pending = Some(EscapeKind::Foreground),
            ESC_SET_BACKGROUND => self.pending = Some(EscapeKind::Background),
            _ => {
                let ch = byte as char;
                let mut buf = [0u8; 4];
                self.sink.write_str(ch.encode_utf8(&mut buf))?;
            }
        }
        Ok(())
    }

    fn apply_color(&mut self, _kind: EscapeKind, _palette_index: u8) {
        // A real VGA console would latch the attribute byte here; over a
        // plain serial line there is nothing to latch, so the escape is
        // simply consumed without emitting anything.
    }
}

struct Writer(SerialPort);

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Writer> = Mutex::new(Writer(SerialPort::new(0x3F8)));

pub fn init() {
    // 16550 init sequence elided: baud divisor / line control registers are
    // hardware-mandated constants, not something this crate redesigns.
}

pub fn _print(args: fmt::Arguments) {
    use alloc::string::String;
    use core::fmt::Write;

    let mut rendered = String::new();
    let _ = rendered.write_fmt(args);

    let mut console = CONSOLE.lock();
    let mut decoder = EscapeDecoder::new(&mut *console);
    let _ = decoder.feed_str(&rendered);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
