//! Terminal renderer for engine events.

use std::io::{stdout, Write};

use crossterm::{
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    ExecutableCommand,
};
use tracing::warn;

use super::{BusError, Event, EventReceiver};
use crate::listener::ListenerStatus;
use crate::streams::{Message, Stream};

/// Render style configuration.
#[derive(Debug, Clone)]
pub struct RenderStyle {
    pub stream_color: Color,
    pub id_color: Color,
    pub content_color: Color,
    pub ok_color: Color,
    pub warning_color: Color,
    pub error_color: Color,
    pub stopped_color: Color,
    /// Emit colour escapes at all.
    pub colored: bool,
    /// Print message fields under each appended message.
    pub show_content: bool,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            stream_color: Color::Cyan,
            id_color: Color::DarkGrey,
            content_color: Color::White,
            ok_color: Color::Green,
            warning_color: Color::Yellow,
            error_color: Color::Red,
            stopped_color: Color::DarkGrey,
            colored: true,
            show_content: true,
        }
    }
}

impl RenderStyle {
    /// Style without colour escapes.
    pub fn plain() -> Self {
        Self {
            colored: false,
            ..Self::default()
        }
    }

    fn status_color(&self, status: ListenerStatus) -> Color {
        match status {
            ListenerStatus::Ok => self.ok_color,
            ListenerStatus::Warning => self.warning_color,
            ListenerStatus::Error => self.error_color,
            ListenerStatus::Stopped => self.stopped_color,
        }
    }
}

/// How events are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// One readable line per event.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Writes events to the terminal.
pub struct TerminalRenderer {
    style: RenderStyle,
    mode: RenderMode,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self {
            style: RenderStyle::default(),
            mode: RenderMode::Text,
        }
    }

    pub fn with_style(style: RenderStyle) -> Self {
        Self {
            style,
            mode: RenderMode::Text,
        }
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Render an event to stdout.
    pub fn render(&self, event: &Event) -> std::io::Result<()> {
        let mut out = stdout().lock();
        self.render_to(&mut out, event)?;
        out.flush()
    }

    /// Render an event to `out`.
    pub fn render_to<W: Write>(&self, out: &mut W, event: &Event) -> std::io::Result<()> {
        if self.mode == RenderMode::Json {
            serde_json::to_writer(&mut *out, event)?;
            return writeln!(out);
        }

        match event {
            Event::StreamDiscovered { stream } => self.render_discovered(out, stream),
            Event::MessageAppended { stream, message } => {
                self.render_message(out, stream, message)
            }
            Event::ListenerDiscovered { listener } => {
                self.label(out, "listener ")?;
                self.colored(out, self.style.stream_color, &listener.name)?;
                out.write_all(b" ")?;
                self.colored(out, self.style.status_color(listener.status), &listener.status.to_string())?;
                out.write_all(b"\n")
            }
            Event::ListenerStatusChanged {
                listener,
                last_output,
            } => {
                self.label(out, "listener ")?;
                self.colored(out, self.style.stream_color, &listener.name)?;
                out.write_all(b" ")?;
                self.colored(out, self.style.status_color(listener.status), &listener.status.to_string())?;
                writeln!(out, " {}", last_output)
            }
        }
    }

    /// Render a free-form notice such as "Listening is not available".
    pub fn render_notice<W: Write>(&self, out: &mut W, text: &str) -> std::io::Result<()> {
        if self.mode == RenderMode::Json {
            serde_json::to_writer(&mut *out, &serde_json::json!({ "notice": text }))?;
            return writeln!(out);
        }
        self.colored(out, self.style.warning_color, text)?;
        out.write_all(b"\n")
    }

    fn render_discovered<W: Write>(&self, out: &mut W, stream: &Stream) -> std::io::Result<()> {
        self.label(out, "stream ")?;
        self.bold(out, self.style.stream_color, &stream.name)?;
        out.write_all(b"\n")
    }

    fn render_message<W: Write>(
        &self,
        out: &mut W,
        stream: &Stream,
        message: &Message,
    ) -> std::io::Result<()> {
        self.colored(out, self.style.stream_color, &stream.name)?;
        out.write_all(b" ")?;
        self.colored(out, self.style.id_color, &message.id.to_string())?;
        writeln!(out, " - messages count: {}", stream.message_count)?;

        if self.style.show_content {
            let content = message.render_content();
            for line in content.lines() {
                self.colored(out, self.style.content_color, &format!("    {}", line))?;
                out.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    fn label<W: Write>(&self, out: &mut W, text: &str) -> std::io::Result<()> {
        self.colored(out, Color::DarkGrey, text)
    }

    fn colored<W: Write>(&self, out: &mut W, color: Color, text: &str) -> std::io::Result<()> {
        if !self.style.colored {
            return out.write_all(text.as_bytes());
        }
        out.execute(SetForegroundColor(color))?
            .execute(Print(text))?
            .execute(ResetColor)?;
        Ok(())
    }

    fn bold<W: Write>(&self, out: &mut W, color: Color, text: &str) -> std::io::Result<()> {
        if !self.style.colored {
            return out.write_all(text.as_bytes());
        }
        out.execute(SetAttribute(Attribute::Bold))?;
        self.colored(out, color, text)?;
        out.execute(SetAttribute(Attribute::Reset))?;
        Ok(())
    }

    /// Render events from `receiver` until the bus is gone.
    pub async fn run_loop(&self, mut receiver: EventReceiver) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = self.render(&event) {
                        warn!(error = %e, "Failed to render event");
                    }
                }
                Err(BusError::Lagged(n)) => warn!(skipped = n, "Renderer fell behind"),
                Err(BusError::Closed) => break,
            }
        }
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}
