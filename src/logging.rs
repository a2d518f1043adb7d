use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Lines kept for slow `/api/logs` subscribers before they see a lag notice.
pub const LOG_CHANNEL_CAPACITY: usize = 500;

#[derive(Clone)]
pub(crate) struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// `log_level` from config, defaulting to INFO when unrecognised.
pub(crate) fn parse_level(raw: &str) -> Level {
    Level::from_str(raw.trim()).unwrap_or(Level::INFO)
}

/// Install the global subscriber. Every formatted line also goes to `tx`.
/// One-shot CLI commands pass `suppress_stdout` so logs don't interleave
/// with their output.
pub(crate) fn init(level: &str, tx: broadcast::Sender<String>, suppress_stdout: bool) {
    let make_writer = SseMakeWriter {
        sender: tx,
        suppress_stdout,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(level))
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level(" WARN "), Level::WARN);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn writer_fans_out_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(4);
        let make_writer = SseMakeWriter {
            sender: tx,
            suppress_stdout: true,
        };
        let mut writer = make_writer.make_writer();
        writer.write_all(b"INFO hello\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "INFO hello\n");
    }
}
