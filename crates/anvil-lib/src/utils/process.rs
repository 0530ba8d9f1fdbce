//! Spawn flags for the Java children the pipeline starts, and log-friendly
//! rendering of their command lines.

use tokio::process::Command;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

pub trait AnvilCommandExt {
    /// No console window for processors, probes and the game on Windows.
    fn suppress_console(&mut self) -> &mut Self;

    /// Lets the game outlive the launcher: a new session on unix, a new
    /// process group on Windows.
    fn detach(&mut self) -> &mut Self;
}

impl AnvilCommandExt for Command {
    fn suppress_console(&mut self) -> &mut Self {
        #[cfg(windows)]
        self.creation_flags(CREATE_NO_WINDOW);
        self
    }

    fn detach(&mut self) -> &mut Self {
        #[cfg(windows)]
        self.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        #[cfg(unix)]
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            self.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

/// Quotes an argument for a copy-pasteable command line in logs.
pub fn quote_arg(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }
    if s.chars().any(|c| c.is_whitespace() || c == '"') {
        let esc = s.replace('\\', "\\\\").replace('"', "\\\"");
        return format!("\"{}\"", esc);
    }
    s.to_string()
}

/// Renders a program plus arguments as a single loggable line.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(quote_arg(program))
        .chain(args.iter().map(|a| quote_arg(a)))
        .collect::<Vec<_>>()
        .join(" ")
}
