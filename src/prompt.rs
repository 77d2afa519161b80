//! Terminal password prompting (spec §4.10 ambient concern): reads a line
//! with echo disabled on unix ttys, falling back to a plain read when stdin
//! isn't a terminal (piped input, CI). Lifted from the corpus's
//! `vault::prompt` almost verbatim — same termios save/restore guard, same
//! plain-line fallback — minus its "new password" confirmation flow, which
//! towervault's CLI handles per-command instead.

use std::io::{self, BufRead, IsTerminal, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("input cannot be empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum NewPasswordError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("passwords do not match")]
    Mismatch,
}

pub fn prompt_password(label: &str) -> Result<String, PromptError> {
    let value = read_secret_line(label)?;
    if value.is_empty() {
        return Err(PromptError::Empty);
    }
    Ok(value)
}

/// Prompt twice and require the entries to match, for setting a new
/// password rather than verifying an existing one.
pub fn prompt_new_password(label: &str) -> Result<String, NewPasswordError> {
    let first = prompt_password(label)?;
    let confirm = prompt_password("Confirm: ")?;
    if first != confirm {
        return Err(NewPasswordError::Mismatch);
    }
    Ok(first)
}

fn read_secret_line(prompt: &str) -> Result<String, PromptError> {
    eprint!("{prompt}");
    io::stderr().flush()?;

    if io::stdin().is_terminal() {
        #[cfg(unix)]
        {
            return read_line_no_echo_unix();
        }
    }

    read_line_plain()
}

fn read_line_plain() -> Result<String, PromptError> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(trim_line_endings(&line))
}

#[cfg(unix)]
fn read_line_no_echo_unix() -> Result<String, PromptError> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let stdin = io::stdin();
    let fd = stdin.as_raw_fd();

    unsafe {
        let mut original = MaybeUninit::<libc::termios>::uninit();
        if libc::tcgetattr(fd, original.as_mut_ptr()) != 0 {
            return read_line_plain();
        }
        let original = original.assume_init();

        let mut modified = original;
        modified.c_lflag &= !(libc::ECHO | libc::ECHONL);
        let _guard = TermiosGuard {
            fd,
            original,
            active: libc::tcsetattr(fd, libc::TCSANOW, &modified) == 0,
        };

        let line = read_line_plain()?;
        eprintln!();
        Ok(line)
    }
}

#[cfg(unix)]
struct TermiosGuard {
    fd: i32,
    original: libc::termios,
    active: bool,
}

#[cfg(unix)]
impl Drop for TermiosGuard {
    fn drop(&mut self) {
        if self.active {
            unsafe {
                let _ = libc::tcsetattr(self.fd, libc::TCSANOW, &self.original);
            }
        }
    }
}

fn trim_line_endings(s: &str) -> String {
    s.trim_end_matches(['\n', '\r']).to_string()
}
