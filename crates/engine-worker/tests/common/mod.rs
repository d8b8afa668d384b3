//! Stub UCI engines for integration tests, run through `sh -c`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use engine_worker::{EngineCommand, SessionSettings};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Session settings with short timeouts so failure tests finish quickly.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        default_depth: 5,
        default_movetime: None,
        handshake_timeout: Duration::from_millis(1500),
        compute_timeout: Duration::from_millis(1500),
        compute_grace: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
        quit_grace: Duration::from_millis(300),
        terminate_grace: Duration::from_millis(300),
        kill_timeout: Duration::from_millis(300),
        ..SessionSettings::default()
    }
}

/// A well-behaved engine that runs `on_go` (shell commands) for every `go`.
/// The `go` line itself is available to `on_go` as `$line`.
pub fn stub_engine(on_go: &str) -> EngineCommand {
    scripted_engine(on_go, "exit 0")
}

/// Like [`stub_engine`] but with a custom reaction to `quit`.
pub fn scripted_engine(on_go: &str, on_quit: &str) -> EngineCommand {
    engine_script("", on_go, on_quit)
}

/// Full stub: `prelude` runs once before the command loop.
pub fn engine_script(prelude: &str, on_go: &str, on_quit: &str) -> EngineCommand {
    let script = format!(
        r#"{prelude}
while IFS= read -r line; do
  case "$line" in
    uci) echo "id name Stub Engine"; echo "option name Hash type spin default 16"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) {on_go} ;;
    quit) {on_quit} ;;
  esac
done"#
    );
    shell(&script)
}

/// Shell commands echoing each line in order.
pub fn replies(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| format!("echo '{l}'"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn shell(script: &str) -> EngineCommand {
    EngineCommand::new("sh").arg("-c").arg(script)
}

/// A fresh path in the temp dir for a file written by a stub.
pub fn scratch_file(name: &str) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "engine-worker-test-{}-{n}-{name}",
        std::process::id()
    ));
    let _ = fs::remove_file(&path);
    path
}

/// Shell line that writes the stub's pid to `path`.
pub fn record_pid(path: &Path) -> String {
    format!("echo $$ > '{}'", path.display())
}

pub fn recorded_pid(path: &Path) -> i32 {
    fs::read_to_string(path)
        .expect("stub did not record its pid")
        .trim()
        .parse()
        .expect("pid file holds a number")
}

/// Signal 0: succeeds while the process exists (zombies included).
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None::<Signal>).is_ok()
}
