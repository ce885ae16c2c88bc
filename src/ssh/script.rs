//! Shell payload builders.
//!
//! Remote file content is never interpolated into shell text: every file is
//! carried as base64 and written via `base64 -d`, so the only shell-visible
//! strings are fixed paths and modes. Shell invocation proper is reserved
//! for the fixed, parameter-free automation commands.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

/// Typed "write this file remotely" instruction.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub path: String,
    /// Octal mode, e.g. `0o600`.
    pub mode: u32,
    pub content: Vec<u8>,
}

impl RemoteFile {
    pub fn new(path: impl Into<String>, mode: u32, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            mode,
            content: content.into(),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Script that creates `dirs` and materializes `files` with their modes.
pub fn materialize_script(dirs: &[String], files: &[RemoteFile]) -> String {
    let mut script = String::from("set -eu\n");
    for dir in dirs {
        script.push_str(&format!("mkdir -p {}\n", quote(dir)));
    }
    for file in files {
        let encoded = B64.encode(&file.content);
        script.push_str(&format!(
            "printf '%s' '{encoded}' | base64 -d > {path}\nchmod {mode:o} {path}\n",
            path = quote(&file.path),
            mode = file.mode,
        ));
    }
    script
}

/// Idempotent Docker bootstrap for a bastion host. Installs Docker if
/// absent, enables it under systemd when systemctl exists, and grants the
/// SSH user access to the docker socket.
pub fn bastion_install_script(ssh_user: &str) -> String {
    format!(
        r#"set -eu
if ! command -v docker >/dev/null 2>&1; then
    curl -fsSL https://get.docker.com | sh
fi
if command -v systemctl >/dev/null 2>&1; then
    sudo systemctl enable docker
    sudo systemctl start docker
fi
sudo usermod -aG docker {user}
docker --version
"#,
        user = quote(ssh_user),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_never_shell_visible() {
        let hostile = RemoteFile::new("/tmp/x", 0o600, "$(rm -rf /); `reboot`'\n");
        let script = materialize_script(&[], &[hostile]);
        assert!(!script.contains("rm -rf"));
        assert!(!script.contains("reboot"));
        assert!(script.contains("base64 -d"));
        assert!(script.contains("chmod 600 '/tmp/x'"));
    }

    #[test]
    fn dirs_are_created_before_files() {
        let script = materialize_script(
            &["/home/u/.ssh/autoglue/keys".to_string()],
            &[RemoteFile::new("/home/u/.ssh/autoglue/keys/k.pem", 0o600, "pem")],
        );
        let mkdir = script.find("mkdir -p").unwrap();
        let write = script.find("base64 -d").unwrap();
        assert!(mkdir < write);
    }

    #[test]
    fn install_script_is_idempotent_by_construction() {
        let script = bastion_install_script("ubuntu");
        assert!(script.contains("command -v docker"));
        assert!(script.contains("usermod -aG docker 'ubuntu'"));
    }
}
